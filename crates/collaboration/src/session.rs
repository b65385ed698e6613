/// Per-session coordinator: the single owner of a document's live state
///
/// Every inbound message is handled to completion before the next one, and
/// handlers return the messages to route instead of sending them, so the
/// coordinator stays synchronous and testable.
use chrono::{DateTime, Utc};
use document::{diff, CursorPosition, DiffResult, TextRange};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use versioning::{
    checksum, three_way_merge, VersionEntry, VersionId, VersionOptions, VersionStore,
};

use crate::{
    AnnotationBody, AnnotationId, AnnotationSet, CollabConfig, CollaborationError, CollaborationUser, EventKind,
    EventLog, LeaveReason, Permissions, PresenceManager, Result, SessionId, SyncMessage, User,
    UserId,
};

/// How many earlier buffers a stale edit may be based on
const RECENT_BUFFERS: usize = 32;

/// Who should receive an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    User(UserId),
    AllExcept(UserId),
    All,
}

impl Recipients {
    pub fn includes(&self, user_id: &UserId) -> bool {
        match self {
            Self::User(id) => id == user_id,
            Self::AllExcept(id) => id != user_id,
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: Recipients,
    pub message: SyncMessage,
}

impl Outgoing {
    fn to_user(user_id: UserId, message: SyncMessage) -> Self {
        Self {
            to: Recipients::User(user_id),
            message,
        }
    }
}

/// Wall-clock reading that advances with the tokio clock
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    wall: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            wall: Utc::now(),
            start: tokio::time::Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Session information
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub user_count: usize,
    pub last_seq: u64,
    pub version_count: usize,
    pub checksum: String,
}

pub struct SessionState {
    id: SessionId,
    content: String,
    presence: PresenceManager,
    annotations: AnnotationSet,
    log: EventLog,
    store: VersionStore,
    heartbeat_timeout: chrono::Duration,
    clock: SessionClock,

    /// Bumped on every buffer replacement
    revision: u64,

    /// Previous buffers by checksum, for rebasing stale edits
    recent: VecDeque<(String, String)>,

    last_editor: Option<UserId>,
}

impl SessionState {
    /// Start a session whose buffer is the head of the store's current branch
    pub fn new(id: SessionId, config: &CollabConfig, store: VersionStore) -> Self {
        let content = store
            .head(store.current_branch())
            .map(|v| v.content.clone())
            .unwrap_or_default();

        Self {
            id,
            content,
            presence: PresenceManager::new(),
            annotations: AnnotationSet::new(),
            log: EventLog::new(id, config.event_log_capacity),
            store,
            heartbeat_timeout: config.heartbeat_timeout(),
            clock: SessionClock::new(),
            revision: 0,
            recent: VecDeque::new(),
            last_editor: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn checksum(&self) -> String {
        checksum(&self.content)
    }

    /// Time presence is measured against
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn presence(&self) -> &PresenceManager {
        &self.presence
    }

    pub fn annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            user_count: self.presence.len(),
            last_seq: self.log.last_seq(),
            version_count: self.store.len(),
            checksum: self.checksum(),
        }
    }

    /// Admit a participant: roster and checksum to them, `user-join` to
    /// everyone else
    pub fn join(&mut self, user: User, permissions: Permissions) -> Vec<Outgoing> {
        let user_id = user.id;
        let mut member = CollaborationUser::new(user.clone(), permissions);
        member.touch(self.now());
        let rejoin = self.presence.join(member).is_some();

        let mut out = Vec::new();
        if !rejoin {
            info!("User {} ({}) joined session {}", user.name, user_id, self.id);
            let event = self.log.append(user_id, EventKind::UserJoin { user, permissions });
            out.push(Outgoing {
                to: Recipients::AllExcept(user_id),
                message: SyncMessage::Event { event },
            });
        } else {
            debug!("User {} rejoined session {}", user_id, self.id);
        }

        out.insert(
            0,
            Outgoing::to_user(
                user_id,
                SyncMessage::Connected {
                    session_id: self.id,
                    user_id,
                    roster: self.presence.roster(),
                    checksum: self.checksum(),
                    seq: self.log.last_seq(),
                },
            ),
        );
        out
    }

    pub fn leave(&mut self, user_id: UserId, reason: LeaveReason) -> Vec<Outgoing> {
        if self.presence.leave(&user_id).is_none() {
            return Vec::new();
        }
        info!("User {} left session {} ({:?})", user_id, self.id, reason);

        let event = self.log.append(user_id, EventKind::UserLeave { reason });
        vec![Outgoing {
            to: Recipients::All,
            message: SyncMessage::Event { event },
        }]
    }

    /// Drop participants whose heartbeat lapsed
    ///
    /// Returns who was dropped; each is told along with everyone else.
    pub fn expire_idle(&mut self, now: DateTime<Utc>) -> (Vec<UserId>, Vec<Outgoing>) {
        let expired = self.presence.expire(self.heartbeat_timeout, now);
        let mut dropped = Vec::with_capacity(expired.len());
        let mut out = Vec::with_capacity(expired.len());
        for user in expired {
            info!("User {} timed out of session {}", user.id(), self.id);
            let event = self.log.append(
                user.id(),
                EventKind::UserLeave {
                    reason: LeaveReason::Timeout,
                },
            );
            dropped.push(user.id());
            out.push(Outgoing {
                to: Recipients::All,
                message: SyncMessage::Event { event },
            });
        }
        (dropped, out)
    }

    /// Handle one message from a participant; failures become an `error`
    /// reply to that participant only
    pub fn handle(&mut self, from: UserId, message: SyncMessage) -> Vec<Outgoing> {
        let name = message.name();
        match self.dispatch(from, message) {
            Ok(out) => out,
            Err(err) => {
                warn!("Rejected {} from {}: {}", name, from, err);
                vec![Outgoing::to_user(from, SyncMessage::error(err.to_string()))]
            }
        }
    }

    fn dispatch(&mut self, from: UserId, message: SyncMessage) -> Result<Vec<Outgoing>> {
        let permissions = self
            .presence
            .get(&from)
            .map(|u| u.permissions)
            .ok_or_else(|| CollaborationError::UserNotFound(from.to_string()))?;
        self.presence.touch(&from, self.clock.now());

        match message {
            SyncMessage::Submit { kind } => self.handle_event(from, permissions, kind),

            SyncMessage::ResyncRequest => Ok(vec![Outgoing::to_user(
                from,
                SyncMessage::ResyncResponse {
                    content: self.content.clone(),
                    checksum: self.checksum(),
                    seq: self.log.last_seq(),
                    roster: self.presence.roster(),
                    annotations: self.annotations.visible().cloned().collect(),
                },
            )]),

            SyncMessage::ConfirmAnchor { annotation_id } => {
                require(permissions.can_approve, "confirming anchors")?;
                self.annotations.confirm(annotation_id)?;
                Ok(self.annotation_updated(from, annotation_id))
            }

            SyncMessage::RejectAnnotation { annotation_id } => {
                require(permissions.can_approve, "rejecting annotations")?;
                self.annotations.reject(annotation_id)?;
                Ok(self.annotation_updated(from, annotation_id))
            }

            SyncMessage::ApplySuggestion { annotation_id } => {
                require(permissions.can_approve, "applying suggestions")?;
                let updated = self.annotations.auto_apply(annotation_id, &self.content)?;
                info!("User {} applied suggestion {}", from, annotation_id.0);
                let mut out = self.commit_content(from, updated, Recipients::All);
                out.extend(self.annotation_updated(from, annotation_id));
                Ok(out)
            }

            SyncMessage::SaveVersion {
                title,
                description,
                milestone,
            } => {
                require(permissions.can_manage_versions, "saving versions")?;
                let mut options = VersionOptions::new(from.to_string(), title);
                options.description = description;
                options.is_milestone = milestone;
                let entry = self.store.create_version(&self.content, options)?;
                Ok(vec![self.version_saved(from, &entry)])
            }

            SyncMessage::RestoreVersion { version_id } => {
                require(permissions.can_manage_versions, "restoring versions")?;
                self.restore(from, version_id)
            }

            SyncMessage::Disconnect { user_id } if user_id == from => {
                Ok(self.leave(from, LeaveReason::Disconnect))
            }

            SyncMessage::Ping => Ok(vec![Outgoing::to_user(from, SyncMessage::Pong)]),

            SyncMessage::Pong => Ok(Vec::new()),

            other => Err(CollaborationError::InvalidOp(format!(
                "unexpected {} message",
                other.name()
            ))),
        }
    }

    fn handle_event(&mut self, from: UserId, permissions: Permissions, kind: EventKind) -> Result<Vec<Outgoing>> {
        if kind.is_coordinator_only() {
            return Err(CollaborationError::InvalidOp(format!(
                "{} events are emitted by the session",
                kind.name()
            )));
        }

        match kind {
            EventKind::CursorMove { position } => {
                let position = CursorPosition::in_content(&self.content, position.offset);
                self.presence.update_cursor(&from, position);
                Ok(self.rebroadcast(from, EventKind::CursorMove { position }))
            }

            EventKind::TextSelect { range } => {
                let len = document::char_len(&self.content);
                let range = range.map(|r| {
                    let start = r.start.min(len);
                    TextRange::new(start, r.end.clamp(start, len))
                });
                self.presence.update_selection(&from, range);
                Ok(self.rebroadcast(from, EventKind::TextSelect { range }))
            }

            EventKind::ContentChange {
                content,
                base_checksum,
            } => {
                require(permissions.can_edit, "editing")?;
                self.apply_content(from, content, base_checksum)
            }

            EventKind::SuggestionAdd { mut annotation } => {
                require(permissions.can_suggest, "suggesting")?;
                if !matches!(annotation.body, AnnotationBody::Suggestion { .. }) {
                    return Err(CollaborationError::InvalidOp("suggestion-add needs a suggestion".into()));
                }
                annotation.author = from;
                self.annotations.add(annotation.clone(), &self.content)?;
                let stored = self.annotations.get(annotation.id).cloned().unwrap_or(annotation);
                Ok(self.rebroadcast(from, EventKind::SuggestionAdd { annotation: stored }))
            }

            EventKind::CommentAdd { mut annotation } => {
                require(permissions.can_comment, "commenting")?;
                if !matches!(annotation.body, AnnotationBody::Comment { .. }) {
                    return Err(CollaborationError::InvalidOp("comment-add needs a comment".into()));
                }
                annotation.author = from;
                self.annotations.add(annotation.clone(), &self.content)?;
                let stored = self.annotations.get(annotation.id).cloned().unwrap_or(annotation);
                Ok(self.rebroadcast(from, EventKind::CommentAdd { annotation: stored }))
            }

            other => Err(CollaborationError::InvalidOp(format!("unexpected {}", other.name()))),
        }
    }

    /// Replace the buffer, then carry peers' cursors and the annotations
    /// across the change
    ///
    /// An edit made against an older buffer is rebased onto the current one
    /// when the two touch different lines. Overlapping edits, or edits from
    /// an unknown base, replace the buffer: the last write to arrive wins.
    fn apply_content(
        &mut self,
        from: UserId,
        incoming: String,
        base_checksum: Option<String>,
    ) -> Result<Vec<Outgoing>> {
        let current = self.checksum();
        let content = match base_checksum.filter(|base| *base != current) {
            Some(base) => match self.recent_content(&base) {
                Some(base_content) => {
                    match three_way_merge(base_content, &self.content, &incoming) {
                        (Some(merged), _) => {
                            debug!("Rebased stale edit from {}", from);
                            merged
                        }
                        (None, conflicts) => {
                            warn!(
                                "Concurrent edit from {} overlaps {} region(s); last write wins",
                                from,
                                conflicts.len()
                            );
                            incoming.clone()
                        }
                    }
                }
                None => {
                    warn!("Edit from {} has an unknown base; last write wins", from);
                    incoming.clone()
                }
            },
            None => incoming.clone(),
        };

        // A rebased buffer differs from what the author holds
        let to = if content == incoming {
            Recipients::AllExcept(from)
        } else {
            Recipients::All
        };
        Ok(self.commit_content(from, content, to))
    }

    /// Install `content` as the buffer and log the change for `to`
    fn commit_content(&mut self, from: UserId, content: String, to: Recipients) -> Vec<Outgoing> {
        let current = self.checksum();
        let change = diff(&self.content, &content);
        if change.is_identical() {
            debug!("Ignoring no-op content change from {}", from);
            return Vec::new();
        }

        self.replace_content(from, content.clone());
        let event = self.log.append(
            from,
            EventKind::ContentChange {
                content,
                base_checksum: Some(current),
            },
        );
        debug!("seq {} content-change from {}", event.seq, from);

        let mut out = vec![Outgoing {
            to,
            message: SyncMessage::Event { event },
        }];
        out.extend(self.carry_anchors(from, &change));
        out
    }

    fn replace_content(&mut self, from: UserId, content: String) {
        let previous = std::mem::replace(&mut self.content, content);
        if self.recent.len() == RECENT_BUFFERS {
            self.recent.pop_front();
        }
        self.recent.push_back((checksum(&previous), previous));
        self.revision += 1;
        self.last_editor = Some(from);
    }

    fn recent_content(&self, sum: &str) -> Option<&str> {
        self.recent
            .iter()
            .rev()
            .find(|(s, _)| s == sum)
            .map(|(_, content)| content.as_str())
    }

    fn restore(&mut self, from: UserId, version_id: VersionId) -> Result<Vec<Outgoing>> {
        let content = self.store.restore(version_id)?;
        let change = diff(&self.content, &content);
        self.replace_content(from, content.clone());
        info!("Session {} restored {}", self.id, version_id);

        let mut out = vec![Outgoing {
            to: Recipients::All,
            message: SyncMessage::VersionRestored {
                version_id,
                checksum: checksum(&content),
                content,
            },
        }];
        out.extend(self.carry_anchors(from, &change));
        Ok(out)
    }

    fn carry_anchors(&mut self, author: UserId, change: &DiffResult) -> Vec<Outgoing> {
        let mut out = Vec::new();

        let cursors = self.presence.remap_peers(&author, change);
        if !cursors.is_empty() {
            out.push(Outgoing {
                to: Recipients::All,
                message: SyncMessage::CursorsRemapped { cursors },
            });
        }

        let notices = self.annotations.reanchor(change);
        if !notices.is_empty() {
            out.push(Outgoing {
                to: Recipients::All,
                message: SyncMessage::AnchorNotices { notices },
            });
        }
        out
    }

    /// Snapshot the buffer as an auto-save unless it matches the branch head
    pub fn auto_save(&mut self) -> Result<Vec<Outgoing>> {
        let Some(author) = self.last_editor else {
            return Ok(Vec::new());
        };
        if self.store.head_checksum() == Some(self.checksum().as_str()) {
            debug!("Auto-save skipped for session {}: unchanged", self.id);
            return Ok(Vec::new());
        }
        if self.store.is_empty() && self.content.is_empty() {
            return Ok(Vec::new());
        }

        let options = VersionOptions::new(author.to_string(), "Auto-save").auto_save();
        let entry = self.store.create_version(&self.content, options)?;
        Ok(vec![self.version_saved(author, &entry)])
    }

    fn version_saved(&mut self, user_id: UserId, entry: &VersionEntry) -> Outgoing {
        let event = self.log.append(
            user_id,
            EventKind::VersionSave {
                version_id: entry.id,
                title: entry.title.clone(),
                is_auto_save: entry.is_auto_save,
            },
        );
        Outgoing {
            to: Recipients::All,
            message: SyncMessage::Event { event },
        }
    }

    fn annotation_updated(&mut self, from: UserId, id: AnnotationId) -> Vec<Outgoing> {
        let Some(annotation) = self.annotations.get(id).cloned() else {
            return Vec::new();
        };
        let event = self.log.append(from, EventKind::AnnotationUpdate { annotation });
        vec![Outgoing {
            to: Recipients::All,
            message: SyncMessage::Event { event },
        }]
    }

    fn rebroadcast(&mut self, from: UserId, kind: EventKind) -> Vec<Outgoing> {
        let event = self.log.append(from, kind);
        debug!("seq {} {} from {}", event.seq, event.kind.name(), from);
        vec![Outgoing {
            to: Recipients::AllExcept(from),
            message: SyncMessage::Event { event },
        }]
    }
}

fn require(allowed: bool, action: &str) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(CollaborationError::PermissionDenied(format!("{action} is not permitted")))
    }
}
