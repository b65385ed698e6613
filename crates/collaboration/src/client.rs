/// Client-side sync: editor surface seam plus the connect/resync state machine
use document::{CursorPosition, TextRange};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use versioning::{checksum, VersionId};

use crate::{
    AnchorNotice, Annotation, AnnotationId, CollaborationError, CollaborationUser, EventKind, Permissions,
    Result, SessionId, SyncMessage, Transport, TransportEvent, User, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,

    /// Local buffer differs from the session; edits are blocked
    Resyncing,

    Connected,

    /// Link lost; edits are blocked until the next resync
    Reconnecting,
}

/// Callbacks into the visual editor
pub trait EditorSurface: Send {
    fn on_remote_content_change(&mut self, content: &str);

    fn on_remote_cursor(&mut self, user_id: UserId, cursor: CursorPosition, selection: Option<TextRange>);

    fn on_version_restored(&mut self, content: &str);

    fn on_anchor_notice(&mut self, _notice: &AnchorNotice) {}

    fn on_connection_state(&mut self, _state: ConnectionState) {}
}

/// One participant's replica of a session
pub struct SyncClient<T: Transport, S: EditorSurface> {
    session_id: SessionId,
    user: User,
    permissions: Permissions,
    transport: T,
    surface: S,
    state: ConnectionState,

    /// Advisory replica of the session buffer
    content: String,

    roster: HashMap<UserId, CollaborationUser>,
    annotations: Vec<Annotation>,
    last_seq: u64,
}

impl<T: Transport, S: EditorSurface> SyncClient<T, S> {
    pub fn new(session_id: SessionId, user: User, permissions: Permissions, transport: T, surface: S) -> Self {
        Self {
            session_id,
            user,
            permissions,
            transport,
            surface,
            state: ConnectionState::Disconnected,
            content: String::new(),
            roster: HashMap::new(),
            annotations: Vec::new(),
            last_seq: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn roster(&self) -> impl Iterator<Item = &CollaborationUser> {
        self.roster.values()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Announce ourselves to the session
    pub fn connect(&mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        self.transport.send(SyncMessage::Connect {
            session_id: self.session_id,
            user: self.user.clone(),
            permissions: self.permissions,
        })
    }

    /// Swap in a fresh link after a drop and start over; the local buffer
    /// is kept and compared against the session checksum
    pub fn reconnect(&mut self, transport: T) -> Result<()> {
        self.transport = transport;
        self.connect()
    }

    pub fn on_content_change(&mut self, content: impl Into<String>) -> Result<()> {
        self.ensure_connected()?;
        let content = content.into();
        let base_checksum = Some(checksum(&self.content));
        self.content = content.clone();
        self.submit(EventKind::ContentChange {
            content,
            base_checksum,
        })
    }

    pub fn on_cursor_move(&mut self, offset: usize) -> Result<()> {
        self.ensure_connected()?;
        let position = CursorPosition::in_content(&self.content, offset);
        self.submit(EventKind::CursorMove { position })
    }

    pub fn on_selection_change(&mut self, range: Option<TextRange>) -> Result<()> {
        self.ensure_connected()?;
        self.submit(EventKind::TextSelect { range })
    }

    pub fn add_annotation(&mut self, annotation: Annotation) -> Result<()> {
        self.ensure_connected()?;
        let kind = if annotation.is_suggestion() {
            EventKind::SuggestionAdd { annotation }
        } else {
            EventKind::CommentAdd { annotation }
        };
        self.submit(kind)
    }

    pub fn save_version(&mut self, title: impl Into<String>, milestone: bool) -> Result<()> {
        self.ensure_connected()?;
        self.transport.send(SyncMessage::SaveVersion {
            title: title.into(),
            description: None,
            milestone,
        })
    }

    pub fn restore_version(&mut self, version_id: VersionId) -> Result<()> {
        self.ensure_connected()?;
        self.transport.send(SyncMessage::RestoreVersion { version_id })
    }

    pub fn confirm_anchor(&mut self, annotation_id: AnnotationId) -> Result<()> {
        self.ensure_connected()?;
        self.transport.send(SyncMessage::ConfirmAnchor { annotation_id })
    }

    /// Ask the session to splice a suggestion in; the result arrives as a
    /// regular content change
    pub fn apply_suggestion(&mut self, annotation_id: AnnotationId) -> Result<()> {
        self.ensure_connected()?;
        self.transport.send(SyncMessage::ApplySuggestion { annotation_id })
    }

    pub fn reject_annotation(&mut self, annotation_id: AnnotationId) -> Result<()> {
        self.ensure_connected()?;
        self.transport.send(SyncMessage::RejectAnnotation { annotation_id })
    }

    /// Keep our presence alive; call more often than the session's
    /// heartbeat timeout
    pub fn heartbeat(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Resyncing => {
                self.transport.send(SyncMessage::Ping)
            }
            _ => Ok(()),
        }
    }

    /// Like `poll`, but pings the session whenever `heartbeat` ticks
    pub async fn poll_with_heartbeat(&mut self, heartbeat: &mut tokio::time::Interval) -> Result<bool> {
        loop {
            tokio::select! {
                _ = heartbeat.tick() => self.heartbeat()?,
                event = self.transport.recv() => return self.on_transport(event),
            }
        }
    }

    /// Wait for and handle the next inbound message; `false` once the
    /// link dropped
    pub async fn poll(&mut self) -> Result<bool> {
        let event = self.transport.recv().await;
        self.on_transport(event)
    }

    fn on_transport(&mut self, event: TransportEvent) -> Result<bool> {
        match event {
            TransportEvent::Message(message) => {
                self.handle_message(message)?;
                Ok(true)
            }
            TransportEvent::Disconnected(reason) => {
                self.handle_disconnect(&reason);
                Ok(false)
            }
        }
    }

    pub fn handle_disconnect(&mut self, reason: &str) {
        warn!("Lost connection to session {}: {}", self.session_id, reason);
        self.set_state(ConnectionState::Reconnecting);
    }

    pub fn handle_message(&mut self, message: SyncMessage) -> Result<()> {
        match message {
            SyncMessage::Connected {
                roster,
                checksum: remote,
                seq,
                ..
            } => {
                self.roster = roster.into_iter().map(|u| (u.id(), u)).collect();
                self.last_seq = seq;
                if checksum(&self.content) == remote {
                    self.set_state(ConnectionState::Connected);
                } else {
                    debug!("Local buffer differs from session; requesting resync");
                    self.set_state(ConnectionState::Resyncing);
                    self.transport.send(SyncMessage::ResyncRequest)?;
                }
            }

            SyncMessage::ResyncResponse {
                content,
                checksum: remote,
                seq,
                roster,
                annotations,
            } => {
                if checksum(&content) != remote {
                    warn!("Resync payload failed checksum; retrying");
                    return self.transport.send(SyncMessage::ResyncRequest);
                }
                self.content = content;
                self.last_seq = seq;
                self.roster = roster.into_iter().map(|u| (u.id(), u)).collect();
                self.annotations = annotations;
                self.surface.on_remote_content_change(&self.content);
                self.set_state(ConnectionState::Connected);
            }

            SyncMessage::Event { event } => {
                self.last_seq = self.last_seq.max(event.seq);
                self.apply_event(event.user_id, event.kind);
            }

            SyncMessage::CursorsRemapped { cursors } => {
                for remote in cursors {
                    if let Some(user) = self.roster.get_mut(&remote.user_id) {
                        user.cursor = remote.cursor;
                        user.selection = remote.selection;
                    }
                    if remote.user_id != self.user.id {
                        self.surface
                            .on_remote_cursor(remote.user_id, remote.cursor, remote.selection);
                    }
                }
            }

            SyncMessage::AnchorNotices { notices } => {
                for notice in &notices {
                    self.annotations.retain(|a| {
                        a.id != notice.annotation_id
                            || notice.status != crate::AnchorStatus::Stale
                    });
                    self.surface.on_anchor_notice(notice);
                }
            }

            SyncMessage::VersionRestored {
                version_id,
                content,
                ..
            } => {
                info!("Session restored {}", version_id);
                self.content = content;
                self.surface.on_version_restored(&self.content);
            }

            SyncMessage::Ping => self.transport.send(SyncMessage::Pong)?,

            SyncMessage::Error { message } => {
                warn!("Session rejected request: {}", message);
                match self.state {
                    // Our buffer may hold an edit the session refused
                    ConnectionState::Connected => {
                        self.set_state(ConnectionState::Resyncing);
                        self.transport.send(SyncMessage::ResyncRequest)?;
                    }
                    // The session no longer knows us
                    ConnectionState::Resyncing => self.set_state(ConnectionState::Reconnecting),
                    _ => {}
                }
            }

            other => debug!("Ignoring {} message", other.name()),
        }
        Ok(())
    }

    fn apply_event(&mut self, from: UserId, kind: EventKind) {
        match kind {
            EventKind::ContentChange { content, .. } => {
                self.content = content;
                self.surface.on_remote_content_change(&self.content);
            }
            EventKind::CursorMove { position } => {
                if let Some(user) = self.roster.get_mut(&from) {
                    user.cursor = position;
                }
                let selection = self.roster.get(&from).and_then(|u| u.selection);
                self.surface.on_remote_cursor(from, position, selection);
            }
            EventKind::TextSelect { range } => {
                let cursor = match self.roster.get_mut(&from) {
                    Some(user) => {
                        user.selection = range;
                        user.cursor
                    }
                    None => CursorPosition::default(),
                };
                self.surface.on_remote_cursor(from, cursor, range);
            }
            EventKind::SuggestionAdd { annotation } | EventKind::CommentAdd { annotation } => {
                self.annotations.push(annotation);
            }
            EventKind::UserJoin { user, permissions } => {
                self.roster
                    .insert(user.id, CollaborationUser::new(user, permissions));
            }
            EventKind::UserLeave { reason } => {
                self.roster.remove(&from);
                if from == self.user.id {
                    warn!("Dropped from session {} ({:?})", self.session_id, reason);
                    self.set_state(ConnectionState::Reconnecting);
                }
            }
            EventKind::AnnotationUpdate { annotation } => {
                self.annotations.retain(|a| a.id != annotation.id);
                if annotation.is_open() {
                    self.annotations.push(annotation);
                }
            }
            EventKind::VersionSave { version_id, .. } => {
                debug!("Version {} saved", version_id);
            }
        }
    }

    fn submit(&mut self, kind: EventKind) -> Result<()> {
        self.transport.send(SyncMessage::Submit { kind })
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            state => Err(CollaborationError::Blocked(format!("connection is {:?}", state))),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.surface.on_connection_state(state);
        }
    }
}
