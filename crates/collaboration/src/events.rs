/// Session events and the bounded in-session event log
use chrono::{DateTime, Utc};
use document::{CursorPosition, TextRange};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use versioning::VersionId;

use crate::{Annotation, Permissions, SessionId, User, UserId};

/// Event payloads, keyed by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum EventKind {
    CursorMove {
        position: CursorPosition,
    },

    TextSelect {
        range: Option<TextRange>,
    },

    /// Full replacement buffer, plus the checksum of the buffer it was
    /// edited from so stale edits can be rebased
    ContentChange {
        content: String,
        #[serde(default)]
        base_checksum: Option<String>,
    },

    SuggestionAdd {
        annotation: Annotation,
    },

    CommentAdd {
        annotation: Annotation,
    },

    VersionSave {
        version_id: VersionId,
        title: String,
        is_auto_save: bool,
    },

    /// Review outcome: confirmed anchor, applied or rejected
    AnnotationUpdate {
        annotation: Annotation,
    },

    UserJoin {
        user: User,
        permissions: Permissions,
    },

    UserLeave {
        reason: LeaveReason,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CursorMove { .. } => "cursor-move",
            Self::TextSelect { .. } => "text-select",
            Self::ContentChange { .. } => "content-change",
            Self::SuggestionAdd { .. } => "suggestion-add",
            Self::CommentAdd { .. } => "comment-add",
            Self::VersionSave { .. } => "version-save",
            Self::AnnotationUpdate { .. } => "annotation-update",
            Self::UserJoin { .. } => "user-join",
            Self::UserLeave { .. } => "user-leave",
        }
    }

    /// Kinds only the coordinator may emit
    pub fn is_coordinator_only(&self) -> bool {
        matches!(
            self,
            Self::VersionSave { .. }
                | Self::AnnotationUpdate { .. }
                | Self::UserJoin { .. }
                | Self::UserLeave { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Disconnect,
    Timeout,
}

/// One stamped event in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationEvent {
    /// Coordinator arrival order
    pub seq: u64,

    pub session_id: SessionId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// Append-only log that keeps the most recent `capacity` events
#[derive(Debug, Clone)]
pub struct EventLog {
    session_id: SessionId,
    capacity: usize,
    events: VecDeque<CollaborationEvent>,
    last_seq: u64,
}

impl EventLog {
    pub fn new(session_id: SessionId, capacity: usize) -> Self {
        Self {
            session_id,
            capacity: capacity.max(1),
            events: VecDeque::new(),
            last_seq: 0,
        }
    }

    /// Stamp and append an event
    pub fn append(&mut self, user_id: UserId, kind: EventKind) -> CollaborationEvent {
        self.last_seq += 1;
        let event = CollaborationEvent {
            seq: self.last_seq,
            session_id: self.session_id,
            user_id,
            timestamp: Utc::now(),
            kind,
        };

        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
        event
    }

    /// Retained events after `seq`; `None` if some were already dropped
    pub fn since(&self, seq: u64) -> Option<Vec<CollaborationEvent>> {
        let oldest = self.events.front().map_or(self.last_seq + 1, |e| e.seq);
        if seq + 1 < oldest {
            return None;
        }
        Some(self.events.iter().filter(|e| e.seq > seq).cloned().collect())
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollaborationEvent> {
        self.events.iter()
    }
}
