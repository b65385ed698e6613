/// WebSocket-based synchronization protocol for real-time collaboration
use serde::{Deserialize, Serialize};
use versioning::VersionId;

use crate::{
    AnchorNotice, Annotation, AnnotationId, CollaborationEvent, CollaborationUser, EventKind, Permissions,
    RemoteCursor, SessionId, User, UserId,
};

/// Message types exchanged between client and server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    // Connection management
    #[serde(rename = "connect")]
    Connect {
        session_id: SessionId,
        user: User,
        permissions: Permissions,
    },

    /// Roster and content checksum; the client resyncs if its buffer differs
    #[serde(rename = "connected")]
    Connected {
        session_id: SessionId,
        user_id: UserId,
        roster: Vec<CollaborationUser>,
        checksum: String,
        seq: u64,
    },

    #[serde(rename = "disconnect")]
    Disconnect { user_id: UserId },

    // Event flow
    /// Client request; the coordinator stamps and rebroadcasts it
    #[serde(rename = "submit")]
    Submit { kind: EventKind },

    #[serde(rename = "event")]
    Event { event: CollaborationEvent },

    #[serde(rename = "cursors_remapped")]
    CursorsRemapped { cursors: Vec<RemoteCursor> },

    #[serde(rename = "anchor_notices")]
    AnchorNotices { notices: Vec<AnchorNotice> },

    // Resync
    #[serde(rename = "resync_request")]
    ResyncRequest,

    #[serde(rename = "resync_response")]
    ResyncResponse {
        content: String,
        checksum: String,
        seq: u64,
        roster: Vec<CollaborationUser>,
        annotations: Vec<Annotation>,
    },

    // Annotation review; needs approval rights
    /// Accept a degraded anchor where it now sits
    #[serde(rename = "confirm_anchor")]
    ConfirmAnchor { annotation_id: AnnotationId },

    #[serde(rename = "apply_suggestion")]
    ApplySuggestion { annotation_id: AnnotationId },

    #[serde(rename = "reject_annotation")]
    RejectAnnotation { annotation_id: AnnotationId },

    // Version operations
    #[serde(rename = "save_version")]
    SaveVersion {
        title: String,
        description: Option<String>,
        milestone: bool,
    },

    #[serde(rename = "restore_version")]
    RestoreVersion { version_id: VersionId },

    #[serde(rename = "version_restored")]
    VersionRestored {
        version_id: VersionId,
        content: String,
        checksum: String,
    },

    // Error handling
    #[serde(rename = "error")]
    Error { message: String },

    // Heartbeat
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "pong")]
    Pong,
}

impl SyncMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Connected { .. } => "connected",
            Self::Disconnect { .. } => "disconnect",
            Self::Submit { .. } => "submit",
            Self::Event { .. } => "event",
            Self::CursorsRemapped { .. } => "cursors_remapped",
            Self::AnchorNotices { .. } => "anchor_notices",
            Self::ResyncRequest => "resync_request",
            Self::ResyncResponse { .. } => "resync_response",
            Self::ConfirmAnchor { .. } => "confirm_anchor",
            Self::ApplySuggestion { .. } => "apply_suggestion",
            Self::RejectAnnotation { .. } => "reject_annotation",
            Self::SaveVersion { .. } => "save_version",
            Self::RestoreVersion { .. } => "restore_version",
            Self::VersionRestored { .. } => "version_restored",
            Self::Error { .. } => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::CursorPosition;

    #[test]
    fn test_submit_wire_format() {
        let msg = SyncMessage::Submit {
            kind: EventKind::CursorMove {
                position: CursorPosition::default(),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"submit""#));
        assert!(json.contains(r#""type":"cursor-move""#));

        let back: SyncMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_unit_variants() {
        let ping: SyncMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, SyncMessage::Ping);
        assert_eq!(ping.name(), "ping");
    }

    #[test]
    fn test_review_request_wire_format() {
        let msg = SyncMessage::ApplySuggestion {
            annotation_id: AnnotationId::new(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "apply_suggestion");
        assert!(json["annotation_id"].is_string());
    }
}
