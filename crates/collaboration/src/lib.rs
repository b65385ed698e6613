/// Real-time collaborative editing for versioned documents
/// Session coordination, presence, anchored annotations and auto-save
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use versioning::VersionError;

mod config;
pub use config::*;

mod presence;
pub use presence::*;

mod events;
pub use events::*;

mod resolver;
pub use resolver::*;

mod sync;
pub use sync::*;

mod session;
pub use session::*;

mod autosave;
pub use autosave::*;

mod server;
pub use server::*;

mod transport;
pub use transport::*;

mod client;
pub use client::*;

#[derive(Debug, Error)]
pub enum CollaborationError {
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOp(String),

    #[error("edits blocked: {0}")]
    Blocked(String),

    #[error(transparent)]
    Version(#[from] VersionError),
}

impl From<serde_json::Error> for CollaborationError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CollaborationError>;

/// User identifier in collaborative session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session identifier; one session per edited document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
