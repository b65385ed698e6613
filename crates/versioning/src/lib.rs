/// Version history for collaboratively edited documents
/// Full-content snapshots arranged in a branchable DAG with three-way merge
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

mod entry;
pub use entry::*;

mod merge;
pub use merge::*;

mod store;
pub use store::*;

mod persistence;
pub use persistence::*;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("branch already exists: {0}")]
    DuplicateBranch(String),

    #[error("version {id} is protected: {reason}")]
    ProtectedVersion { id: VersionId, reason: String },

    #[error("branching is disabled")]
    BranchingDisabled,

    #[error("invalid operation: {0}")]
    InvalidOp(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// Coordinator-assigned version identifier, monotonic in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix('v').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(VersionId)
            .map_err(|_| VersionError::NotFound(s.to_string()))
    }
}
