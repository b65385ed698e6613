/// Version records, branches, and derived change details
use chrono::{DateTime, Utc};
use document::{ChunkKind, DiffChunk, DiffResult, TextPosition};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::VersionId;

/// Confidence assigned to a detected move
pub const MOVE_CONFIDENCE: f32 = 0.9;

/// Immutable snapshot of document content, one node of the version DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub id: VersionId,

    /// Full content snapshot
    pub content: String,

    pub timestamp: DateTime<Utc>,

    /// Author reference (user id)
    pub author: String,

    pub title: String,
    pub description: Option<String>,

    /// Diff against the parent, cached at creation
    pub changes: Vec<ChangeDetail>,

    pub branch: String,
    pub parent_version_id: Option<VersionId>,

    /// Second parent of a merge version
    #[serde(default)]
    pub merged_from: Option<VersionId>,

    pub is_auto_save: bool,
    pub is_milestone: bool,
    pub tags: BTreeSet<String>,

    /// SHA-256 of `content`, hex encoded
    pub checksum: String,
}

impl VersionEntry {
    /// Recompute the checksum and compare with the stored one
    pub fn verify(&self) -> bool {
        checksum(&self.content) == self.checksum
    }

    /// Parents in DAG order (primary first)
    pub fn parents(&self) -> impl Iterator<Item = VersionId> {
        self.parent_version_id.into_iter().chain(self.merged_from)
    }
}

/// Named pointer to a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub head_version_id: VersionId,

    /// Version the branch was forked from; `None` for a root branch
    pub created_from: Option<VersionId>,

    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Options for creating a version
#[derive(Debug, Clone, Default)]
pub struct VersionOptions {
    pub title: String,
    pub description: Option<String>,
    pub author: String,

    /// Target branch; defaults to the current branch
    pub branch: Option<String>,

    pub is_auto_save: bool,
    pub is_milestone: bool,
}

impl VersionOptions {
    pub fn new(author: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn auto_save(mut self) -> Self {
        self.is_auto_save = true;
        self
    }

    pub fn milestone(mut self) -> Self {
        self.is_milestone = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Addition,
    Deletion,
    Modification,
    Move,
}

/// One change of a version relative to its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDetail {
    #[serde(rename = "type")]
    pub change_type: ChangeType,

    /// Location in the new content (old content for deletions)
    pub position: TextPosition,

    pub old_text: Option<String>,
    pub new_text: Option<String>,
    pub confidence: f32,

    /// Estimated effect on the document's score
    pub impact: f32,
}

/// SHA-256 hex digest of content
pub fn checksum(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Derive change details from a diff, pairing identical deleted/added
/// blocks into moves
pub fn derive_changes(diff: &DiffResult) -> Vec<ChangeDetail> {
    let changed: Vec<&DiffChunk> = diff.changes().collect();
    let mut consumed = vec![false; changed.len()];
    let mut details = Vec::new();

    for (i, chunk) in changed.iter().enumerate() {
        if consumed[i] {
            continue;
        }

        if matches!(chunk.kind, ChunkKind::Deletion | ChunkKind::Addition) {
            let wanted = match chunk.kind {
                ChunkKind::Deletion => ChunkKind::Addition,
                _ => ChunkKind::Deletion,
            };
            let key = moved_text(chunk);
            let partner = (i + 1..changed.len()).find(|&j| {
                !consumed[j] && changed[j].kind == wanted && !key.is_empty() && moved_text(changed[j]) == key
            });

            if let Some(j) = partner {
                consumed[j] = true;
                let added = if chunk.kind == ChunkKind::Addition { chunk } else { changed[j] };
                details.push(ChangeDetail {
                    change_type: ChangeType::Move,
                    position: new_side_position(added),
                    old_text: Some(added.new_text.clone()),
                    new_text: Some(added.new_text.clone()),
                    confidence: MOVE_CONFIDENCE,
                    impact: 0.0,
                });
                continue;
            }
        }

        details.push(detail_for(chunk));
    }

    details
}

fn moved_text(chunk: &DiffChunk) -> &str {
    match chunk.kind {
        ChunkKind::Deletion => chunk.old_text.trim(),
        _ => chunk.new_text.trim(),
    }
}

fn detail_for(chunk: &DiffChunk) -> ChangeDetail {
    let (change_type, position) = match chunk.kind {
        ChunkKind::Addition => (ChangeType::Addition, new_side_position(chunk)),
        ChunkKind::Deletion => (
            ChangeType::Deletion,
            TextPosition {
                start: chunk.old_range.start,
                end: chunk.old_range.end,
                line: chunk.old_lines.start,
                column: 0,
            },
        ),
        _ => (ChangeType::Modification, new_side_position(chunk)),
    };

    let non_empty = |text: &str| (!text.is_empty()).then(|| text.to_string());
    let (removed, added): (Vec<&str>, Vec<&str>) = chunk
        .edits
        .iter()
        .map(|e| (e.old_text.as_str(), e.new_text.as_str()))
        .unzip();

    ChangeDetail {
        change_type,
        position,
        old_text: non_empty(&chunk.old_text),
        new_text: non_empty(&chunk.new_text),
        confidence: chunk.confidence,
        impact: impact_score(&removed.concat(), &added.concat()),
    }
}

fn new_side_position(chunk: &DiffChunk) -> TextPosition {
    TextPosition {
        start: chunk.new_range.start,
        end: chunk.new_range.end,
        line: chunk.new_lines.start,
        column: 0,
    }
}

/// Resume-oriented impact estimate: words count a little, quantified
/// tokens (anything with a digit) count more
pub fn impact_score(removed: &str, added: &str) -> f32 {
    let words = |text: &str| text.split_whitespace().count() as f32;
    let quantified = |text: &str| {
        text.split_whitespace()
            .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
            .count() as f32
    };

    0.1 * (words(added) - words(removed)) + 0.5 * (quantified(added) - quantified(removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::diff;

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum("abc"), checksum("abc"));
        assert_ne!(checksum("abc"), checksum("abd"));
        assert_eq!(checksum("").len(), 64);
    }

    #[test]
    fn test_derive_modification() {
        let changes = derive_changes(&diff("Led team\n", "Led a team of 5\n"));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Modification);
        assert_eq!(changes[0].new_text.as_deref(), Some("Led a team of 5\n"));
        assert!(changes[0].impact > 0.5);
    }

    #[test]
    fn test_derive_move() {
        let before = "Skills\nRust\nExperience\nAcme Corp\n";
        let after = "Experience\nAcme Corp\nSkills\nRust\n";
        let changes = derive_changes(&diff(before, after));
        assert!(changes.iter().any(|c| c.change_type == ChangeType::Move));
        assert!(changes
            .iter()
            .all(|c| c.change_type != ChangeType::Addition && c.change_type != ChangeType::Deletion));
    }

    #[test]
    fn test_deletion_uses_old_position() {
        let changes = derive_changes(&diff("a\nb\nc\n", "a\nc\n"));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Deletion);
        assert_eq!(changes[0].position.line, 1);
        assert_eq!(changes[0].position.start, 2);
        assert_eq!(changes[0].old_text.as_deref(), Some("b\n"));
        assert!(changes[0].impact < 0.0);
    }

    #[test]
    fn test_impact_score() {
        assert!((impact_score("", "Grew revenue 40%") - 0.8).abs() < 1e-6);
        assert!((impact_score("Led team", "") + 0.2).abs() < 1e-6);
    }
}
