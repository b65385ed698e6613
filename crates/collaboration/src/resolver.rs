/// Suggestion conflict resolution: keep annotations anchored as content moves
use chrono::{DateTime, Utc};
use document::{char_len, remap, splice, DiffResult, TextPosition};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{CollaborationError, Result, UserId};

/// Where an anchor stands after a content change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStatus {
    Valid,
    Degraded,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub status: AnchorStatus,

    /// New anchor; absent when stale
    pub position: Option<TextPosition>,
}

/// Classify an anchor against a diff
pub fn resolve(position: &TextPosition, diff: &DiffResult) -> Resolution {
    match remap(position, diff) {
        None => Resolution {
            status: AnchorStatus::Stale,
            position: None,
        },
        Some(remapped) if remapped.degraded => Resolution {
            status: AnchorStatus::Degraded,
            position: Some(remapped.position),
        },
        Some(remapped) => Resolution {
            status: AnchorStatus::Valid,
            position: Some(remapped.position),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationId(pub uuid::Uuid);

impl AnnotationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    Open,
    Applied,
    Rejected,

    /// Hidden after its anchor went stale
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnnotationBody {
    Suggestion {
        replacement: String,
        reason: Option<String>,
        can_auto_apply: bool,
    },
    Comment {
        text: String,
    },
}

/// A suggestion or comment anchored into the live content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub author: UserId,
    pub position: TextPosition,
    pub anchor: AnchorStatus,
    pub status: AnnotationStatus,
    pub created_at: DateTime<Utc>,
    pub body: AnnotationBody,
}

impl Annotation {
    pub fn suggestion(
        author: UserId,
        position: TextPosition,
        replacement: impl Into<String>,
        can_auto_apply: bool,
    ) -> Self {
        Self::new(
            author,
            position,
            AnnotationBody::Suggestion {
                replacement: replacement.into(),
                reason: None,
                can_auto_apply,
            },
        )
    }

    pub fn comment(author: UserId, position: TextPosition, text: impl Into<String>) -> Self {
        Self::new(author, position, AnnotationBody::Comment { text: text.into() })
    }

    fn new(author: UserId, position: TextPosition, body: AnnotationBody) -> Self {
        Self {
            id: AnnotationId::new(),
            author,
            position,
            anchor: AnchorStatus::Valid,
            status: AnnotationStatus::Open,
            created_at: Utc::now(),
            body,
        }
    }

    pub fn is_suggestion(&self) -> bool {
        matches!(self.body, AnnotationBody::Suggestion { .. })
    }

    pub fn is_open(&self) -> bool {
        self.status == AnnotationStatus::Open
    }
}

/// User-visible note about an annotation whose anchor moved badly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorNotice {
    pub annotation_id: AnnotationId,
    pub status: AnchorStatus,
    pub message: String,
}

/// Open annotations of one document
#[derive(Debug, Clone, Default)]
pub struct AnnotationSet {
    items: Vec<Annotation>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an annotation anchored into `content`
    pub fn add(&mut self, mut annotation: Annotation, content: &str) -> Result<AnnotationId> {
        let pos = annotation.position;
        if pos.start > pos.end || pos.end > char_len(content) {
            return Err(CollaborationError::InvalidOp(format!(
                "anchor {}..{} outside content",
                pos.start, pos.end
            )));
        }
        if self.get(annotation.id).is_some() {
            return Err(CollaborationError::InvalidOp(format!(
                "duplicate annotation {}",
                annotation.id.0
            )));
        }

        annotation.position = TextPosition::in_content(content, pos.start, pos.end)
            .map_err(|e| CollaborationError::InvalidOp(e.to_string()))?;
        annotation.anchor = AnchorStatus::Valid;
        annotation.status = AnnotationStatus::Open;

        let id = annotation.id;
        self.items.push(annotation);
        Ok(id)
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.items.iter().find(|a| a.id == id)
    }

    fn get_mut(&mut self, id: AnnotationId) -> Result<&mut Annotation> {
        self.items
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| CollaborationError::InvalidOp(format!("unknown annotation {}", id.0)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.items.iter()
    }

    /// Annotations still shown to users
    pub fn visible(&self) -> impl Iterator<Item = &Annotation> {
        self.items.iter().filter(|a| a.is_open())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Re-anchor every open annotation through `diff`
    ///
    /// Stale annotations are dismissed. A degraded anchor stays degraded
    /// until `confirm` is called, even if later edits map it cleanly.
    pub fn reanchor(&mut self, diff: &DiffResult) -> Vec<AnchorNotice> {
        if diff.is_identical() {
            return Vec::new();
        }

        let mut notices = Vec::new();
        for annotation in self.items.iter_mut().filter(|a| a.is_open()) {
            let resolution = resolve(&annotation.position, diff);
            match resolution.status {
                AnchorStatus::Stale => {
                    warn!("Annotation {} went stale", annotation.id.0);
                    annotation.anchor = AnchorStatus::Stale;
                    annotation.status = AnnotationStatus::Dismissed;
                    notices.push(AnchorNotice {
                        annotation_id: annotation.id,
                        status: AnchorStatus::Stale,
                        message: "The text this note referred to was removed.".to_string(),
                    });
                }
                AnchorStatus::Degraded => {
                    if annotation.anchor != AnchorStatus::Degraded {
                        notices.push(AnchorNotice {
                            annotation_id: annotation.id,
                            status: AnchorStatus::Degraded,
                            message: "The text this note referred to changed; please review it."
                                .to_string(),
                        });
                    }
                    annotation.anchor = AnchorStatus::Degraded;
                }
                AnchorStatus::Valid => {
                    debug!("Annotation {} shifted", annotation.id.0);
                }
            }
            if let Some(position) = resolution.position {
                annotation.position = position;
            }
        }
        notices
    }

    /// Manually accept a degraded anchor
    pub fn confirm(&mut self, id: AnnotationId) -> Result<()> {
        let annotation = self.get_mut(id)?;
        if annotation.anchor == AnchorStatus::Stale {
            return Err(CollaborationError::InvalidOp("stale anchors cannot be confirmed".into()));
        }
        annotation.anchor = AnchorStatus::Valid;
        Ok(())
    }

    pub fn reject(&mut self, id: AnnotationId) -> Result<()> {
        let annotation = self.get_mut(id)?;
        if !annotation.is_open() {
            return Err(CollaborationError::InvalidOp(format!(
                "annotation is already {:?}",
                annotation.status
            )));
        }
        annotation.status = AnnotationStatus::Rejected;
        Ok(())
    }

    /// Apply an auto-applicable suggestion to `content`
    ///
    /// Refused unless the suggestion is open and its anchor is valid.
    pub fn auto_apply(&mut self, id: AnnotationId, content: &str) -> Result<String> {
        let annotation = self.get_mut(id)?;
        let AnnotationBody::Suggestion {
            replacement,
            can_auto_apply,
            ..
        } = &annotation.body
        else {
            return Err(CollaborationError::InvalidOp("comments cannot be applied".into()));
        };

        if !can_auto_apply {
            return Err(CollaborationError::InvalidOp(
                "suggestion requires manual review".into(),
            ));
        }
        if !annotation.is_open() || annotation.anchor != AnchorStatus::Valid {
            return Err(CollaborationError::InvalidOp(format!(
                "suggestion anchor is {:?}",
                annotation.anchor
            )));
        }

        let pos = annotation.position;
        let updated = splice(content, pos.start, pos.end, replacement)
            .map_err(|e| CollaborationError::InvalidOp(e.to_string()))?;
        annotation.status = AnnotationStatus::Applied;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::diff;

    #[test]
    fn test_resolve_statuses() {
        let before = "Led team";
        let anchor = TextPosition::in_content(before, 4, 8).unwrap();

        let shifted = resolve(&anchor, &diff(before, "Led a cross-functional team"));
        assert_eq!(shifted.status, AnchorStatus::Valid);
        assert_eq!(shifted.position.unwrap().start, 23);

        let gone = resolve(&anchor, &diff(before, "Led"));
        assert_eq!(gone.status, AnchorStatus::Stale);
        assert!(gone.position.is_none());

        let replaced = resolve(&anchor, &diff(before, "Led squad"));
        assert_eq!(replaced.status, AnchorStatus::Degraded);
    }

    #[test]
    fn test_stale_annotation_is_dismissed() {
        let before = "Experience\nBuilt the payments platform from scratch.\nEducation\n";
        let after = "Experience\nEducation\n";
        let mut set = AnnotationSet::new();
        let id = set
            .add(
                Annotation::comment(UserId::new(), TextPosition::in_content(before, 21, 29).unwrap(), "Quantify"),
                before,
            )
            .unwrap();

        let notices = set.reanchor(&diff(before, after));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].status, AnchorStatus::Stale);
        assert_eq!(set.get(id).unwrap().status, AnnotationStatus::Dismissed);
        assert_eq!(set.visible().count(), 0);
    }

    #[test]
    fn test_auto_apply_only_when_valid() {
        let before = "Led team of five";
        let after = "Led a big team of five";
        let mut set = AnnotationSet::new();
        let id = set
            .add(
                Annotation::suggestion(UserId::new(), TextPosition::in_content(before, 12, 16).unwrap(), "5", true),
                before,
            )
            .unwrap();

        set.reanchor(&diff(before, after));
        assert_eq!(set.get(id).unwrap().anchor, AnchorStatus::Valid);
        assert_eq!(set.auto_apply(id, after).unwrap(), "Led a big team of 5");
        assert_eq!(set.get(id).unwrap().status, AnnotationStatus::Applied);
    }

    #[test]
    fn test_degraded_blocks_auto_apply_until_confirmed() {
        let before = "Led team of five";
        let after = "Led team of five or six";
        let mut set = AnnotationSet::new();
        let id = set
            .add(
                Annotation::suggestion(UserId::new(), TextPosition::in_content(before, 9, 16).unwrap(), "of 5", true),
                before,
            )
            .unwrap();

        let notices = set.reanchor(&diff(before, "Led team of many"));
        assert_eq!(notices.len(), 1);
        assert_eq!(set.get(id).unwrap().anchor, AnchorStatus::Degraded);
        assert!(set.auto_apply(id, after).is_err());

        set.confirm(id).unwrap();
        assert_eq!(set.get(id).unwrap().anchor, AnchorStatus::Valid);
    }

    #[test]
    fn test_add_rejects_out_of_bounds() {
        let mut set = AnnotationSet::new();
        let annotation = Annotation::comment(
            UserId::new(),
            TextPosition {
                start: 2,
                end: 40,
                line: 0,
                column: 2,
            },
            "x",
        );
        assert!(set.add(annotation, "short").is_err());
    }
}
