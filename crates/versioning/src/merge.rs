/// Line-level three-way merge
use document::{diff, split_lines, TextRange};
use serde::{Deserialize, Serialize};

use crate::VersionId;

/// Region both sides changed differently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    /// Line range in the common ancestor
    pub base_lines: TextRange,
    pub base_text: String,

    /// Candidate from the branch being merged into
    pub target_text: String,

    /// Candidate from the branch being merged
    pub source_text: String,
}

/// Outcome of merging two branches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Merged content; `None` whenever `conflicts` is non-empty
    pub merged: Option<String>,
    pub conflicts: Vec<ConflictRegion>,

    /// Version recorded on the target for a clean merge
    pub merge_version_id: Option<VersionId>,

    /// Common ancestor used as merge base
    pub base_version_id: Option<VersionId>,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Target,
    Source,
}

#[derive(Debug)]
struct Hunk {
    side: Side,
    base: TextRange,
    replacement: String,
}

/// Merge `target` and `source`, both descended from `base`
///
/// Regions changed by one side only take that side; regions changed by both
/// take the common text when identical and become conflicts otherwise.
pub fn three_way_merge(base: &str, target: &str, source: &str) -> (Option<String>, Vec<ConflictRegion>) {
    let base_lines = split_lines(base);
    let mut hunks = hunks_for(base, target, Side::Target);
    hunks.extend(hunks_for(base, source, Side::Source));
    hunks.sort_by_key(|h| (h.base.start, h.base.end, h.side == Side::Source));

    let mut merged = String::with_capacity(base.len().max(target.len()));
    let mut conflicts = Vec::new();
    let mut cursor = 0;
    let mut i = 0;

    while i < hunks.len() {
        let mut group = hunks[i].base;
        let mut j = i + 1;
        while j < hunks.len() && overlaps(group, hunks[j].base) {
            group.end = group.end.max(hunks[j].base.end);
            j += 1;
        }

        merged.push_str(&base_lines[cursor..group.start].concat());

        let members = &hunks[i..j];
        let target_side: Vec<&Hunk> = members.iter().filter(|h| h.side == Side::Target).collect();
        let source_side: Vec<&Hunk> = members.iter().filter(|h| h.side == Side::Source).collect();

        if source_side.is_empty() {
            merged.push_str(&render(&base_lines, group, &target_side));
        } else if target_side.is_empty() {
            merged.push_str(&render(&base_lines, group, &source_side));
        } else {
            let target_text = render(&base_lines, group, &target_side);
            let source_text = render(&base_lines, group, &source_side);
            if target_text == source_text {
                merged.push_str(&target_text);
            } else {
                conflicts.push(ConflictRegion {
                    base_lines: group,
                    base_text: base_lines[group.start..group.end].concat(),
                    target_text,
                    source_text,
                });
            }
        }

        cursor = group.end;
        i = j;
    }

    merged.push_str(&base_lines[cursor..].concat());

    if conflicts.is_empty() {
        (Some(merged), conflicts)
    } else {
        (None, conflicts)
    }
}

fn hunks_for(base: &str, side_content: &str, side: Side) -> Vec<Hunk> {
    let side_lines = split_lines(side_content);
    diff(base, side_content)
        .changes()
        .map(|chunk| Hunk {
            side,
            base: chunk.old_lines,
            replacement: side_lines[chunk.new_lines.start..chunk.new_lines.end].concat(),
        })
        .collect()
}

/// Whether line range `h` touches the group `g`; insertions only collide
/// with insertions at the same line or with ranges strictly around them
fn overlaps(g: TextRange, h: TextRange) -> bool {
    match (g.is_empty(), h.is_empty()) {
        (true, true) => g.start == h.start,
        (true, false) => h.start < g.start && g.start < h.end,
        (false, true) => g.start < h.start && h.start < g.end,
        (false, false) => h.start < g.end && g.start < h.end,
    }
}

fn render(base_lines: &[&str], group: TextRange, hunks: &[&Hunk]) -> String {
    let mut text = String::new();
    let mut pos = group.start;
    for hunk in hunks {
        text.push_str(&base_lines[pos..hunk.base.start].concat());
        text.push_str(&hunk.replacement);
        pos = hunk.base.end;
    }
    text.push_str(&base_lines[pos..group.end].concat());
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "Summary: backend engineer\nExperience\nAcme Corp\nSkills: Rust\n";

    #[test]
    fn test_disjoint_edits_merge_cleanly() {
        let target = "Summary: senior backend engineer\nExperience\nAcme Corp\nSkills: Rust\n";
        let source = "Summary: backend engineer\nExperience\nAcme Corp\nSkills: Rust, Go\n";
        let (merged, conflicts) = three_way_merge(BASE, target, source);
        assert!(conflicts.is_empty());
        assert_eq!(
            merged.unwrap(),
            "Summary: senior backend engineer\nExperience\nAcme Corp\nSkills: Rust, Go\n"
        );
    }

    #[test]
    fn test_same_region_conflicts() {
        let target = "Summary: staff engineer\nExperience\nAcme Corp\nSkills: Rust\n";
        let source = "Summary: systems engineer\nExperience\nAcme Corp\nSkills: Rust\n";
        let (merged, conflicts) = three_way_merge(BASE, target, source);
        assert!(merged.is_none());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].base_lines, TextRange::new(0, 1));
        assert_eq!(conflicts[0].target_text, "Summary: staff engineer\n");
        assert_eq!(conflicts[0].source_text, "Summary: systems engineer\n");
    }

    #[test]
    fn test_identical_changes_do_not_conflict() {
        let edited = "Summary: backend engineer\nExperience\nGlobex\nSkills: Rust\n";
        let (merged, conflicts) = three_way_merge(BASE, edited, edited);
        assert!(conflicts.is_empty());
        assert_eq!(merged.unwrap(), edited);
    }

    #[test]
    fn test_insertions_at_same_point_conflict() {
        let target = format!("{BASE}Awards: A\n");
        let source = format!("{BASE}Awards: B\n");
        let (merged, conflicts) = three_way_merge(BASE, &target, &source);
        assert!(merged.is_none());
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].base_text.is_empty());
    }

    #[test]
    fn test_one_sided_change() {
        let source = "Summary: backend engineer\nAcme Corp\nSkills: Rust\n";
        let (merged, conflicts) = three_way_merge(BASE, BASE, source);
        assert!(conflicts.is_empty());
        assert_eq!(merged.unwrap(), source);
    }
}
