/// Position remapping: carry anchors across a content mutation
use serde::{Deserialize, Serialize};

use crate::{CursorPosition, DiffResult, TextEdit, TextPosition, TextRange};

/// An anchor translated into the new content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemappedPosition {
    pub position: TextPosition,

    /// The anchor overlapped a change and was clamped to a stable boundary
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Start,
    End,
}

/// Translate `position` through `diff`
///
/// Returns `None` when every anchored character was removed. Anchors that
/// only sit after changes are shifted; anchors overlapping a change are
/// clamped and flagged `degraded`.
pub fn remap(position: &TextPosition, diff: &DiffResult) -> Option<RemappedPosition> {
    let edits: Vec<&TextEdit> = diff.edits().map(|(_, edit)| edit).collect();
    let (start, end) = (position.start, position.end);

    if start < end {
        if let Some(cover) = edits
            .iter()
            .find(|e| !e.is_insertion() && e.old_range.start <= start && e.old_range.end >= end)
        {
            if cover.is_deletion() {
                return None;
            }
            return Some(RemappedPosition {
                position: locate(diff, cover.new_range.start, cover.new_range.end),
                degraded: true,
            });
        }
    }

    let (new_start, start_clamped) = map_offset(start, &edits, Side::Start);
    let (new_end, end_clamped) = if start == end {
        (new_start, start_clamped)
    } else {
        map_offset(end, &edits, Side::End)
    };
    let new_end = new_end.max(new_start);

    let touched_inside = edits.iter().any(|e| {
        if e.is_insertion() {
            start < e.old_range.start && e.old_range.start < end
        } else {
            start <= e.old_range.start && e.old_range.end <= end
        }
    });

    if start < end && new_start == new_end {
        return None;
    }

    let degraded = start_clamped || end_clamped || touched_inside;
    if !degraded && new_start == start && new_end == end {
        return Some(RemappedPosition {
            position: *position,
            degraded: false,
        });
    }

    Some(RemappedPosition {
        position: locate(diff, new_start, new_end),
        degraded,
    })
}

/// Remap a chain of diffs in sequence; stops at the first invalidation
pub fn remap_through<'a>(
    position: &TextPosition,
    diffs: impl IntoIterator<Item = &'a DiffResult>,
) -> Option<RemappedPosition> {
    diffs.into_iter().try_fold(
        RemappedPosition {
            position: *position,
            degraded: false,
        },
        |acc, diff| {
            remap(&acc.position, diff).map(|next| RemappedPosition {
                position: next.position,
                degraded: acc.degraded || next.degraded,
            })
        },
    )
}

/// Move a caret through `diff`; carets never vanish, they clamp
pub fn remap_cursor(cursor: &CursorPosition, diff: &DiffResult) -> CursorPosition {
    let edits: Vec<&TextEdit> = diff.edits().map(|(_, edit)| edit).collect();
    let (offset, _) = map_offset(cursor.offset, &edits, Side::Start);
    if offset == cursor.offset && diff.is_identical() {
        return *cursor;
    }
    let (line, column) = diff.after_index().line_col(offset);
    CursorPosition {
        offset,
        line,
        column,
    }
}

/// Move a selection through `diff`; collapses to a caret if its text vanished
pub fn remap_range(range: &TextRange, diff: &DiffResult) -> TextRange {
    let edits: Vec<&TextEdit> = diff.edits().map(|(_, edit)| edit).collect();
    let (start, _) = map_offset(range.start, &edits, Side::Start);
    let (end, _) = if range.is_empty() {
        (start, false)
    } else {
        map_offset(range.end, &edits, Side::End)
    };
    TextRange::new(start, end.max(start))
}

/// Map a single old offset to the new content
///
/// An insertion exactly at the offset counts as before a start boundary
/// and after an end boundary, so anchors never absorb adjacent typing.
fn map_offset(offset: usize, edits: &[&TextEdit], side: Side) -> (usize, bool) {
    let mut delta: isize = 0;

    for edit in edits {
        let (os, oe) = (edit.old_range.start, edit.old_range.end);

        let before = if edit.is_insertion() {
            os < offset || (os == offset && side == Side::Start)
        } else {
            oe <= offset
        };
        if before {
            delta += edit.len_delta();
            continue;
        }

        if os >= offset {
            break;
        }

        // offset falls strictly inside a replaced region
        let clamped = match side {
            Side::Start => edit.new_range.end,
            Side::End => edit.new_range.start,
        };
        return (clamped, true);
    }

    ((offset as isize + delta).max(0) as usize, false)
}

fn locate(diff: &DiffResult, start: usize, end: usize) -> TextPosition {
    let (line, column) = diff.after_index().line_col(start);
    TextPosition {
        start,
        end,
        line,
        column,
    }
}
