/// Applying diff edits back onto content
use crate::{char_len, DiffResult, DocumentError, Result, TextEdit};

/// Apply every edit of `diff` to `before`, producing the diff's new content
pub fn apply_diff(before: &str, diff: &DiffResult) -> Result<String> {
    let edits: Vec<&TextEdit> = diff.edits().map(|(_, edit)| edit).collect();
    apply_edits(before, edits)
}

/// Apply non-overlapping edits (ordered by old position) to `content`
pub fn apply_edits<'a>(content: &str, edits: impl IntoIterator<Item = &'a TextEdit>) -> Result<String> {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;

    for edit in edits {
        let range = edit.old_range;
        if range.start < cursor || range.start > range.end {
            return Err(DocumentError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        if range.end > chars.len() {
            return Err(DocumentError::OffsetOutOfBounds {
                offset: range.end,
                len: chars.len(),
            });
        }
        out.extend(&chars[cursor..range.start]);
        out.push_str(&edit.new_text);
        cursor = range.end;
    }

    out.extend(&chars[cursor..]);
    Ok(out)
}

/// Replace the characters in `start..end` with `replacement`
pub fn splice(content: &str, start: usize, end: usize, replacement: &str) -> Result<String> {
    let len = char_len(content);
    if start > end {
        return Err(DocumentError::InvalidRange { start, end });
    }
    if end > len {
        return Err(DocumentError::OffsetOutOfBounds { offset: end, len });
    }
    let edit = TextEdit {
        old_range: crate::TextRange::new(start, end),
        new_range: crate::TextRange::new(start, start + char_len(replacement)),
        old_text: crate::char_slice(content, start, end).to_string(),
        new_text: replacement.to_string(),
    };
    apply_edits(content, [&edit])
}
