/// Text model shared by the version store and the collaboration channel
/// Offsets are character (Unicode scalar) offsets; lines and columns are 0-based
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod diff;
pub use diff::*;

mod patch;
pub use patch::*;

mod remap;
pub use remap::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("offset {offset} out of bounds (length {len})")]
    OffsetOutOfBounds { offset: usize, len: usize },

    #[error("invalid range: {start}..{end}")]
    InvalidRange { start: usize, end: usize },
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// Anchor into document content: a half-open character range plus the
/// line/column of its start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextPosition {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl TextPosition {
    /// Build a position for `start..end`, deriving line/column from `content`
    pub fn in_content(content: &str, start: usize, end: usize) -> Result<Self> {
        if start > end {
            return Err(DocumentError::InvalidRange { start, end });
        }
        let index = LineIndex::new(content);
        if end > index.len() {
            return Err(DocumentError::OffsetOutOfBounds {
                offset: end,
                len: index.len(),
            });
        }
        let (line, column) = index.line_col(start);
        Ok(Self {
            start,
            end,
            line,
            column,
        })
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &TextPosition) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn range(&self) -> TextRange {
        TextRange::new(self.start, self.end)
    }
}

/// Plain character range, used for selections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Caret location in the live buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorPosition {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl CursorPosition {
    pub fn in_content(content: &str, offset: usize) -> Self {
        let index = LineIndex::new(content);
        let offset = offset.min(index.len());
        let (line, column) = index.line_col(offset);
        Self {
            offset,
            line,
            column,
        }
    }
}

/// Character offsets of every line start in a piece of content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(content: &str) -> Self {
        let mut starts = vec![0];
        let mut len = 0;
        for ch in content.chars() {
            len += 1;
            if ch == '\n' {
                starts.push(len);
            }
        }
        Self { starts, len }
    }

    /// Total length in characters
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// 0-based (line, column) of a character offset, clamped to the content
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.len);
        let line = match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        (line, offset - self.starts[line])
    }

    /// Character offset where a 0-based line begins
    pub fn line_start(&self, line: usize) -> usize {
        self.starts.get(line).copied().unwrap_or(self.len)
    }
}

/// Number of characters in a string
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Substring by character offsets, clamped to the content
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let byte_at = |offset: usize| {
        text.char_indices()
            .nth(offset)
            .map(|(b, _)| b)
            .unwrap_or(text.len())
    };
    let start_byte = byte_at(start);
    let end_byte = byte_at(end.max(start));
    &text[start_byte..end_byte]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index() {
        let index = LineIndex::new("ab\ncd\n\ne");
        assert_eq!(index.len(), 9);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_col(0), (0, 0));
        assert_eq!(index.line_col(2), (0, 2));
        assert_eq!(index.line_col(3), (1, 0));
        assert_eq!(index.line_col(7), (3, 0));
        assert_eq!(index.line_col(100), (3, 1));
    }

    #[test]
    fn test_position_in_content() {
        let pos = TextPosition::in_content("Summary\nLed team", 12, 16).unwrap();
        assert_eq!(pos.line, 1);
        assert_eq!(pos.column, 4);

        assert_eq!(
            TextPosition::in_content("abc", 2, 1),
            Err(DocumentError::InvalidRange { start: 2, end: 1 })
        );
        assert_eq!(
            TextPosition::in_content("abc", 0, 9),
            Err(DocumentError::OffsetOutOfBounds { offset: 9, len: 3 })
        );
    }

    #[test]
    fn test_char_slice_multibyte() {
        let text = "Café — résumé";
        assert_eq!(char_slice(text, 0, 4), "Café");
        assert_eq!(char_slice(text, 7, 13), "résumé");
        assert_eq!(char_slice(text, 10, 99), "umé");
    }
}
