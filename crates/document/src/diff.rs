/// Line-based Myers diff with word-level refinement of modified blocks
use serde::{Deserialize, Serialize};

use crate::{char_len, LineIndex, TextRange};

/// Confidence of chunks that fall straight out of the line-level LCS
pub const EXACT_CONFIDENCE: f32 = 1.0;

/// Confidence of modification chunks split by the word-level pass
pub const REFINED_CONFIDENCE: f32 = 0.85;

/// Classification of a diff chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Addition,
    Deletion,
    Modification,
    Unchanged,
}

/// A single replacement of `old_range` (in the old content) by `new_text`
/// (occupying `new_range` in the new content)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub old_range: TextRange,
    pub new_range: TextRange,
    pub old_text: String,
    pub new_text: String,
}

impl TextEdit {
    pub fn is_insertion(&self) -> bool {
        self.old_range.is_empty()
    }

    pub fn is_deletion(&self) -> bool {
        self.new_range.is_empty()
    }

    /// Change in document length caused by this edit
    pub fn len_delta(&self) -> isize {
        self.new_range.len() as isize - self.old_range.len() as isize
    }
}

/// Contiguous region of the two contents, classified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffChunk {
    pub kind: ChunkKind,

    /// Character range in the old content
    pub old_range: TextRange,

    /// Character range in the new content
    pub new_range: TextRange,

    /// Line range in the old content
    pub old_lines: TextRange,

    /// Line range in the new content
    pub new_lines: TextRange,

    pub old_text: String,
    pub new_text: String,

    /// Certainty of the classification, 0..1
    pub confidence: f32,

    /// Precise edits inside this chunk; empty for unchanged chunks
    pub edits: Vec<TextEdit>,
}

/// Aggregate counts over a diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub lines_added: usize,
    pub lines_deleted: usize,
    pub lines_modified: usize,
    pub lines_unchanged: usize,
    pub words_added: usize,
    pub words_deleted: usize,
    pub chars_added: usize,
    pub chars_deleted: usize,
}

impl DiffSummary {
    pub fn has_changes(&self) -> bool {
        self.lines_added + self.lines_deleted + self.lines_modified > 0
    }
}

/// Result of comparing two contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    /// All chunks in document order, covering both contents
    pub chunks: Vec<DiffChunk>,
    pub summary: DiffSummary,
    after_index: LineIndex,
}

impl DiffResult {
    pub fn additions(&self) -> impl Iterator<Item = &DiffChunk> {
        self.of_kind(ChunkKind::Addition)
    }

    pub fn deletions(&self) -> impl Iterator<Item = &DiffChunk> {
        self.of_kind(ChunkKind::Deletion)
    }

    pub fn modifications(&self) -> impl Iterator<Item = &DiffChunk> {
        self.of_kind(ChunkKind::Modification)
    }

    pub fn unchanged(&self) -> impl Iterator<Item = &DiffChunk> {
        self.of_kind(ChunkKind::Unchanged)
    }

    /// Changed chunks only, in document order
    pub fn changes(&self) -> impl Iterator<Item = &DiffChunk> {
        self.chunks
            .iter()
            .filter(|c| c.kind != ChunkKind::Unchanged)
    }

    /// Every primitive edit, ordered by position in the old content
    pub fn edits(&self) -> impl Iterator<Item = (&DiffChunk, &TextEdit)> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.edits.iter().map(move |edit| (chunk, edit)))
    }

    pub fn is_identical(&self) -> bool {
        self.chunks.iter().all(|c| c.kind == ChunkKind::Unchanged)
    }

    /// Line index of the new content, for line/column recomputation
    pub fn after_index(&self) -> &LineIndex {
        &self.after_index
    }

    fn of_kind(&self, kind: ChunkKind) -> impl Iterator<Item = &DiffChunk> {
        self.chunks.iter().filter(move |c| c.kind == kind)
    }
}

/// Compute the structural difference between two contents
///
/// Lines are compared first; a run of deleted lines directly replaced by
/// inserted lines becomes a `Modification` whose edits come from a second
/// word-level pass. Empty inputs are valid.
pub fn diff(before: &str, after: &str) -> DiffResult {
    let old_lines = split_lines(before);
    let new_lines = split_lines(after);
    let ops = diff_ops(&old_lines, &new_lines);

    let old_offsets = prefix_offsets(&old_lines);
    let new_offsets = prefix_offsets(&new_lines);

    let mut chunks = Vec::new();
    let mut summary = DiffSummary::default();
    let (mut i, mut j) = (0usize, 0usize);
    let mut k = 0;

    while k < ops.len() {
        let (i0, j0) = (i, j);
        if ops[k] == Op::Equal {
            while k < ops.len() && ops[k] == Op::Equal {
                i += 1;
                j += 1;
                k += 1;
            }
        } else {
            while k < ops.len() && ops[k] != Op::Equal {
                if ops[k] == Op::Delete {
                    i += 1;
                } else {
                    j += 1;
                }
                k += 1;
            }
        }

        let old_range = TextRange::new(old_offsets[i0], old_offsets[i]);
        let new_range = TextRange::new(new_offsets[j0], new_offsets[j]);
        let old_text = old_lines[i0..i].concat();
        let new_text = new_lines[j0..j].concat();
        let (deleted, inserted) = (i - i0, j - j0);

        let (kind, confidence, edits) = if deleted == inserted && old_text == new_text {
            summary.lines_unchanged += deleted;
            (ChunkKind::Unchanged, EXACT_CONFIDENCE, Vec::new())
        } else if deleted == 0 {
            summary.lines_added += inserted;
            let edit = TextEdit {
                old_range: TextRange::new(old_range.start, old_range.start),
                new_range,
                old_text: String::new(),
                new_text: new_text.clone(),
            };
            (ChunkKind::Addition, EXACT_CONFIDENCE, vec![edit])
        } else if inserted == 0 {
            summary.lines_deleted += deleted;
            let edit = TextEdit {
                old_range,
                new_range: TextRange::new(new_range.start, new_range.start),
                old_text: old_text.clone(),
                new_text: String::new(),
            };
            (ChunkKind::Deletion, EXACT_CONFIDENCE, vec![edit])
        } else {
            let common = deleted.min(inserted);
            summary.lines_modified += common;
            summary.lines_deleted += deleted - common;
            summary.lines_added += inserted - common;
            let edits = refine_words(&old_text, &new_text, old_range.start, new_range.start);
            (ChunkKind::Modification, REFINED_CONFIDENCE, edits)
        };

        for edit in &edits {
            summary.words_added += count_words(&edit.new_text);
            summary.words_deleted += count_words(&edit.old_text);
            summary.chars_added += edit.new_range.len();
            summary.chars_deleted += edit.old_range.len();
        }

        chunks.push(DiffChunk {
            kind,
            old_range,
            new_range,
            old_lines: TextRange::new(i0, i),
            new_lines: TextRange::new(j0, j),
            old_text,
            new_text,
            confidence,
            edits,
        });
    }

    DiffResult {
        chunks,
        summary,
        after_index: LineIndex::new(after),
    }
}

/// Split content into lines, each keeping its terminator
pub fn split_lines(content: &str) -> Vec<&str> {
    content.split_inclusive('\n').collect()
}

/// Split text into word, whitespace, and punctuation tokens whose
/// concatenation is the original text
pub fn tokenize_words(text: &str) -> Vec<&str> {
    #[derive(PartialEq, Clone, Copy)]
    enum Class {
        Word,
        Space,
        Newline,
        Other,
    }

    fn class_of(ch: char) -> Class {
        if ch == '\n' {
            Class::Newline
        } else if ch.is_whitespace() {
            Class::Space
        } else if ch.is_alphanumeric() || ch == '_' || ch == '\'' {
            Class::Word
        } else {
            Class::Other
        }
    }

    let mut tokens = Vec::new();
    let mut start = 0;
    let mut current: Option<Class> = None;

    for (idx, ch) in text.char_indices() {
        let class = class_of(ch);
        let extends = matches!(current, Some(c) if c == class && matches!(c, Class::Word | Class::Space));
        if !extends {
            if current.is_some() {
                tokens.push(&text[start..idx]);
            }
            start = idx;
            current = Some(class);
        }
    }
    if current.is_some() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Number of word tokens in a piece of text
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

fn prefix_offsets(lines: &[&str]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(lines.len() + 1);
    let mut total = 0;
    offsets.push(0);
    for line in lines {
        total += char_len(line);
        offsets.push(total);
    }
    offsets
}

/// Word-level edits for a modified block, in absolute offsets
fn refine_words(old_text: &str, new_text: &str, old_base: usize, new_base: usize) -> Vec<TextEdit> {
    let old_tokens = tokenize_words(old_text);
    let new_tokens = tokenize_words(new_text);
    let ops = diff_ops(&old_tokens, &new_tokens);

    let mut edits = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    let (mut old_off, mut new_off) = (old_base, new_base);
    let mut k = 0;

    while k < ops.len() {
        if ops[k] == Op::Equal {
            let len = char_len(old_tokens[i]);
            old_off += len;
            new_off += len;
            i += 1;
            j += 1;
            k += 1;
            continue;
        }

        let (i0, j0) = (i, j);
        let (old_start, new_start) = (old_off, new_off);
        while k < ops.len() && ops[k] != Op::Equal {
            match ops[k] {
                Op::Delete => {
                    old_off += char_len(old_tokens[i]);
                    i += 1;
                }
                Op::Insert | Op::Equal => {
                    new_off += char_len(new_tokens[j]);
                    j += 1;
                }
            }
            k += 1;
        }

        edits.push(TextEdit {
            old_range: TextRange::new(old_start, old_off),
            new_range: TextRange::new(new_start, new_off),
            old_text: old_tokens[i0..i].concat(),
            new_text: new_tokens[j0..j].concat(),
        });
    }

    edits
}

/// Edit script element; indices are implied by walking the script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Equal,
    Delete,
    Insert,
}

/// Shortest edit script between two sequences, with common prefix/suffix
/// trimmed first and equal-cost scripts compacted toward fewer, longer
/// unchanged runs
pub(crate) fn diff_ops<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Op> {
    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];

    let mut ops = Vec::with_capacity(a.len().max(b.len()));
    ops.extend(std::iter::repeat(Op::Equal).take(prefix));
    ops.extend(myers(mid_a, mid_b));
    ops.extend(std::iter::repeat(Op::Equal).take(suffix));

    compact(&mut ops, a, b);
    ops
}

/// Myers' O((N+M)·D) greedy algorithm with trace backtracking
fn myers<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Op> {
    let n = a.len() as isize;
    let m = b.len() as isize;

    if n == 0 {
        return vec![Op::Insert; b.len()];
    }
    if m == 0 {
        return vec![Op::Delete; a.len()];
    }

    let max = n + m;
    let offset = max + 1;
    let idx = |k: isize| (k + offset) as usize;
    let mut v = vec![0isize; (2 * max + 3) as usize];
    let mut trace: Vec<Vec<isize>> = Vec::new();

    'search: for d in 0..=max {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
                v[idx(k + 1)]
            } else {
                v[idx(k - 1)] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx(k)] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    let mut ops = Vec::new();
    let (mut x, mut y) = (n, m);
    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let k = x - y;
        let prev_k = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[idx(prev_k)];
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            ops.push(Op::Equal);
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                ops.push(Op::Insert);
            } else {
                ops.push(Op::Delete);
            }
        }
        x = prev_x;
        y = prev_y;
    }

    ops.reverse();
    ops
}

/// Slide pure insert/delete runs forward when doing so joins them to the
/// next edit; the script length is unchanged but unchanged runs get longer
fn compact<T: PartialEq>(ops: &mut [Op], a: &[T], b: &[T]) {
    let mut s = 0;
    while s < ops.len() {
        if ops[s] == Op::Equal {
            s += 1;
            continue;
        }

        let kind = ops[s];
        let mut e = s;
        while e < ops.len() && ops[e] == kind {
            e += 1;
        }

        let isolated_before = s == 0 || ops[s - 1] == Op::Equal;
        if !isolated_before || e >= ops.len() || ops[e] != Op::Equal {
            s = e;
            continue;
        }

        let len = e - s;
        let pos = ops[..s]
            .iter()
            .filter(|op| match kind {
                Op::Delete => **op != Op::Insert,
                _ => **op != Op::Delete,
            })
            .count();
        let same = |p: usize, q: usize| match kind {
            Op::Delete => a[p] == a[q],
            _ => b[p] == b[q],
        };

        let mut shift = 0;
        while e + shift < ops.len() && ops[e + shift] == Op::Equal && same(pos + shift, pos + len + shift) {
            shift += 1;
        }

        let joins = shift > 0 && e + shift < ops.len() && ops[e + shift] != Op::Equal;
        if joins {
            for op in &mut ops[s..s + shift] {
                *op = Op::Equal;
            }
            for op in &mut ops[s + shift..e + shift] {
                *op = kind;
            }
            s = e + shift;
        } else {
            s = e;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(a: &[char], b: &[char], ops: &[Op]) -> Vec<char> {
        let (mut i, mut j) = (0, 0);
        let mut out = Vec::new();
        for op in ops {
            match op {
                Op::Equal => {
                    assert_eq!(a[i], b[j]);
                    out.push(a[i]);
                    i += 1;
                    j += 1;
                }
                Op::Delete => i += 1,
                Op::Insert => {
                    out.push(b[j]);
                    j += 1;
                }
            }
        }
        assert_eq!(i, a.len());
        out
    }

    #[test]
    fn test_myers_minimal_script() {
        let a: Vec<char> = "ABCABBA".chars().collect();
        let b: Vec<char> = "CBABAC".chars().collect();
        let ops = diff_ops(&a, &b);
        let edits = ops.iter().filter(|op| **op != Op::Equal).count();
        assert_eq!(edits, 5);
        assert_eq!(apply(&a, &b, &ops), b);
    }

    #[test]
    fn test_compaction_joins_runs() {
        // "aac" -> "ad": deleting the first 'a' and deleting the second are
        // equally short; the second keeps one unchanged run and one edit group.
        let a: Vec<char> = "aac".chars().collect();
        let b: Vec<char> = "ad".chars().collect();
        let mut ops = vec![Op::Delete, Op::Equal, Op::Delete, Op::Insert];
        assert_eq!(apply(&a, &b, &ops), b);

        compact(&mut ops, &a, &b);
        assert_eq!(ops, vec![Op::Equal, Op::Delete, Op::Delete, Op::Insert]);
        assert_eq!(apply(&a, &b, &ops), b);
    }

    #[test]
    fn test_identical_contents() {
        let text = "Summary\nLed team\n";
        let result = diff(text, text);
        assert!(result.is_identical());
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.summary.lines_unchanged, 2);
        assert!(!result.summary.has_changes());
    }

    #[test]
    fn test_empty_inputs() {
        let result = diff("", "");
        assert!(result.chunks.is_empty());

        let added = diff("", "one\ntwo\n");
        assert_eq!(added.additions().count(), 1);
        assert_eq!(added.summary.lines_added, 2);
        assert_eq!(added.summary.chars_added, 8);

        let removed = diff("one\ntwo\n", "");
        assert_eq!(removed.deletions().count(), 1);
        assert_eq!(removed.summary.lines_deleted, 2);
        assert_eq!(removed.summary.words_deleted, 2);
    }

    #[test]
    fn test_modification_is_refined_to_words() {
        let result = diff("Led team", "Led a cross-functional team");
        let mods: Vec<_> = result.modifications().collect();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].confidence, REFINED_CONFIDENCE);
        assert_eq!(mods[0].edits.len(), 1);

        let edit = &mods[0].edits[0];
        assert!(edit.is_insertion());
        assert_eq!(edit.new_text.trim(), "a cross-functional");
        assert_eq!(edit.len_delta(), 19);
        assert_eq!(result.summary.lines_modified, 1);
        assert_eq!(result.summary.words_added, 2);
    }

    #[test]
    fn test_line_chunks_in_order() {
        let before = "Summary\nRust engineer\nSkills\n";
        let after = "Summary\nSenior Rust engineer\nSkills\nAwards\n";
        let result = diff(before, after);
        let kinds: Vec<_> = result.chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChunkKind::Unchanged,
                ChunkKind::Modification,
                ChunkKind::Unchanged,
                ChunkKind::Addition
            ]
        );
        assert_eq!(result.chunks[1].old_lines, TextRange::new(1, 2));
        assert_eq!(result.chunks[3].new_lines, TextRange::new(3, 4));
    }

    #[test]
    fn test_tokenize_round_trips() {
        let text = "Led 5-person team, shipped v2.0!\n  Next line";
        let tokens = tokenize_words(text);
        assert_eq!(tokens.concat(), text);
        assert!(tokens.contains(&"team"));
        assert!(tokens.contains(&","));
        assert!(tokens.contains(&"\n"));
    }

    #[test]
    fn test_json_wire_form() {
        let result = diff("Skills: Rust\n", "Skills: Rust, Go\n");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["chunks"][0]["kind"], "modification");
        assert_eq!(json["summary"]["lines_modified"], 1);

        let back: DiffResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
