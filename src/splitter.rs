//! Overlapping, break-point-aware text splitter.
//!
//! Splits document content into chunks of at most `chunk_size` characters,
//! each overlapping its predecessor by up to `chunk_overlap` characters.
//! All offsets are in Unicode scalar values, never bytes, so multi-byte
//! text is never cut inside a code point.
//!
//! # Algorithm
//!
//! 1. Content no longer than `chunk_size` becomes a single chunk, unchanged.
//! 2. Otherwise, skip leading whitespace and take the window
//!    `[pos, pos + chunk_size)`.
//! 3. Pull the window's right edge back to the best break point at or past
//!    the window midpoint: paragraph (`\n\n`) > sentence end (`. `, `! `,
//!    `? ` or the same marks before a newline) > space > newline. If none
//!    qualifies, hard-cut at the window end.
//! 4. Emit the window with trailing whitespace removed.
//! 5. Continue from `max(end - chunk_overlap, pos + 1)`.
//!
//! Every chunk inherits its document's metadata plus a `heading` entry
//! naming the last Markdown heading that starts at or before the chunk.
//!
//! # Example
//!
//! ```rust
//! use hearth::splitter::TextSplitter;
//!
//! let splitter = TextSplitter::new(10, 0).unwrap();
//! let spans = splitter.split_text("abcdefghijklmnopqrstuvwxyz");
//! let texts: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
//! assert_eq!(texts, vec!["abcdefghij", "klmnopqrst", "uvwxyz"]);
//! ```

use tracing::debug;

use crate::config::KnowledgeConfig;
use crate::error::{HearthError, Result};
use crate::models::{Document, META_HEADING};

/// A chunk's position in the source text, in character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Fails unless `chunk_size > 0` and `chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(HearthError::InvalidChunking(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(HearthError::InvalidChunking(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &KnowledgeConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split raw text into spans. Start offsets are strictly increasing.
    pub fn split_text(&self, text: &str) -> Vec<ChunkSpan> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();

        if n <= self.chunk_size {
            return vec![ChunkSpan {
                start: 0,
                end: n,
                text: text.to_string(),
            }];
        }

        let mut spans = Vec::new();
        let mut pos = 0;

        loop {
            while pos < n && chars[pos].is_whitespace() {
                pos += 1;
            }
            if pos >= n {
                break;
            }

            let window_end = (pos + self.chunk_size).min(n);
            let end = if window_end < n {
                let mid = pos + (window_end - pos) / 2;
                find_break(&chars, mid, window_end).unwrap_or(window_end)
            } else {
                window_end
            };

            // chars[pos] is not whitespace, so the trimmed span is never empty
            let mut trimmed_end = end;
            while trimmed_end > pos && chars[trimmed_end - 1].is_whitespace() {
                trimmed_end -= 1;
            }
            spans.push(ChunkSpan {
                start: pos,
                end: trimmed_end,
                text: chars[pos..trimmed_end].iter().collect(),
            });

            if end >= n {
                break;
            }
            pos = end.saturating_sub(self.chunk_overlap).max(pos + 1);
        }

        spans
    }

    /// Split one document into chunk documents carrying heading metadata.
    pub fn split_document(&self, doc: &Document) -> Vec<Document> {
        let headings = collect_headings(&doc.content);

        self.split_text(&doc.content)
            .into_iter()
            .map(|span| {
                let mut metadata = doc.metadata.clone();
                match heading_for(&headings, span.start) {
                    Some(h) => {
                        metadata.insert(META_HEADING.to_string(), h.to_string());
                    }
                    None => {
                        metadata.remove(META_HEADING);
                    }
                }
                Document::new(span.text, metadata)
            })
            .collect()
    }

    pub fn split_documents(&self, docs: &[Document]) -> Vec<Document> {
        let chunks: Vec<Document> = docs.iter().flat_map(|d| self.split_document(d)).collect();
        debug!(
            documents = docs.len(),
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            chunk_overlap = self.chunk_overlap,
            "documents split"
        );
        chunks
    }
}

/// Text of the last Markdown heading starting at or before char offset `pos`,
/// or `""` when none precedes it.
pub fn heading_at(text: &str, pos: usize) -> String {
    let headings = collect_headings(text);
    heading_for(&headings, pos).unwrap_or("").to_string()
}

fn heading_for(headings: &[(usize, String)], pos: usize) -> Option<&str> {
    let idx = headings.partition_point(|(offset, _)| *offset <= pos);
    if idx == 0 {
        None
    } else {
        Some(headings[idx - 1].1.as_str())
    }
}

/// All ATX headings (`#` through `######`) as `(char offset, text)`, in
/// document order. Lines inside fenced code blocks are ignored.
fn collect_headings(text: &str) -> Vec<(usize, String)> {
    let mut headings = Vec::new();
    let mut offset = 0;
    let mut in_fence = false;

    for line in text.split('\n') {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some(title) = parse_heading(line) {
                headings.push((offset, title));
            }
        }
        offset += line.chars().count() + 1;
    }

    headings
}

fn parse_heading(line: &str) -> Option<String> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Best break position in `chars[mid..end]`, as the offset just past the
/// separator. Two-character separators must lie entirely inside the window.
fn find_break(chars: &[char], mid: usize, end: usize) -> Option<usize> {
    if let Some(i) = rfind_in(mid, end, |i| {
        i + 1 < end && chars[i] == '\n' && chars[i + 1] == '\n'
    }) {
        return Some(i + 2);
    }
    if let Some(i) = rfind_in(mid, end, |i| {
        i + 1 < end && matches!(chars[i], '.' | '!' | '?') && matches!(chars[i + 1], ' ' | '\n')
    }) {
        return Some(i + 2);
    }
    if let Some(i) = rfind_in(mid, end, |i| chars[i] == ' ') {
        return Some(i + 1);
    }
    rfind_in(mid, end, |i| chars[i] == '\n').map(|i| i + 1)
}

fn rfind_in(from: usize, to: usize, pred: impl Fn(usize) -> bool) -> Option<usize> {
    (from..to).rev().find(|&i| pred(i))
}
