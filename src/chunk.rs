//! Fixed-window text chunker with overlap.
//!
//! Splits extracted text into windows of at most `max_chars` characters.
//! Consecutive windows share exactly `overlap` characters so a sentence cut
//! at a boundary still appears whole in one of the two neighbours.
//!
//! Lengths and offsets count Unicode scalar values, never bytes, so a
//! window never splits a multi-byte character.
//!
//! # Algorithm
//!
//! 1. If the text fits in one window, yield it unchanged (even when empty).
//! 2. Otherwise window `i` starts at character `i × (max_chars − overlap)`.
//! 3. Each window is `min(max_chars, remaining)` characters long.
//! 4. Stop after the window that reaches the end of the text.
//!
//! # Example
//!
//! ```rust
//! use askpdf::chunk::split;
//!
//! let text = "a".repeat(2000);
//! let spans: Vec<_> = split(&text, 1024, 80).unwrap().collect();
//! assert_eq!(spans[0].offset, 0);
//! assert_eq!(spans[1].offset, 944);
//! ```

use crate::config::ChunkingConfig;
use crate::error::{QaError, Result};
use crate::models::{Chunk, Document};

/// One window of the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    /// Character offset of the window start.
    pub offset: usize,
    pub text: &'a str,
}

/// Lazy iterator over the windows of a text.
///
/// The iterator is `Clone`: clone it before consuming to walk the windows
/// a second time.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a str,
    offset: usize,
    max_chars: usize,
    step: usize,
    done: bool,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Span<'a>;

    fn next(&mut self) -> Option<Span<'a>> {
        if self.done {
            return None;
        }

        let span = match self.rest.char_indices().nth(self.max_chars) {
            // More than one window left: emit a full window, advance by step.
            Some((end, _)) => {
                let span = Span {
                    offset: self.offset,
                    text: &self.rest[..end],
                };
                let advance = self
                    .rest
                    .char_indices()
                    .nth(self.step)
                    .map(|(i, _)| i)
                    .unwrap_or(self.rest.len());
                self.rest = &self.rest[advance..];
                self.offset += self.step;
                span
            }
            None => {
                self.done = true;
                Span {
                    offset: self.offset,
                    text: self.rest,
                }
            }
        };

        Some(span)
    }
}

/// Split `text` into overlapping windows.
///
/// # Errors
///
/// [`QaError::InvalidConfiguration`] when `max_chars` is zero or
/// `overlap >= max_chars` (the window would never advance).
pub fn split(text: &str, max_chars: usize, overlap: usize) -> Result<Chunks<'_>> {
    if max_chars == 0 {
        return Err(QaError::InvalidConfiguration(
            "chunk size must be > 0".to_string(),
        ));
    }
    if overlap >= max_chars {
        return Err(QaError::InvalidConfiguration(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, max_chars
        )));
    }

    Ok(Chunks {
        rest: text,
        offset: 0,
        max_chars,
        step: max_chars - overlap,
        done: false,
    })
}

/// Chunk every page of a document.
///
/// Pages are split independently and blank pages are skipped. Page numbers
/// are 1-based; single-page documents still record page 1.
pub fn chunk_document(doc: &Document, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();

    for (i, page) in doc.pages.iter().enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        for span in split(page, config.max_chars, config.overlap_chars)? {
            chunks.push(Chunk {
                content: span.text.to_string(),
                source: doc.source.clone(),
                page: Some(i + 1),
                offset: span.offset,
            });
        }
    }

    Ok(chunks)
}
