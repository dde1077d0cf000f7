//! Recursive hierarchical splitting.
//!
//! Tries progressively finer separators until chunks fit the token budget.
//!
//! ## The Algorithm
//!
//! Given separators `["\n\n", "\n", ". ", " ", ""]` and a budget of 100
//! tokens:
//!
//! ```text
//! 1. Fits in 100 tokens? Emit as-is.
//! 2. Split on "\n\n" (paragraphs), keeping the separator attached to the
//!    preceding piece so concatenation is lossless.
//! 3. Any piece over budget? Split that piece on "\n" (lines).
//! 4. Still too large? ". " (sentences), then " " (words).
//! 5. "" is the terminal fallback: greedy character packing.
//! 6. Re-merge adjacent pieces while the joined text stays in budget.
//! ```
//!
//! Separator order encodes document-structure preference: a paragraph
//! boundary is better than a sentence boundary, which is better than a
//! word boundary.
//!
//! ## Budget Measurement
//!
//! The budget is measured on a piece's *body*: the trailing separator a
//! piece carries for losslessness rides along without counting. `"A.\n\n"`
//! fits a 3-token character budget because `"A."` does. The stored
//! `token_count` on an emitted chunk still counts the full text, so it can
//! exceed the budget by at most one separator's tokens. The terminal
//! character fallback counts everything and never exceeds the budget.
//!
//! ## Edge Policy
//!
//! Empty input emits zero chunks. Whitespace-only input emits one chunk
//! holding the whitespace: the chunker never drops characters, so
//! concatenating its output always reproduces the source. Splits never
//! produce empty pieces (the separator stays attached to the piece before
//! it); a piece consisting of the separator alone is kept so coverage
//! holds.

use std::sync::Arc;

use crate::{Chunk, Chunker, Error, Result, Tokenizer};

/// Default separator hierarchy: paragraphs, lines, sentences, words, chars.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// A piece of text plus the byte length of the trailing separator it
/// carries. The separator is excluded from budget measurement.
#[derive(Debug, Clone)]
struct Piece {
    text: String,
    trailing: usize,
}

impl Piece {
    fn body(&self) -> &str {
        &self.text[..self.text.len() - self.trailing]
    }
}

/// Recursive separator-hierarchy chunker under a token budget.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use quarry::{CharacterTokenizer, Chunker, RecursiveChunker};
///
/// let chunker = RecursiveChunker::new(Arc::new(CharacterTokenizer), 50).unwrap();
/// let text = "Paragraph one.\n\nParagraph two is longer and might need splitting.";
/// let chunks = chunker.chunk(text).unwrap();
///
/// let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
/// assert_eq!(rebuilt, text);
/// ```
#[derive(Clone)]
pub struct RecursiveChunker {
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a recursive chunker with the default separators.
    ///
    /// # Errors
    ///
    /// [`Error::ChunkSize`] if `chunk_size == 0`.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::ChunkSize(chunk_size));
        }
        Ok(Self {
            tokenizer,
            chunk_size,
            separators: DEFAULT_SEPARATORS.iter().map(|s| (*s).to_string()).collect(),
        })
    }

    /// Replace the separator hierarchy, coarsest first. The empty string is
    /// the terminal character-level fallback; if the list omits it, texts
    /// that no separator can break are force-packed anyway.
    #[must_use]
    pub fn with_separators(mut self, separators: &[&str]) -> Self {
        self.separators = separators.iter().map(|&s| s.to_string()).collect();
        self
    }

    fn count(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    fn fits(&self, piece: &Piece) -> bool {
        self.count(piece.body()) <= self.chunk_size
    }

    /// Split a piece with the separators from `sep_index` on. Returned
    /// pieces concatenate back to the input exactly, and each fits the
    /// budget (measured on its body) except where even single characters
    /// cannot fit.
    fn split_recursive(&self, piece: Piece, sep_index: usize) -> Vec<Piece> {
        if self.fits(&piece) {
            return vec![piece];
        }

        let Some(sep) = self.separators.get(sep_index) else {
            return self.force_pack(piece);
        };
        if sep.is_empty() {
            return self.force_pack(piece);
        }
        if !piece.body().contains(sep.as_str()) {
            return self.split_recursive(piece, sep_index + 1);
        }

        // Split the body on the separator, attaching each occurrence to the
        // piece before it. The final fragment inherits the original piece's
        // trailing separator.
        let mut parts = Vec::new();
        let body_len = piece.body().len();
        let mut start = 0usize;
        while let Some(pos) = piece.text[start..body_len].find(sep.as_str()) {
            let end = start + pos + sep.len();
            parts.push(Piece {
                text: piece.text[start..end].to_string(),
                trailing: sep.len(),
            });
            start = end;
        }
        if start < piece.text.len() {
            parts.push(Piece {
                text: piece.text[start..].to_string(),
                trailing: piece.trailing,
            });
        }

        let mut units = Vec::new();
        for part in parts {
            if self.fits(&part) {
                units.push(part);
            } else {
                units.extend(self.split_recursive(part, sep_index + 1));
            }
        }

        self.merge_units(units)
    }

    /// Greedily re-merge adjacent units while the joined body fits the
    /// budget. Counts are taken on the joined text, not summed, so
    /// tokenizers with non-additive counts stay within bounds.
    fn merge_units(&self, units: Vec<Piece>) -> Vec<Piece> {
        let mut merged: Vec<Piece> = Vec::with_capacity(units.len());

        for unit in units {
            match merged.last_mut() {
                Some(last) => {
                    let candidate = Piece {
                        text: format!("{}{}", last.text, unit.text),
                        trailing: unit.trailing,
                    };
                    if self.fits(&candidate) {
                        *last = candidate;
                    } else {
                        merged.push(unit);
                    }
                }
                None => merged.push(unit),
            }
        }

        merged
    }

    /// Terminal fallback: greedy character packing up to the budget,
    /// counting every character including any trailing separator.
    fn force_pack(&self, piece: Piece) -> Vec<Piece> {
        let mut pieces = Vec::new();
        let mut current = String::new();

        for c in piece.text.chars() {
            if !current.is_empty() {
                let mut candidate = current.clone();
                candidate.push(c);
                if self.count(&candidate) > self.chunk_size {
                    pieces.push(Piece {
                        text: std::mem::take(&mut current),
                        trailing: 0,
                    });
                    current.push(c);
                    continue;
                }
                current = candidate;
                continue;
            }
            current.push(c);
        }

        if !current.is_empty() {
            pieces.push(Piece {
                text: current,
                trailing: 0,
            });
        }

        pieces
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.is_empty() {
            return Ok(vec![]);
        }
        if text.trim().is_empty() {
            tracing::warn!(len = text.len(), "input is whitespace-only");
        }

        let root = Piece {
            text: text.to_string(),
            trailing: 0,
        };
        let pieces = self.split_recursive(root, 0);

        // Convert to chunks with offsets by walking the concatenation.
        // Invariant: `split_recursive` returns pieces that re-concatenate
        // to `text`.
        let mut chunks = Vec::with_capacity(pieces.len());
        let mut cursor = 0usize;

        for piece in pieces {
            let start = cursor;
            let end = start + piece.text.len();
            cursor = end;

            let token_count = self.count(&piece.text);
            chunks.push(Chunk::new(piece.text, start, end, token_count));
        }

        debug_assert_eq!(cursor, text.len());
        Ok(chunks)
    }

    fn estimate_chunks(&self, text_len: usize) -> usize {
        (text_len / self.chunk_size.saturating_mul(4).max(1)).max(1)
    }
}

impl std::fmt::Debug for RecursiveChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveChunker")
            .field("tokenizer", &self.tokenizer.name())
            .field("chunk_size", &self.chunk_size)
            .field("separators", &self.separators)
            .finish()
    }
}
