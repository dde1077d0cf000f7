//! Refineries: post-chunk transformers.
//!
//! A refinery takes the chunk sequence a chunker produced and returns a
//! replacement sequence. It never sees the original document, so it can
//! enrich or rearrange chunks but not change what the source said.
//!
//! ## Overlap Refinery
//!
//! Retrieval quality suffers at chunk boundaries: a query matching the end
//! of one chunk misses the beginning of the next. The overlap refinery
//! mitigates this by copying a token-bounded slice of each neighbor into
//! the chunk's `context` field:
//!
//! ```text
//! mode = Prefix, context_size = 4 (character tokens)
//!
//! Chunk 0: text = "Hello "              context = None
//! Chunk 1: text = "World!"              context = Some("llo ")
//!                                                       ↑
//!                                         tail of the previous chunk
//! ```
//!
//! `text` is never touched by `Prefix`/`Suffix`/`Both`, so reconstruction
//! from the raw `text` fields keeps working. `Merge` is the exception: it
//! joins adjacent undersized chunks into one chunk spanning the merged
//! range and re-counts its tokens.

use std::sync::Arc;

use crate::{Chunk, Embedder, Result, Tokenizer};

/// A post-chunk transformer. Refineries replace the chunk list rather than
/// mutating chunks in place.
pub trait Refinery: Send + Sync {
    /// Transform the chunk sequence.
    ///
    /// # Errors
    ///
    /// Collaborator-backed refineries surface their provider's failure.
    fn refine(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>>;
}

/// Which neighbor context the overlap refinery injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapMode {
    /// Each chunk (after the first) receives the previous chunk's tail.
    Prefix,
    /// Each chunk (before the last) receives the next chunk's head.
    Suffix,
    /// Both of the above; `context` holds the tail, then the head.
    Both,
    /// Join adjacent chunks whose combined text fits the token budget.
    Merge,
}

/// Injects neighboring context into chunks, or merges undersized ones.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use quarry::{CharacterTokenizer, Chunk, OverlapMode, OverlapRefinery, Refinery};
///
/// let refinery = OverlapRefinery::new(Arc::new(CharacterTokenizer), OverlapMode::Prefix, 4);
/// let chunks = vec![
///     Chunk::new("Hello ", 0, 6, 6),
///     Chunk::new("World!", 6, 12, 6),
/// ];
/// let refined = refinery.refine(chunks).unwrap();
///
/// assert_eq!(refined[1].context.as_deref(), Some("llo "));
/// assert_eq!(refined[1].text, "World!"); // text untouched
/// ```
#[derive(Clone)]
pub struct OverlapRefinery {
    tokenizer: Arc<dyn Tokenizer>,
    mode: OverlapMode,
    context_size: usize,
}

impl OverlapRefinery {
    /// Create an overlap refinery. `context_size` is the token budget for
    /// injected context, or the merge budget in [`OverlapMode::Merge`].
    #[must_use]
    pub fn new(tokenizer: Arc<dyn Tokenizer>, mode: OverlapMode, context_size: usize) -> Self {
        Self {
            tokenizer,
            mode,
            context_size,
        }
    }

    /// Longest suffix of `text`, on a char boundary, within the token
    /// budget. Token counts grow with suffix length, so binary search over
    /// char boundaries finds the widest fit.
    fn token_tail<'t>(&self, text: &'t str) -> &'t str {
        let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        if boundaries.is_empty() {
            return text;
        }

        // Smallest start boundary whose suffix still fits
        let mut lo = 0usize;
        let mut hi = boundaries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.tokenizer.count_tokens(&text[boundaries[mid]..]) <= self.context_size {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        if lo < boundaries.len() {
            &text[boundaries[lo]..]
        } else {
            ""
        }
    }

    /// Longest prefix of `text`, on a char boundary, within the token
    /// budget.
    fn token_head<'t>(&self, text: &'t str) -> &'t str {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());

        // Largest end boundary whose prefix still fits
        let mut lo = 0usize;
        let mut hi = boundaries.len() - 1;
        while lo < hi {
            let mid = (lo + hi).div_ceil(2);
            if self.tokenizer.count_tokens(&text[..boundaries[mid]]) <= self.context_size {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        &text[..boundaries[lo]]
    }

    fn inject_context(&self, mut chunks: Vec<Chunk>) -> Vec<Chunk> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        for (i, chunk) in chunks.iter_mut().enumerate() {
            let prefix = match self.mode {
                OverlapMode::Prefix | OverlapMode::Both if i > 0 => self.token_tail(&texts[i - 1]),
                _ => "",
            };
            let suffix = match self.mode {
                OverlapMode::Suffix | OverlapMode::Both if i + 1 < texts.len() => {
                    self.token_head(&texts[i + 1])
                }
                _ => "",
            };

            if !prefix.is_empty() || !suffix.is_empty() {
                chunk.context = Some(format!("{prefix}{suffix}"));
            }
        }

        chunks
    }

    fn merge(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let fused = match merged.last() {
                // Only byte-contiguous neighbors can merge: the refinery has
                // no source text to fill a gap with.
                Some(last) if last.end_index == chunk.start_index => {
                    let joined = format!("{}{}", last.text, chunk.text);
                    let token_count = self.tokenizer.count_tokens(&joined);
                    (token_count <= self.context_size)
                        .then(|| Chunk::new(joined, last.start_index, chunk.end_index, token_count))
                }
                _ => None,
            };

            match fused {
                Some(fused) => {
                    merged.pop();
                    merged.push(fused);
                }
                None => merged.push(chunk),
            }
        }

        merged
    }
}

impl Refinery for OverlapRefinery {
    fn refine(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        if chunks.len() < 2 || self.context_size == 0 {
            return Ok(chunks);
        }

        Ok(match self.mode {
            OverlapMode::Merge => self.merge(chunks),
            _ => self.inject_context(chunks),
        })
    }
}

impl std::fmt::Debug for OverlapRefinery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlapRefinery")
            .field("tokenizer", &self.tokenizer.name())
            .field("mode", &self.mode)
            .field("context_size", &self.context_size)
            .finish()
    }
}

/// Attaches an embedding to every chunk via a batch call to the model.
///
/// Unlike the semantic/late chunkers, this refinery embeds each chunk's
/// text in isolation. It exists for pipelines whose chunker doesn't embed.
pub struct EmbeddingsRefinery {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingsRefinery {
    /// Create an embeddings refinery around a model.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

impl Refinery for EmbeddingsRefinery {
    fn refine(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        if chunks.is_empty() {
            return Ok(chunks);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = Some(embedding);
        }
        Ok(chunks)
    }
}

impl std::fmt::Debug for EmbeddingsRefinery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingsRefinery")
            .field("embedder", &self.embedder.name())
            .finish()
    }
}
