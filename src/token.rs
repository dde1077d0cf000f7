//! Token-window chunking with overlap.
//!
//! The simplest budget-exact strategy: encode the whole text into token
//! IDs, slide a window of `chunk_size` tokens stepping by
//! `chunk_size - chunk_overlap`, and map each window back to a byte span
//! of the source.
//!
//! ## How It Works
//!
//! ```text
//! chunk_size = 10, chunk_overlap = 2  (character tokens)
//!
//! Document: "Hello world. This is a test."
//!
//! Chunk 0: [0..10)   tokens 0..10
//! Chunk 1: [8..18)   tokens 8..18   <- starts at 10 - 2 = 8
//! Chunk 2: [16..26)  tokens 16..26
//! Chunk 3: [24..28)  final window may be shorter
//! ```
//!
//! ## Offset Recovery
//!
//! Windows live in token space; chunks need byte offsets. When the
//! tokenizer reports per-token byte spans that tile the text, offsets come
//! straight from the spans. Otherwise each window is decoded and matched
//! against the source; a tokenizer whose decode does not reproduce the
//! source byte-for-byte is rejected with a round-trip error rather than
//! silently emitting wrong offsets.

use std::sync::Arc;

use crate::{Chunk, Chunker, Error, Result, Tokenizer};

/// Fixed-size token-window chunker with configurable overlap.
///
/// Requires a tokenizer with `encode`/`decode` (or `token_spans`); a
/// counting-only tokenizer is rejected at chunk time with
/// [`Error::TokenizerRoundTrip`].
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use quarry::{CharacterTokenizer, Chunker, TokenChunker};
///
/// let chunker = TokenChunker::new(Arc::new(CharacterTokenizer), 10, 2).unwrap();
/// let chunks = chunker.chunk("Hello world. This is a test.").unwrap();
///
/// assert_eq!(chunks.len(), 4);
/// assert_eq!(chunks[0].span(), 0..10);
/// assert_eq!(chunks[1].span(), 8..18); // 10 - 2 overlap
/// ```
#[derive(Clone)]
pub struct TokenChunker {
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TokenChunker {
    /// Create a new token chunker.
    ///
    /// # Errors
    ///
    /// [`Error::ChunkSize`] if `chunk_size == 0`;
    /// [`Error::Overlap`] if `chunk_overlap >= chunk_size`.
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::ChunkSize(chunk_size));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::Overlap {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            tokenizer,
            chunk_size,
            chunk_overlap,
        })
    }

    /// The step size between window starts, in tokens.
    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Byte span per token, when the tokenizer's spans tile the text.
    fn tiling_spans(&self, text: &str, n_tokens: usize) -> Option<Vec<(usize, usize)>> {
        let spans = self.tokenizer.token_spans(text)?;
        if spans.len() != n_tokens {
            return None;
        }
        let mut cursor = 0;
        for &(start, end) in &spans {
            if start != cursor || end < start {
                return None;
            }
            cursor = end;
        }
        (cursor == text.len()).then_some(spans)
    }

    /// Offset recovery by decoding: the decoded prefix gives the window's
    /// byte start, and the decoded window must match the source slice.
    fn window_by_decode(&self, text: &str, ids: &[u32], start: usize, end: usize) -> Result<(usize, usize)> {
        let round_trip = || Error::TokenizerRoundTrip(self.tokenizer.name().to_string());

        let byte_start = self
            .tokenizer
            .decode(&ids[..start])
            .ok_or_else(round_trip)?
            .len();
        let window = self.tokenizer.decode(&ids[start..end]).ok_or_else(round_trip)?;
        let byte_end = byte_start + window.len();

        if text.get(byte_start..byte_end) != Some(window.as_str()) {
            return Err(round_trip());
        }
        Ok((byte_start, byte_end))
    }
}

impl Chunker for TokenChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.is_empty() {
            return Ok(vec![]);
        }

        let ids = self
            .tokenizer
            .encode(text)
            .ok_or_else(|| Error::TokenizerRoundTrip(self.tokenizer.name().to_string()))?;
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let spans = self.tiling_spans(text, ids.len());
        let mut chunks = Vec::with_capacity(self.estimate_chunks(text.len()));
        let mut start = 0usize;

        loop {
            let end = (start + self.chunk_size).min(ids.len());

            let (byte_start, byte_end) = match &spans {
                Some(spans) => (spans[start].0, spans[end - 1].1),
                None => self.window_by_decode(text, &ids, start, end)?,
            };

            let chunk_text = &text[byte_start..byte_end];
            let token_count = self.tokenizer.count_tokens(chunk_text);
            chunks.push(Chunk::new(chunk_text, byte_start, byte_end, token_count));

            if end == ids.len() {
                break;
            }
            start += self.step();
        }

        Ok(chunks)
    }

    fn estimate_chunks(&self, text_len: usize) -> usize {
        if text_len == 0 {
            return 0;
        }
        text_len.div_ceil(self.step())
    }
}

impl std::fmt::Debug for TokenChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenChunker")
            .field("tokenizer", &self.tokenizer.name())
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish()
    }
}
