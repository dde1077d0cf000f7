//! Late chunking: embed first, then chunk.
//!
//! ## The Problem with Traditional Chunking
//!
//! Traditional chunking embeds chunks independently:
//!
//! ```text
//! Document: "Einstein developed relativity. He became famous."
//! Chunks:   ["Einstein developed relativity.", "He became famous."]
//! Embeddings: [embed(chunk1), embed(chunk2)]
//!                              ↑
//!                              "He" loses context!
//! ```
//!
//! ## Late Chunking Solution
//!
//! Late chunking embeds the full document once, then pools the token
//! embeddings for each chunk:
//!
//! ```text
//! Step 1: Embed full document → token embeddings [t1, t2, ..., tn]
//!         Each token "sees" the whole document via attention.
//!
//! Step 2: Chunk by sentence packing, then pool per chunk:
//!         Chunk 1: mean_pool([t1, ..., t4])
//!         Chunk 2: mean_pool([t5, ..., t7])   <- "He" keeps Einstein context
//! ```
//!
//! Chunk boundaries come from the same sentence packing as the sentence
//! chunker; the tokenizer must report per-token byte ranges so each token
//! vector can be assigned to the chunk whose span it overlaps.

use std::sync::Arc;

use crate::embedding::mean_pool;
use crate::sentence::SentenceSplitter;
use crate::{Chunk, Chunker, Error, Result, SentenceChunker, TokenEmbedder, Tokenizer};

/// Late chunker: sentence-packed boundaries with embeddings pooled from a
/// single whole-document token embedding pass.
///
/// Requires a tokenizer with `token_spans` (else
/// [`Error::AlignmentUnsupported`]) and a [`TokenEmbedder`].
pub struct LateChunker {
    tokenizer: Arc<dyn Tokenizer>,
    embedder: Arc<dyn TokenEmbedder>,
    splitter: SentenceSplitter,
    packer: SentenceChunker,
}

impl LateChunker {
    /// Create a late chunker with a token budget per chunk.
    ///
    /// # Errors
    ///
    /// [`Error::ChunkSize`] if `chunk_size == 0`.
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        embedder: Arc<dyn TokenEmbedder>,
        chunk_size: usize,
    ) -> Result<Self> {
        let packer = SentenceChunker::new(Arc::clone(&tokenizer), chunk_size)?;
        Ok(Self {
            tokenizer,
            embedder,
            splitter: SentenceSplitter::default(),
            packer,
        })
    }

    /// Use a custom sentence splitter.
    #[must_use]
    pub fn with_splitter(mut self, splitter: SentenceSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Pool the token vectors whose spans overlap each chunk. A chunk that
    /// overlaps no token span (possible only with degenerate spans) falls
    /// back to the whole-document mean.
    fn pool_chunks(
        chunks: &mut [Chunk],
        token_spans: &[(usize, usize)],
        token_embeddings: &[Vec<f32>],
        dim: usize,
    ) {
        let all: Vec<&[f32]> = token_embeddings.iter().map(Vec::as_slice).collect();

        for chunk in chunks {
            let members: Vec<&[f32]> = token_spans
                .iter()
                .zip(token_embeddings)
                .filter(|((start, end), _)| *start < chunk.end_index && *end > chunk.start_index)
                .map(|(_, e)| e.as_slice())
                .collect();

            chunk.embedding = Some(if members.is_empty() {
                mean_pool(&all, dim)
            } else {
                mean_pool(&members, dim)
            });
        }
    }
}

impl Chunker for LateChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.is_empty() {
            return Ok(vec![]);
        }

        let token_spans = self
            .tokenizer
            .token_spans(text)
            .ok_or_else(|| Error::AlignmentUnsupported(self.tokenizer.name().to_string()))?;

        let sentences = self.splitter.sentences(text, self.tokenizer.as_ref());
        let mut chunks = self.packer.pack(text, &sentences);
        if chunks.is_empty() {
            return Ok(chunks);
        }

        let token_embeddings = self.embedder.embed_tokens(text)?;
        if token_embeddings.len() != token_spans.len() {
            tracing::warn!(
                spans = token_spans.len(),
                vectors = token_embeddings.len(),
                "token span and embedding counts differ; aligning by prefix"
            );
        }
        let aligned = token_spans.len().min(token_embeddings.len());

        Self::pool_chunks(
            &mut chunks,
            &token_spans[..aligned],
            &token_embeddings[..aligned],
            self.embedder.dimension(),
        );

        Ok(chunks)
    }

    fn estimate_chunks(&self, text_len: usize) -> usize {
        self.packer.estimate_chunks(text_len)
    }
}

impl std::fmt::Debug for LateChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LateChunker")
            .field("tokenizer", &self.tokenizer.name())
            .field("embedder", &self.embedder.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CharacterTokenizer, Embedder, WordTokenizer};

    /// One vector per character token: position index on axis 0, constant
    /// on axis 1. Lets tests check which tokens were pooled.
    struct PositionalEmbedder;

    impl Embedder for PositionalEmbedder {
        fn name(&self) -> &str {
            "positional"
        }

        fn dimension(&self) -> usize {
            2
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    impl TokenEmbedder for PositionalEmbedder {
        fn embed_tokens(&self, text: &str) -> Result<Vec<Vec<f32>>> {
            Ok((0..text.chars().count())
                .map(|i| vec![i as f32, 1.0])
                .collect())
        }
    }

    #[test]
    fn test_chunks_match_sentence_packing() {
        let late = LateChunker::new(Arc::new(CharacterTokenizer), Arc::new(PositionalEmbedder), 12)
            .unwrap();
        let text = "One. Two. Three. Four.";
        let chunks = late.chunk(text).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].span(), 0..10);
        assert_eq!(chunks[1].span(), 10..22);
    }

    #[test]
    fn test_every_chunk_gets_an_embedding() {
        let late = LateChunker::new(Arc::new(CharacterTokenizer), Arc::new(PositionalEmbedder), 12)
            .unwrap();
        let chunks = late.chunk("One. Two. Three. Four.").unwrap();

        for chunk in &chunks {
            let embedding = chunk.embedding.as_ref().unwrap();
            assert_eq!(embedding.len(), 2);
            let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_pooling_uses_chunk_local_tokens() {
        let late = LateChunker::new(Arc::new(CharacterTokenizer), Arc::new(PositionalEmbedder), 12)
            .unwrap();
        let chunks = late.chunk("One. Two. Three. Four.").unwrap();

        // Mean positions differ between chunks, so the pooled axis-0 /
        // axis-1 ratio must grow for later chunks.
        let ratio = |c: &Chunk| {
            let e = c.embedding.as_ref().unwrap();
            e[0] / e[1]
        };
        assert!(ratio(&chunks[1]) > ratio(&chunks[0]));
    }

    #[test]
    fn test_alignment_required() {
        // WordTokenizer reports no token spans
        let late = LateChunker::new(Arc::new(WordTokenizer), Arc::new(PositionalEmbedder), 12)
            .unwrap();
        let err = late.chunk("Some words here.").unwrap_err();
        assert!(matches!(err, Error::AlignmentUnsupported(_)));
    }

    #[test]
    fn test_empty_input() {
        let late = LateChunker::new(Arc::new(CharacterTokenizer), Arc::new(PositionalEmbedder), 12)
            .unwrap();
        assert!(late.chunk("").unwrap().is_empty());
    }
}
