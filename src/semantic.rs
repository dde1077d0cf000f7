//! Semantic chunking using embedding similarity.
//!
//! Splits text where the topic changes, detected by drops in embedding
//! similarity between adjacent sentences.
//!
//! ## The Idea
//!
//! ```text
//! Sentences:  [S1] [S2] [S3] [S4] [S5]
//! Embeddings:  E1   E2   E3   E4   E5
//! Similarity:    0.9  0.85 0.3  0.8
//!                          ↑
//!                     Topic shift!
//!
//! Groups: [S1, S2, S3] | [S4, S5]
//! ```
//!
//! Raw adjacent-pair similarity is noisy; one awkward sentence shouldn't
//! open a boundary. Pair similarities are therefore smoothed over a
//! sliding window of `similarity_window` values (truncated at both ends)
//! before comparing against the threshold. A smoothed value exactly equal
//! to the threshold is *not* a boundary.
//!
//! ## Threshold Selection
//!
//! | Threshold | Effect |
//! |-----------|--------|
//! | 0.3 | Only major topic shifts |
//! | 0.5 | Balanced (recommended) |
//! | 0.7 | Very sensitive, many small chunks |
//!
//! Each boundary-delimited group is then packed into chunks under the
//! token budget, exactly like the sentence chunker. Because sentence spans
//! tile the source, every emitted chunk is an exact source substring:
//! this chunker drops no whitespace between groups.

use std::sync::Arc;

use crate::embedding::{cosine, mean_pool};
use crate::sentence::SentenceSplitter;
use crate::{Chunk, Chunker, Embedder, Error, Result, Sentence, SentenceChunker, Tokenizer};

/// Semantic chunker: groups adjacent sentences by embedding similarity,
/// bounded by a token budget.
///
/// ## Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use quarry::{CharacterTokenizer, Chunker, SemanticChunker};
///
/// let chunker = SemanticChunker::new(
///     Arc::new(CharacterTokenizer),
///     Arc::new(my_embedder),
///     512,
///     0.5,
/// )?;
/// let chunks = chunker.chunk(&document)?;
/// ```
pub struct SemanticChunker {
    tokenizer: Arc<dyn Tokenizer>,
    embedder: Arc<dyn Embedder>,
    threshold: f32,
    similarity_window: usize,
    min_sentences: usize,
    splitter: SentenceSplitter,
    packer: SentenceChunker,
}

impl SemanticChunker {
    /// Create a semantic chunker.
    ///
    /// # Errors
    ///
    /// [`Error::ChunkSize`] if `chunk_size == 0`;
    /// [`Error::Threshold`] if `threshold` is outside `[0, 1]`.
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        embedder: Arc<dyn Embedder>,
        chunk_size: usize,
        threshold: f32,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Threshold(threshold));
        }
        let packer = SentenceChunker::new(Arc::clone(&tokenizer), chunk_size)?;
        Ok(Self {
            tokenizer,
            embedder,
            threshold,
            similarity_window: 1,
            min_sentences: 1,
            splitter: SentenceSplitter::default(),
            packer,
        })
    }

    /// Smooth pair similarities over a window of this many values
    /// (minimum 1; 1 means no smoothing).
    #[must_use]
    pub fn with_similarity_window(mut self, window: usize) -> Self {
        self.similarity_window = window.max(1);
        self
    }

    /// Require at least this many sentences per group before a boundary
    /// may open.
    #[must_use]
    pub fn with_min_sentences(mut self, min: usize) -> Self {
        self.min_sentences = min.max(1);
        self
    }

    /// Use a custom sentence splitter.
    #[must_use]
    pub fn with_splitter(mut self, splitter: SentenceSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Mean pair similarities over the truncated smoothing window.
    fn smooth(&self, sims: &[f32]) -> Vec<f32> {
        let half = self.similarity_window / 2;
        (0..sims.len())
            .map(|i| {
                let lo = i.saturating_sub(half);
                let hi = (i + half).min(sims.len() - 1);
                let window = &sims[lo..=hi];
                window.iter().sum::<f32>() / window.len() as f32
            })
            .collect()
    }

    /// Indices where a new group starts (boundary *before* the sentence at
    /// each returned index), evaluated left-to-right.
    fn find_boundaries(&self, smoothed: &[f32]) -> Vec<usize> {
        let mut boundaries = Vec::new();
        let mut group_start = 0usize;

        for (i, &sim) in smoothed.iter().enumerate() {
            let group_len = i + 1 - group_start;
            if sim < self.threshold && group_len >= self.min_sentences {
                boundaries.push(i + 1);
                group_start = i + 1;
            }
        }

        boundaries
    }

    /// Attach a mean-pooled sentence embedding to each packed chunk.
    fn attach_embeddings(chunks: &mut [Chunk], sentences: &[Sentence], embeddings: &[Vec<f32>], dim: usize) {
        for chunk in chunks {
            let members: Vec<&[f32]> = sentences
                .iter()
                .zip(embeddings)
                .filter(|(s, _)| s.start_index >= chunk.start_index && s.end_index <= chunk.end_index)
                .map(|(_, e)| e.as_slice())
                .collect();
            if !members.is_empty() {
                chunk.embedding = Some(mean_pool(&members, dim));
            }
        }
    }
}

impl Chunker for SemanticChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.is_empty() {
            return Ok(vec![]);
        }

        let sentences = self.splitter.sentences(text, self.tokenizer.as_ref());
        if sentences.is_empty() {
            return Ok(vec![]);
        }

        // Fewer than two sentences: nothing to compare, single-chunk output.
        if sentences.len() < 2 {
            return Ok(self.packer.pack(text, &sentences));
        }

        let texts: Vec<&str> = sentences.iter().map(|s| s.text.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        let sims: Vec<f32> = embeddings
            .windows(2)
            .map(|pair| cosine(&pair[0], &pair[1]))
            .collect();
        let smoothed = self.smooth(&sims);
        let boundaries = self.find_boundaries(&smoothed);

        tracing::debug!(
            sentences = sentences.len(),
            boundaries = boundaries.len(),
            "semantic grouping complete"
        );

        let mut chunks = Vec::new();
        let mut group_start = 0usize;
        for boundary in boundaries.iter().copied().chain([sentences.len()]) {
            let group = &sentences[group_start..boundary];
            if !group.is_empty() {
                let mut packed = self.packer.pack(text, group);
                Self::attach_embeddings(&mut packed, group, &embeddings[group_start..boundary], self.embedder.dimension());
                chunks.extend(packed);
            }
            group_start = boundary;
        }

        Ok(chunks)
    }

    fn estimate_chunks(&self, text_len: usize) -> usize {
        // Very rough estimate based on typical topic density
        (text_len / 1000).max(1)
    }
}

impl std::fmt::Debug for SemanticChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticChunker")
            .field("tokenizer", &self.tokenizer.name())
            .field("embedder", &self.embedder.name())
            .field("threshold", &self.threshold)
            .field("similarity_window", &self.similarity_window)
            .field("min_sentences", &self.min_sentences)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CharacterTokenizer;

    /// Deterministic test embedder: axis 0 for feline content, axis 1 for
    /// weather content, axis 2 otherwise.
    struct TopicEmbedder;

    impl Embedder for TopicEmbedder {
        fn name(&self) -> &str {
            "topic"
        }

        fn dimension(&self) -> usize {
            3
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            if lower.contains("cat") || lower.contains("kitten") {
                Ok(vec![1.0, 0.0, 0.0])
            } else if lower.contains("rain") || lower.contains("cloud") {
                Ok(vec![0.0, 1.0, 0.0])
            } else {
                Ok(vec![0.0, 0.0, 1.0])
            }
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            0
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embed {
                alias: "failing".to_string(),
                cause: "provider unavailable".to_string(),
            })
        }
    }

    fn chunker(size: usize, threshold: f32) -> SemanticChunker {
        SemanticChunker::new(Arc::new(CharacterTokenizer), Arc::new(TopicEmbedder), size, threshold)
            .unwrap()
    }

    #[test]
    fn test_splits_at_topic_shift() {
        let text = "The cat slept. The kitten played. Rain fell all day. Clouds gathered.";
        let chunks = chunker(200, 0.5).chunk(text).unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("kitten"));
        assert!(chunks[1].text.starts_with("Rain"));
    }

    #[test]
    fn test_chunks_are_exact_substrings() {
        let text = "The cat slept. Rain fell. More rain came down.";
        let chunks = chunker(200, 0.5).chunk(text).unwrap();

        for chunk in &chunks {
            assert_eq!(&text[chunk.span()], chunk.text);
        }
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_single_sentence_degenerates() {
        let text = "Just one sentence here.";
        let chunks = chunker(200, 0.5).chunk(text).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_tie_is_no_boundary() {
        // Identical embeddings give similarity 1.0; threshold 1.0 means the
        // comparison is an exact tie everywhere, so no boundary opens.
        let text = "The cat slept. The cat ate. The cat left.";
        let chunks = chunker(200, 1.0).chunk(text).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_group_respects_token_budget() {
        let text = "The cat slept on the mat. The cat chased a ball of yarn around. The kitten napped in the sun for hours.";
        let chunks = chunker(40, 0.5).chunk(text).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 40);
        }
    }

    #[test]
    fn test_min_sentences_suppresses_early_boundary() {
        let text = "The cat slept. Rain fell. Rain kept falling.";
        let chunks = chunker(200, 0.5).with_min_sentences(2).chunk(text).unwrap();

        // The shift after sentence 1 is suppressed; the group runs to the end
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_embeddings_attached() {
        let text = "The cat slept. The cat ate.";
        let chunks = chunker(200, 0.5).chunk(text).unwrap();

        let embedding = chunks[0].embedding.as_ref().unwrap();
        assert_eq!(embedding.len(), 3);
        assert!((embedding[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_embed_failure_propagates() {
        let chunker = SemanticChunker::new(
            Arc::new(CharacterTokenizer),
            Arc::new(FailingEmbedder),
            200,
            0.5,
        )
        .unwrap();
        let err = chunker.chunk("One sentence. Two sentences.").unwrap_err();
        assert!(matches!(err, Error::Embed { .. }));
    }

    #[test]
    fn test_threshold_validation() {
        let result = SemanticChunker::new(
            Arc::new(CharacterTokenizer),
            Arc::new(TopicEmbedder),
            200,
            1.5,
        );
        assert!(matches!(result, Err(Error::Threshold(_))));
    }

    #[test]
    fn test_empty_input() {
        assert!(chunker(200, 0.5).chunk("").unwrap().is_empty());
    }
}
