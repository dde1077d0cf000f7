//! # quarry
//!
//! Text chunking for retrieval-augmented generation (RAG) pipelines.
//!
//! ## The Problem
//!
//! Language models have context windows. Documents don't fit. You need to
//! split them into pieces ("chunks") small enough to embed and retrieve,
//! but large enough to preserve meaning.
//!
//! This sounds trivial—just split every N tokens, right? But consider:
//!
//! - A sentence split mid-word is garbage
//! - A paragraph split mid-argument loses coherence
//! - Overlap is needed for context continuity, but how much?
//! - A chunk embedded without its surrounding context loses referents
//!
//! The right chunking strategy depends on your content and retrieval
//! needs—and a real ingestion job is more than one chunker call: fetch,
//! normalize, chunk, refine, export, reproducibly. quarry covers both: a
//! family of chunkers behind one trait, and a pipeline that composes them
//! from named, serializable steps.
//!
//! ## Chunking Strategies
//!
//! ### Token Windows (Baseline)
//!
//! Slide a fixed window over token IDs with overlap.
//!
//! ```text
//! Document: "Hello world. This is a test."   (character tokens)
//! Size: 10, Overlap: 2
//!
//! Chunk 0: "Hello worl"  [0..10]
//! Chunk 1: "ld. This i"  [8..18]   <- overlap preserves "ld"
//! Chunk 2: "s is a tes"  [16..26]
//! Chunk 3: "est."        [24..28]
//! ```
//!
//! **When to use**: Homogeneous content, strict model limits, baselines.
//! **Weakness**: Ignores linguistic boundaries—splits mid-sentence.
//!
//! ### Sentence Packing
//!
//! Detect sentence boundaries, then greedily pack whole sentences up to
//! the token budget. Boundary detection is the hard part:
//! "Dr. Smith went to Washington D.C. on Jan. 15th." is one sentence, not
//! four. A rule-based splitter with an abbreviation list handles that.
//!
//! **When to use**: Prose, articles, documentation.
//! **Weakness**: A single very long sentence becomes an oversized chunk.
//!
//! ### Recursive (Separator Hierarchy)
//!
//! Try splitting on paragraph breaks first. Too big? Lines. Then
//! sentences, then words, then characters as a last resort.
//!
//! ```text
//! Separators: ["\n\n", "\n", ". ", " ", ""]
//! ```
//!
//! **When to use**: General-purpose, mixed content.
//! **Weakness**: Separator hierarchy is heuristic, not semantic.
//!
//! ### Semantic (Embedding Similarity)
//!
//! Embed each sentence, smooth adjacent-pair similarities over a window,
//! split where similarity drops below a threshold, then pack each group
//! under the budget.
//!
//! **When to use**: When topic coherence matters more than size
//! uniformity. **Weakness**: Needs an embedding model; threshold is a
//! hyperparameter.
//!
//! ### Late Chunking
//!
//! Embed the whole document once (token-level), chunk by sentence packing,
//! then mean-pool each chunk's token vectors. Every chunk embedding sees
//! the full document's context.
//!
//! **When to use**: Chunks that reference each other (pronouns, acronyms).
//! **Weakness**: Needs token-level embeddings and span-reporting
//! tokenizers.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use quarry::{
//!     CharacterTokenizer, Chunker, RecursiveChunker, SentenceChunker, TokenChunker, Tokenizer,
//! };
//!
//! let text = "The quick brown fox jumps over the lazy dog. \
//!             Pack my box with five dozen liquor jugs.";
//! let tokenizer: Arc<dyn Tokenizer> = Arc::new(CharacterTokenizer);
//!
//! // Token windows
//! let chunker = TokenChunker::new(Arc::clone(&tokenizer), 50, 10)?;
//! let chunks = chunker.chunk(text)?;
//!
//! // Sentence packing
//! let chunker = SentenceChunker::new(Arc::clone(&tokenizer), 50)?;
//! let chunks = chunker.chunk(text)?;
//!
//! // Recursive with the default separator hierarchy
//! let chunker = RecursiveChunker::new(tokenizer, 50)?;
//! let chunks = chunker.chunk(text)?;
//! # Ok::<(), quarry::Error>(())
//! ```
//!
//! ## Pipelines
//!
//! A pipeline composes fetch → process → chunk → refine → export from
//! registry aliases, validates at run time, and round-trips through JSON
//! config:
//!
//! ```rust
//! use quarry::{Pipeline, StepOptions};
//!
//! let mut size = StepOptions::new();
//! size.insert("chunk_size".to_string(), serde_json::json!(512));
//!
//! let pipeline = Pipeline::new()
//!     .process_with("text", StepOptions::new())?
//!     .chunk_with("recursive", size)?
//!     .refine_with("overlap", StepOptions::new())?;
//!
//! let doc = pipeline.run_text("Long document text...")?;
//! # Ok::<(), quarry::Error>(())
//! ```
//!
//! Steps may be declared in any order; execution always canonicalizes to
//! fetch → process → chunk → refine → export.
//!
//! ## Guarantees
//!
//! - Offsets are UTF-8 byte offsets; `source[start..end] == chunk.text`
//!   for every chunk of every chunker.
//! - Chunks are ordered by start offset.
//! - The token, recursive, sentence, and semantic chunkers are
//!   coverage-preserving: concatenating their chunk texts in order
//!   reproduces the source byte-for-byte (the token chunker, minus its
//!   deliberate overlaps).
//! - `token_count` is the active tokenizer's count over exactly `text`.

mod chunk;
mod component;
mod embedding;
mod error;
mod late;
mod pipeline;
mod recursive;
mod refinery;
mod registry;
mod semantic;
mod sentence;
mod token;
mod tokenizer;

pub use chunk::{Chunk, Document};
pub use component::{Chef, Fetched, Fetcher, Porter, TextChef};
pub use embedding::{Embedder, TokenEmbedder};
pub use error::{Error, Result};
pub use late::LateChunker;
pub use pipeline::{Pipeline, StepConfig, StepKind};
pub use recursive::{RecursiveChunker, DEFAULT_SEPARATORS};
pub use refinery::{EmbeddingsRefinery, OverlapMode, OverlapRefinery, Refinery};
pub use registry::{
    register_chef, register_chunker, register_fetcher, register_porter, register_refinery,
    Component, ComponentKind, Registry, StepOptions,
};
pub use semantic::SemanticChunker;
pub use sentence::{Sentence, SentenceChunker, SentenceSplitter};
pub use token::TokenChunker;
pub use tokenizer::{CharacterTokenizer, FnTokenizer, Tokenizer, WordTokenizer};

/// A text chunking strategy.
///
/// All chunkers implement this trait, enabling polymorphic usage:
///
/// ```rust
/// use std::sync::Arc;
/// use quarry::{
///     CharacterTokenizer, Chunk, Chunker, RecursiveChunker, SentenceChunker, Tokenizer,
/// };
///
/// fn chunk_document(chunker: &dyn Chunker, text: &str) -> quarry::Result<Vec<Chunk>> {
///     chunker.chunk(text)
/// }
///
/// let tokenizer: Arc<dyn Tokenizer> = Arc::new(CharacterTokenizer);
/// let recursive = RecursiveChunker::new(Arc::clone(&tokenizer), 100)?;
/// let sentence = SentenceChunker::new(tokenizer, 100)?;
///
/// let text = "Hello world. This is a test.";
/// let chunks1 = chunk_document(&recursive, text)?;
/// let chunks2 = chunk_document(&sentence, text)?;
/// # Ok::<(), quarry::Error>(())
/// ```
///
/// `chunk` is a pure function of `(text, configuration)`: no internal
/// state, no I/O except through collaborators the chunker was built with,
/// and an eagerly computed, start-offset-ordered result.
pub trait Chunker: Send + Sync {
    /// Split text into chunks.
    ///
    /// Each chunk is a [`Chunk`] carrying the exact source substring, its
    /// byte offsets in the original text, and its token count.
    ///
    /// # Errors
    ///
    /// Parameter and tokenizer-capability errors, plus collaborator
    /// failures for the embedding-backed chunkers.
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>>;

    /// Chunk a batch of texts independently, preserving input order.
    ///
    /// # Errors
    ///
    /// The first failing text's error.
    fn chunk_batch(&self, texts: &[&str]) -> Result<Vec<Vec<Chunk>>> {
        texts.iter().map(|t| self.chunk(t)).collect()
    }

    /// Estimate the number of chunks for a given text length.
    ///
    /// Useful for pre-allocation. May be approximate.
    fn estimate_chunks(&self, text_len: usize) -> usize {
        // Conservative default
        (text_len / 500).max(1)
    }
}
