//! The Chunk and Document types: text with position metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A chunk of text with its position in the original document.
///
/// Each chunk is a self-contained piece that can be embedded, indexed, and
/// retrieved independently.
///
/// ## Byte Offsets
///
/// `start_index` and `end_index` are byte offsets into the original text,
/// not character indices. This matches Rust's string slicing semantics:
///
/// ```rust
/// use quarry::Chunk;
///
/// let text = "Hello, world!";
/// let chunk = Chunk::new("world", 7, 12, 1);
///
/// // The offsets let you recover the original position
/// assert_eq!(&text[chunk.start_index..chunk.end_index], "world");
/// ```
///
/// ## Optional Fields
///
/// `context` holds neighboring text injected by a refinery; `embedding`
/// holds a dense vector attached by the semantic/late chunkers or the
/// embeddings refinery. Both are omitted from serialized output when
/// absent, so a chunk round-trips through JSON unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Opaque identifier, unique within a run.
    pub id: String,
    /// The exact substring captured from the source.
    pub text: String,
    /// Byte offset where this chunk starts in the original document.
    pub start_index: usize,
    /// Byte offset where this chunk ends (exclusive) in the original document.
    pub end_index: usize,
    /// Token count over exactly `text`, per the chunker's tokenizer.
    pub token_count: usize,
    /// Neighboring context injected by a refinery; never part of `text`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Dense embedding vector, when a component attached one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Create a new chunk with a fresh id.
    #[must_use]
    pub fn new(text: impl Into<String>, start_index: usize, end_index: usize, token_count: usize) -> Self {
        Self {
            id: chunk_id(),
            text: text.into(),
            start_index,
            end_index,
            token_count,
            context: None,
            embedding: None,
        }
    }

    /// The length of this chunk in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether this chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The byte span of this chunk in the original document.
    #[must_use]
    pub fn span(&self) -> std::ops::Range<usize> {
        self.start_index..self.end_index
    }
}

impl std::fmt::Display for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Chunk {{ id: {}, span: {}..{}, tokens: {} }}",
            self.id, self.start_index, self.end_index, self.token_count
        )
    }
}

/// A chunked document, the pipeline's unit of return.
///
/// Created by the pipeline when input enters; `chunks` is populated after
/// the chunk stage and replaced (never mutated in place) by each refinery.
/// Once returned, the document is owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque identifier, unique within a run.
    pub id: String,
    /// The full source text as it entered the chunker.
    pub content: String,
    /// The ordered chunk sequence.
    pub chunks: Vec<Chunk>,
    /// Free-form metadata produced by the fetcher or chef.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Origin descriptor, e.g. a path or URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Document {
    /// Create a document around source content, with no chunks yet.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: doc_id(),
            content: content.into(),
            chunks: Vec::new(),
            metadata: BTreeMap::new(),
            source: None,
        }
    }
}

fn chunk_id() -> String {
    format!("chnk_{}", uuid::Uuid::new_v4().simple())
}

fn doc_id() -> String {
    format!("doc_{}", uuid::Uuid::new_v4().simple())
}
