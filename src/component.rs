//! Pipeline collaborator contracts: fetchers, chefs, and porters.
//!
//! These are the pipeline's I/O boundaries. Their implementations live
//! outside this crate (file systems, object stores, databases); the core
//! only defines the contracts and surfaces their failures as typed errors
//! carrying the collaborator's alias.
//!
//! Each I/O trait pairs a synchronous method with an async variant that
//! defaults to calling the sync one. Blocking implementations write the
//! sync method and get the async shell for free; async-native
//! implementations override the async variant to suspend at their network
//! calls, and the pipeline's `run_async` path picks that up.

use std::collections::BTreeMap;

use crate::{Chunk, Result};

/// One item produced by a fetcher.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    /// Origin descriptor, e.g. a path or URL.
    pub source: Option<String>,
    /// The raw content.
    pub content: String,
    /// Metadata to carry onto the resulting document.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Produces (source, content) pairs from the outside world.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch items under `path`, optionally filtered by `pattern`.
    ///
    /// # Errors
    ///
    /// Surfaced as [`Error::Fetch`](crate::Error::Fetch) with this
    /// fetcher's alias attached.
    fn fetch(&self, path: &str, pattern: Option<&str>) -> Result<Vec<Fetched>>;

    /// Async variant; defaults to the synchronous [`Fetcher::fetch`].
    ///
    /// # Errors
    ///
    /// As [`Fetcher::fetch`].
    async fn fetch_async(&self, path: &str, pattern: Option<&str>) -> Result<Vec<Fetched>> {
        self.fetch(path, pattern)
    }
}

/// Normalizes raw content into plain text. Pure: same input, same output,
/// no I/O.
pub trait Chef: Send + Sync {
    /// Transform raw content into the text the chunker will see.
    fn process(&self, content: &str) -> String;
}

/// Persists the final chunk sequence somewhere.
#[async_trait::async_trait]
pub trait Porter: Send + Sync {
    /// Export `chunks` to `path`.
    ///
    /// # Errors
    ///
    /// Surfaced as [`Error::Export`](crate::Error::Export) with this
    /// porter's alias attached.
    fn export(&self, chunks: &[Chunk], path: &str) -> Result<()>;

    /// Async variant; defaults to the synchronous [`Porter::export`].
    ///
    /// # Errors
    ///
    /// As [`Porter::export`].
    async fn export_async(&self, chunks: &[Chunk], path: &str) -> Result<()> {
        self.export(chunks, path)
    }
}

/// Built-in chef: line-ending and tab normalization.
///
/// Registered under the alias `text`. Converts `\r\n` and bare `\r` to
/// `\n` and tabs to single spaces, leaving everything else alone. Pure and
/// idempotent, so running it twice changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextChef;

impl Chef for TextChef {
    fn process(&self, content: &str) -> String {
        content
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .replace('\t', " ")
    }
}
