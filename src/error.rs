//! Error types for quarry.

/// Errors that can occur during chunking or pipeline execution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid chunk size (must be > 0).
    #[error("invalid chunk size: {0} (must be > 0)")]
    ChunkSize(usize),

    /// Overlap must be smaller than the chunk size.
    #[error("overlap {overlap} must be < chunk size {size}")]
    Overlap {
        /// The chunk size.
        size: usize,
        /// The overlap that was too large.
        overlap: usize,
    },

    /// Similarity threshold outside `[0, 1]`.
    #[error("similarity threshold {0} must be within [0, 1]")]
    Threshold(f32),

    /// Input was empty where a component requires content.
    #[error("empty input")]
    EmptyInput,

    /// The tokenizer cannot encode/decode losslessly.
    #[error("tokenizer '{0}' does not support lossless encode/decode")]
    TokenizerRoundTrip(String),

    /// The tokenizer cannot report per-token byte ranges.
    #[error("tokenizer '{0}' does not report per-token byte ranges")]
    AlignmentUnsupported(String),

    /// No component registered under the given alias.
    #[error("unknown {kind} component: '{alias}'")]
    UnknownComponent {
        /// The component kind that was looked up.
        kind: &'static str,
        /// The alias as the caller wrote it.
        alias: String,
    },

    /// A component exists under the alias, but with a different kind.
    #[error("component '{alias}' is a {actual}, not a {expected}")]
    WrongComponentKind {
        /// The alias as the caller wrote it.
        alias: String,
        /// The kind the caller asked for.
        expected: &'static str,
        /// The kind actually registered.
        actual: &'static str,
    },

    /// An alias is already registered with a different factory.
    #[error("alias '{0}' is already registered with a different factory")]
    DuplicateAlias(String),

    /// A pipeline was run without a chunk step.
    #[error("pipeline has no chunk step")]
    MissingChunker,

    /// A pipeline declared more than one process step.
    #[error("pipeline has {0} process steps (at most 1 allowed)")]
    MultipleProcessors(usize),

    /// A pipeline declared more than one fetch step.
    #[error("pipeline has {0} fetch steps (at most 1 allowed)")]
    MultipleFetchers(usize),

    /// Neither a fetcher nor direct text provided pipeline input.
    #[error("pipeline has no input: provide texts or a fetch step")]
    NoInput,

    /// The pipeline run was cancelled before completing.
    #[error("pipeline run cancelled during the {0} stage")]
    Cancelled(&'static str),

    /// A fetcher failed.
    #[error("fetcher '{alias}' failed: {cause}")]
    Fetch {
        /// The fetcher's registry alias.
        alias: String,
        /// The underlying failure.
        cause: String,
    },

    /// An embedding model failed.
    #[error("embedder '{alias}' failed: {cause}")]
    Embed {
        /// The embedding model's name.
        alias: String,
        /// The underlying failure.
        cause: String,
    },

    /// A porter failed to export.
    #[error("porter '{alias}' failed: {cause}")]
    Export {
        /// The porter's registry alias.
        alias: String,
        /// The underlying failure.
        cause: String,
    },

    /// A pipeline config file could not be read or parsed.
    #[error("pipeline config error: {0}")]
    Config(String),
}

/// Result type for quarry operations.
pub type Result<T> = std::result::Result<T, Error>;
