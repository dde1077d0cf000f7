//! The pipeline: a staged, validated, reusable composition runner.
//!
//! A pipeline composes up to five stages, executed in canonical order
//! regardless of declaration order:
//!
//! ```text
//! fetch (0..1) → process (0..1) → chunk (1) → refine (0..n) → export (0..1)
//! ```
//!
//! Steps are recorded by registry alias plus an options map, so a pipeline
//! is data: it can be described, serialized to JSON, and rebuilt from a
//! config file. Unknown aliases fail at declaration time; structural
//! validation (exactly one chunker, at most one chef/fetcher, some input)
//! runs when the pipeline does.
//!
//! ## Input precedence
//!
//! Direct text beats the fetcher: `run_text`/`run_texts` never invoke a
//! declared fetch step. The fetch stage only runs through `run` /
//! `run_async`.
//!
//! ## Reuse and caching
//!
//! A pipeline holds no per-run state and can be run many times. Component
//! instances are cached across runs keyed by `(kind, alias, options)`, so
//! an expensive component (say, a chunker holding an embedding model) is
//! built once. The cache is single-writer multiple-reader; concurrent runs
//! on one pipeline are fine as long as the components themselves are, and
//! all built-ins are.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::component::Fetched;
use crate::registry::{Component, ComponentKind, Registry, StepOptions};
use crate::{
    Chef as _, Chunker as _, Document, Error, Fetcher as _, Porter as _, Refinery as _, Result,
};

/// Stage of a pipeline step. Variant order is canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Produce (source, content) pairs from the outside world.
    Fetch,
    /// Normalize raw content into plain text.
    Process,
    /// Split text into chunks. Required, exactly once.
    Chunk,
    /// Transform the chunk sequence, in declaration order.
    Refine,
    /// Persist the final chunks.
    Export,
}

impl StepKind {
    /// Lowercase stage name, as used in config files and `describe`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Process => "process",
            Self::Chunk => "chunk",
            Self::Refine => "refine",
            Self::Export => "export",
        }
    }

    const fn component_kind(self) -> ComponentKind {
        match self {
            Self::Fetch => ComponentKind::Fetcher,
            Self::Process => ComponentKind::Chef,
            Self::Chunk => ComponentKind::Chunker,
            Self::Refine => ComponentKind::Refinery,
            Self::Export => ComponentKind::Porter,
        }
    }
}

/// One declared pipeline step: stage, component alias, options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// The stage this step belongs to.
    #[serde(rename = "type")]
    pub step_type: StepKind,
    /// Registry alias of the component.
    pub name: String,
    /// Factory options, primitives only.
    #[serde(default, skip_serializing_if = "StepOptions::is_empty")]
    pub options: StepOptions,
}

type CacheKey = (ComponentKind, String, String);

/// A staged chunking pipeline. See the [module docs](self) for the model.
///
/// ## Example
///
/// ```rust
/// use quarry::{Pipeline, StepOptions};
///
/// let mut opts = StepOptions::new();
/// opts.insert("chunk_size".to_string(), serde_json::json!(64));
///
/// let pipeline = Pipeline::new()
///     .process_with("text", StepOptions::new())?
///     .chunk_with("recursive", opts)?;
///
/// let doc = pipeline.run_text("First paragraph.\n\nSecond paragraph.")?;
/// assert!(!doc.chunks.is_empty());
/// # Ok::<(), quarry::Error>(())
/// ```
pub struct Pipeline {
    steps: Vec<StepConfig>,
    cache: RwLock<HashMap<CacheKey, Component>>,
    cancellation: Option<CancellationToken>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            cache: RwLock::new(HashMap::new()),
            cancellation: None,
        }
    }

    /// Rebuild a pipeline from declared steps, verifying every alias.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownComponent`] / [`Error::WrongComponentKind`] for
    /// aliases the registry doesn't know.
    pub fn from_steps(steps: Vec<StepConfig>) -> Result<Self> {
        let mut pipeline = Self::new();
        for step in steps {
            pipeline = pipeline.add_step(step.step_type, &step.name, step.options)?;
        }
        Ok(pipeline)
    }

    /// Load a pipeline from a JSON config file written by
    /// [`Pipeline::save_config`]. Reading is permissive: unknown keys in a
    /// step object are dropped with a warning.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for unreadable or malformed files, plus alias
    /// verification errors as in [`Pipeline::from_steps`].
    pub fn from_config(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid JSON in {}: {e}", path.display())))?;
        let items = value
            .as_array()
            .ok_or_else(|| Error::Config("config must be an array of steps".to_string()))?;

        let mut steps = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if let Some(object) = item.as_object() {
                for key in object.keys() {
                    if !matches!(key.as_str(), "type" | "name" | "options") {
                        tracing::warn!(step = index, key = %key, "ignoring unknown config key");
                    }
                }
            }
            let step: StepConfig = serde_json::from_value(item.clone())
                .map_err(|e| Error::Config(format!("invalid step {index}: {e}")))?;
            steps.push(step);
        }

        Self::from_steps(steps)
    }

    /// Declare the fetch step. Fetcher-specific options (typically `path`
    /// and `pattern`) travel in `options`.
    ///
    /// # Errors
    ///
    /// Alias verification errors, at declaration time.
    pub fn fetch_from(self, name: &str, options: StepOptions) -> Result<Self> {
        self.add_step(StepKind::Fetch, name, options)
    }

    /// Declare the process step.
    ///
    /// # Errors
    ///
    /// Alias verification errors, at declaration time.
    pub fn process_with(self, name: &str, options: StepOptions) -> Result<Self> {
        self.add_step(StepKind::Process, name, options)
    }

    /// Declare the chunk step.
    ///
    /// # Errors
    ///
    /// Alias verification errors, at declaration time.
    pub fn chunk_with(self, name: &str, options: StepOptions) -> Result<Self> {
        self.add_step(StepKind::Chunk, name, options)
    }

    /// Declare a refine step. Multiple refine steps run in declaration
    /// order.
    ///
    /// # Errors
    ///
    /// Alias verification errors, at declaration time.
    pub fn refine_with(self, name: &str, options: StepOptions) -> Result<Self> {
        self.add_step(StepKind::Refine, name, options)
    }

    /// Declare the export step, persisting chunks to `path`.
    ///
    /// # Errors
    ///
    /// Alias verification errors, at declaration time.
    pub fn export_to(self, name: &str, path: &str, mut options: StepOptions) -> Result<Self> {
        options.insert("path".to_string(), serde_json::Value::String(path.to_string()));
        self.add_step(StepKind::Export, name, options)
    }

    /// Attach a cancellation token honored by the async run methods.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Clear all declared steps and cached component instances. The
    /// pipeline object itself stays reusable.
    pub fn reset(&mut self) {
        self.steps.clear();
        self.cache.write().expect("cache lock poisoned").clear();
    }

    fn add_step(mut self, kind: StepKind, name: &str, options: StepOptions) -> Result<Self> {
        Registry::global().verify(kind.component_kind(), name)?;
        self.steps.push(StepConfig {
            step_type: kind,
            name: name.to_string(),
            options,
        });
        Ok(self)
    }

    /// Steps in canonical CHOMP order. The sort is stable, so refine steps
    /// keep their declaration order.
    fn canonical_steps(&self) -> Vec<&StepConfig> {
        let mut steps: Vec<&StepConfig> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.step_type);
        steps
    }

    fn validate(&self, has_direct_input: bool) -> Result<()> {
        let count = |kind| self.steps.iter().filter(|s| s.step_type == kind).count();

        let chunkers = count(StepKind::Chunk);
        if chunkers == 0 {
            return Err(Error::MissingChunker);
        }
        if chunkers > 1 {
            return Err(Error::Config(format!(
                "pipeline has {chunkers} chunk steps (exactly 1 required)"
            )));
        }

        let processors = count(StepKind::Process);
        if processors > 1 {
            return Err(Error::MultipleProcessors(processors));
        }

        let fetchers = count(StepKind::Fetch);
        if fetchers > 1 {
            return Err(Error::MultipleFetchers(fetchers));
        }
        if !has_direct_input && fetchers == 0 {
            return Err(Error::NoInput);
        }

        Ok(())
    }

    /// Build (or fetch from cache) the component instance for a step.
    fn component(&self, step: &StepConfig) -> Result<Component> {
        let kind = step.step_type.component_kind();
        let options_key =
            serde_json::to_string(&step.options).map_err(|e| Error::Config(e.to_string()))?;
        let key = (kind, step.name.to_lowercase(), options_key);

        if let Some(found) = self.cache.read().expect("cache lock poisoned").get(&key) {
            return Ok(found.clone());
        }

        let built = Registry::global().build(kind, &step.name, &step.options)?;
        self.cache
            .write()
            .expect("cache lock poisoned")
            .insert(key, built.clone());
        Ok(built)
    }

    fn ensure_live(&self, stage: &'static str) -> Result<()> {
        match &self.cancellation {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled(stage)),
            _ => Ok(()),
        }
    }

    /// Run the chef, chunker, and refineries over one document in place.
    /// Failures are logged with the step index before propagating, so a
    /// caller retrying a partial pipeline knows where it stopped.
    fn process_document(&self, doc: &mut Document) -> Result<()> {
        for (index, step) in self.canonical_steps().into_iter().enumerate() {
            let failed = |e: &Error| {
                tracing::error!(step = index, component = %step.name, error = %e, "stage failed");
            };
            match step.step_type {
                StepKind::Fetch | StepKind::Export => {}
                StepKind::Process => {
                    let Component::Chef(chef) = self.component(step)? else {
                        unreachable!("registry verified the kind");
                    };
                    doc.content = chef.process(&doc.content);
                }
                StepKind::Chunk => {
                    self.ensure_live("chunk")?;
                    let Component::Chunker(chunker) = self.component(step)? else {
                        unreachable!("registry verified the kind");
                    };
                    doc.chunks = chunker.chunk(&doc.content).inspect_err(failed)?;
                    tracing::debug!(
                        chunker = %step.name,
                        chunks = doc.chunks.len(),
                        bytes = doc.content.len(),
                        "chunk stage complete"
                    );
                }
                StepKind::Refine => {
                    self.ensure_live("refine")?;
                    let Component::Refinery(refinery) = self.component(step)? else {
                        unreachable!("registry verified the kind");
                    };
                    doc.chunks = refinery
                        .refine(std::mem::take(&mut doc.chunks))
                        .inspect_err(failed)?;
                }
            }
        }
        Ok(())
    }

    fn documents_from_texts(texts: &[&str]) -> Vec<Document> {
        texts.iter().map(|t| Document::new(*t)).collect()
    }

    fn documents_from_fetched(items: Vec<Fetched>) -> Vec<Document> {
        items
            .into_iter()
            .map(|item| {
                let mut doc = Document::new(item.content);
                doc.source = item.source;
                doc.metadata = item.metadata;
                doc
            })
            .collect()
    }

    fn fetch_step(&self) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.step_type == StepKind::Fetch)
    }

    fn export_step(&self) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.step_type == StepKind::Export)
    }

    fn fetch_args(step: &StepConfig) -> (&str, Option<&str>) {
        let path = step.options.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let pattern = step.options.get("pattern").and_then(|v| v.as_str());
        (path, pattern)
    }

    fn export_path(step: &StepConfig) -> &str {
        step.options.get("path").and_then(|v| v.as_str()).unwrap_or("")
    }

    fn export_documents(&self, docs: &[Document]) -> Result<()> {
        let Some(step) = self.export_step() else {
            return Ok(());
        };
        let Component::Porter(porter) = self.component(step)? else {
            unreachable!("registry verified the kind");
        };
        for doc in docs {
            porter.export(&doc.chunks, Self::export_path(step))?;
        }
        tracing::info!(porter = %step.name, documents = docs.len(), "export stage complete");
        Ok(())
    }

    /// Run over a single text. The fetch stage, if declared, is bypassed:
    /// direct text wins.
    ///
    /// # Errors
    ///
    /// Validation errors, then any stage failure.
    pub fn run_text(&self, text: &str) -> Result<Document> {
        let mut docs = self.run_texts(&[text])?;
        Ok(docs.remove(0))
    }

    /// Run over a batch of texts, preserving input order. The fetch stage,
    /// if declared, is bypassed: direct text wins.
    ///
    /// # Errors
    ///
    /// Validation errors, then any stage failure.
    pub fn run_texts(&self, texts: &[&str]) -> Result<Vec<Document>> {
        self.validate(true)?;

        let mut docs = Self::documents_from_texts(texts);
        for doc in &mut docs {
            self.process_document(doc)?;
        }
        self.export_documents(&docs)?;
        Ok(docs)
    }

    /// Run with input from the declared fetch step.
    ///
    /// # Errors
    ///
    /// [`Error::NoInput`] without a fetch step; otherwise validation
    /// errors, then any stage failure.
    pub fn run(&self) -> Result<Vec<Document>> {
        self.validate(false)?;

        let step = self.fetch_step().expect("validated above");
        let Component::Fetcher(fetcher) = self.component(step)? else {
            unreachable!("registry verified the kind");
        };
        let (path, pattern) = Self::fetch_args(step);
        let fetched = fetcher.fetch(path, pattern)?;
        tracing::debug!(fetcher = %step.name, items = fetched.len(), "fetch stage complete");

        let mut docs = Self::documents_from_fetched(fetched);
        for doc in &mut docs {
            self.process_document(doc)?;
        }
        self.export_documents(&docs)?;
        Ok(docs)
    }

    /// Async [`Pipeline::run_text`]: suspends at the export boundary and
    /// honors the attached cancellation token.
    ///
    /// # Errors
    ///
    /// As [`Pipeline::run_text`], plus [`Error::Cancelled`].
    pub async fn run_text_async(&self, text: &str) -> Result<Document> {
        let mut docs = self.run_texts_async(&[text]).await?;
        Ok(docs.remove(0))
    }

    /// Async [`Pipeline::run_texts`].
    ///
    /// # Errors
    ///
    /// As [`Pipeline::run_texts`], plus [`Error::Cancelled`].
    pub async fn run_texts_async(&self, texts: &[&str]) -> Result<Vec<Document>> {
        self.validate(true)?;

        let mut docs = Self::documents_from_texts(texts);
        for doc in &mut docs {
            self.process_document(doc)?;
        }
        self.export_documents_async(&docs).await?;
        Ok(docs)
    }

    /// Async [`Pipeline::run`]: suspends at the fetch and export
    /// boundaries and honors the attached cancellation token.
    ///
    /// # Errors
    ///
    /// As [`Pipeline::run`], plus [`Error::Cancelled`].
    pub async fn run_async(&self) -> Result<Vec<Document>> {
        self.validate(false)?;

        let step = self.fetch_step().expect("validated above");
        let Component::Fetcher(fetcher) = self.component(step)? else {
            unreachable!("registry verified the kind");
        };
        let (path, pattern) = Self::fetch_args(step);

        let fetched = match &self.cancellation {
            Some(token) => tokio::select! {
                () = token.cancelled() => return Err(Error::Cancelled("fetch")),
                result = fetcher.fetch_async(path, pattern) => result?,
            },
            None => fetcher.fetch_async(path, pattern).await?,
        };

        let mut docs = Self::documents_from_fetched(fetched);
        for doc in &mut docs {
            self.process_document(doc)?;
        }
        self.export_documents_async(&docs).await?;
        Ok(docs)
    }

    async fn export_documents_async(&self, docs: &[Document]) -> Result<()> {
        let Some(step) = self.export_step() else {
            return Ok(());
        };
        self.ensure_live("export")?;
        let Component::Porter(porter) = self.component(step)? else {
            unreachable!("registry verified the kind");
        };

        for doc in docs {
            match &self.cancellation {
                Some(token) => tokio::select! {
                    () = token.cancelled() => return Err(Error::Cancelled("export")),
                    result = porter.export_async(&doc.chunks, Self::export_path(step)) => result?,
                },
                None => porter.export_async(&doc.chunks, Self::export_path(step)).await?,
            }
        }
        Ok(())
    }

    /// Human-readable summary of the pipeline in canonical order.
    #[must_use]
    pub fn describe(&self) -> String {
        let steps = self.canonical_steps();
        let mut out = format!("Pipeline ({} steps):\n", steps.len());
        for (i, step) in steps.iter().enumerate() {
            out.push_str(&format!(
                "  {}. {}: {}",
                i + 1,
                step.step_type.as_str(),
                step.name
            ));
            if !step.options.is_empty() {
                let options = serde_json::to_string(&step.options).unwrap_or_default();
                out.push_str(&format!(" {options}"));
            }
            out.push('\n');
        }
        out
    }

    /// The declared steps in canonical order, as serializable data.
    #[must_use]
    pub fn to_config(&self) -> Vec<StepConfig> {
        self.canonical_steps().into_iter().cloned().collect()
    }

    /// Write the step list as pretty-printed JSON. Options maps serialize
    /// with sorted keys, so output is deterministic.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the file cannot be written.
    pub fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.to_config())
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| Error::Config(format!("cannot write {}: {e}", path.display())))
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("steps", &self.steps).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, serde_json::Value)]) -> StepOptions {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_canonical_order_ignores_declaration_order() {
        let p = Pipeline::new()
            .refine_with("overlap", StepOptions::new())
            .unwrap()
            .chunk_with("recursive", StepOptions::new())
            .unwrap()
            .process_with("text", StepOptions::new())
            .unwrap();

        let kinds: Vec<StepKind> = p.canonical_steps().iter().map(|s| s.step_type).collect();
        assert_eq!(kinds, vec![StepKind::Process, StepKind::Chunk, StepKind::Refine]);
    }

    #[test]
    fn test_unknown_alias_fails_at_declaration() {
        let err = Pipeline::new()
            .chunk_with("no-such-chunker", StepOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownComponent { .. }));
    }

    #[test]
    fn test_missing_chunker() {
        let p = Pipeline::new().process_with("text", StepOptions::new()).unwrap();
        assert!(matches!(p.run_text("hi").unwrap_err(), Error::MissingChunker));
    }

    #[test]
    fn test_multiple_processors() {
        let p = Pipeline::new()
            .process_with("text", StepOptions::new())
            .unwrap()
            .process_with("text", StepOptions::new())
            .unwrap()
            .chunk_with("recursive", StepOptions::new())
            .unwrap();
        assert!(matches!(
            p.run_text("hi").unwrap_err(),
            Error::MultipleProcessors(2)
        ));
    }

    #[test]
    fn test_no_input() {
        let p = Pipeline::new().chunk_with("recursive", StepOptions::new()).unwrap();
        assert!(matches!(p.run().unwrap_err(), Error::NoInput));
    }

    #[test]
    fn test_run_text_produces_document() {
        let p = Pipeline::new()
            .chunk_with("recursive", opts(&[("chunk_size", serde_json::json!(16))]))
            .unwrap();

        let text = "First paragraph.\n\nSecond paragraph here.";
        let doc = p.run_text(text).unwrap();

        assert_eq!(doc.content, text);
        assert!(!doc.chunks.is_empty());
        let rebuilt: String = doc.chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_batch_preserves_input_order() {
        let p = Pipeline::new().chunk_with("recursive", StepOptions::new()).unwrap();
        let docs = p.run_texts(&["alpha", "beta", "gamma"]).unwrap();

        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].content, "alpha");
        assert_eq!(docs[1].content, "beta");
        assert_eq!(docs[2].content, "gamma");
    }

    #[test]
    fn test_describe_lists_canonical_order() {
        let p = Pipeline::new()
            .chunk_with("recursive", opts(&[("chunk_size", serde_json::json!(512))]))
            .unwrap()
            .process_with("text", StepOptions::new())
            .unwrap();

        let description = p.describe();
        let process_at = description.find("process: text").unwrap();
        let chunk_at = description.find("chunk: recursive").unwrap();
        assert!(process_at < chunk_at);
    }

    #[test]
    fn test_reset_clears_steps() {
        let mut p = Pipeline::new().chunk_with("recursive", StepOptions::new()).unwrap();
        p.reset();
        assert!(matches!(p.run_text("hi").unwrap_err(), Error::MissingChunker));
    }
}
