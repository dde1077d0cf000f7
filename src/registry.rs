//! The component registry: alias → factory, partitioned by kind.
//!
//! The registry is the crate's only process-wide singleton. It is
//! populated once, deterministically, with the built-in components, and
//! callers may add their own factories before running a pipeline (the
//! usual reason: a semantic or late chunker with a captured embedding
//! model).
//!
//! Aliases are case-insensitive: they are stored lowercased, with the
//! original casing preserved for diagnostics. Registration is idempotent —
//! re-registering an alias with the same factory identity is a no-op,
//! while a different factory under a taken alias is an error.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, RwLock};

use crate::component::{Chef, Fetcher, Porter, TextChef};
use crate::{
    CharacterTokenizer, Chunker, Error, OverlapMode, OverlapRefinery, RecursiveChunker, Refinery,
    Result, SentenceChunker, TokenChunker, Tokenizer, WordTokenizer,
};

/// Options passed to a component factory: primitive name→value pairs.
/// `BTreeMap` keeps serialized configs deterministically ordered.
pub type StepOptions = BTreeMap<String, serde_json::Value>;

/// The five component kinds a pipeline composes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentKind {
    /// Produces (source, content) pairs from the outside world.
    Fetcher,
    /// Normalizes raw content into plain text.
    Chef,
    /// Splits text into chunks.
    Chunker,
    /// Post-processes the chunk sequence.
    Refinery,
    /// Persists the final chunks.
    Porter,
}

impl ComponentKind {
    /// Lowercase kind name for messages and config files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetcher => "fetcher",
            Self::Chef => "chef",
            Self::Chunker => "chunker",
            Self::Refinery => "refinery",
            Self::Porter => "porter",
        }
    }

    const ALL: [Self; 5] = [
        Self::Fetcher,
        Self::Chef,
        Self::Chunker,
        Self::Refinery,
        Self::Porter,
    ];
}

/// A built component instance, shared by `Arc` so the pipeline's cache can
/// hand the same instance to concurrent runs.
#[derive(Clone)]
pub enum Component {
    /// A fetcher instance.
    Fetcher(Arc<dyn Fetcher>),
    /// A chef instance.
    Chef(Arc<dyn Chef>),
    /// A chunker instance.
    Chunker(Arc<dyn Chunker>),
    /// A refinery instance.
    Refinery(Arc<dyn Refinery>),
    /// A porter instance.
    Porter(Arc<dyn Porter>),
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fetcher(_) => "Fetcher",
            Self::Chef(_) => "Chef",
            Self::Chunker(_) => "Chunker",
            Self::Refinery(_) => "Refinery",
            Self::Porter(_) => "Porter",
        };
        f.debug_tuple(name).finish()
    }
}

type BuildFn = Arc<dyn Fn(&StepOptions) -> Result<Component> + Send + Sync>;

struct Factory {
    /// Stable identity used for idempotent re-registration.
    id: String,
    /// The alias as originally registered, for diagnostics.
    display_alias: String,
    build: BuildFn,
}

/// Name-indexed component factory store.
pub struct Registry {
    entries: RwLock<BTreeMap<(ComponentKind, String), Factory>>,
}

impl Registry {
    fn empty() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// The process-wide registry, with built-ins installed.
    pub fn global() -> &'static Self {
        static GLOBAL: LazyLock<Registry> = LazyLock::new(|| {
            let registry = Registry::empty();
            install_builtins(&registry);
            registry
        });
        &GLOBAL
    }

    /// Register a factory under `(kind, alias)`.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateAlias`] if the alias is taken by a factory with a
    /// different `id`. Re-registering the same `id` is a no-op.
    pub fn register<F>(&self, kind: ComponentKind, alias: &str, id: &str, build: F) -> Result<()>
    where
        F: Fn(&StepOptions) -> Result<Component> + Send + Sync + 'static,
    {
        let key = (kind, alias.to_lowercase());
        let mut entries = self.entries.write().expect("registry lock poisoned");

        if let Some(existing) = entries.get(&key) {
            if existing.id == id {
                return Ok(());
            }
            return Err(Error::DuplicateAlias(alias.to_string()));
        }

        entries.insert(
            key,
            Factory {
                id: id.to_string(),
                display_alias: alias.to_string(),
                build: Arc::new(build),
            },
        );
        Ok(())
    }

    /// Check that `alias` is registered under `kind`.
    ///
    /// # Errors
    ///
    /// [`Error::WrongComponentKind`] if the alias exists under another
    /// kind; [`Error::UnknownComponent`] if it exists nowhere.
    pub fn verify(&self, kind: ComponentKind, alias: &str) -> Result<()> {
        let lowered = alias.to_lowercase();
        let entries = self.entries.read().expect("registry lock poisoned");

        if entries.contains_key(&(kind, lowered.clone())) {
            return Ok(());
        }

        for other in ComponentKind::ALL {
            if other != kind {
                if let Some(factory) = entries.get(&(other, lowered.clone())) {
                    return Err(Error::WrongComponentKind {
                        alias: factory.display_alias.clone(),
                        expected: kind.as_str(),
                        actual: other.as_str(),
                    });
                }
            }
        }

        Err(Error::UnknownComponent {
            kind: kind.as_str(),
            alias: alias.to_string(),
        })
    }

    /// Build a component instance from its registered factory.
    ///
    /// # Errors
    ///
    /// Lookup errors as in [`Registry::verify`], plus whatever the factory
    /// itself returns for bad options.
    pub fn build(&self, kind: ComponentKind, alias: &str, options: &StepOptions) -> Result<Component> {
        self.verify(kind, alias)?;

        let build = {
            let entries = self.entries.read().expect("registry lock poisoned");
            Arc::clone(
                &entries
                    .get(&(kind, alias.to_lowercase()))
                    .expect("verified above")
                    .build,
            )
        };
        build(options)
    }
}

/// Register a chunker factory in the global registry.
///
/// # Errors
///
/// [`Error::DuplicateAlias`] as in [`Registry::register`].
pub fn register_chunker<F>(alias: &str, id: &str, build: F) -> Result<()>
where
    F: Fn(&StepOptions) -> Result<Arc<dyn Chunker>> + Send + Sync + 'static,
{
    Registry::global().register(ComponentKind::Chunker, alias, id, move |opts| {
        Ok(Component::Chunker(build(opts)?))
    })
}

/// Register a refinery factory in the global registry.
///
/// # Errors
///
/// [`Error::DuplicateAlias`] as in [`Registry::register`].
pub fn register_refinery<F>(alias: &str, id: &str, build: F) -> Result<()>
where
    F: Fn(&StepOptions) -> Result<Arc<dyn Refinery>> + Send + Sync + 'static,
{
    Registry::global().register(ComponentKind::Refinery, alias, id, move |opts| {
        Ok(Component::Refinery(build(opts)?))
    })
}

/// Register a fetcher factory in the global registry.
///
/// # Errors
///
/// [`Error::DuplicateAlias`] as in [`Registry::register`].
pub fn register_fetcher<F>(alias: &str, id: &str, build: F) -> Result<()>
where
    F: Fn(&StepOptions) -> Result<Arc<dyn Fetcher>> + Send + Sync + 'static,
{
    Registry::global().register(ComponentKind::Fetcher, alias, id, move |opts| {
        Ok(Component::Fetcher(build(opts)?))
    })
}

/// Register a chef factory in the global registry.
///
/// # Errors
///
/// [`Error::DuplicateAlias`] as in [`Registry::register`].
pub fn register_chef<F>(alias: &str, id: &str, build: F) -> Result<()>
where
    F: Fn(&StepOptions) -> Result<Arc<dyn Chef>> + Send + Sync + 'static,
{
    Registry::global().register(ComponentKind::Chef, alias, id, move |opts| {
        Ok(Component::Chef(build(opts)?))
    })
}

/// Register a porter factory in the global registry.
///
/// # Errors
///
/// [`Error::DuplicateAlias`] as in [`Registry::register`].
pub fn register_porter<F>(alias: &str, id: &str, build: F) -> Result<()>
where
    F: Fn(&StepOptions) -> Result<Arc<dyn Porter>> + Send + Sync + 'static,
{
    Registry::global().register(ComponentKind::Porter, alias, id, move |opts| {
        Ok(Component::Porter(build(opts)?))
    })
}

// ---------------------------------------------------------------------------
// Option parsing for built-in factories
// ---------------------------------------------------------------------------

fn opt_usize(opts: &StepOptions, key: &str, default: usize) -> Result<usize> {
    match opts.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| Error::Config(format!("option '{key}' must be a non-negative integer"))),
    }
}

fn opt_bool(opts: &StepOptions, key: &str, default: bool) -> Result<bool> {
    match opts.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_bool()
            .ok_or_else(|| Error::Config(format!("option '{key}' must be a boolean"))),
    }
}

fn opt_str<'a>(opts: &'a StepOptions, key: &str, default: &'a str) -> Result<&'a str> {
    match opts.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_str()
            .ok_or_else(|| Error::Config(format!("option '{key}' must be a string"))),
    }
}

fn tokenizer_option(opts: &StepOptions) -> Result<Arc<dyn Tokenizer>> {
    match opt_str(opts, "tokenizer", "character")? {
        "character" => Ok(Arc::new(CharacterTokenizer)),
        "word" => Ok(Arc::new(WordTokenizer)),
        other => Err(Error::Config(format!(
            "unknown tokenizer '{other}' (expected 'character' or 'word')"
        ))),
    }
}

fn separators_option(opts: &StepOptions) -> Result<Option<Vec<String>>> {
    let Some(value) = opts.get("separators") else {
        return Ok(None);
    };
    let items = value
        .as_array()
        .ok_or_else(|| Error::Config("option 'separators' must be an array of strings".to_string()))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::Config("option 'separators' must be an array of strings".to_string()))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn overlap_mode_option(opts: &StepOptions) -> Result<OverlapMode> {
    match opt_str(opts, "mode", "prefix")? {
        "prefix" => Ok(OverlapMode::Prefix),
        "suffix" => Ok(OverlapMode::Suffix),
        "both" => Ok(OverlapMode::Both),
        "merge" => Ok(OverlapMode::Merge),
        other => Err(Error::Config(format!(
            "unknown overlap mode '{other}' (expected 'prefix', 'suffix', 'both', or 'merge')"
        ))),
    }
}

/// Install the built-in components. Deterministic: the same set, under the
/// same aliases, every process.
fn install_builtins(registry: &Registry) {
    let register = |kind, alias: &str, id: &str, build: BuildFn| {
        registry
            .register(kind, alias, id, move |opts| build(opts))
            .expect("fresh registry cannot have duplicates");
    };

    register(
        ComponentKind::Chunker,
        "token",
        "builtin:token",
        Arc::new(|opts: &StepOptions| {
            let chunker = TokenChunker::new(
                tokenizer_option(opts)?,
                opt_usize(opts, "chunk_size", 512)?,
                opt_usize(opts, "chunk_overlap", 0)?,
            )?;
            Ok(Component::Chunker(Arc::new(chunker)))
        }),
    );

    register(
        ComponentKind::Chunker,
        "sentence",
        "builtin:sentence",
        Arc::new(|opts: &StepOptions| {
            let chunker = SentenceChunker::new(tokenizer_option(opts)?, opt_usize(opts, "chunk_size", 512)?)?
                .with_min_sentences(opt_usize(opts, "min_sentences", 1)?)
                .approximate(opt_bool(opts, "approximate", true)?);
            Ok(Component::Chunker(Arc::new(chunker)))
        }),
    );

    register(
        ComponentKind::Chunker,
        "recursive",
        "builtin:recursive",
        Arc::new(|opts: &StepOptions| {
            let mut chunker =
                RecursiveChunker::new(tokenizer_option(opts)?, opt_usize(opts, "chunk_size", 512)?)?;
            if let Some(separators) = separators_option(opts)? {
                let refs: Vec<&str> = separators.iter().map(String::as_str).collect();
                chunker = chunker.with_separators(&refs);
            }
            Ok(Component::Chunker(Arc::new(chunker)))
        }),
    );

    register(
        ComponentKind::Refinery,
        "overlap",
        "builtin:overlap",
        Arc::new(|opts: &StepOptions| {
            let context_size = match opts.get("context_size") {
                Some(_) => opt_usize(opts, "context_size", 64)?,
                None => opt_usize(opts, "min_overlap", 64)?,
            };
            let refinery =
                OverlapRefinery::new(tokenizer_option(opts)?, overlap_mode_option(opts)?, context_size);
            Ok(Component::Refinery(Arc::new(refinery)))
        }),
    );

    register(
        ComponentKind::Chef,
        "text",
        "builtin:text",
        Arc::new(|_opts: &StepOptions| Ok(Component::Chef(Arc::new(TextChef)))),
    );
}
