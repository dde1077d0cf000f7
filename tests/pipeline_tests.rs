//! Pipeline composition, validation, config round-trip, and async tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use quarry::{
    register_fetcher, register_porter, Chunk, Error, Fetched, Fetcher, Pipeline, Porter, Result,
    StepOptions,
};
use tokio_util::sync::CancellationToken;

fn opts(pairs: &[(&str, serde_json::Value)]) -> StepOptions {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Compare documents by visible chunk content, ignoring the opaque ids.
fn same_chunks(a: &[Chunk], b: &[Chunk]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.text == y.text
                && x.span() == y.span()
                && x.token_count == y.token_count
                && x.context == y.context
        })
}

// =============================================================================
// Declaration order independence
// =============================================================================

#[test]
fn reorder_independence() {
    let size = opts(&[("chunk_size", serde_json::json!(20))]);
    let text = "First paragraph of the document.\n\nSecond paragraph, somewhat longer than the first.";

    let p1 = Pipeline::new()
        .process_with("text", StepOptions::new())
        .unwrap()
        .chunk_with("recursive", size.clone())
        .unwrap();
    let p2 = Pipeline::new()
        .chunk_with("recursive", size)
        .unwrap()
        .process_with("text", StepOptions::new())
        .unwrap();

    let d1 = p1.run_text(text).unwrap();
    let d2 = p2.run_text(text).unwrap();

    assert_eq!(d1.content, d2.content);
    assert!(same_chunks(&d1.chunks, &d2.chunks));
}

#[test]
fn reorder_independence_with_refineries() {
    let size = opts(&[("chunk_size", serde_json::json!(16))]);
    let overlap = opts(&[("context_size", serde_json::json!(5))]);
    let text = "One sentence here. Another sentence there. A third one follows.";

    let p1 = Pipeline::new()
        .process_with("text", StepOptions::new())
        .unwrap()
        .chunk_with("sentence", size.clone())
        .unwrap()
        .refine_with("overlap", overlap.clone())
        .unwrap();
    let p2 = Pipeline::new()
        .refine_with("overlap", overlap)
        .unwrap()
        .chunk_with("sentence", size)
        .unwrap()
        .process_with("text", StepOptions::new())
        .unwrap();

    let d1 = p1.run_text(text).unwrap();
    let d2 = p2.run_text(text).unwrap();
    assert!(same_chunks(&d1.chunks, &d2.chunks));
}

// =============================================================================
// Config round-trip
// =============================================================================

#[test]
fn config_round_trip_describes_identically() {
    let p = Pipeline::new()
        .process_with("text", StepOptions::new())
        .unwrap()
        .chunk_with("recursive", opts(&[("chunk_size", serde_json::json!(512))]))
        .unwrap()
        .refine_with("overlap", opts(&[("context_size", serde_json::json!(50))]))
        .unwrap();

    let rebuilt = Pipeline::from_steps(p.to_config()).unwrap();
    assert_eq!(p.describe(), rebuilt.describe());
}

#[test]
fn config_file_round_trip() {
    let p = Pipeline::new()
        .chunk_with("sentence", opts(&[("chunk_size", serde_json::json!(128))]))
        .unwrap()
        .refine_with("overlap", opts(&[("mode", serde_json::json!("both"))]))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    p.save_config(&path).unwrap();

    let rebuilt = Pipeline::from_config(&path).unwrap();
    assert_eq!(p.describe(), rebuilt.describe());

    // Saved config is deterministic
    let first = std::fs::read_to_string(&path).unwrap();
    rebuilt.save_config(&path).unwrap();
    let second = std::fs::read_to_string(&path).unwrap();
    assert_eq!(first, second);
}

#[test]
fn config_reading_ignores_unknown_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(
        &path,
        r#"[
            {"type": "chunk", "name": "recursive", "options": {"chunk_size": 64}, "comment": "ignored"}
        ]"#,
    )
    .unwrap();

    let pipeline = Pipeline::from_config(&path).unwrap();
    let doc = pipeline.run_text("Some text to chunk.").unwrap();
    assert!(!doc.chunks.is_empty());
}

#[test]
fn config_with_unknown_alias_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(&path, r#"[{"type": "chunk", "name": "nope"}]"#).unwrap();

    assert!(matches!(
        Pipeline::from_config(&path).unwrap_err(),
        Error::UnknownComponent { .. }
    ));
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn multiple_fetchers_rejected() {
    struct Nop;
    impl Fetcher for Nop {
        fn fetch(&self, _path: &str, _pattern: Option<&str>) -> Result<Vec<Fetched>> {
            Ok(vec![])
        }
    }
    register_fetcher("nop-fetch", "test:nop-fetch", |_| Ok(Arc::new(Nop))).unwrap();

    let p = Pipeline::new()
        .fetch_from("nop-fetch", StepOptions::new())
        .unwrap()
        .fetch_from("nop-fetch", StepOptions::new())
        .unwrap()
        .chunk_with("recursive", StepOptions::new())
        .unwrap();

    assert!(matches!(p.run().unwrap_err(), Error::MultipleFetchers(2)));
}

// =============================================================================
// Fetch and export stages
// =============================================================================

struct StaticFetcher;

impl Fetcher for StaticFetcher {
    fn fetch(&self, path: &str, _pattern: Option<&str>) -> Result<Vec<Fetched>> {
        let mut metadata = BTreeMap::new();
        metadata.insert("origin".to_string(), serde_json::json!(path));
        Ok(vec![
            Fetched {
                source: Some(format!("{path}/a.txt")),
                content: "Alpha document. It has two sentences.".to_string(),
                metadata: metadata.clone(),
            },
            Fetched {
                source: Some(format!("{path}/b.txt")),
                content: "Beta document follows.".to_string(),
                metadata,
            },
        ])
    }
}

#[derive(Default)]
struct CollectingPorter {
    exports: Mutex<Vec<(String, usize)>>,
}

impl Porter for CollectingPorter {
    fn export(&self, chunks: &[Chunk], path: &str) -> Result<()> {
        self.exports
            .lock()
            .unwrap()
            .push((path.to_string(), chunks.len()));
        Ok(())
    }
}

#[test]
fn fetch_stage_populates_documents() {
    register_fetcher("static-docs", "test:static-docs", |_| Ok(Arc::new(StaticFetcher))).unwrap();

    let p = Pipeline::new()
        .fetch_from("static-docs", opts(&[("path", serde_json::json!("/corpus"))]))
        .unwrap()
        .chunk_with("sentence", opts(&[("chunk_size", serde_json::json!(64))]))
        .unwrap();

    let docs = p.run().unwrap();

    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].source.as_deref(), Some("/corpus/a.txt"));
    assert_eq!(docs[1].source.as_deref(), Some("/corpus/b.txt"));
    assert_eq!(docs[0].metadata["origin"], serde_json::json!("/corpus"));
    assert!(!docs[0].chunks.is_empty());
}

#[test]
fn direct_text_bypasses_fetcher() {
    register_fetcher("static-unused", "test:static-unused", |_| Ok(Arc::new(StaticFetcher)))
        .unwrap();

    let p = Pipeline::new()
        .fetch_from("static-unused", StepOptions::new())
        .unwrap()
        .chunk_with("recursive", StepOptions::new())
        .unwrap();

    let doc = p.run_text("Direct input wins.").unwrap();
    assert_eq!(doc.content, "Direct input wins.");
}

#[test]
fn export_stage_receives_chunks() {
    let sink = Arc::new(CollectingPorter::default());
    let captured = Arc::clone(&sink);
    register_porter("collect-sync", "test:collect-sync", move |_| {
        Ok(Arc::clone(&captured) as _)
    })
    .unwrap();

    let p = Pipeline::new()
        .chunk_with("recursive", opts(&[("chunk_size", serde_json::json!(16))]))
        .unwrap()
        .export_to("collect-sync", "/out/chunks.json", StepOptions::new())
        .unwrap();

    let doc = p.run_text("First part.\n\nSecond part of the text.").unwrap();

    let exports = sink.exports.lock().unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].0, "/out/chunks.json");
    assert_eq!(exports[0].1, doc.chunks.len());
}

// =============================================================================
// Async runs and cancellation
// =============================================================================

#[tokio::test]
async fn run_async_matches_sync() {
    let p = Pipeline::new()
        .chunk_with("sentence", opts(&[("chunk_size", serde_json::json!(32))]))
        .unwrap();

    let text = "Async one. Async two. Async three.";
    let sync_doc = p.run_text(text).unwrap();
    let async_doc = p.run_text_async(text).await.unwrap();

    assert!(same_chunks(&sync_doc.chunks, &async_doc.chunks));
}

#[tokio::test]
async fn run_async_uses_fetcher() {
    register_fetcher("static-async", "test:static-async", |_| Ok(Arc::new(StaticFetcher)))
        .unwrap();

    let p = Pipeline::new()
        .fetch_from("static-async", opts(&[("path", serde_json::json!("/corpus"))]))
        .unwrap()
        .chunk_with("recursive", StepOptions::new())
        .unwrap();

    let docs = p.run_async().await.unwrap();
    assert_eq!(docs.len(), 2);
}

#[tokio::test]
async fn cancellation_stops_before_fetch() {
    /// Fetch never completes; only cancellation can end the run.
    struct HangingFetcher;

    #[async_trait::async_trait]
    impl Fetcher for HangingFetcher {
        fn fetch(&self, _path: &str, _pattern: Option<&str>) -> Result<Vec<Fetched>> {
            Ok(vec![])
        }

        async fn fetch_async(&self, _path: &str, _pattern: Option<&str>) -> Result<Vec<Fetched>> {
            std::future::pending().await
        }
    }

    register_fetcher("hanging", "test:hanging", |_| Ok(Arc::new(HangingFetcher))).unwrap();

    let token = CancellationToken::new();
    token.cancel();

    let p = Pipeline::new()
        .fetch_from("hanging", StepOptions::new())
        .unwrap()
        .chunk_with("recursive", StepOptions::new())
        .unwrap()
        .with_cancellation(token);

    assert!(matches!(p.run_async().await.unwrap_err(), Error::Cancelled("fetch")));
}

#[tokio::test]
async fn cancellation_discards_export() {
    let sink = Arc::new(CollectingPorter::default());
    let captured = Arc::clone(&sink);
    register_porter("collect-cancel", "test:collect-cancel", move |_| {
        Ok(Arc::clone(&captured) as _)
    })
    .unwrap();

    let token = CancellationToken::new();
    token.cancel();

    let p = Pipeline::new()
        .chunk_with("recursive", StepOptions::new())
        .unwrap()
        .export_to("collect-cancel", "/out", StepOptions::new())
        .unwrap()
        .with_cancellation(token);

    let err = p.run_text_async("some text").await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert!(sink.exports.lock().unwrap().is_empty());
}

// =============================================================================
// Reuse
// =============================================================================

#[test]
fn pipeline_is_reusable_across_runs() {
    let p = Pipeline::new()
        .chunk_with("recursive", opts(&[("chunk_size", serde_json::json!(32))]))
        .unwrap();

    let first = p.run_text("Same input text, run twice.").unwrap();
    let second = p.run_text("Same input text, run twice.").unwrap();

    assert!(same_chunks(&first.chunks, &second.chunks));
    // Ids are opaque and fresh per run
    assert_ne!(first.id, second.id);
}
