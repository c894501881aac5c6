//! End-to-end pipeline tests: load, chunk, embed, store, retrieve, answer,
//! all in-process against a file-backed SQLite database and local providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ragspace::chunk::Chunker;
use ragspace::config::Config;
use ragspace::coordinator::QueryCoordinator;
use ragspace::embedding::{EmbeddingProvider, HashEmbeddings};
use ragspace::error::RagError;
use ragspace::llm::EchoChat;
use ragspace::store::SpaceStore;
use ragspace::{db, ingest};

struct Harness {
    _dir: tempfile::TempDir,
    config: Config,
    store: Arc<SpaceStore>,
    chunker: Chunker,
}

async fn harness() -> Harness {
    harness_with_embedder(Arc::new(HashEmbeddings::new(64))).await
}

async fn harness_with_embedder(embedder: Arc<dyn EmbeddingProvider>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::minimal(dir.path().join("store.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    let store = Arc::new(SpaceStore::new(
        pool,
        embedder,
        config.store.protected_space.clone(),
    ));
    let chunker = Chunker::new(&config.chunking);
    Harness {
        _dir: dir,
        config,
        store,
        chunker,
    }
}

fn write_file(h: &Harness, name: &str, content: &str) -> std::path::PathBuf {
    let path = h._dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn csv_rows_are_retrievable_by_value() {
    let h = harness().await;
    let path = write_file(&h, "feeds.csv", "col1,col2\nval1,val2\nval3,val4");

    let units = ingest::ingest_file(&h.store, &h.chunker, "demo", &path)
        .await
        .unwrap();
    assert_eq!(units, 2);

    let results = h.store.similarity_search("demo", "val1", 1).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].text.contains("col1: val1"));
    assert_eq!(
        results[0].metadata.get("is_structured"),
        Some(&serde_json::json!(true))
    );
}

#[tokio::test]
async fn table_feed_line_yields_extracted_fields() {
    let h = harness().await;
    let path = write_file(
        &h,
        "catalog.txt",
        "File Name   Description   Format\n\
         loyalty_members.daily  CSV  SFTP  SFTP/loyalty/members  8 PM Daily  Incremental  AnnexCloud",
    );

    ingest::ingest_file(&h.store, &h.chunker, "feeds", &path)
        .await
        .unwrap();

    let results = h
        .store
        .similarity_search("feeds", "AnnexCloud loyalty members", 1)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let fields = results[0]
        .metadata
        .get("fields")
        .and_then(|f| f.as_object())
        .expect("table unit carries extracted fields");
    assert_eq!(fields.get("system"), Some(&serde_json::json!("AnnexCloud")));
    assert_eq!(fields.get("type"), Some(&serde_json::json!("Incremental")));
    assert_eq!(
        results[0].metadata.get("file_type"),
        Some(&serde_json::json!("table"))
    );
    assert!(results[0].text.starts_with("Data Source Information:"));
}

#[tokio::test]
async fn spaces_stay_isolated_across_files() {
    let h = harness().await;
    let a = write_file(&h, "a.txt", "alpha loyalty notes");
    let b = write_file(&h, "b.txt", "beta weather notes");

    ingest::ingest_file(&h.store, &h.chunker, "alpha", &a)
        .await
        .unwrap();
    ingest::ingest_file(&h.store, &h.chunker, "beta", &b)
        .await
        .unwrap();

    let hits = h
        .store
        .similarity_search("beta", "alpha loyalty notes", 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text.contains("weather"));
}

#[tokio::test]
async fn default_space_survives_delete_attempts() {
    let h = harness().await;
    let path = write_file(&h, "keep.txt", "precious content");
    ingest::ingest_file(&h.store, &h.chunker, "default", &path)
        .await
        .unwrap();

    let err = h.store.delete_space("default").await.unwrap_err();
    assert!(matches!(err, RagError::ProtectedSpace(_)));
    assert_eq!(h.store.count_units("default").await.unwrap(), 1);

    // Other spaces still delete normally, and again idempotently.
    h.store.delete_space("scratch").await.unwrap();
    h.store.delete_space("scratch").await.unwrap();
}

#[tokio::test]
async fn querying_a_missing_space_is_safe() {
    let h = harness().await;
    let results = h
        .store
        .similarity_search("never_created", "anything", 5)
        .await
        .unwrap();
    assert!(results.is_empty());

    // The same space still works normally once content arrives.
    let path = write_file(&h, "late.txt", "late arriving content");
    ingest::ingest_file(&h.store, &h.chunker, "never_created", &path)
        .await
        .unwrap();
    let results = h
        .store
        .similarity_search("never_created", "late arriving content", 5)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

/// Wraps a real provider and counts embed calls, to prove rejected files
/// never reach the embedding stage.
struct CountingEmbeddings {
    inner: HashEmbeddings,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for CountingEmbeddings {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> ragspace::error::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(texts).await
    }
}

#[tokio::test]
async fn unsupported_files_never_reach_the_embedder() {
    let counting = Arc::new(CountingEmbeddings {
        inner: HashEmbeddings::new(64),
        calls: AtomicUsize::new(0),
    });
    let h = harness_with_embedder(counting.clone()).await;

    let path = h._dir.path().join("weights.bin");
    std::fs::write(&path, [0u8; 16]).unwrap();

    let err = ingest::ingest_file(&h.store, &h.chunker, "demo", &path)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::UnsupportedFormat(_)));
    assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn full_query_path_prepends_generated_answer() {
    let h = harness().await;
    let path = write_file(&h, "facts.txt", "feed lands nightly");
    ingest::ingest_file(&h.store, &h.chunker, "default", &path)
        .await
        .unwrap();

    let coordinator = QueryCoordinator::new(h.store.clone(), Arc::new(EchoChat), h.config.retrieval.k);
    let results = coordinator
        .query("default", "when does the feed land?")
        .await
        .unwrap();

    assert!(results.len() >= 2);
    assert_eq!(
        results[0].metadata.get("generated"),
        Some(&serde_json::json!(true))
    );
    assert_eq!(results[0].text, "feed lands nightly");
    // Supporting passages follow the answer, scored in [0, 1].
    assert!(results[1..]
        .iter()
        .all(|r| (0.0..=1.0).contains(&r.score)));
}

#[tokio::test]
async fn coordinator_refuses_empty_spaces_and_blank_questions() {
    let h = harness().await;
    let coordinator = QueryCoordinator::new(h.store.clone(), Arc::new(EchoChat), 3);

    let err = coordinator.query("empty_space", "hello?").await.unwrap_err();
    assert!(matches!(err, RagError::SpaceNotReady(_)));

    let path = write_file(&h, "some.txt", "content");
    ingest::ingest_file(&h.store, &h.chunker, "filled", &path)
        .await
        .unwrap();
    let err = coordinator.query("filled", "  \n ").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
}

#[tokio::test]
async fn directory_ingestion_reports_and_ranks() {
    let h = harness().await;
    let docs = h._dir.path().join("docs");
    std::fs::create_dir(&docs).unwrap();
    std::fs::write(docs.join("one.txt"), "billing notes one").unwrap();
    std::fs::write(docs.join("two.md"), "shipping notes two").unwrap();
    std::fs::write(docs.join("blob.dat"), [1u8, 2, 3]).unwrap();

    let report = ingest::ingest_directory(&h.store, &h.chunker, &h.config, "default", &docs)
        .await
        .unwrap();
    assert_eq!(report.files_ingested, 2);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.units_added, 2);

    let results = h
        .store
        .similarity_search("default", "shipping notes", 2)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].text.contains("shipping"));
    assert!(results[0].score >= results[1].score);
}
