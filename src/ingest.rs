//! File and directory ingestion into a space.
//!
//! `ingest_file` runs the whole per-file pipeline: format dispatch, text
//! extraction, structure-aware chunking, and a single batched write to the
//! store. `ingest_directory` walks a tree with include/exclude globs and
//! ingests every supported file it finds, skipping (with a warning) files
//! that fail individually so one bad document cannot sink a batch.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::error::{RagError, Result};
use crate::loader;
use crate::store::SpaceStore;

/// Outcome of a directory ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files_ingested: usize,
    pub files_skipped: usize,
    pub units_added: usize,
}

/// Ingests one file into a space. Returns the number of units written.
pub async fn ingest_file(
    store: &SpaceStore,
    chunker: &Chunker,
    space: &str,
    path: &Path,
) -> Result<usize> {
    let raw_docs = loader::load_raw(path)?;

    let units: Vec<_> = raw_docs
        .iter()
        .flat_map(|doc| chunker.chunk(doc))
        .map(Into::into)
        .collect();

    if units.is_empty() {
        info!(path = %path.display(), "no retrievable units produced");
        return Ok(0);
    }

    let ids = store.add_documents(space, units).await?;
    info!(path = %path.display(), space, units = ids.len(), "file ingested");
    Ok(ids.len())
}

/// Walks a directory and ingests every supported file matching the globs.
///
/// Unsupported extensions and per-file failures (including embedding
/// errors triggered by one file's content) are logged and counted as
/// skips; only store-level and walk-level errors abort the run.
pub async fn ingest_directory(
    store: &SpaceStore,
    chunker: &Chunker,
    config: &Config,
    space: &str,
    root: &Path,
) -> Result<IngestReport> {
    if !root.is_dir() {
        return Err(RagError::InvalidInput(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.ingest.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(config.ingest.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut paths = Vec::new();
    let walker = WalkDir::new(root).follow_links(config.ingest.follow_symlinks);
    for entry in walker {
        let entry = entry.map_err(|e| RagError::InvalidInput(format!("walk: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    // Deterministic ingestion order
    paths.sort();

    let mut report = IngestReport::default();
    for path in paths {
        if !loader::is_supported(&path) {
            report.files_skipped += 1;
            continue;
        }
        match ingest_file(store, chunker, space, &path).await {
            Ok(units) => {
                report.files_ingested += 1;
                report.units_added += units;
            }
            Err(e @ RagError::StoreFailed(_)) => {
                // Store trouble will hit every file; abort.
                return Err(e);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping file");
                report.files_skipped += 1;
            }
        }
    }

    info!(
        space,
        files = report.files_ingested,
        skipped = report.files_skipped,
        units = report.units_added,
        "directory ingested"
    );
    Ok(report)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder
            .add(Glob::new(pattern).map_err(|e| RagError::Config(format!("glob: {e}")))?);
    }
    builder
        .build()
        .map_err(|e| RagError::Config(format!("glob set: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::{EmbeddingProvider, HashEmbeddings};
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn test_store() -> SpaceStore {
        test_store_with(Arc::new(HashEmbeddings::new(64))).await
    }

    async fn test_store_with(embedder: Arc<dyn EmbeddingProvider>) -> SpaceStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SpaceStore::new(pool, embedder, "default")
    }

    /// Rejects any batch containing the marker text, the way a provider
    /// rejects one file's oversized or malformed content.
    struct RejectingEmbeddings {
        inner: HashEmbeddings,
        marker: &'static str,
    }

    #[async_trait]
    impl EmbeddingProvider for RejectingEmbeddings {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains(self.marker)) {
                return Err(RagError::EmbeddingFailed("api error 400".to_string()));
            }
            self.inner.embed(texts).await
        }
    }

    #[tokio::test]
    async fn ingest_file_writes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "short note").unwrap();

        let store = test_store().await;
        let config = Config::minimal("unused.sqlite");
        let chunker = Chunker::new(&config.chunking);

        let units = ingest_file(&store, &chunker, "demo", &file).await.unwrap();
        assert_eq!(units, 1);
        assert_eq!(store.count_units("demo").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ingest_file_rejects_unknown_extension() {
        let store = test_store().await;
        let config = Config::minimal("unused.sqlite");
        let chunker = Chunker::new(&config.chunking);

        let err = ingest_file(&store, &chunker, "demo", Path::new("model.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn directory_walk_skips_unsupported_and_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha content").unwrap();
        std::fs::write(dir.path().join("b.md"), "beta content").unwrap();
        std::fs::write(dir.path().join("c.bin"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir(dir.path().join("skip")).unwrap();
        std::fs::write(dir.path().join("skip/d.txt"), "excluded").unwrap();

        let store = test_store().await;
        let mut config = Config::minimal("unused.sqlite");
        config.ingest.exclude_globs = vec!["skip/**".to_string()];
        let chunker = Chunker::new(&config.chunking);

        let report = ingest_directory(&store, &chunker, &config, "demo", dir.path())
            .await
            .unwrap();
        assert_eq!(report.files_ingested, 2);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(store.count_units("demo").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn one_rejected_file_does_not_sink_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_bad.txt"), "poison payload").unwrap();
        std::fs::write(dir.path().join("z_good.txt"), "good note").unwrap();

        let store = test_store_with(Arc::new(RejectingEmbeddings {
            inner: HashEmbeddings::new(64),
            marker: "poison",
        }))
        .await;
        let config = Config::minimal("unused.sqlite");
        let chunker = Chunker::new(&config.chunking);

        let report = ingest_directory(&store, &chunker, &config, "demo", dir.path())
            .await
            .unwrap();
        assert_eq!(report.files_ingested, 1);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(store.count_units("demo").await.unwrap(), 1);

        let hits = store.similarity_search("demo", "good note", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("good"));
    }

    #[tokio::test]
    async fn directory_must_exist() {
        let store = test_store().await;
        let config = Config::minimal("unused.sqlite");
        let chunker = Chunker::new(&config.chunking);

        let err = ingest_directory(&store, &chunker, &config, "demo", Path::new("/no/such/dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }
}
