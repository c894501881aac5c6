//! Multi-space vector store over a single SQLite database.
//!
//! Each space is an isolated named collection, stored as its own table
//! `space_<name>`. Space names are validated against `^[a-z0-9_]{1,64}$`
//! before ever reaching SQL, which makes the identifier interpolation in
//! the statements below safe and keeps the table-name transform reversible.
//!
//! Failure discipline: reads against a missing space soft-fail (empty
//! results), other read errors are [`RagError::RetrievalFailed`], write
//! errors are [`RagError::StoreFailed`]. Deleting the protected space is
//! refused; deleting a missing space is a no-op.

use regex::Regex;
use sqlx::{Row, SqlitePool};
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::models::{DocumentInput, Metadata, RetrievalResult};

const TABLE_PREFIX: &str = "space_";

static SPACE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9_]{1,64}$").unwrap());

/// Rejects names that cannot serve as a space identifier.
pub fn validate_space_name(name: &str) -> Result<()> {
    if SPACE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(RagError::InvalidInput(format!(
            "invalid space name '{name}': must match [a-z0-9_]{{1,64}}"
        )))
    }
}

fn space_table(name: &str) -> String {
    format!("{TABLE_PREFIX}{name}")
}

fn space_from_table(table: &str) -> Option<&str> {
    table.strip_prefix(TABLE_PREFIX)
}

/// The vector store: embedding provider plus the shared SQLite pool.
pub struct SpaceStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    protected_space: String,
}

impl SpaceStore {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
        protected_space: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            embedder,
            protected_space: protected_space.into(),
        }
    }

    /// Creates the space's table if it does not exist yet.
    pub async fn ensure_space(&self, space: &str) -> Result<()> {
        validate_space_name(space)?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL
            )",
            space_table(space)
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| RagError::StoreFailed(format!("create space '{space}': {e}")))?;
        Ok(())
    }

    /// Adds documents to a space, creating it on first write.
    ///
    /// Inputs are resolved to units, whitespace-only units dropped, and the
    /// whole batch embedded in one provider call before a single insert
    /// transaction. Returns the generated unit ids in input order.
    pub async fn add_documents(
        &self,
        space: &str,
        inputs: Vec<DocumentInput>,
    ) -> Result<Vec<String>> {
        self.ensure_space(space).await?;

        let units: Vec<_> = inputs
            .into_iter()
            .map(DocumentInput::into_unit)
            .filter(|u| !u.text.trim().is_empty())
            .collect();
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = units.iter().map(|u| u.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != units.len() {
            return Err(RagError::EmbeddingFailed(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                units.len()
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RagError::StoreFailed(format!("begin: {e}")))?;

        let sql = format!(
            "INSERT INTO {} (id, text, metadata, embedding, created_at) VALUES (?, ?, ?, ?, ?)",
            space_table(space)
        );
        let now = chrono::Utc::now().to_rfc3339();
        let mut ids = Vec::with_capacity(units.len());

        for (unit, vector) in units.iter().zip(vectors.iter()) {
            let id = Uuid::new_v4().to_string();
            let metadata_json = serde_json::to_string(&unit.metadata)
                .map_err(|e| RagError::StoreFailed(format!("metadata encode: {e}")))?;
            sqlx::query(&sql)
                .bind(&id)
                .bind(&unit.text)
                .bind(&metadata_json)
                .bind(vec_to_blob(vector))
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(|e| RagError::StoreFailed(format!("insert into '{space}': {e}")))?;
            ids.push(id);
        }

        tx.commit()
            .await
            .map_err(|e| RagError::StoreFailed(format!("commit: {e}")))?;

        Ok(ids)
    }

    /// Top-k cosine search within one space.
    ///
    /// A missing space yields an empty result set rather than an error, and
    /// a syntactically invalid name can never denote an existing space, so
    /// it soft-fails the same way. Scores are normalized to `[0, 1]`:
    /// cosine `c` maps to `(1 + c) / 2`, and results come back sorted by
    /// score, highest first.
    pub async fn similarity_search(
        &self,
        space: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        if validate_space_name(space).is_err() {
            return Ok(Vec::new());
        }
        if !self.space_exists(space).await? {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_one(query).await?;

        let sql = format!(
            "SELECT id, text, metadata, embedding FROM {}",
            space_table(space)
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RagError::RetrievalFailed(format!("scan space '{space}': {e}")))?;

        let mut results: Vec<RetrievalResult> = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row
                .try_get("id")
                .map_err(|e| RagError::RetrievalFailed(format!("row decode: {e}")))?;
            let text: String = row
                .try_get("text")
                .map_err(|e| RagError::RetrievalFailed(format!("row decode: {e}")))?;
            let metadata_json: String = row
                .try_get("metadata")
                .map_err(|e| RagError::RetrievalFailed(format!("row decode: {e}")))?;
            let blob: Vec<u8> = row
                .try_get("embedding")
                .map_err(|e| RagError::RetrievalFailed(format!("row decode: {e}")))?;

            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .map_err(|e| RagError::RetrievalFailed(format!("metadata decode: {e}")))?;

            let cosine = cosine_similarity(&query_vec, &blob_to_vec(&blob));
            let score = (1.0 + f64::from(cosine)) / 2.0;

            results.push(RetrievalResult {
                id,
                text,
                metadata,
                score,
            });
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);
        Ok(results)
    }

    /// Names of all existing spaces, sorted.
    pub async fn list_spaces(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r"SELECT name FROM sqlite_master
              WHERE type = 'table' AND name LIKE 'space\_%' ESCAPE '\'
              ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RagError::RetrievalFailed(format!("list spaces: {e}")))?;

        let mut spaces = Vec::with_capacity(rows.len());
        for row in rows {
            let table: String = row
                .try_get("name")
                .map_err(|e| RagError::RetrievalFailed(format!("row decode: {e}")))?;
            if let Some(space) = space_from_table(&table) {
                spaces.push(space.to_string());
            }
        }
        Ok(spaces)
    }

    pub async fn space_exists(&self, space: &str) -> Result<bool> {
        validate_space_name(space)?;
        let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(space_table(space))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RagError::RetrievalFailed(format!("space lookup: {e}")))?;
        Ok(row.is_some())
    }

    /// Number of units indexed in a space; `0` if the space does not exist.
    pub async fn count_units(&self, space: &str) -> Result<u64> {
        validate_space_name(space)?;
        if !self.space_exists(space).await? {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) AS n FROM {}", space_table(space));
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RagError::RetrievalFailed(format!("count space '{space}': {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| RagError::RetrievalFailed(format!("row decode: {e}")))?;
        Ok(n.max(0) as u64)
    }

    /// Drops a space. Refuses the protected space; a missing space is a
    /// successful no-op.
    pub async fn delete_space(&self, space: &str) -> Result<()> {
        validate_space_name(space)?;
        if space == self.protected_space {
            return Err(RagError::ProtectedSpace(space.to_string()));
        }
        let sql = format!("DROP TABLE IF EXISTS {}", space_table(space));
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| RagError::StoreFailed(format!("delete space '{space}': {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddings;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SpaceStore {
        // Single connection so the in-memory database is shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SpaceStore::new(pool, Arc::new(HashEmbeddings::new(64)), "default")
    }

    #[test]
    fn space_name_validation() {
        assert!(validate_space_name("default").is_ok());
        assert!(validate_space_name("loyalty_feeds_2024").is_ok());
        assert!(validate_space_name("").is_err());
        assert!(validate_space_name("Has-Caps").is_err());
        assert!(validate_space_name("spaces; DROP TABLE x").is_err());
        assert!(validate_space_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn table_name_transform_is_reversible() {
        assert_eq!(space_table("demo"), "space_demo");
        assert_eq!(space_from_table("space_demo"), Some("demo"));
        assert_eq!(space_from_table("other_demo"), None);
    }

    #[tokio::test]
    async fn add_and_search_returns_ranked_results() {
        let store = test_store().await;
        store
            .add_documents(
                "demo",
                vec![
                    "loyalty member points balance".into(),
                    "quarterly weather forecast".into(),
                ],
            )
            .await
            .unwrap();

        let results = store
            .similarity_search("demo", "loyalty points", 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
        assert_eq!(results[0].text, "loyalty member points balance");
    }

    #[tokio::test]
    async fn search_in_missing_space_is_empty_not_error() {
        let store = test_store().await;
        let results = store.similarity_search("ghost", "anything", 3).await.unwrap();
        assert!(results.is_empty());

        // An invalid name can never denote an existing space; same soft-fail.
        let results = store
            .similarity_search("Not A Space", "anything", 3)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn spaces_are_isolated() {
        let store = test_store().await;
        store
            .add_documents("alpha", vec!["alpha only content".into()])
            .await
            .unwrap();
        store
            .add_documents("beta", vec!["beta only content".into()])
            .await
            .unwrap();

        let hits = store
            .similarity_search("beta", "alpha only content", 5)
            .await
            .unwrap();
        assert!(hits.iter().all(|r| !r.text.contains("alpha")));
        assert_eq!(store.count_units("alpha").await.unwrap(), 1);
        assert_eq!(store.count_units("beta").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn protected_space_cannot_be_deleted() {
        let store = test_store().await;
        store
            .add_documents("default", vec!["kept".into()])
            .await
            .unwrap();

        let err = store.delete_space("default").await.unwrap_err();
        assert!(matches!(err, RagError::ProtectedSpace(_)));
        assert_eq!(store.count_units("default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_missing_space_is_a_noop() {
        let store = test_store().await;
        store.delete_space("never_created").await.unwrap();
    }

    #[tokio::test]
    async fn delete_then_list_reflects_removal() {
        let store = test_store().await;
        store.add_documents("one", vec!["x".into()]).await.unwrap();
        store.add_documents("two", vec!["y".into()]).await.unwrap();
        assert_eq!(store.list_spaces().await.unwrap(), vec!["one", "two"]);

        store.delete_space("one").await.unwrap();
        assert_eq!(store.list_spaces().await.unwrap(), vec!["two"]);
        assert!(!store.space_exists("one").await.unwrap());
    }

    #[tokio::test]
    async fn whitespace_only_inputs_are_dropped() {
        let store = test_store().await;
        let ids = store
            .add_documents("demo", vec!["   ".into(), "real".into(), "\n\t".into()])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.count_units("demo").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_space_name_rejected_before_sql() {
        let store = test_store().await;
        let err = store
            .add_documents("Bad Name", vec!["x".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }
}
