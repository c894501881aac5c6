use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;
use crate::error::{RagError, Result};

/// Opens the SQLite pool backing all spaces, creating the file and its
/// parent directory on first use. WAL mode for concurrent readers.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.store.path;

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(|e| RagError::Config(format!("store path: {e}")))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| RagError::StoreFailed(format!("connect: {e}")))?;

    Ok(pool)
}
