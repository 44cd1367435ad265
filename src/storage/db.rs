//! SQLite row store for responses and artifacts.
//!
//! # Example
//!
//! ```no_run
//! use harvest_core::storage::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("data/harvest.db")).await?;
//! println!("{} responses stored", db.count_responses().await?);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, instrument};

use super::StorageError;
use crate::fetch::CapturedResponse;

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Artifact row to insert.
#[derive(Debug, Clone)]
pub struct NewArtifact<'a> {
    pub provider: &'a str,
    pub source_url: &'a str,
    pub sha256: &'a str,
    pub byte_count: u64,
    pub blob_path: &'a str,
    pub response_id: Option<i64>,
}

/// Database connection wrapper with connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path`, enables WAL and
    /// runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the parent directory cannot be created,
    /// the connection fails, or migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the connection or migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persists one logical response and returns its row id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if the insert fails.
    #[instrument(skip(self, response), fields(url = %response.url, status = response.status_code))]
    pub async fn insert_response(
        &self,
        provider: &str,
        response: &CapturedResponse,
    ) -> Result<i64, StorageError> {
        let row = sqlx::query(
            r"INSERT INTO responses (
                provider, method, url, params_json, status_code, headers_json, body
              )
              VALUES (?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(provider)
        .bind(response.method.as_str())
        .bind(response.url.as_str())
        .bind(response.params_json.as_deref())
        .bind(i64::from(response.status_code))
        .bind(response.headers_json())
        .bind(response.body.as_slice())
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        debug!(id, "response stored");
        Ok(id)
    }

    /// Inserts an artifact row; returns `false` when the (source URL, hash)
    /// pair was already stored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if the insert fails.
    #[instrument(
        skip(self, artifact),
        fields(url = %artifact.source_url, sha256 = %artifact.sha256)
    )]
    pub async fn insert_artifact(&self, artifact: &NewArtifact<'_>) -> Result<bool, StorageError> {
        let bytes = i64::try_from(artifact.byte_count).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r"INSERT OR IGNORE INTO artifacts (
                provider, source_url, sha256, bytes, blob_path, response_id
              )
              VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(artifact.provider)
        .bind(artifact.source_url)
        .bind(artifact.sha256)
        .bind(bytes)
        .bind(artifact.blob_path)
        .bind(artifact.response_id)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        debug!(inserted, "artifact row");
        Ok(inserted)
    }

    /// Number of stored responses.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if the query fails.
    pub async fn count_responses(&self) -> Result<i64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM responses")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of stored artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if the query fails.
    pub async fn count_artifacts(&self) -> Result<i64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM artifacts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}
