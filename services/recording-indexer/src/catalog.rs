use crate::config::DatabaseConfig;
use crate::error::IndexerError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// One indexed video segment, keyed by (`camera_id`, `started_at`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Recording {
    /// Camera identifier taken from the object key
    pub camera_id: String,
    /// Segment start, read from the key's embedded timestamp
    pub started_at: DateTime<Utc>,
    /// `started_at` plus the configured segment duration
    pub ended_at: DateTime<Utc>,
    /// Originating object key
    pub s3_key: String,
    /// Object size at the last observation
    pub size_bytes: i64,
}

/// Camera + time-range lookup used by playback consumers
#[derive(Debug, Clone)]
pub struct RecordingQuery {
    /// Camera to list segments for
    pub camera_id: String,
    /// Window start (inclusive), on `started_at`
    pub from: DateTime<Utc>,
    /// Window end (exclusive), on `started_at`
    pub to: DateTime<Utc>,
    /// Maximum number of rows
    pub limit: Option<i64>,
}

/// The recording catalog.
///
/// Both ingestion paths write only through [`SegmentCatalog::upsert`], which
/// must resolve a (`camera_id`, `started_at`) conflict atomically.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentCatalog: Send + Sync {
    /// Insert the recording, or overwrite `ended_at`, `s3_key` and
    /// `size_bytes` of the existing row with the same natural key
    async fn upsert(&self, recording: &Recording) -> Result<(), IndexerError>;

    /// Recordings of one camera starting within the query window, oldest first
    async fn recordings_for_camera(
        &self,
        query: &RecordingQuery,
    ) -> Result<Vec<Recording>, IndexerError>;

    /// Check catalog connectivity
    async fn ping(&self) -> Result<(), IndexerError>;
}

/// PostgreSQL-backed catalog.
///
/// Expects the table below to exist; schema management belongs to the
/// platform's migration tooling.
///
/// ```sql
/// CREATE TABLE recordings (
///     camera_id  TEXT        NOT NULL,
///     started_at TIMESTAMPTZ NOT NULL,
///     ended_at   TIMESTAMPTZ NOT NULL,
///     s3_key     TEXT        NOT NULL,
///     size_bytes BIGINT      NOT NULL,
///     UNIQUE (camera_id, started_at)
/// );
/// ```
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Create a new catalog with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SegmentCatalog for PgCatalog {
    #[instrument(
        skip(self, recording),
        fields(camera_id = %recording.camera_id, s3_key = %recording.s3_key)
    )]
    async fn upsert(&self, recording: &Recording) -> Result<(), IndexerError> {
        sqlx::query(
            r#"
            INSERT INTO recordings (camera_id, started_at, ended_at, s3_key, size_bytes)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (camera_id, started_at) DO UPDATE
            SET ended_at = EXCLUDED.ended_at,
                s3_key = EXCLUDED.s3_key,
                size_bytes = EXCLUDED.size_bytes
            "#,
        )
        .bind(&recording.camera_id)
        .bind(recording.started_at)
        .bind(recording.ended_at)
        .bind(&recording.s3_key)
        .bind(recording.size_bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Store {
            s3_key: recording.s3_key.clone(),
            reason: e.to_string(),
        })?;

        debug!(started_at = %recording.started_at, "Recording upserted");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn recordings_for_camera(
        &self,
        query: &RecordingQuery,
    ) -> Result<Vec<Recording>, IndexerError> {
        sqlx::query_as::<_, Recording>(
            r#"
            SELECT camera_id, started_at, ended_at, s3_key, size_bytes
            FROM recordings
            WHERE camera_id = $1
              AND started_at >= $2
              AND started_at < $3
            ORDER BY started_at ASC
            LIMIT $4
            "#,
        )
        .bind(&query.camera_id)
        .bind(query.from)
        .bind(query.to)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::Query(e.to_string()))
    }

    async fn ping(&self) -> Result<(), IndexerError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| IndexerError::Query(e.to_string()))
    }
}
