use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::domain::{Endpoint, EndpointStatus, RetentionPolicy, Sample};
use crate::ports::{PersistenceError, PersistenceResult, SampleStore};

/// How long a writer waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SAMPLE_COLUMNS: &str = "endpoint, observed_at, player_count, latency_ms";

#[derive(Debug, FromRow)]
struct SampleRow {
    endpoint: String,
    observed_at: i64,
    player_count: Option<i64>,
    latency_ms: Option<i64>,
}

impl TryFrom<SampleRow> for Sample {
    type Error = PersistenceError;

    fn try_from(row: SampleRow) -> Result<Self, Self::Error> {
        Ok(Sample::new(parse_endpoint(row.endpoint)?, parse_timestamp(row.observed_at)?).with_metrics(
            parse_metric("player_count", row.player_count)?,
            parse_metric("latency_ms", row.latency_ms)?,
        ))
    }
}

#[derive(Debug, FromRow)]
struct StatusRow {
    endpoint: String,
    ping: Option<i64>,
    logo: Option<String>,
    updated_at: i64,
}

impl TryFrom<StatusRow> for EndpointStatus {
    type Error = PersistenceError;

    fn try_from(row: StatusRow) -> Result<Self, Self::Error> {
        Ok(EndpointStatus {
            endpoint: parse_endpoint(row.endpoint)?,
            ping: parse_metric("ping", row.ping)?,
            logo: row.logo,
            updated_at: parse_timestamp(row.updated_at)?,
        })
    }
}

fn parse_endpoint(raw: String) -> PersistenceResult<Endpoint> {
    Endpoint::parse(raw).map_err(|e| PersistenceError::Corrupt(e.to_string()))
}

fn parse_timestamp(secs: i64) -> PersistenceResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PersistenceError::Corrupt(format!("timestamp out of range: {}", secs)))
}

fn parse_metric(field: &str, value: Option<i64>) -> PersistenceResult<Option<u32>> {
    value
        .map(|v| {
            u32::try_from(v).map_err(|_| PersistenceError::Corrupt(format!("{} out of range: {}", field, v)))
        })
        .transpose()
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Create the directory holding a file-backed database
fn ensure_parent_dir(database_url: &str) -> std::io::Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    // `sqlite::memory:` and friends have no file
    if path.starts_with(':') {
        return Ok(());
    }

    let normalized = path.trim_start_matches("//");
    let without_params = normalized.split('?').next().unwrap_or(normalized);
    match Path::new(without_params).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

async fn insert_endpoint(conn: &mut SqliteConnection, endpoint: &Endpoint) -> PersistenceResult<()> {
    sqlx::query("INSERT OR IGNORE INTO endpoints (id) VALUES (?)")
        .bind(endpoint.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn count_samples(conn: &mut SqliteConnection, endpoint: &Endpoint) -> PersistenceResult<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM samples WHERE endpoint = ?")
        .bind(endpoint.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(usize::try_from(count).unwrap_or(0))
}

async fn evict_oldest(
    conn: &mut SqliteConnection,
    endpoint: &Endpoint,
    retention: &RetentionPolicy,
) -> PersistenceResult<usize> {
    if !retention.enabled {
        return Ok(0);
    }

    let count = count_samples(conn, endpoint).await?;
    let batch = retention.evictions_for(count);
    if batch == 0 {
        return Ok(0);
    }

    // SQLite is not built with DELETE ... LIMIT, so go through rowid.
    let result = sqlx::query(
        r#"
        DELETE FROM samples WHERE rowid IN (
            SELECT rowid FROM samples
            WHERE endpoint = ?
            ORDER BY observed_at ASC, rowid ASC
            LIMIT ?
        )
        "#,
    )
    .bind(endpoint.as_str())
    .bind(to_limit(batch))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() as usize)
}

/// SQLite-backed sample store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    retention: RetentionPolicy,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url` and apply migrations
    pub async fn connect(database_url: &str, retention: RetentionPolicy) -> PersistenceResult<Self> {
        ensure_parent_dir(database_url)?;

        let in_memory = is_in_memory(database_url);
        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        Self::from_pool(pool, retention).await
    }

    /// Wrap an existing pool, applying migrations
    pub async fn from_pool(pool: SqlitePool, retention: RetentionPolicy) -> PersistenceResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, retention })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SampleStore for SqliteStore {
    async fn upsert_endpoint(&self, endpoint: &Endpoint) -> PersistenceResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_endpoint(&mut conn, endpoint).await
    }

    async fn append_sample(&self, sample: &Sample, logo: Option<&str>) -> PersistenceResult<()> {
        let mut tx = self.pool.begin().await?;

        insert_endpoint(&mut tx, &sample.endpoint).await?;

        sqlx::query(
            r#"
            INSERT INTO samples (endpoint, observed_at, player_count, latency_ms)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(sample.endpoint.as_str())
        .bind(sample.observed_at.timestamp())
        .bind(sample.player_count.map(i64::from))
        .bind(sample.latency_ms.map(i64::from))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO current_status (endpoint, ping, logo, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(endpoint) DO UPDATE SET
                ping = excluded.ping,
                logo = excluded.logo,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(sample.endpoint.as_str())
        .bind(sample.latency_ms.map(i64::from))
        .bind(logo)
        .bind(sample.observed_at.timestamp())
        .execute(&mut *tx)
        .await?;

        let evicted = evict_oldest(&mut tx, &sample.endpoint, &self.retention).await?;

        tx.commit().await?;

        if evicted > 0 {
            debug!(endpoint = %sample.endpoint, evicted, "evicted oldest samples");
        }
        Ok(())
    }

    async fn evict_if_over_capacity(&self, endpoint: &Endpoint) -> PersistenceResult<usize> {
        let mut tx = self.pool.begin().await?;
        let evicted = evict_oldest(&mut tx, endpoint, &self.retention).await?;
        tx.commit().await?;
        Ok(evicted)
    }

    async fn list_endpoints(&self) -> PersistenceResult<Vec<Endpoint>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM endpoints ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        ids.into_iter().map(parse_endpoint).collect()
    }

    async fn latest_sample(&self, endpoint: &Endpoint) -> PersistenceResult<Option<Sample>> {
        let row = sqlx::query_as::<_, SampleRow>(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM samples WHERE endpoint = ? \
             ORDER BY observed_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(endpoint.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Sample::try_from).transpose()
    }

    async fn latest_samples_all(&self) -> PersistenceResult<Vec<Sample>> {
        let rows = sqlx::query_as::<_, SampleRow>(
            r#"
            SELECT s.endpoint, s.observed_at, s.player_count, s.latency_ms
            FROM samples s
            WHERE s.rowid = (
                SELECT latest.rowid FROM samples latest
                WHERE latest.endpoint = s.endpoint
                ORDER BY latest.observed_at DESC, latest.rowid DESC
                LIMIT 1
            )
            ORDER BY s.endpoint
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Sample::try_from).collect()
    }

    async fn samples(&self, endpoint: &Endpoint, limit: usize) -> PersistenceResult<Vec<Sample>> {
        let rows = sqlx::query_as::<_, SampleRow>(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM samples WHERE endpoint = ? \
             ORDER BY observed_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(endpoint.as_str())
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Sample::try_from).collect()
    }

    async fn current_status(&self, endpoint: &Endpoint) -> PersistenceResult<Option<EndpointStatus>> {
        let row = sqlx::query_as::<_, StatusRow>(
            "SELECT endpoint, ping, logo, updated_at FROM current_status WHERE endpoint = ?",
        )
        .bind(endpoint.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(EndpointStatus::try_from).transpose()
    }

    async fn sample_count(&self, endpoint: &Endpoint) -> PersistenceResult<usize> {
        let mut conn = self.pool.acquire().await?;
        count_samples(&mut conn, endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::store::conformance;

    async fn memory_store(retention: RetentionPolicy) -> SqliteStore {
        SqliteStore::connect("sqlite::memory:", retention)
            .await
            .expect("Failed to create in-memory store")
    }

    #[tokio::test]
    async fn test_retention_scenario() {
        let store = memory_store(RetentionPolicy::new(5, 2)).await;
        conformance::retention_scenario(&store).await;
    }

    #[tokio::test]
    async fn test_retention_bounds() {
        let store = memory_store(RetentionPolicy::new(10, 3)).await;
        conformance::retention_bounds(&store, 10, 3).await;
    }

    #[tokio::test]
    async fn test_auto_clean_toggle() {
        let disabled = memory_store(RetentionPolicy { enabled: false, ..RetentionPolicy::new(5, 2) }).await;
        let enabled = memory_store(RetentionPolicy::new(5, 2)).await;
        conformance::auto_clean_toggle(&disabled, &enabled).await;
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = memory_store(RetentionPolicy::default()).await;
        conformance::round_trip(&store).await;
    }

    #[tokio::test]
    async fn test_null_sample_is_visible() {
        let store = memory_store(RetentionPolicy::default()).await;
        conformance::null_sample_is_visible(&store).await;
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = memory_store(RetentionPolicy::default()).await;
        conformance::upsert_is_idempotent(&store).await;
    }

    #[tokio::test]
    async fn test_samples_newest_first() {
        let store = memory_store(RetentionPolicy::default()).await;
        conformance::samples_newest_first(&store).await;
    }

    #[tokio::test]
    async fn test_latest_per_endpoint() {
        let store = memory_store(RetentionPolicy::default()).await;
        conformance::latest_per_endpoint(&store).await;
    }

    #[tokio::test]
    async fn test_snapshot_tracks_latest_write() {
        let store = memory_store(RetentionPolicy::default()).await;
        conformance::snapshot_tracks_latest_write(&store).await;
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_empty() {
        let store = memory_store(RetentionPolicy::default()).await;
        conformance::unknown_endpoint_is_empty(&store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("concurrent.db").display());
        let store = Arc::new(SqliteStore::connect(&url, RetentionPolicy::new(50, 10)).await.unwrap());
        conformance::concurrent_writers(store, 50).await;
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("nested/data.db").display());
        let e = conformance::endpoint("persist.example");

        {
            let store = SqliteStore::connect(&url, RetentionPolicy::default()).await.unwrap();
            store
                .append_sample(&conformance::sample_at(&e, 42), Some("data:,icon"))
                .await
                .unwrap();
            store.pool().close().await;
        }

        let store = SqliteStore::connect(&url, RetentionPolicy::default()).await.unwrap();
        assert_eq!(
            store.latest_sample(&e).await.unwrap(),
            Some(conformance::sample_at(&e, 42))
        );
        let status = store.current_status(&e).await.unwrap().unwrap();
        assert_eq!(status.logo.as_deref(), Some("data:,icon"));
    }

    #[tokio::test]
    async fn test_sample_requires_known_endpoint() {
        let store = memory_store(RetentionPolicy::default()).await;

        let orphan = sqlx::query("INSERT INTO samples (endpoint, observed_at) VALUES ('ghost', 1)")
            .execute(store.pool())
            .await;
        assert!(orphan.is_err());
    }

    #[tokio::test]
    async fn test_evict_catches_up_after_external_inserts() {
        let store = memory_store(RetentionPolicy::new(5, 2)).await;
        let e = conformance::endpoint("bulk.example");
        store.upsert_endpoint(&e).await.unwrap();

        for secs in 0..8 {
            sqlx::query("INSERT INTO samples (endpoint, observed_at) VALUES (?, ?)")
                .bind(e.as_str())
                .bind(secs)
                .execute(store.pool())
                .await
                .unwrap();
        }

        assert_eq!(store.evict_if_over_capacity(&e).await.unwrap(), 2);
        let oldest = store.samples(&e, 10).await.unwrap().last().cloned().unwrap();
        assert_eq!(oldest.observed_at, conformance::at(2));
    }

    #[tokio::test]
    async fn test_corrupt_metric_is_reported() {
        let store = memory_store(RetentionPolicy::default()).await;
        let e = conformance::endpoint("corrupt.example");
        store.upsert_endpoint(&e).await.unwrap();

        sqlx::query("INSERT INTO samples (endpoint, observed_at, player_count) VALUES (?, 1, -5)")
            .bind(e.as_str())
            .execute(store.pool())
            .await
            .unwrap();

        assert!(matches!(
            store.latest_sample(&e).await,
            Err(PersistenceError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_with_invalid_url() {
        let result = SqliteStore::connect("invalid://url", RetentionPolicy::default()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_ensure_parent_dir_skips_memory() {
        assert!(ensure_parent_dir("sqlite::memory:").is_ok());
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite:file:test?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite:data.db"));
    }
}
