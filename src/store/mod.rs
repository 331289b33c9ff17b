//! Persistence layer for search jobs and price observations.
//!
//! Backed by SQLite with WAL mode so progress updates from a running job can
//! interleave with dashboard reads. `MemoryStore` serves the test suite and
//! any embedder that manages persistence elsewhere.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::model::{Checkpoint, PlatformKind, PriceObservation, Search, SearchStatus, Target};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    search_url TEXT NOT NULL,
    platform TEXT NOT NULL,
    max_bundle_size INTEGER NOT NULL DEFAULT 3,
    min_capacity INTEGER NOT NULL DEFAULT 2
);

CREATE TABLE IF NOT EXISTS searches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id INTEGER NOT NULL REFERENCES targets(id),
    range_start TEXT NOT NULL,
    range_end TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    total_dates INTEGER NOT NULL,
    processed_dates INTEGER NOT NULL DEFAULT 0,
    total_prices_found INTEGER NOT NULL DEFAULT 0,
    last_processed_date TEXT,
    checkpoint TEXT,
    paused_at TEXT,
    pause_reason TEXT,
    started_at TEXT,
    completed_at TEXT,
    error_log TEXT
);

CREATE INDEX IF NOT EXISTS idx_searches_status ON searches(status);

CREATE TABLE IF NOT EXISTS price_observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id INTEGER NOT NULL,
    search_id INTEGER NOT NULL REFERENCES searches(id),
    date TEXT NOT NULL,
    price REAL NOT NULL,
    currency TEXT NOT NULL,
    room_label TEXT NOT NULL,
    is_bundle INTEGER NOT NULL DEFAULT 0,
    bundle_size INTEGER NOT NULL DEFAULT 1,
    minimum_nights_detected INTEGER NOT NULL DEFAULT 1,
    availability_inferred INTEGER NOT NULL DEFAULT 0,
    scraped_at TEXT NOT NULL,
    UNIQUE(search_id, date)
);

CREATE INDEX IF NOT EXISTS idx_prices_target_date ON price_observations(target_id, date);
"#;

/// Search-job persistence as seen by the engine.
#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn insert_target(&self, target: &Target) -> Result<i64>;
    async fn get_target(&self, id: i64) -> Result<Option<Target>>;
    async fn insert_search(&self, search: &Search) -> Result<i64>;
    async fn get_search(&self, id: i64) -> Result<Option<Search>>;
    /// Persist the full search row; returns the number of rows affected so
    /// callers can detect a row deleted out from under a running job.
    async fn update_search(&self, search: &Search) -> Result<u64>;
    async fn searches_with_status(&self, status: SearchStatus) -> Result<Vec<Search>>;
}

/// Price-observation persistence.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Insert an observation; returns false when `(search_id, date)` already
    /// exists and the insert was ignored.
    async fn save_price(&self, obs: &PriceObservation) -> Result<bool>;
    async fn prices_for_search(&self, search_id: i64) -> Result<Vec<PriceObservation>>;
}

type SearchRow = (
    i64,            // id
    i64,            // target_id
    String,         // range_start
    String,         // range_end
    String,         // status
    i64,            // total_dates
    i64,            // processed_dates
    i64,            // total_prices_found
    Option<String>, // last_processed_date
    Option<String>, // checkpoint json
    Option<String>, // paused_at
    Option<String>, // pause_reason
    Option<String>, // started_at
    Option<String>, // completed_at
    Option<String>, // error_log
);

type PriceRow = (
    i64,    // target_id
    i64,    // search_id
    String, // date
    f64,    // price
    String, // currency
    String, // room_label
    i64,    // is_bundle
    i64,    // bundle_size
    i64,    // minimum_nights_detected
    i64,    // availability_inferred
    String, // scraped_at
);

/// SQLite-backed store shared by the supervisor and every job runner.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the database at `db_path` and run the idempotent
    /// schema migration.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("Failed to initialize database schema")?;

        info!("opened search database at {}", db_path.display());
        Ok(Self { pool })
    }

    fn search_from_row(row: SearchRow) -> Result<Search> {
        let (
            id,
            target_id,
            range_start,
            range_end,
            status,
            total_dates,
            processed_dates,
            total_prices_found,
            last_processed_date,
            checkpoint,
            paused_at,
            pause_reason,
            started_at,
            completed_at,
            error_log,
        ) = row;

        let checkpoint = checkpoint
            .as_deref()
            .map(serde_json::from_str::<Checkpoint>)
            .transpose()
            .context("Malformed checkpoint payload")?;

        Ok(Search {
            id,
            target_id,
            range_start: parse_date(&range_start)?,
            range_end: parse_date(&range_end)?,
            status: SearchStatus::from_str(&status).map_err(anyhow::Error::msg)?,
            total_dates: total_dates as u32,
            processed_dates: processed_dates as u32,
            total_prices_found: total_prices_found as u32,
            last_processed_date: last_processed_date.as_deref().map(parse_date).transpose()?,
            checkpoint,
            paused_at: paused_at.as_deref().map(parse_ts).transpose()?,
            pause_reason,
            started_at: started_at.as_deref().map(parse_ts).transpose()?,
            completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
            error_log,
        })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date column: {s}"))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp column: {s}"))
}

fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

#[async_trait]
impl SearchStore for SqliteStore {
    async fn insert_target(&self, target: &Target) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO targets (name, search_url, platform, max_bundle_size, min_capacity)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&target.name)
        .bind(&target.search_url)
        .bind(target.platform.as_str())
        .bind(i64::from(target.max_bundle_size))
        .bind(i64::from(target.min_capacity))
        .execute(&self.pool)
        .await
        .context("Failed to insert target")?;

        Ok(result.last_insert_rowid())
    }

    async fn get_target(&self, id: i64) -> Result<Option<Target>> {
        let row: Option<(i64, String, String, String, i64, i64)> = sqlx::query_as(
            "SELECT id, name, search_url, platform, max_bundle_size, min_capacity FROM targets WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query target")?;

        row.map(|(id, name, search_url, platform, max_bundle_size, min_capacity)| {
            Ok(Target {
                id,
                name,
                search_url,
                platform: PlatformKind::from_str(&platform).map_err(anyhow::Error::msg)?,
                max_bundle_size: max_bundle_size as u32,
                min_capacity: min_capacity as u32,
            })
        })
        .transpose()
    }

    async fn insert_search(&self, search: &Search) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO searches (target_id, range_start, range_end, status, total_dates)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(search.target_id)
        .bind(fmt_date(search.range_start))
        .bind(fmt_date(search.range_end))
        .bind(search.status.as_str())
        .bind(i64::from(search.total_dates))
        .execute(&self.pool)
        .await
        .context("Failed to insert search")?;

        Ok(result.last_insert_rowid())
    }

    async fn get_search(&self, id: i64) -> Result<Option<Search>> {
        let row: Option<SearchRow> = sqlx::query_as(
            r#"
            SELECT id, target_id, range_start, range_end, status, total_dates,
                   processed_dates, total_prices_found, last_processed_date, checkpoint,
                   paused_at, pause_reason, started_at, completed_at, error_log
            FROM searches WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query search")?;

        row.map(Self::search_from_row).transpose()
    }

    async fn update_search(&self, search: &Search) -> Result<u64> {
        let checkpoint = search
            .checkpoint
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize checkpoint")?;

        let result = sqlx::query(
            r#"
            UPDATE searches SET
                status = ?, processed_dates = ?, total_prices_found = ?,
                last_processed_date = ?, checkpoint = ?, paused_at = ?, pause_reason = ?,
                started_at = ?, completed_at = ?, error_log = ?
            WHERE id = ?
            "#,
        )
        .bind(search.status.as_str())
        .bind(i64::from(search.processed_dates))
        .bind(i64::from(search.total_prices_found))
        .bind(search.last_processed_date.map(fmt_date))
        .bind(checkpoint)
        .bind(search.paused_at.map(|t| t.to_rfc3339()))
        .bind(&search.pause_reason)
        .bind(search.started_at.map(|t| t.to_rfc3339()))
        .bind(search.completed_at.map(|t| t.to_rfc3339()))
        .bind(&search.error_log)
        .bind(search.id)
        .execute(&self.pool)
        .await
        .context("Failed to update search")?;

        Ok(result.rows_affected())
    }

    async fn searches_with_status(&self, status: SearchStatus) -> Result<Vec<Search>> {
        let rows: Vec<SearchRow> = sqlx::query_as(
            r#"
            SELECT id, target_id, range_start, range_end, status, total_dates,
                   processed_dates, total_prices_found, last_processed_date, checkpoint,
                   paused_at, pause_reason, started_at, completed_at, error_log
            FROM searches WHERE status = ? ORDER BY id
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query searches by status")?;

        rows.into_iter().map(Self::search_from_row).collect()
    }
}

#[async_trait]
impl PriceStore for SqliteStore {
    async fn save_price(&self, obs: &PriceObservation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO price_observations
                (target_id, search_id, date, price, currency, room_label,
                 is_bundle, bundle_size, minimum_nights_detected, availability_inferred, scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(search_id, date) DO NOTHING
            "#,
        )
        .bind(obs.target_id)
        .bind(obs.search_id)
        .bind(fmt_date(obs.date))
        .bind(obs.price)
        .bind(&obs.currency)
        .bind(&obs.room_label)
        .bind(i64::from(obs.is_bundle))
        .bind(i64::from(obs.bundle_size))
        .bind(i64::from(obs.minimum_nights_detected))
        .bind(i64::from(obs.availability_inferred))
        .bind(obs.scraped_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert price observation")?;

        Ok(result.rows_affected() > 0)
    }

    async fn prices_for_search(&self, search_id: i64) -> Result<Vec<PriceObservation>> {
        let rows: Vec<PriceRow> = sqlx::query_as(
            r#"
            SELECT target_id, search_id, date, price, currency, room_label,
                   is_bundle, bundle_size, minimum_nights_detected, availability_inferred, scraped_at
            FROM price_observations WHERE search_id = ? ORDER BY date
            "#,
        )
        .bind(search_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query price observations")?;

        rows.into_iter()
            .map(|row| {
                let (
                    target_id,
                    search_id,
                    date,
                    price,
                    currency,
                    room_label,
                    is_bundle,
                    bundle_size,
                    minimum_nights_detected,
                    availability_inferred,
                    scraped_at,
                ) = row;
                Ok(PriceObservation {
                    target_id,
                    search_id,
                    date: parse_date(&date)?,
                    price,
                    currency,
                    room_label,
                    is_bundle: is_bundle != 0,
                    bundle_size: bundle_size as u32,
                    minimum_nights_detected: minimum_nights_detected as u32,
                    availability_inferred: availability_inferred != 0,
                    scraped_at: parse_ts(&scraped_at)?,
                })
            })
            .collect()
    }
}

/// In-memory store for tests and embedders that keep state elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    targets: RwLock<HashMap<i64, Target>>,
    searches: RwLock<HashMap<i64, Search>>,
    prices: RwLock<Vec<PriceObservation>>,
    next_id: RwLock<i64>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: RwLock::new(1),
            ..Self::default()
        }
    }

    fn alloc_id(&self) -> i64 {
        let mut next = self.next_id.write();
        let id = (*next).max(1);
        *next = id + 1;
        id
    }
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn insert_target(&self, target: &Target) -> Result<i64> {
        let id = self.alloc_id();
        let mut stored = target.clone();
        stored.id = id;
        self.targets.write().insert(id, stored);
        Ok(id)
    }

    async fn get_target(&self, id: i64) -> Result<Option<Target>> {
        Ok(self.targets.read().get(&id).cloned())
    }

    async fn insert_search(&self, search: &Search) -> Result<i64> {
        let id = self.alloc_id();
        let mut stored = search.clone();
        stored.id = id;
        self.searches.write().insert(id, stored);
        Ok(id)
    }

    async fn get_search(&self, id: i64) -> Result<Option<Search>> {
        Ok(self.searches.read().get(&id).cloned())
    }

    async fn update_search(&self, search: &Search) -> Result<u64> {
        let mut searches = self.searches.write();
        match searches.get_mut(&search.id) {
            Some(slot) => {
                *slot = search.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn searches_with_status(&self, status: SearchStatus) -> Result<Vec<Search>> {
        let mut found: Vec<Search> = self
            .searches
            .read()
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.id);
        Ok(found)
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn save_price(&self, obs: &PriceObservation) -> Result<bool> {
        let mut prices = self.prices.write();
        let duplicate = prices
            .iter()
            .any(|p| p.search_id == obs.search_id && p.date == obs.date);
        if duplicate {
            return Ok(false);
        }
        prices.push(obs.clone());
        Ok(true)
    }

    async fn prices_for_search(&self, search_id: i64) -> Result<Vec<PriceObservation>> {
        let mut found: Vec<PriceObservation> = self
            .prices
            .read()
            .iter()
            .filter(|p| p.search_id == search_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.date);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date literal")
    }

    fn sample_target() -> Target {
        Target {
            id: 0,
            name: "Hotel Mirante".into(),
            search_url: "https://www.booking.com/hotel/br/mirante.html".into(),
            platform: PlatformKind::Booking,
            max_bundle_size: 3,
            min_capacity: 2,
        }
    }

    fn sample_obs(search_id: i64, target_id: i64, date: NaiveDate) -> PriceObservation {
        PriceObservation {
            target_id,
            search_id,
            date,
            price: 150.0,
            currency: "BRL".into(),
            room_label: "Standard Duplo".into(),
            is_bundle: true,
            bundle_size: 3,
            minimum_nights_detected: 3,
            availability_inferred: true,
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sqlite_search_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let store = SqliteStore::open(&dir.path().join("test.sqlite"))
            .await
            .expect("open store");

        let target_id = store.insert_target(&sample_target()).await.expect("target");
        let search = Search::new(0, target_id, d("2025-09-01"), d("2025-09-05"));
        let id = store.insert_search(&search).await.expect("insert");

        let mut loaded = store.get_search(id).await.expect("get").expect("present");
        assert_eq!(loaded.status, SearchStatus::Pending);
        assert_eq!(loaded.total_dates, 5);

        loaded.status = SearchStatus::Paused;
        loaded.processed_dates = 3;
        loaded.last_processed_date = Some(d("2025-09-03"));
        loaded.checkpoint = Some(Checkpoint {
            version: Checkpoint::CURRENT_VERSION,
            last_processed_date: d("2025-09-03"),
            processed_dates: 3,
            prices_found: 2,
        });
        loaded.paused_at = Some(Utc::now());
        let affected = store.update_search(&loaded).await.expect("update");
        assert_eq!(affected, 1);

        let reloaded = store.get_search(id).await.expect("get").expect("present");
        assert_eq!(reloaded.status, SearchStatus::Paused);
        assert_eq!(reloaded.resume_date(), d("2025-09-04"));
        assert_eq!(
            reloaded.checkpoint.as_ref().map(|cp| cp.prices_found),
            Some(2)
        );
    }

    #[tokio::test]
    async fn sqlite_price_uniqueness_per_search_date() {
        let dir = TempDir::new().expect("tempdir");
        let store = SqliteStore::open(&dir.path().join("test.sqlite"))
            .await
            .expect("open store");

        let target_id = store.insert_target(&sample_target()).await.expect("target");
        let search = Search::new(0, target_id, d("2025-09-01"), d("2025-09-05"));
        let search_id = store.insert_search(&search).await.expect("insert");

        let obs = sample_obs(search_id, target_id, d("2025-09-02"));
        assert!(store.save_price(&obs).await.expect("first insert"));
        assert!(!store.save_price(&obs).await.expect("duplicate ignored"));

        let prices = store.prices_for_search(search_id).await.expect("query");
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].bundle_size, 3);
        assert!(prices[0].availability_inferred);
    }

    #[tokio::test]
    async fn sqlite_update_of_missing_row_affects_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let store = SqliteStore::open(&dir.path().join("test.sqlite"))
            .await
            .expect("open store");

        let ghost = Search::new(4242, 1, d("2025-09-01"), d("2025-09-02"));
        let affected = store.update_search(&ghost).await.expect("update");
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn memory_store_mirrors_sqlite_semantics() {
        let store = MemoryStore::new();
        let target_id = store.insert_target(&sample_target()).await.expect("target");
        let search = Search::new(0, target_id, d("2025-09-01"), d("2025-09-03"));
        let search_id = store.insert_search(&search).await.expect("insert");

        let obs = sample_obs(search_id, target_id, d("2025-09-01"));
        assert!(store.save_price(&obs).await.expect("insert"));
        assert!(!store.save_price(&obs).await.expect("dup"));

        let pending = store
            .searches_with_status(SearchStatus::Pending)
            .await
            .expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, search_id);
    }
}
