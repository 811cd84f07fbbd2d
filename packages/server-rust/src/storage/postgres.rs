//! `PostgreSQL` [`RecordStore`] backed by sqlx.
//!
//! The direct consume path takes a row-level write lock via
//! `SELECT ... FOR UPDATE` for the duration of the transaction, so concurrent
//! callers serialize and every admitted decrement is safe. The write-back
//! path is a blind `UPDATE`; the table's CHECK constraints reject a
//! transiently non-conserved pair, which simply leaves that key dirty for the
//! next tick.

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use limitgate_core::{ClockSource, DailyLimit, SyncHistory, SyncStatus, SyncType};

use super::month_bounds;
use super::record_store::{DirectOutcome, RecordStore};

const FIND_COLUMNS: &str = "day_date, initial_limit, remaining, consumed, \
     transaction_count, version, created_at, updated_at";

/// sqlx-backed record store.
pub struct PostgresRecordStore {
    pool: PgPool,
    clock: Arc<dyn ClockSource>,
}

#[derive(sqlx::FromRow)]
struct DailyLimitRow {
    day_date: NaiveDate,
    initial_limit: i64,
    remaining: i64,
    consumed: i64,
    transaction_count: i64,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

impl From<DailyLimitRow> for DailyLimit {
    fn from(row: DailyLimitRow) -> Self {
        Self {
            day_date: row.day_date,
            initial_limit: row.initial_limit,
            remaining: row.remaining,
            consumed: row.consumed,
            transaction_count: row.transaction_count,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PostgresRecordStore {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn ClockSource>) -> Self {
        Self { pool, clock }
    }

    /// Connects a pool and wraps it.
    ///
    /// # Errors
    ///
    /// Returns an error when the database is unreachable.
    pub async fn connect(url: &str, clock: Arc<dyn ClockSource>) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;
        Ok(Self::new(pool, clock))
    }

    /// Applies the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when a migration fails to apply.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }
}

fn sync_type_from_db(s: &str) -> anyhow::Result<SyncType> {
    match s {
        "SCHEDULED" => Ok(SyncType::Scheduled),
        "MANUAL" => Ok(SyncType::Manual),
        "STARTUP" => Ok(SyncType::Startup),
        "SHUTDOWN" => Ok(SyncType::Shutdown),
        other => anyhow::bail!("unknown sync_type in sync_history: {other}"),
    }
}

fn sync_status_from_db(s: &str) -> anyhow::Result<SyncStatus> {
    match s {
        "SUCCESS" => Ok(SyncStatus::Success),
        "PARTIAL" => Ok(SyncStatus::Partial),
        "FAILED" => Ok(SyncStatus::Failed),
        other => anyhow::bail!("unknown status in sync_history: {other}"),
    }
}

#[async_trait::async_trait]
impl RecordStore for PostgresRecordStore {
    async fn find_by_date(&self, date: NaiveDate) -> anyhow::Result<Option<DailyLimit>> {
        let row: Option<DailyLimitRow> = sqlx::query_as(&format!(
            "SELECT {FIND_COLUMNS} FROM daily_limits WHERE day_date = $1"
        ))
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DailyLimit::from))
    }

    async fn find_by_month(&self, year: i32, month: u32) -> anyhow::Result<Vec<DailyLimit>> {
        let Some((first, next)) = month_bounds(year, month) else {
            return Ok(Vec::new());
        };
        let rows: Vec<DailyLimitRow> = sqlx::query_as(&format!(
            "SELECT {FIND_COLUMNS} FROM daily_limits \
             WHERE day_date >= $1 AND day_date < $2 ORDER BY day_date"
        ))
        .bind(first)
        .bind(next)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DailyLimit::from).collect())
    }

    async fn upsert(&self, limit: &DailyLimit) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO daily_limits \
             (day_date, initial_limit, remaining, consumed, transaction_count, \
              version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (day_date) DO UPDATE SET \
               initial_limit = EXCLUDED.initial_limit, \
               remaining = EXCLUDED.remaining, \
               consumed = EXCLUDED.consumed, \
               transaction_count = EXCLUDED.transaction_count, \
               version = EXCLUDED.version, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(limit.day_date)
        .bind(limit.initial_limit)
        .bind(limit.remaining)
        .bind(limit.consumed)
        .bind(limit.transaction_count)
        .bind(limit.version)
        .bind(limit.created_at)
        .bind(limit.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sync_from_cache(
        &self,
        date: NaiveDate,
        remaining: i64,
        consumed: i64,
        transaction_count: i64,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE daily_limits SET \
               remaining = $2, consumed = $3, transaction_count = $4, \
               version = version + 1, updated_at = $5 \
             WHERE day_date = $1",
        )
        .bind(date)
        .bind(remaining)
        .bind(consumed)
        .bind(transaction_count)
        .bind(self.clock.now_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn consume_direct(&self, date: NaiveDate, amount: i64) -> anyhow::Result<DirectOutcome> {
        let mut tx = self.pool.begin().await?;

        let row: Option<DailyLimitRow> = sqlx::query_as(&format!(
            "SELECT {FIND_COLUMNS} FROM daily_limits WHERE day_date = $1 FOR UPDATE"
        ))
        .bind(date)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(DirectOutcome::NotFound);
        };
        if row.remaining < amount {
            // Dropping the transaction rolls it back and releases the lock.
            return Ok(DirectOutcome::Insufficient {
                remaining: row.remaining,
            });
        }

        let new_remaining = row.remaining - amount;
        let updated = sqlx::query(
            "UPDATE daily_limits SET \
               remaining = $2, consumed = $3, transaction_count = $4, \
               version = $5, updated_at = $6 \
             WHERE day_date = $1 AND version = $7",
        )
        .bind(date)
        .bind(new_remaining)
        .bind(row.consumed + amount)
        .bind(row.transaction_count + 1)
        .bind(row.version + 1)
        .bind(self.clock.now_millis())
        .bind(row.version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            anyhow::bail!("optimistic version check failed under row lock for {date}");
        }
        tx.commit().await?;

        Ok(DirectOutcome::Applied { new_remaining })
    }

    async fn reset_month(
        &self,
        year: i32,
        month: u32,
        initial_override: Option<i64>,
    ) -> anyhow::Result<u64> {
        let Some((first, next)) = month_bounds(year, month) else {
            return Ok(0);
        };
        let result = sqlx::query(
            "UPDATE daily_limits SET \
               initial_limit = COALESCE($3, initial_limit), \
               remaining = COALESCE($3, initial_limit), \
               consumed = 0, transaction_count = 0, \
               version = version + 1, updated_at = $4 \
             WHERE day_date >= $1 AND day_date < $2",
        )
        .bind(first)
        .bind(next)
        .bind(initial_override)
        .bind(self.clock.now_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn record_sync(&self, history: &SyncHistory) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO sync_history \
             (sync_type, records_synced, duration_ms, status, error_message, \
              started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(history.sync_type.as_str())
        .bind(i64::try_from(history.records_synced).unwrap_or(i64::MAX))
        .bind(i64::try_from(history.duration_ms).unwrap_or(i64::MAX))
        .bind(history.status.as_str())
        .bind(history.error_message.as_deref())
        .bind(history.started_at)
        .bind(history.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_syncs(&self, limit: usize) -> anyhow::Result<Vec<SyncHistory>> {
        let rows = sqlx::query(
            "SELECT sync_type, records_synced, duration_ms, status, error_message, \
                    started_at, completed_at \
             FROM sync_history ORDER BY id DESC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let sync_type: String = row.try_get("sync_type")?;
                let status: String = row.try_get("status")?;
                let records_synced: i64 = row.try_get("records_synced")?;
                let duration_ms: i64 = row.try_get("duration_ms")?;
                Ok(SyncHistory {
                    sync_type: sync_type_from_db(&sync_type)?,
                    status: sync_status_from_db(&status)?,
                    records_synced: u64::try_from(records_synced).unwrap_or_default(),
                    duration_ms: u64::try_from(duration_ms).unwrap_or_default(),
                    error_message: row.try_get("error_message")?,
                    started_at: row.try_get("started_at")?,
                    completed_at: row.try_get("completed_at")?,
                })
            })
            .collect()
    }
}
