//! Consume/query entry point over the two storage tiers.
//!
//! The cached path runs the atomic script first and only falls back to the
//! record store on a miss, warming the entry and retrying the script exactly
//! once. The direct path is the transactional baseline: it bypasses the fast
//! store and the dirty set entirely and serializes on the row lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use limitgate_core::messages::api::{CacheStatsResponse, LimitView};
use limitgate_core::{ClockSource, ConsumeSource, DailyLimit, LimitCacheEntry};

use crate::config::CacheConfig;
use crate::faststore::{FastStore, ScriptOutcome};
use crate::metrics;
use crate::storage::{month_bounds, DirectOutcome, RecordStore};
use crate::sync::DirtyKeys;

/// Balance written by load-test resets so limits do not exhaust mid-run.
pub const LOAD_TEST_LIMIT: i64 = 100_000_000_000;

/// Within this many days of month end, `warm_current_month` also warms the
/// next month.
const NEXT_MONTH_WARM_WINDOW: i64 = 7;

/// Input errors. Business denials are not errors; they come back as a
/// [`ConsumeOutcome`] with `success = false`.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),
}

/// Classified result message of a consume call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeMessage {
    Success,
    InsufficientLimit,
    DateNotFound,
    /// Something failed between the tiers; the caller may retry.
    Transient(String),
}

impl ConsumeMessage {
    /// The wire message: `"Success"`, `"Insufficient limit"`,
    /// `"Date not found"`, or `"Error: <detail>"`.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Success => "Success".to_string(),
            Self::InsufficientLimit => "Insufficient limit".to_string(),
            Self::DateNotFound => "Date not found".to_string(),
            Self::Transient(detail) => format!("Error: {detail}"),
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InsufficientLimit | Self::DateNotFound => "denied",
            Self::Transient(_) => "error",
        }
    }
}

/// Result of one consume call.
#[derive(Debug, Clone)]
pub struct ConsumeOutcome {
    pub success: bool,
    pub date: NaiveDate,
    /// The requested amount (admitted only when `success`).
    pub amount: i64,
    /// Balance after the call: post-decrement on success, the untouched
    /// balance on an insufficient denial, zero otherwise.
    pub remaining: i64,
    pub source: ConsumeSource,
    pub message: ConsumeMessage,
    pub latency: Duration,
}

/// The public consume/query API over the fast store and the record store.
pub struct LimitEngine {
    records: Arc<dyn RecordStore>,
    fast: Arc<dyn FastStore>,
    dirty: Arc<DirtyKeys>,
    clock: Arc<dyn ClockSource>,
    cache: CacheConfig,
    /// Consume holds the read side; reset holds write while it rewrites
    /// keys wholesale.
    reset_gate: RwLock<()>,
}

impl LimitEngine {
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordStore>,
        fast: Arc<dyn FastStore>,
        dirty: Arc<DirtyKeys>,
        clock: Arc<dyn ClockSource>,
        cache: CacheConfig,
    ) -> Self {
        Self {
            records,
            fast,
            dirty,
            clock,
            cache,
            reset_gate: RwLock::new(()),
        }
    }

    #[must_use]
    pub fn cache_enabled(&self) -> bool {
        self.cache.enabled
    }

    /// The UTC calendar date used when a request carries no date.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Attempts to decrement `date`'s remaining limit by `amount`.
    ///
    /// Takes the cached path unless the cache is disabled or the caller
    /// forces the direct path. Never panics and never surfaces tier
    /// failures as errors; everything but an invalid input becomes a
    /// structured outcome.
    ///
    /// # Errors
    ///
    /// [`ConsumeError::InvalidAmount`] when `amount <= 0`.
    pub async fn consume(
        &self,
        date: NaiveDate,
        amount: i64,
        force_direct: bool,
    ) -> Result<ConsumeOutcome, ConsumeError> {
        if amount <= 0 {
            return Err(ConsumeError::InvalidAmount(amount));
        }

        let start = Instant::now();
        let gate = self.reset_gate.read().await;
        let (source, message, remaining) = if self.cache.enabled && !force_direct {
            let (message, remaining) = self.consume_cached(date, amount).await;
            (ConsumeSource::Cache, message, remaining)
        } else {
            let (message, remaining) = self.consume_via_record_store(date, amount).await;
            (ConsumeSource::Database, message, remaining)
        };
        drop(gate);

        let latency = start.elapsed();
        metrics::consume_observed(source.as_str(), message.outcome_label(), latency);
        if let ConsumeMessage::Transient(detail) = &message {
            warn!(%date, amount, detail = %detail, "consume failed transiently");
        }

        Ok(ConsumeOutcome {
            success: message == ConsumeMessage::Success,
            date,
            amount,
            remaining,
            source,
            message,
            latency,
        })
    }

    /// Cached path: script, then at most one warm-and-retry on a miss.
    async fn consume_cached(&self, date: NaiveDate, amount: i64) -> (ConsumeMessage, i64) {
        match self.fast.consume(date, amount).await {
            Ok(ScriptOutcome::Applied { remaining }) => {
                self.mark_dirty(date);
                (ConsumeMessage::Success, remaining)
            }
            Ok(ScriptOutcome::Insufficient { remaining }) => {
                (ConsumeMessage::InsufficientLimit, remaining)
            }
            Ok(ScriptOutcome::Missing) => self.fill_and_retry(date, amount).await,
            Err(e) => (
                ConsumeMessage::Transient(format!("cache consume failed: {e}")),
                0,
            ),
        }
    }

    /// Miss handling: load the row, warm the entry, run the script once more.
    async fn fill_and_retry(&self, date: NaiveDate, amount: i64) -> (ConsumeMessage, i64) {
        let row = match self.records.find_by_date(date).await {
            Ok(Some(row)) => row,
            Ok(None) => return (ConsumeMessage::DateNotFound, 0),
            Err(e) => {
                return (
                    ConsumeMessage::Transient(format!("record lookup failed: {e}")),
                    0,
                )
            }
        };

        if let Err(e) = self.fast.warm(&row, self.cache.ttl()).await {
            return (ConsumeMessage::Transient(format!("warm failed: {e}")), 0);
        }
        debug!(%date, "miss-filled cache entry");

        match self.fast.consume(date, amount).await {
            Ok(ScriptOutcome::Applied { remaining }) => {
                self.mark_dirty(date);
                (ConsumeMessage::Success, remaining)
            }
            Ok(ScriptOutcome::Insufficient { remaining }) => {
                (ConsumeMessage::InsufficientLimit, remaining)
            }
            // Bounded to one retry: a lost race between warm and eviction is
            // surfaced instead of looped, so it cannot become a retry storm.
            Ok(ScriptOutcome::Missing) => (
                ConsumeMessage::Transient("cache entry missing after warm".to_string()),
                0,
            ),
            Err(e) => (
                ConsumeMessage::Transient(format!("cache consume failed: {e}")),
                0,
            ),
        }
    }

    /// Direct path: one row-locked transaction, no fast store, no dirty mark.
    async fn consume_via_record_store(
        &self,
        date: NaiveDate,
        amount: i64,
    ) -> (ConsumeMessage, i64) {
        match self.records.consume_direct(date, amount).await {
            Ok(DirectOutcome::Applied { new_remaining }) => {
                (ConsumeMessage::Success, new_remaining)
            }
            Ok(DirectOutcome::Insufficient { remaining }) => {
                (ConsumeMessage::InsufficientLimit, remaining)
            }
            Ok(DirectOutcome::NotFound) => (ConsumeMessage::DateNotFound, 0),
            Err(e) => (
                ConsumeMessage::Transient(format!("record transaction failed: {e}")),
                0,
            ),
        }
    }

    fn mark_dirty(&self, date: NaiveDate) {
        self.dirty.add(self.fast.key_schema().remaining_key(date));
    }

    /// One day's limit, cache first, record store on miss. Reads never
    /// fill the cache; only consume does.
    ///
    /// # Errors
    ///
    /// Returns an error when both tiers fail to answer.
    pub async fn get_limit(&self, date: NaiveDate) -> anyhow::Result<Option<LimitView>> {
        if self.cache.enabled {
            if let Some(entry) = self.fast.read_entry(date).await? {
                return Ok(Some(view_from_entry(&entry)));
            }
        }
        Ok(self
            .records
            .find_by_date(date)
            .await?
            .map(|row| view_from_row(&row)))
    }

    /// A month's limits ordered by date, each served from the cache when
    /// warmed and from the record store otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error when a tier fails to answer.
    pub async fn get_month(&self, year: i32, month: u32) -> anyhow::Result<Vec<LimitView>> {
        let rows = self.records.find_by_month(year, month).await?;
        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            if self.cache.enabled {
                if let Some(entry) = self.fast.read_entry(row.day_date).await? {
                    views.push(view_from_entry(&entry));
                    continue;
                }
            }
            views.push(view_from_row(&row));
        }
        Ok(views)
    }

    /// Bulk-loads a month from the record store into the fast store.
    ///
    /// # Errors
    ///
    /// Returns an error when either tier fails.
    pub async fn warm_month(&self, year: i32, month: u32) -> anyhow::Result<usize> {
        let rows = self.records.find_by_month(year, month).await?;
        let ttl = self.cache.ttl();
        for row in &rows {
            self.fast.warm(row, ttl).await?;
        }
        if !rows.is_empty() {
            info!(year, month, records = rows.len(), "warmed month");
        }
        Ok(rows.len())
    }

    /// Startup/admin warm: the current month, plus the next month when the
    /// current one is within its last week.
    ///
    /// # Errors
    ///
    /// Returns an error when either tier fails.
    pub async fn warm_current_month(&self) -> anyhow::Result<usize> {
        let today = self.clock.today();
        let mut warmed = self.warm_month(today.year(), today.month()).await?;
        if days_left_in_month(today) <= NEXT_MONTH_WARM_WINDOW {
            let (year, month) = next_month(today.year(), today.month());
            warmed += self.warm_month(year, month).await?;
        }
        Ok(warmed)
    }

    /// Rewrites every row of the month back to a full balance, then re-warms.
    ///
    /// # Errors
    ///
    /// Returns an error when either tier fails.
    pub async fn reset(&self, year: i32, month: u32) -> anyhow::Result<(u64, usize)> {
        self.reset_inner(year, month, None).await
    }

    /// Like [`reset`](Self::reset), but replaces every initial limit with a
    /// very large balance so load tests do not exhaust it.
    ///
    /// # Errors
    ///
    /// Returns an error when either tier fails.
    pub async fn reset_for_load_test(
        &self,
        year: i32,
        month: u32,
    ) -> anyhow::Result<(u64, usize)> {
        self.reset_inner(year, month, Some(LOAD_TEST_LIMIT)).await
    }

    async fn reset_inner(
        &self,
        year: i32,
        month: u32,
        initial_override: Option<i64>,
    ) -> anyhow::Result<(u64, usize)> {
        // Exclusive against consume: keys are rewritten wholesale here.
        let gate = self.reset_gate.write().await;
        let rows_reset = self
            .records
            .reset_month(year, month, initial_override)
            .await?;
        let warmed = if self.cache.enabled {
            let rows = self.records.find_by_month(year, month).await?;
            let ttl = self.cache.ttl();
            for row in &rows {
                self.fast.warm(row, ttl).await?;
            }
            rows.len()
        } else {
            0
        };
        drop(gate);

        info!(year, month, rows_reset, warmed, "month reset");
        Ok((rows_reset, warmed))
    }

    /// Fast-store counters plus the dirty-set level.
    ///
    /// # Errors
    ///
    /// Returns an error when the fast store fails to answer.
    pub async fn cache_stats(&self) -> anyhow::Result<CacheStatsResponse> {
        let stats = self.fast.server_stats().await?;
        Ok(CacheStatsResponse {
            enabled: self.cache.enabled,
            key_prefix: self.fast.key_schema().prefix().to_string(),
            entries: stats.entries,
            dirty_keys: self.dirty.len(),
            script_hits: stats.script_hits,
            script_misses: stats.script_misses,
        })
    }

    /// Drops every cached key under the configured prefix.
    ///
    /// # Errors
    ///
    /// Returns an error when the fast store fails.
    pub async fn clear_cache(&self) -> anyhow::Result<u64> {
        self.fast.clear_all().await
    }
}

fn view_from_entry(entry: &LimitCacheEntry) -> LimitView {
    LimitView {
        date: entry.day_date,
        initial_limit: entry.initial_limit,
        remaining: entry.remaining,
        consumed: entry.consumed,
        transaction_count: entry.transaction_count,
        version: entry.version,
        source: ConsumeSource::Cache,
    }
}

fn view_from_row(row: &DailyLimit) -> LimitView {
    LimitView {
        date: row.day_date,
        initial_limit: row.initial_limit,
        remaining: row.remaining,
        consumed: row.consumed,
        transaction_count: row.transaction_count,
        version: row.version,
        source: ConsumeSource::Database,
    }
}

fn days_left_in_month(today: NaiveDate) -> i64 {
    month_bounds(today.year(), today.month())
        .map_or(i64::MAX, |(_, next)| {
            next.signed_duration_since(today).num_days()
        })
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}
