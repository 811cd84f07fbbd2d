//! Fast-store trait and the atomic consume-script contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use limitgate_core::{DailyLimit, KeySchema, LimitCacheEntry};

/// Result of one consume-script execution.
///
/// The script must run atomically: between its read of the remaining balance
/// and its writes, no other command may touch the two keys. Without that
/// guarantee two concurrent decrements can each observe a sufficient balance
/// and both succeed, violating `remaining >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Balance was sufficient; the decrement and the metadata increments
    /// were applied. Carries the post-decrement balance.
    Applied { remaining: i64 },
    /// Balance was below the requested amount. No mutation. Carries the
    /// untouched balance.
    Insufficient { remaining: i64 },
    /// The remaining-key is absent (never warmed, or evicted by TTL).
    Missing,
}

impl ScriptOutcome {
    /// The wire status code of the script: `+1` applied, `0` insufficient,
    /// `-1` missing.
    #[must_use]
    pub fn status_code(self) -> i8 {
        match self {
            Self::Applied { .. } => 1,
            Self::Insufficient { .. } => 0,
            Self::Missing => -1,
        }
    }
}

/// Counters reported by [`FastStore::server_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FastStoreStats {
    /// Live (non-expired) keys, both physical keys counted.
    pub entries: u64,
    /// Consume scripts that found the remaining-key present.
    pub script_hits: u64,
    /// Consume scripts that found the remaining-key absent.
    pub script_misses: u64,
}

/// Typed, narrow interface to the cache tier.
///
/// The adapter owns the [`KeySchema`], so callers speak dates and the
/// adapter derives the two physical key names. Used as `Arc<dyn FastStore>`.
#[async_trait]
pub trait FastStore: Send + Sync {
    /// The key schema this store derives its key names from.
    fn key_schema(&self) -> &KeySchema;

    /// Populates both physical keys for `row.day_date` and applies `ttl`
    /// to each: the remaining-key as a plain integer, the meta-key as a
    /// mapping of the five metadata fields.
    async fn warm(&self, row: &DailyLimit, ttl: Duration) -> anyhow::Result<()>;

    /// Runs the atomic consume script for `date`.
    async fn consume(&self, date: NaiveDate, amount: i64) -> anyhow::Result<ScriptOutcome>;

    /// Assembles the full cache view of one date, or `None` when either
    /// physical key is absent. `remaining` always comes from the scalar key.
    async fn read_entry(&self, date: NaiveDate) -> anyhow::Result<Option<LimitCacheEntry>>;

    /// Drops every key under this store's prefix. Returns how many physical
    /// keys were removed.
    async fn clear_all(&self) -> anyhow::Result<u64>;

    /// Live-entry and script counters.
    async fn server_stats(&self) -> anyhow::Result<FastStoreStats>;
}
