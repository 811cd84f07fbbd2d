//! Record-store trait and the direct-path consume outcome.
//!
//! The record store sees only batched reads and writes from the cached path;
//! the single row-at-a-time transactional operation is [`consume_direct`],
//! which exists to expose the contention the cache eliminates and to serve
//! as the fallback when the cache is disabled.
//!
//! [`consume_direct`]: RecordStore::consume_direct

use async_trait::async_trait;
use chrono::NaiveDate;
use limitgate_core::{DailyLimit, SyncHistory};

/// Result of a direct (non-cached) consume transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectOutcome {
    /// The decrement was admitted and committed.
    Applied { new_remaining: i64 },
    /// The row's balance was below the requested amount. No mutation.
    Insufficient { remaining: i64 },
    /// No row exists for the requested date.
    NotFound,
}

/// Durable home of daily limits and sync history.
///
/// Used as `Arc<dyn RecordStore>`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Plain read, no lock.
    async fn find_by_date(&self, date: NaiveDate) -> anyhow::Result<Option<DailyLimit>>;

    /// All rows of a calendar month, ordered by date. Used by warm and reset.
    async fn find_by_month(&self, year: i32, month: u32) -> anyhow::Result<Vec<DailyLimit>>;

    /// Insert or replace a row wholesale. Administrative seeding only.
    async fn upsert(&self, limit: &DailyLimit) -> anyhow::Result<()>;

    /// Blind write-back from the cache: overwrites the three mutable fields
    /// and bumps `version`. No optimistic check -- the cache is the source of
    /// truth during the warmed window. Returns the number of rows updated
    /// (0 when the row does not exist).
    async fn sync_from_cache(
        &self,
        date: NaiveDate,
        remaining: i64,
        consumed: i64,
        transaction_count: i64,
    ) -> anyhow::Result<u64>;

    /// Transactional read-then-write under a row-level write lock.
    ///
    /// Concurrent callers serialize on the lock, so every admitted decrement
    /// keeps `remaining >= 0`.
    async fn consume_direct(&self, date: NaiveDate, amount: i64) -> anyhow::Result<DirectOutcome>;

    /// Rewrites every row of the month back to a full balance.
    ///
    /// With `initial_override` set, the initial limit itself is replaced
    /// (load-test resets use a very large value); otherwise each row keeps
    /// its own `initial_limit`. Returns the number of rows rewritten.
    async fn reset_month(
        &self,
        year: i32,
        month: u32,
        initial_override: Option<i64>,
    ) -> anyhow::Result<u64>;

    /// Appends one sync-history row.
    async fn record_sync(&self, history: &SyncHistory) -> anyhow::Result<()>;

    /// Most recent sync-history rows, newest first.
    async fn recent_syncs(&self, limit: usize) -> anyhow::Result<Vec<SyncHistory>>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    /// Verifies `Arc<dyn RecordStore>` compiles (object safety).
    #[test]
    fn record_store_is_object_safe() {
        fn _assert_object_safe(_: &Arc<dyn super::RecordStore>) {}
    }
}
