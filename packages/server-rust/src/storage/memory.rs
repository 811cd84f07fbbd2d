//! In-memory [`RecordStore`] backed by [`DashMap`].
//!
//! Each row sits behind its own mutex, which plays the role of the database
//! row-level write lock: concurrent direct consumes against one date
//! serialize on it exactly the way they would serialize on
//! `SELECT ... FOR UPDATE`. Suitable for development, demos, and the test
//! suite; production deployments use the `postgres` backend.

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::Mutex;

use limitgate_core::{ClockSource, DailyLimit, SyncHistory};

use super::record_store::{DirectOutcome, RecordStore};
use super::month_bounds;

/// In-memory record store with per-row locking.
pub struct MemoryRecordStore {
    rows: DashMap<NaiveDate, Arc<Mutex<DailyLimit>>>,
    history: Mutex<Vec<SyncHistory>>,
    clock: Arc<dyn ClockSource>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            rows: DashMap::new(),
            history: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Number of rows currently stored. Test/diagnostic helper.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn row_handle(&self, date: NaiveDate) -> Option<Arc<Mutex<DailyLimit>>> {
        // Clone the Arc out so the DashMap shard lock is released before the
        // row mutex is taken.
        self.rows.get(&date).map(|entry| Arc::clone(entry.value()))
    }

    fn month_handles(&self, year: i32, month: u32) -> Vec<Arc<Mutex<DailyLimit>>> {
        let Some((first, next)) = month_bounds(year, month) else {
            return Vec::new();
        };
        let mut handles: Vec<(NaiveDate, Arc<Mutex<DailyLimit>>)> = self
            .rows
            .iter()
            .filter(|entry| *entry.key() >= first && *entry.key() < next)
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        handles.sort_by_key(|(date, _)| *date);
        handles.into_iter().map(|(_, row)| row).collect()
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_date(&self, date: NaiveDate) -> anyhow::Result<Option<DailyLimit>> {
        Ok(self.row_handle(date).map(|row| row.lock().clone()))
    }

    async fn find_by_month(&self, year: i32, month: u32) -> anyhow::Result<Vec<DailyLimit>> {
        Ok(self
            .month_handles(year, month)
            .into_iter()
            .map(|row| row.lock().clone())
            .collect())
    }

    async fn upsert(&self, limit: &DailyLimit) -> anyhow::Result<()> {
        self.rows
            .insert(limit.day_date, Arc::new(Mutex::new(limit.clone())));
        Ok(())
    }

    async fn sync_from_cache(
        &self,
        date: NaiveDate,
        remaining: i64,
        consumed: i64,
        transaction_count: i64,
    ) -> anyhow::Result<u64> {
        let Some(handle) = self.row_handle(date) else {
            return Ok(0);
        };
        let mut row = handle.lock();
        row.remaining = remaining;
        row.consumed = consumed;
        row.transaction_count = transaction_count;
        row.version += 1;
        row.updated_at = self.clock.now_millis();
        Ok(1)
    }

    async fn consume_direct(&self, date: NaiveDate, amount: i64) -> anyhow::Result<DirectOutcome> {
        let Some(handle) = self.row_handle(date) else {
            return Ok(DirectOutcome::NotFound);
        };
        let mut row = handle.lock();
        if row.remaining < amount {
            return Ok(DirectOutcome::Insufficient {
                remaining: row.remaining,
            });
        }
        row.remaining -= amount;
        row.consumed += amount;
        row.transaction_count += 1;
        row.version += 1;
        row.updated_at = self.clock.now_millis();
        Ok(DirectOutcome::Applied {
            new_remaining: row.remaining,
        })
    }

    async fn reset_month(
        &self,
        year: i32,
        month: u32,
        initial_override: Option<i64>,
    ) -> anyhow::Result<u64> {
        let now = self.clock.now_millis();
        let mut rewritten = 0;
        for handle in self.month_handles(year, month) {
            let mut row = handle.lock();
            let initial = initial_override.unwrap_or(row.initial_limit);
            row.initial_limit = initial;
            row.remaining = initial;
            row.consumed = 0;
            row.transaction_count = 0;
            row.version += 1;
            row.updated_at = now;
            rewritten += 1;
        }
        Ok(rewritten)
    }

    async fn record_sync(&self, history: &SyncHistory) -> anyhow::Result<()> {
        self.history.lock().push(history.clone());
        Ok(())
    }

    async fn recent_syncs(&self, limit: usize) -> anyhow::Result<Vec<SyncHistory>> {
        let history = self.history.lock();
        Ok(history.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use limitgate_core::{FixedClock, SyncStatus, SyncType};

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn store() -> MemoryRecordStore {
        MemoryRecordStore::new(Arc::new(FixedClock::at_millis(1_700_000_000_000)))
    }

    #[tokio::test]
    async fn upsert_and_find_round_trip() {
        let store = store();
        let row = DailyLimit::seeded(date(2025, 3, 15), 1_000_000, 0);
        store.upsert(&row).await.unwrap();

        let found = store.find_by_date(date(2025, 3, 15)).await.unwrap();
        assert_eq!(found, Some(row));
        assert!(store
            .find_by_date(date(2025, 3, 16))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_by_month_is_ordered_and_bounded() {
        let store = store();
        for day in [20, 3, 15] {
            store
                .upsert(&DailyLimit::seeded(date(2025, 3, day), 100, 0))
                .await
                .unwrap();
        }
        store
            .upsert(&DailyLimit::seeded(date(2025, 4, 1), 100, 0))
            .await
            .unwrap();

        let march = store.find_by_month(2025, 3).await.unwrap();
        let days: Vec<u32> = march.iter().map(|r| chrono::Datelike::day(&r.day_date)).collect();
        assert_eq!(days, vec![3, 15, 20]);
    }

    #[tokio::test]
    async fn consume_direct_applies_and_denies() {
        let store = store();
        store
            .upsert(&DailyLimit::seeded(date(2025, 3, 15), 150, 0))
            .await
            .unwrap();

        let outcome = store.consume_direct(date(2025, 3, 15), 100).await.unwrap();
        assert_eq!(outcome, DirectOutcome::Applied { new_remaining: 50 });

        let outcome = store.consume_direct(date(2025, 3, 15), 100).await.unwrap();
        assert_eq!(outcome, DirectOutcome::Insufficient { remaining: 50 });

        let outcome = store.consume_direct(date(2099, 1, 1), 100).await.unwrap();
        assert_eq!(outcome, DirectOutcome::NotFound);

        let row = store
            .find_by_date(date(2025, 3, 15))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.remaining, 50);
        assert_eq!(row.consumed, 100);
        assert_eq!(row.transaction_count, 1);
        assert!(row.is_conserved());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_direct_consumes_never_over_admit() {
        let store = Arc::new(store());
        store
            .upsert(&DailyLimit::seeded(date(2025, 3, 17), 1_000, 0))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.consume_direct(date(2025, 3, 17), 50).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), DirectOutcome::Applied { .. }) {
                admitted += 1;
            }
        }

        // 1000 / 50 = exactly 20 admissions.
        assert_eq!(admitted, 20);
        let row = store
            .find_by_date(date(2025, 3, 17))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.remaining, 0);
        assert!(row.is_conserved());
    }

    #[tokio::test]
    async fn sync_from_cache_overwrites_blindly() {
        let store = store();
        store
            .upsert(&DailyLimit::seeded(date(2025, 3, 15), 1_000, 0))
            .await
            .unwrap();

        let updated = store
            .sync_from_cache(date(2025, 3, 15), 900, 100, 1)
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let row = store
            .find_by_date(date(2025, 3, 15))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.remaining, 900);
        assert_eq!(row.consumed, 100);
        assert_eq!(row.transaction_count, 1);
        assert_eq!(row.version, 2);

        let missing = store
            .sync_from_cache(date(2099, 1, 1), 1, 1, 1)
            .await
            .unwrap();
        assert_eq!(missing, 0);
    }

    #[tokio::test]
    async fn reset_month_restores_full_balance() {
        let store = store();
        store
            .upsert(&DailyLimit::seeded(date(2025, 3, 15), 1_000, 0))
            .await
            .unwrap();
        store.consume_direct(date(2025, 3, 15), 400).await.unwrap();

        let rewritten = store.reset_month(2025, 3, None).await.unwrap();
        assert_eq!(rewritten, 1);
        let row = store
            .find_by_date(date(2025, 3, 15))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.remaining, 1_000);
        assert_eq!(row.consumed, 0);
        assert_eq!(row.transaction_count, 0);
    }

    #[tokio::test]
    async fn reset_month_with_override_replaces_initial() {
        let store = store();
        store
            .upsert(&DailyLimit::seeded(date(2025, 3, 15), 1_000, 0))
            .await
            .unwrap();

        store
            .reset_month(2025, 3, Some(5_000_000))
            .await
            .unwrap();
        let row = store
            .find_by_date(date(2025, 3, 15))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.initial_limit, 5_000_000);
        assert_eq!(row.remaining, 5_000_000);
        assert!(row.is_conserved());
    }

    #[tokio::test]
    async fn sync_history_is_newest_first() {
        let store = store();
        for (i, status) in [SyncStatus::Success, SyncStatus::Partial].iter().enumerate() {
            store
                .record_sync(&SyncHistory {
                    sync_type: SyncType::Scheduled,
                    status: *status,
                    records_synced: i as u64,
                    duration_ms: 1,
                    error_message: None,
                    started_at: i as i64,
                    completed_at: i as i64 + 1,
                })
                .await
                .unwrap();
        }

        let recent = store.recent_syncs(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, SyncStatus::Partial);
        assert_eq!(recent[1].status, SyncStatus::Success);

        let capped = store.recent_syncs(1).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].status, SyncStatus::Partial);
    }
}
