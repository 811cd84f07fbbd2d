//! Periodic and lifecycle-triggered flusher of the dirty set.
//!
//! Every trigger type (`SCHEDULED`, `MANUAL`, `STARTUP`, `SHUTDOWN`) runs the
//! same tick body behind the same reentry guard: snapshot the dirty set, read
//! each key's live cache value, blind-write it into the record store in
//! batches, then remove only the keys that were actually written back.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use limitgate_core::messages::api::SyncStatsResponse;
use limitgate_core::{ClockSource, SyncHistory, SyncStatus, SyncType};

use crate::config::SyncConfig;
use crate::faststore::FastStore;
use crate::metrics;
use crate::storage::RecordStore;

use super::dirty::DirtyKeys;

/// Consecutive failed ticks after which the worker reports unhealthy.
const UNHEALTHY_AFTER_FAILURES: u32 = 3;
/// The worker is also unhealthy when the last successful tick is older than
/// this many intervals.
const UNHEALTHY_AFTER_INTERVALS: u32 = 3;

/// Outcome of one sync run, returned to the caller of [`SyncService::run_once`].
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub sync_type: SyncType,
    pub status: SyncStatus,
    pub records_synced: u64,
    pub failed_keys: u64,
    pub duration: Duration,
    /// `true` when another run held the guard and this one was a no-op.
    pub skipped: bool,
}

/// What happened to a single dirty key within a tick.
enum KeyOutcome {
    /// The live cache value was written into the record store.
    Written,
    /// Nothing to write (entry evicted, or the key name is not ours);
    /// the key leaves the dirty set without a record-store write.
    Dropped,
}

/// Drains dirty keys into the record store.
pub struct SyncService {
    records: Arc<dyn RecordStore>,
    fast: Arc<dyn FastStore>,
    dirty: Arc<DirtyKeys>,
    clock: Arc<dyn ClockSource>,
    config: SyncConfig,
    in_progress: AtomicBool,
    consecutive_failures: AtomicU32,
    last_success: Mutex<Instant>,
}

impl SyncService {
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordStore>,
        fast: Arc<dyn FastStore>,
        dirty: Arc<DirtyKeys>,
        clock: Arc<dyn ClockSource>,
        config: SyncConfig,
    ) -> Self {
        Self {
            records,
            fast,
            dirty,
            clock,
            config,
            in_progress: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            // Start "as if" a sync just succeeded; staleness accrues from here.
            last_success: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn seconds_since_last_success(&self) -> u64 {
        self.last_success.lock().elapsed().as_secs()
    }

    /// Health verdict surfaced by the status endpoint: unhealthy after three
    /// consecutive failed ticks or when the last good tick is too old.
    #[must_use]
    pub fn healthy(&self) -> bool {
        if self.consecutive_failures.load(Ordering::Relaxed) >= UNHEALTHY_AFTER_FAILURES {
            return false;
        }
        if !self.config.enabled {
            // No scheduled ticks are expected; staleness means nothing.
            return true;
        }
        self.last_success.lock().elapsed()
            <= self.config.interval() * UNHEALTHY_AFTER_INTERVALS
    }

    /// Assembles the `/sync/stats` view, including recent history rows.
    ///
    /// # Errors
    ///
    /// Returns an error when the record store fails to list the history.
    pub async fn stats(&self, recent_limit: usize) -> anyhow::Result<SyncStatsResponse> {
        Ok(SyncStatsResponse {
            enabled: self.config.enabled,
            healthy: self.healthy(),
            in_progress: self.in_progress(),
            dirty_keys: self.dirty.len(),
            consecutive_failures: self.consecutive_failures(),
            seconds_since_last_success: self.seconds_since_last_success(),
            recent: self.records.recent_syncs(recent_limit).await?,
        })
    }

    /// Runs one sync with the shared guard. Every trigger type uses this.
    ///
    /// `shutdown` is honored between batches, never mid-batch; keys not yet
    /// written stay dirty for the final shutdown flush.
    pub async fn run_once(
        &self,
        trigger: SyncType,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> SyncReport {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(sync_type = trigger.as_str(), "sync already in progress, skipping");
            return SyncReport {
                sync_type: trigger,
                status: SyncStatus::Success,
                records_synced: 0,
                failed_keys: 0,
                duration: Duration::ZERO,
                skipped: true,
            };
        }

        let report = self.tick(trigger, shutdown).await;
        self.in_progress.store(false, Ordering::Release);
        report
    }

    async fn tick(&self, trigger: SyncType, shutdown: Option<&watch::Receiver<bool>>) -> SyncReport {
        let started_at = self.clock.now_millis();
        let start = Instant::now();
        let snapshot = self.dirty.snapshot();

        let mut removable: Vec<String> = Vec::with_capacity(snapshot.len());
        let mut written: u64 = 0;
        let mut failed: u64 = 0;

        'batches: for chunk in snapshot.chunks(self.config.batch_size.max(1)) {
            if let Some(rx) = shutdown {
                if *rx.borrow() && trigger != SyncType::Shutdown {
                    info!("shutdown signalled, leaving remaining keys for the final flush");
                    break 'batches;
                }
            }
            for key in chunk {
                match self.sync_key(key).await {
                    Ok(KeyOutcome::Written) => {
                        written += 1;
                        removable.push(key.clone());
                    }
                    Ok(KeyOutcome::Dropped) => removable.push(key.clone()),
                    Err(e) => {
                        failed += 1;
                        warn!(key = %key, error = %e, "write-back failed, key stays dirty");
                    }
                }
            }
        }

        self.dirty.remove_all(&removable);

        let status = if failed == 0 {
            SyncStatus::Success
        } else if written > 0 {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        };

        match status {
            SyncStatus::Failed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::sync_failure();
                warn!(
                    sync_type = trigger.as_str(),
                    failed, failures, "sync tick failed"
                );
            }
            SyncStatus::Success | SyncStatus::Partial => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                *self.last_success.lock() = Instant::now();
            }
        }

        let duration = start.elapsed();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        metrics::sync_outcome(written, self.dirty.len());

        // Quiet scheduled ticks (nothing dirty) do not pollute the history.
        if !snapshot.is_empty() || trigger != SyncType::Scheduled {
            let history = SyncHistory {
                sync_type: trigger,
                status,
                records_synced: written,
                duration_ms,
                error_message: (failed > 0)
                    .then(|| format!("{failed} of {} keys failed write-back", snapshot.len())),
                started_at,
                completed_at: self.clock.now_millis(),
            };
            if let Err(e) = self.records.record_sync(&history).await {
                warn!(error = %e, "failed to append sync history");
            }
        }

        if written > 0 || failed > 0 {
            info!(
                sync_type = trigger.as_str(),
                records = written,
                failed,
                duration_ms,
                status = status.as_str(),
                "sync tick complete"
            );
        }

        SyncReport {
            sync_type: trigger,
            status,
            records_synced: written,
            failed_keys: failed,
            duration,
            skipped: false,
        }
    }

    /// Writes one dirty key back: parse the date out of the key name, read
    /// the live pair from the fast store, and blind-write it into the record
    /// store, retrying the write up to `retry_attempts` times.
    async fn sync_key(&self, key: &str) -> anyhow::Result<KeyOutcome> {
        let Some(date) = self.fast.key_schema().parse_remaining_key(key) else {
            warn!(key, "dirty key does not match the key schema, dropping");
            return Ok(KeyOutcome::Dropped);
        };

        let Some(entry) = self.fast.read_entry(date).await? else {
            // Evicted before we got to it; the record store keeps its last
            // synced snapshot of this day.
            debug!(key, "cache entry evicted before sync, dropping");
            return Ok(KeyOutcome::Dropped);
        };

        let attempts = self.config.retry_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self
                .records
                .sync_from_cache(
                    date,
                    entry.remaining,
                    entry.consumed,
                    entry.transaction_count,
                )
                .await
            {
                Ok(1) => return Ok(KeyOutcome::Written),
                Ok(n) => {
                    anyhow::bail!("expected 1 row updated for {date}, record store reported {n}")
                }
                Err(e) => {
                    debug!(key, attempt, error = %e, "sync write attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("write-back failed for {date}")))
    }

    /// Spawns the scheduled ticker. It honors `shutdown` between ticks and
    /// runs one final blocking `SHUTDOWN` flush before exiting.
    #[must_use]
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let service = self;
        tokio::spawn(async move {
            let batch_rx = shutdown.clone();
            let mut shutdown = shutdown;
            let mut ticker = tokio::time::interval(service.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        service.run_once(SyncType::Scheduled, Some(&batch_rx)).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("sync worker stopping, running final flush");
            let report = service.run_once(SyncType::Shutdown, None).await;
            info!(
                records = report.records_synced,
                failed = report.failed_keys,
                "final flush complete"
            );
        })
    }
}
