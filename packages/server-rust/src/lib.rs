//! Limitgate Server -- write-behind cache for a contention-bound daily-limit table.
//!
//! A small set of rows (tens per month) is read and decremented by many
//! concurrent clients. Direct-to-database operation serializes on row locks;
//! this server interposes an in-memory fast store whose decrements are atomic
//! and batches mutations back to the record store asynchronously.

pub mod config;
pub mod engine;
pub mod faststore;
pub mod metrics;
pub mod network;
pub mod storage;
pub mod sync;

pub use config::{CacheConfig, SyncConfig};
pub use engine::{ConsumeError, ConsumeMessage, ConsumeOutcome, LimitEngine};
pub use faststore::{FastStore, FastStoreStats, MemoryFastStore, ScriptOutcome};
pub use network::{AppState, NetworkConfig, NetworkModule, ShutdownController};
pub use storage::{DirectOutcome, MemoryRecordStore, RecordStore};
pub use sync::{DirtyKeys, SyncReport, SyncService};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}

/// End-to-end scenarios over the full stack: engine + memory stores +
/// dirty set + sync worker, plus a few router round-trips.
#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::time::Instant;

    use chrono::NaiveDate;
    use tower::ServiceExt;

    use limitgate_core::messages::api::ConsumeResponse;
    use limitgate_core::{
        ClockSource, ConsumeSource, DailyLimit, FixedClock, KeySchema, SyncType,
    };

    use crate::config::{CacheConfig, SyncConfig};
    use crate::engine::LimitEngine;
    use crate::faststore::{FastStore, MemoryFastStore};
    use crate::network::{AppState, NetworkConfig, NetworkModule};
    use crate::storage::{MemoryRecordStore, RecordStore};
    use crate::sync::{DirtyKeys, SyncService};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Harness {
        records: Arc<MemoryRecordStore>,
        fast: Arc<MemoryFastStore>,
        dirty: Arc<DirtyKeys>,
        engine: Arc<LimitEngine>,
        sync: Arc<SyncService>,
    }

    fn harness() -> Harness {
        let clock: Arc<dyn ClockSource> = Arc::new(FixedClock::at_date(date(2025, 3, 15)));
        let records = Arc::new(MemoryRecordStore::new(Arc::clone(&clock)));
        let fast = Arc::new(MemoryFastStore::new(KeySchema::new("limits")));
        let dirty = Arc::new(DirtyKeys::new());
        let engine = Arc::new(LimitEngine::new(
            Arc::clone(&records) as Arc<dyn RecordStore>,
            Arc::clone(&fast) as Arc<dyn FastStore>,
            Arc::clone(&dirty),
            Arc::clone(&clock),
            CacheConfig::default(),
        ));
        let sync = Arc::new(SyncService::new(
            Arc::clone(&records) as Arc<dyn RecordStore>,
            Arc::clone(&fast) as Arc<dyn FastStore>,
            Arc::clone(&dirty),
            clock,
            SyncConfig::default(),
        ));
        Harness {
            records,
            fast,
            dirty,
            engine,
            sync,
        }
    }

    async fn seed(h: &Harness, d: NaiveDate, initial: i64) {
        h.records
            .upsert(&DailyLimit::seeded(d, initial, 0))
            .await
            .unwrap();
    }

    /// Cold hit: no prior warm, consume miss-fills, a forced sync converges
    /// the record store.
    #[tokio::test]
    async fn cold_hit_then_sync_converges() {
        let h = harness();
        let d = date(2025, 3, 15);
        seed(&h, d, 1_000_000).await;

        let outcome = h.engine.consume(d, 100, false).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.source, ConsumeSource::Cache);
        assert_eq!(outcome.remaining, 999_900);

        let key = h.fast.key_schema().remaining_key(d);
        assert!(h.dirty.contains(&key));

        let report = h.sync.run_once(SyncType::Manual, None).await;
        assert_eq!(report.records_synced, 1);

        let row = h.records.find_by_date(d).await.unwrap().unwrap();
        assert_eq!(row.remaining, 999_900);
        assert_eq!(row.consumed, 100);
        assert_eq!(row.transaction_count, 1);
        assert!(row.is_conserved());
        assert!(!h.dirty.contains(&key));
    }

    /// Insufficient balance: no mutation anywhere, no dirty mark.
    #[tokio::test]
    async fn insufficient_leaves_no_trace() {
        let h = harness();
        let d = date(2025, 3, 16);
        let mut row = DailyLimit::seeded(d, 100, 0);
        row.remaining = 50;
        row.consumed = 50;
        h.records.upsert(&row).await.unwrap();

        let outcome = h.engine.consume(d, 100, false).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message.to_wire(), "Insufficient limit");
        assert_eq!(outcome.remaining, 50);
        assert!(h.dirty.is_empty());

        h.sync.run_once(SyncType::Manual, None).await;
        let after = h.records.find_by_date(d).await.unwrap().unwrap();
        assert_eq!(after.version, 1, "sync must not touch an undirtied row");
        assert_eq!(after.remaining, 50);
    }

    /// Concurrent fairness: 1000 parallel consumes of 100 against 10_000
    /// admit exactly 100 and never over-admit.
    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_consumes_admit_exactly_the_balance() {
        let h = harness();
        let d = date(2025, 3, 17);
        seed(&h, d, 10_000).await;
        h.engine.warm_month(2025, 3).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..1_000 {
            let engine = Arc::clone(&h.engine);
            tasks.push(tokio::spawn(
                async move { engine.consume(d, 100, false).await },
            ));
        }

        let mut admitted = 0i64;
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            if outcome.success {
                admitted += 100;
            }
        }

        assert_eq!(admitted, 10_000);
        let entry = h.fast.read_entry(d).await.unwrap().unwrap();
        assert_eq!(entry.remaining, 0);
        assert_eq!(entry.consumed, 10_000);
        assert_eq!(entry.transaction_count, 100);
    }

    /// Miss-then-fill after a cache flush.
    #[tokio::test]
    async fn flushed_cache_refills_on_consume() {
        let h = harness();
        let d = date(2025, 3, 18);
        seed(&h, d, 1_000).await;
        h.engine.warm_month(2025, 3).await.unwrap();
        h.engine.clear_cache().await.unwrap();

        let outcome = h.engine.consume(d, 100, false).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.remaining, 900);
        assert!(h.fast.read_entry(d).await.unwrap().is_some());
    }

    /// Missing date is a clean business denial.
    #[tokio::test]
    async fn missing_date_is_denied() {
        let h = harness();
        let outcome = h
            .engine
            .consume(date(2099, 1, 1), 100, false)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message.to_wire(), "Date not found");
    }

    /// Direct-path speedometer: the bottleneck path still admits exactly
    /// the balance under parallel load.
    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn direct_path_is_slow_but_correct() {
        let h = harness();
        let d = date(2025, 3, 19);
        seed(&h, d, 1_000).await;

        let mut tasks = Vec::new();
        for _ in 0..1_000 {
            let engine = Arc::clone(&h.engine);
            tasks.push(tokio::spawn(
                async move { engine.consume(d, 1, true).await },
            ));
        }

        let mut successes = 0;
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            assert_eq!(outcome.source, ConsumeSource::Database);
            if outcome.success {
                successes += 1;
            }
        }

        assert_eq!(successes, 1_000);
        let row = h.records.find_by_date(d).await.unwrap().unwrap();
        assert_eq!(row.remaining, 0);
        assert_eq!(row.transaction_count, 1_000);
        assert!(row.is_conserved());
        // The cache tier never saw the traffic.
        assert!(h.dirty.is_empty());
    }

    /// Convergence: after a quiet sync, record store equals fast store for
    /// every synced key.
    #[tokio::test]
    async fn sync_converges_all_dirty_keys() {
        let h = harness();
        for day in 10..15 {
            seed(&h, date(2025, 3, day), 1_000).await;
        }
        for day in 10..15 {
            h.engine
                .consume(date(2025, 3, day), i64::from(day), false)
                .await
                .unwrap();
        }
        assert_eq!(h.dirty.len(), 5);

        let report = h.sync.run_once(SyncType::Manual, None).await;
        assert_eq!(report.records_synced, 5);
        assert!(h.dirty.is_empty());

        for day in 10..15 {
            let d = date(2025, 3, day);
            let row = h.records.find_by_date(d).await.unwrap().unwrap();
            let entry = h.fast.read_entry(d).await.unwrap().unwrap();
            assert_eq!(row.remaining, entry.remaining);
            assert_eq!(row.consumed, entry.consumed);
            assert_eq!(row.transaction_count, entry.transaction_count);
        }
    }

    /// Warm idempotence: re-warming identical rows changes nothing.
    #[tokio::test]
    async fn warm_twice_is_identical() {
        let h = harness();
        seed(&h, date(2025, 3, 15), 1_000).await;

        h.engine.warm_month(2025, 3).await.unwrap();
        let first = h
            .fast
            .read_entry(date(2025, 3, 15))
            .await
            .unwrap()
            .unwrap();
        let dirty_before = h.dirty.len();

        h.engine.warm_month(2025, 3).await.unwrap();
        let second = h
            .fast
            .read_entry(date(2025, 3, 15))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(h.dirty.len(), dirty_before);
    }

    // ---- Router round-trips ----

    fn router(h: &Harness) -> axum::Router {
        let module = NetworkModule::new(NetworkConfig::default());
        module.build_router(AppState {
            engine: Arc::clone(&h.engine),
            sync: Arc::clone(&h.sync),
            shutdown: module.shutdown_controller(),
            start_time: Instant::now(),
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn consume_endpoint_round_trips() {
        let h = harness();
        seed(&h, date(2025, 3, 15), 1_000_000).await;
        let app = router(&h);

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/consume")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(
                r#"{"date":"2025-03-15","amount":100,"transactionId":"tx-1"}"#,
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let parsed: ConsumeResponse =
            serde_json::from_value(body_json(response).await).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.transaction_id, "tx-1");
        assert_eq!(parsed.amount_consumed, 100);
        assert_eq!(parsed.remaining_limit, 999_900);
        assert_eq!(parsed.source, ConsumeSource::Cache);
        assert_eq!(parsed.message, "Success");
    }

    #[tokio::test]
    async fn consume_endpoint_rejects_bad_amount() {
        let h = harness();
        let app = router(&h);

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/consume")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"amount":0}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("positive"));
    }

    #[tokio::test]
    async fn status_endpoint_reports_health() {
        let h = harness();
        let app = router(&h);

        let request = axum::http::Request::builder()
            .uri("/status")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["cacheEnabled"], true);
        assert_eq!(json["syncHealthy"], true);
    }

    #[tokio::test]
    async fn unknown_day_is_404() {
        let h = harness();
        let app = router(&h);

        let request = axum::http::Request::builder()
            .uri("/limits/2099/1/1")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
