//! Limitgate server binary.
//!
//! Wires the stores, the limit engine, the sync worker, and the HTTP module
//! together, then serves until SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use limitgate_core::{ClockSource, DailyLimit, KeySchema, SyncType, SystemClock};
use limitgate_server::config::{CacheConfig, SyncConfig};
use limitgate_server::engine::LimitEngine;
use limitgate_server::faststore::{FastStore, MemoryFastStore};
use limitgate_server::metrics;
use limitgate_server::network::{AppState, NetworkConfig, NetworkModule};
use limitgate_server::storage::{month_bounds, MemoryRecordStore, RecordStore};
use limitgate_server::sync::{DirtyKeys, SyncService};

#[derive(Debug, Parser)]
#[command(name = "limitgate", about = "Write-behind daily-limit cache server")]
struct Cli {
    /// Bind host.
    #[arg(long, env = "LIMITGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bind port (0 = OS-assigned).
    #[arg(long, env = "LIMITGATE_PORT", default_value_t = 8080)]
    port: u16,

    /// PostgreSQL connection string; falls back to the in-memory record
    /// store when omitted.
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Disable the cache tier: every consume takes the direct path.
    #[arg(long, env = "LIMITGATE_NO_CACHE")]
    no_cache: bool,

    /// Fast-store key prefix.
    #[arg(long, env = "LIMITGATE_KEY_PREFIX", default_value = "limits")]
    key_prefix: String,

    /// Cache TTL in hours.
    #[arg(long, env = "LIMITGATE_TTL_HOURS", default_value_t = 24)]
    ttl_hours: u64,

    /// Disable the scheduled sync worker (manual `POST /sync` still works).
    #[arg(long, env = "LIMITGATE_NO_SYNC")]
    no_sync: bool,

    /// Seconds between sync ticks.
    #[arg(long, env = "LIMITGATE_SYNC_INTERVAL", default_value_t = 5)]
    sync_interval: u64,

    /// Dirty keys per write-back batch.
    #[arg(long, env = "LIMITGATE_SYNC_BATCH_SIZE", default_value_t = 100)]
    sync_batch_size: usize,

    /// Per-key write attempts within one tick.
    #[arg(long, env = "LIMITGATE_SYNC_RETRIES", default_value_t = 3)]
    sync_retries: u32,

    /// Run a STARTUP sync once after the initial warm.
    #[arg(long, env = "LIMITGATE_SYNC_ON_STARTUP")]
    sync_on_startup: bool,

    /// Skip the startup warm of the current month.
    #[arg(long, env = "LIMITGATE_NO_WARM")]
    no_warm: bool,

    /// Seed every day of the current month with this daily limit
    /// (minor-currency units). Intended for demos and load tests.
    #[arg(long, env = "LIMITGATE_SEED_DAILY_LIMIT")]
    seed_daily_limit: Option<i64>,

    /// Prometheus exporter listen address; exporter disabled when omitted.
    #[arg(long, env = "LIMITGATE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Cli {
    fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: !self.no_cache,
            key_prefix: self.key_prefix.clone(),
            ttl_hours: self.ttl_hours,
        }
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            enabled: !self.no_sync,
            interval_seconds: self.sync_interval,
            batch_size: self.sync_batch_size,
            retry_attempts: self.sync_retries,
            sync_on_startup: self.sync_on_startup,
        }
    }
}

#[cfg(feature = "postgres")]
async fn build_record_store(
    cli: &Cli,
    clock: &Arc<dyn ClockSource>,
) -> anyhow::Result<Arc<dyn RecordStore>> {
    use limitgate_server::storage::PostgresRecordStore;

    if let Some(url) = &cli.database_url {
        let store = PostgresRecordStore::connect(url, Arc::clone(clock)).await?;
        store.run_migrations().await?;
        info!("record store: postgres");
        return Ok(Arc::new(store));
    }
    info!("record store: in-memory");
    Ok(Arc::new(MemoryRecordStore::new(Arc::clone(clock))))
}

#[cfg(not(feature = "postgres"))]
async fn build_record_store(
    _cli: &Cli,
    clock: &Arc<dyn ClockSource>,
) -> anyhow::Result<Arc<dyn RecordStore>> {
    info!("record store: in-memory");
    Ok(Arc::new(MemoryRecordStore::new(Arc::clone(clock))))
}

/// Seeds every day of the current month with a full balance.
async fn seed_current_month(
    records: &Arc<dyn RecordStore>,
    clock: &Arc<dyn ClockSource>,
    daily_limit: i64,
) -> anyhow::Result<u32> {
    use chrono::Datelike;

    let today = clock.today();
    let Some((mut day, next)) = month_bounds(today.year(), today.month()) else {
        anyhow::bail!("current date {today} has no month bounds");
    };

    let now = clock.now_millis();
    let mut seeded = 0;
    while day < next {
        records
            .upsert(&DailyLimit::seeded(day, daily_limit, now))
            .await?;
        seeded += 1;
        day = day.succ_opt().unwrap_or(next);
    }
    Ok(seeded)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        metrics::describe();
        info!("prometheus exporter listening on {addr}");
    }

    let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
    let records = build_record_store(&cli, &clock).await?;
    let fast: Arc<dyn FastStore> = Arc::new(MemoryFastStore::new(KeySchema::new(
        cli.key_prefix.clone(),
    )));
    let dirty = Arc::new(DirtyKeys::new());

    let cache_config = cli.cache_config();
    let sync_config = cli.sync_config();

    if let Some(daily_limit) = cli.seed_daily_limit {
        let seeded = seed_current_month(&records, &clock, daily_limit).await?;
        info!(seeded, daily_limit, "seeded current month");
    }

    let engine = Arc::new(LimitEngine::new(
        Arc::clone(&records),
        Arc::clone(&fast),
        Arc::clone(&dirty),
        Arc::clone(&clock),
        cache_config.clone(),
    ));
    let sync = Arc::new(SyncService::new(
        records,
        fast,
        dirty,
        clock,
        sync_config.clone(),
    ));

    if cache_config.enabled && !cli.no_warm {
        let warmed = engine.warm_current_month().await?;
        info!(warmed, "startup warm complete");
    }
    if sync_config.sync_on_startup {
        let report = sync.run_once(SyncType::Startup, None).await;
        info!(records = report.records_synced, "startup sync complete");
    }

    let mut network = NetworkModule::new(NetworkConfig {
        host: cli.host.clone(),
        port: cli.port,
        ..NetworkConfig::default()
    });
    let port = network.start().await?;
    info!(port, "limitgate ready");

    let shutdown_ctrl = network.shutdown_controller();
    let worker = sync_config
        .enabled
        .then(|| Arc::clone(&sync).spawn(shutdown_ctrl.subscribe()));

    let app = AppState {
        engine,
        sync: Arc::clone(&sync),
        shutdown: Arc::clone(&shutdown_ctrl),
        start_time: Instant::now(),
    };

    network
        .serve(app, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("SIGINT received, shutting down");
        })
        .await?;

    // serve() already began the drain; make sure the worker saw the signal,
    // then wait for its final flush.
    shutdown_ctrl.begin_drain();
    if let Some(handle) = worker {
        handle.await?;
    }

    info!("shutdown complete");
    Ok(())
}
