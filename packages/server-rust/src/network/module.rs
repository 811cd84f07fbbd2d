//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! split lets the rest of the application wire stores, engine, and workers
//! between `start()` and `serve()`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    cache_stats_handler, clear_cache_handler, consume_handler, day_limit_handler, health_handler,
    liveness_handler, month_limits_handler, readiness_handler, reset_handler, status_handler,
    sync_stats_handler, today_limit_handler, trigger_sync_handler, warm_cache_handler, AppState,
};
use super::middleware::apply_http_layers;
use super::shutdown::ShutdownController;

/// How long the drain waits for in-flight requests after the server stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Manages the HTTP server lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Shared handle to the shutdown controller, for the `AppState` and for
    /// wiring the sync worker's shutdown signal.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router: consume, read-only limits, cache and sync
    /// administration, reset, status, and the health probes.
    #[must_use]
    pub fn build_router(&self, app: AppState) -> Router {
        let router = Router::new()
            .route("/consume", post(consume_handler))
            .route("/limits/today", get(today_limit_handler))
            .route("/limits/{year}/{month}", get(month_limits_handler))
            .route("/limits/{year}/{month}/{day}", get(day_limit_handler))
            .route("/cache/warm", post(warm_cache_handler))
            .route("/cache/clear", post(clear_cache_handler))
            .route("/cache/stats", get(cache_stats_handler))
            .route("/sync", post(trigger_sync_handler))
            .route("/sync/stats", get(sync_stats_handler))
            .route("/reset", post(reset_handler))
            .route("/status", get(status_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler));

        apply_http_layers(router, &self.config).with_state(app)
    }

    /// Binds the TCP listener, returning the actual bound port (relevant
    /// when port 0 requests an OS-assigned one).
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error on a fatal I/O error or TLS misconfiguration.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        self,
        app: AppState,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router(app);
        let listener = self
            .listener
            .expect("start() must be called before serve()");
        let shutdown_ctrl = self.shutdown;
        let config = self.config;

        shutdown_ctrl.mark_ready();

        if let Some(tls) = config.tls.as_ref() {
            serve_tls(listener, router, tls, shutdown).await?;
        } else {
            info!("serving plain HTTP connections");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await?;
        }

        drain(&shutdown_ctrl).await;
        Ok(())
    }
}

/// Serves TLS connections via `axum-server` with rustls, reusing the
/// pre-bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &super::config::TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("serving TLS connections on {addr}");

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

/// Drains in-flight requests after the server stopped accepting.
async fn drain(shutdown_ctrl: &Arc<ShutdownController>) {
    shutdown_ctrl.begin_drain();
    if shutdown_ctrl.drain(DRAIN_TIMEOUT).await {
        info!("all in-flight requests drained");
    } else {
        warn!("drain timeout expired with in-flight requests remaining");
    }
}
