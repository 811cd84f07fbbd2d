//! Graceful shutdown coordination.
//!
//! The controller carries the service state (used by readiness probes), a
//! broadcast shutdown signal, and an in-flight request counter with RAII
//! guards. Shutdown order: the HTTP server stops accepting, the controller
//! drains in-flight requests, then the sync worker runs its final flush.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lifecycle state of the service.
///
/// `Starting -> Ready -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl ServiceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates graceful shutdown across the HTTP server and the workers.
pub struct ShutdownController {
    state: ArcSwap<ServiceState>,
    signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            state: ArcSwap::from_pointee(ServiceState::Starting),
            signal,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        **self.state.load()
    }

    /// Marks the service ready to accept traffic.
    pub fn mark_ready(&self) {
        self.state.store(Arc::new(ServiceState::Ready));
    }

    /// A receiver that flips to `true` when shutdown begins.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Moves to `Draining` and notifies every subscriber.
    pub fn begin_drain(&self) {
        self.state.store(Arc::new(ServiceState::Draining));
        // Subscribers may already be gone during teardown.
        let _ = self.signal.send(true);
    }

    /// Tracks one in-flight request for the guard's lifetime.
    #[must_use]
    pub fn track(&self) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight {
            counter: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for in-flight requests to finish, up to `timeout`.
    ///
    /// Returns `true` (and moves to `Stopped`) when the drain completed;
    /// `false` leaves the state at `Draining`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight.load(Ordering::Relaxed) > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.state.store(Arc::new(ServiceState::Stopped));
        true
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight request; decrements on drop, panics included.
pub struct InFlight {
    counter: Arc<AtomicU64>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_walks_forward() {
        let ctrl = ShutdownController::new();
        assert_eq!(ctrl.state(), ServiceState::Starting);

        ctrl.mark_ready();
        assert_eq!(ctrl.state(), ServiceState::Ready);

        ctrl.begin_drain();
        assert_eq!(ctrl.state(), ServiceState::Draining);
    }

    #[test]
    fn guards_track_in_flight_requests() {
        let ctrl = ShutdownController::new();
        assert_eq!(ctrl.in_flight(), 0);

        let a = ctrl.track();
        let b = ctrl.track();
        assert_eq!(ctrl.in_flight(), 2);

        drop(a);
        assert_eq!(ctrl.in_flight(), 1);
        drop(b);
        assert_eq!(ctrl.in_flight(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_the_drain_signal() {
        let ctrl = ShutdownController::new();
        let mut rx = ctrl.subscribe();
        assert!(!*rx.borrow());

        ctrl.begin_drain();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn drain_stops_once_requests_finish() {
        let ctrl = Arc::new(ShutdownController::new());
        ctrl.mark_ready();

        let guard = ctrl.track();
        ctrl.begin_drain();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            drop(guard);
        });

        assert!(ctrl.drain(Duration::from_secs(2)).await);
        assert_eq!(ctrl.state(), ServiceState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn drain_times_out_with_requests_outstanding() {
        let ctrl = ShutdownController::new();
        let _guard = ctrl.track();
        ctrl.begin_drain();

        assert!(!ctrl.drain(Duration::from_millis(50)).await);
        assert_eq!(ctrl.state(), ServiceState::Draining);
    }
}
