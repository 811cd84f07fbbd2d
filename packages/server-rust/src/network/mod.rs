//! HTTP surface of the limit server.
//!
//! Follows the deferred startup pattern: [`NetworkModule::new`] allocates
//! shared state, [`NetworkModule::start`] binds the listener, and
//! [`NetworkModule::serve`] accepts connections until shutdown.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::{NetworkConfig, TlsConfig};
pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::{InFlight, ServiceState, ShutdownController};
