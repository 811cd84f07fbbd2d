//! Engine and sync configuration.
//!
//! Network-level settings (bind address, TLS, CORS) live in
//! [`crate::network::NetworkConfig`]; this module holds the knobs of the
//! limit engine itself.

use std::time::Duration;

/// Cache-tier configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether the cached consume path is available at all. When `false`
    /// every consume takes the direct record-store path.
    pub enabled: bool,
    /// Fast-store key prefix; keys are `<prefix>:remaining:YYYY:MM:DD` and
    /// `<prefix>:meta:YYYY:MM:DD`.
    pub key_prefix: String,
    /// TTL applied to both physical keys on warm.
    pub ttl_hours: u64,
}

impl CacheConfig {
    /// The shared TTL as a [`Duration`].
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "limits".to_string(),
            ttl_hours: 24,
        }
    }
}

/// Sync-worker configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether the scheduled sync worker runs. Manual triggers work either way.
    pub enabled: bool,
    /// Seconds between scheduled ticks.
    pub interval_seconds: u64,
    /// Dirty keys written back per batch within one tick.
    pub batch_size: usize,
    /// Attempts per key for the record-store write inside one tick.
    pub retry_attempts: u32,
    /// Run a `STARTUP` sync once after the initial warm.
    pub sync_on_startup: bool,
}

impl SyncConfig {
    /// The tick interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 5,
            batch_size: 100,
            retry_attempts: 3,
            sync_on_startup: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_defaults() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.key_prefix, "limits");
        assert_eq!(config.ttl_hours, 24);
        assert_eq!(config.ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval_seconds, 5);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.retry_attempts, 3);
        assert!(!config.sync_on_startup);
        assert_eq!(config.interval(), Duration::from_secs(5));
    }
}
