//! Limitgate Core -- daily-limit domain types, cache key schema, and API messages.
//!
//! This crate provides the foundation layer shared by the limit server and
//! external clients:
//!
//! - **Types** ([`types`]): `DailyLimit`, `LimitCacheEntry`, `SyncHistory`,
//!   and the wire enums (`ConsumeSource`, `SyncType`, `SyncStatus`)
//! - **Keys** ([`keys`]): `KeySchema` for deterministic fast-store key naming
//! - **Clock** ([`clock`]): `ClockSource` abstraction with system and fixed impls
//! - **Messages** ([`messages`]): JSON request/response bodies of the REST surface

pub mod clock;
pub mod keys;
pub mod messages;
pub mod types;

// Clock
pub use clock::{date_of_millis, ClockSource, FixedClock, SystemClock};

// Keys
pub use keys::KeySchema;

// Types
pub use types::{
    ConsumeSource, DailyLimit, LimitCacheEntry, SyncHistory, SyncStatus, SyncType,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }

    /// Verify all re-exports are accessible from the crate root.
    #[test]
    fn reexports_accessible() {
        let _schema = KeySchema::default();
        let _clock = SystemClock;
        let _source = ConsumeSource::Cache;
        let _status = SyncStatus::Success;
        let _ = date_of_millis(0);
    }
}
