//! Write-behind machinery: dirty-set tracking and the sync worker.
//!
//! [`DirtyKeys`] is the single point of serialization between consume
//! (producer) and sync (consumer). [`SyncService`] drains it into the record
//! store on a fixed interval and on lifecycle triggers.

pub mod dirty;
pub mod worker;

pub use dirty::DirtyKeys;
pub use worker::{SyncReport, SyncService};
