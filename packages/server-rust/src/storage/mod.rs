//! Record-store layer: the durable home of daily limits.
//!
//! Defines the [`RecordStore`] trait plus two implementations:
//!
//! - [`MemoryRecordStore`]: in-process rows with a per-row mutex standing in
//!   for the row-level write lock. Default backend; also what the test suite
//!   drives.
//! - `PostgresRecordStore` (`postgres` feature): sqlx-backed rows with
//!   `SELECT ... FOR UPDATE` transactions.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod record_store;

pub use memory::MemoryRecordStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresRecordStore;
pub use record_store::{DirectOutcome, RecordStore};

use chrono::NaiveDate;

/// First day of the month and first day of the following month, or `None`
/// for an out-of-range year/month pair.
#[must_use]
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_bounds_mid_year() {
        let (first, next) = month_bounds(2025, 3).unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(next, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap());
    }

    #[test]
    fn month_bounds_december_rolls_year() {
        let (first, next) = month_bounds(2025, 12).unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(next, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[test]
    fn month_bounds_rejects_bad_month() {
        assert!(month_bounds(2025, 0).is_none());
        assert!(month_bounds(2025, 13).is_none());
    }
}
