//! The limit engine: public consume/query API.
//!
//! Owns the cache-vs-direct decision and the warm/miss/retry protocol.

pub mod limit_engine;

pub use limit_engine::{
    ConsumeError, ConsumeMessage, ConsumeOutcome, LimitEngine, LOAD_TEST_LIMIT,
};
