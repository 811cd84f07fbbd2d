//! In-memory [`FastStore`] backed by [`DashMap`].
//!
//! Scripts (consume, warm, clear) run under a single script mutex, mirroring
//! a key/value server that executes server-side scripts serially. Plain
//! reads go lock-free; they may interleave with a script, which is the same
//! visibility the sync worker gets from a real fast store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::Mutex;

use limitgate_core::{DailyLimit, KeySchema, LimitCacheEntry};

use super::fast_store::{FastStore, FastStoreStats, ScriptOutcome};

const FIELD_INITIAL_LIMIT: &str = "initial_limit";
const FIELD_CONSUMED: &str = "consumed";
const FIELD_TRANSACTION_COUNT: &str = "transaction_count";
const FIELD_VERSION: &str = "version";
const FIELD_DAY_DATE: &str = "day_date";

/// A stored value: scalar integer or field mapping.
#[derive(Debug, Clone)]
enum FastValue {
    Int(i64),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Stored {
    value: FastValue,
    expires_at: Instant,
}

impl Stored {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process fast store with script-level atomicity.
pub struct MemoryFastStore {
    keys: KeySchema,
    entries: DashMap<String, Stored>,
    /// Serializes consume/warm/clear, the way a single-threaded key/value
    /// server serializes scripts against all other commands.
    script_lock: Mutex<()>,
    script_hits: AtomicU64,
    script_misses: AtomicU64,
}

impl MemoryFastStore {
    #[must_use]
    pub fn new(keys: KeySchema) -> Self {
        Self {
            keys,
            entries: DashMap::new(),
            script_lock: Mutex::new(()),
            script_hits: AtomicU64::new(0),
            script_misses: AtomicU64::new(0),
        }
    }

    fn read_live(&self, key: &str, now: Instant) -> Option<FastValue> {
        let entry = self.entries.get(key)?;
        if entry.live(now) {
            Some(entry.value.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    fn read_int(&self, key: &str, now: Instant) -> anyhow::Result<Option<i64>> {
        match self.read_live(key, now) {
            None => Ok(None),
            Some(FastValue::Int(v)) => Ok(Some(v)),
            Some(FastValue::Hash(_)) => anyhow::bail!("{key} holds a mapping, expected integer"),
        }
    }

    fn read_hash(&self, key: &str, now: Instant) -> anyhow::Result<Option<HashMap<String, String>>> {
        match self.read_live(key, now) {
            None => Ok(None),
            Some(FastValue::Hash(map)) => Ok(Some(map)),
            Some(FastValue::Int(_)) => anyhow::bail!("{key} holds an integer, expected mapping"),
        }
    }

    fn write(&self, key: String, value: FastValue, expires_at: Instant) {
        self.entries.insert(key, Stored { value, expires_at });
    }

    /// The consume script body. Caller must hold the script lock.
    fn script_consume(&self, date: NaiveDate, amount: i64) -> anyhow::Result<ScriptOutcome> {
        let remaining_key = self.keys.remaining_key(date);
        let meta_key = self.keys.meta_key(date);
        let now = Instant::now();

        let Some(remaining) = self.read_int(&remaining_key, now)? else {
            self.script_misses.fetch_add(1, Ordering::Relaxed);
            return Ok(ScriptOutcome::Missing);
        };
        self.script_hits.fetch_add(1, Ordering::Relaxed);

        if remaining < amount {
            return Ok(ScriptOutcome::Insufficient { remaining });
        }

        // Validate the metadata before mutating anything, so a corrupt pair
        // cannot leave the two keys half-updated.
        let mut meta = self
            .read_hash(&meta_key, now)?
            .with_context(|| format!("{meta_key} absent while {remaining_key} is live"))?;
        let consumed = hash_i64(&meta, FIELD_CONSUMED)?;
        let transaction_count = hash_i64(&meta, FIELD_TRANSACTION_COUNT)?;

        let expires_at = self
            .entries
            .get(&remaining_key)
            .map_or(now, |e| e.expires_at);

        self.write(
            remaining_key,
            FastValue::Int(remaining - amount),
            expires_at,
        );
        meta.insert(FIELD_CONSUMED.to_string(), (consumed + amount).to_string());
        meta.insert(
            FIELD_TRANSACTION_COUNT.to_string(),
            (transaction_count + 1).to_string(),
        );
        self.write(meta_key, FastValue::Hash(meta), expires_at);

        Ok(ScriptOutcome::Applied {
            remaining: remaining - amount,
        })
    }

    /// The warm body. Caller must hold the script lock.
    fn script_warm(&self, row: &DailyLimit, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let mut meta = HashMap::new();
        meta.insert(
            FIELD_INITIAL_LIMIT.to_string(),
            row.initial_limit.to_string(),
        );
        meta.insert(FIELD_CONSUMED.to_string(), row.consumed.to_string());
        meta.insert(
            FIELD_TRANSACTION_COUNT.to_string(),
            row.transaction_count.to_string(),
        );
        meta.insert(FIELD_VERSION.to_string(), row.version.to_string());
        meta.insert(FIELD_DAY_DATE.to_string(), row.day_date.to_string());

        self.write(
            self.keys.remaining_key(row.day_date),
            FastValue::Int(row.remaining),
            expires_at,
        );
        self.write(
            self.keys.meta_key(row.day_date),
            FastValue::Hash(meta),
            expires_at,
        );
    }

    fn view_entry(&self, date: NaiveDate) -> anyhow::Result<Option<LimitCacheEntry>> {
        let now = Instant::now();
        let Some(remaining) = self.read_int(&self.keys.remaining_key(date), now)? else {
            return Ok(None);
        };
        let Some(meta) = self.read_hash(&self.keys.meta_key(date), now)? else {
            return Ok(None);
        };

        Ok(Some(LimitCacheEntry {
            day_date: date,
            // The scalar key is authoritative; meta never carries remaining.
            remaining,
            initial_limit: hash_i64(&meta, FIELD_INITIAL_LIMIT)?,
            consumed: hash_i64(&meta, FIELD_CONSUMED)?,
            transaction_count: hash_i64(&meta, FIELD_TRANSACTION_COUNT)?,
            version: hash_i64(&meta, FIELD_VERSION)?,
        }))
    }

    fn purge_prefix(&self) -> u64 {
        let marker = format!("{}:", self.keys.prefix());
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(&marker))
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for key in doomed {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    fn count_live(&self) -> u64 {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().live(now))
            .count() as u64
    }
}

fn hash_i64(map: &HashMap<String, String>, field: &str) -> anyhow::Result<i64> {
    map.get(field)
        .with_context(|| format!("meta field {field} missing"))?
        .parse()
        .with_context(|| format!("meta field {field} is not an integer"))
}

#[async_trait::async_trait]
impl FastStore for MemoryFastStore {
    fn key_schema(&self) -> &KeySchema {
        &self.keys
    }

    async fn warm(&self, row: &DailyLimit, ttl: Duration) -> anyhow::Result<()> {
        let _script = self.script_lock.lock();
        self.script_warm(row, ttl);
        Ok(())
    }

    async fn consume(&self, date: NaiveDate, amount: i64) -> anyhow::Result<ScriptOutcome> {
        let _script = self.script_lock.lock();
        self.script_consume(date, amount)
    }

    async fn read_entry(&self, date: NaiveDate) -> anyhow::Result<Option<LimitCacheEntry>> {
        self.view_entry(date)
    }

    async fn clear_all(&self) -> anyhow::Result<u64> {
        let _script = self.script_lock.lock();
        Ok(self.purge_prefix())
    }

    async fn server_stats(&self) -> anyhow::Result<FastStoreStats> {
        Ok(FastStoreStats {
            entries: self.count_live(),
            script_hits: self.script_hits.load(Ordering::Relaxed),
            script_misses: self.script_misses.load(Ordering::Relaxed),
        })
    }
}
