//! Content-addressed response cache
//!
//! Entries are never refreshed in place: a lookup older than the caller's
//! TTL is a miss, and the next successful call overwrites the entry. Memory
//! is bounded by an LRU capacity rather than by expiry.

use crate::types::{TimeResolution, TokenRef};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cached value stamped with the clock reading at production time
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    /// Unix milliseconds
    pub produced_at: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, ttl: Duration, now: i64) -> bool {
        now.saturating_sub(self.produced_at) < ttl.as_millis() as i64
    }
}

#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    inserts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub inserts: u64,
}

pub struct ResponseCache<T> {
    name: &'static str,
    entries: Cache<String, Arc<CacheEntry<T>>>,
    metrics: CacheMetrics,
}

impl<T> ResponseCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        log::info!("Initialized {} cache with max_capacity={}", name, max_capacity);

        Self {
            name,
            entries,
            metrics: CacheMetrics::default(),
        }
    }

    /// Cached value for `key` if it was produced less than `ttl` before `now`
    pub fn lookup(&self, key: &str, ttl: Duration, now: i64) -> Option<T> {
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh(ttl, now) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("{} cache hit: {}", self.name, short(key));
                Some(entry.value.clone())
            }
            Some(entry) => {
                self.metrics.expired.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "{} cache expired: {} (age {}ms)",
                    self.name,
                    short(key),
                    now - entry.produced_at
                );
                None
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                log::debug!("{} cache miss: {}", self.name, short(key));
                None
            }
        }
    }

    pub fn insert(&self, key: String, value: T, now: i64) {
        self.entries.insert(
            key,
            Arc::new(CacheEntry {
                value,
                produced_at: now,
            }),
        );
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            expired: self.metrics.expired.load(Ordering::Relaxed),
            inserts: self.metrics.inserts.load(Ordering::Relaxed),
        }
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}

fn digest(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Key for a verdict request.
///
/// Covers the resolution, its lookback length and the identifier/symbol
/// pairs sorted by identifier, so batch order and price ticks do not matter.
pub fn verdict_key(resolution: TimeResolution, lookback_points: usize, tokens: &[TokenRef]) -> String {
    let mut pairs: Vec<(&str, &str)> = tokens
        .iter()
        .map(|t| (t.identifier.as_str(), t.symbol.as_str()))
        .collect();
    pairs.sort_unstable();
    pairs.dedup();

    let mut canonical = format!("verdict|{}|{}", resolution.as_str(), lookback_points);
    for (identifier, symbol) in pairs {
        canonical.push('|');
        canonical.push_str(identifier);
        canonical.push(':');
        canonical.push_str(symbol);
    }
    digest(&canonical)
}

/// Key for a prediction request
pub fn prediction_key(resolution: TimeResolution, lookback_points: usize, token: &TokenRef) -> String {
    digest(&format!(
        "prediction|{}|{}|{}:{}",
        resolution.as_str(),
        lookback_points,
        token.identifier,
        token.symbol
    ))
}
