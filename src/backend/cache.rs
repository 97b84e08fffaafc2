//! Caching wrapper for probability estimates.
//!
//! Keys are a stable hash of (claim, context); entries expire after a
//! TTL and are evicted in insertion order once the capacity is reached.
//! Eviction is FIFO-by-insertion, an LRU approximation that matches
//! the behavior callers can rely on. Duplicate concurrent misses may
//! both reach the wrapped backend; the second insertion wins.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::Result;

use super::VerifierBackend;

/// Configuration for the caching wrapper.
#[derive(Debug, Clone)]
pub struct CachingConfig {
    /// Maximum number of entries before FIFO eviction
    pub capacity: usize,
    /// Entry lifetime; an entry is valid only while its age < ttl
    pub ttl: Duration,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    probability: f64,
    created: Instant,
}

struct CacheInner {
    map: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

/// Wraps a backend with a TTL'd, capacity-bounded estimate cache.
pub struct CachingBackend {
    inner: Arc<dyn VerifierBackend>,
    config: CachingConfig,
    state: RwLock<CacheInner>,
    name: String,
}

impl CachingBackend {
    pub fn new(inner: Arc<dyn VerifierBackend>, config: CachingConfig) -> Self {
        let name = format!("cached({})", inner.name());
        Self {
            inner,
            config,
            state: RwLock::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
            name,
        }
    }

    /// Stable cache key: first 32 hex characters of
    /// SHA-256(claim ‖ 0x00 ‖ context).
    pub fn cache_key(claim: &str, context: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(claim.as_bytes());
        hasher.update([0u8]);
        hasher.update(context.as_bytes());
        let digest = hasher.finalize();
        let mut hex = format!("{digest:x}");
        hex.truncate(32);
        hex
    }

    /// Snapshot of the counters and current size.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read().expect("cache lock");
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.map.len(),
        }
    }

    /// Drop every entry. Counters are preserved.
    pub fn clear(&self) {
        let mut state = self.state.write().expect("cache lock");
        state.map.clear();
        state.order.clear();
    }

    /// Probe under the shared guard; no counter updates here.
    fn probe(&self, key: &str) -> Option<f64> {
        let state = self.state.read().expect("cache lock");
        state
            .map
            .get(key)
            .filter(|entry| entry.created.elapsed() < self.config.ttl)
            .map(|entry| entry.probability)
    }

    fn record_hit(&self) {
        self.state.write().expect("cache lock").hits += 1;
    }

    fn record_miss(&self) {
        self.state.write().expect("cache lock").misses += 1;
    }

    fn insert(&self, key: String, probability: f64) {
        let mut state = self.state.write().expect("cache lock");
        if state.map.contains_key(&key) {
            // Raced duplicate miss or expired entry: overwrite in place,
            // the queue already holds the key once
            state.map.insert(
                key,
                CacheEntry {
                    probability,
                    created: Instant::now(),
                },
            );
            return;
        }
        while state.map.len() >= self.config.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.map.remove(&oldest);
                }
                None => break,
            }
        }
        state.order.push_back(key.clone());
        state.map.insert(
            key,
            CacheEntry {
                probability,
                created: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl VerifierBackend for CachingBackend {
    async fn estimate_probability(&self, claim: &str, context: &str) -> Result<f64> {
        let key = Self::cache_key(claim, context);

        if let Some(probability) = self.probe(&key) {
            self.record_hit();
            trace!(key = %key, probability, "cache hit");
            return Ok(probability);
        }
        self.record_miss();

        let probability = self.inner.estimate_probability(claim, context).await?;
        self.insert(key, probability);
        Ok(probability)
    }

    async fn batch_estimate(&self, claims: &[&str], context: &str) -> Result<Vec<f64>> {
        let keys: Vec<String> = claims
            .iter()
            .map(|claim| Self::cache_key(claim, context))
            .collect();

        let mut output: Vec<Option<f64>> = Vec::with_capacity(claims.len());
        let mut missing: Vec<usize> = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            match self.probe(key) {
                Some(probability) => {
                    self.record_hit();
                    output.push(Some(probability));
                }
                None => {
                    self.record_miss();
                    output.push(None);
                    missing.push(i);
                }
            }
        }

        if !missing.is_empty() {
            // One batch call for all uncached indices, spliced back in
            // original order
            let miss_claims: Vec<&str> = missing.iter().map(|&i| claims[i]).collect();
            let fresh = self.inner.batch_estimate(&miss_claims, context).await?;
            for (&i, probability) in missing.iter().zip(fresh) {
                self.insert(keys[i].clone(), probability);
                output[i] = Some(probability);
            }
        }

        Ok(output
            .into_iter()
            .map(|p| p.expect("all indices filled"))
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
