//! Inference Cache: local LRU → shared KV → disk.
//!
//! Writes go through to every tier. A hit in a lower tier is promoted into every tier
//! above it. A failing tier is logged and skipped; the cache never fails a request.

pub mod disk;
pub mod fingerprint;
pub mod local;
pub mod remote;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::models::embedding::EmbeddingVector;

pub use fingerprint::Fingerprint;
use local::LocalTier;

/// A tier that lives outside the process. Errors are `EngineError::CacheUnavailable`.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn get(&self, fp: &Fingerprint) -> Result<Option<EmbeddingVector>, EngineError>;
    async fn put(&self, fp: &Fingerprint, vector: &EmbeddingVector) -> Result<(), EngineError>;
}

#[derive(Default)]
struct Counters {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    tier_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub local_entries: usize,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub tier_errors: u64,
}

pub struct InferenceCache {
    local: LocalTier,
    /// Ordered fastest first.
    lower: Vec<Box<dyn CacheTier>>,
    counters: Counters,
}

impl InferenceCache {
    pub fn new(local: LocalTier, lower: Vec<Box<dyn CacheTier>>) -> Self {
        Self {
            local,
            lower,
            counters: Counters::default(),
        }
    }

    pub async fn get(&self, fp: &Fingerprint) -> Option<EmbeddingVector> {
        if let Some(vector) = self.local.get(fp) {
            self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some(vector);
        }

        for (depth, tier) in self.lower.iter().enumerate() {
            match tier.get(fp).await {
                Ok(Some(vector)) => {
                    self.record_hit(tier.name());
                    debug!("Cache hit for {fp} in {} tier", tier.name());
                    self.promote(fp, &vector, depth).await;
                    return Some(vector);
                }
                Ok(None) => {}
                Err(e) => self.tier_failed(&e),
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Writes through to every tier.
    pub async fn put(&self, fp: &Fingerprint, vector: &EmbeddingVector) {
        self.local.put(fp.clone(), vector.clone());
        for tier in &self.lower {
            if let Err(e) = tier.put(fp, vector).await {
                self.tier_failed(&e);
            }
        }
    }

    /// Copies a hit found at `lower[depth]` into the local tier and every lower tier above it.
    async fn promote(&self, fp: &Fingerprint, vector: &EmbeddingVector, depth: usize) {
        self.local.put(fp.clone(), vector.clone());
        for tier in &self.lower[..depth] {
            if let Err(e) = tier.put(fp, vector).await {
                self.tier_failed(&e);
            }
        }
    }

    fn record_hit(&self, tier: &str) {
        let counter = match tier {
            "remote" => &self.counters.remote_hits,
            _ => &self.counters.disk_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn tier_failed(&self, e: &EngineError) {
        self.counters.tier_errors.fetch_add(1, Ordering::Relaxed);
        warn!("Skipping cache tier: {e}");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_entries: self.local.len(),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            tier_errors: self.counters.tier_errors.load(Ordering::Relaxed),
        }
    }
}
