//! Cache algorithm contract
//!
//! A cache algorithm is the in-memory admission and eviction policy of one
//! cache zone. It never touches the disk: when it decides a part has to go,
//! it sends the part's index on the removal channel it was created with and
//! the fetch coordinator deletes the file out of line.

use crate::config::CacheZone;
use crate::error::{Result, StoreError};
use crate::models::ObjectIndex;
use crate::tiered_cache::TieredLruCache;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Sending half of the removal queue fed by a cache algorithm
pub type RemovalSender = UnboundedSender<ObjectIndex>;

/// Admission and eviction policy of a cache zone
pub trait CacheAlgorithm: Send + Sync {
    /// Whether the part is resident. Counts a request, and a hit if found.
    fn lookup(&self, index: &ObjectIndex) -> bool;

    /// Whether a freshly stored part should be retained
    fn should_keep(&self, index: &ObjectIndex) -> bool;

    /// Admit a new part, evicting others if the zone is full
    fn add_object(&self, index: ObjectIndex) -> Result<()>;

    /// Record an access to a resident part
    fn promote_object(&self, index: &ObjectIndex);

    /// Forget a part without emitting a removal notice. Returns whether it
    /// was resident.
    fn remove(&self, index: &ObjectIndex) -> bool;

    /// Approximate bytes used by resident parts
    fn consumed_size(&self) -> u64;

    fn stats(&self) -> CacheStats;
}

/// Point-in-time statistics of a cache algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Zone identifier
    pub id: String,
    pub hits: u64,
    pub requests: u64,
    /// Number of resident parts
    pub objects: u64,
    /// `part_size * objects`
    pub size: u64,
}

impl CacheStats {
    /// Hits as a fraction of requests, `None` before the first request
    pub fn hit_ratio(&self) -> Option<f64> {
        if self.requests == 0 {
            None
        } else {
            Some(self.hits as f64 / self.requests as f64)
        }
    }

    /// Hit percentage formatted like "67%", empty before the first request
    pub fn cache_hit_prc(&self) -> String {
        match self.hit_ratio() {
            Some(ratio) => format!("{:.0}%", ratio * 100.0),
            None => String::new(),
        }
    }
}

/// Policy that never retains anything
///
/// Every lookup misses and every stored part is rejected, which turns the
/// zone into a request-coalescing pass-through. Useful for tests and for
/// zones that should only de-duplicate upstream traffic.
#[derive(Debug, Default)]
pub struct NoopCache {
    id: String,
    requests: std::sync::atomic::AtomicU64,
}

impl NoopCache {
    pub fn new(id: impl Into<String>) -> Self {
        NoopCache {
            id: id.into(),
            requests: Default::default(),
        }
    }
}

impl CacheAlgorithm for NoopCache {
    fn lookup(&self, _index: &ObjectIndex) -> bool {
        self.requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        false
    }

    fn should_keep(&self, _index: &ObjectIndex) -> bool {
        false
    }

    fn add_object(&self, index: ObjectIndex) -> Result<()> {
        Err(StoreError::InternalError(format!(
            "noop cache does not admit {}",
            index
        )))
    }

    fn promote_object(&self, _index: &ObjectIndex) {}

    fn remove(&self, _index: &ObjectIndex) -> bool {
        false
    }

    fn consumed_size(&self) -> u64 {
        0
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            id: self.id.clone(),
            hits: 0,
            requests: self.requests.load(std::sync::atomic::Ordering::Relaxed),
            objects: 0,
            size: 0,
        }
    }
}

/// Create the cache algorithm configured for a zone
pub fn new_algorithm(zone: &CacheZone, removal: RemovalSender) -> Result<Arc<dyn CacheAlgorithm>> {
    zone.validate()?;
    match zone.algorithm.as_str() {
        "lru" => Ok(Arc::new(TieredLruCache::new(zone, removal)?)),
        "noop" => Ok(Arc::new(NoopCache::new(zone.id.clone()))),
        other => Err(StoreError::ConfigError(format!(
            "unknown cache algorithm '{}'",
            other
        ))),
    }
}
