//! Metrics collection for cache zones
//!
//! Counters are plain atomics updated from the coordinator actor and its
//! workers. A [`MetricsSnapshot`] can be rendered in the Prometheus text
//! exposition format.

use crate::error::{Result, StoreError};
use prometheus::{Encoder, IntGauge, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for one cache zone
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct ZoneMetrics {
    // Lookups
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    coalesced_requests: AtomicU64,

    // Upstream
    upstream_fetches: AtomicU64,
    upstream_errors: AtomicU64,
    header_fetches: AtomicU64,
    bytes_from_origin: AtomicU64,

    // Storage
    parts_stored: AtomicU64,
    store_errors: AtomicU64,
    rejected_parts: AtomicU64,

    // Removal
    evictions: AtomicU64,
    eviction_errors: AtomicU64,
    expirations: AtomicU64,
}

/// Snapshot of zone metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Requests attached to a fetch that was already in flight
    pub coalesced_requests: u64,

    pub upstream_fetches: u64,
    pub upstream_errors: u64,
    pub header_fetches: u64,
    pub bytes_from_origin: u64,

    pub parts_stored: u64,
    pub store_errors: u64,
    /// Stored parts dropped right away (not cacheable or refused by the
    /// cache algorithm)
    pub rejected_parts: u64,

    pub evictions: u64,
    pub eviction_errors: u64,
    pub expirations: u64,
}

impl ZoneMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upstream part fetch
    ///
    /// # Arguments
    /// * `result` - Body size on success, `None` on failure
    pub fn record_upstream_fetch(&self, result: Option<u64>) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        match result {
            Some(bytes) => {
                self.bytes_from_origin.fetch_add(bytes, Ordering::Relaxed);
            }
            None => {
                self.upstream_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_header_fetch(&self, success: bool) {
        self.header_fetches.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.upstream_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_part_stored(&self) {
        self.parts_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_part(&self) {
        self.rejected_parts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction applied to storage
    pub fn record_eviction(&self, success: bool) {
        if success {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.eviction_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            header_fetches: self.header_fetches.load(Ordering::Relaxed),
            bytes_from_origin: self.bytes_from_origin.load(Ordering::Relaxed),
            parts_stored: self.parts_stored.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            rejected_parts: self.rejected_parts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_errors: self.eviction_errors.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Hit rate in percent over hits and misses, 0 without lookups
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Render the snapshot in the Prometheus text format, labelled with the
    /// zone id
    pub fn to_prometheus(&self, zone_id: &str) -> Result<String> {
        let registry = Registry::new();
        let values = [
            ("slice_store_cache_hits", "Lookups served from storage", self.cache_hits),
            ("slice_store_cache_misses", "Lookups that started an upstream fetch", self.cache_misses),
            ("slice_store_coalesced_requests", "Requests attached to an in-flight fetch", self.coalesced_requests),
            ("slice_store_upstream_fetches", "Part fetches sent upstream", self.upstream_fetches),
            ("slice_store_upstream_errors", "Failed upstream fetches", self.upstream_errors),
            ("slice_store_header_fetches", "Header fetches sent upstream", self.header_fetches),
            ("slice_store_bytes_from_origin", "Body bytes received from upstream", self.bytes_from_origin),
            ("slice_store_parts_stored", "Parts written to storage", self.parts_stored),
            ("slice_store_store_errors", "Failed storage writes", self.store_errors),
            ("slice_store_rejected_parts", "Fetched parts not retained", self.rejected_parts),
            ("slice_store_evictions", "Evicted parts deleted from storage", self.evictions),
            ("slice_store_eviction_errors", "Evicted parts that could not be deleted", self.eviction_errors),
            ("slice_store_expirations", "Objects removed after their TTL", self.expirations),
        ];

        for (name, help, value) in values {
            let gauge = IntGauge::with_opts(Opts::new(name, help).const_label("zone", zone_id))
                .map_err(prometheus_error)?;
            gauge.set(value as i64);
            registry
                .register(Box::new(gauge))
                .map_err(prometheus_error)?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(prometheus_error)?;
        String::from_utf8(buffer).map_err(|e| StoreError::InternalError(e.to_string()))
    }
}

fn prometheus_error(err: prometheus::Error) -> StoreError {
    StoreError::InternalError(format!("metrics encoding failed: {}", err))
}
