//! Cache zone wiring
//!
//! A [`Zone`] owns one disk store, one cache algorithm, one expiry scheduler
//! and one fetch coordinator. Opening a zone rebuilds the resident set of the
//! cache algorithm from what is already on disk.

use crate::cache_algorithm::{new_algorithm, CacheAlgorithm, CacheStats};
use crate::cacheability::{CachePolicy, DefaultCachePolicy};
use crate::config::{CacheZone, StoreConfig};
use crate::coordinator::{FetchCoordinator, ZoneServices};
use crate::disk_store::DiskStore;
use crate::error::Result;
use crate::expiry::ExpiryScheduler;
use crate::metrics::{MetricsSnapshot, ZoneMetrics};
use crate::models::{unix_now, ObjectId, ObjectIndex, ObjectMetadata};
use crate::range_assembler::{RangeAssembler, RangeReader};
use crate::storage::{PartReader, Storage};
use crate::upstream::{HttpUpstream, Upstream};
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// What the warm restart found on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartReport {
    /// Objects with readable metadata
    pub objects: u64,
    /// Parts admitted to the cache algorithm
    pub parts: u64,
    /// Objects discarded because their TTL had passed
    pub expired: u64,
    /// Parts discarded because the zone was already full
    pub overflow: u64,
}

/// One independently configured cache instance
pub struct Zone {
    config: CacheZone,
    coordinator: Arc<FetchCoordinator>,
    assembler: RangeAssembler,
    expiry: Arc<ExpiryScheduler>,
    restart: RestartReport,
}

impl Zone {
    /// Open a zone and rebuild its resident set from disk
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(
        config: &CacheZone,
        upstream: Arc<dyn Upstream>,
        policy: Arc<dyn CachePolicy>,
    ) -> Result<Self> {
        config.validate()?;

        let storage: Arc<dyn Storage> = Arc::new(DiskStore::new(config).await?);
        let (removal_tx, removal_rx) = mpsc::unbounded_channel();
        let algorithm = new_algorithm(config, removal_tx)?;
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let expiry = Arc::new(ExpiryScheduler::new(expired_tx));

        let restart = warm_restart(config, storage.as_ref(), algorithm.as_ref(), &expiry).await?;
        info!(
            "Zone {} restored {} parts of {} objects ({} expired objects, {} overflow parts discarded)",
            config.id, restart.parts, restart.objects, restart.expired, restart.overflow
        );

        let services = ZoneServices {
            zone_id: config.id.clone(),
            storage,
            algorithm,
            upstream,
            policy,
            expiry: expiry.clone(),
            metrics: Arc::new(ZoneMetrics::new()),
        };
        let coordinator = Arc::new(FetchCoordinator::start(services, removal_rx, expired_rx));
        let assembler = RangeAssembler::new(coordinator.clone(), config.part_size);

        Ok(Zone {
            config: config.clone(),
            coordinator,
            assembler,
            expiry,
            restart,
        })
    }

    /// Open every zone of a configuration against its HTTP upstream
    pub async fn open_all(config: &StoreConfig) -> Result<Vec<Zone>> {
        config.validate()?;
        let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new(
            config.upstream_address.clone(),
            config.upstream_timeout(),
        )?);

        let mut zones = Vec::with_capacity(config.zones.len());
        for zone in &config.zones {
            let policy = Arc::new(DefaultCachePolicy::new(zone.default_ttl()));
            zones.push(Zone::open(zone, upstream.clone(), policy).await?);
        }
        Ok(zones)
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &CacheZone {
        &self.config
    }

    pub fn restart_report(&self) -> &RestartReport {
        &self.restart
    }

    /// Read one part
    pub async fn fetch(&self, index: &ObjectIndex) -> Result<PartReader> {
        self.coordinator.fetch(index).await
    }

    pub async fn fetch_metadata(&self, id: &ObjectId) -> Result<ObjectMetadata> {
        self.coordinator.fetch_metadata(id).await
    }

    pub async fn fetch_headers(&self, id: &ObjectId) -> Result<HeaderMap> {
        self.coordinator.fetch_headers(id).await
    }

    /// Stream the bytes `start..=end` of an object
    pub fn read(&self, id: &ObjectId, start: u64, end: u64) -> Result<RangeReader> {
        self.assembler.read(id, start, end)
    }

    pub fn range_assembler(&self) -> &RangeAssembler {
        &self.assembler
    }

    /// Administrative removal of an object and all of its parts
    pub async fn discard(&self, id: &ObjectId) -> Result<()> {
        self.coordinator.discard(id).await
    }

    pub fn stats(&self) -> CacheStats {
        self.coordinator.algorithm().stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.coordinator.metrics().get_stats()
    }

    /// Zone metrics in the Prometheus text format
    pub fn prometheus(&self) -> Result<String> {
        self.metrics().to_prometheus(&self.config.id)
    }

    /// Wait for in-flight work, then stop the coordinator and the expiry
    /// scheduler
    pub async fn close(&self) -> Result<()> {
        self.coordinator.close().await?;
        self.expiry.shutdown().await;
        info!("Zone {} closed", self.config.id);
        Ok(())
    }
}

async fn warm_restart(
    config: &CacheZone,
    storage: &dyn Storage,
    algorithm: &dyn CacheAlgorithm,
    expiry: &ExpiryScheduler,
) -> Result<RestartReport> {
    let capacity = config.capacity_parts();
    let now = unix_now();
    let mut report = RestartReport::default();
    let mut expired = Vec::new();
    let mut overflow = Vec::new();

    storage
        .iterate(&mut |metadata, parts| {
            report.objects += 1;
            if metadata.is_expired(now) {
                expired.push(metadata.id);
                return true;
            }
            if let Some(ttl) = metadata.ttl(now) {
                expiry.set(metadata.id.clone(), Duration::from_secs(ttl));
            }

            for part in parts {
                if report.parts >= capacity || !algorithm.should_keep(&part) {
                    overflow.push(part);
                    continue;
                }
                match algorithm.add_object(part.clone()) {
                    Ok(()) => report.parts += 1,
                    Err(e) => {
                        warn!("Cannot restore {}: {}", part, e);
                        overflow.push(part);
                    }
                }
            }
            true
        })
        .await?;

    for id in expired {
        match storage.discard(&id).await {
            Ok(()) => report.expired += 1,
            Err(e) => warn!("Failed to discard expired object {}: {}", id, e),
        }
    }
    for part in overflow {
        match storage.discard_part(&part).await {
            Ok(()) => report.overflow += 1,
            Err(e) => warn!("Failed to discard overflow part {}: {}", part, e),
        }
    }

    Ok(report)
}
