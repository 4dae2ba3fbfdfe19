//! Slice Store
//!
//! Storage and eviction core of an HTTP edge cache. Origin responses are
//! stored on disk split into fixed-size parts, a tiered LRU decides which
//! parts stay resident, and concurrent requests for the same uncached part
//! are merged into a single upstream fetch.
//!
//! # Architecture
//!
//! - [`TieredLruCache`]: in-memory admission and eviction policy of a zone
//! - [`DiskStore`]: crash-safe, hex-sharded storage of metadata and parts
//! - [`FetchCoordinator`]: single-flight actor serving parts and headers
//!   from storage or upstream, and applying evictions out of line
//! - [`RangeAssembler`]: turns a byte range into a stream over parts
//! - [`Zone`]: wires the above together for one configured cache zone and
//!   rebuilds the resident set from disk on open
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use slice_store::{ObjectId, StoreConfig, Zone};
//! use tokio::io::AsyncReadExt;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::from_file("slice_store.yaml")?;
//! let zones = Zone::open_all(&config).await?;
//!
//! let id = ObjectId::new("videos.example.com", "/movie.mp4");
//! let mut body = Vec::new();
//! zones[0].read(&id, 0, 1023)?.read_to_end(&mut body).await?;
//!
//! println!("hit ratio: {}", zones[0].stats().cache_hit_prc());
//! for zone in &zones {
//!     zone.close().await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! upstream_address: "http://origin.example.com"
//! upstream_timeout_secs: 30
//! zones:
//!   - id: videos
//!     path: /var/cache/videos     # must exist
//!     part_size: 2097152          # 2MB parts
//!     storage_size: 10737418240   # 10GB
//!     cache_key_in_path: true
//!     default_ttl_secs: 3600
//! ```
//!
//! See [`CacheZone`] for every option.

pub mod cache_algorithm;
pub mod cacheability;
pub mod config;
pub mod coordinator;
pub mod disk_store;
pub mod error;
pub mod expiry;
pub mod metrics;
pub mod models;
pub mod range_assembler;
pub mod storage;
pub mod tiered_cache;
pub mod upstream;
pub mod zone;

// Re-export commonly used types
pub use cache_algorithm::{new_algorithm, CacheAlgorithm, CacheStats, NoopCache, RemovalSender};
pub use cacheability::{CachePolicy, CacheVerdict, DefaultCachePolicy};
pub use config::{CacheZone, StoreConfig};
pub use coordinator::{FetchCoordinator, ZoneServices};
pub use disk_store::DiskStore;
pub use error::{Result, StoreError};
pub use expiry::ExpiryScheduler;
pub use metrics::{MetricsSnapshot, ZoneMetrics};
pub use models::{ByteRange, ObjectId, ObjectIndex, ObjectMetadata};
pub use range_assembler::{RangeAssembler, RangeReader};
pub use storage::{PartReader, Storage};
pub use tiered_cache::TieredLruCache;
pub use upstream::{HttpUpstream, Upstream, UpstreamResponse};
pub use zone::{RestartReport, Zone};
