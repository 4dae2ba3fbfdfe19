//! Configuration management for the slice store

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration of one cache zone
///
/// All parts and metadata under one zone share the same on-disk layout and
/// the same eviction policy instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheZone {
    /// Zone identifier, used in logs and stats
    pub id: String,

    /// Root directory of the zone. Must exist before the zone is opened.
    pub path: PathBuf,

    /// Size of each part in bytes (default: 2MB)
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Capacity in number of parts
    #[serde(default)]
    pub storage_objects: Option<u64>,

    /// Capacity in bytes, converted to parts using `part_size`
    #[serde(default)]
    pub storage_size: Option<u64>,

    /// Whether the cache key is an extra directory level (multi-tenant zones)
    #[serde(default = "default_true")]
    pub cache_key_in_path: bool,

    /// Eviction policy: "lru" (tiered LRU) or "noop" (default: "lru")
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Number of LRU tiers (default: 2)
    #[serde(default = "default_tiers")]
    pub tiers: usize,

    /// TTL applied to cacheable responses that carry no freshness headers.
    /// Unset means such responses never expire.
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
}

/// Top level configuration: one upstream and any number of zones
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Upstream base URL (e.g. "http://origin.example.com")
    #[serde(default = "default_upstream")]
    pub upstream_address: String,

    /// Timeout for a single upstream request in seconds (default: 30)
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    #[serde(default)]
    pub zones: Vec<CacheZone>,
}

// Default value functions for serde
fn default_part_size() -> u64 {
    2 * 1024 * 1024 // 2MB
}

fn default_true() -> bool {
    true
}

fn default_algorithm() -> String {
    "lru".to_string()
}

fn default_tiers() -> usize {
    2
}

fn default_upstream() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

impl CacheZone {
    /// Create a zone with default settings and the given capacity in parts
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, part_size: u64, storage_objects: u64) -> Self {
        CacheZone {
            id: id.into(),
            path: path.into(),
            part_size,
            storage_objects: Some(storage_objects),
            storage_size: None,
            cache_key_in_path: default_true(),
            algorithm: default_algorithm(),
            tiers: default_tiers(),
            default_ttl_secs: None,
        }
    }

    /// Capacity of the zone in parts
    ///
    /// `storage_objects` wins when both limits are set.
    pub fn capacity_parts(&self) -> u64 {
        match (self.storage_objects, self.storage_size) {
            (Some(objects), _) => objects,
            (None, Some(bytes)) if self.part_size > 0 => bytes / self.part_size,
            _ => 0,
        }
    }

    /// Capacity of the zone in bytes
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_parts().saturating_mul(self.part_size)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    /// Validate the zone configuration
    ///
    /// # Validation Rules
    /// - id must not be empty
    /// - part_size must be > 0
    /// - capacity must be at least one part
    /// - tiers must be >= 2
    /// - algorithm must be "lru" or "noop"
    ///
    /// The existence of `path` is checked when the disk store is opened.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(StoreError::ConfigError(
                "zone id must not be empty".to_string(),
            ));
        }

        if self.part_size == 0 {
            return Err(StoreError::ConfigError(format!(
                "zone '{}': part_size must be greater than 0",
                self.id
            )));
        }

        if self.storage_objects.is_none() && self.storage_size.is_none() {
            return Err(StoreError::ConfigError(format!(
                "zone '{}': one of storage_objects or storage_size is required",
                self.id
            )));
        }

        if self.capacity_parts() == 0 {
            return Err(StoreError::ConfigError(format!(
                "zone '{}': capacity must hold at least one part of {} bytes",
                self.id, self.part_size
            )));
        }

        if self.tiers < 2 {
            return Err(StoreError::ConfigError(format!(
                "zone '{}': tiers must be at least 2, got {}",
                self.id, self.tiers
            )));
        }

        match self.algorithm.as_str() {
            "lru" | "noop" => {}
            other => {
                return Err(StoreError::ConfigError(format!(
                    "zone '{}': invalid algorithm '{}', must be 'lru' or 'noop'",
                    self.id, other
                )));
            }
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            upstream_address: default_upstream(),
            upstream_timeout_secs: default_upstream_timeout(),
            zones: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(StoreConfig)` if loading and validation succeed
    /// * `Err(StoreError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            StoreError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = serde_yaml::from_str(content).map_err(|e| {
            StoreError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - upstream_address must not be empty
    /// - upstream_timeout_secs must be > 0
    /// - every zone must be valid and zone ids must be unique
    pub fn validate(&self) -> Result<()> {
        if self.upstream_address.is_empty() {
            return Err(StoreError::ConfigError(
                "upstream_address must not be empty".to_string(),
            ));
        }

        if self.upstream_timeout_secs == 0 {
            return Err(StoreError::ConfigError(
                "upstream_timeout_secs must be greater than 0".to_string(),
            ));
        }

        for (i, zone) in self.zones.iter().enumerate() {
            zone.validate()?;
            if self.zones[..i].iter().any(|z| z.id == zone.id) {
                return Err(StoreError::ConfigError(format!(
                    "duplicate zone id '{}'",
                    zone.id
                )));
            }
        }

        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}
