//! Slice Store inspection tool
//!
//! Opens every configured cache zone, which rebuilds each zone's resident
//! set from disk, reports what was found and closes the zones again.

use anyhow::Context;
use slice_store::{StoreConfig, Zone};
use std::env;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// # Usage
/// ```bash
/// # Inspect the zones of the default config (slice_store.yaml)
/// slice-store
///
/// # Inspect the zones of a custom config
/// RUST_LOG=debug slice-store /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "slice_store.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = StoreConfig::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    info!("Configuration loaded successfully");
    info!("  - Upstream address: {}", config.upstream_address);
    info!("  - Upstream timeout: {} seconds", config.upstream_timeout_secs);
    for zone in &config.zones {
        info!(
            "  - Zone {}: {} (part size {} bytes, {} parts, algorithm {}, {} tiers)",
            zone.id,
            zone.path.display(),
            zone.part_size,
            zone.capacity_parts(),
            zone.algorithm,
            zone.tiers
        );
    }

    let zones = Zone::open_all(&config)
        .await
        .context("opening cache zones")?;

    for zone in &zones {
        let stats = zone.stats();
        let restart = zone.restart_report();
        info!(
            "Zone {}: {} objects on disk, {} resident parts ({} bytes), {} expired, {} overflow",
            zone.id(),
            restart.objects,
            stats.objects,
            stats.size,
            restart.expired,
            restart.overflow
        );
        let metrics = zone
            .prometheus()
            .with_context(|| format!("rendering metrics of zone {}", zone.id()))?;
        info!("Zone {} metrics:\n{}", zone.id(), metrics);
    }

    for zone in &zones {
        zone.close()
            .await
            .with_context(|| format!("closing zone {}", zone.id()))?;
    }
    info!("All zones closed");
    Ok(())
}
