//! Groundlink station daemon
//!
//! Binds the radio interface sockets from the station config, runs the receive
//! pipeline and logs link health once per second until interrupted.
//!
//! Config path: first argument, else `GROUNDLINK_CONFIG`, else
//! `/etc/groundlink/station.yaml`. Log level via `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use futures::StreamExt;
use groundlink::{GroundStation, StationConfig, UpdateRate};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("GROUNDLINK_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("/etc/groundlink/station.yaml"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = config_path();
    let config = StationConfig::load(&path)
        .with_context(|| format!("loading station config {}", path.display()))?;
    info!(
        config = %path.display(),
        station_id = config.station_id,
        interfaces = config.network.listen.len(),
        version = env!("CARGO_PKG_VERSION"),
        "Groundlink starting"
    );

    let (station, mut video) = GroundStation::bind(&config).await.context("starting station")?;

    let mut telemetry = station.telemetry(UpdateRate::Max(1));
    tokio::spawn(async move {
        while let Some(snapshot) = telemetry.next().await {
            let slice = snapshot.slice(1);
            info!(
                quality = slice.link_quality_percent,
                video = slice.total_video_packets(),
                missing = slice.total_missing_packets(),
                skipped = slice.blocks.skipped_blocks,
                best_dbm = ?slice.best_antenna_dbm(),
                "Link"
            );
        }
    });

    let mut delivered = 0u64;
    loop {
        tokio::select! {
            packet = video.recv() => match packet {
                Some(_) => delivered += 1,
                None => {
                    warn!("Video channel closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    station.shutdown().await;
    info!(delivered, "Groundlink stopped");
    Ok(())
}
