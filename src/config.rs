//! Station configuration.
//!
//! Loaded from YAML; every section and field has a default, so an empty document is
//! a valid configuration for a station with no registered vehicles.
//!
//! ```yaml
//! station_id: 1
//! telemetry:
//!   slice_interval_ms: 100
//!   region_path: /dev/shm/groundlink-rtinfo-v1
//! vehicles:
//!   - vehicle_id: 4097
//!     software_build: 260
//!     name: quad-1
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adaptive::VideoProfile;
use crate::error::{LinkError, Result};
use crate::telemetry::SLICE_COUNT;

/// Largest accepted `reassembly.max_window_blocks`.
pub const MAX_WINDOW_BLOCKS: u32 = 256;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Id this station puts in `vehicle_id_src` of outbound packets.
    pub station_id: u32,
    pub telemetry: TelemetryConfig,
    pub reassembly: ReassemblyConfig,
    pub retransmission: RetransmissionConfig,
    pub adaptive: AdaptiveConfig,
    pub network: NetworkConfig,
    pub vehicles: Vec<VehicleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    #[serde(default = "default_slice_interval_ms")]
    pub slice_interval_ms: u64,
    /// Shared region to publish into. Publishing is off when unset.
    pub region_path: Option<PathBuf>,
}

fn default_slice_interval_ms() -> u64 {
    100
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { slice_interval_ms: default_slice_interval_ms(), region_path: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Blocks buffered ahead of the current one, the current block included.
    pub max_window_blocks: u32,
    /// Blocks behind the current one still recognized as duplicates rather than stale.
    pub lookback_blocks: u32,
    /// Retransmission requests allowed in flight for one block.
    pub max_in_flight_per_block: usize,
    /// How long the current block may hold up later blocks.
    pub max_block_wait_ms: u64,
    /// Reassembler instances across all (vehicle, stream) pairs.
    pub pool_capacity: usize,
    /// A stream with no video for this long gives its pool slot back.
    pub idle_release_ms: u64,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_window_blocks: 8,
            lookback_blocks: 16,
            max_in_flight_per_block: 8,
            max_block_wait_ms: 120,
            pool_capacity: 8,
            idle_release_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetransmissionConfig {
    pub min_retry_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for RetransmissionConfig {
    fn default() -> Self {
        Self { min_retry_interval_ms: 20, request_timeout_ms: 50, max_retries: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Loss at or above which a slice counts against the link.
    pub lower_loss_percent: u8,
    /// Loss at or below which a slice counts for the link.
    pub raise_loss_percent: u8,
    /// Best antenna average below which a slice counts against the link.
    pub lower_dbm: i16,
    /// Best antenna average required for a slice to count for the link.
    pub raise_dbm: i16,
    pub lower_window_slices: usize,
    pub raise_window_slices: usize,
    /// Minimum time since the last switch before raising again.
    pub raise_hold_ms: u64,
    pub resend_interval_ms: u64,
    pub confirmation_timeout_ms: u64,
    /// Highest rung of the quality ladder.
    pub top_profile: VideoProfile,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lower_loss_percent: 20,
            raise_loss_percent: 2,
            lower_dbm: -88,
            raise_dbm: -75,
            lower_window_slices: 3,
            raise_window_slices: 10,
            raise_hold_ms: 5_000,
            resend_interval_ms: 100,
            confirmation_timeout_ms: 1_000,
            top_profile: VideoProfile::HighQuality,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// One UDP socket per radio interface, in interface order.
    pub listen: Vec<SocketAddr>,
    /// Where outbound requests are sent.
    pub vehicle_addr: Option<SocketAddr>,
    pub outbound_queue: usize,
    pub video_queue: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { listen: Vec::new(), vehicle_addr: None, outbound_queue: 64, video_queue: 512 }
    }
}

/// A vehicle the station accepts packets from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleEntry {
    pub vehicle_id: u32,
    pub software_build: u32,
    #[serde(default)]
    pub name: String,
}

impl StationConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StationConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| LinkError::config_with_source("Failed to parse station YAML", Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            LinkError::config_with_source(format!("Cannot read {}", path.display()), Box::new(e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.telemetry.slice_interval_ms == 0 {
            return Err(LinkError::config("telemetry.slice_interval_ms must be positive"));
        }

        let r = &self.reassembly;
        if r.max_window_blocks == 0 || r.pool_capacity == 0 || r.max_in_flight_per_block == 0 {
            return Err(LinkError::config(
                "reassembly window, pool capacity and in-flight bound must be positive",
            ));
        }
        if r.max_window_blocks > MAX_WINDOW_BLOCKS {
            return Err(LinkError::config(format!(
                "reassembly.max_window_blocks {} exceeds {MAX_WINDOW_BLOCKS}",
                r.max_window_blocks
            )));
        }
        if r.idle_release_ms == 0 {
            return Err(LinkError::config("reassembly.idle_release_ms must be positive"));
        }

        let a = &self.adaptive;
        if a.lower_window_slices == 0 || a.raise_window_slices >= SLICE_COUNT {
            return Err(LinkError::config(format!(
                "adaptive windows must lie within 1..{} closed slices",
                SLICE_COUNT - 1
            )));
        }
        if a.raise_window_slices <= a.lower_window_slices {
            return Err(LinkError::config(
                "adaptive.raise_window_slices must exceed lower_window_slices",
            ));
        }
        if a.raise_loss_percent >= a.lower_loss_percent || a.raise_dbm <= a.lower_dbm {
            return Err(LinkError::config(
                "adaptive raise thresholds must be stricter than lower thresholds",
            ));
        }
        if !a.top_profile.is_quality_rung() {
            return Err(LinkError::config(format!(
                "adaptive.top_profile {:?} is not on the quality ladder",
                a.top_profile
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for vehicle in &self.vehicles {
            if vehicle.vehicle_id == 0 {
                return Err(LinkError::config("vehicle id 0 is reserved"));
            }
            if !seen.insert(vehicle.vehicle_id) {
                return Err(LinkError::config(format!(
                    "vehicle {} is listed twice",
                    vehicle.vehicle_id
                )));
            }
        }
        Ok(())
    }
}
