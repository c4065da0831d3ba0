//! Ground-station receive pipeline for digital FPV video links.
//!
//! Groundlink takes the datagrams a vehicle sends over one or more diversity radio
//! interfaces and turns them back into an ordered video payload stream, while keeping
//! the link healthy:
//!
//! - **Reassembly**: FEC blocks are rebuilt from whatever shards arrive, in any order,
//!   and forwarded exactly once.
//! - **Retransmission**: data shards that EC cannot cover are requested from the
//!   vehicle within a tight latency budget.
//! - **Adaptive profiles**: sustained loss or weak signal steps the vehicle's encoder
//!   down the quality ladder; a longer clean run steps it back up.
//! - **Telemetry**: a ring of fixed-duration slices records every counter, published
//!   to subscribers and to a shared memory region for OSD processes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use groundlink::{GroundStation, StationConfig, UpdateRate};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> groundlink::Result<()> {
//!     let config = StationConfig::load("station.yaml")?;
//!     let (station, mut video) = GroundStation::bind(&config).await?;
//!
//!     let mut telemetry = station.telemetry(UpdateRate::Max(5));
//!     tokio::spawn(async move {
//!         while let Some(snapshot) = telemetry.next().await {
//!             println!("link quality: {}%", snapshot.slice(1).link_quality_percent);
//!         }
//!     });
//!
//!     while let Some(packet) = video.recv().await {
//!         // hand packet.payload to the decoder
//!         let _ = packet;
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Pipeline components
pub mod adaptive;
pub mod config;
pub mod link;
pub mod packet;
pub mod router;
pub mod telemetry;
pub mod video;

// Runtime
pub mod driver;
pub mod source;
pub mod sources;
pub mod station;
pub mod stream;

// Core exports
pub use error::*;
pub use types::*;

pub use adaptive::{AdaptiveVideoController, VideoProfile};
pub use config::StationConfig;
pub use router::{PacketRouter, RouteOutcome};
pub use station::{GroundStation, StationHandle};
pub use telemetry::{RuntimeInfoStore, TelemetryReader};
pub use video::{DeliveredPacket, Outcome};
