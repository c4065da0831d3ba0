//! Runtime telemetry: a ring of fixed-duration slices aggregating link counters.
//!
//! The packet path is the single writer. Everything else observes the store either
//! through immutable snapshots handed out by the driver or through the shared region,
//! which external OSD processes attach to read-only.
//!
//! ```rust
//! use groundlink::telemetry::{PacketEvent, RuntimeInfoStore};
//!
//! let mut store = RuntimeInfoStore::new(100, 0);
//! store.record_packet_event(0, PacketEvent::Video);
//! store.record_packet_event(0, PacketEvent::Missing(1));
//! assert!(store.advance_if_due(100));
//! assert_eq!(store.slice(1).link_quality_percent, 50);
//! ```

pub mod layout;
mod region;
mod ring;
mod slice;
mod store;

pub use region::{DEFAULT_REGION_PATH, TelemetryReader, TelemetryRegion};
pub use ring::{TimeSliceRing, TimeSlot};
pub use slice::{
    AntennaSignal, BlockCounters, InterfaceCounters, InterfaceSignal, PacketEvent, TimeSlice,
    VehicleSliceStats,
};
pub use store::RuntimeInfoStore;

/// Slices retained in the ring.
pub const SLICE_COUNT: usize = 20;

/// Radio interfaces tracked per slice.
pub const MAX_RADIO_INTERFACES: usize = 4;

/// Antennas tracked per radio interface.
pub const MAX_RADIO_ANTENNAS: usize = 4;

/// Vehicles that can hold a telemetry slot at once.
pub const MAX_CONCURRENT_VEHICLES: usize = 5;

/// `link_quality_percent` of a slice that carried no video traffic.
pub const LINK_QUALITY_UNKNOWN: u8 = 255;
