//! Small shared types: flag words, block-index arithmetic and stream rates.

mod bitfield;
pub mod flags;
mod update_rate;

pub use bitfield::{AdaptiveFlags, block_after, block_distance};
pub use update_rate::UpdateRate;

/// Milliseconds on the station's monotonic clock.
pub type Millis = u64;
