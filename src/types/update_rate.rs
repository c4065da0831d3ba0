//! Delivery rate for telemetry snapshot streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a telemetry subscriber wants snapshots.
///
/// Snapshots are produced once per closed slice; a subscriber rendering at a lower
/// rate asks for `Max(hz)` and receives the newest snapshot of each interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every closed slice.
    EverySlice,

    /// At most `hz` snapshots per second.
    Max(u32),
}

impl UpdateRate {
    /// Collapse to `EverySlice` when the requested rate is at or above the slice rate.
    pub fn normalize(self, slice_interval: Duration) -> Self {
        match self {
            UpdateRate::EverySlice => UpdateRate::EverySlice,
            UpdateRate::Max(0) => UpdateRate::EverySlice,
            UpdateRate::Max(hz) if Duration::from_secs(1) / hz <= slice_interval => {
                UpdateRate::EverySlice
            }
            UpdateRate::Max(hz) => UpdateRate::Max(hz),
        }
    }

    /// Throttle interval if the subscriber is slower than the slice rate.
    pub fn throttle_interval(self, slice_interval: Duration) -> Option<Duration> {
        match self.normalize(slice_interval) {
            UpdateRate::EverySlice => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs(1) / hz),
        }
    }
}
