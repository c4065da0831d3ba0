//! Adaptive flag word and wrapping block-index arithmetic

use serde::{Deserialize, Serialize};

use super::flags::adaptive;

/// Adaptive-video event bits for one telemetry slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveFlags(pub u32);

impl AdaptiveFlags {
    /// Create flags from a raw word.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Check if a specific bit is set.
    pub fn is_set(&self, bit: u32) -> bool {
        (self.0 & (1 << bit)) != 0
    }

    /// Check if any bit of `flag` is set.
    pub fn has_flag(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    /// OR additional bits in.
    pub fn insert(&mut self, flag: u32) {
        self.0 |= flag;
    }

    /// Get the raw u32 value.
    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn switched(&self) -> bool {
        self.has_flag(adaptive::SWITCHED_LOWER | adaptive::SWITCHED_HIGHER)
    }
}

/// Compare block indices in u32 space with wraparound using the half-range rule.
/// Returns true if `a` is considered newer than `b`.
pub fn block_after(a: u32, b: u32) -> bool {
    if a == b {
        return false;
    }
    a.wrapping_sub(b) < 0x8000_0000
}

/// Signed distance from `from` to `to`, honoring wraparound.
pub fn block_distance(from: u32, to: u32) -> i64 {
    to.wrapping_sub(from) as i32 as i64
}
