//! Video profiles and the quality ladder

use serde::{Deserialize, Serialize};

use crate::types::flags::adaptive;

/// Encoder profile of a vehicle's video stream. Discriminants are the wire codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VideoProfile {
    BestPerformance = 0,
    #[default]
    HighQuality = 1,
    /// Operator-defined settings; not on the adaptive ladder.
    User = 2,
    MediumQuality = 3,
    LowQuality = 4,
}

impl VideoProfile {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::BestPerformance),
            1 => Some(Self::HighQuality),
            2 => Some(Self::User),
            3 => Some(Self::MediumQuality),
            4 => Some(Self::LowQuality),
            _ => None,
        }
    }

    /// Whether the profile may sit on the adaptive ladder.
    pub fn is_quality_rung(self) -> bool {
        !matches!(self, Self::User)
    }

    /// Position on the ladder topped by `top`: 0 lowest. `None` when off the ladder.
    pub fn rung(self, top: VideoProfile) -> Option<u8> {
        match self {
            Self::LowQuality => Some(0),
            Self::MediumQuality => Some(1),
            _ if self == top => Some(2),
            _ => None,
        }
    }

    /// Next profile down. Off-ladder profiles drop to the middle rung.
    pub fn lower(self, top: VideoProfile) -> Option<VideoProfile> {
        match self.rung(top) {
            Some(0) => None,
            Some(1) => Some(Self::LowQuality),
            _ => Some(Self::MediumQuality),
        }
    }

    /// Next profile up. Off-ladder profiles are never raised automatically.
    pub fn higher(self, top: VideoProfile) -> Option<VideoProfile> {
        match self.rung(top) {
            Some(0) => Some(Self::MediumQuality),
            Some(1) => Some(top),
            _ => None,
        }
    }
}

/// Why a profile switch was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SwitchReason {
    User = 0,
    AdaptiveLower = 1,
    AdaptiveHigher = 2,
}

impl SwitchReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Requested-by bit recorded in the telemetry slice.
    pub fn requested_flag(self) -> u32 {
        match self {
            Self::User => adaptive::REQUESTED_BY_USER,
            Self::AdaptiveLower => adaptive::REQUESTED_BY_ADAPTIVE_LOWER,
            Self::AdaptiveHigher => adaptive::REQUESTED_BY_ADAPTIVE_HIGHER,
        }
    }
}
