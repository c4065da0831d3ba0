//! Flag constants shared by the wire format and the telemetry ring
//!
//! Adaptive flags are OR'ed into a slice's `adaptive_flags` word; several events inside
//! one slice compose rather than overwrite, so a slow reader still sees that something
//! happened in that window.

// Adaptive video events recorded per telemetry slice
pub mod adaptive {
    pub const SWITCHED_LOWER: u32 = 1 << 1;
    pub const SWITCHED_HIGHER: u32 = 1 << 2;
    pub const SWITCHED_USER_SELECTABLE: u32 = 1 << 3;
    pub const REQUESTED_BY_USER: u32 = 1 << 5;
    pub const REQUESTED_BY_ADAPTIVE_LOWER: u32 = 1 << 6;
    pub const REQUESTED_BY_ADAPTIVE_HIGHER: u32 = 1 << 7;
    pub const ACK_RECEIVED: u32 = 1 << 8;
}

// Common packet header flags
pub mod packet {
    pub const RETRANSMITTED: u8 = 0x01;
}

// Video header flags
pub mod video {
    pub const END_OF_FRAME: u8 = 0x01;
}
