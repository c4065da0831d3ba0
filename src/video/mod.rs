//! Video block reassembly.
//!
//! Shards arrive per (vehicle, stream) and are collected into FEC blocks. A block is
//! forwarded as soon as enough shards are in to rebuild its data, missing pieces are
//! requested from the vehicle while there is still time, and blocks that cannot be
//! completed are skipped so the stream never stalls.

mod block;
pub mod fec;
mod pool;
mod reassembler;
mod retransmit;
mod sink;

pub use fec::{CauchyCodec, ErasureCodec, FecError};
pub use pool::{ReassemblerKey, ReassemblerPool};
pub use reassembler::{BlockReassembler, Outcome};
pub use retransmit::RetransmissionCoordinator;
pub use sink::{ChannelSink, DeliveredPacket, VideoSink};

use crate::link::LinkSender;
use crate::telemetry::RuntimeInfoStore;
use crate::types::Millis;

/// Everything a reassembler touches outside its own state during one call.
pub struct ReassemblyIo<'a> {
    pub now_ms: Millis,
    pub store: &'a mut RuntimeInfoStore,
    pub link: &'a dyn LinkSender,
    pub sink: &'a mut dyn VideoSink,
}

impl<'a> ReassemblyIo<'a> {
    pub fn new(
        now_ms: Millis,
        store: &'a mut RuntimeInfoStore,
        link: &'a dyn LinkSender,
        sink: &'a mut dyn VideoSink,
    ) -> Self {
        Self { now_ms, store, link, sink }
    }
}
