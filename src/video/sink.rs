//! Consumers of reassembled video payloads

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

/// A data payload leaving the reassembler, in block and packet order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredPacket {
    pub vehicle_id: u32,
    pub stream_id: u8,
    pub block_index: u32,
    pub packet_index: u8,
    pub payload: Bytes,
    /// The payload closes a video frame.
    pub end_of_frame: bool,
    /// The payload was rebuilt from EC shards rather than received.
    pub reconstructed: bool,
}

/// Receives delivered payloads. Must not block.
pub trait VideoSink: Send {
    fn deliver(&mut self, packet: DeliveredPacket);
}

impl VideoSink for Vec<DeliveredPacket> {
    fn deliver(&mut self, packet: DeliveredPacket) {
        self.push(packet);
    }
}

/// Forwards payloads to a decoder task over a bounded channel.
///
/// A full channel drops the payload; the decoder sees it as loss.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<DeliveredPacket>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<DeliveredPacket>) -> Self {
        Self { tx, dropped: 0 }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeliveredPacket>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl VideoSink for ChannelSink {
    fn deliver(&mut self, packet: DeliveredPacket) {
        if let Err(e) = self.tx.try_send(packet) {
            self.dropped += 1;
            let closed = matches!(e, mpsc::error::TrySendError::Closed(_));
            warn!(dropped = self.dropped, closed, "Video sink rejected payload");
        }
    }
}
