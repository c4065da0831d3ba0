//! Inbound datagram sources

use bytes::Bytes;

use crate::Result;

/// Signal strength the radio measured on one antenna while receiving a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntennaSample {
    pub antenna: u8,
    pub dbm: i16,
    pub noise: i16,
}

/// A datagram as received on one radio interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDatagram {
    pub interface: usize,
    pub payload: Bytes,
    /// Per-antenna readings; empty when the transport carries no radio metadata.
    pub signal: Vec<AntennaSample>,
}

impl InboundDatagram {
    pub fn new(interface: usize, payload: Bytes) -> Self {
        Self { interface, payload, signal: Vec::new() }
    }

    pub fn with_signal(mut self, signal: impl IntoIterator<Item = AntennaSample>) -> Self {
        self.signal.extend(signal);
        self
    }
}

/// Where the driver reads radio traffic from.
///
/// Sources abstract over the radio transport (UDP sockets from a radio bridge, an
/// in-process channel for injection and tests) and handle their own waiting.
#[async_trait::async_trait]
pub trait PacketSource: Send + 'static {
    /// Wait for the next datagram.
    ///
    /// Returns:
    /// - `Ok(Some(datagram))` - A datagram arrived
    /// - `Ok(None)` - The source is exhausted (normal termination)
    /// - `Err(e)` - Receive error; the driver backs off and keeps reading
    ///
    /// Must be cancel safe: the driver races it against ticks and shutdown.
    async fn next_datagram(&mut self) -> Result<Option<InboundDatagram>>;

    /// Radio interfaces this source reads from.
    fn interface_count(&self) -> usize;
}
