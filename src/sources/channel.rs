//! In-process datagram injection

use tokio::sync::mpsc;

use crate::Result;
use crate::source::{InboundDatagram, PacketSource};

/// Reads datagrams pushed through a tokio channel.
///
/// Ends once every sender has been dropped and the queue is drained.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<InboundDatagram>,
    interfaces: usize,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<InboundDatagram>, interfaces: usize) -> Self {
        Self { rx, interfaces }
    }

    /// Source plus the sender feeding it.
    pub fn channel(capacity: usize, interfaces: usize) -> (mpsc::Sender<InboundDatagram>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx, interfaces))
    }
}

#[async_trait::async_trait]
impl PacketSource for ChannelSource {
    async fn next_datagram(&mut self) -> Result<Option<InboundDatagram>> {
        Ok(self.rx.recv().await)
    }

    fn interface_count(&self) -> usize {
        self.interfaces
    }
}
