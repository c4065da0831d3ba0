//! UDP sockets fed by the radio bridge, one per interface

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::select_all;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::Result;
use crate::source::{InboundDatagram, PacketSource};

/// Largest datagram the radio bridge forwards.
const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Receives on every interface socket at once; the socket index is the interface.
#[derive(Debug)]
pub struct UdpSource {
    sockets: Vec<Arc<UdpSocket>>,
    buffers: Vec<Vec<u8>>,
}

impl UdpSource {
    /// Bind one socket per listen address, in interface order.
    pub async fn bind(addrs: &[SocketAddr]) -> Result<Self> {
        let mut sockets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let socket = UdpSocket::bind(*addr).await?;
            info!(interface = sockets.len(), local = %socket.local_addr()?, "Radio interface bound");
            sockets.push(Arc::new(socket));
        }
        Ok(Self::from_sockets(sockets))
    }

    pub fn from_sockets(sockets: Vec<Arc<UdpSocket>>) -> Self {
        let buffers = vec![vec![0u8; MAX_DATAGRAM_LEN]; sockets.len()];
        Self { sockets, buffers }
    }

    /// Socket of one interface, e.g. to send requests back over the same path.
    pub fn socket(&self, interface: usize) -> Option<Arc<UdpSocket>> {
        self.sockets.get(interface).cloned()
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets.iter().filter_map(|s| s.local_addr().ok()).collect()
    }
}

#[async_trait::async_trait]
impl PacketSource for UdpSource {
    async fn next_datagram(&mut self) -> Result<Option<InboundDatagram>> {
        if self.sockets.is_empty() {
            debug!("No radio interfaces configured");
            return Ok(None);
        }

        let reads = self.sockets.iter().zip(self.buffers.iter_mut()).enumerate().map(
            |(interface, (socket, buffer))| {
                Box::pin(async move { socket.recv_from(buffer).await.map(|(len, _)| (interface, len)) })
            },
        );
        let (received, _, _) = select_all(reads).await;
        let (interface, len) = received?;

        let payload = Bytes::copy_from_slice(&self.buffers[interface][..len]);
        Ok(Some(InboundDatagram::new(interface, payload)))
    }

    fn interface_count(&self) -> usize {
        self.sockets.len()
    }
}
