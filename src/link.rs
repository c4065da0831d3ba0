//! Outbound side of the radio link.
//!
//! Sends are fire-and-forget: implementations must never wait on I/O. A send that
//! cannot be queued fails immediately and the caller logs it.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::{LinkError, Result};

/// A datagram addressed to a vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDatagram {
    pub vehicle_id: u32,
    pub payload: Bytes,
}

/// Non-blocking outbound packet path.
pub trait LinkSender: Send + Sync {
    fn send(&self, vehicle_id: u32, datagram: Bytes) -> Result<()>;
}

/// Queues datagrams on a bounded channel drained by a radio transmit task.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: mpsc::Sender<OutboundDatagram>,
}

impl ChannelLink {
    pub fn new(tx: mpsc::Sender<OutboundDatagram>) -> Self {
        Self { tx }
    }

    /// Link plus the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundDatagram>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl LinkSender for ChannelLink {
    fn send(&self, vehicle_id: u32, payload: Bytes) -> Result<()> {
        self.tx.try_send(OutboundDatagram { vehicle_id, payload }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LinkError::send_failed("outbound queue full"),
            mpsc::error::TrySendError::Closed(_) => {
                LinkError::send_failed("outbound queue closed")
            }
        })
    }
}

/// Sends straight to the vehicle's UDP endpoint.
///
/// `try_send_to` only succeeds once tokio has seen the socket writable, which a fresh
/// socket is not until its readiness has been polled. Build it with [`UdpLink::ready`]
/// unless the socket is already known to be writable.
#[derive(Debug, Clone)]
pub struct UdpLink {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl UdpLink {
    pub fn new(socket: Arc<UdpSocket>, target: SocketAddr) -> Self {
        Self { socket, target }
    }

    /// Wait until the socket is writable, then build the link.
    pub async fn ready(socket: Arc<UdpSocket>, target: SocketAddr) -> Result<Self> {
        socket.writable().await?;
        Ok(Self::new(socket, target))
    }
}

impl LinkSender for UdpLink {
    fn send(&self, _vehicle_id: u32, payload: Bytes) -> Result<()> {
        match self.socket.try_send_to(&payload, self.target) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(LinkError::send_failed("socket send buffer full"))
            }
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

/// Discards everything. Used when no outbound path is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLink;

impl LinkSender for NullLink {
    fn send(&self, _vehicle_id: u32, _datagram: Bytes) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_link_reports_full_queue() {
        let (link, mut rx) = ChannelLink::channel(1);
        link.send(7, Bytes::from_static(b"a")).expect("room for one");

        let err = link.send(7, Bytes::from_static(b"b")).expect_err("queue full");
        assert!(err.is_retryable());

        let sent = rx.recv().await.expect("queued datagram");
        assert_eq!(sent, OutboundDatagram { vehicle_id: 7, payload: Bytes::from_static(b"a") });

        drop(rx);
        assert!(link.send(7, Bytes::new()).is_err());
    }

    #[tokio::test]
    async fn udp_link_sends_without_waiting() -> anyhow::Result<()> {
        let receiver = UdpSocket::bind("127.0.0.1:0").await?;
        let sender = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
        let link = UdpLink::ready(sender, receiver.local_addr()?).await?;

        link.send(1, Bytes::from_static(b"ping"))?;
        link.send(1, Bytes::from_static(b"pong"))?;
        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).await?;
        assert_eq!(&buf[..len], b"ping");
        let (len, _) = receiver.recv_from(&mut buf).await?;
        assert_eq!(&buf[..len], b"pong");
        Ok(())
    }
}
