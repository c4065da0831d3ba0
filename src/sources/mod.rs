//! [`PacketSource`](crate::source::PacketSource) implementations

mod channel;
mod udp;

pub use channel::ChannelSource;
pub use udp::UdpSource;
