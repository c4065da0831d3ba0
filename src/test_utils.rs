//! Builders and fakes shared by unit tests and benchmarks.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::config::{ReassemblyConfig, RetransmissionConfig};
use crate::error::Result;
use crate::link::LinkSender;
use crate::packet::{PacketHeader, VideoHeader, VideoPacket, packet_type};
use crate::types::flags;
use crate::video::fec::{CauchyCodec, ErasureCodec, SHARD_PREFIX_LEN, frame_data_shard};
use crate::video::BlockReassembler;

/// Station id used by every test fixture.
pub const TEST_STATION_ID: u32 = 0xA0;

/// Vehicle id used when a builder is not told otherwise.
pub const TEST_VEHICLE_ID: u32 = 0x1001;

/// Captures every datagram handed to the link.
#[derive(Debug, Clone, Default)]
pub struct RecordingLink {
    sent: Arc<Mutex<Vec<(u32, Bytes)>>>,
}

impl RecordingLink {
    pub fn datagrams(&self) -> Vec<Bytes> {
        self.sent().into_iter().map(|(_, datagram)| datagram).collect()
    }

    /// Datagrams with the vehicle each was addressed to.
    pub fn sent(&self) -> Vec<(u32, Bytes)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl LinkSender for RecordingLink {
    fn send(&self, vehicle_id: u32, datagram: Bytes) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((vehicle_id, datagram));
        }
        Ok(())
    }
}

/// A reassembler with default settings for the test station.
pub fn reassembler(vehicle_id: u32, stream_id: u8) -> BlockReassembler {
    BlockReassembler::new(
        vehicle_id,
        stream_id,
        ReassemblyConfig::default(),
        RetransmissionConfig::default(),
        TEST_STATION_ID,
        Arc::new(CauchyCodec),
    )
}

/// Every shard of one encoded block together with the payloads it carries.
#[derive(Debug, Clone)]
pub struct BuiltBlock {
    /// Data shards first, then EC shards, in packet-index order.
    pub packets: Vec<VideoPacket>,
    pub payloads: Vec<Bytes>,
}

impl BuiltBlock {
    /// Each packet serialized as it would arrive from the radio.
    pub fn datagrams(&self) -> Vec<Bytes> {
        self.packets.iter().map(VideoPacket::encode).collect()
    }
}

/// Encodes a block of distinguishable payloads.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    block_index: u32,
    data_packets: u8,
    ec_packets: u8,
    vehicle_id: u32,
    stream_id: u8,
    shard_size: u16,
    end_of_frame: bool,
}

impl BlockBuilder {
    pub fn new(block_index: u32, data_packets: u8, ec_packets: u8) -> Self {
        Self {
            block_index,
            data_packets,
            ec_packets,
            vehicle_id: TEST_VEHICLE_ID,
            stream_id: 0,
            shard_size: 32,
            end_of_frame: false,
        }
    }

    pub fn vehicle(mut self, vehicle_id: u32) -> Self {
        self.vehicle_id = vehicle_id;
        self
    }

    pub fn stream(mut self, stream_id: u8) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn shard_size(mut self, shard_size: u16) -> Self {
        self.shard_size = shard_size.max(SHARD_PREFIX_LEN as u16 + 1);
        self
    }

    /// Flag every shard of the block as closing a frame.
    pub fn end_of_frame(mut self) -> Self {
        self.end_of_frame = true;
        self
    }

    pub fn build(&self) -> BuiltBlock {
        let max_payload = usize::from(self.shard_size) - SHARD_PREFIX_LEN;
        let payloads: Vec<Bytes> = (0..self.data_packets)
            .map(|i| {
                let len = 1 + (self.block_index as usize * 7 + usize::from(i) * 3) % max_payload;
                let seed = self.block_index.wrapping_mul(31).wrapping_add(u32::from(i));
                Bytes::from((0..len).map(|n| (seed as usize + n) as u8).collect::<Vec<u8>>())
            })
            .collect();

        let data_shards: Vec<Bytes> = payloads
            .iter()
            .filter_map(|payload| frame_data_shard(payload, usize::from(self.shard_size)))
            .collect();
        let raw: Vec<Vec<u8>> = data_shards.iter().map(|shard| shard.to_vec()).collect();
        let ec_shards = CauchyCodec.encode(&raw, usize::from(self.ec_packets)).unwrap_or_default();

        let video_flags = if self.end_of_frame { flags::video::END_OF_FRAME } else { 0 };
        let packets = data_shards
            .into_iter()
            .chain(ec_shards.into_iter().map(Bytes::from))
            .enumerate()
            .map(|(index, shard)| VideoPacket {
                header: PacketHeader::new(packet_type::VIDEO_DATA, self.vehicle_id, TEST_STATION_ID),
                video: VideoHeader {
                    block_index: self.block_index,
                    packet_index: index as u8,
                    data_packets: self.data_packets,
                    ec_packets: self.ec_packets,
                    video_flags,
                    stream_id: self.stream_id,
                    shard_size: self.shard_size,
                },
                shard,
            })
            .collect();

        BuiltBlock { packets, payloads }
    }

    /// The same shard as resent by the vehicle on request.
    pub fn retransmitted(packet: &VideoPacket) -> VideoPacket {
        let mut packet = packet.clone();
        packet.header.flags |= flags::packet::RETRANSMITTED;
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_blocks_have_consistent_geometry() {
        let block = BlockBuilder::new(5, 4, 2).shard_size(16).build();
        assert_eq!(block.packets.len(), 6);
        assert!(block.packets.iter().all(|p| p.shard.len() == 16));
        assert!(block.packets[4].video.is_ec());
        assert!(block.payloads.iter().all(|p| !p.is_empty() && p.len() <= 14));
    }
}
