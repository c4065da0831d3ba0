//! Radio link packet format.
//!
//! Every datagram starts with a 16-byte common header; the body layout depends on the
//! packet type. All fields are little-endian. Decoders check the declared lengths
//! against the buffer before reading anything.
//!
//! ```plain
//!  0        1        2                 4                 8                 12               16
//! +--------+--------+--------+--------+-----------------+-----------------+-----------------+
//! |  type  | flags  |  total_length   | vehicle_id_src  | vehicle_id_dest | radio_pkt_index |
//! +--------+--------+--------+--------+-----------------+-----------------+-----------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{LinkError, Result};
use crate::types::flags;

/// Packet type codes.
pub mod packet_type {
    pub const VIDEO_DATA: u8 = 0x62;
    pub const RETRANSMISSION_REQUEST: u8 = 0x63;
    pub const PROFILE_SWITCH_REQUEST: u8 = 0x64;
    pub const PROFILE_SWITCH_ACK: u8 = 0x65;
}

/// Header carried by every radio packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: u8,
    pub flags: u8,
    pub total_length: u16,
    pub vehicle_id_src: u32,
    pub vehicle_id_dest: u32,
    pub radio_packet_index: u32,
}

impl PacketHeader {
    pub const LEN: usize = 16;

    pub fn new(packet_type: u8, vehicle_id_src: u32, vehicle_id_dest: u32) -> Self {
        Self {
            packet_type,
            flags: 0,
            total_length: Self::LEN as u16,
            vehicle_id_src,
            vehicle_id_dest,
            radio_packet_index: 0,
        }
    }

    /// Parse and validate the header of a datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        if datagram.len() < Self::LEN {
            return Err(LinkError::decode(
                "packet header",
                format!("Insufficient data (need {} bytes, have {})", Self::LEN, datagram.len()),
            ));
        }

        let mut buf = &datagram[..Self::LEN];
        let header = Self {
            packet_type: buf.get_u8(),
            flags: buf.get_u8(),
            total_length: buf.get_u16_le(),
            vehicle_id_src: buf.get_u32_le(),
            vehicle_id_dest: buf.get_u32_le(),
            radio_packet_index: buf.get_u32_le(),
        };

        let total = header.total_length as usize;
        if total < Self::LEN || total > datagram.len() {
            return Err(LinkError::decode(
                "packet header",
                format!("Declared length {} outside datagram of {} bytes", total, datagram.len()),
            ));
        }
        Ok(header)
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.packet_type);
        out.put_u8(self.flags);
        out.put_u16_le(self.total_length);
        out.put_u32_le(self.vehicle_id_src);
        out.put_u32_le(self.vehicle_id_dest);
        out.put_u32_le(self.radio_packet_index);
    }

    pub fn is_retransmitted(&self) -> bool {
        self.flags & flags::packet::RETRANSMITTED != 0
    }
}

/// Video body header following the common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoHeader {
    pub block_index: u32,
    pub packet_index: u8,
    pub data_packets: u8,
    pub ec_packets: u8,
    pub video_flags: u8,
    pub stream_id: u8,
    pub shard_size: u16,
}

impl VideoHeader {
    pub const LEN: usize = 12;

    pub fn total_packets(&self) -> usize {
        usize::from(self.data_packets) + usize::from(self.ec_packets)
    }

    pub fn is_ec(&self) -> bool {
        self.packet_index >= self.data_packets
    }

    pub fn is_end_of_frame(&self) -> bool {
        self.video_flags & flags::video::END_OF_FRAME != 0
    }
}

/// A decoded video shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPacket {
    pub header: PacketHeader,
    pub video: VideoHeader,
    pub shard: Bytes,
}

impl VideoPacket {
    pub fn is_retransmitted(&self) -> bool {
        self.header.is_retransmitted()
    }

    pub fn vehicle_id(&self) -> u32 {
        self.header.vehicle_id_src
    }

    fn decode_body(header: PacketHeader, mut body: &[u8]) -> Result<Self> {
        if body.len() < VideoHeader::LEN {
            return Err(LinkError::decode(
                "video header",
                format!("Insufficient data (need {} bytes, have {})", VideoHeader::LEN, body.len()),
            ));
        }

        let block_index = body.get_u32_le();
        let packet_index = body.get_u8();
        let data_packets = body.get_u8();
        let ec_packets = body.get_u8();
        let video_flags = body.get_u8();
        let stream_id = body.get_u8();
        let _reserved = body.get_u8();
        let shard_size = body.get_u16_le();
        let video = VideoHeader {
            block_index,
            packet_index,
            data_packets,
            ec_packets,
            video_flags,
            stream_id,
            shard_size,
        };

        if body.len() < shard_size as usize {
            return Err(LinkError::decode(
                "video shard",
                format!("Shard size {} exceeds remaining {} bytes", shard_size, body.len()),
            ));
        }
        let shard = Bytes::copy_from_slice(&body[..shard_size as usize]);
        Ok(Self { header, video, shard })
    }

    /// Serialize into a datagram.
    pub fn encode(&self) -> Bytes {
        let total = PacketHeader::LEN + VideoHeader::LEN + self.shard.len();
        let mut header = self.header;
        header.packet_type = packet_type::VIDEO_DATA;
        header.total_length = total as u16;

        let mut out = BytesMut::with_capacity(total);
        header.encode(&mut out);
        out.put_u32_le(self.video.block_index);
        out.put_u8(self.video.packet_index);
        out.put_u8(self.video.data_packets);
        out.put_u8(self.video.ec_packets);
        out.put_u8(self.video.video_flags);
        out.put_u8(self.video.stream_id);
        out.put_u8(0);
        out.put_u16_le(self.shard.len() as u16);
        out.put_slice(&self.shard);
        out.freeze()
    }
}

/// Ask the vehicle to resend data shards of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmissionRequest {
    pub stream_id: u8,
    pub block_index: u32,
    pub indices: Vec<u8>,
}

impl RetransmissionRequest {
    fn decode_body(mut body: &[u8]) -> Result<Self> {
        if body.len() < 6 {
            return Err(LinkError::decode(
                "retransmission request",
                format!("Insufficient data (need 6 bytes, have {})", body.len()),
            ));
        }
        let stream_id = body.get_u8();
        let block_index = body.get_u32_le();
        let count = body.get_u8() as usize;
        if body.len() < count {
            return Err(LinkError::decode(
                "retransmission request",
                format!("Index count {} exceeds remaining {} bytes", count, body.len()),
            ));
        }
        Ok(Self { stream_id, block_index, indices: body[..count].to_vec() })
    }

    pub fn encode(&self, vehicle_id_src: u32, vehicle_id_dest: u32) -> Bytes {
        let count = self.indices.len().min(u8::MAX as usize);
        let total = PacketHeader::LEN + 6 + count;
        let mut header =
            PacketHeader::new(packet_type::RETRANSMISSION_REQUEST, vehicle_id_src, vehicle_id_dest);
        header.total_length = total as u16;

        let mut out = BytesMut::with_capacity(total);
        header.encode(&mut out);
        out.put_u8(self.stream_id);
        out.put_u32_le(self.block_index);
        out.put_u8(count as u8);
        out.put_slice(&self.indices[..count]);
        out.freeze()
    }
}

/// Ask the vehicle to switch its encoder profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchRequestPacket {
    pub request_id: u32,
    pub profile: u8,
    pub reason: u8,
}

impl SwitchRequestPacket {
    const BODY_LEN: usize = 6;

    fn decode_body(mut body: &[u8]) -> Result<Self> {
        if body.len() < Self::BODY_LEN {
            return Err(LinkError::decode(
                "profile switch request",
                format!("Insufficient data (need {} bytes, have {})", Self::BODY_LEN, body.len()),
            ));
        }
        Ok(Self { request_id: body.get_u32_le(), profile: body.get_u8(), reason: body.get_u8() })
    }

    pub fn encode(&self, vehicle_id_src: u32, vehicle_id_dest: u32) -> Bytes {
        let mut header =
            PacketHeader::new(packet_type::PROFILE_SWITCH_REQUEST, vehicle_id_src, vehicle_id_dest);
        header.total_length = (PacketHeader::LEN + Self::BODY_LEN) as u16;

        let mut out = BytesMut::with_capacity(PacketHeader::LEN + Self::BODY_LEN);
        header.encode(&mut out);
        out.put_u32_le(self.request_id);
        out.put_u8(self.profile);
        out.put_u8(self.reason);
        out.freeze()
    }
}

/// Vehicle confirmation of a profile switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchAckPacket {
    pub request_id: u32,
    pub profile: u8,
}

impl SwitchAckPacket {
    const BODY_LEN: usize = 5;

    fn decode_body(mut body: &[u8]) -> Result<Self> {
        if body.len() < Self::BODY_LEN {
            return Err(LinkError::decode(
                "profile switch ack",
                format!("Insufficient data (need {} bytes, have {})", Self::BODY_LEN, body.len()),
            ));
        }
        Ok(Self { request_id: body.get_u32_le(), profile: body.get_u8() })
    }

    pub fn encode(&self, vehicle_id_src: u32, vehicle_id_dest: u32) -> Bytes {
        let mut header =
            PacketHeader::new(packet_type::PROFILE_SWITCH_ACK, vehicle_id_src, vehicle_id_dest);
        header.total_length = (PacketHeader::LEN + Self::BODY_LEN) as u16;

        let mut out = BytesMut::with_capacity(PacketHeader::LEN + Self::BODY_LEN);
        header.encode(&mut out);
        out.put_u32_le(self.request_id);
        out.put_u8(self.profile);
        out.freeze()
    }
}

/// Decoded packet body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Video(VideoPacket),
    RetransmissionRequest(RetransmissionRequest),
    SwitchRequest(SwitchRequestPacket),
    SwitchAck(SwitchAckPacket),
    /// A type this pipeline does not interpret.
    Other,
}

/// Decode a datagram into its header and body.
pub fn decode(datagram: &[u8]) -> Result<(PacketHeader, Packet)> {
    let header = PacketHeader::decode(datagram)?;
    let body = &datagram[PacketHeader::LEN..header.total_length as usize];

    let packet = match header.packet_type {
        packet_type::VIDEO_DATA => Packet::Video(VideoPacket::decode_body(header, body)?),
        packet_type::RETRANSMISSION_REQUEST => {
            Packet::RetransmissionRequest(RetransmissionRequest::decode_body(body)?)
        }
        packet_type::PROFILE_SWITCH_REQUEST => {
            Packet::SwitchRequest(SwitchRequestPacket::decode_body(body)?)
        }
        packet_type::PROFILE_SWITCH_ACK => Packet::SwitchAck(SwitchAckPacket::decode_body(body)?),
        _ => Packet::Other,
    };
    Ok((header, packet))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(packet_index: u8) -> VideoPacket {
        VideoPacket {
            header: PacketHeader::new(packet_type::VIDEO_DATA, 0x1001, 0),
            video: VideoHeader {
                block_index: 77,
                packet_index,
                data_packets: 4,
                ec_packets: 2,
                video_flags: flags::video::END_OF_FRAME,
                stream_id: 1,
                shard_size: 3,
            },
            shard: Bytes::from_static(&[9, 8, 7]),
        }
    }

    #[test]
    fn video_packet_decodes_what_it_encodes() {
        let packet = video(5);
        let (header, decoded) = decode(&packet.encode()).expect("valid datagram");
        assert_eq!(header.total_length as usize, PacketHeader::LEN + VideoHeader::LEN + 3);
        match decoded {
            Packet::Video(v) => {
                assert_eq!(v.video, packet.video);
                assert_eq!(v.shard, packet.shard);
                assert!(v.video.is_ec());
                assert!(v.video.is_end_of_frame());
                assert!(!v.is_retransmitted());
            }
            other => panic!("expected video packet, got {other:?}"),
        }
    }

    #[test]
    fn short_buffers_are_decode_errors() {
        assert!(matches!(decode(&[0x62; 10]), Err(LinkError::Decode { .. })));

        let bytes = video(0).encode();
        assert!(matches!(decode(&bytes[..bytes.len() - 1]), Err(LinkError::Decode { .. })));

        // Header claims more bytes than the datagram holds.
        let mut raw = bytes.to_vec();
        raw[2] = 0xFF;
        raw[3] = 0x0F;
        assert!(matches!(decode(&raw), Err(LinkError::Decode { .. })));
    }

    #[test]
    fn shard_size_beyond_body_is_rejected() {
        let mut raw = video(1).encode().to_vec();
        let shard_size_offset = PacketHeader::LEN + 10;
        raw[shard_size_offset] = 200;
        assert!(matches!(decode(&raw), Err(LinkError::Decode { .. })));
    }

    #[test]
    fn control_packets_decode() {
        let request = RetransmissionRequest { stream_id: 2, block_index: 9, indices: vec![1, 3] };
        let (header, packet) = decode(&request.encode(0, 0x1001)).expect("valid request");
        assert_eq!(header.vehicle_id_dest, 0x1001);
        assert_eq!(packet, Packet::RetransmissionRequest(request));

        let ack = SwitchAckPacket { request_id: 41, profile: 3 };
        let (_, packet) = decode(&ack.encode(0x1001, 0)).expect("valid ack");
        assert_eq!(packet, Packet::SwitchAck(ack));

        let switch = SwitchRequestPacket { request_id: 41, profile: 4, reason: 1 };
        let (_, packet) = decode(&switch.encode(0, 0x1001)).expect("valid switch");
        assert_eq!(packet, Packet::SwitchRequest(switch));

        let truncated = &ack.encode(0x1001, 0)[..PacketHeader::LEN + 2];
        assert!(decode(truncated).is_err());
    }

    #[test]
    fn unknown_types_are_passed_through() {
        let mut out = BytesMut::new();
        PacketHeader::new(0x20, 5, 0).encode(&mut out);
        let (header, packet) = decode(&out).expect("valid header");
        assert_eq!(header.packet_type, 0x20);
        assert_eq!(packet, Packet::Other);
    }
}
