//! Binary layout v1 of the shared telemetry region.
//!
//! Every field is written explicitly in little-endian order with no padding. The
//! layout is never produced by casting structs onto memory, so any change to field
//! order or width must bump [`LAYOUT_VERSION`] and the region name.
//!
//! ```text
//! header   magic "GLRT" | layout_version u32 | generation u32 | payload_len u32
//! payload  slice_interval_ms u32 | slice_start_ms u64 | current_index u32
//!          | index_delta i32 | vehicles [u32; 5] | slices [TimeSlice; 20]
//! ```

use super::ring::TimeSliceRing;
use super::slice::{
    AntennaSignal, BlockCounters, InterfaceCounters, InterfaceSignal, TimeSlice,
    VehicleSliceStats,
};
use super::store::RuntimeInfoStore;
use super::{MAX_CONCURRENT_VEHICLES, MAX_RADIO_ANTENNAS, MAX_RADIO_INTERFACES, SLICE_COUNT};
use crate::error::{LinkError, Result};
use crate::types::AdaptiveFlags;

pub const MAGIC: [u8; 4] = *b"GLRT";
pub const LAYOUT_VERSION: u32 = 1;

pub const HEADER_LEN: usize = 16;
pub const GENERATION_OFFSET: usize = 8;

pub const ANTENNA_SIGNAL_LEN: usize = 10 * 2 + 2;
pub const INTERFACE_SIGNAL_LEN: usize = 1 + MAX_RADIO_ANTENNAS * ANTENNA_SIGNAL_LEN;
pub const INTERFACE_COUNTERS_LEN: usize = 4 * 2;
pub const BLOCK_COUNTERS_LEN: usize = 11 * 2;
pub const VEHICLE_STATS_LEN: usize = 4 * 2;
pub const TIME_SLICE_LEN: usize = 8
    + MAX_RADIO_INTERFACES * INTERFACE_COUNTERS_LEN
    + MAX_RADIO_INTERFACES * INTERFACE_SIGNAL_LEN
    + BLOCK_COUNTERS_LEN
    + 1
    + 4
    + MAX_CONCURRENT_VEHICLES * VEHICLE_STATS_LEN;
pub const STORE_PREFIX_LEN: usize = 4 + 8 + 4 + 4 + MAX_CONCURRENT_VEHICLES * 4;
pub const PAYLOAD_LEN: usize = STORE_PREFIX_LEN + SLICE_COUNT * TIME_SLICE_LEN;
pub const REGION_LEN: usize = HEADER_LEN + PAYLOAD_LEN;

/// Region header fields other than the generation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHeader {
    pub layout_version: u32,
    pub generation: u32,
    pub payload_len: u32,
}

impl RegionHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data, "region header");
        let magic = reader.bytes(4)?;
        if magic != MAGIC {
            return Err(LinkError::decode(
                "region header",
                format!("Bad magic {:02x?}, expected {:02x?}", magic, MAGIC),
            ));
        }
        Ok(Self {
            layout_version: reader.u32()?,
            generation: reader.u32()?,
            payload_len: reader.u32()?,
        })
    }

    /// Check that a reader built for this layout can interpret the payload.
    pub fn validate(&self) -> Result<()> {
        if self.layout_version != LAYOUT_VERSION {
            return Err(LinkError::Version { expected: LAYOUT_VERSION, found: self.layout_version });
        }
        if self.payload_len as usize != PAYLOAD_LEN {
            return Err(LinkError::decode(
                "region header",
                format!("Payload length {} does not match layout ({})", self.payload_len, PAYLOAD_LEN),
            ));
        }
        Ok(())
    }

    pub fn write(&self, out: &mut [u8]) -> Result<()> {
        let mut writer = ByteWriter::new(out);
        writer.bytes(&MAGIC)?;
        writer.u32(self.layout_version)?;
        writer.u32(self.generation)?;
        writer.u32(self.payload_len)?;
        Ok(())
    }
}

/// Encode the store payload into `out`. Returns the number of bytes written.
pub fn encode(store: &RuntimeInfoStore, out: &mut [u8]) -> Result<usize> {
    let mut writer = ByteWriter::new(out);
    let ring = store.ring();

    writer.u32(ring.interval_ms().min(u64::from(u32::MAX)) as u32)?;
    writer.u64(ring.slice_start_ms())?;
    writer.u32(ring.index() as u32)?;
    writer.i32(store.index_delta())?;
    for &vehicle in store.vehicle_table() {
        writer.u32(vehicle)?;
    }
    for slice in ring.slots() {
        write_slice(&mut writer, slice)?;
    }
    Ok(writer.position())
}

/// Encode the store payload into a fresh buffer.
pub fn encode_to_vec(store: &RuntimeInfoStore) -> Result<Vec<u8>> {
    let mut out = vec![0u8; PAYLOAD_LEN];
    encode(store, &mut out)?;
    Ok(out)
}

/// Decode a store payload.
pub fn decode(data: &[u8]) -> Result<RuntimeInfoStore> {
    if data.len() < PAYLOAD_LEN {
        return Err(LinkError::decode(
            "telemetry payload",
            format!("Insufficient data (need {} bytes, have {})", PAYLOAD_LEN, data.len()),
        ));
    }

    let mut reader = ByteReader::new(data, "telemetry payload");
    let interval_ms = u64::from(reader.u32()?);
    let start_ms = reader.u64()?;
    let index = reader.u32()? as usize;
    let index_delta = reader.i32()?;

    let mut vehicles = [0u32; MAX_CONCURRENT_VEHICLES];
    for vehicle in vehicles.iter_mut() {
        *vehicle = reader.u32()?;
    }

    if index >= SLICE_COUNT {
        return Err(LinkError::decode(
            "telemetry payload",
            format!("Current index {} outside ring of {}", index, SLICE_COUNT),
        ));
    }

    let mut slots = Vec::with_capacity(SLICE_COUNT);
    for _ in 0..SLICE_COUNT {
        slots.push(read_slice(&mut reader)?);
    }

    let ring = TimeSliceRing::from_parts(slots, index, interval_ms, start_ms);
    Ok(RuntimeInfoStore::from_parts(ring, vehicles, index_delta))
}

fn write_slice(writer: &mut ByteWriter<'_>, slice: &TimeSlice) -> Result<()> {
    writer.u64(slice.start_ms)?;
    for counters in &slice.interfaces {
        writer.u16(counters.rx_video_packets)?;
        writer.u16(counters.rx_data_packets)?;
        writer.u16(counters.rx_missing_packets)?;
        writer.u16(counters.rx_missing_max_gap)?;
    }
    for signal in &slice.signal {
        writer.u8(signal.antenna_count)?;
        for antenna in &signal.antennas {
            for value in [
                antenna.dbm_last,
                antenna.dbm_min,
                antenna.dbm_max,
                antenna.dbm_avg,
                antenna.noise_last,
                antenna.noise_min,
                antenna.noise_max,
                antenna.noise_avg,
                antenna.dbm_change_min,
                antenna.dbm_change_max,
            ] {
                writer.i16(value)?;
            }
            writer.u16(antenna.samples)?;
        }
    }
    let b = &slice.blocks;
    for value in [
        b.processed_packets,
        b.recv_video_data_packets,
        b.recv_video_ec_packets,
        b.recv_end_of_frame,
        b.output_video_packets,
        b.output_single_ec_used,
        b.output_two_ec_used,
        b.output_multiple_ec_used,
        b.output_max_ec_used,
        b.skipped_blocks,
        b.retransmitted_packets,
    ] {
        writer.u16(value)?;
    }
    writer.u8(slice.link_quality_percent)?;
    writer.u32(slice.adaptive_flags.value())?;
    for vehicle in &slice.vehicles {
        writer.u16(vehicle.min_ack_ms)?;
        writer.u16(vehicle.max_ack_ms)?;
        writer.u16(vehicle.retransmissions_requested)?;
        writer.u16(vehicle.retransmissions_acked)?;
    }
    Ok(())
}

fn read_slice(reader: &mut ByteReader<'_>) -> Result<TimeSlice> {
    let start_ms = reader.u64()?;

    let mut interfaces = [InterfaceCounters::default(); MAX_RADIO_INTERFACES];
    for counters in interfaces.iter_mut() {
        *counters = InterfaceCounters {
            rx_video_packets: reader.u16()?,
            rx_data_packets: reader.u16()?,
            rx_missing_packets: reader.u16()?,
            rx_missing_max_gap: reader.u16()?,
        };
    }

    let mut signal = [InterfaceSignal::default(); MAX_RADIO_INTERFACES];
    for interface in signal.iter_mut() {
        interface.antenna_count = reader.u8()?;
        for antenna in interface.antennas.iter_mut() {
            *antenna = AntennaSignal {
                dbm_last: reader.i16()?,
                dbm_min: reader.i16()?,
                dbm_max: reader.i16()?,
                dbm_avg: reader.i16()?,
                noise_last: reader.i16()?,
                noise_min: reader.i16()?,
                noise_max: reader.i16()?,
                noise_avg: reader.i16()?,
                dbm_change_min: reader.i16()?,
                dbm_change_max: reader.i16()?,
                samples: reader.u16()?,
            };
        }
    }

    let blocks = BlockCounters {
        processed_packets: reader.u16()?,
        recv_video_data_packets: reader.u16()?,
        recv_video_ec_packets: reader.u16()?,
        recv_end_of_frame: reader.u16()?,
        output_video_packets: reader.u16()?,
        output_single_ec_used: reader.u16()?,
        output_two_ec_used: reader.u16()?,
        output_multiple_ec_used: reader.u16()?,
        output_max_ec_used: reader.u16()?,
        skipped_blocks: reader.u16()?,
        retransmitted_packets: reader.u16()?,
    };
    let link_quality_percent = reader.u8()?;
    let adaptive_flags = AdaptiveFlags::new(reader.u32()?);

    let mut vehicles = [VehicleSliceStats::default(); MAX_CONCURRENT_VEHICLES];
    for vehicle in vehicles.iter_mut() {
        *vehicle = VehicleSliceStats {
            min_ack_ms: reader.u16()?,
            max_ack_ms: reader.u16()?,
            retransmissions_requested: reader.u16()?,
            retransmissions_acked: reader.u16()?,
        };
    }

    Ok(TimeSlice {
        start_ms,
        interfaces,
        signal,
        blocks,
        link_quality_percent,
        adaptive_flags,
        vehicles,
    })
}

/// Bounds-checked little-endian reader.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
    context: &'static str,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], context: &'static str) -> Self {
        Self { data, offset: 0, context }
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset + len;
        if end > self.data.len() {
            return Err(LinkError::decode(
                self.context,
                format!(
                    "Insufficient data at offset {} (need {} bytes, have {})",
                    self.offset,
                    len,
                    self.data.len() - self.offset
                ),
            ));
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

/// Bounds-checked little-endian writer.
pub(crate) struct ByteWriter<'a> {
    out: &'a mut [u8],
    offset: usize,
}

impl<'a> ByteWriter<'a> {
    pub(crate) fn new(out: &'a mut [u8]) -> Self {
        Self { out, offset: 0 }
    }

    pub(crate) fn bytes(&mut self, data: &[u8]) -> Result<()> {
        let end = self.offset + data.len();
        if end > self.out.len() {
            return Err(LinkError::Memory { offset: self.offset });
        }
        self.out[self.offset..end].copy_from_slice(data);
        self.offset = end;
        Ok(())
    }

    pub(crate) fn u8(&mut self, value: u8) -> Result<()> {
        self.bytes(&[value])
    }

    pub(crate) fn u16(&mut self, value: u16) -> Result<()> {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn i16(&mut self, value: i16) -> Result<()> {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn u32(&mut self, value: u32) -> Result<()> {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn i32(&mut self, value: i32) -> Result<()> {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn u64(&mut self, value: u64) -> Result<()> {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn position(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::PacketEvent;
    use crate::types::flags::adaptive;
    use anyhow::{Context, Result, ensure};

    fn populated_store() -> RuntimeInfoStore {
        let mut store = RuntimeInfoStore::new(50, 1_000);
        store.record_packet_event(1, PacketEvent::Video);
        store.record_packet_event(1, PacketEvent::Missing(3));
        store.record_radio_sample(0, 1, -62, -94);
        store.record_radio_sample(0, 1, -58, -93);
        store.record_block_output(6, 2);
        store.record_vehicle_ack(0xBEEF, 42);
        store.set_adaptive_flags(adaptive::REQUESTED_BY_USER);
        store.advance_if_due(1_120);
        store.record_processed(9);
        store.set_vehicle_slice_index(11);
        store
    }

    #[test]
    fn layout_sizes_are_fixed() {
        assert_eq!(ANTENNA_SIGNAL_LEN, 22);
        assert_eq!(INTERFACE_SIGNAL_LEN, 89);
        assert_eq!(TIME_SLICE_LEN, 463);
        assert_eq!(STORE_PREFIX_LEN, 40);
        assert_eq!(PAYLOAD_LEN, 40 + 20 * 463);
    }

    #[test]
    fn payload_survives_encode_and_decode() -> Result<()> {
        let store = populated_store();
        let bytes = encode_to_vec(&store).context("encode")?;
        let decoded = decode(&bytes).context("decode")?;

        ensure!(decoded.current_index() == store.current_index());
        ensure!(decoded.slice_interval_ms() == 50);
        ensure!(decoded.index_delta() == store.index_delta());
        ensure!(decoded.vehicle_slot(0xBEEF) == Some(0));
        for offset in 0..SLICE_COUNT {
            ensure!(decoded.slice(offset) == store.slice(offset), "slice {offset} differs");
        }
        Ok(())
    }

    #[test]
    fn short_buffers_are_rejected() {
        let store = populated_store();
        let mut small = vec![0u8; PAYLOAD_LEN - 1];
        assert!(matches!(encode(&store, &mut small), Err(LinkError::Memory { .. })));
        assert!(matches!(decode(&small), Err(LinkError::Decode { .. })));
    }

    #[test]
    fn header_checks_magic_and_version() {
        let mut raw = [0u8; HEADER_LEN];
        let header = RegionHeader { layout_version: 2, generation: 4, payload_len: PAYLOAD_LEN as u32 };
        header.write(&mut raw).expect("header fits");

        let parsed = RegionHeader::parse(&raw).expect("valid magic");
        assert_eq!(parsed, header);
        assert!(matches!(parsed.validate(), Err(LinkError::Version { expected: 1, found: 2 })));

        raw[0] = b'X';
        assert!(matches!(RegionHeader::parse(&raw), Err(LinkError::Decode { .. })));
    }
}
