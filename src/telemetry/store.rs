//! The runtime info store: slice ring plus vehicle table

use tracing::{debug, trace};

use super::ring::TimeSliceRing;
use super::slice::{PacketEvent, TimeSlice, VehicleSliceStats};
use super::{MAX_CONCURRENT_VEHICLES, MAX_RADIO_ANTENNAS, MAX_RADIO_INTERFACES, SLICE_COUNT};
use crate::types::Millis;

/// Aggregated link telemetry over the last [`SLICE_COUNT`] slices.
///
/// Vehicles are admitted lazily into a fixed table and never evicted; once the table is
/// full, later vehicles are simply not tracked.
#[derive(Debug, Clone)]
pub struct RuntimeInfoStore {
    ring: TimeSliceRing<TimeSlice>,
    vehicles: [u32; MAX_CONCURRENT_VEHICLES],
    index_delta: i32,
    // Previous dBm per antenna, carried across slices for change speed.
    last_dbm: [[Option<i16>; MAX_RADIO_ANTENNAS]; MAX_RADIO_INTERFACES],
}

impl RuntimeInfoStore {
    pub fn new(slice_interval_ms: u64, now_ms: Millis) -> Self {
        Self {
            ring: TimeSliceRing::new(SLICE_COUNT, slice_interval_ms, now_ms),
            vehicles: [0; MAX_CONCURRENT_VEHICLES],
            index_delta: 0,
            last_dbm: [[None; MAX_RADIO_ANTENNAS]; MAX_RADIO_INTERFACES],
        }
    }

    pub(crate) fn from_parts(
        ring: TimeSliceRing<TimeSlice>,
        vehicles: [u32; MAX_CONCURRENT_VEHICLES],
        index_delta: i32,
    ) -> Self {
        let last_dbm = [[None; MAX_RADIO_ANTENNAS]; MAX_RADIO_INTERFACES];
        Self { ring, vehicles, index_delta, last_dbm }
    }

    /// Close the current slice and move on if its interval has elapsed.
    pub fn advance_if_due(&mut self, now_ms: Millis) -> bool {
        if !self.ring.will_advance(now_ms) {
            return false;
        }
        self.ring.current_mut().close();
        let steps = self.ring.advance_if_due(now_ms);
        trace!(steps, index = self.ring.index(), "Telemetry slice advanced");
        true
    }

    /// Whether `advance_if_due(now_ms)` would close the current slice.
    pub fn will_advance(&self, now_ms: Millis) -> bool {
        self.ring.will_advance(now_ms)
    }

    pub fn record_radio_sample(&mut self, interface: usize, antenna: usize, dbm: i16, noise: i16) {
        if interface >= MAX_RADIO_INTERFACES || antenna >= MAX_RADIO_ANTENNAS {
            return;
        }
        let change = self.last_dbm[interface][antenna].map(|prev| dbm.saturating_sub(prev));
        self.last_dbm[interface][antenna] = Some(dbm);

        let signal = &mut self.ring.current_mut().signal[interface];
        signal.antenna_count = signal.antenna_count.max(antenna as u8 + 1);
        signal.antennas[antenna].record(dbm, noise, change);
    }

    pub fn record_packet_event(&mut self, interface: usize, event: PacketEvent) {
        self.ring.current_mut().record_event(interface, event);
    }

    /// A block was forwarded; `ec_used` shards had to be reconstructed.
    pub fn record_block_output(&mut self, data_packets: u8, ec_used: u8) {
        let blocks = &mut self.ring.current_mut().blocks;
        blocks.output_video_packets =
            blocks.output_video_packets.saturating_add(data_packets.into());
        match ec_used {
            0 => {}
            1 => blocks.output_single_ec_used = blocks.output_single_ec_used.saturating_add(1),
            2 => blocks.output_two_ec_used = blocks.output_two_ec_used.saturating_add(1),
            _ => {
                blocks.output_multiple_ec_used = blocks.output_multiple_ec_used.saturating_add(1)
            }
        }
        blocks.output_max_ec_used = blocks.output_max_ec_used.max(ec_used.into());
    }

    pub fn record_skipped_block(&mut self) {
        self.record_skipped_blocks(1);
    }

    pub fn record_skipped_blocks(&mut self, count: u16) {
        let blocks = &mut self.ring.current_mut().blocks;
        blocks.skipped_blocks = blocks.skipped_blocks.saturating_add(count);
    }

    pub fn record_received_shard(&mut self, is_ec: bool) {
        let blocks = &mut self.ring.current_mut().blocks;
        if is_ec {
            blocks.recv_video_ec_packets = blocks.recv_video_ec_packets.saturating_add(1);
        } else {
            blocks.recv_video_data_packets = blocks.recv_video_data_packets.saturating_add(1);
        }
    }

    pub fn record_end_of_frame(&mut self) {
        let blocks = &mut self.ring.current_mut().blocks;
        blocks.recv_end_of_frame = blocks.recv_end_of_frame.saturating_add(1);
    }

    pub fn record_processed(&mut self, packets: u16) {
        let blocks = &mut self.ring.current_mut().blocks;
        blocks.processed_packets = blocks.processed_packets.saturating_add(packets);
    }

    pub fn record_retransmitted_packet(&mut self) {
        let blocks = &mut self.ring.current_mut().blocks;
        blocks.retransmitted_packets = blocks.retransmitted_packets.saturating_add(1);
    }

    /// Record an acknowledgment round trip. Admits the vehicle if there is room.
    pub fn record_vehicle_ack(&mut self, vehicle_id: u32, round_trip_ms: u64) {
        if let Some(stats) = self.current_vehicle_stats(vehicle_id) {
            stats.record_ack(round_trip_ms);
        }
    }

    pub fn record_retransmission_requested(&mut self, vehicle_id: u32, count: u16) {
        if let Some(stats) = self.current_vehicle_stats(vehicle_id) {
            stats.retransmissions_requested = stats.retransmissions_requested.saturating_add(count);
        }
    }

    pub fn record_retransmission_acked(&mut self, vehicle_id: u32) {
        if let Some(stats) = self.current_vehicle_stats(vehicle_id) {
            stats.retransmissions_acked = stats.retransmissions_acked.saturating_add(1);
        }
    }

    /// OR adaptive flag bits into the current slice.
    pub fn set_adaptive_flags(&mut self, bits: u32) {
        self.ring.current_mut().adaptive_flags.insert(bits);
    }

    /// Note the slice index the vehicle reports for "now".
    ///
    /// Only a display hint: the two clocks are not synchronized and may drift freely.
    pub fn set_vehicle_slice_index(&mut self, vehicle_index: u32) {
        let capacity = self.ring.capacity() as i64;
        let vehicle = i64::from(vehicle_index) % capacity;
        self.index_delta = (vehicle - self.ring.index() as i64) as i32;
    }

    /// Map a vehicle-side slice index onto a local ring slot.
    pub fn vehicle_to_local_index(&self, vehicle_index: u32) -> usize {
        let capacity = self.ring.capacity() as i64;
        (i64::from(vehicle_index) - i64::from(self.index_delta)).rem_euclid(capacity) as usize
    }

    pub fn index_delta(&self) -> i32 {
        self.index_delta
    }

    /// Slice `offset` slices before the current one (0 = current).
    pub fn slice(&self, offset: usize) -> &TimeSlice {
        self.ring.get(offset)
    }

    /// Up to `n` slices, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &TimeSlice> + '_ {
        self.ring.iter_recent(n)
    }

    pub fn vehicle_stats(&self, vehicle_id: u32, offset: usize) -> Option<&VehicleSliceStats> {
        let slot = self.vehicle_slot(vehicle_id)?;
        Some(&self.ring.get(offset).vehicles[slot])
    }

    pub fn vehicle_slot(&self, vehicle_id: u32) -> Option<usize> {
        if vehicle_id == 0 {
            return None;
        }
        self.vehicles.iter().position(|&id| id == vehicle_id)
    }

    /// Admit a vehicle into the table. Returns its slot, or `None` when the table is full.
    pub fn admit_vehicle(&mut self, vehicle_id: u32) -> Option<usize> {
        if vehicle_id == 0 {
            return None;
        }
        if let Some(slot) = self.vehicle_slot(vehicle_id) {
            return Some(slot);
        }
        match self.vehicles.iter().position(|&id| id == 0) {
            Some(slot) => {
                self.vehicles[slot] = vehicle_id;
                debug!(vehicle_id, slot, "Vehicle admitted to telemetry table");
                Some(slot)
            }
            None => {
                debug!(vehicle_id, "Telemetry vehicle table full, not tracking");
                None
            }
        }
    }

    /// Vehicle ids holding a telemetry slot.
    pub fn vehicles(&self) -> impl Iterator<Item = u32> + '_ {
        self.vehicles.iter().copied().filter(|&id| id != 0)
    }

    pub(crate) fn vehicle_table(&self) -> &[u32; MAX_CONCURRENT_VEHICLES] {
        &self.vehicles
    }

    pub fn current_index(&self) -> usize {
        self.ring.index()
    }

    pub fn slice_interval_ms(&self) -> u64 {
        self.ring.interval_ms()
    }

    pub fn ring(&self) -> &TimeSliceRing<TimeSlice> {
        &self.ring
    }

    fn current_vehicle_stats(&mut self, vehicle_id: u32) -> Option<&mut VehicleSliceStats> {
        let slot = self.admit_vehicle(vehicle_id)?;
        Some(&mut self.ring.current_mut().vehicles[slot])
    }
}
