//! Retransmission request tracking.
//!
//! Each missing (block, packet) pair has at most one live request. A pair that was
//! requested less than `min_retry_interval_ms` ago is never requested again, not even
//! by a timeout re-send. A request left unanswered for `request_timeout_ms` (or the
//! retry interval, whichever is longer) is re-sent until `max_retries` is used up and
//! then abandoned.
//!
//! Requests of a block that completes or is skipped stay remembered until they would
//! have timed out, so a retransmission arriving after the block is gone still counts
//! as answered.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use super::ReassemblyIo;
use crate::config::RetransmissionConfig;
use crate::packet::RetransmissionRequest;
use crate::types::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct RequestKey {
    vehicle_id: u32,
    stream_id: u8,
    block_index: u32,
    packet_index: u8,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    last_sent_ms: Millis,
    retries: u32,
}

/// Outstanding retransmission requests of one reassembler.
#[derive(Debug)]
pub struct RetransmissionCoordinator {
    config: RetransmissionConfig,
    station_id: u32,
    in_flight: BTreeMap<RequestKey, InFlight>,
    /// Requests of finished blocks, by last send time.
    cancelled: BTreeMap<RequestKey, Millis>,
}

impl RetransmissionCoordinator {
    pub fn new(config: RetransmissionConfig, station_id: u32) -> Self {
        Self { config, station_id, in_flight: BTreeMap::new(), cancelled: BTreeMap::new() }
    }

    /// Request the given data packets of one block in a single message.
    ///
    /// Pairs with a request younger than the retry interval are left out. Returns the
    /// number of packet indices actually requested.
    pub fn request_missing(
        &mut self,
        vehicle_id: u32,
        stream_id: u8,
        block_index: u32,
        packets: &[u8],
        io: &mut ReassemblyIo<'_>,
    ) -> usize {
        let now = io.now_ms;
        let min_retry = self.config.min_retry_interval_ms;
        let mut indices = Vec::with_capacity(packets.len());

        for &packet_index in packets {
            let key = RequestKey { vehicle_id, stream_id, block_index, packet_index };
            match self.in_flight.get_mut(&key) {
                Some(entry) if now.saturating_sub(entry.last_sent_ms) < min_retry => {
                    trace!(block_index, packet_index, "Retransmission suppressed");
                }
                Some(entry) => {
                    entry.last_sent_ms = now;
                    entry.retries += 1;
                    indices.push(packet_index);
                }
                None => {
                    self.in_flight.insert(key, InFlight { last_sent_ms: now, retries: 0 });
                    indices.push(packet_index);
                }
            }
        }

        if indices.is_empty() {
            return 0;
        }
        self.send(vehicle_id, stream_id, block_index, &indices, io);
        indices.len()
    }

    /// Clear the request for a packet that just arrived with the retransmitted flag.
    ///
    /// Returns the round trip when a request was outstanding.
    pub fn on_retransmitted_packet_received(
        &mut self,
        vehicle_id: u32,
        stream_id: u8,
        block_index: u32,
        packet_index: u8,
        io: &mut ReassemblyIo<'_>,
    ) -> Option<u64> {
        let key = RequestKey { vehicle_id, stream_id, block_index, packet_index };
        let last_sent_ms = match self.in_flight.remove(&key) {
            Some(entry) => entry.last_sent_ms,
            None => self.cancelled.remove(&key)?,
        };
        let round_trip = io.now_ms.saturating_sub(last_sent_ms);

        io.store.record_vehicle_ack(vehicle_id, round_trip);
        io.store.record_retransmission_acked(vehicle_id);
        trace!(block_index, packet_index, round_trip, "Retransmission answered");
        Some(round_trip)
    }

    /// Re-send or abandon requests that timed out.
    ///
    /// Returns the abandoned (block, packet) pairs.
    pub fn expire(&mut self, io: &mut ReassemblyIo<'_>) -> Vec<(u32, u8)> {
        let now = io.now_ms;
        let wait = self.retry_wait_ms();
        let mut abandoned = Vec::new();
        let mut resend: BTreeMap<(u32, u8, u32), Vec<u8>> = BTreeMap::new();

        self.cancelled.retain(|_, last_sent_ms| now.saturating_sub(*last_sent_ms) < wait);
        self.in_flight.retain(|key, entry| {
            if now.saturating_sub(entry.last_sent_ms) < wait {
                return true;
            }
            if entry.retries < self.config.max_retries {
                entry.retries += 1;
                entry.last_sent_ms = now;
                resend
                    .entry((key.vehicle_id, key.stream_id, key.block_index))
                    .or_default()
                    .push(key.packet_index);
                true
            } else {
                abandoned.push((key.block_index, key.packet_index));
                false
            }
        });

        for ((vehicle_id, stream_id, block_index), indices) in resend {
            debug!(block_index, count = indices.len(), "Retrying retransmission request");
            self.send(vehicle_id, stream_id, block_index, &indices, io);
        }
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "Abandoned retransmission requests");
        }
        abandoned
    }

    /// Drop every request for a block that was delivered or skipped.
    pub fn cancel_block(&mut self, block_index: u32) {
        let cancelled = &mut self.cancelled;
        self.in_flight.retain(|key, entry| {
            if key.block_index != block_index {
                return true;
            }
            cancelled.insert(*key, entry.last_sent_ms);
            false
        });
    }

    /// Time an unanswered request is given before it is re-sent.
    fn retry_wait_ms(&self) -> Millis {
        self.config.request_timeout_ms.max(self.config.min_retry_interval_ms)
    }

    pub fn in_flight_for_block(&self, block_index: u32) -> usize {
        self.in_flight.keys().filter(|key| key.block_index == block_index).count()
    }

    pub fn is_in_flight(&self, block_index: u32, packet_index: u8) -> bool {
        self.in_flight
            .keys()
            .any(|key| key.block_index == block_index && key.packet_index == packet_index)
    }

    /// Blocks with at least one outstanding request.
    pub fn blocks_in_flight(&self) -> BTreeSet<u32> {
        self.in_flight.keys().map(|key| key.block_index).collect()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    fn send(
        &self,
        vehicle_id: u32,
        stream_id: u8,
        block_index: u32,
        indices: &[u8],
        io: &mut ReassemblyIo<'_>,
    ) {
        let request = RetransmissionRequest { stream_id, block_index, indices: indices.to_vec() };
        let datagram = request.encode(self.station_id, vehicle_id);
        if let Err(e) = io.link.send(vehicle_id, datagram) {
            warn!(vehicle_id, block_index, error = %e, "Failed to queue retransmission request");
        }
        io.store.record_retransmission_requested(vehicle_id, indices.len() as u16);
    }
}
