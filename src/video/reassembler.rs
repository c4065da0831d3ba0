//! Per-stream FEC block reassembly

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::ReassemblyIo;
use super::block::{BlockState, Geometry};
use super::fec::{ErasureCodec, unframe_data_shard};
use super::retransmit::RetransmissionCoordinator;
use super::sink::DeliveredPacket;
use crate::config::{ReassemblyConfig, RetransmissionConfig};
use crate::packet::{VideoHeader, VideoPacket};
use crate::telemetry::{MAX_RADIO_INTERFACES, PacketEvent};
use crate::types::{block_after, block_distance};

/// Result of handing one packet to a reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stored; no block was completed.
    Consumed,
    /// At least one block was forwarded.
    EndOfBlock,
    /// At least one forwarded block closed a video frame.
    EndOfFrame,
    /// The slot was already filled or the block already passed.
    Duplicate,
    /// The block is older than the look-back window.
    StaleBlock,
    /// The packet does not fit the block it claims to belong to.
    Rejected,
}

impl Outcome {
    fn rank(self) -> u8 {
        match self {
            Outcome::EndOfFrame => 2,
            Outcome::EndOfBlock => 1,
            _ => 0,
        }
    }

    fn merge(self, other: Outcome) -> Outcome {
        if other.rank() > self.rank() { other } else { self }
    }

    /// Whether a block was forwarded.
    pub fn completed_block(self) -> bool {
        self.rank() > 0
    }
}

/// Last non-retransmitted position seen on one radio interface.
#[derive(Debug, Clone, Copy)]
struct Position {
    block: u32,
    packet: u8,
    total: usize,
}

/// Whole blocks assumed lost in a single gap are capped so a vehicle restart does not
/// report millions of missing packets.
const MAX_GAP_BLOCKS: u64 = 64;

/// Reassembles the blocks of one (vehicle, stream) pair.
pub struct BlockReassembler {
    vehicle_id: u32,
    stream_id: u8,
    config: ReassemblyConfig,
    codec: Arc<dyn ErasureCodec>,
    retransmit: RetransmissionCoordinator,
    current: Option<u32>,
    first_block: u32,
    // window[i] holds block current + i
    window: VecDeque<BlockState>,
    last_geometry: Option<Geometry>,
    positions: [Option<Position>; MAX_RADIO_INTERFACES],
    delivered_blocks: u64,
    skipped_blocks: u64,
}

impl std::fmt::Debug for BlockReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReassembler")
            .field("vehicle_id", &self.vehicle_id)
            .field("stream_id", &self.stream_id)
            .field("current", &self.current)
            .field("pending", &self.window.len())
            .field("in_flight", &self.retransmit.len())
            .finish()
    }
}

impl BlockReassembler {
    pub fn new(
        vehicle_id: u32,
        stream_id: u8,
        config: ReassemblyConfig,
        retransmission: RetransmissionConfig,
        station_id: u32,
        codec: Arc<dyn ErasureCodec>,
    ) -> Self {
        Self {
            vehicle_id,
            stream_id,
            config,
            codec,
            retransmit: RetransmissionCoordinator::new(retransmission, station_id),
            current: None,
            first_block: 0,
            window: VecDeque::new(),
            last_geometry: None,
            positions: [None; MAX_RADIO_INTERFACES],
            delivered_blocks: 0,
            skipped_blocks: 0,
        }
    }

    /// Feed one video packet received on `interface`.
    pub fn handle_packet(
        &mut self,
        interface: usize,
        packet: &VideoPacket,
        io: &mut ReassemblyIo<'_>,
    ) -> Outcome {
        let header = &packet.video;
        if header.data_packets == 0
            || usize::from(header.packet_index) >= header.total_packets()
            || packet.shard.len() != usize::from(header.shard_size)
        {
            trace!(block = header.block_index, packet = header.packet_index, "Malformed video shard");
            return Outcome::Rejected;
        }

        let block = header.block_index;
        let geometry = Geometry::from(header);
        let current = match self.current {
            Some(current) => current,
            None => {
                self.current = Some(block);
                self.first_block = block;
                block
            }
        };

        if block != current && !block_after(block, current) {
            let behind = block_distance(block, current);
            let before_start = block_after(self.first_block, block)
                && block_distance(self.first_block, current) <= i64::from(self.config.lookback_blocks);
            if behind > i64::from(self.config.lookback_blocks) || before_start {
                trace!(block, current, "Stale block");
                return Outcome::StaleBlock;
            }
            self.note_duplicate(interface, packet, io);
            return Outcome::Duplicate;
        }

        let offset = block_distance(current, block) as u64;
        if let Some(state) = self.window.get(offset as usize) {
            if !state.accepts(geometry) {
                warn!(
                    vehicle_id = self.vehicle_id,
                    block,
                    packet = header.packet_index,
                    "Shard geometry disagrees with its block"
                );
                return Outcome::Rejected;
            }
        }

        io.store.record_packet_event(interface, PacketEvent::Video);
        if !packet.is_retransmitted() {
            self.detect_gap(interface, header, io);
        }

        let window = u64::from(self.config.max_window_blocks);
        let mut outcome = Outcome::Consumed;
        if offset >= window {
            let target = block.wrapping_sub(self.config.max_window_blocks - 1);
            outcome = self.advance_past(target, io);
        }

        let Some(current) = self.current else {
            return Outcome::Rejected;
        };
        let offset = block_distance(current, block).max(0) as usize;
        while self.window.len() <= offset {
            let index = current.wrapping_add(self.window.len() as u32);
            self.window.push_back(BlockState::new(index, io.now_ms));
        }

        if !self.window[offset].insert(header, packet.shard.clone()) {
            self.note_duplicate_shard(packet, io);
            return if outcome.completed_block() { outcome } else { Outcome::Duplicate };
        }
        self.last_geometry = Some(geometry);
        io.store.record_received_shard(header.is_ec());
        if packet.is_retransmitted() {
            io.store.record_retransmitted_packet();
            self.retransmit.on_retransmitted_packet_received(
                self.vehicle_id,
                self.stream_id,
                block,
                header.packet_index,
                io,
            );
        }

        outcome = outcome.merge(self.flush(io));
        self.request_missing_packets(io);
        outcome
    }

    /// Retry or abandon overdue requests, and skip the current block when it holds up
    /// later blocks for too long. Returns the number of blocks skipped.
    pub fn check_timeouts(&mut self, io: &mut ReassemblyIo<'_>) -> usize {
        for (block, _) in self.retransmit.expire(io) {
            if let Some(state) = self.window.iter_mut().find(|state| state.index == block) {
                state.retries_exhausted = true;
            }
        }

        let mut skipped = 0;
        while self.window.len() > 1 {
            let front = &self.window[0];
            let waited = io.now_ms.saturating_sub(front.created_ms);
            if waited < self.config.max_block_wait_ms && !front.retries_exhausted {
                break;
            }
            debug!(
                vehicle_id = self.vehicle_id,
                block = front.index,
                waited,
                exhausted = front.retries_exhausted,
                "Skipping unrecoverable block"
            );
            self.skip_front(io);
            self.flush(io);
            skipped += 1;
        }

        if skipped > 0 {
            self.request_missing_packets(io);
        }
        skipped
    }

    pub fn vehicle_id(&self) -> u32 {
        self.vehicle_id
    }

    pub fn stream_id(&self) -> u8 {
        self.stream_id
    }

    /// Oldest block not yet forwarded or skipped.
    pub fn current_block(&self) -> Option<u32> {
        self.current
    }

    /// Blocks buffered, the current one included.
    pub fn pending_blocks(&self) -> usize {
        self.window.len()
    }

    pub fn delivered_blocks(&self) -> u64 {
        self.delivered_blocks
    }

    pub fn skipped_blocks(&self) -> u64 {
        self.skipped_blocks
    }

    pub fn retransmissions(&self) -> &RetransmissionCoordinator {
        &self.retransmit
    }

    fn note_duplicate(&mut self, interface: usize, packet: &VideoPacket, io: &mut ReassemblyIo<'_>) {
        io.store.record_packet_event(interface, PacketEvent::Video);
        if !packet.is_retransmitted() {
            self.detect_gap(interface, &packet.video, io);
        }
        self.note_duplicate_shard(packet, io);
    }

    fn note_duplicate_shard(&mut self, packet: &VideoPacket, io: &mut ReassemblyIo<'_>) {
        trace!(block = packet.video.block_index, packet = packet.video.packet_index, "Duplicate shard");
        if packet.is_retransmitted() {
            io.store.record_retransmitted_packet();
            self.retransmit.on_retransmitted_packet_received(
                self.vehicle_id,
                self.stream_id,
                packet.video.block_index,
                packet.video.packet_index,
                io,
            );
        }
    }

    fn detect_gap(&mut self, interface: usize, header: &VideoHeader, io: &mut ReassemblyIo<'_>) {
        let Some(slot) = self.positions.get_mut(interface) else {
            return;
        };
        let total = header.total_packets();

        if let Some(last) = *slot {
            let run = if last.block == header.block_index {
                if header.packet_index <= last.packet {
                    return;
                }
                u64::from(header.packet_index - last.packet - 1)
            } else if block_after(header.block_index, last.block) {
                let between = (block_distance(last.block, header.block_index) as u64 - 1)
                    .min(MAX_GAP_BLOCKS);
                let tail = last.total.saturating_sub(usize::from(last.packet) + 1) as u64;
                tail + between * total as u64 + u64::from(header.packet_index)
            } else {
                return;
            };

            if run > 0 {
                let run = run.min(u64::from(u16::MAX)) as u16;
                trace!(interface, run, "Packet gap on interface");
                io.store.record_packet_event(interface, PacketEvent::Missing(run));
            }
        }

        *slot = Some(Position { block: header.block_index, packet: header.packet_index, total });
    }

    /// Forward every complete block at the front of the window.
    fn flush(&mut self, io: &mut ReassemblyIo<'_>) -> Outcome {
        let mut outcome = Outcome::Consumed;
        while self.window.front().is_some_and(BlockState::is_complete) {
            let Some(state) = self.window.pop_front() else {
                break;
            };
            let end_of_frame = self.forward(state, io);
            self.current = self.current.map(|c| c.wrapping_add(1));
            outcome = outcome.merge(if end_of_frame { Outcome::EndOfFrame } else { Outcome::EndOfBlock });
        }
        outcome
    }

    /// Deliver a complete block's data in packet order. Returns whether it closed a frame.
    fn forward(&mut self, state: BlockState, io: &mut ReassemblyIo<'_>) -> bool {
        let block_index = state.index;
        let processed = state.received();
        let end_of_frame = state.end_of_frame;
        let Some(geometry) = state.geometry else {
            return false;
        };
        self.retransmit.cancel_block(block_index);

        let shards = match state.into_data(self.codec.as_ref()) {
            Ok(shards) => shards,
            Err(e) => {
                warn!(vehicle_id = self.vehicle_id, block_index, error = %e, "FEC reconstruction failed");
                io.store.record_skipped_block();
                self.skipped_blocks += 1;
                return false;
            }
        };

        let last_index = geometry.data_packets - 1;
        let mut ec_used = 0u8;
        for shard in shards {
            if shard.reconstructed {
                ec_used += 1;
            }
            let Some(payload) = unframe_data_shard(&shard.shard) else {
                warn!(block_index, packet = shard.packet_index, "Data shard has a bad length prefix");
                continue;
            };
            io.sink.deliver(DeliveredPacket {
                vehicle_id: self.vehicle_id,
                stream_id: self.stream_id,
                block_index,
                packet_index: shard.packet_index,
                payload,
                end_of_frame: end_of_frame && shard.packet_index == last_index,
                reconstructed: shard.reconstructed,
            });
        }

        io.store.record_processed(processed.min(usize::from(u16::MAX)) as u16);
        io.store.record_block_output(geometry.data_packets, ec_used);
        if end_of_frame {
            io.store.record_end_of_frame();
        }
        self.delivered_blocks += 1;
        debug!(vehicle_id = self.vehicle_id, block_index, ec_used, "Block forwarded");
        end_of_frame
    }

    fn skip_front(&mut self, io: &mut ReassemblyIo<'_>) {
        if let Some(state) = self.window.pop_front() {
            self.retransmit.cancel_block(state.index);
        }
        io.store.record_skipped_block();
        self.skipped_blocks += 1;
        self.current = self.current.map(|c| c.wrapping_add(1));
    }

    /// Skip blocks until `target` is the current block or later.
    fn advance_past(&mut self, target: u32, io: &mut ReassemblyIo<'_>) -> Outcome {
        let mut outcome = Outcome::Consumed;
        while let Some(current) = self.current {
            if !block_after(target, current) {
                break;
            }
            if self.window.is_empty() {
                let gap = block_distance(current, target) as u64;
                io.store.record_skipped_blocks(gap.min(u64::from(u16::MAX)) as u16);
                self.skipped_blocks += gap;
                self.current = Some(target);
                break;
            }
            debug!(vehicle_id = self.vehicle_id, block = current, "Window overrun, skipping block");
            self.skip_front(io);
            outcome = outcome.merge(self.flush(io));
        }
        outcome
    }

    /// Ask for the data shards that can no longer arrive on their own.
    fn request_missing_packets(&mut self, io: &mut ReassemblyIo<'_>) {
        let fallback = self.last_geometry.map_or(0, |g| g.data_packets);
        let len = self.window.len();

        for i in 0..len {
            let state = &self.window[i];
            if state.is_complete() || state.retries_exhausted {
                continue;
            }

            let later_seen = i + 1 < len;
            let in_flight = self.retransmit.in_flight_for_block(state.index);
            let budget = self.config.max_in_flight_per_block.saturating_sub(in_flight);
            let wanted = state.shortfall(fallback, later_seen).saturating_sub(in_flight).min(budget);
            if wanted == 0 {
                continue;
            }

            let block_index = state.index;
            let indices: Vec<u8> = state
                .missing_data(fallback)
                .into_iter()
                .filter(|&p| !self.retransmit.is_in_flight(block_index, p))
                .take(wanted)
                .collect();
            if indices.is_empty() {
                continue;
            }
            debug!(vehicle_id = self.vehicle_id, block_index, ?indices, "Requesting retransmission");
            self.retransmit.request_missing(self.vehicle_id, self.stream_id, block_index, &indices, io);
        }
    }
}
