//! Bounded set of live reassemblers

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::ReassemblyIo;
use super::fec::{CauchyCodec, ErasureCodec};
use super::reassembler::BlockReassembler;
use crate::config::{ReassemblyConfig, RetransmissionConfig};
use crate::types::Millis;

/// Identifies the reassembler of one video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReassemblerKey {
    pub vehicle_id: u32,
    pub stream_id: u8,
}

struct Slot {
    reassembler: BlockReassembler,
    last_active_ms: Millis,
}

/// Owns one [`BlockReassembler`] per (vehicle, stream), up to a fixed capacity.
///
/// Running out of slots is a soft error: the packet is dropped and the existing
/// streams keep going. A stream that sends nothing for `idle_release_ms` loses its
/// slot.
pub struct ReassemblerPool {
    reassembly: ReassemblyConfig,
    retransmission: RetransmissionConfig,
    station_id: u32,
    codec: Arc<dyn ErasureCodec>,
    reassemblers: HashMap<ReassemblerKey, Slot>,
    rejected_streams: u64,
}

impl std::fmt::Debug for ReassemblerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReassemblerPool")
            .field("capacity", &self.reassembly.pool_capacity)
            .field("live", &self.reassemblers.len())
            .field("rejected_streams", &self.rejected_streams)
            .finish()
    }
}

impl ReassemblerPool {
    pub fn new(
        reassembly: ReassemblyConfig,
        retransmission: RetransmissionConfig,
        station_id: u32,
    ) -> Self {
        Self::with_codec(reassembly, retransmission, station_id, Arc::new(CauchyCodec))
    }

    pub fn with_codec(
        reassembly: ReassemblyConfig,
        retransmission: RetransmissionConfig,
        station_id: u32,
        codec: Arc<dyn ErasureCodec>,
    ) -> Self {
        Self {
            reassembly,
            retransmission,
            station_id,
            codec,
            reassemblers: HashMap::new(),
            rejected_streams: 0,
        }
    }

    /// Look up the stream's reassembler, creating it when there is room.
    ///
    /// Marks the stream active at `now_ms`. A full pool first gives up its idle slots.
    pub fn get_or_create(
        &mut self,
        vehicle_id: u32,
        stream_id: u8,
        now_ms: Millis,
    ) -> Option<&mut BlockReassembler> {
        let key = ReassemblerKey { vehicle_id, stream_id };
        if !self.reassemblers.contains_key(&key) {
            if self.reassemblers.len() >= self.reassembly.pool_capacity {
                self.release_idle(now_ms);
            }
            if self.reassemblers.len() >= self.reassembly.pool_capacity {
                self.rejected_streams += 1;
                warn!(
                    vehicle_id,
                    stream_id,
                    capacity = self.reassembly.pool_capacity,
                    "Reassembler pool exhausted, dropping stream"
                );
                return None;
            }
            debug!(vehicle_id, stream_id, "Creating reassembler");
            let reassembler = BlockReassembler::new(
                vehicle_id,
                stream_id,
                self.reassembly.clone(),
                self.retransmission.clone(),
                self.station_id,
                Arc::clone(&self.codec),
            );
            self.reassemblers.insert(key, Slot { reassembler, last_active_ms: now_ms });
        }
        let slot = self.reassemblers.get_mut(&key)?;
        slot.last_active_ms = slot.last_active_ms.max(now_ms);
        Some(&mut slot.reassembler)
    }

    pub fn get(&self, vehicle_id: u32, stream_id: u8) -> Option<&BlockReassembler> {
        self.reassemblers.get(&ReassemblerKey { vehicle_id, stream_id }).map(|slot| &slot.reassembler)
    }

    /// Run timeout handling on every reassembler. Returns the blocks skipped.
    pub fn check_timeouts(&mut self, io: &mut ReassemblyIo<'_>) -> usize {
        self.reassemblers.values_mut().map(|slot| slot.reassembler.check_timeouts(io)).sum()
    }

    /// Drop the streams idle for `idle_release_ms` or longer. Returns how many went.
    pub fn release_idle(&mut self, now_ms: Millis) -> usize {
        let idle = self.reassembly.idle_release_ms;
        let before = self.reassemblers.len();
        self.reassemblers.retain(|key, slot| {
            let keep = now_ms.saturating_sub(slot.last_active_ms) < idle;
            if !keep {
                debug!(
                    vehicle_id = key.vehicle_id,
                    stream_id = key.stream_id,
                    delivered_blocks = slot.reassembler.delivered_blocks(),
                    "Releasing idle reassembler"
                );
            }
            keep
        });
        before - self.reassemblers.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = ReassemblerKey> + '_ {
        self.reassemblers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.reassemblers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reassemblers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.reassembly.pool_capacity
    }

    /// Streams turned away because the pool was full.
    pub fn rejected_streams(&self) -> u64 {
        self.rejected_streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RuntimeInfoStore;
    use crate::test_utils::{BlockBuilder, RecordingLink};
    use crate::video::DeliveredPacket;

    fn pool(capacity: usize) -> ReassemblerPool {
        ReassemblerPool::new(
            ReassemblyConfig { pool_capacity: capacity, idle_release_ms: 1_000, ..Default::default() },
            RetransmissionConfig::default(),
            0xA0,
        )
    }

    #[test]
    fn exhausted_pool_is_a_soft_error() {
        let mut store = RuntimeInfoStore::new(100, 0);
        let link = RecordingLink::default();
        let mut sink: Vec<DeliveredPacket> = Vec::new();
        let mut pool = pool(2);

        let block = BlockBuilder::new(0, 2, 0).build();
        let mut io = ReassemblyIo::new(1, &mut store, &link, &mut sink);
        if let Some(reassembler) = pool.get_or_create(1, 0, 1) {
            reassembler.handle_packet(0, &block.packets[0], &mut io);
        }
        assert!(pool.get_or_create(2, 0, 1).is_some());

        assert!(pool.get_or_create(3, 0, 1).is_none());
        assert_eq!(pool.rejected_streams(), 1);
        assert_eq!(pool.len(), 2);

        // The existing stream is untouched and still completes its block.
        let reassembler = pool.get_or_create(1, 0, 1).expect("existing stream");
        assert_eq!(reassembler.pending_blocks(), 1);
        reassembler.handle_packet(0, &block.packets[1], &mut io);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn streams_of_one_vehicle_are_independent() {
        let mut pool = pool(4);
        pool.get_or_create(1, 0, 0);
        pool.get_or_create(1, 1, 0);
        pool.get_or_create(2, 0, 0);

        let mut keys: Vec<_> = pool.keys().collect();
        keys.sort();
        assert_eq!(keys[1], ReassemblerKey { vehicle_id: 1, stream_id: 1 });

        pool.get_or_create(2, 0, 600);
        assert_eq!(pool.release_idle(999), 0);
        assert_eq!(pool.release_idle(1_000), 2);
        assert!(pool.get(1, 0).is_none());
        assert!(pool.get(2, 0).is_some());
    }

    #[test]
    fn full_pool_reclaims_idle_slot() {
        let mut pool = pool(1);
        assert!(pool.get_or_create(1, 0, 0).is_some());
        assert!(pool.get_or_create(2, 0, 999).is_none());
        assert_eq!(pool.rejected_streams(), 1);

        assert!(pool.get_or_create(2, 0, 1_000).is_some());
        assert!(pool.get(1, 0).is_none());
        assert_eq!(pool.len(), 1);
    }
}
