//! State of one in-progress FEC block

use bytes::Bytes;

use super::fec::{ErasureCodec, FecError};
use crate::packet::VideoHeader;
use crate::types::Millis;

/// Shard counts and size shared by every packet of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub data_packets: u8,
    pub ec_packets: u8,
    pub shard_size: u16,
}

impl Geometry {
    pub fn total(&self) -> usize {
        usize::from(self.data_packets) + usize::from(self.ec_packets)
    }
}

impl From<&VideoHeader> for Geometry {
    fn from(header: &VideoHeader) -> Self {
        Self {
            data_packets: header.data_packets,
            ec_packets: header.ec_packets,
            shard_size: header.shard_size,
        }
    }
}

/// A data shard ready for delivery.
#[derive(Debug, Clone)]
pub(crate) struct DataShard {
    pub packet_index: u8,
    pub shard: Bytes,
    pub reconstructed: bool,
}

#[derive(Debug)]
pub(crate) struct BlockState {
    pub index: u32,
    pub geometry: Option<Geometry>,
    shards: Vec<Option<Bytes>>,
    received: usize,
    highest_received: Option<u8>,
    pub end_of_frame: bool,
    pub created_ms: Millis,
    pub retries_exhausted: bool,
}

impl BlockState {
    pub fn new(index: u32, created_ms: Millis) -> Self {
        Self {
            index,
            geometry: None,
            shards: Vec::new(),
            received: 0,
            highest_received: None,
            end_of_frame: false,
            created_ms,
            retries_exhausted: false,
        }
    }

    /// Whether a packet with this geometry can belong to the block.
    pub fn accepts(&self, geometry: Geometry) -> bool {
        self.geometry.is_none_or(|own| own == geometry)
    }

    /// Store a shard. Returns false when the slot was already filled.
    pub fn insert(&mut self, header: &VideoHeader, shard: Bytes) -> bool {
        let geometry = *self.geometry.get_or_insert_with(|| Geometry::from(header));
        if self.shards.is_empty() {
            self.shards = vec![None; geometry.total()];
        }

        let slot = &mut self.shards[usize::from(header.packet_index)];
        if slot.is_some() {
            return false;
        }
        *slot = Some(shard);
        self.received += 1;
        self.highest_received = self.highest_received.max(Some(header.packet_index));
        self.end_of_frame |= header.is_end_of_frame();
        true
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn has_packets(&self) -> bool {
        self.received > 0
    }

    pub fn is_complete(&self) -> bool {
        self.geometry.is_some_and(|g| self.received >= usize::from(g.data_packets))
    }

    /// Data shards still to be requested, lowest first. A block nothing arrived for
    /// assumes `fallback_data` data packets.
    pub fn missing_data(&self, fallback_data: u8) -> Vec<u8> {
        match self.geometry {
            Some(g) => (0..g.data_packets).filter(|&i| self.shards[usize::from(i)].is_none()).collect(),
            None => (0..fallback_data).collect(),
        }
    }

    /// Data shards that cannot arrive on their own anymore.
    ///
    /// Positions after the highest received index are still expected until a later
    /// block has been seen.
    pub fn shortfall(&self, fallback_data: u8, later_seen: bool) -> usize {
        let (data, total) = match self.geometry {
            Some(g) => (usize::from(g.data_packets), g.total()),
            None => (usize::from(fallback_data), usize::from(fallback_data)),
        };
        let still_expected = match (later_seen, self.highest_received) {
            (true, _) => 0,
            (false, Some(highest)) => total - 1 - usize::from(highest),
            (false, None) => total,
        };
        data.saturating_sub(self.received + still_expected)
    }

    /// Consume the block, rebuilding missing data shards from EC when needed.
    pub fn into_data(self, codec: &dyn ErasureCodec) -> Result<Vec<DataShard>, FecError> {
        let Some(geometry) = self.geometry else {
            return Err(FecError::InsufficientData { available: 0, required: 1 });
        };
        let data_count = usize::from(geometry.data_packets);

        let missing: Vec<usize> = (0..data_count).filter(|&i| self.shards[i].is_none()).collect();
        if missing.is_empty() {
            return Ok(self
                .shards
                .into_iter()
                .take(data_count)
                .enumerate()
                .filter_map(|(i, shard)| {
                    shard.map(|shard| DataShard { packet_index: i as u8, shard, reconstructed: false })
                })
                .collect());
        }

        let mut work: Vec<Option<Vec<u8>>> =
            self.shards.iter().map(|s| s.as_ref().map(|b| b.to_vec())).collect();
        codec.reconstruct(data_count, usize::from(geometry.ec_packets), &mut work)?;

        let mut out = Vec::with_capacity(data_count);
        for (i, original) in self.shards.into_iter().take(data_count).enumerate() {
            let (shard, reconstructed) = match original {
                Some(shard) => (shard, false),
                None => match work[i].take() {
                    Some(rebuilt) => (Bytes::from(rebuilt), true),
                    None => {
                        return Err(FecError::InsufficientData {
                            available: self.received,
                            required: data_count,
                        });
                    }
                },
            };
            out.push(DataShard { packet_index: i as u8, shard, reconstructed });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::fec::CauchyCodec;

    fn header(packet_index: u8, data: u8, ec: u8) -> VideoHeader {
        VideoHeader {
            block_index: 3,
            packet_index,
            data_packets: data,
            ec_packets: ec,
            video_flags: 0,
            stream_id: 0,
            shard_size: 4,
        }
    }

    #[test]
    fn shortfall_waits_for_tail_until_later_block() {
        let mut block = BlockState::new(3, 0);
        block.insert(&header(0, 5, 1), Bytes::from_static(&[0; 4]));
        block.insert(&header(2, 5, 1), Bytes::from_static(&[0; 4]));

        // Positions 3..=5 may still come.
        assert_eq!(block.shortfall(0, false), 0);
        assert_eq!(block.shortfall(0, true), 3);
        assert_eq!(block.missing_data(0), vec![1, 3, 4]);
    }

    #[test]
    fn unseen_blocks_use_fallback_geometry() {
        let block = BlockState::new(9, 0);
        assert_eq!(block.shortfall(4, true), 4);
        assert_eq!(block.missing_data(4), vec![0, 1, 2, 3]);
        assert!(!block.is_complete());
    }

    #[test]
    fn duplicate_slots_and_geometry_checks() {
        let mut block = BlockState::new(3, 0);
        assert!(block.insert(&header(1, 2, 1), Bytes::from_static(&[1; 4])));
        assert!(!block.insert(&header(1, 2, 1), Bytes::from_static(&[1; 4])));
        assert!(block.accepts(Geometry::from(&header(0, 2, 1))));
        assert!(!block.accepts(Geometry::from(&header(0, 3, 1))));
    }

    #[test]
    fn ec_fills_a_missing_data_shard() {
        let data = vec![vec![1u8, 2, 3, 4], vec![5, 6, 7, 8]];
        let parity = CauchyCodec.encode(&data, 1).expect("valid geometry");

        let mut block = BlockState::new(3, 0);
        block.insert(&header(0, 2, 1), Bytes::from(data[0].clone()));
        block.insert(&header(2, 2, 1), Bytes::from(parity[0].clone()));
        assert!(block.is_complete());

        let shards = block.into_data(&CauchyCodec).expect("reconstructable");
        assert_eq!(shards.len(), 2);
        assert!(!shards[0].reconstructed);
        assert!(shards[1].reconstructed);
        assert_eq!(&shards[1].shard[..], &data[1][..]);
    }
}
