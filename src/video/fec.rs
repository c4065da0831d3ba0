//! Erasure coding for video blocks.
//!
//! Blocks are systematic: data shards travel unmodified and EC shards are Cauchy
//! Reed-Solomon combinations of them over GF(2^8). Any `data_count` of the
//! `data_count + ec_count` shards rebuild the block.

use bytes::{BufMut, Bytes, BytesMut};
use gf256::gf::gf;
use thiserror::Error;

#[gf(polynomial = 0x14d, generator = 0x2)]
pub type Gf256;

/// Most shards a single block can hold.
pub const MAX_SHARDS: usize = 256;

/// Bytes in front of every data shard recording the payload length.
pub const SHARD_PREFIX_LEN: usize = 2;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecError {
    #[error("Insufficient shards: have {available}, need {required}")]
    InsufficientData { available: usize, required: usize },

    #[error("Invalid block geometry: {data} data + {ec} EC shards")]
    InvalidGeometry { data: usize, ec: usize },

    #[error("Shard length mismatch: expected {expected}, found {found}")]
    ShardLength { expected: usize, found: usize },
}

/// Pluggable erasure code used by the reassembler.
pub trait ErasureCodec: Send + Sync {
    /// Fill in every missing data shard in `shards` (indexed by packet index).
    ///
    /// EC shards that are missing stay `None`.
    fn reconstruct(
        &self,
        data_count: usize,
        ec_count: usize,
        shards: &mut [Option<Vec<u8>>],
    ) -> Result<(), FecError>;

    /// Produce `ec_count` EC shards for equally sized data shards.
    fn encode(&self, data: &[Vec<u8>], ec_count: usize) -> Result<Vec<Vec<u8>>, FecError>;
}

/// Cauchy Reed-Solomon over GF(2^8), polynomial 0x14d.
#[derive(Debug, Clone, Copy, Default)]
pub struct CauchyCodec;

impl CauchyCodec {
    /// Matrix element for EC row `ec_index` and data column `data_index`.
    ///
    /// Normalized so the first EC row is all ones, which makes it plain XOR parity.
    fn coefficient(data_count: usize, ec_index: usize, data_index: usize) -> Gf256 {
        let x_0 = data_count as u8;
        let x_i = (data_count + ec_index) as u8;
        let y_j = data_index as u8;
        (Gf256(y_j) + Gf256(x_0)) / (Gf256(x_i) + Gf256(y_j))
    }

    fn check_geometry(data_count: usize, ec_count: usize) -> Result<(), FecError> {
        if data_count == 0 || data_count + ec_count > MAX_SHARDS {
            return Err(FecError::InvalidGeometry { data: data_count, ec: ec_count });
        }
        Ok(())
    }
}

impl ErasureCodec for CauchyCodec {
    fn reconstruct(
        &self,
        data_count: usize,
        ec_count: usize,
        shards: &mut [Option<Vec<u8>>],
    ) -> Result<(), FecError> {
        Self::check_geometry(data_count, ec_count)?;
        let total = data_count + ec_count;
        if shards.len() < total {
            return Err(FecError::InvalidGeometry { data: data_count, ec: shards.len() });
        }

        let missing: Vec<usize> = (0..data_count).filter(|&i| shards[i].is_none()).collect();
        if missing.is_empty() {
            return Ok(());
        }

        let recovery: Vec<usize> =
            (0..ec_count).filter(|&r| shards[data_count + r].is_some()).take(missing.len()).collect();
        if recovery.len() < missing.len() {
            let available = shards[..total].iter().filter(|s| s.is_some()).count();
            return Err(FecError::InsufficientData { available, required: data_count });
        }

        let shard_len = shards[data_count + recovery[0]].as_ref().map_or(0, Vec::len);
        for shard in shards[..total].iter().flatten() {
            if shard.len() != shard_len {
                return Err(FecError::ShardLength { expected: shard_len, found: shard.len() });
            }
        }

        let m = missing.len();
        let mut matrix = vec![vec![Gf256(0); m]; m];
        let mut rhs = vec![vec![0u8; shard_len]; m];

        for (row, &ec_index) in recovery.iter().enumerate() {
            if let Some(parity) = &shards[data_count + ec_index] {
                rhs[row].copy_from_slice(parity);
            }
            // Remove the contribution of every data shard we already have.
            for data_index in (0..data_count).filter(|i| !missing.contains(i)) {
                if let Some(source) = &shards[data_index] {
                    let coeff = Self::coefficient(data_count, ec_index, data_index);
                    mul_add(&mut rhs[row], source, coeff);
                }
            }
            for (col, &data_index) in missing.iter().enumerate() {
                matrix[row][col] = Self::coefficient(data_count, ec_index, data_index);
            }
        }

        if !solve(&mut matrix, &mut rhs) {
            let available = shards[..total].iter().filter(|s| s.is_some()).count();
            return Err(FecError::InsufficientData { available, required: data_count });
        }

        for (data_index, recovered) in missing.into_iter().zip(rhs) {
            shards[data_index] = Some(recovered);
        }
        Ok(())
    }

    fn encode(&self, data: &[Vec<u8>], ec_count: usize) -> Result<Vec<Vec<u8>>, FecError> {
        Self::check_geometry(data.len(), ec_count)?;
        let shard_len = data[0].len();
        if let Some(bad) = data.iter().find(|shard| shard.len() != shard_len) {
            return Err(FecError::ShardLength { expected: shard_len, found: bad.len() });
        }

        let mut parity = vec![vec![0u8; shard_len]; ec_count];
        for (ec_index, out) in parity.iter_mut().enumerate() {
            for (data_index, source) in data.iter().enumerate() {
                mul_add(out, source, Self::coefficient(data.len(), ec_index, data_index));
            }
        }
        Ok(parity)
    }
}

/// `dst += src * coeff`
fn mul_add(dst: &mut [u8], src: &[u8], coeff: Gf256) {
    if coeff.0 == 0 {
        return;
    }
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = (Gf256(*d) + Gf256(s) * coeff).0;
    }
}

fn scale(dst: &mut [u8], coeff: Gf256) {
    for d in dst.iter_mut() {
        *d = (Gf256(*d) * coeff).0;
    }
}

/// Gauss-Jordan elimination; leaves the solution in `rhs`. False if singular.
fn solve(matrix: &mut [Vec<Gf256>], rhs: &mut [Vec<u8>]) -> bool {
    let n = matrix.len();
    for col in 0..n {
        let Some(pivot_row) = (col..n).find(|&r| matrix[r][col].0 != 0) else {
            return false;
        };
        if pivot_row != col {
            matrix.swap(col, pivot_row);
            rhs.swap(col, pivot_row);
        }

        let pivot_inv = matrix[col][col].recip();
        for value in matrix[col][col..].iter_mut() {
            *value = *value * pivot_inv;
        }
        scale(&mut rhs[col], pivot_inv);

        let pivot_values = matrix[col].clone();
        let pivot_rhs = rhs[col].clone();
        for row in (0..n).filter(|&r| r != col) {
            let factor = matrix[row][col];
            if factor.0 == 0 {
                continue;
            }
            for j in col..n {
                matrix[row][j] = matrix[row][j] + pivot_values[j] * factor;
            }
            mul_add(&mut rhs[row], &pivot_rhs, factor);
        }
    }
    true
}

/// Frame a payload as a data shard of `shard_size` bytes: length prefix, payload, zeros.
///
/// Returns `None` when the payload does not fit.
pub fn frame_data_shard(payload: &[u8], shard_size: usize) -> Option<Bytes> {
    if payload.len() + SHARD_PREFIX_LEN > shard_size || payload.len() > u16::MAX as usize {
        return None;
    }
    let mut out = BytesMut::with_capacity(shard_size);
    out.put_u16_le(payload.len() as u16);
    out.put_slice(payload);
    out.resize(shard_size, 0);
    Some(out.freeze())
}

/// Recover the payload from a (possibly reconstructed) data shard.
pub fn unframe_data_shard(shard: &Bytes) -> Option<Bytes> {
    if shard.len() < SHARD_PREFIX_LEN {
        return None;
    }
    let len = u16::from_le_bytes([shard[0], shard[1]]) as usize;
    if SHARD_PREFIX_LEN + len > shard.len() {
        return None;
    }
    Some(shard.slice(SHARD_PREFIX_LEN..SHARD_PREFIX_LEN + len))
}
