//! Shared telemetry region backed by a memory-mapped file.
//!
//! The station is the only writer. Readers attach read-only and copy the payload out
//! under a sequence lock: the generation counter is odd while a publish is in
//! progress, and a copy is only accepted when the counter was even and unchanged
//! across it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering, fence};

use memmap2::{Mmap, MmapMut};
use tracing::{debug, info, warn};

use super::layout::{self, GENERATION_OFFSET, HEADER_LEN, PAYLOAD_LEN, REGION_LEN, RegionHeader};
use super::store::RuntimeInfoStore;
use crate::error::{LinkError, Result};

/// Default region location; the suffix names the layout version.
pub const DEFAULT_REGION_PATH: &str = "/dev/shm/groundlink-rtinfo-v1";

const SNAPSHOT_ATTEMPTS: u32 = 8;

/// Writable side of the shared region, owned by the station.
#[derive(Debug)]
pub struct TelemetryRegion {
    path: PathBuf,
    mmap: MmapMut,
    scratch: Vec<u8>,
}

impl TelemetryRegion {
    /// Create (or truncate) the region file and map it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| LinkError::region_error(&path, e))?;
        file.set_len(REGION_LEN as u64).map_err(|e| LinkError::region_error(&path, e))?;

        // SAFETY: the file was just sized by this process; other processes only map it
        // read-only and never resize it.
        let mut mmap =
            unsafe { MmapMut::map_mut(&file) }.map_err(|e| LinkError::region_error(&path, e))?;

        let header = RegionHeader {
            layout_version: layout::LAYOUT_VERSION,
            generation: 0,
            payload_len: PAYLOAD_LEN as u32,
        };
        header.write(&mut mmap[..HEADER_LEN])?;

        info!(path = %path.display(), bytes = REGION_LEN, "Telemetry region created");
        Ok(Self { path, mmap, scratch: vec![0u8; PAYLOAD_LEN] })
    }

    /// Write a consistent copy of the store into the region.
    pub fn publish(&mut self, store: &RuntimeInfoStore) -> Result<()> {
        // Encode outside the write window to keep it short.
        layout::encode(store, &mut self.scratch)?;

        let generation = generation_cell(self.mmap.as_mut_ptr(), self.mmap.len())?;
        let current = generation.load(Ordering::Relaxed);
        generation.store(current.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.mmap[HEADER_LEN..REGION_LEN].copy_from_slice(&self.scratch);

        generation.store(current.wrapping_add(2), Ordering::Release);
        Ok(())
    }

    /// Flush the mapping to its backing file.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().map_err(|e| LinkError::region_error(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn generation(&self) -> u32 {
        generation_cell(self.mmap.as_ptr(), self.mmap.len())
            .map(|g| g.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

/// Read-only view of a region published by a running station.
#[derive(Debug)]
pub struct TelemetryReader {
    path: PathBuf,
    mmap: Mmap,
}

impl TelemetryReader {
    /// Map an existing region and verify its header.
    pub fn attach(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| LinkError::region_error(&path, e))?;

        // SAFETY: mapped read-only; the writer never shrinks the file while attached.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| LinkError::region_error(&path, e))?;
        if mmap.len() < REGION_LEN {
            return Err(LinkError::Memory { offset: mmap.len() });
        }

        RegionHeader::parse(&mmap[..HEADER_LEN])?.validate()?;
        debug!(path = %path.display(), "Attached to telemetry region");
        Ok(Self { path, mmap })
    }

    /// Copy out and decode a consistent snapshot.
    pub fn snapshot(&self) -> Result<RuntimeInfoStore> {
        let generation = generation_cell(self.mmap.as_ptr(), self.mmap.len())?;
        let mut copy = vec![0u8; PAYLOAD_LEN];

        for attempt in 1..=SNAPSHOT_ATTEMPTS {
            let before = generation.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }

            copy.copy_from_slice(&self.mmap[HEADER_LEN..REGION_LEN]);
            fence(Ordering::Acquire);

            let after = generation.load(Ordering::Relaxed);
            if before == after {
                return layout::decode(&copy);
            }
            debug!(attempt, before, after, "Torn telemetry snapshot, retrying");
        }

        warn!(
            path = %self.path.display(),
            attempts = SNAPSHOT_ATTEMPTS,
            "Telemetry snapshot torn on every attempt"
        );
        Err(LinkError::TornSnapshot { attempts: SNAPSHOT_ATTEMPTS })
    }

    pub fn generation(&self) -> u32 {
        generation_cell(self.mmap.as_ptr(), self.mmap.len())
            .map(|g| g.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

/// Generation counter inside a mapping of `len` bytes starting at `base`.
///
/// The returned reference must not outlive the mapping.
fn generation_cell<'a>(base: *const u8, len: usize) -> Result<&'a AtomicU32> {
    if len < GENERATION_OFFSET + 4 {
        return Err(LinkError::Memory { offset: GENERATION_OFFSET });
    }
    let ptr = base.wrapping_add(GENERATION_OFFSET) as *mut u32;
    if (ptr as usize) % std::mem::align_of::<AtomicU32>() != 0 {
        return Err(LinkError::Memory { offset: GENERATION_OFFSET });
    }
    // SAFETY: in bounds and aligned (mappings are page aligned). The counter is only ever
    // accessed atomically, by the writer and by readers alike.
    Ok(unsafe { AtomicU32::from_ptr(ptr) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::PacketEvent;
    use anyhow::{Context, Result};

    #[test]
    fn publish_then_snapshot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rtinfo");

        let mut region = TelemetryRegion::create(&path).context("create region")?;
        let reader = TelemetryReader::attach(&path).context("attach reader")?;

        let mut store = RuntimeInfoStore::new(100, 0);
        store.record_processed(12);
        store.record_packet_event(2, PacketEvent::Data);
        region.publish(&store)?;

        assert_eq!(region.generation(), 2);
        assert_eq!(reader.generation(), 2);

        let snapshot = reader.snapshot().context("snapshot")?;
        assert_eq!(snapshot.slice(0), store.slice(0));
        Ok(())
    }

    #[test]
    fn attach_rejects_missing_or_short_regions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = TelemetryReader::attach(dir.path().join("absent"));
        assert!(matches!(missing, Err(LinkError::Region { .. })));

        let short = dir.path().join("short");
        std::fs::write(&short, b"GLRT")?;
        assert!(matches!(TelemetryReader::attach(&short), Err(LinkError::Memory { .. })));
        Ok(())
    }

    #[test]
    fn in_progress_publish_is_reported_torn() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rtinfo");
        let mut region = TelemetryRegion::create(&path)?;
        let reader = TelemetryReader::attach(&path)?;

        // Leave the counter odd, as a writer that died mid-publish would.
        generation_cell(region.mmap.as_mut_ptr(), region.mmap.len())?.store(3, Ordering::Release);
        assert!(matches!(reader.snapshot(), Err(LinkError::TornSnapshot { attempts: 8 })));
        Ok(())
    }
}
