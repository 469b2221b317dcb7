//! External storage collaborators: reading/writing fixed-size chunks on
//! the primary device and the cache device (spec.md §6).
//!
//! Grounded on the teacher's `ReadChunk`/`AsyncReadChunk` trait-plus-impl
//! split: a small trait describing the capability, and one concrete,
//! directly testable implementation rather than a runtime-polymorphic
//! store. `MetadataOrchestrator` and `Verification` hold a `Box<dyn
//! IoModule>` so callers can substitute a real block-device backend
//! without this crate depending on one.

use anyhow::{Context, Result};

/// Which physical device an offset refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Primary,
    Cache,
}

/// Read/write access to the two devices the cache metadata subsystem
/// reasons about. Implementations are expected to enforce whatever
/// alignment their backing store needs; this crate always issues
/// `Config::chunk_size`-aligned reads/writes.
pub trait IoModule: Send + Sync {
    fn read(&self, device: Device, offset: u64, len: u32) -> Result<Vec<u8>>;
    fn write(&self, device: Device, offset: u64, data: &[u8]) -> Result<()>;
}

/// An in-memory `IoModule`, standing in for a real block device in tests
/// and the benchmark binary (spec.md §6, "out of scope: the physical
/// device driver").
pub struct MemoryIoModule {
    primary: std::sync::Mutex<Vec<u8>>,
    cache: std::sync::Mutex<Vec<u8>>,
}

impl MemoryIoModule {
    pub fn new(primary_bytes: usize, cache_bytes: usize) -> Self {
        MemoryIoModule {
            primary: std::sync::Mutex::new(vec![0u8; primary_bytes]),
            cache: std::sync::Mutex::new(vec![0u8; cache_bytes]),
        }
    }

    fn backing(&self, device: Device) -> &std::sync::Mutex<Vec<u8>> {
        match device {
            Device::Primary => &self.primary,
            Device::Cache => &self.cache,
        }
    }
}

impl IoModule for MemoryIoModule {
    fn read(&self, device: Device, offset: u64, len: u32) -> Result<Vec<u8>> {
        let store = self.backing(device).lock().unwrap();
        let start = offset as usize;
        let end = start + len as usize;
        store
            .get(start..end)
            .map(|s| s.to_vec())
            .with_context(|| format!("read out of range: {}..{} (device has {} bytes)", start, end, store.len()))
    }

    fn write(&self, device: Device, offset: u64, data: &[u8]) -> Result<()> {
        let mut store = self.backing(device).lock().unwrap();
        let start = offset as usize;
        let end = start + data.len();
        let slice = store
            .get_mut(start..end)
            .with_context(|| format!("write out of range: {}..{} (device has {} bytes)", start, end, data.len()))?;
        slice.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let io = MemoryIoModule::new(4096, 4096);
        io.write(Device::Cache, 128, &[1, 2, 3, 4]).unwrap();
        assert_eq!(io.read(Device::Cache, 128, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn devices_are_isolated() {
        let io = MemoryIoModule::new(64, 64);
        io.write(Device::Primary, 0, &[9, 9]).unwrap();
        assert_eq!(io.read(Device::Cache, 0, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn out_of_range_read_fails() {
        let io = MemoryIoModule::new(16, 16);
        assert!(io.read(Device::Primary, 10, 100).is_err());
    }
}
