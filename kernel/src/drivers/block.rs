//! Block-device contract
//!
//! External collaborators (VirtIO, and on-disk filesystems above them)
//! meet the kernel at this boundary: synchronous 512-byte sector reads
//! and writes that have completed when the call returns. `MemDisk` is
//! the RAM-backed implementation used by tests and as a scratch disk.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Sector size in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Synchronous sector-addressed storage.
pub trait BlockDevice: Send + Sync {
    /// Number of sectors.
    fn capacity(&self) -> u64;

    /// Read the sector at `lba` into `buf`.
    fn read_sector(&self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> KernelResult<()>;

    /// Write `buf` to the sector at `lba`.
    fn write_sector(&self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> KernelResult<()>;
}

/// RAM-backed block device.
pub struct MemDisk {
    sectors: Mutex<Vec<u8>>,
    capacity: u64,
}

impl MemDisk {
    pub fn new(sector_count: u64) -> Self {
        Self {
            sectors: Mutex::new(vec![0; sector_count as usize * SECTOR_SIZE]),
            capacity: sector_count,
        }
    }
}

impl BlockDevice for MemDisk {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn read_sector(&self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> KernelResult<()> {
        if lba >= self.capacity {
            return Err(KernelError::InvalidArgument);
        }
        let data = self.sectors.lock();
        let start = lba as usize * SECTOR_SIZE;
        buf.copy_from_slice(&data[start..start + SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> KernelResult<()> {
        if lba >= self.capacity {
            return Err(KernelError::InvalidArgument);
        }
        let mut data = self.sectors.lock();
        let start = lba as usize * SECTOR_SIZE;
        data[start..start + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn sector_roundtrip() {
        let disk = MemDisk::new(8);
        let mut sector = [0u8; SECTOR_SIZE];
        sector[0] = 0xAB;
        sector[SECTOR_SIZE - 1] = 0xCD;
        disk.write_sector(3, &sector).unwrap();

        let mut out = [0u8; SECTOR_SIZE];
        disk.read_sector(3, &mut out).unwrap();
        assert_eq!(out, sector);
        // Neighboring sector untouched.
        disk.read_sector(4, &mut out).unwrap();
        assert_eq!(out, [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn out_of_range_is_invalid() {
        let disk = MemDisk::new(2);
        let mut buf = [0u8; SECTOR_SIZE];
        assert!(disk.read_sector(2, &mut buf).is_err());
        assert!(disk.write_sector(99, &buf).is_err());
    }
}
