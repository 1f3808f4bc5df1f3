//! RamDisk Driver
//!
//! A heap-backed block device. The kernel formats one at boot and mounts it
//! as a FAT32 volume; tests use it as a scratch disk.

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;
use crate::fs::block::{BlockDevice, SECTOR_SIZE};

pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    sectors: u32,
}

impl RamDisk {
    /// Create a zero-filled disk of `sectors` sectors.
    pub fn new(sectors: u32) -> Self {
        Self {
            data: Mutex::new(vec![0; sectors as usize * SECTOR_SIZE]),
            sectors,
        }
    }

    /// Wrap an existing image; trailing bytes short of a full sector are dropped.
    pub fn from_image(mut image: Vec<u8>) -> Self {
        let sectors = (image.len() / SECTOR_SIZE) as u32;
        image.truncate(sectors as usize * SECTOR_SIZE);
        Self {
            data: Mutex::new(image),
            sectors,
        }
    }

    /// Copy of the whole disk contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn range(&self, sector: u32, len: usize) -> Result<core::ops::Range<usize>, &'static str> {
        if sector >= self.sectors {
            return Err("Sector out of range");
        }
        if len < SECTOR_SIZE {
            return Err("Buffer smaller than a sector");
        }
        let start = sector as usize * SECTOR_SIZE;
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<(), &'static str> {
        let range = self.range(sector, buf.len())?;
        buf[..SECTOR_SIZE].copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<(), &'static str> {
        let range = self.range(sector, buf.len())?;
        self.data.lock()[range].copy_from_slice(&buf[..SECTOR_SIZE]);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_round_trip() {
        let disk = RamDisk::new(4);
        let mut sector = [0u8; SECTOR_SIZE];
        sector[0] = 0xAB;
        sector[511] = 0xCD;
        disk.write_sector(3, &sector).unwrap();

        let mut back = [0u8; SECTOR_SIZE];
        disk.read_sector(3, &mut back).unwrap();
        assert_eq!(back, sector);
        assert_eq!(disk.snapshot()[3 * SECTOR_SIZE], 0xAB);
    }

    #[test]
    fn test_out_of_range_and_short_buffers() {
        let disk = RamDisk::new(2);
        let mut sector = [0u8; SECTOR_SIZE];
        assert!(disk.read_sector(2, &mut sector).is_err());
        assert!(disk.write_sector(0, &sector[..100]).is_err());
    }

    #[test]
    fn test_from_image_drops_partial_sector() {
        let disk = RamDisk::from_image(vec![7u8; SECTOR_SIZE * 2 + 10]);
        assert_eq!(disk.sector_count(), 2);
        assert_eq!(disk.snapshot().len(), SECTOR_SIZE * 2);
    }
}
