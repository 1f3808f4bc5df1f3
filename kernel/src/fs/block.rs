//! Block device seam used by disk-backed filesystems.

/// Every device speaks 512-byte sectors.
pub const SECTOR_SIZE: usize = 512;

/// Abstract Block Device (e.g., SD Card partition, RAM disk)
pub trait BlockDevice: Send + Sync {
    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<(), &'static str>;
    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<(), &'static str>;
    fn sector_count(&self) -> u32;
    fn sync(&self) -> Result<(), &'static str> { Ok(()) } // Default implementation
}
