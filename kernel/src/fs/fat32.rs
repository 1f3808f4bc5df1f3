//! FAT32 Filesystem Driver
//!
//! Read/write FAT32 over any [`BlockDevice`] with 512-byte sectors. Only 8.3
//! short names are supported; long-name entries on disk are skipped.
//!
//! Volume-level helpers keep the block layer's `&'static str` errors; they
//! become [`VfsError::Backend`] where they enter the vnode layer.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::kernel::sync::SpinLock;
use crate::kprintln;
use super::block::{BlockDevice, SECTOR_SIZE};
use super::error::{VfsError, VfsResult};
use super::file::O_APPEND;
use super::registry::{FilesystemDescriptor, MountSetup};
use super::vnode::{DirEntry, FileOps, MountId, SeekFrom, Vnode, VnodeKind, VnodeOps};

pub const FAT32_NAME: &str = "fat32";

// ═══════════════════════════════════════════════════════════════════════════════
// DATA STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════════

/// FAT32 Boot Sector (BPB), the fields this driver uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fat32BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub total_sectors: u32,
    pub fat_size_32: u32,
    pub root_cluster: u32,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
}

/// FAT Directory Entry (32 bytes on disk)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatDirEntry {
    pub name: [u8; 11], // 8.3 Name
    pub attr: u8,
    pub first_cluster: u32,
    pub size: u32,
}

// Attributes
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE:   u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = 0x0F;

const DIR_ENTRY_SIZE: usize = 32;
const ENTRY_FREE: u8 = 0xE5;
const ENTRY_END: u8 = 0x00;

const FAT_MASK: u32 = 0x0FFF_FFFF;
const FAT_EOC: u32 = 0x0FFF_FFFF;
const FAT_BAD: u32 = 0x0FFF_FFF7;
const FAT_EOC_MIN: u32 = 0x0FFF_FFF8;

const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

fn le16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn put16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

impl Fat32BootSector {
    pub fn parse(sector: &[u8; SECTOR_SIZE]) -> Result<Self, &'static str> {
        if sector[510..512] != BOOT_SIGNATURE {
            return Err("Missing boot signature");
        }
        let total_16 = le16(sector, 19) as u32;
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&sector[71..82]);

        Ok(Self {
            bytes_per_sector: le16(sector, 11),
            sectors_per_cluster: sector[13],
            reserved_sectors: le16(sector, 14),
            num_fats: sector[16],
            total_sectors: if total_16 != 0 { total_16 } else { le32(sector, 32) },
            fat_size_32: le32(sector, 36),
            root_cluster: le32(sector, 44),
            volume_id: le32(sector, 67),
            volume_label,
        })
    }

    pub fn encode(&self, sector: &mut [u8; SECTOR_SIZE]) {
        sector.fill(0);
        sector[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]); // jmp_boot
        sector[3..11].copy_from_slice(b"PIKERNEL");
        put16(sector, 11, self.bytes_per_sector);
        sector[13] = self.sectors_per_cluster;
        put16(sector, 14, self.reserved_sectors);
        sector[16] = self.num_fats;
        sector[21] = 0xF8; // media: fixed disk
        put32(sector, 32, self.total_sectors);
        put32(sector, 36, self.fat_size_32);
        put32(sector, 44, self.root_cluster);
        put16(sector, 48, 1); // FSInfo sector
        put16(sector, 50, 6); // backup boot sector
        sector[64] = 0x80; // drive number
        sector[66] = 0x29; // extended boot signature
        put32(sector, 67, self.volume_id);
        sector[71..82].copy_from_slice(&self.volume_label);
        sector[82..90].copy_from_slice(b"FAT32   ");
        sector[510..512].copy_from_slice(&BOOT_SIGNATURE);
    }
}

impl FatDirEntry {
    pub fn parse(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[0..11]);
        Self {
            name,
            attr: raw[11],
            first_cluster: ((le16(raw, 20) as u32) << 16) | le16(raw, 26) as u32,
            size: le32(raw, 28),
        }
    }

    /// Overwrite a 32-byte slot with this entry. Timestamps are left zero.
    pub fn encode(&self, raw: &mut [u8]) {
        raw[..DIR_ENTRY_SIZE].fill(0);
        raw[0..11].copy_from_slice(&self.name);
        raw[11] = self.attr;
        put16(raw, 20, (self.first_cluster >> 16) as u16);
        put16(raw, 26, (self.first_cluster & 0xFFFF) as u16);
        put32(raw, 28, self.size);
    }

    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    fn is_dot(&self) -> bool {
        self.name[0] == b'.'
    }
}

/// Position of a directory entry: byte offset within a directory cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub cluster: u32,
    pub offset: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// 8.3 NAMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Encode `name` as a space-padded, upper-case 8.3 short name.
pub fn short_name(name: &str) -> VfsResult<[u8; 11]> {
    let bytes = name.as_bytes();
    let (base, ext) = match bytes.iter().rposition(|&c| c == b'.') {
        Some(idx) => (&bytes[..idx], &bytes[idx + 1..]),
        None => (bytes, &[][..]),
    };

    // At most one dot, separating base and extension
    let valid = bytes
        .iter()
        .enumerate()
        .all(|(i, &c)| valid_short_char(c) || (c == b'.' && i == base.len()));
    if base.is_empty() || !valid {
        return Err(VfsError::InvalidPath);
    }
    if base.len() > 8 || ext.len() > 3 {
        return Err(VfsError::NameTooLong);
    }

    let mut res = [0x20u8; 11];
    for (i, &b) in base.iter().enumerate() {
        res[i] = b.to_ascii_uppercase();
    }
    for (i, &b) in ext.iter().enumerate() {
        res[8 + i] = b.to_ascii_uppercase();
    }
    Ok(res)
}

fn valid_short_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!#$%&'()-@^_`{}~".contains(&c)
}

/// Helper to parse 8.3 name
pub fn parse_fat_name(raw: &[u8; 11]) -> String {
    let mut name = String::new();
    for &c in raw.iter().take(8) {
        if c != 0x20 {
            name.push(c as char);
        }
    }
    if raw[8] != 0x20 {
        name.push('.');
        for &c in raw.iter().skip(8) {
            if c != 0x20 {
                name.push(c as char);
            }
        }
    }
    name
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOLUME
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Fat32Volume {
    device: Arc<dyn BlockDevice>,
    bpb: Fat32BootSector,
    fat_start_sector: u32,
    data_start_sector: u32,
    cluster_count: u32,
    /// Serializes FAT updates (allocation and chain linking)
    fat_lock: SpinLock<()>,
    /// Serializes read-modify-write of directory entry sectors
    entry_lock: SpinLock<()>,
}

impl Fat32Volume {
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<Arc<Self>, &'static str> {
        let mut buf = [0u8; SECTOR_SIZE];
        device.read_sector(0, &mut buf)?;
        let bpb = Fat32BootSector::parse(&buf)?;

        if bpb.bytes_per_sector as usize != SECTOR_SIZE {
            return Err("Unsupported sector size (must be 512)");
        }
        if bpb.fat_size_32 == 0 {
            return Err("Not a FAT32 volume");
        }
        if !bpb.sectors_per_cluster.is_power_of_two() || bpb.num_fats == 0 {
            return Err("Corrupt boot sector");
        }

        let fat_start_sector = bpb.reserved_sectors as u32;
        let data_start_sector = (bpb.num_fats as u32)
            .checked_mul(bpb.fat_size_32)
            .and_then(|fats| fats.checked_add(fat_start_sector))
            .ok_or("Corrupt boot sector")?;
        let total_sectors = bpb.total_sectors.min(device.sector_count());
        if data_start_sector >= total_sectors {
            return Err("Corrupt boot sector");
        }

        let data_clusters = (total_sectors - data_start_sector) / bpb.sectors_per_cluster as u32;
        let fat_entries = bpb.fat_size_32.saturating_mul((SECTOR_SIZE / 4) as u32);
        let cluster_count = data_clusters.min(fat_entries.saturating_sub(2));
        if bpb.root_cluster < 2 || bpb.root_cluster >= cluster_count + 2 {
            return Err("Corrupt boot sector");
        }

        kprintln!(
            "[FAT32] Mounted. Vol: {:?}",
            core::str::from_utf8(&bpb.volume_label).unwrap_or("???")
        );
        kprintln!(
            "[FAT32] {} clusters of {} bytes",
            cluster_count,
            bpb.sectors_per_cluster as usize * SECTOR_SIZE
        );

        Ok(Arc::new(Self {
            device,
            bpb,
            fat_start_sector,
            data_start_sector,
            cluster_count,
            fat_lock: SpinLock::new(()),
            entry_lock: SpinLock::new(()),
        }))
    }

    pub fn boot_sector(&self) -> &Fat32BootSector {
        &self.bpb
    }

    pub fn cluster_size(&self) -> usize {
        self.bpb.sectors_per_cluster as usize * SECTOR_SIZE
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn root_cluster(&self) -> u32 {
        self.bpb.root_cluster
    }

    fn check_cluster(&self, cluster: u32) -> Result<(), &'static str> {
        if cluster < 2 || cluster >= self.cluster_count + 2 {
            return Err("Cluster out of range");
        }
        Ok(())
    }

    /// Convert Cluster Number to Sector Number
    fn cluster_to_sector(&self, cluster: u32) -> Result<u32, &'static str> {
        self.check_cluster(cluster)?;
        // Clusters start at 2
        Ok(self.data_start_sector + (cluster - 2) * self.bpb.sectors_per_cluster as u32)
    }

    fn fat_position(&self, cluster: u32) -> (u32, usize) {
        let fat_offset = cluster * 4;
        (
            self.fat_start_sector + fat_offset / SECTOR_SIZE as u32,
            fat_offset as usize % SECTOR_SIZE,
        )
    }

    /// Read next cluster from FAT
    pub fn get_next_cluster(&self, cluster: u32) -> Result<Option<u32>, &'static str> {
        self.check_cluster(cluster)?;
        let (sector, offset) = self.fat_position(cluster);
        let mut buf = [0u8; SECTOR_SIZE];
        self.device.read_sector(sector, &mut buf)?;

        match le32(&buf, offset) & FAT_MASK {
            entry if entry >= FAT_EOC_MIN => Ok(None),
            FAT_BAD => Err("Bad cluster"),
            entry => {
                self.check_cluster(entry).map_err(|_| "Corrupt cluster chain")?;
                Ok(Some(entry))
            }
        }
    }

    /// All clusters of the chain starting at `first`.
    pub fn chain(&self, first: u32) -> Result<Vec<u32>, &'static str> {
        let mut clusters = Vec::new();
        let mut cluster = first;
        loop {
            if clusters.len() as u32 > self.cluster_count {
                return Err("Cluster chain loops");
            }
            clusters.push(cluster);
            match self.get_next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(clusters),
            }
        }
    }

    /// The `index`-th cluster of a chain. With `extend`, missing clusters
    /// are allocated and linked.
    pub fn cluster_at(&self, first: u32, index: usize, extend: bool) -> Result<u32, &'static str> {
        let mut cluster = first;
        for _ in 0..index {
            cluster = match self.get_next_cluster(cluster)? {
                Some(next) => next,
                None if extend => self.alloc_cluster(Some(cluster))?,
                None => return Err("Cluster chain too short"),
            };
        }
        Ok(cluster)
    }

    /// Device sector holding sector `index` of `cluster`
    fn data_sector(&self, cluster: u32, index: usize) -> Result<u32, &'static str> {
        if index >= self.bpb.sectors_per_cluster as usize {
            return Err("Sector index past end of cluster");
        }
        Ok(self.cluster_to_sector(cluster)? + index as u32)
    }

    pub fn read_data(
        &self,
        cluster: u32,
        index: usize,
        buf: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), &'static str> {
        self.device.read_sector(self.data_sector(cluster, index)?, buf)
    }

    pub fn write_data(
        &self,
        cluster: u32,
        index: usize,
        buf: &[u8; SECTOR_SIZE],
    ) -> Result<(), &'static str> {
        self.device.write_sector(self.data_sector(cluster, index)?, buf)
    }

    fn zero_cluster(&self, cluster: u32) -> Result<(), &'static str> {
        let zero = [0u8; SECTOR_SIZE];
        for index in 0..self.bpb.sectors_per_cluster as usize {
            self.write_data(cluster, index, &zero)?;
        }
        Ok(())
    }

    /// Write a FAT entry into every FAT copy. Caller holds `fat_lock`.
    fn write_fat_entry(&self, cluster: u32, value: u32) -> Result<(), &'static str> {
        let (sector, offset) = self.fat_position(cluster);
        let mut buf = [0u8; SECTOR_SIZE];
        self.device.read_sector(sector, &mut buf)?;

        let old = le32(&buf, offset);
        put32(&mut buf, offset, (old & !FAT_MASK) | (value & FAT_MASK));

        for fat in 0..self.bpb.num_fats as u32 {
            self.device.write_sector(sector + fat * self.bpb.fat_size_32, &buf)?;
        }
        Ok(())
    }

    /// Find a free cluster. Caller holds `fat_lock`.
    fn find_free_cluster(&self) -> Result<u32, &'static str> {
        let mut buf = [0u8; SECTOR_SIZE];
        let mut loaded = None;

        for cluster in 2..self.cluster_count + 2 {
            let (sector, offset) = self.fat_position(cluster);
            if loaded != Some(sector) {
                self.device.read_sector(sector, &mut buf)?;
                loaded = Some(sector);
            }
            if le32(&buf, offset) & FAT_MASK == 0 {
                return Ok(cluster);
            }
        }
        Err("Disk full")
    }

    /// Allocate a zeroed cluster, linked after `prev` if given.
    pub fn alloc_cluster(&self, prev: Option<u32>) -> Result<u32, &'static str> {
        let next = {
            let _fat = self.fat_lock.lock();
            let next = self.find_free_cluster()?;
            self.write_fat_entry(next, FAT_EOC)?;
            if let Some(prev) = prev {
                self.check_cluster(prev)?;
                self.write_fat_entry(prev, next)?;
            }
            next
        };

        self.zero_cluster(next)?;
        Ok(next)
    }

    /// Number of unallocated clusters
    pub fn free_clusters(&self) -> Result<u32, &'static str> {
        let mut buf = [0u8; SECTOR_SIZE];
        let mut loaded = None;
        let mut free = 0;
        for cluster in 2..self.cluster_count + 2 {
            let (sector, offset) = self.fat_position(cluster);
            if loaded != Some(sector) {
                self.device.read_sector(sector, &mut buf)?;
                loaded = Some(sector);
            }
            if le32(&buf, offset) & FAT_MASK == 0 {
                free += 1;
            }
        }
        Ok(free)
    }

    fn entry_sector(&self, loc: EntryLocation) -> Result<(u32, usize), &'static str> {
        if loc.offset >= self.cluster_size() || loc.offset % DIR_ENTRY_SIZE != 0 {
            return Err("Bad directory entry offset");
        }
        let sector = self.cluster_to_sector(loc.cluster)? + (loc.offset / SECTOR_SIZE) as u32;
        Ok((sector, loc.offset % SECTOR_SIZE))
    }

    pub fn read_entry(&self, loc: EntryLocation) -> Result<FatDirEntry, &'static str> {
        let (sector, offset) = self.entry_sector(loc)?;
        let mut buf = [0u8; SECTOR_SIZE];
        self.device.read_sector(sector, &mut buf)?;
        Ok(FatDirEntry::parse(&buf[offset..offset + DIR_ENTRY_SIZE]))
    }

    /// Read-modify-write the entry at `loc`.
    pub fn update_entry(
        &self,
        loc: EntryLocation,
        update: impl FnOnce(&mut FatDirEntry),
    ) -> Result<(), &'static str> {
        let (sector, offset) = self.entry_sector(loc)?;
        let _entries = self.entry_lock.lock();

        let mut buf = [0u8; SECTOR_SIZE];
        self.device.read_sector(sector, &mut buf)?;
        let slot = &mut buf[offset..offset + DIR_ENTRY_SIZE];
        let mut entry = FatDirEntry::parse(slot);
        update(&mut entry);
        entry.encode(slot);
        self.device.write_sector(sector, &buf)
    }

    pub fn write_entry(&self, loc: EntryLocation, entry: FatDirEntry) -> Result<(), &'static str> {
        self.update_entry(loc, |slot| *slot = entry)
    }

    /// Live entries of a directory, up to the end marker. Deleted, long-name
    /// and volume-label entries are skipped.
    pub fn dir_entries(&self, dir_cluster: u32) -> Result<Vec<(FatDirEntry, EntryLocation)>, &'static str> {
        let mut entries = Vec::new();
        let mut buf = [0u8; SECTOR_SIZE];

        for cluster in self.chain(dir_cluster)? {
            for index in 0..self.bpb.sectors_per_cluster as usize {
                self.read_data(cluster, index, &mut buf)?;
                for (i, raw) in buf.chunks(DIR_ENTRY_SIZE).enumerate() {
                    match raw[0] {
                        ENTRY_END => return Ok(entries),
                        ENTRY_FREE => continue,
                        _ => {}
                    }
                    let entry = FatDirEntry::parse(raw);
                    if entry.attr == ATTR_LONG_NAME || entry.attr & ATTR_VOLUME_ID != 0 {
                        continue;
                    }
                    let offset = index * SECTOR_SIZE + i * DIR_ENTRY_SIZE;
                    entries.push((entry, EntryLocation { cluster, offset }));
                }
            }
        }
        Ok(entries)
    }

    /// Find an entry in a directory by its short name
    pub fn find_entry(
        &self,
        dir_cluster: u32,
        name: &[u8; 11],
    ) -> Result<Option<(FatDirEntry, EntryLocation)>, &'static str> {
        Ok(self
            .dir_entries(dir_cluster)?
            .into_iter()
            .find(|(entry, _)| entry.name == *name))
    }

    /// First reusable slot in a directory, growing it by one cluster when full.
    pub fn find_free_slot(&self, dir_cluster: u32) -> Result<EntryLocation, &'static str> {
        let mut buf = [0u8; SECTOR_SIZE];
        let chain = self.chain(dir_cluster)?;

        for &cluster in &chain {
            for index in 0..self.bpb.sectors_per_cluster as usize {
                self.read_data(cluster, index, &mut buf)?;
                let free = buf
                    .chunks(DIR_ENTRY_SIZE)
                    .position(|raw| raw[0] == ENTRY_END || raw[0] == ENTRY_FREE);
                if let Some(i) = free {
                    let offset = index * SECTOR_SIZE + i * DIR_ENTRY_SIZE;
                    return Ok(EntryLocation { cluster, offset });
                }
            }
        }

        let last = *chain.last().ok_or("Empty cluster chain")?;
        let cluster = self.alloc_cluster(Some(last))?;
        Ok(EntryLocation { cluster, offset: 0 })
    }

    pub fn sync(&self) -> Result<(), &'static str> {
        self.device.sync()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FORMAT
// ═══════════════════════════════════════════════════════════════════════════════

const FORMAT_RESERVED_SECTORS: u16 = 32;
const FORMAT_NUM_FATS: u8 = 2;
const FORMAT_ROOT_CLUSTER: u32 = 2;

/// Write an empty FAT32 filesystem covering the whole device.
pub fn format(device: &dyn BlockDevice, sectors_per_cluster: u8) -> Result<(), &'static str> {
    if !sectors_per_cluster.is_power_of_two() {
        return Err("Sectors per cluster must be a power of two");
    }
    let total = device.sector_count();
    let reserved = FORMAT_RESERVED_SECTORS as u32;
    let spc = sectors_per_cluster as u32;
    if total <= reserved {
        return Err("Device too small");
    }

    // Sized for every cluster the data region could hold; slightly generous.
    let clusters = (total - reserved) / spc;
    let fat_size = ((clusters + 2) * 4).div_ceil(SECTOR_SIZE as u32);
    let data_start = reserved + FORMAT_NUM_FATS as u32 * fat_size;
    if data_start + spc > total {
        return Err("Device too small");
    }

    let bpb = Fat32BootSector {
        bytes_per_sector: SECTOR_SIZE as u16,
        sectors_per_cluster,
        reserved_sectors: FORMAT_RESERVED_SECTORS,
        num_fats: FORMAT_NUM_FATS,
        total_sectors: total,
        fat_size_32: fat_size,
        root_cluster: FORMAT_ROOT_CLUSTER,
        volume_id: 0x5049_4B31,
        volume_label: *b"PIKERNEL   ",
    };

    let mut sector = [0u8; SECTOR_SIZE];
    bpb.encode(&mut sector);
    device.write_sector(0, &sector)?;
    device.write_sector(6, &sector)?;

    // FSInfo: free counts unknown
    sector.fill(0);
    put32(&mut sector, 0, 0x4161_5252);
    put32(&mut sector, 484, 0x6141_7272);
    put32(&mut sector, 488, 0xFFFF_FFFF);
    put32(&mut sector, 492, 0xFFFF_FFFF);
    put32(&mut sector, 508, 0xAA55_0000);
    device.write_sector(1, &sector)?;

    let zero = [0u8; SECTOR_SIZE];
    for s in reserved..data_start {
        device.write_sector(s, &zero)?;
    }
    for s in 0..spc {
        device.write_sector(data_start + s, &zero)?;
    }

    // FAT[0] media, FAT[1] end marker, FAT[2] root directory
    sector.fill(0);
    put32(&mut sector, 0, 0x0FFF_FFF8);
    put32(&mut sector, 4, FAT_EOC);
    put32(&mut sector, 8, FAT_EOC);
    for fat in 0..FORMAT_NUM_FATS as u32 {
        device.write_sector(reserved + fat * fat_size, &sector)?;
    }

    device.sync()
}

// ═══════════════════════════════════════════════════════════════════════════════
// MOUNT SETUP
// ═══════════════════════════════════════════════════════════════════════════════

/// FAT32 filesystem type bound to one block device.
///
/// The device can be mounted once; a second mount would cache the same
/// directory entries and FAT under separate locks.
pub struct Fat32 {
    device: Arc<dyn BlockDevice>,
    mounted: Mutex<Option<MountId>>,
}

impl Fat32 {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self { device, mounted: Mutex::new(None) }
    }

    pub fn descriptor(device: Arc<dyn BlockDevice>) -> VfsResult<FilesystemDescriptor> {
        FilesystemDescriptor::new(FAT32_NAME, Arc::new(Self::new(device)))
    }
}

impl MountSetup for Fat32 {
    fn setup_mount(&self, mount: MountId) -> VfsResult<Arc<Vnode>> {
        let mut mounted = self.mounted.lock();
        if let Some(existing) = *mounted {
            kprintln!("[FAT32] Device already mounted as {}", existing);
            return Err(VfsError::Busy);
        }

        let volume = Fat32Volume::open(self.device.clone())?;
        let root = Fat32Inode {
            state: Arc::new(Mutex::new(InodeState {
                first_cluster: volume.root_cluster(),
                size: 0,
            })),
            volume,
            entry: None,
            is_dir: true,
            children: Mutex::new(Vec::new()),
        };
        *mounted = Some(mount);
        Ok(Vnode::new(VnodeKind::Directory, mount, Box::new(root)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INODES
// ═══════════════════════════════════════════════════════════════════════════════

struct InodeState {
    /// 0 until the first write allocates data
    first_cluster: u32,
    size: u32,
}

struct Fat32Inode {
    volume: Arc<Fat32Volume>,
    /// Own directory entry; the root directory has none
    entry: Option<EntryLocation>,
    is_dir: bool,
    state: Arc<Mutex<InodeState>>,
    /// Vnodes handed out for children, so repeated lookups share one node
    children: Mutex<Vec<([u8; 11], Arc<Vnode>)>>,
}

impl Fat32Inode {
    fn child(&self, mount: MountId, entry: &FatDirEntry, loc: EntryLocation) -> Arc<Vnode> {
        let kind = if entry.is_dir() { VnodeKind::Directory } else { VnodeKind::File };
        let inode = Fat32Inode {
            volume: self.volume.clone(),
            entry: Some(loc),
            is_dir: entry.is_dir(),
            state: Arc::new(Mutex::new(InodeState {
                first_cluster: entry.first_cluster,
                size: if entry.is_dir() { 0 } else { entry.size },
            })),
            children: Mutex::new(Vec::new()),
        };
        Vnode::new(kind, mount, Box::new(inode))
    }

    fn dir_cluster(&self) -> VfsResult<u32> {
        if !self.is_dir {
            return Err(VfsError::NotADirectory);
        }
        Ok(self.state.lock().first_cluster)
    }

    /// Add a new entry to this directory. `data` runs once the name is known
    /// to be free and returns the entry's first cluster.
    fn insert(
        &self,
        dir: &Vnode,
        name: &str,
        attr: u8,
        data: impl FnOnce(&Fat32Volume) -> Result<u32, &'static str>,
    ) -> VfsResult<Arc<Vnode>> {
        let dir_cluster = self.dir_cluster()?;
        let short = short_name(name)?;
        let mut children = self.children.lock();

        if self.volume.find_entry(dir_cluster, &short)?.is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let loc = self.volume.find_free_slot(dir_cluster)?;
        let entry = FatDirEntry {
            name: short,
            attr,
            first_cluster: data(&self.volume)?,
            size: 0,
        };
        self.volume.write_entry(loc, entry)?;

        let node = self.child(dir.mount(), &entry, loc);
        children.push((short, node.clone()));
        Ok(node)
    }
}

impl VnodeOps for Fat32Inode {
    fn lookup(&self, dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>> {
        let dir_cluster = self.dir_cluster()?;
        // A name with no 8.3 form cannot exist on disk
        let short = short_name(name).map_err(|_| VfsError::NotFound)?;
        let mut children = self.children.lock();

        if let Some((_, node)) = children.iter().find(|(n, _)| *n == short) {
            return Ok(node.clone());
        }

        let (entry, loc) = self
            .volume
            .find_entry(dir_cluster, &short)?
            .ok_or(VfsError::NotFound)?;
        let node = self.child(dir.mount(), &entry, loc);
        children.push((short, node.clone()));
        Ok(node)
    }

    fn create(&self, dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>> {
        self.insert(dir, name, ATTR_ARCHIVE, |_| Ok(0))
    }

    fn mkdir(&self, dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>> {
        // ".." of a top-level directory points at cluster 0
        let parent = match self.entry {
            Some(_) => self.dir_cluster()?,
            None => 0,
        };

        self.insert(dir, name, ATTR_DIRECTORY, |volume| {
            let cluster = volume.alloc_cluster(None)?;
            let dot = |name: &[u8; 11], first_cluster| FatDirEntry {
                name: *name,
                attr: ATTR_DIRECTORY,
                first_cluster,
                size: 0,
            };
            volume.write_entry(EntryLocation { cluster, offset: 0 }, dot(b".          ", cluster))?;
            volume.write_entry(
                EntryLocation { cluster, offset: DIR_ENTRY_SIZE },
                dot(b"..         ", parent),
            )?;
            Ok(cluster)
        })
    }

    fn open(&self, flags: usize) -> VfsResult<Box<dyn FileOps>> {
        if self.is_dir {
            return Err(VfsError::IsADirectory);
        }
        let entry = self.entry.ok_or(VfsError::Backend("File without directory entry"))?;
        Ok(Box::new(Fat32File {
            volume: self.volume.clone(),
            state: self.state.clone(),
            entry,
            pos: 0,
            append: flags & O_APPEND != 0,
        }))
    }

    fn size(&self) -> u64 {
        self.state.lock().size as u64
    }

    fn read_dir(&self) -> VfsResult<Vec<DirEntry>> {
        let dir_cluster = self.dir_cluster()?;
        Ok(self
            .volume
            .dir_entries(dir_cluster)?
            .into_iter()
            .filter(|(entry, _)| !entry.is_dot())
            .map(|(entry, _)| DirEntry {
                name: parse_fat_name(&entry.name),
                kind: if entry.is_dir() { VnodeKind::Directory } else { VnodeKind::File },
                size: if entry.is_dir() { 0 } else { entry.size as u64 },
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Fat32File {
    volume: Arc<Fat32Volume>,
    state: Arc<Mutex<InodeState>>,
    entry: EntryLocation,
    pos: u64,
    append: bool,
}

impl Fat32File {
    /// Copy `data` to the file at the current position, growing the chain
    /// as needed. `done` counts the bytes already on disk if it fails.
    fn write_at(&self, first: u32, data: &[u8], done: &mut usize) -> Result<(), &'static str> {
        let cluster_size = self.volume.cluster_size() as u64;
        let mut cluster = self.volume.cluster_at(first, (self.pos / cluster_size) as usize, true)?;
        let mut sector = [0u8; SECTOR_SIZE];

        while *done < data.len() {
            let pos = self.pos + *done as u64;
            let in_cluster = (pos % cluster_size) as usize;
            let index = in_cluster / SECTOR_SIZE;
            let offset = in_cluster % SECTOR_SIZE;
            let chunk = (data.len() - *done).min(SECTOR_SIZE - offset);

            if chunk < SECTOR_SIZE {
                self.volume.read_data(cluster, index, &mut sector)?;
            }
            sector[offset..offset + chunk].copy_from_slice(&data[*done..*done + chunk]);
            self.volume.write_data(cluster, index, &sector)?;
            *done += chunk;

            if *done < data.len() && (pos + chunk as u64) % cluster_size == 0 {
                cluster = self.volume.cluster_at(cluster, 1, true)?;
            }
        }
        Ok(())
    }
}

impl FileOps for Fat32File {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let state = self.state.lock();
        let size = state.size as u64;
        if self.pos >= size || buf.is_empty() {
            return Ok(0); // EOF
        }

        let cluster_size = self.volume.cluster_size() as u64;
        let total = buf.len().min((size - self.pos) as usize);
        let mut sector = [0u8; SECTOR_SIZE];
        let mut cluster = self.volume.cluster_at(
            state.first_cluster,
            (self.pos / cluster_size) as usize,
            false,
        )?;

        let mut done = 0;
        while done < total {
            let pos = self.pos + done as u64;
            let in_cluster = (pos % cluster_size) as usize;
            let offset = in_cluster % SECTOR_SIZE;
            let chunk = (total - done).min(SECTOR_SIZE - offset);

            self.volume.read_data(cluster, in_cluster / SECTOR_SIZE, &mut sector)?;
            buf[done..done + chunk].copy_from_slice(&sector[offset..offset + chunk]);
            done += chunk;

            if done < total && (pos + chunk as u64) % cluster_size == 0 {
                cluster = self
                    .volume
                    .get_next_cluster(cluster)?
                    .ok_or("Cluster chain too short")?;
            }
        }

        self.pos += done as u64;
        Ok(done)
    }

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        if self.append {
            self.pos = state.size as u64;
        }

        // Sizes are 32-bit on disk
        let room = (u32::MAX as u64).saturating_sub(self.pos);
        if room == 0 {
            return Err(VfsError::NoSpace);
        }
        let total = buf.len().min(room as usize);

        if state.first_cluster == 0 {
            state.first_cluster = self.volume.alloc_cluster(None)?;
        }

        // Whatever reached the disk is kept and recorded, even if the
        // volume fills up part way
        let mut done = 0;
        let stopped = self.write_at(state.first_cluster, &buf[..total], &mut done).err();

        self.pos += done as u64;
        if self.pos > state.size as u64 {
            state.size = self.pos as u32;
        }

        let (first_cluster, size) = (state.first_cluster, state.size);
        self.volume.update_entry(self.entry, |entry| {
            entry.first_cluster = first_cluster;
            entry.size = size;
        })?;

        match stopped {
            Some(e) if done == 0 => Err(e.into()),
            Some(e) => {
                kprintln!("[FAT32] Short write, {} of {} bytes: {}", done, total, e);
                Ok(done)
            }
            None => Ok(done),
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.state.lock().size as u64;
        self.pos = pos.resolve(self.pos, size)?;
        Ok(self.pos)
    }

    fn close(&mut self) -> VfsResult<()> {
        self.volume.sync()?;
        Ok(())
    }
}
