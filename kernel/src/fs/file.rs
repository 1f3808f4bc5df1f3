//! Open files and the handle table
//!
//! Handles carry a generation counter so a closed (and possibly reused)
//! slot can never be reached through an old handle.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::kernel::sync::SpinLock;
use super::error::{VfsError, VfsResult};
use super::vnode::{FileOps, SeekFrom, Vnode};

// ═══════════════════════════════════════════════════════════════════════════════
// OPEN FLAGS
// ═══════════════════════════════════════════════════════════════════════════════

pub const O_RDONLY: usize = 0;
pub const O_WRONLY: usize = 1;
pub const O_RDWR: usize = 2;
pub const O_ACCMODE: usize = 3;
pub const O_CREAT: usize = 64;
pub const O_EXCL: usize = 128;
pub const O_APPEND: usize = 1024;

/// Access mode of an open, ignoring the other flag bits.
pub fn access_mode(flags: usize) -> usize {
    flags & O_ACCMODE
}

pub fn can_read(flags: usize) -> bool {
    matches!(access_mode(flags), O_RDONLY | O_RDWR)
}

pub fn can_write(flags: usize) -> bool {
    matches!(access_mode(flags), O_WRONLY | O_RDWR)
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPEN FILE
// ═══════════════════════════════════════════════════════════════════════════════

/// Open file description: the vnode, the open flags and the backend's
/// per-open state (position included).
pub struct File {
    vnode: Arc<Vnode>,
    flags: usize,
    ops: Box<dyn FileOps>,
}

impl File {
    pub fn new(vnode: Arc<Vnode>, flags: usize, ops: Box<dyn FileOps>) -> Self {
        Self { vnode, flags, ops }
    }

    pub fn vnode(&self) -> &Arc<Vnode> {
        &self.vnode
    }

    pub fn flags(&self) -> usize {
        self.flags
    }

    pub fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if !can_read(self.flags) {
            return Err(VfsError::Backend("File not open for reading"));
        }
        self.ops.read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        if !can_write(self.flags) {
            return Err(VfsError::Backend("File not open for writing"));
        }
        self.ops.write(buf)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        self.ops.seek(pos)
    }

    pub fn close(&mut self) -> VfsResult<()> {
        self.ops.close()
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("vnode", &self.vnode)
            .field("flags", &self.flags)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLE TABLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller-visible reference to an open file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileHandle {
    slot: u32,
    generation: u32,
}

impl FileHandle {
    pub fn slot(&self) -> usize {
        self.slot as usize
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}.{}", self.slot, self.generation)
    }
}

struct Slot {
    generation: u32,
    file: Option<Arc<SpinLock<File>>>,
}

/// Table of open files, indexed by handle slot
pub struct FileTable {
    slots: Vec<Slot>,
}

impl FileTable {
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Store `file` in the first free slot, extending the table if needed.
    pub fn insert(&mut self, file: File) -> FileHandle {
        let file = Some(Arc::new(SpinLock::new(file)));

        if let Some((i, slot)) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.file.is_none())
        {
            slot.file = file;
            return FileHandle {
                slot: i as u32,
                generation: slot.generation,
            };
        }

        self.slots.push(Slot { generation: 0, file });
        FileHandle {
            slot: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn get(&self, handle: FileHandle) -> VfsResult<Arc<SpinLock<File>>> {
        match self.slots.get(handle.slot()) {
            Some(slot) if slot.generation == handle.generation => {
                slot.file.clone().ok_or(VfsError::UseAfterClose)
            }
            _ => Err(VfsError::UseAfterClose),
        }
    }

    /// Release the slot; any copy of `handle` is stale afterwards.
    pub fn remove(&mut self, handle: FileHandle) -> VfsResult<Arc<SpinLock<File>>> {
        let slot = self
            .slots
            .get_mut(handle.slot())
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(VfsError::UseAfterClose)?;
        let file = slot.file.take().ok_or(VfsError::UseAfterClose)?;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(file)
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.file.is_some()).count()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}
