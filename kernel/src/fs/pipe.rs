//! Pipe Implementation
//!
//! Anonymous FIFOs. The pipe filesystem root is not reachable by path: every
//! `create` on it returns a fresh, unnamed FIFO vnode. Opening the FIFO
//! read-only gives the read end, write-only the write end.

use alloc::boxed::Box;
use alloc::collections::vec_deque::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::kernel::sync::SpinLock;
use super::error::{VfsError, VfsResult};
use super::file::{access_mode, O_RDONLY, O_WRONLY};
use super::path;
use super::registry::{FilesystemDescriptor, MountSetup};
use super::vnode::{DirEntry, FileOps, MountId, SeekFrom, Vnode, VnodeKind, VnodeOps};

pub const PIPEFS_NAME: &str = "pipefs";

struct PipeState {
    buffer: VecDeque<u8>,
    readers: usize,
    writers: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILESYSTEM
// ═══════════════════════════════════════════════════════════════════════════════

pub struct PipeFs;

impl PipeFs {
    pub fn descriptor() -> VfsResult<FilesystemDescriptor> {
        FilesystemDescriptor::new(PIPEFS_NAME, Arc::new(PipeFs))
    }
}

impl MountSetup for PipeFs {
    fn setup_mount(&self, mount: MountId) -> VfsResult<Arc<Vnode>> {
        Ok(Vnode::new(VnodeKind::Directory, mount, Box::new(PipeRoot)))
    }
}

struct PipeRoot;

impl VnodeOps for PipeRoot {
    fn lookup(&self, _dir: &Vnode, _name: &str) -> VfsResult<Arc<Vnode>> {
        Err(VfsError::NotFound)
    }

    fn create(&self, dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>> {
        path::file_name(name)?;
        let fifo = Fifo {
            state: Arc::new(SpinLock::new(PipeState {
                buffer: VecDeque::new(),
                readers: 0,
                writers: 0,
            })),
        };
        Ok(Vnode::new(VnodeKind::Fifo, dir.mount(), Box::new(fifo)))
    }

    fn mkdir(&self, _dir: &Vnode, _name: &str) -> VfsResult<Arc<Vnode>> {
        Err(VfsError::Backend("Operation not supported"))
    }

    fn open(&self, _flags: usize) -> VfsResult<Box<dyn FileOps>> {
        Err(VfsError::IsADirectory)
    }

    fn size(&self) -> u64 {
        0
    }

    fn read_dir(&self) -> VfsResult<Vec<DirEntry>> {
        Ok(Vec::new())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIFO VNODE
// ═══════════════════════════════════════════════════════════════════════════════

struct Fifo {
    state: Arc<SpinLock<PipeState>>,
}

impl VnodeOps for Fifo {
    fn lookup(&self, _dir: &Vnode, _name: &str) -> VfsResult<Arc<Vnode>> {
        Err(VfsError::NotADirectory)
    }

    fn create(&self, _dir: &Vnode, _name: &str) -> VfsResult<Arc<Vnode>> {
        Err(VfsError::NotADirectory)
    }

    fn mkdir(&self, _dir: &Vnode, _name: &str) -> VfsResult<Arc<Vnode>> {
        Err(VfsError::NotADirectory)
    }

    fn open(&self, flags: usize) -> VfsResult<Box<dyn FileOps>> {
        let mut state = self.state.lock();
        match access_mode(flags) {
            O_RDONLY => {
                state.readers += 1;
                Ok(Box::new(PipeReader { state: self.state.clone() }))
            }
            O_WRONLY => {
                state.writers += 1;
                Ok(Box::new(PipeWriter { state: self.state.clone() }))
            }
            _ => Err(VfsError::Backend("Pipe ends are one-way")),
        }
    }

    /// Bytes buffered and not yet read
    fn size(&self) -> u64 {
        self.state.lock().buffer.len() as u64
    }

    fn read_dir(&self) -> VfsResult<Vec<DirEntry>> {
        Err(VfsError::NotADirectory)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPE ENDS
// ═══════════════════════════════════════════════════════════════════════════════

pub struct PipeReader {
    state: Arc<SpinLock<PipeState>>,
}

pub struct PipeWriter {
    state: Arc<SpinLock<PipeState>>,
}

impl FileOps for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let mut state = self.state.lock();

        if !state.buffer.is_empty() {
            let n = buf.len().min(state.buffer.len());
            for (dst, src) in buf.iter_mut().zip(state.buffer.drain(..n)) {
                *dst = src;
            }
            return Ok(n);
        }

        if state.writers == 0 {
            return Ok(0); // EOF
        }

        Err(VfsError::Blocked)
    }

    fn write(&mut self, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::Backend("Bad file descriptor"))
    }

    fn seek(&mut self, _pos: SeekFrom) -> VfsResult<u64> {
        Err(VfsError::Backend("Illegal seek"))
    }

    fn close(&mut self) -> VfsResult<()> {
        let mut state = self.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            state.buffer.clear();
        }
        Ok(())
    }
}

impl FileOps for PipeWriter {
    fn read(&mut self, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsError::Backend("Bad file descriptor"))
    }

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        let mut state = self.state.lock();

        if state.readers == 0 {
            return Err(VfsError::Backend("Broken pipe"));
        }

        state.buffer.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> VfsResult<u64> {
        Err(VfsError::Backend("Illegal seek"))
    }

    fn close(&mut self) -> VfsResult<()> {
        let mut state = self.state.lock();
        state.writers = state.writers.saturating_sub(1);
        Ok(())
    }
}
