//! tmpfs - In-Memory Filesystem
//!
//! Directories hold a fixed table of at most [`MAX_DIR_ENTRY`] children;
//! files hold at most [`MAX_FILE_SIZE`] bytes. Nothing is ever freed.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::error::{VfsError, VfsResult};
use super::file::O_APPEND;
use super::path::{self, FileName};
use super::registry::{FilesystemDescriptor, MountSetup};
use super::vnode::{DirEntry, FileOps, MountId, SeekFrom, Vnode, VnodeKind, VnodeOps};

/// Children per directory
pub const MAX_DIR_ENTRY: usize = 17;

/// Bytes per file
pub const MAX_FILE_SIZE: usize = 4096;

pub const TMPFS_NAME: &str = "tmpfs";

// ═══════════════════════════════════════════════════════════════════════════════
// FILESYSTEM TYPE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Tmpfs;

impl Tmpfs {
    pub fn descriptor() -> VfsResult<FilesystemDescriptor> {
        FilesystemDescriptor::new(TMPFS_NAME, Arc::new(Tmpfs))
    }
}

impl MountSetup for Tmpfs {
    fn setup_mount(&self, mount: MountId) -> VfsResult<Arc<Vnode>> {
        Ok(TmpfsDir::vnode(mount))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTORIES
// ═══════════════════════════════════════════════════════════════════════════════

struct TmpfsDir {
    entries: Mutex<heapless::Vec<(FileName, Arc<Vnode>), MAX_DIR_ENTRY>>,
}

impl TmpfsDir {
    fn vnode(mount: MountId) -> Arc<Vnode> {
        let dir = TmpfsDir {
            entries: Mutex::new(heapless::Vec::new()),
        };
        Vnode::new(VnodeKind::Directory, mount, Box::new(dir))
    }

    /// Insert a child built by `make`, holding the entry lock throughout.
    fn insert(&self, name: &str, make: impl FnOnce() -> Arc<Vnode>) -> VfsResult<Arc<Vnode>> {
        let name = path::file_name(name)?;
        let mut entries = self.entries.lock();

        if entries.iter().any(|(n, _)| *n == name) {
            return Err(VfsError::AlreadyExists);
        }
        if entries.is_full() {
            return Err(VfsError::NoSpace);
        }

        let node = make();
        entries
            .push((name, node.clone()))
            .map_err(|_| VfsError::NoSpace)?;
        Ok(node)
    }
}

impl VnodeOps for TmpfsDir {
    fn lookup(&self, _dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>> {
        self.entries
            .lock()
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, node)| node.clone())
            .ok_or(VfsError::NotFound)
    }

    fn create(&self, dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>> {
        self.insert(name, || {
            let file = TmpfsNode {
                data: Arc::new(Mutex::new(Vec::new())),
            };
            Vnode::new(VnodeKind::File, dir.mount(), Box::new(file))
        })
    }

    fn mkdir(&self, dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>> {
        self.insert(name, || TmpfsDir::vnode(dir.mount()))
    }

    fn open(&self, _flags: usize) -> VfsResult<Box<dyn FileOps>> {
        Err(VfsError::IsADirectory)
    }

    fn size(&self) -> u64 {
        0
    }

    fn read_dir(&self) -> VfsResult<Vec<DirEntry>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|(name, node)| DirEntry {
                name: String::from(name.as_str()),
                kind: node.kind(),
                size: node.size(),
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILES
// ═══════════════════════════════════════════════════════════════════════════════

struct TmpfsNode {
    data: Arc<Mutex<Vec<u8>>>,
}

impl VnodeOps for TmpfsNode {
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
        Ok(Box::new(TmpfsFile {
            data: self.data.clone(),
            pos: 0,
            append: flags & O_APPEND != 0,
        }))
    }

    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read_dir(&self) -> VfsResult<Vec<DirEntry>> {
        Err(VfsError::NotADirectory)
    }
}

/// Per-open state of a tmpfs file
struct TmpfsFile {
    data: Arc<Mutex<Vec<u8>>>,
    pos: usize,
    append: bool,
}

impl FileOps for TmpfsFile {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let data = self.data.lock();
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut data = self.data.lock();
        if self.append {
            self.pos = data.len();
        }

        let room = MAX_FILE_SIZE.saturating_sub(self.pos);
        if room == 0 {
            return Err(VfsError::NoSpace);
        }
        let n = buf.len().min(room);
        let end = self.pos + n;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(&buf[..n]);
        self.pos = end;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.data.lock().len() as u64;
        let new = pos.resolve(self.pos as u64, size)?;
        self.pos = new as usize;
        Ok(new)
    }

    fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::file::{O_RDWR, O_WRONLY};
    use std::format;

    fn root() -> Arc<Vnode> {
        Tmpfs.setup_mount(MountId(7)).unwrap()
    }

    #[test]
    fn test_children_inherit_mount() {
        let root = root();
        let dir = root.mkdir("sub").unwrap();
        let file = dir.create("leaf").unwrap();

        assert_eq!(dir.mount(), MountId(7));
        assert_eq!(file.mount(), MountId(7));
        assert!(Arc::ptr_eq(&root.lookup("sub").unwrap(), &dir));
        assert_eq!(root.lookup("nope").err(), Some(VfsError::NotFound));
        assert_eq!(file.lookup("x").err(), Some(VfsError::NotADirectory));
    }

    #[test]
    fn test_directory_table_is_bounded() {
        let root = root();
        for i in 0..MAX_DIR_ENTRY {
            root.create(&format!("f{}", i)).unwrap();
        }
        assert_eq!(root.create("overflow").err(), Some(VfsError::NoSpace));
        assert_eq!(root.mkdir("overflow").err(), Some(VfsError::NoSpace));
        assert_eq!(root.read_dir().unwrap().len(), MAX_DIR_ENTRY);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let root = root();
        root.create("a").unwrap();
        assert_eq!(root.create("a").err(), Some(VfsError::AlreadyExists));
        assert_eq!(root.mkdir("a").err(), Some(VfsError::AlreadyExists));
    }

    #[test]
    fn test_file_size_is_capped() {
        let file = root().create("big").unwrap();
        let mut f = file.open(O_WRONLY).unwrap();

        let chunk = [0x5Au8; 3000];
        assert_eq!(f.write(&chunk), Ok(3000));
        assert_eq!(f.write(&chunk), Ok(MAX_FILE_SIZE - 3000));
        assert_eq!(f.write(&chunk), Err(VfsError::NoSpace));
        assert_eq!(file.size(), MAX_FILE_SIZE as u64);
    }

    #[test]
    fn test_append_and_seek() {
        let file = root().create("log").unwrap();

        let mut w = file.open(O_WRONLY).unwrap();
        w.write(b"hello").unwrap();

        let mut a = file.open(O_WRONLY | O_APPEND).unwrap();
        a.write(b" world").unwrap();

        let mut r = file.open(O_RDWR).unwrap();
        assert_eq!(r.seek(SeekFrom::Start(6)), Ok(6));
        let mut buf = [0u8; 16];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
        assert_eq!(r.read(&mut buf), Ok(0));
    }

    #[test]
    fn test_directory_cannot_be_opened() {
        assert_eq!(root().open(O_RDWR).err(), Some(VfsError::IsADirectory));
    }
}
