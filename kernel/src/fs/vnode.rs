//! Vnodes and mounts
//!
//! A [`Vnode`] is the backend-agnostic node for a file, directory or FIFO.
//! The VFS only ever talks to a backend through the two capability traits
//! defined here: [`VnodeOps`] on nodes and [`FileOps`] on open files.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use spin::Once;

use super::error::{VfsError, VfsResult};
use super::path::{self, PathBuf};
use super::registry::FsName;

/// Seek Whence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

impl SeekFrom {
    /// New absolute position, given the current one and the file size.
    /// Positions past the end of the file are rejected.
    pub fn resolve(self, current: u64, size: u64) -> VfsResult<u64> {
        let target = match self {
            SeekFrom::Start(off) => Some(off),
            SeekFrom::Current(off) => current.checked_add_signed(off),
            SeekFrom::End(off) => size.checked_add_signed(off),
        };
        match target {
            Some(pos) if pos <= size => Ok(pos),
            Some(_) => Err(VfsError::Backend("Seek beyond EOF")),
            None => Err(VfsError::Backend("Invalid seek")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VnodeKind {
    File,
    Directory,
    Fifo,
}

/// File Statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: VnodeKind,
    pub size: u64,
    pub mount: MountId,
}

/// Directory Entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: VnodeKind,
    pub size: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CAPABILITY TRAITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Operations on an open file. Every open file description implements this.
pub trait FileOps: Send {
    /// Read up to `buf.len()` bytes. Streaming backends return
    /// [`VfsError::Blocked`] instead of `Ok(0)` while more data may arrive.
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;
    fn write(&mut self, buf: &[u8]) -> VfsResult<usize>;
    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64>;
    fn close(&mut self) -> VfsResult<()>;
}

/// Operations on a node. `dir` is the vnode these ops are attached to; new
/// children must be created in `dir.mount()`.
pub trait VnodeOps: Send + Sync {
    fn lookup(&self, dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>>;
    fn create(&self, dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>>;
    fn mkdir(&self, dir: &Vnode, name: &str) -> VfsResult<Arc<Vnode>>;
    fn open(&self, flags: usize) -> VfsResult<Box<dyn FileOps>>;
    fn size(&self) -> u64;
    fn read_dir(&self) -> VfsResult<Vec<DirEntry>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// VNODE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MountId(pub usize);

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mnt{}", self.0)
    }
}

pub struct Vnode {
    kind: VnodeKind,
    mount: MountId,
    /// Set once when another filesystem is mounted on this node.
    covered: Once<Arc<Mount>>,
    ops: Box<dyn VnodeOps>,
}

impl Vnode {
    pub fn new(kind: VnodeKind, mount: MountId, ops: Box<dyn VnodeOps>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            mount,
            covered: Once::new(),
            ops,
        })
    }

    pub fn kind(&self) -> VnodeKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == VnodeKind::Directory
    }

    /// The mount this vnode belongs to.
    pub fn mount(&self) -> MountId {
        self.mount
    }

    /// The mount stacked on top of this vnode, if it is a mount point.
    pub fn mounted(&self) -> Option<&Arc<Mount>> {
        self.covered.get()
    }

    /// Record `mount` as covering this vnode.
    pub fn cover(&self, mount: Arc<Mount>) -> VfsResult<()> {
        let mut fresh = false;
        self.covered.call_once(|| {
            fresh = true;
            mount
        });
        if fresh { Ok(()) } else { Err(VfsError::Busy) }
    }

    pub fn lookup(&self, name: &str) -> VfsResult<Arc<Vnode>> {
        self.ops.lookup(self, name)
    }

    pub fn create(&self, name: &str) -> VfsResult<Arc<Vnode>> {
        self.ops.create(self, name)
    }

    pub fn mkdir(&self, name: &str) -> VfsResult<Arc<Vnode>> {
        self.ops.mkdir(self, name)
    }

    pub fn open(&self, flags: usize) -> VfsResult<Box<dyn FileOps>> {
        self.ops.open(flags)
    }

    pub fn size(&self) -> u64 {
        self.ops.size()
    }

    pub fn read_dir(&self) -> VfsResult<Vec<DirEntry>> {
        self.ops.read_dir()
    }

    pub fn stat(&self) -> FileStat {
        FileStat {
            kind: self.kind,
            size: self.size(),
            mount: self.mount,
        }
    }
}

impl fmt::Debug for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vnode")
            .field("kind", &self.kind)
            .field("mount", &self.mount)
            .field("mount_point", &self.covered.get().map(|m| m.id()))
            .finish()
    }
}

/// Follow mount points until reaching a vnode nothing is mounted on.
pub fn follow_mounts(mut node: Arc<Vnode>) -> Arc<Vnode> {
    while let Some(mount) = node.mounted() {
        node = mount.root().clone();
    }
    node
}

// ═══════════════════════════════════════════════════════════════════════════════
// MOUNT
// ═══════════════════════════════════════════════════════════════════════════════

/// A filesystem instance bound into the namespace.
pub struct Mount {
    id: MountId,
    filesystem: FsName,
    target: PathBuf,
    root: Arc<Vnode>,
}

impl Mount {
    pub fn new(id: MountId, filesystem: &FsName, target: &str, root: Arc<Vnode>) -> VfsResult<Self> {
        let mut buf = PathBuf::new();
        buf.push_str(target).map_err(|_| VfsError::PathTooLong)?;
        if target.starts_with('/') {
            path::validate(target)?;
        }
        Ok(Self {
            id,
            filesystem: filesystem.clone(),
            target: buf,
            root,
        })
    }

    pub fn id(&self) -> MountId {
        self.id
    }

    pub fn filesystem(&self) -> &str {
        &self.filesystem
    }

    /// Path the mount was attached at.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn root(&self) -> &Arc<Vnode> {
        &self.root
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.id)
            .field("filesystem", &self.filesystem.as_str())
            .field("target", &self.target.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_resolution() {
        assert_eq!(SeekFrom::Start(3).resolve(0, 10), Ok(3));
        assert_eq!(SeekFrom::Current(-2).resolve(5, 10), Ok(3));
        assert_eq!(SeekFrom::End(0).resolve(0, 10), Ok(10));
        assert_eq!(SeekFrom::End(-10).resolve(4, 10), Ok(0));
        assert!(SeekFrom::Start(11).resolve(0, 10).is_err());
        assert!(SeekFrom::Current(-6).resolve(5, 10).is_err());
    }
}
