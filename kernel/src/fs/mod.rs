//! Filesystem Subsystem
//!
//! The VFS switch plus the tmpfs, FAT32 and pipe backends.

pub mod block;
pub mod error;
pub mod fat32;
pub mod file;
pub mod path;
pub mod pipe;
pub mod registry;
pub mod tmpfs;
pub mod vfs;
pub mod vnode;

pub use block::{BlockDevice, SECTOR_SIZE};
pub use error::{VfsError, VfsResult};
pub use file::{FileHandle, O_APPEND, O_CREAT, O_EXCL, O_RDONLY, O_RDWR, O_WRONLY};
pub use registry::{FilesystemDescriptor, MountSetup};
pub use vfs::Vfs;
pub use vnode::{DirEntry, FileOps, FileStat, MountId, SeekFrom, Vnode, VnodeKind, VnodeOps};

/// Initialize Filesystem Subsystem
pub fn init() -> VfsResult<&'static Vfs> {
    vfs::init()
}
