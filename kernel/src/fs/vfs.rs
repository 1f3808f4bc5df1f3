//! Virtual File System (VFS) Layer
//!
//! The switch between callers and backend filesystems. Paths are walked one
//! component at a time through [`Vnode::lookup`]; whenever the walk lands on
//! a mount point it continues at the mounted filesystem's root.
//!
//! Open files are named by generation-checked [`FileHandle`]s.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, Once};

use crate::kernel::sync::SpinLock;
use crate::{kdebug, kprintln};
use super::error::{VfsError, VfsResult};
use super::file::{File, FileHandle, FileTable, O_CREAT, O_EXCL, O_RDONLY, O_WRONLY};
use super::path;
use super::pipe::PipeFs;
use super::registry::{FilesystemDescriptor, Registry};
use super::tmpfs::Tmpfs;
use super::vnode::{follow_mounts, DirEntry, FileStat, Mount, MountId, SeekFrom, Vnode};

/// Mount id of the global root
pub const ROOT_MOUNT: MountId = MountId(0);

/// Mount id of the internal pipe filesystem
pub const PIPE_MOUNT: MountId = MountId(1);

/// VFS context: registry, mount table and open files
pub struct Vfs {
    registry: SpinLock<Registry>,
    /// Every mount, indexed by `MountId`
    mounts: SpinLock<Vec<Arc<Mount>>>,
    /// Held across a whole mount, including backend setup
    mounting: Mutex<()>,
    root: Arc<Mount>,
    pipes: Arc<Mount>,
    files: SpinLock<FileTable>,
}

impl Vfs {
    /// Register `root_fs` and mount it at `/`.
    pub fn new(root_fs: FilesystemDescriptor) -> VfsResult<Self> {
        let mut registry = Registry::new();
        registry.register(root_fs.clone())?;

        let root_node = root_fs.setup().setup_mount(ROOT_MOUNT)?;
        let root = Arc::new(Mount::new(ROOT_MOUNT, root_fs.name(), "/", root_node)?);

        // Not registered: pipes are only reachable through `pipe()`
        let pipe_fs = PipeFs::descriptor()?;
        let pipe_root = pipe_fs.setup().setup_mount(PIPE_MOUNT)?;
        let pipes = Arc::new(Mount::new(PIPE_MOUNT, pipe_fs.name(), "pipe:", pipe_root)?);

        Ok(Self {
            registry: SpinLock::new(registry),
            mounts: SpinLock::new(alloc::vec![root.clone(), pipes.clone()]),
            mounting: Mutex::new(()),
            root,
            pipes,
            files: SpinLock::new(FileTable::new()),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REGISTRY & MOUNTS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn register(&self, descriptor: FilesystemDescriptor) -> VfsResult<usize> {
        let name = descriptor.name().clone();
        let slot = self.registry.lock().register(descriptor)?;
        kprintln!("[VFS] Registered filesystem '{}' (slot {})", name, slot);
        Ok(slot)
    }

    /// Registered filesystem names, in slot order.
    pub fn filesystems(&self) -> Vec<String> {
        self.registry.lock().names().map(String::from).collect()
    }

    /// Mount a registered filesystem on the directory at `target`.
    pub fn mount(&self, target: &str, fs_name: &str) -> VfsResult<MountId> {
        let result = self.try_mount(target, fs_name);
        match result {
            Ok(id) => kprintln!("[VFS] Mounted {} at {} ({})", fs_name, target, id),
            Err(e) => kprintln!("[VFS] mount {} at {} failed: {}", fs_name, target, e),
        }
        result
    }

    fn try_mount(&self, target: &str, fs_name: &str) -> VfsResult<MountId> {
        let descriptor = self
            .registry
            .lock()
            .find(fs_name)
            .map_err(|_| VfsError::UnknownFilesystem)?
            .clone();

        let _mounting = self.mounting.lock();
        let point = self.resolve_dir(target)?;
        if !point.is_dir() {
            return Err(VfsError::NotADirectory);
        }

        // Only mounts push, so the id stays free until the push below.
        // Setup may do device I/O; interrupts stay enabled for it.
        let id = MountId(self.mounts.lock().len());
        let root = descriptor.setup().setup_mount(id)?;
        let mount = Arc::new(Mount::new(id, descriptor.name(), target, root)?);
        point.cover(mount.clone())?;
        self.mounts.lock().push(mount);
        Ok(id)
    }

    pub fn mounts(&self) -> Vec<Arc<Mount>> {
        self.mounts.lock().clone()
    }

    pub fn root_mount(&self) -> &Arc<Mount> {
        &self.root
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PATH RESOLUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Walk `path` from the root, crossing mount points.
    pub fn resolve(&self, path: &str) -> VfsResult<Arc<Vnode>> {
        let mut node = follow_mounts(self.root.root().clone());

        for name in path::components(path)? {
            let name = name?;
            if !node.is_dir() {
                return Err(VfsError::NotADirectory);
            }
            node = follow_mounts(node.lookup(&name)?);
            kdebug!("[VFS] lookup {} -> {:?}", name, node);
        }
        Ok(node)
    }

    /// Resolve a directory that must exist for the operation to proceed.
    fn resolve_dir(&self, path: &str) -> VfsResult<Arc<Vnode>> {
        match self.resolve(path) {
            Err(VfsError::NotFound) => Err(VfsError::NoSuchDirectory),
            other => other,
        }
    }

    pub fn stat(&self, path: &str) -> VfsResult<FileStat> {
        Ok(self.resolve(path)?.stat())
    }

    pub fn read_dir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        self.resolve(path)?.read_dir()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FILES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open `path`. With `O_CREAT` a missing leaf is created in its parent
    /// directory; `O_CREAT | O_EXCL` fails if it already exists.
    pub fn open(&self, path: &str, flags: usize) -> VfsResult<FileHandle> {
        let create = flags & O_CREAT != 0;
        let vnode = match self.resolve(path) {
            Ok(_) if create && flags & O_EXCL != 0 => return Err(VfsError::AlreadyExists),
            Ok(node) => node,
            Err(VfsError::NotFound) if create => self.create(path)?,
            Err(e) => return Err(e),
        };

        let ops = vnode.open(flags)?;
        let handle = self.files.lock().insert(File::new(vnode, flags, ops));
        kdebug!("[VFS] open {} -> {}", path, handle);
        Ok(handle)
    }

    fn create(&self, path: &str) -> VfsResult<Arc<Vnode>> {
        let (parent, leaf) = path::split_parent(path)?;
        self.resolve_dir(parent)
            .and_then(|dir| dir.create(&leaf))
            .inspect_err(|e| kprintln!("[VFS] create {} failed: {}", path, e))
    }

    pub fn close(&self, handle: FileHandle) -> VfsResult<()> {
        let file = self.files.lock().remove(handle)?;
        let mut file = file.lock();
        file.close()
    }

    /// Read from an open file. A FIFO with live writers and nothing buffered
    /// makes this wait until data or end-of-file arrives.
    pub fn read(&self, handle: FileHandle, buf: &mut [u8]) -> VfsResult<usize> {
        let file = self.files.lock().get(handle)?;
        loop {
            match file.lock().read(buf) {
                Err(VfsError::Blocked) => core::hint::spin_loop(),
                result => return result,
            }
        }
    }

    pub fn write(&self, handle: FileHandle, buf: &[u8]) -> VfsResult<usize> {
        let file = self.files.lock().get(handle)?;
        let mut file = file.lock();
        file.write(buf)
    }

    pub fn seek(&self, handle: FileHandle, pos: SeekFrom) -> VfsResult<u64> {
        let file = self.files.lock().get(handle)?;
        let mut file = file.lock();
        file.seek(pos)
    }

    pub fn fstat(&self, handle: FileHandle) -> VfsResult<FileStat> {
        let file = self.files.lock().get(handle)?;
        let stat = file.lock().vnode().stat();
        Ok(stat)
    }

    /// Create a new directory at `path`; its parent must exist.
    pub fn mkdir(&self, path: &str) -> VfsResult<()> {
        let (parent, leaf) = path::split_parent(path)?;
        self.resolve_dir(parent)
            .and_then(|dir| dir.mkdir(&leaf))
            .map(|_| ())
            .inspect_err(|e| kprintln!("[VFS] mkdir {} failed: {}", path, e))
    }

    /// Create an anonymous pipe, returning (read end, write end).
    pub fn pipe(&self) -> VfsResult<(FileHandle, FileHandle)> {
        let fifo = self.pipes.root().create("pipe")?;
        let reader = fifo.open(O_RDONLY)?;
        let writer = fifo.open(O_WRONLY)?;

        let mut files = self.files.lock();
        let read_end = files.insert(File::new(fifo.clone(), O_RDONLY, reader));
        let write_end = files.insert(File::new(fifo, O_WRONLY, writer));
        Ok((read_end, write_end))
    }

    pub fn open_files(&self) -> usize {
        self.files.lock().open_count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

static VFS: Once<Vfs> = Once::new();

/// Create the global VFS with tmpfs mounted at `/`.
pub fn init() -> VfsResult<&'static Vfs> {
    let vfs = VFS.try_call_once(|| Tmpfs::descriptor().and_then(Vfs::new))?;
    kprintln!("[VFS] Initialized. Root: {}", vfs.root.filesystem());
    Ok(vfs)
}

/// The global VFS, once `init` has run.
pub fn get() -> Option<&'static Vfs> {
    VFS.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::file::O_RDWR;
    use crate::fs::registry::MountSetup;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn vfs() -> Vfs {
        Vfs::new(Tmpfs::descriptor().unwrap()).unwrap()
    }

    /// tmpfs that reads the mount table while it is being mounted
    struct Inspecting {
        vfs: Arc<Once<&'static Vfs>>,
        seen: Arc<AtomicUsize>,
    }

    impl MountSetup for Inspecting {
        fn setup_mount(&self, mount: MountId) -> VfsResult<Arc<Vnode>> {
            if let Some(vfs) = self.vfs.get() {
                self.seen.store(vfs.mounts().len(), Ordering::SeqCst);
            }
            Tmpfs.setup_mount(mount)
        }
    }

    #[test]
    fn test_root_and_pipe_mounts() {
        let vfs = vfs();
        let mounts = vfs.mounts();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].id(), ROOT_MOUNT);
        assert_eq!(mounts[0].target(), "/");
        assert_eq!(mounts[1].filesystem(), "pipefs");
        assert_eq!(vfs.filesystems(), ["tmpfs"]);
        assert_eq!(vfs.mount("/", "pipefs"), Err(VfsError::UnknownFilesystem));
    }

    #[test]
    fn test_mount_table_usable_during_setup() {
        let handle = Arc::new(Once::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let setup = Inspecting { vfs: handle.clone(), seen: seen.clone() };

        let vfs: &'static Vfs = Box::leak(Box::new(vfs()));
        handle.call_once(|| vfs);
        vfs.register(FilesystemDescriptor::new("inspect", Arc::new(setup)).unwrap()).unwrap();
        vfs.mkdir("/m").unwrap();

        assert_eq!(vfs.mount("/m", "inspect"), Ok(MountId(2)));
        // The new mount is not visible until setup finished
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(vfs.mounts().len(), 3);
    }

    #[test]
    fn test_walk_through_file_fails() {
        let vfs = vfs();
        let fd = vfs.open("/f", O_CREAT | O_RDWR).unwrap();
        vfs.close(fd).unwrap();
        assert_eq!(vfs.resolve("/f/x").err(), Some(VfsError::NotADirectory));
        assert_eq!(vfs.mkdir("/f/x"), Err(VfsError::NotADirectory));
    }

    #[test]
    fn test_global_instance() {
        let first = init().unwrap();
        let second = init().unwrap();
        assert!(core::ptr::eq(first, second));
        assert!(get().is_some());
    }
}
