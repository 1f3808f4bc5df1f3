//! Filesystem Registry
//!
//! Fixed table of filesystem types that can be mounted. Registration fills
//! the first free slot; lookups are a linear scan by name.

use alloc::sync::Arc;
use heapless::String;

use super::error::{VfsError, VfsResult};
use super::vnode::{MountId, Vnode};

/// Number of filesystem types that can be registered
pub const MAX_FS_REG: usize = 8;

/// Longest filesystem type name
pub const FS_NAME_MAX: usize = 16;

pub type FsName = String<FS_NAME_MAX>;

/// Mount setup capability of a filesystem type.
///
/// Called once per mount: builds the backend's root vnode, owned by `mount`.
pub trait MountSetup: Send + Sync {
    fn setup_mount(&self, mount: MountId) -> VfsResult<Arc<Vnode>>;
}

#[derive(Clone)]
pub struct FilesystemDescriptor {
    name: FsName,
    setup: Arc<dyn MountSetup>,
}

impl FilesystemDescriptor {
    pub fn new(name: &str, setup: Arc<dyn MountSetup>) -> VfsResult<Self> {
        if name.is_empty() {
            return Err(VfsError::InvalidPath);
        }
        let mut fs_name = FsName::new();
        fs_name.push_str(name).map_err(|_| VfsError::NameTooLong)?;
        Ok(Self { name: fs_name, setup })
    }

    pub fn name(&self) -> &FsName {
        &self.name
    }

    pub fn setup(&self) -> &Arc<dyn MountSetup> {
        &self.setup
    }
}

impl core::fmt::Debug for FilesystemDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FilesystemDescriptor")
            .field("name", &self.name.as_str())
            .finish()
    }
}

pub struct Registry {
    slots: [Option<FilesystemDescriptor>; MAX_FS_REG],
}

impl Registry {
    pub const fn new() -> Self {
        const EMPTY: Option<FilesystemDescriptor> = None;
        Self {
            slots: [EMPTY; MAX_FS_REG],
        }
    }

    /// Store `descriptor` in the first free slot and return the slot index.
    pub fn register(&mut self, descriptor: FilesystemDescriptor) -> VfsResult<usize> {
        if self.find(&descriptor.name).is_ok() {
            return Err(VfsError::AlreadyExists);
        }

        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(VfsError::RegistryFull)?;
        *slot = Some(descriptor);
        Ok(index)
    }

    pub fn find(&self, name: &str) -> VfsResult<&FilesystemDescriptor> {
        self.slots
            .iter()
            .flatten()
            .find(|fs| fs.name.as_str() == name)
            .ok_or(VfsError::NotFound)
    }

    /// Registered filesystem names, in slot order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().flatten().map(|fs| fs.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tmpfs::Tmpfs;
    use std::format;
    use std::vec::Vec;

    #[test]
    fn test_each_slot_keeps_its_own_setup() {
        let mut registry = Registry::new();
        let setups: Vec<Arc<dyn MountSetup>> = (0..MAX_FS_REG)
            .map(|_| Arc::new(Tmpfs) as Arc<dyn MountSetup>)
            .collect();

        for (i, setup) in setups.iter().enumerate() {
            let descriptor = FilesystemDescriptor::new(&format!("fs{}", i), setup.clone()).unwrap();
            assert_eq!(registry.register(descriptor), Ok(i));
        }

        for (i, setup) in setups.iter().enumerate() {
            let found = registry.find(&format!("fs{}", i)).unwrap();
            assert!(Arc::ptr_eq(found.setup(), setup));
        }
    }

    #[test]
    fn test_full_and_duplicate() {
        let mut registry = Registry::new();
        for i in 0..MAX_FS_REG {
            let descriptor = FilesystemDescriptor::new(&format!("fs{}", i), Arc::new(Tmpfs)).unwrap();
            registry.register(descriptor).unwrap();
        }

        let extra = FilesystemDescriptor::new("extra", Arc::new(Tmpfs)).unwrap();
        assert_eq!(registry.register(extra), Err(VfsError::RegistryFull));

        let mut small = Registry::new();
        let first = FilesystemDescriptor::new("tmpfs", Arc::new(Tmpfs)).unwrap();
        small.register(first.clone()).unwrap();
        assert_eq!(small.register(first), Err(VfsError::AlreadyExists));
        assert_eq!(small.len(), 1);
    }

    #[test]
    fn test_find_unknown() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.find("fat32").err(), Some(VfsError::NotFound));
        assert_eq!(
            FilesystemDescriptor::new("a-very-long-fs-name", Arc::new(Tmpfs)).err(),
            Some(VfsError::NameTooLong)
        );
    }
}
