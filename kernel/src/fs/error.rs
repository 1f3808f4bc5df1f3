use core::fmt;

/// Filesystem error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VfsError {
    /// A path component does not exist
    NotFound,
    /// Parent directory of a create/mkdir/mount target does not exist
    NoSuchDirectory,
    /// Creation target already exists
    AlreadyExists,
    /// No free filesystem registration slot
    RegistryFull,
    /// Mount requested an unregistered filesystem type
    UnknownFilesystem,
    /// A path component exceeds the maximum name length
    NameTooLong,
    /// The path exceeds the maximum path length
    PathTooLong,
    /// Path is empty or not absolute
    InvalidPath,
    /// Walked through, or created inside, something that is not a directory
    NotADirectory,
    /// File operation on a directory
    IsADirectory,
    /// Directory table or file capacity exhausted
    NoSpace,
    /// Vnode is already a mount point
    Busy,
    /// Streaming read has nothing yet; not a failure
    Blocked,
    /// Handle was closed (or never issued)
    UseAfterClose,
    /// Opaque error passed through from a backend or device
    Backend(&'static str),
}

pub type VfsResult<T> = Result<T, VfsError>;

impl From<&'static str> for VfsError {
    fn from(msg: &'static str) -> Self {
        VfsError::Backend(msg)
    }
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::NotFound => f.write_str("no such file or directory"),
            VfsError::NoSuchDirectory => f.write_str("parent directory does not exist"),
            VfsError::AlreadyExists => f.write_str("file exists"),
            VfsError::RegistryFull => f.write_str("filesystem registry full"),
            VfsError::UnknownFilesystem => f.write_str("unknown filesystem type"),
            VfsError::NameTooLong => f.write_str("file name too long"),
            VfsError::PathTooLong => f.write_str("path too long"),
            VfsError::InvalidPath => f.write_str("invalid path"),
            VfsError::NotADirectory => f.write_str("not a directory"),
            VfsError::IsADirectory => f.write_str("is a directory"),
            VfsError::NoSpace => f.write_str("no space left"),
            VfsError::Busy => f.write_str("device or mount point busy"),
            VfsError::Blocked => f.write_str("operation would block"),
            VfsError::UseAfterClose => f.write_str("file handle is closed"),
            VfsError::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}
