//! Path parsing
//!
//! Paths are absolute and `/`-separated. Every component is copied into a
//! bounded [`FileName`]; anything that does not fit is rejected with
//! [`VfsError::NameTooLong`], never truncated.

use heapless::String;
use super::error::{VfsError, VfsResult};

/// Longest component name, in bytes
pub const MAX_NAME_LEN: usize = 16;

/// Longest absolute path, in bytes
pub const MAX_PATH_LEN: usize = 255;

/// One bounded path component
pub type FileName = String<MAX_NAME_LEN>;

/// A bounded absolute path (mount targets)
pub type PathBuf = String<MAX_PATH_LEN>;

/// Copy a single component into a bounded name.
pub fn file_name(component: &str) -> VfsResult<FileName> {
    if component.is_empty() || component.contains('/') {
        return Err(VfsError::InvalidPath);
    }
    let mut name = FileName::new();
    name.push_str(component).map_err(|_| VfsError::NameTooLong)?;
    Ok(name)
}

/// Copy a whole path into a bounded buffer.
pub fn path_buf(path: &str) -> VfsResult<PathBuf> {
    validate(path)?;
    let mut buf = PathBuf::new();
    buf.push_str(path).map_err(|_| VfsError::PathTooLong)?;
    Ok(buf)
}

/// Check total length and that the path is absolute.
pub fn validate(path: &str) -> VfsResult<()> {
    if path.len() > MAX_PATH_LEN {
        return Err(VfsError::PathTooLong);
    }
    if !path.starts_with('/') {
        return Err(VfsError::InvalidPath);
    }
    Ok(())
}

/// Iterate the components of `path`, skipping empty ones (`//`, trailing `/`).
pub fn components(path: &str) -> VfsResult<Components<'_>> {
    validate(path)?;
    Ok(Components { parts: path.split('/') })
}

pub struct Components<'a> {
    parts: core::str::Split<'a, char>,
}

impl<'a> Iterator for Components<'a> {
    type Item = VfsResult<FileName>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let part = self.parts.next()?;
            if !part.is_empty() {
                return Some(file_name(part));
            }
        }
    }
}

/// Split `path` into its parent directory and the final component.
///
/// `/a/b` gives `("/a", "b")`, `/b` gives `("/", "b")`. Trailing slashes
/// are ignored; `/` itself has no final component.
pub fn split_parent(path: &str) -> VfsResult<(&str, FileName)> {
    validate(path)?;
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/').ok_or(VfsError::InvalidPath)?;

    let leaf = file_name(&trimmed[idx + 1..])?;
    let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
    Ok((parent, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn names(path: &str) -> Vec<std::string::String> {
        components(path)
            .unwrap()
            .map(|c| c.unwrap().as_str().into())
            .collect()
    }

    #[test]
    fn test_components_skip_empty() {
        assert_eq!(names("/a/b/c"), ["a", "b", "c"]);
        assert_eq!(names("//a///b/"), ["a", "b"]);
        assert!(names("/").is_empty());
    }

    #[test]
    fn test_relative_and_empty_paths_rejected() {
        assert_eq!(components("a/b").err(), Some(VfsError::InvalidPath));
        assert_eq!(components("").err(), Some(VfsError::InvalidPath));
    }

    #[test]
    fn test_name_too_long_is_an_error() {
        let exact = "/abcdefghijklmnop"; // 16 bytes
        assert_eq!(names(exact), ["abcdefghijklmnop"]);

        let mut parts = components("/abcdefghijklmnopq/x").unwrap();
        assert_eq!(parts.next(), Some(Err(VfsError::NameTooLong)));
    }

    #[test]
    fn test_path_too_long_is_an_error() {
        let mut long = std::string::String::new();
        while long.len() <= MAX_PATH_LEN {
            long.push_str("/abc");
        }
        assert_eq!(components(&long).err(), Some(VfsError::PathTooLong));
        assert_eq!(split_parent(&long).err(), Some(VfsError::PathTooLong));
        assert_eq!(path_buf(&long).err(), Some(VfsError::PathTooLong));
    }

    #[test]
    fn test_split_parent() {
        let (parent, leaf) = split_parent("/a/b").unwrap();
        assert_eq!((parent, leaf.as_str()), ("/a", "b"));

        let (parent, leaf) = split_parent("/top").unwrap();
        assert_eq!((parent, leaf.as_str()), ("/", "top"));

        let (parent, leaf) = split_parent("/a/b/c/").unwrap();
        assert_eq!((parent, leaf.as_str()), ("/a/b", "c"));

        assert_eq!(split_parent("/").err(), Some(VfsError::InvalidPath));
        assert_eq!(split_parent("/a/abcdefghijklmnopq").err(), Some(VfsError::NameTooLong));
    }
}
