// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the logical design for the kernel's virtual filesystem.
//!
//! This crate provides the structure the rest of the kernel consumes: a
//! [`FileSystem`] capability trait, a mount table mapping path prefixes
//! to mounted filesystems, and [`read_fully`], which loads a whole file
//! into memory and is the operation the process loader is built on.
//!
//! The only concrete filesystem is [`fat::FatFileSystem`], a read-only
//! FAT-style filesystem with a flat namespace.

#![no_std]

extern crate alloc;

pub mod fat;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use ember_abi::Error;
use lazy_static::lazy_static;

/// The separator used in file paths.
///
pub const SEPARATOR: char = '/';

bitflags! {
    /// Describes the actions that can be taken on a file.
    ///
    pub struct Permissions: u8 {
        /// No actions can be performed on a file with
        /// no permission bits set.
        ///
        const NONE = 0;

        /// A file with this bit set can be executed
        /// to start a new process.
        ///
        const EXECUTE = 1 << 0;

        /// A file with this bit set can be modified.
        ///
        const WRITE = 1 << 1;

        /// A file with this bit set can be read.
        ///
        const READ = 1 << 2;
    }
}

/// Describes a file's type.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FileType {
    /// A regular file.
    RegularFile = 1,

    /// A directory.
    Directory = 2,
}

/// Describes a file or directory.
///
#[derive(Debug, PartialEq)]
pub struct FileInfo {
    /// The file's name, without any mount prefix. It will
    /// never have a trailing slash.
    ///
    pub name: String,

    /// The file's type.
    ///
    pub file_type: FileType,

    /// The set of actions that can be performed on the
    /// file.
    ///
    pub permissions: Permissions,

    /// The file's size. A directory has size `0`.
    ///
    pub size: usize,
}

/// Represents a mounted filesystem.
///
pub trait FileSystem: Send {
    /// Returns information about the file at `path`,
    /// which is relative to the filesystem's mount point.
    ///
    fn stat(&mut self, path: &str) -> Result<FileInfo, Error>;

    /// Reads the entire contents of the file at `path`.
    ///
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Error>;
}

/// One entry in the mount table.
///
struct MountPoint {
    prefix: String,
    filesystem: Box<dyn FileSystem>,
}

lazy_static! {
    /// MOUNTS maps path prefixes to mounted filesystems.
    ///
    /// The table is a higher-level mutable collection, so
    /// it is guarded by a blocking mutex rather than an
    /// atomic section: mounting and path resolution may
    /// block, but never run with interrupts disabled.
    ///
    static ref MOUNTS: sync::Mutex<Vec<MountPoint>> = sync::Mutex::new(Vec::new());
}

/// Splits `path` into its mount prefix and the remainder,
/// if the given prefix matches.
///
/// A prefix matches if the path starts with it and the
/// match ends at a separator (or consumes the whole path).
///
fn match_prefix<'p>(prefix: &str, path: &'p str) -> Option<&'p str> {
    if prefix == "/" {
        // The root mount matches every absolute path.
        return if path.starts_with(SEPARATOR) {
            Some(path)
        } else {
            None
        };
    }

    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some("/");
    }

    if rest.starts_with(SEPARATOR) {
        Some(rest)
    } else {
        None
    }
}

/// Mounts the given filesystem at `prefix`.
///
/// The prefix must be absolute, without a trailing
/// separator, such as `/c`. Mounting an already-used
/// prefix fails with [`Error::Exists`].
///
pub fn mount(prefix: &str, filesystem: Box<dyn FileSystem>) -> Result<(), Error> {
    if !prefix.starts_with(SEPARATOR) || (prefix.len() > 1 && prefix.ends_with(SEPARATOR)) {
        return Err(Error::InvalidArgument);
    }

    let mut mounts = MOUNTS.lock();
    if mounts.iter().any(|mount| mount.prefix == prefix) {
        return Err(Error::Exists);
    }

    mounts.push(MountPoint {
        prefix: String::from(prefix),
        filesystem,
    });

    Ok(())
}

/// Resolves `path` against the mount table and calls `f`
/// with the owning filesystem and the path remainder.
///
/// The longest matching prefix wins.
///
fn with_filesystem<F, R>(path: &str, f: F) -> Result<R, Error>
where
    F: FnOnce(&mut dyn FileSystem, &str) -> Result<R, Error>,
{
    let mut mounts = MOUNTS.lock();

    let mut best: Option<(&mut MountPoint, &str)> = None;
    for mount in mounts.iter_mut() {
        if let Some(rest) = match_prefix(&mount.prefix, path) {
            let better = match &best {
                Some((existing, _)) => mount.prefix.len() > existing.prefix.len(),
                None => true,
            };
            if better {
                best = Some((mount, rest));
            }
        }
    }

    match best {
        Some((mount, rest)) => f(mount.filesystem.as_mut(), rest),
        None => Err(Error::NoFilesystem),
    }
}

/// Returns information about the file at `path`.
///
pub fn stat(path: &str) -> Result<FileInfo, Error> {
    with_filesystem(path, |filesystem, rest| filesystem.stat(rest))
}

/// Reads the entire contents of the file at `path` into a
/// fresh buffer.
///
pub fn read_fully(path: &str) -> Result<Vec<u8>, Error> {
    with_filesystem(path, |filesystem, rest| filesystem.read_file(rest))
}

#[cfg(test)]
mod tests {
    use super::match_prefix;

    #[test]
    fn test_match_prefix() {
        assert_eq!(match_prefix("/c", "/c/shell.exe"), Some("/shell.exe"));
        assert_eq!(match_prefix("/c", "/c"), Some("/"));
        assert_eq!(match_prefix("/c", "/cd/shell.exe"), None);
        assert_eq!(match_prefix("/d", "/c/shell.exe"), None);
        assert_eq!(match_prefix("/", "/shell.exe"), Some("/shell.exe"));
    }
}
