use crate::error::{Result, VfsError};
use crate::node::{DirEntry, FileStat, Ino};
use crate::path::VfsPath;

/// A pluggable backing store owning a disjoint namespace of nodes.
///
/// The kernel proxy resolves a caller path to `(mount, mount-relative
/// path)` once, then talks to the mount: path-taking operations receive
/// absolute paths within the mount (`/` is the mount root), everything
/// else is keyed by inode number. Mounts never share nodes.
///
/// Only `lookup` and `stat` are mandatory; every other operation defaults
/// to `NotSupported` so read-only or special-purpose stores implement just
/// what they mean. Each mount handles its own internal locking.
pub trait Mount: Send + Sync {
    /// Resolve a mount-relative path to its node.
    fn lookup(&self, path: &VfsPath) -> Result<FileStat>;

    /// Stat a node by inode number.
    fn stat(&self, ino: Ino) -> Result<FileStat>;

    /// Create a regular file. Fails `AlreadyExists` if the name is taken.
    fn create(&self, _path: &VfsPath, _mode: u32) -> Result<FileStat> {
        Err(VfsError::NotSupported)
    }

    /// Create a directory. Fails `AlreadyExists` if the name is taken.
    fn mkdir(&self, _path: &VfsPath, _mode: u32) -> Result<FileStat> {
        Err(VfsError::NotSupported)
    }

    /// Remove a file name. The node survives until its last open
    /// descriptor is released.
    fn unlink(&self, _path: &VfsPath) -> Result<()> {
        Err(VfsError::NotSupported)
    }

    /// Remove an empty directory.
    fn rmdir(&self, _ino: Ino) -> Result<()> {
        Err(VfsError::NotSupported)
    }

    fn chmod(&self, _ino: Ino, _mode: u32) -> Result<()> {
        Err(VfsError::NotSupported)
    }

    fn fsync(&self, _ino: Ino) -> Result<()> {
        Err(VfsError::NotSupported)
    }

    /// Truncate a file to zero length.
    fn truncate(&self, _ino: Ino) -> Result<()> {
        Err(VfsError::NotSupported)
    }

    fn read(&self, _ino: Ino, _offset: u64, _buf: &mut [u8]) -> Result<usize> {
        Err(VfsError::NotSupported)
    }

    fn write(&self, _ino: Ino, _offset: u64, _data: &[u8]) -> Result<usize> {
        Err(VfsError::NotSupported)
    }

    /// List up to `max` children of a directory starting at the cookie
    /// index (insertion order, no `.`/`..` entries).
    fn read_dir(&self, _ino: Ino, _cookie: usize, _max: usize) -> Result<Vec<DirEntry>> {
        Err(VfsError::NotSupported)
    }

    fn link(&self, _existing: &VfsPath, _new: &VfsPath) -> Result<()> {
        Err(VfsError::NotSupported)
    }

    fn symlink(&self, _target: &VfsPath, _link: &VfsPath) -> Result<()> {
        Err(VfsError::NotSupported)
    }

    /// Take a reference on a node (an open descriptor points at it).
    fn ref_node(&self, _ino: Ino) {}

    /// Drop a reference; the last drop of an unlinked node reclaims it.
    fn unref_node(&self, _ino: Ino) {}
}
