//! # pontoon-vfs
//!
//! Virtual filesystem dispatch layer.
//!
//! A [`KernelProxy`] owns the mount table, the file-descriptor table and
//! path resolution, and forwards POSIX-shaped calls (`open`, `read`,
//! `write`, `stat`, `mkdir`, ...) to the [`Mount`] owning the path.
//! Each mount is an independent backing store with its own namespace of
//! inode-like nodes; [`MemMount`] is the bundled in-memory store.
//!
//! Paths are resolved exactly once per call; past resolution, every
//! operation is keyed by `(mount, inode)`.

mod error;
mod memfs;
mod mount;
mod node;
mod path;
mod proxy;
mod slot;

pub use error::{Result, VfsError};
pub use memfs::MemMount;
pub use mount::Mount;
pub use node::{DirEntry, FileStat, Ino, NodeKind};
pub use path::VfsPath;
pub use proxy::{KernelProxy, OpenFlags, Whence};
pub use slot::SlotAllocator;
