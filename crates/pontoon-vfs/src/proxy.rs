use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use tracing::{debug, trace};

use crate::error::{Result, VfsError};
use crate::mount::Mount;
use crate::node::{DirEntry, FileStat, Ino, NodeKind};
use crate::path::VfsPath;
use crate::slot::SlotAllocator;

bitflags! {
    /// Open flags, bit-compatible with the fcntl constants. Read-only is
    /// the absence of an access bit (`O_RDONLY` is zero).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: i32 {
        const WRONLY = libc::O_WRONLY;
        const RDWR = libc::O_RDWR;
        const CREATE = libc::O_CREAT;
        const EXCL = libc::O_EXCL;
        const APPEND = libc::O_APPEND;
        const TRUNC = libc::O_TRUNC;
    }
}

impl OpenFlags {
    pub fn readable(self) -> bool {
        self.bits() & libc::O_ACCMODE != libc::O_WRONLY
    }

    pub fn writable(self) -> bool {
        self.bits() & libc::O_ACCMODE != libc::O_RDONLY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Lowest descriptor handed out by `open`/`dup`; 0, 1 and 2 are reserved
/// for the host's standard streams.
const FIRST_FD: usize = 3;

struct MountPoint {
    point: VfsPath,
    mount: Arc<dyn Mount>,
}

/// Shared open-file record. `dup`/`dup2` alias the same record, so
/// duplicated descriptors share one offset (POSIX semantics).
struct OpenFile {
    mount_id: usize,
    ino: Ino,
    kind: NodeKind,
    flags: OpenFlags,
    offset: u64,
    refs: u32,
}

struct FdSlot {
    file: usize,
}

struct ProxyState {
    mounts: SlotAllocator<MountPoint>,
    fds: SlotAllocator<FdSlot>,
    files: SlotAllocator<OpenFile>,
    cwd: VfsPath,
}

impl ProxyState {
    /// Resolve a caller path against the cwd. Done exactly once per call.
    fn resolve(&self, raw: &str) -> Result<VfsPath> {
        if raw.is_empty() {
            return Err(VfsError::NotFound);
        }
        let path = VfsPath::new(raw);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.cwd.join(raw))
        }
    }

    /// Longest-prefix mount match, by path component. The root mount is
    /// mandatory, so there is always a match for an absolute path.
    fn find_mount(&self, path: &VfsPath) -> (usize, Arc<dyn Mount>, VfsPath) {
        let mut best: Option<(usize, usize, VfsPath)> = None;
        for (id, entry) in self.mounts.iter() {
            if let Some(rel) = path.strip_prefix(&entry.point) {
                let depth = entry.point.components().len();
                if best.as_ref().map(|(_, d, _)| depth >= *d).unwrap_or(true) {
                    best = Some((id, depth, rel));
                }
            }
        }
        let (id, _, rel) = best.expect("root mount missing");
        let mount = self.mounts.get(id).expect("mount table corrupt");
        (id, mount.mount.clone(), rel)
    }

    /// Resolve a path all the way to `(mount_id, mount, node)`.
    fn resolve_node(&self, raw: &str) -> Result<(usize, Arc<dyn Mount>, FileStat)> {
        let path = self.resolve(raw)?;
        let (id, mount, rel) = self.find_mount(&path);
        let stat = mount.lookup(&rel)?;
        Ok((id, mount, stat))
    }

    fn file_of(&self, fd: i32) -> Result<usize> {
        if fd < 0 {
            return Err(VfsError::BadDescriptor);
        }
        self.fds
            .get(fd as usize)
            .map(|slot| slot.file)
            .ok_or(VfsError::BadDescriptor)
    }

    fn file(&self, fd: i32) -> Result<&OpenFile> {
        let idx = self.file_of(fd)?;
        self.files.get(idx).ok_or(VfsError::BadDescriptor)
    }

    fn file_mut(&mut self, fd: i32) -> Result<&mut OpenFile> {
        let idx = self.file_of(fd)?;
        self.files.get_mut(idx).ok_or(VfsError::BadDescriptor)
    }

    fn mount_of(&self, file: &OpenFile) -> Arc<dyn Mount> {
        // Unmount refuses while descriptors reference the mount, so the
        // id is always live here.
        self.mounts
            .get(file.mount_id)
            .expect("descriptor references a dead mount")
            .mount
            .clone()
    }

    /// Drop one descriptor's reference to its open file; reclaims the
    /// record and the mount node on the last release.
    fn release_fd(&mut self, fd: i32) -> Result<()> {
        let idx = self.file_of(fd)?;
        self.fds.remove(fd as usize);
        let file = self.files.get_mut(idx).ok_or(VfsError::BadDescriptor)?;
        file.refs -= 1;
        if file.refs == 0 {
            let (ino, mount_id) = (file.ino, file.mount_id);
            self.files.remove(idx);
            let mount = self
                .mounts
                .get(mount_id)
                .expect("descriptor references a dead mount")
                .mount
                .clone();
            mount.unref_node(ino);
        }
        Ok(())
    }
}

/// Mediator between POSIX-shaped callers and the mounts.
///
/// Explicitly constructed and owned; embedders that want one filesystem
/// view per process hold a single instance and pass it around.
pub struct KernelProxy {
    state: Mutex<ProxyState>,
}

impl KernelProxy {
    /// Build a proxy with `root` mounted at `/`. The root mount is
    /// mandatory and cannot be unmounted.
    pub fn new(root: Arc<dyn Mount>) -> Self {
        let mut mounts = SlotAllocator::new();
        mounts.alloc(MountPoint {
            point: VfsPath::root(),
            mount: root,
        });
        Self {
            state: Mutex::new(ProxyState {
                mounts,
                fds: SlotAllocator::with_base(FIRST_FD),
                files: SlotAllocator::new(),
                cwd: VfsPath::root(),
            }),
        }
    }

    /// Attach a mount at an absolute path. The mount point's parent must
    /// already resolve; duplicate points are rejected.
    ///
    /// Mount-table mutation is not designed to race in-flight I/O;
    /// callers serialize `mount`/`unmount` against other calls.
    pub fn mount(&self, point: &str, mount: Arc<dyn Mount>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let point = VfsPath::new(point);
        if !point.is_absolute() || point.components().is_empty() {
            return Err(VfsError::InvalidArgument);
        }
        if state.mounts.iter().any(|(_, m)| m.point == point) {
            return Err(VfsError::AlreadyExists);
        }
        // The attach point must hang off an existing directory.
        let parent = point.parent();
        let (_, parent_mount, rel) = state.find_mount(&parent);
        let parent_stat = parent_mount.lookup(&rel)?;
        if !parent_stat.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        debug!(point = %point, "mount attached");
        state.mounts.alloc(MountPoint { point, mount });
        Ok(())
    }

    /// Detach the mount at `point`. Fails `Busy` while any descriptor
    /// references it and `InvalidArgument` for the root mount.
    pub fn unmount(&self, point: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let point = VfsPath::new(point);
        if point.components().is_empty() {
            return Err(VfsError::InvalidArgument);
        }
        let id = state
            .mounts
            .iter()
            .find(|(_, m)| m.point == point)
            .map(|(id, _)| id)
            .ok_or(VfsError::NotFound)?;
        if state.files.iter().any(|(_, f)| f.mount_id == id) {
            return Err(VfsError::Busy);
        }
        debug!(point = %point, "mount detached");
        state.mounts.remove(id);
        Ok(())
    }

    pub fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        let resolved = state.resolve(path)?;
        let (mount_id, mount, rel) = state.find_mount(&resolved);

        let stat = if flags.contains(OpenFlags::CREATE) {
            match mount.create(&rel, mode) {
                Ok(stat) => stat,
                Err(VfsError::AlreadyExists) if !flags.contains(OpenFlags::EXCL) => {
                    mount.lookup(&rel)?
                }
                Err(err) => return Err(err),
            }
        } else {
            mount.lookup(&rel)?
        };

        if stat.is_dir() && flags.writable() {
            return Err(VfsError::IsADirectory);
        }
        if flags.contains(OpenFlags::TRUNC) && flags.writable() && !stat.is_dir() {
            mount.truncate(stat.ino)?;
        }

        mount.ref_node(stat.ino);
        let offset = if flags.contains(OpenFlags::APPEND) {
            stat.size
        } else {
            0
        };
        let file = state.files.alloc(OpenFile {
            mount_id,
            ino: stat.ino,
            kind: stat.kind,
            flags,
            offset,
            refs: 1,
        });
        let fd = state.fds.alloc(FdSlot { file }) as i32;
        trace!(path, fd, ino = stat.ino, "open");
        Ok(fd)
    }

    pub fn close(&self, fd: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.release_fd(fd)
    }

    pub fn read(&self, fd: i32, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let file = state.file(fd)?;
        if file.kind == NodeKind::Directory {
            return Err(VfsError::IsADirectory);
        }
        if !file.flags.readable() {
            return Err(VfsError::BadDescriptor);
        }
        let (mount, ino, offset) = (state.mount_of(file), file.ino, file.offset);
        let n = mount.read(ino, offset, buf)?;
        state.file_mut(fd)?.offset += n as u64;
        Ok(n)
    }

    pub fn write(&self, fd: i32, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let file = state.file(fd)?;
        if file.kind == NodeKind::Directory {
            return Err(VfsError::IsADirectory);
        }
        if !file.flags.writable() {
            return Err(VfsError::BadDescriptor);
        }
        let (mount, ino, offset) = (state.mount_of(file), file.ino, file.offset);
        let n = mount.write(ino, offset, data)?;
        state.file_mut(fd)?.offset += n as u64;
        Ok(n)
    }

    pub fn lseek(&self, fd: i32, offset: i64, whence: Whence) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let file = state.file(fd)?;
        if file.kind == NodeKind::Directory {
            return Err(VfsError::BadDescriptor);
        }
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => file.offset as i64,
            Whence::End => {
                let mount = state.mount_of(file);
                mount.stat(file.ino)?.size as i64
            }
        };
        let next = base + offset;
        if next < 0 {
            return Err(VfsError::InvalidArgument);
        }
        let file = state.file_mut(fd)?;
        file.offset = next as u64;
        Ok(file.offset)
    }

    pub fn stat(&self, path: &str) -> Result<FileStat> {
        let state = self.state.lock().unwrap();
        let (_, _, stat) = state.resolve_node(path)?;
        Ok(stat)
    }

    pub fn fstat(&self, fd: i32) -> Result<FileStat> {
        let state = self.state.lock().unwrap();
        let file = state.file(fd)?;
        state.mount_of(file).stat(file.ino)
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let state = self.state.lock().unwrap();
        let resolved = state.resolve(path)?;
        let (_, mount, rel) = state.find_mount(&resolved);
        mount.mkdir(&rel, mode).map(|_| ())
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        let (_, mount, stat) = state.resolve_node(path)?;
        mount.rmdir(stat.ino)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        let resolved = state.resolve(path)?;
        let (_, mount, rel) = state.find_mount(&resolved);
        mount.unlink(&rel)
    }

    /// Remove a file or an empty directory, dispatching on the node kind.
    pub fn remove(&self, path: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        let resolved = state.resolve(path)?;
        let (_, mount, rel) = state.find_mount(&resolved);
        let stat = mount.lookup(&rel)?;
        if stat.is_dir() {
            mount.rmdir(stat.ino)
        } else {
            mount.unlink(&rel)
        }
    }

    /// Read up to `max` directory entries, advancing the descriptor's
    /// position by the number returned.
    pub fn getdents(&self, fd: i32, max: usize) -> Result<Vec<DirEntry>> {
        let mut state = self.state.lock().unwrap();
        let file = state.file(fd)?;
        if file.kind != NodeKind::Directory {
            return Err(VfsError::NotADirectory);
        }
        let (mount, ino, cookie) = (state.mount_of(file), file.ino, file.offset as usize);
        let entries = mount.read_dir(ino, cookie, max)?;
        state.file_mut(fd)?.offset += entries.len() as u64;
        Ok(entries)
    }

    pub fn fsync(&self, fd: i32) -> Result<()> {
        let state = self.state.lock().unwrap();
        let file = state.file(fd)?;
        state.mount_of(file).fsync(file.ino)
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let state = self.state.lock().unwrap();
        let (_, mount, stat) = state.resolve_node(path)?;
        mount.chmod(stat.ino, mode)
    }

    /// Duplicate a descriptor onto the lowest free slot ≥ 3. The new
    /// descriptor shares the open-file record, offset included.
    pub fn dup(&self, fd: i32) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        let idx = state.file_of(fd)?;
        let file = state.files.get_mut(idx).ok_or(VfsError::BadDescriptor)?;
        file.refs += 1;
        let (ino, mount_id) = (file.ino, file.mount_id);
        state
            .mounts
            .get(mount_id)
            .expect("descriptor references a dead mount")
            .mount
            .ref_node(ino);
        let newfd = state.fds.alloc(FdSlot { file: idx }) as i32;
        trace!(fd, newfd, "dup");
        Ok(newfd)
    }

    /// Duplicate `oldfd` onto `newfd`, closing `newfd` first if open.
    /// `dup2(fd, fd)` validates `fd` and is otherwise a no-op. Targets
    /// below 3 are reserved and rejected.
    pub fn dup2(&self, oldfd: i32, newfd: i32) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        let idx = state.file_of(oldfd)?;
        if oldfd == newfd {
            return Ok(newfd);
        }
        if newfd < FIRST_FD as i32 {
            return Err(VfsError::InvalidArgument);
        }
        if state.fds.get(newfd as usize).is_some() {
            state.release_fd(newfd)?;
        }
        let file = state.files.get_mut(idx).ok_or(VfsError::BadDescriptor)?;
        file.refs += 1;
        let (ino, mount_id) = (file.ino, file.mount_id);
        state
            .mounts
            .get(mount_id)
            .expect("descriptor references a dead mount")
            .mount
            .ref_node(ino);
        state.fds.insert_at(newfd as usize, FdSlot { file: idx });
        trace!(oldfd, newfd, "dup2");
        Ok(newfd)
    }

    /// Hard link within one mount. Linking across mounts is rejected.
    pub fn link(&self, existing: &str, new: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        let from = state.resolve(existing)?;
        let to = state.resolve(new)?;
        let (from_id, mount, from_rel) = state.find_mount(&from);
        let (to_id, _, to_rel) = state.find_mount(&to);
        if from_id != to_id {
            return Err(VfsError::InvalidArgument);
        }
        mount.link(&from_rel, &to_rel)
    }

    pub fn symlink(&self, target: &str, link: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        let resolved = state.resolve(link)?;
        let (_, mount, rel) = state.find_mount(&resolved);
        mount.symlink(&VfsPath::new(target), &rel)
    }

    /// Change the working directory; the target must be a directory.
    pub fn chdir(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let resolved = state.resolve(path)?;
        let (_, mount, rel) = state.find_mount(&resolved);
        let stat = mount.lookup(&rel)?;
        if !stat.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        state.cwd = resolved;
        Ok(())
    }

    pub fn getcwd(&self) -> String {
        self.state.lock().unwrap().cwd.to_string()
    }
}
