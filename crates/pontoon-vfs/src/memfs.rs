use std::sync::Mutex;

use tracing::trace;

use crate::error::{Result, VfsError};
use crate::mount::Mount;
use crate::node::{DirEntry, FileStat, Ino, NodeKind};
use crate::path::VfsPath;
use crate::slot::SlotAllocator;

const ROOT_INO: Ino = 1;

#[derive(Debug)]
struct MemNode {
    name: String,
    parent: Ino,
    kind: NodeKind,
    mode: u32,
    data: Vec<u8>,
    /// Child inodes in insertion order. Empty for files.
    children: Vec<Ino>,
    /// Open-descriptor references held through the proxy.
    refs: u32,
    /// Name removed from the parent; reclaim on the last unref.
    unlinked: bool,
}

impl MemNode {
    fn new(name: &str, parent: Ino, kind: NodeKind, mode: u32) -> Self {
        Self {
            name: name.to_string(),
            parent,
            kind,
            mode,
            data: Vec::new(),
            children: Vec::new(),
            refs: 0,
            unlinked: false,
        }
    }

    fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    fn stat(&self, ino: Ino) -> FileStat {
        FileStat {
            ino,
            kind: self.kind,
            size: if self.is_dir() { 0 } else { self.data.len() as u64 },
            mode: self.mode,
        }
    }
}

struct MemFs {
    nodes: SlotAllocator<MemNode>,
}

impl MemFs {
    fn node(&self, ino: Ino) -> Result<&MemNode> {
        self.nodes.get(ino as usize).ok_or(VfsError::NotFound)
    }

    fn node_mut(&mut self, ino: Ino) -> Result<&mut MemNode> {
        self.nodes.get_mut(ino as usize).ok_or(VfsError::NotFound)
    }

    /// Walk an absolute mount-relative path from the root.
    fn resolve(&self, path: &VfsPath) -> Result<Ino> {
        let mut ino = ROOT_INO;
        for component in path.components() {
            let node = self.node(ino)?;
            if !node.is_dir() {
                return Err(VfsError::NotADirectory);
            }
            ino = self
                .child_by_name(node, component)
                .ok_or(VfsError::NotFound)?;
        }
        Ok(ino)
    }

    fn child_by_name(&self, dir: &MemNode, name: &str) -> Option<Ino> {
        dir.children
            .iter()
            .copied()
            .find(|&child| self.node(child).map(|n| n.name == name).unwrap_or(false))
    }

    /// Split a path into (existing parent dir, final name) for creation.
    fn resolve_parent<'p>(&self, path: &'p VfsPath) -> Result<(Ino, &'p str)> {
        let name = path.last().ok_or(VfsError::InvalidArgument)?;
        let parent = self.resolve(&path.parent())?;
        if !self.node(parent)?.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        Ok((parent, name))
    }

    fn insert_node(&mut self, parent: Ino, name: &str, kind: NodeKind, mode: u32) -> Result<Ino> {
        {
            let dir = self.node(parent)?;
            if self.child_by_name(dir, name).is_some() {
                return Err(VfsError::AlreadyExists);
            }
        }
        let ino = self.nodes.alloc(MemNode::new(name, parent, kind, mode)) as Ino;
        self.node_mut(parent)?.children.push(ino);
        Ok(ino)
    }

    /// Detach a node from its parent and reclaim it unless descriptors
    /// still reference it.
    fn detach(&mut self, ino: Ino) -> Result<()> {
        let parent = self.node(ino)?.parent;
        self.node_mut(parent)?.children.retain(|&c| c != ino);
        let node = self.node_mut(ino)?;
        node.unlinked = true;
        if node.refs == 0 {
            self.nodes.remove(ino as usize);
        }
        Ok(())
    }
}

/// In-memory backing store. Starts empty; nodes live in a slot arena
/// indexed by inode number, with the root directory at ino 1.
pub struct MemMount {
    inner: Mutex<MemFs>,
}

impl MemMount {
    pub fn new() -> Self {
        let mut nodes = SlotAllocator::with_base(ROOT_INO as usize);
        let root = nodes.alloc(MemNode::new("/", ROOT_INO, NodeKind::Directory, 0o777));
        debug_assert_eq!(root as Ino, ROOT_INO);
        Self {
            inner: Mutex::new(MemFs { nodes }),
        }
    }
}

impl Default for MemMount {
    fn default() -> Self {
        Self::new()
    }
}

impl Mount for MemMount {
    fn lookup(&self, path: &VfsPath) -> Result<FileStat> {
        let fs = self.inner.lock().unwrap();
        let ino = fs.resolve(path)?;
        Ok(fs.node(ino)?.stat(ino))
    }

    fn stat(&self, ino: Ino) -> Result<FileStat> {
        let fs = self.inner.lock().unwrap();
        Ok(fs.node(ino)?.stat(ino))
    }

    fn create(&self, path: &VfsPath, mode: u32) -> Result<FileStat> {
        let mut fs = self.inner.lock().unwrap();
        let (parent, name) = fs.resolve_parent(path)?;
        let ino = fs.insert_node(parent, name, NodeKind::File, mode)?;
        trace!(%path, ino, "created file");
        Ok(fs.node(ino)?.stat(ino))
    }

    fn mkdir(&self, path: &VfsPath, mode: u32) -> Result<FileStat> {
        let mut fs = self.inner.lock().unwrap();
        let (parent, name) = fs.resolve_parent(path)?;
        let ino = fs.insert_node(parent, name, NodeKind::Directory, mode)?;
        trace!(%path, ino, "created directory");
        Ok(fs.node(ino)?.stat(ino))
    }

    fn unlink(&self, path: &VfsPath) -> Result<()> {
        let mut fs = self.inner.lock().unwrap();
        let ino = fs.resolve(path)?;
        if fs.node(ino)?.is_dir() {
            return Err(VfsError::IsADirectory);
        }
        fs.detach(ino)
    }

    fn rmdir(&self, ino: Ino) -> Result<()> {
        let mut fs = self.inner.lock().unwrap();
        if ino == ROOT_INO {
            return Err(VfsError::InvalidArgument);
        }
        let node = fs.node(ino)?;
        if !node.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        if !node.children.is_empty() {
            return Err(VfsError::NotEmpty);
        }
        fs.detach(ino)
    }

    fn chmod(&self, ino: Ino, mode: u32) -> Result<()> {
        let mut fs = self.inner.lock().unwrap();
        fs.node_mut(ino)?.mode = mode;
        Ok(())
    }

    fn fsync(&self, ino: Ino) -> Result<()> {
        // Nothing to flush; validate the node all the same.
        let fs = self.inner.lock().unwrap();
        fs.node(ino).map(|_| ())
    }

    fn truncate(&self, ino: Ino) -> Result<()> {
        let mut fs = self.inner.lock().unwrap();
        let node = fs.node_mut(ino)?;
        if node.is_dir() {
            return Err(VfsError::IsADirectory);
        }
        node.data.clear();
        Ok(())
    }

    fn read(&self, ino: Ino, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let fs = self.inner.lock().unwrap();
        let node = fs.node(ino)?;
        if node.is_dir() {
            return Err(VfsError::IsADirectory);
        }
        let offset = offset as usize;
        if offset >= node.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(node.data.len() - offset);
        buf[..n].copy_from_slice(&node.data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, ino: Ino, offset: u64, data: &[u8]) -> Result<usize> {
        let mut fs = self.inner.lock().unwrap();
        let node = fs.node_mut(ino)?;
        if node.is_dir() {
            return Err(VfsError::IsADirectory);
        }
        let offset = offset as usize;
        let end = offset + data.len();
        if node.data.len() < end {
            // Writes past the end zero-fill the gap.
            node.data.resize(end, 0);
        }
        node.data[offset..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn read_dir(&self, ino: Ino, cookie: usize, max: usize) -> Result<Vec<DirEntry>> {
        let fs = self.inner.lock().unwrap();
        let node = fs.node(ino)?;
        if !node.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        let entries = node
            .children
            .iter()
            .skip(cookie)
            .take(max)
            .filter_map(|&child| {
                fs.node(child).ok().map(|n| DirEntry {
                    ino: child,
                    name: n.name.clone(),
                    kind: n.kind,
                })
            })
            .collect();
        Ok(entries)
    }

    fn ref_node(&self, ino: Ino) {
        let mut fs = self.inner.lock().unwrap();
        if let Ok(node) = fs.node_mut(ino) {
            node.refs += 1;
        }
    }

    fn unref_node(&self, ino: Ino) {
        let mut fs = self.inner.lock().unwrap();
        let reclaim = match fs.node_mut(ino) {
            Ok(node) => {
                debug_assert!(node.refs > 0, "unref of an unreferenced node");
                node.refs -= 1;
                node.refs == 0 && node.unlinked
            }
            Err(_) => false,
        };
        if reclaim {
            fs.nodes.remove(ino as usize);
            trace!(ino, "reclaimed unlinked node");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> VfsPath {
        VfsPath::new(raw)
    }

    #[test]
    fn test_root_resolves() {
        let fs = MemMount::new();
        let st = fs.lookup(&path("/")).unwrap();
        assert_eq!(st.ino, ROOT_INO);
        assert!(st.is_dir());
    }

    #[test]
    fn test_create_and_lookup() {
        let fs = MemMount::new();
        let st = fs.create(&path("/hello"), 0o644).unwrap();
        assert_eq!(st.kind, NodeKind::File);
        assert_eq!(st.size, 0);
        assert_eq!(fs.lookup(&path("/hello")).unwrap().ino, st.ino);
        assert_eq!(fs.create(&path("/hello"), 0o644), Err(VfsError::AlreadyExists));
        assert_eq!(fs.lookup(&path("/missing")), Err(VfsError::NotFound));
    }

    #[test]
    fn test_create_in_missing_parent() {
        let fs = MemMount::new();
        assert_eq!(fs.create(&path("/no/file"), 0o644), Err(VfsError::NotFound));
    }

    #[test]
    fn test_create_under_a_file_parent() {
        let fs = MemMount::new();
        fs.create(&path("/f"), 0o644).unwrap();
        assert_eq!(fs.create(&path("/f/x"), 0o644), Err(VfsError::NotADirectory));
    }

    #[test]
    fn test_mkdir_rmdir_cycle() {
        let fs = MemMount::new();
        let dir = fs.mkdir(&path("/d"), 0o755).unwrap();
        assert_eq!(fs.mkdir(&path("/d"), 0o755), Err(VfsError::AlreadyExists));

        fs.create(&path("/d/f"), 0o644).unwrap();
        assert_eq!(fs.rmdir(dir.ino), Err(VfsError::NotEmpty));

        fs.unlink(&path("/d/f")).unwrap();
        fs.rmdir(dir.ino).unwrap();
        assert_eq!(fs.lookup(&path("/d")), Err(VfsError::NotFound));
    }

    #[test]
    fn test_rmdir_guards() {
        let fs = MemMount::new();
        let f = fs.create(&path("/f"), 0o644).unwrap();
        assert_eq!(fs.rmdir(f.ino), Err(VfsError::NotADirectory));
        assert_eq!(fs.rmdir(ROOT_INO), Err(VfsError::InvalidArgument));
        assert_eq!(fs.unlink(&path("/nope")), Err(VfsError::NotFound));
    }

    #[test]
    fn test_read_write_with_gap_fill() {
        let fs = MemMount::new();
        let st = fs.create(&path("/data"), 0o644).unwrap();
        assert_eq!(fs.write(st.ino, 0, b"abc").unwrap(), 3);
        assert_eq!(fs.write(st.ino, 5, b"xy").unwrap(), 2);
        assert_eq!(fs.stat(st.ino).unwrap().size, 7);

        let mut buf = [0u8; 16];
        let n = fs.read(st.ino, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc\0\0xy");
        assert_eq!(fs.read(st.ino, 100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_dir_insertion_order() {
        let fs = MemMount::new();
        fs.create(&path("/b"), 0o644).unwrap();
        fs.mkdir(&path("/a"), 0o755).unwrap();
        fs.create(&path("/c"), 0o644).unwrap();

        let entries = fs.read_dir(ROOT_INO, 0, 16).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["b", "a", "c"]);

        // Cookie continues mid-listing.
        let tail = fs.read_dir(ROOT_INO, 1, 16).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].name, "a");
        assert_eq!(tail[0].kind, NodeKind::Directory);
    }

    #[test]
    fn test_unlinked_node_survives_open_refs() {
        let fs = MemMount::new();
        let st = fs.create(&path("/tmpfile"), 0o644).unwrap();
        fs.write(st.ino, 0, b"still here").unwrap();

        fs.ref_node(st.ino);
        fs.unlink(&path("/tmpfile")).unwrap();

        // Name is gone, node is not.
        assert_eq!(fs.lookup(&path("/tmpfile")), Err(VfsError::NotFound));
        let mut buf = [0u8; 10];
        assert_eq!(fs.read(st.ino, 0, &mut buf).unwrap(), 10);

        fs.unref_node(st.ino);
        assert_eq!(fs.stat(st.ino), Err(VfsError::NotFound));
    }

    #[test]
    fn test_truncate() {
        let fs = MemMount::new();
        let st = fs.create(&path("/t"), 0o644).unwrap();
        fs.write(st.ino, 0, b"contents").unwrap();
        fs.truncate(st.ino).unwrap();
        assert_eq!(fs.stat(st.ino).unwrap().size, 0);
        assert_eq!(fs.truncate(ROOT_INO), Err(VfsError::IsADirectory));
    }
}
