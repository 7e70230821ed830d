/// Inode number, unique within its owning mount. `0` is never valid.
pub type Ino = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Stat-like record a mount populates for one of its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub ino: Ino,
    pub kind: NodeKind,
    pub size: u64,
    pub mode: u32,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// `st_mode`-style bits combining the kind and permission mode.
    pub fn mode_bits(&self) -> u32 {
        let kind = match self.kind {
            NodeKind::File => libc::S_IFREG,
            NodeKind::Directory => libc::S_IFDIR,
        };
        kind as u32 | self.mode
    }
}

/// One directory-listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: Ino,
    pub name: String,
    pub kind: NodeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bits() {
        let st = FileStat {
            ino: 1,
            kind: NodeKind::Directory,
            size: 0,
            mode: 0o755,
        };
        assert!(st.is_dir());
        assert_eq!(st.mode_bits() & libc::S_IFMT as u32, libc::S_IFDIR as u32);
        assert_eq!(st.mode_bits() & 0o777, 0o755);
    }
}
