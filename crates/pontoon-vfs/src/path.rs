use std::fmt;

/// Normalized POSIX-style path.
///
/// Parsing discards `.` components and redundant separators and resolves
/// `..` by popping the previous component; popping past the top is a
/// no-op. A `VfsPath` is a pure value: all operations are side-effect
/// free, which is what makes mount-table lookups safe to repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsPath {
    components: Vec<String>,
    absolute: bool,
}

impl VfsPath {
    pub fn new(raw: &str) -> Self {
        let absolute = raw.starts_with('/');
        let mut components: Vec<String> = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                other => components.push(other.to_string()),
            }
        }
        Self {
            components,
            absolute,
        }
    }

    /// The literal root, `/`.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
            absolute: true,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn last(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Parent path (one component popped); the root's parent is the root.
    pub fn parent(&self) -> VfsPath {
        let mut components = self.components.clone();
        components.pop();
        VfsPath {
            components,
            absolute: self.absolute,
        }
    }

    /// Normalized concatenation. `other` is glued on with a separator and
    /// the result re-parsed, so an `other` that begins with `/` re-anchors
    /// the result at the root.
    pub fn join(&self, other: &str) -> VfsPath {
        VfsPath::new(&format!("{}/{}", self, other))
    }

    /// Component-wise prefix removal: the remainder of `self` under
    /// `base`, as an absolute path (`/` when they are equal). `None` when
    /// `base` is not a component prefix — `/usrx` is not under `/usr`.
    pub fn strip_prefix(&self, base: &VfsPath) -> Option<VfsPath> {
        if base.components.len() > self.components.len() {
            return None;
        }
        if self.components[..base.components.len()] != base.components[..] {
            return None;
        }
        Some(VfsPath {
            components: self.components[base.components.len()..].to_vec(),
            absolute: true,
        })
    }
}

impl fmt::Display for VfsPath {
    /// Canonical string: `""` for an empty relative path, `"/"` only for
    /// the literal root.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/{}", self.components.join("/"))
        } else {
            write!(f, "{}", self.components.join("/"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanity() {
        let p1 = VfsPath::new(".");
        assert!(!p1.is_absolute());
        assert_eq!(p1.to_string(), "");

        let p2 = VfsPath::new("/");
        assert!(p2.is_absolute());
        assert_eq!(p2.to_string(), "/");

        let p3 = p2.join("hello/world/");
        assert_eq!(p3.to_string(), "/hello/world");
    }

    #[test]
    fn test_split() {
        let p1 = VfsPath::new("/simple/splitter/test");
        assert_eq!(p1.components(), ["simple", "splitter", "test"]);

        let p2 = VfsPath::new("///simple//splitter///test/");
        assert_eq!(p2.components(), ["simple", "splitter", "test"]);

        let p3 = VfsPath::new("/sim/ple//spli/tter/te/st/");
        assert_eq!(p3.components().len(), 6);

        assert!(VfsPath::new("").components().is_empty());
        assert!(VfsPath::new("/").components().is_empty());
    }

    #[test]
    fn test_collapse_redundant_separators() {
        assert_eq!(VfsPath::new("///a//b///c/").to_string(), "/a/b/c");
    }

    #[test]
    fn test_join_and_display() {
        let mut p = VfsPath::new("/usr/local/hi/there");
        assert_eq!(p.to_string(), "/usr/local/hi/there");
        p = p.join("..");
        assert_eq!(p.to_string(), "/usr/local/hi");
        p = p.join(".././././hi/there/../.././././");
        assert_eq!(p.to_string(), "/usr/local");
        p = p.join("../../../../../../../../././../");
        assert_eq!(p.to_string(), "/");
        p = p.join("usr/lib/../bin/.././etc/../local/../share");
        assert_eq!(p.to_string(), "/usr/share");

        assert_eq!(VfsPath::new("./").to_string(), "");

        let mut p = VfsPath::new("/");
        assert_eq!(p.to_string(), "/");
        p = p.join("");
        assert_eq!(p.to_string(), "/");
        p = p.join("USR/local/SHARE");
        assert_eq!(p.to_string(), "/USR/local/SHARE");
        p = p.join("///////////////////////////////");
        assert_eq!(p.to_string(), "/USR/local/SHARE");
    }

    #[test]
    fn test_join_reanchors_on_absolute_operand() {
        let mut p = VfsPath::new("..");
        assert_eq!(p.to_string(), "");
        p = p.join("/node1/node3/../../node1/./");
        assert_eq!(p.to_string(), "/node1");
        p = p.join("node4/../../node1/./node5");
        assert_eq!(p.to_string(), "/node1/node5");

        assert_eq!(
            VfsPath::new("..").join("/x/y/../y/./z").to_string(),
            "/x/y/z"
        );
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for raw in [
            "///a//b///c/",
            "a/b/../c",
            "../../x",
            "/",
            "",
            ".",
            "/x/./y/../z",
            "relative/path/",
        ] {
            let once = VfsPath::new(raw).to_string();
            let twice = VfsPath::new(&once).to_string();
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_strip_prefix_respects_component_boundaries() {
        let usr = VfsPath::new("/usr");
        assert_eq!(
            VfsPath::new("/usr/lib/x").strip_prefix(&usr).unwrap().to_string(),
            "/lib/x"
        );
        assert_eq!(VfsPath::new("/usr").strip_prefix(&usr).unwrap().to_string(), "/");
        assert!(VfsPath::new("/usrx/lib").strip_prefix(&usr).is_none());
        assert!(VfsPath::new("/u").strip_prefix(&usr).is_none());

        // The root is a prefix of every absolute path.
        let root = VfsPath::root();
        assert_eq!(
            VfsPath::new("/a/b").strip_prefix(&root).unwrap().to_string(),
            "/a/b"
        );
    }

    #[test]
    fn test_parent_and_last() {
        let p = VfsPath::new("/a/b/c");
        assert_eq!(p.last(), Some("c"));
        assert_eq!(p.parent().to_string(), "/a/b");
        assert_eq!(VfsPath::root().parent().to_string(), "/");
        assert_eq!(VfsPath::root().last(), None);
    }
}
