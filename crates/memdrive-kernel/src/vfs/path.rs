//! Path parsing and tree walking.
//!
//! Paths are absolute. Both `/` and `\` separate components, empty
//! components and `.` are skipped, and `..` steps up (clamped at the root).
//! Normalization is lexical: `..` is applied before the walk starts.

use super::error::{VfsError, VfsResult};
use super::node::NodeId;
use super::store::NodeStore;

/// Either separator is accepted on input.
pub const SEPARATORS: [char; 2] = ['/', '\\'];

/// Stateless resolver from path strings to node ids.
pub struct PathResolver;

impl PathResolver {
    /// Split an absolute path into normalized components.
    ///
    /// The bare root yields an empty list.
    pub fn split(path: &str) -> VfsResult<Vec<&str>> {
        if !path.starts_with(SEPARATORS) {
            return Err(VfsError::invalid_argument(format!(
                "path must be absolute: {path:?}"
            )));
        }
        let mut parts: Vec<&str> = Vec::new();
        for component in path.split(SEPARATORS) {
            match component {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                name => {
                    if name.contains('\0') {
                        return Err(VfsError::invalid_argument(format!(
                            "NUL in path component: {path:?}"
                        )));
                    }
                    parts.push(name);
                }
            }
        }
        Ok(parts)
    }

    /// Check a single leaf name for create and rename.
    pub fn validate_name(name: &str) -> VfsResult<()> {
        if name.is_empty() {
            return Err(VfsError::invalid_argument("empty name"));
        }
        if name == "." || name == ".." {
            return Err(VfsError::invalid_argument(format!("reserved name {name:?}")));
        }
        if name.contains(SEPARATORS) || name.contains('\0') {
            return Err(VfsError::invalid_argument(format!(
                "name contains a separator or NUL: {name:?}"
            )));
        }
        Ok(())
    }

    /// Resolve `path` to a node.
    pub fn resolve(store: &NodeStore, path: &str) -> VfsResult<NodeId> {
        let parts = Self::split(path)?;
        Self::walk(store, path, &parts)
    }

    /// Resolve everything but the last component; returns the parent
    /// directory and the leaf name.
    pub fn resolve_parent(store: &NodeStore, path: &str) -> VfsResult<(NodeId, String)> {
        let parts = Self::split(path)?;
        let Some((leaf, dirs)) = parts.split_last() else {
            return Err(VfsError::invalid_argument("the root has no parent"));
        };
        Self::validate_name(leaf)?;
        let parent = Self::walk(store, path, dirs)?;
        if !store.node(parent)?.is_dir() {
            return Err(VfsError::not_a_directory(path));
        }
        Ok((parent, (*leaf).to_string()))
    }

    /// Resolve `path` expecting a directory.
    ///
    /// If `path` names a directory it is returned. Otherwise, including when
    /// the leaf does not exist yet, this falls back to the parent directory.
    pub fn resolve_as_directory(store: &NodeStore, path: &str) -> VfsResult<NodeId> {
        match Self::resolve(store, path) {
            Ok(id) => {
                if store.node(id)?.is_dir() {
                    Ok(id)
                } else {
                    Ok(Self::resolve_parent(store, path)?.0)
                }
            }
            Err(VfsError::NotFound(_)) => Ok(Self::resolve_parent(store, path)?.0),
            Err(e) => Err(e),
        }
    }

    fn walk(store: &NodeStore, path: &str, parts: &[&str]) -> VfsResult<NodeId> {
        let mut cur = store.root();
        for part in parts {
            let node = store.node(cur)?;
            if !node.is_dir() {
                return Err(VfsError::not_a_directory(path));
            }
            cur = store
                .find_child_by_name(cur, part)
                .ok_or_else(|| VfsError::not_found(path))?;
        }
        Ok(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::node::{FileBuffer, VNode};

    fn tree() -> (NodeStore, NodeId, NodeId) {
        let mut store = NodeStore::new(true);
        let docs = store.insert(VNode::directory("docs"));
        store.add_child(store.root(), docs).unwrap();
        let readme = store.insert(VNode::file("readme.txt", FileBuffer::new()));
        store.add_child(docs, readme).unwrap();
        (store, docs, readme)
    }

    #[test]
    fn test_split_normalizes() {
        assert!(PathResolver::split("/").unwrap().is_empty());
        assert!(PathResolver::split("\\").unwrap().is_empty());
        assert_eq!(
            PathResolver::split("/a//b/./c").unwrap(),
            vec!["a", "b", "c"]
        );
        assert_eq!(PathResolver::split("\\a\\b/../c").unwrap(), vec!["a", "c"]);
        assert!(PathResolver::split("/../..").unwrap().is_empty());
    }

    #[test]
    fn test_relative_path_rejected() {
        assert!(matches!(
            PathResolver::split("docs/readme.txt"),
            Err(VfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            PathResolver::split(""),
            Err(VfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_resolve() {
        let (store, docs, readme) = tree();
        assert_eq!(PathResolver::resolve(&store, "/").unwrap(), store.root());
        assert_eq!(PathResolver::resolve(&store, "/docs").unwrap(), docs);
        assert_eq!(
            PathResolver::resolve(&store, "\\docs\\readme.txt").unwrap(),
            readme
        );
        assert!(matches!(
            PathResolver::resolve(&store, "/nope/readme.txt"),
            Err(VfsError::NotFound(_))
        ));
        assert!(matches!(
            PathResolver::resolve(&store, "/docs/readme.txt/deeper"),
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_resolve_parent() {
        let (store, docs, _) = tree();
        let (parent, leaf) = PathResolver::resolve_parent(&store, "/docs/new.txt").unwrap();
        assert_eq!(parent, docs);
        assert_eq!(leaf, "new.txt");

        assert!(matches!(
            PathResolver::resolve_parent(&store, "/"),
            Err(VfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            PathResolver::resolve_parent(&store, "/missing/new.txt"),
            Err(VfsError::NotFound(_))
        ));
        assert!(matches!(
            PathResolver::resolve_parent(&store, "/docs/readme.txt/x"),
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_resolve_as_directory_falls_back() {
        let (store, docs, _) = tree();
        assert_eq!(
            PathResolver::resolve_as_directory(&store, "/docs").unwrap(),
            docs
        );
        assert_eq!(
            PathResolver::resolve_as_directory(&store, "/docs/not-yet").unwrap(),
            docs
        );
        assert_eq!(
            PathResolver::resolve_as_directory(&store, "/docs/readme.txt").unwrap(),
            docs
        );
    }

    #[test]
    fn test_validate_name() {
        assert!(PathResolver::validate_name("ok.txt").is_ok());
        assert!(PathResolver::validate_name("").is_err());
        assert!(PathResolver::validate_name("..").is_err());
        assert!(PathResolver::validate_name("a/b").is_err());
        assert!(PathResolver::validate_name("a\\b").is_err());
    }
}
