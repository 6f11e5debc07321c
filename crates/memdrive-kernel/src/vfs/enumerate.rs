//! Restartable directory listing.
//!
//! A [`DirectoryEnumerator`] is the per-session cursor a dispatcher keeps for
//! one open directory. Each call to [`DirectoryEnumerator::next_child`]
//! yields at most one child id.
//!
//! Two modes:
//! - exact: the mask has no `*` or `?`. Only the first call can produce an
//!   entry (a name lookup); every later call reports nothing until restart.
//! - wildcard: children are walked in insertion order, skipping names the
//!   mask does not match.
//!
//! The cursor is a live view: it holds (directory, index), so children added
//! or removed between calls shift what the next call sees.

use strum::Display;
use tracing::trace;

use super::node::NodeId;
use super::store::NodeStore;

/// Lifecycle of an enumeration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EnumerationState {
    #[default]
    Uninitialized,
    Active,
    Closed,
}

/// Position of an active listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationCursor {
    pub dir: NodeId,
    pub index: usize,
    pub exact: bool,
    pub mask: Option<String>,
}

/// Per-session enumeration state.
#[derive(Debug, Default)]
pub struct DirectoryEnumerator {
    cursor: Option<EnumerationCursor>,
    state: EnumerationState,
}

impl DirectoryEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EnumerationState {
        self.state
    }

    pub fn cursor(&self) -> Option<&EnumerationCursor> {
        self.cursor.as_ref()
    }

    /// Release the cursor. The next call starts over.
    pub fn close(&mut self) {
        self.cursor = None;
        self.state = EnumerationState::Closed;
    }

    /// Produce the next child of `dir` for this request, if any.
    pub fn next_child(
        &mut self,
        store: &NodeStore,
        dir: NodeId,
        mask: Option<&str>,
        restart: bool,
    ) -> Option<NodeId> {
        // Decide the mode from the request before looking at any stored cursor.
        let exact = is_exact_mask(mask);
        let reset = restart
            || match &self.cursor {
                None => true,
                Some(c) => c.exact != exact || c.dir != dir,
            };
        if reset {
            trace!(%dir, exact, restart, "enumeration cursor reset");
            self.cursor = Some(EnumerationCursor {
                dir,
                index: 0,
                exact,
                mask: mask.map(str::to_string),
            });
            self.state = EnumerationState::Active;
        }
        let cursor = self.cursor.as_mut()?;

        if cursor.exact {
            let found = match (cursor.index, cursor.mask.as_deref()) {
                (0, Some(name)) => store.find_child_by_name(dir, name),
                _ => None,
            };
            cursor.index += 1;
            return found;
        }

        loop {
            let child = store.find_child_by_index(dir, cursor.index)?;
            cursor.index += 1;
            let Some(node) = store.get(child) else {
                continue;
            };
            let matched = match cursor.mask.as_deref() {
                None => true,
                Some(mask) => mask_matches(
                    &store.fold_name(mask),
                    &store.fold_name(node.name()),
                ),
            };
            if matched {
                return Some(child);
            }
        }
    }
}

/// Returns true if `mask` names one entry rather than a pattern.
pub fn is_exact_mask(mask: Option<&str>) -> bool {
    match mask {
        None => false,
        Some(m) => !m.is_empty() && !m.contains(['*', '?']),
    }
}

/// Match `name` against a `*`/`?` mask. `*` and `*.*` match everything,
/// including names without a dot.
pub fn mask_matches(mask: &str, name: &str) -> bool {
    if mask.is_empty() || mask == "*" || mask == "*.*" {
        return true;
    }
    let pattern: Vec<char> = mask.chars().collect();
    let input: Vec<char> = name.chars().collect();

    let (mut p, mut i) = (0, 0);
    // Position of the last `*` and the input index it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;
    while i < input.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, i));
                p += 1;
            }
            Some('?') => {
                p += 1;
                i += 1;
            }
            Some(&c) if c == input[i] => {
                p += 1;
                i += 1;
            }
            _ => match star {
                Some((sp, si)) => {
                    p = sp + 1;
                    i = si + 1;
                    star = Some((sp, si + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::node::{FileBuffer, VNode};

    fn dir_with(names: &[&str]) -> (NodeStore, NodeId) {
        let mut store = NodeStore::new(true);
        let root = store.root();
        for name in names {
            let id = store.insert(VNode::file(*name, FileBuffer::new()));
            store.add_child(root, id).unwrap();
        }
        (store, root)
    }

    fn names(store: &NodeStore, e: &mut DirectoryEnumerator, dir: NodeId, mask: Option<&str>) -> Vec<String> {
        let mut out = Vec::new();
        let mut restart = true;
        while let Some(id) = e.next_child(store, dir, mask, restart) {
            out.push(store.get(id).unwrap().name().to_string());
            restart = false;
        }
        out
    }

    #[test]
    fn test_mask_matching() {
        assert!(mask_matches("*", "anything"));
        assert!(mask_matches("*.*", "no_dot"));
        assert!(mask_matches("*.txt", "notes.txt"));
        assert!(!mask_matches("*.txt", "notes.txt.bak"));
        assert!(mask_matches("a?c", "abc"));
        assert!(!mask_matches("a?c", "ac"));
        assert!(mask_matches("*b*", "abc"));
        assert!(mask_matches("a*b*c", "aXbYbZc"));
        assert!(!mask_matches("a*b*c", "aXbYbZ"));
    }

    #[test]
    fn test_exact_mask_detection() {
        assert!(is_exact_mask(Some("foo.txt")));
        assert!(!is_exact_mask(Some("*.txt")));
        assert!(!is_exact_mask(Some("fo?")));
        assert!(!is_exact_mask(Some("")));
        assert!(!is_exact_mask(None));
    }

    #[test]
    fn test_wildcard_listing_in_order() {
        let (store, root) = dir_with(&["a.txt", "b.rs", "c.txt"]);
        let mut e = DirectoryEnumerator::new();
        assert_eq!(names(&store, &mut e, root, None), ["a.txt", "b.rs", "c.txt"]);
        assert_eq!(names(&store, &mut e, root, Some("*.txt")), ["a.txt", "c.txt"]);
        assert_eq!(e.state(), EnumerationState::Active);
    }

    #[test]
    fn test_exact_one_shot() {
        let (store, root) = dir_with(&["foo.txt", "bar.txt"]);
        let mut e = DirectoryEnumerator::new();
        assert!(e.next_child(&store, root, Some("foo.txt"), false).is_some());
        assert!(e.next_child(&store, root, Some("foo.txt"), false).is_none());
        assert!(e.next_child(&store, root, Some("foo.txt"), false).is_none());
        assert!(e.next_child(&store, root, Some("foo.txt"), true).is_some());
    }

    #[test]
    fn test_mode_switch_resets_cursor() {
        let (store, root) = dir_with(&["foo.txt", "bar.txt"]);
        let mut e = DirectoryEnumerator::new();
        e.next_child(&store, root, None, true);
        e.next_child(&store, root, None, false);
        // An exact request against a wildcard cursor starts a fresh lookup.
        let hit = e.next_child(&store, root, Some("foo.txt"), false);
        assert_eq!(hit, store.find_child_by_name(root, "foo.txt"));
        assert!(e.cursor().unwrap().exact);
    }

    #[test]
    fn test_close_returns_to_start() {
        let (store, root) = dir_with(&["x", "y"]);
        let mut e = DirectoryEnumerator::new();
        assert_eq!(e.state(), EnumerationState::Uninitialized);
        let first = e.next_child(&store, root, None, false);
        e.close();
        assert_eq!(e.state(), EnumerationState::Closed);
        assert!(e.cursor().is_none());
        assert_eq!(e.next_child(&store, root, None, false), first);
    }
}
