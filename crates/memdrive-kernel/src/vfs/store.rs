//! Arena that owns every node of one drive.
//!
//! All structural mutation goes through here so that each node other than the
//! root has exactly one parent and appears in exactly one child list.

use std::borrow::Cow;
use std::collections::HashMap;

use super::error::{VfsError, VfsResult};
use super::node::{NodeId, VNode};

/// Owner of the node graph.
#[derive(Debug)]
pub struct NodeStore {
    nodes: HashMap<NodeId, VNode>,
    next_id: u64,
    case_sensitive: bool,
}

impl NodeStore {
    /// Create a store holding only the root directory.
    pub fn new(case_sensitive: bool) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::ROOT, VNode::directory(""));
        Self {
            nodes,
            next_id: NodeId::ROOT.0 + 1,
            case_sensitive,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the store holds no nodes, which cannot happen while
    /// the root is live.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Key used for sibling-name comparison under the store's case policy.
    pub fn fold_name<'a>(&self, name: &'a str) -> Cow<'a, str> {
        if self.case_sensitive {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(name.to_lowercase())
        }
    }

    pub fn names_equal(&self, a: &str, b: &str) -> bool {
        self.fold_name(a) == self.fold_name(b)
    }

    pub fn get(&self, id: NodeId) -> Option<&VNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut VNode> {
        self.nodes.get_mut(&id)
    }

    /// Like [`get`](Self::get) but a missing id is a `NotFound` error.
    pub fn node(&self, id: NodeId) -> VfsResult<&VNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| VfsError::not_found(format!("node {id}")))
    }

    pub fn node_mut(&mut self, id: NodeId) -> VfsResult<&mut VNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| VfsError::not_found(format!("node {id}")))
    }

    /// Take ownership of a detached node and assign it an id.
    pub fn insert(&mut self, mut node: VNode) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        node.parent = None;
        self.nodes.insert(id, node);
        id
    }

    /// Append `child` to `parent`'s children.
    ///
    /// Callers check for collisions before calling; a collision here is
    /// still reported as `AlreadyExists` rather than corrupting the index.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> VfsResult<()> {
        let (name, attached) = {
            let node = self.node(child)?;
            (node.name.clone(), node.parent.is_some())
        };
        if attached {
            return Err(VfsError::invalid_argument(format!(
                "node {child} already has a parent"
            )));
        }
        let key = self.fold_name(&name).into_owned();
        let dir = self.node_mut(parent)?;
        let children = dir
            .children_mut()
            .ok_or_else(|| VfsError::not_a_directory(format!("node {parent}")))?;
        if children.index.contains_key(&key) {
            return Err(VfsError::already_exists(name));
        }
        children.index.insert(key, child);
        children.order.push(child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Detach `child` from its parent. Descendants are left alone.
    pub fn remove_child(&mut self, child: NodeId) -> VfsResult<()> {
        let (name, parent) = {
            let node = self.node(child)?;
            (node.name.clone(), node.parent)
        };
        let Some(parent) = parent else {
            return Err(VfsError::invalid_argument(format!(
                "node {child} has no parent"
            )));
        };
        let key = self.fold_name(&name).into_owned();
        if let Some(children) = self.node_mut(parent)?.children_mut() {
            children.index.remove(&key);
            children.order.retain(|&c| c != child);
        }
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    /// Detach `id` and drop it together with all of its descendants.
    /// Returns the number of nodes dropped.
    pub fn destroy(&mut self, id: NodeId) -> VfsResult<usize> {
        if id.is_root() {
            return Err(VfsError::invalid_argument("cannot destroy the root"));
        }
        if self.node(id)?.parent.is_some() {
            self.remove_child(id)?;
        }
        let mut doomed = self.descendants(id);
        doomed.push(id);
        for node in &doomed {
            self.nodes.remove(node);
        }
        Ok(doomed.len())
    }

    /// Reparent and rename `id` in one step.
    ///
    /// The destination name is checked first so a failure leaves the tree as
    /// it was. Moving a node onto its own name (a case-only change under a
    /// case-insensitive store) is allowed.
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId, new_name: &str) -> VfsResult<()> {
        if id.is_root() {
            return Err(VfsError::invalid_argument("cannot move the root"));
        }
        if id == new_parent || self.is_ancestor(id, new_parent) {
            return Err(VfsError::invalid_argument(format!(
                "cannot move node {id} into its own subtree"
            )));
        }
        if !self.node(new_parent)?.is_dir() {
            return Err(VfsError::not_a_directory(format!("node {new_parent}")));
        }
        if let Some(existing) = self.find_child_by_name(new_parent, new_name) {
            if existing != id {
                return Err(VfsError::already_exists(new_name));
            }
        }
        self.remove_child(id)?;
        self.node_mut(id)?.name = new_name.to_string();
        self.add_child(new_parent, id)
    }

    /// Look up a direct child by name under the store's case policy.
    pub fn find_child_by_name(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        let children = self.get(dir)?.children()?;
        children.index.get(&*self.fold_name(name)).copied()
    }

    /// The `index`-th child in insertion order.
    pub fn find_child_by_index(&self, dir: NodeId, index: usize) -> Option<NodeId> {
        self.get(dir)?.children()?.get(index)
    }

    pub fn child_count(&self, dir: NodeId) -> VfsResult<usize> {
        let node = self.node(dir)?;
        node.children()
            .map(|c| c.len())
            .ok_or_else(|| VfsError::not_a_directory(node.name.clone()))
    }

    /// Returns true if `dir` has no children.
    pub fn is_directory_empty(&self, dir: NodeId) -> VfsResult<bool> {
        Ok(self.child_count(dir)? == 0)
    }

    /// Returns true if `ancestor` lies strictly above `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = self.get(id).and_then(|n| n.parent);
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.get(p).and_then(|n| n.parent);
        }
        false
    }

    /// Every node below `id`, parents before children.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(children) = self.get(cur).and_then(|n| n.children()) {
                for &child in children.ids().iter().rev() {
                    out.push(child);
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Absolute path of `id`, rebuilt from parent links.
    pub fn path_of(&self, id: NodeId, separator: char) -> VfsResult<String> {
        let mut parts = Vec::new();
        let mut cur = id;
        loop {
            let node = self.node(cur)?;
            match node.parent {
                Some(parent) => {
                    parts.push(node.name.as_str());
                    cur = parent;
                }
                None if cur.is_root() => break,
                None => {
                    return Err(VfsError::not_found(format!("node {id} is detached")));
                }
            }
        }
        if parts.is_empty() {
            return Ok(separator.to_string());
        }
        let mut path = String::new();
        for part in parts.iter().rev() {
            path.push(separator);
            path.push_str(part);
        }
        Ok(path)
    }

    /// Space used below `dir`: each file's allocation rounded up to `sector`.
    pub fn folder_size(&self, dir: NodeId, sector: u64) -> u64 {
        let sector = sector.max(1);
        self.descendants(dir)
            .into_iter()
            .filter_map(|id| self.get(id))
            .map(|n| n.allocation_size().div_ceil(sector) * sector)
            .sum()
    }
}
