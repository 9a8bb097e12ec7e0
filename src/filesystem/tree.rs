use std::collections::HashMap;
use std::time::SystemTime;

use tracing::debug;

use crate::filesystem::error::{
    AlreadyExistsSnafu, CorruptedSnafu, NotADirectorySnafu, NotFoundSnafu, TreeResult,
};
use crate::filesystem::node::{AttachError, Node, NodeBody, NodeId, validate_name};
use crate::filesystem::path::TreePath;

/// Arena holding every node of one tree.
///
/// Ownership is expressed through the directories' child maps: a node is live
/// exactly as long as some directory (or the root slot) points at it. The
/// `parent` field on each node is navigation only and is never used to free
/// anything.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::ROOT, Node::root());
        Self { nodes, next_id: 1 }
    }

    pub(crate) fn with_root_times(created_at: SystemTime, modified_at: SystemTime) -> Self {
        let mut tree = Self::new();
        if let Some(root) = tree.nodes.remove(&NodeId::ROOT) {
            tree.nodes
                .insert(NodeId::ROOT, root.with_times(created_at, modified_at));
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // The root is always present.
        self.nodes.len() == 1
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Creates a node under `parent`. `at` is the new node's full path and is
    /// only used for error messages.
    pub(crate) fn attach_new(
        &mut self,
        parent: NodeId,
        name: &str,
        body: NodeBody,
        at: &TreePath,
    ) -> TreeResult<NodeId> {
        validate_name(name)?;
        let id = self.allocate_id();
        self.link(parent, id, name, at)?;
        self.nodes
            .insert(id, Node::new(id, name.to_string(), Some(parent), body));
        Ok(id)
    }

    /// Inserts the `parent -> name -> child` edge.
    fn link(&mut self, parent: NodeId, child: NodeId, name: &str, at: &TreePath) -> TreeResult<()> {
        let Some(parent_node) = self.nodes.get_mut(&parent) else {
            return NotFoundSnafu {
                path: parent_display(at),
            }
            .fail();
        };

        match parent_node.attach_child(name.to_string(), child) {
            Ok(()) => Ok(()),
            Err(AttachError::DuplicateChild { .. }) => AlreadyExistsSnafu {
                path: at.to_string(),
            }
            .fail(),
            Err(AttachError::NotADirectory) => NotADirectorySnafu {
                path: parent_display(at),
            }
            .fail(),
        }
    }

    /// Removes the `parent -> name` edge and returns the detached subtree root.
    /// The subtree stays in the arena until it is destroyed or re-attached.
    pub(crate) fn detach(&mut self, parent: NodeId, name: &str) -> Option<NodeId> {
        let child = self.nodes.get_mut(&parent)?.detach_child(name)?;
        if let Some(node) = self.nodes.get_mut(&child) {
            node.set_parent(None);
        }
        Some(child)
    }

    /// Attaches a detached subtree under `new_parent` as `new_name`.
    pub(crate) fn reattach(
        &mut self,
        id: NodeId,
        new_parent: NodeId,
        new_name: &str,
        at: &TreePath,
    ) -> TreeResult<()> {
        validate_name(new_name)?;
        self.link(new_parent, id, new_name, at)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.set_parent(Some(new_parent));
            node.set_name(new_name.to_string());
        }
        Ok(())
    }

    /// Drops a detached subtree from the arena and returns how many nodes went away.
    pub(crate) fn destroy(&mut self, id: NodeId) -> usize {
        let mut pending = vec![id];
        let mut removed = 0;

        while let Some(current) = pending.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            removed += 1;
            if let Some(children) = node.children() {
                pending.extend(children.values().copied());
            }
        }

        debug!("Destroyed {} nodes under {}", removed, id);
        removed
    }

    /// True when `ancestor` is `node` itself or lies on its parent chain.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(Node::parent);
        }
        false
    }

    /// Rebuilds a node's path by following parent links.
    pub fn path_of(&self, id: NodeId) -> Option<TreePath> {
        let mut names = Vec::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(parent) = current.parent() {
            names.push(current.name().to_string());
            current = self.nodes.get(&parent)?;
        }
        if !current.id().is_root() {
            return None;
        }

        Some(
            names
                .iter()
                .rev()
                .fold(TreePath::root(), |path, name| path.join(name)),
        )
    }

    pub(crate) fn touch(&mut self, ids: &[NodeId], now: SystemTime) {
        for id in ids {
            if let Some(node) = self.nodes.get_mut(id) {
                node.touch(now);
            }
        }
    }

    /// Checks every structural invariant of the tree.
    pub fn verify(&self) -> TreeResult<()> {
        let Some(root) = self.nodes.get(&NodeId::ROOT) else {
            return CorruptedSnafu {
                detail: "root node is missing",
            }
            .fail();
        };
        if root.parent().is_some() || !root.name().is_empty() || root.children().is_none() {
            return CorruptedSnafu {
                detail: "root must be an unnamed directory without a parent",
            }
            .fail();
        }

        let mut reachable = 0;
        let mut pending = vec![NodeId::ROOT];
        while let Some(id) = pending.pop() {
            reachable += 1;
            let Some(node) = self.nodes.get(&id) else {
                return CorruptedSnafu {
                    detail: format!("dangling handle {id}"),
                }
                .fail();
            };
            let Some(children) = node.children() else {
                continue;
            };
            for (name, child_id) in children {
                let Some(child) = self.nodes.get(child_id) else {
                    return CorruptedSnafu {
                        detail: format!("child '{name}' of {id} is missing"),
                    }
                    .fail();
                };
                if child.parent() != Some(id) || child.name() != name {
                    return CorruptedSnafu {
                        detail: format!("back-reference of '{name}' does not match {id}"),
                    }
                    .fail();
                }
                if validate_name(name).is_err() {
                    return CorruptedSnafu {
                        detail: format!("child of {id} has an invalid name"),
                    }
                    .fail();
                }
                pending.push(*child_id);
            }
        }

        if reachable != self.nodes.len() {
            return CorruptedSnafu {
                detail: format!(
                    "{} nodes are not reachable from the root",
                    self.nodes.len() - reachable
                ),
            }
            .fail();
        }
        Ok(())
    }
}

fn parent_display(at: &TreePath) -> String {
    at.parent().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::error::TreeError;

    fn path(raw: &str) -> TreePath {
        TreePath::parse(raw).expect("test path should parse")
    }

    #[test]
    fn new_tree_holds_only_the_root() {
        let tree = Tree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.path_of(tree.root()), Some(TreePath::root()));
        assert!(tree.verify().is_ok());
    }

    #[test]
    fn attach_links_both_directions() {
        let mut tree = Tree::new();
        let docs = tree
            .attach_new(tree.root(), "docs", NodeBody::directory(), &path("/docs"))
            .expect("attach should succeed");
        let readme = tree
            .attach_new(docs, "readme", NodeBody::file(b"hi".to_vec()), &path("/docs/readme"))
            .expect("attach should succeed");

        assert_eq!(tree.get(readme).and_then(Node::parent), Some(docs));
        assert_eq!(tree.get(docs).and_then(|d| d.child("readme")), Some(readme));
        assert_eq!(tree.path_of(readme), Some(path("/docs/readme")));
        assert!(tree.verify().is_ok());
    }

    #[test]
    fn attach_rejects_duplicates_and_files_as_parents() {
        let mut tree = Tree::new();
        let file = tree
            .attach_new(tree.root(), "f", NodeBody::file(vec![]), &path("/f"))
            .expect("attach should succeed");

        let duplicate = tree.attach_new(tree.root(), "f", NodeBody::directory(), &path("/f"));
        assert!(matches!(duplicate, Err(TreeError::AlreadyExists { .. })));

        let under_file = tree.attach_new(file, "x", NodeBody::directory(), &path("/f/x"));
        assert!(matches!(under_file, Err(TreeError::NotADirectory { .. })));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn destroy_removes_whole_subtree() {
        let mut tree = Tree::new();
        let a = tree
            .attach_new(tree.root(), "a", NodeBody::directory(), &path("/a"))
            .expect("attach should succeed");
        let b = tree
            .attach_new(a, "b", NodeBody::directory(), &path("/a/b"))
            .expect("attach should succeed");
        tree.attach_new(b, "c", NodeBody::file(vec![1]), &path("/a/b/c"))
            .expect("attach should succeed");

        let detached = tree.detach(tree.root(), "a");
        assert_eq!(detached, Some(a));
        assert_eq!(tree.destroy(a), 3);
        assert!(tree.is_empty());
        assert!(tree.verify().is_ok());
    }

    #[test]
    fn ancestor_check_walks_parent_chain() {
        let mut tree = Tree::new();
        let a = tree
            .attach_new(tree.root(), "a", NodeBody::directory(), &path("/a"))
            .expect("attach should succeed");
        let b = tree
            .attach_new(a, "b", NodeBody::directory(), &path("/a/b"))
            .expect("attach should succeed");

        assert!(tree.is_ancestor_or_self(a, b));
        assert!(tree.is_ancestor_or_self(a, a));
        assert!(!tree.is_ancestor_or_self(b, a));
    }

    #[test]
    fn verify_flags_unreachable_nodes() {
        let mut tree = Tree::new();
        tree.attach_new(tree.root(), "a", NodeBody::directory(), &path("/a"))
            .expect("attach should succeed");
        tree.detach(tree.root(), "a");

        assert!(matches!(tree.verify(), Err(TreeError::Corrupted { .. })));
    }
}
