//! Arena-based tree of named nodes holding optional datasets.
//!
//! Uses a generational arena for memory-safe node handles and O(1) lookups.
//! A parent owns its children through the arena; the parent link is a plain
//! handle used only for navigation. Detaching a node turns its subtree into
//! an orphan root that stays addressable until [`DataTree::remove_subtree`].

use generational_arena::{Arena, Index};
use termtree::Tree;
use tracing::instrument;

use crate::dataset::Dataset;
use crate::errors::{TreeError, TreeResult};

/// Handle to a node in a [`DataTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(Index);

/// Tree node: a name unique among its siblings and an optional dataset.
#[derive(Debug)]
pub struct Node {
    name: String,
    dataset: Option<Dataset>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Arena-backed hierarchy of datasets.
#[derive(Debug)]
pub struct DataTree {
    arena: Arena<Node>,
    root: NodeId,
}

impl DataTree {
    pub fn new(root_name: &str, dataset: Option<Dataset>) -> Self {
        let mut arena = Arena::new();
        let root = NodeId(arena.insert(Node {
            name: root_name.to_string(),
            dataset,
            parent: None,
            children: Vec::new(),
        }));
        Self { arena, root }
    }

    /// The primary root this tree was created with.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id.0)
    }

    fn node(&self, id: NodeId) -> TreeResult<&Node> {
        self.get(id).ok_or(TreeError::NodeGone)
    }

    fn node_mut(&mut self, id: NodeId) -> TreeResult<&mut Node> {
        self.arena.get_mut(id.0).ok_or(TreeError::NodeGone)
    }

    pub fn name(&self, id: NodeId) -> TreeResult<&str> {
        Ok(self.node(id)?.name())
    }

    pub fn dataset(&self, id: NodeId) -> Option<&Dataset> {
        self.get(id).and_then(|node| node.dataset.as_ref())
    }

    pub fn dataset_mut(&mut self, id: NodeId) -> Option<&mut Dataset> {
        self.arena.get_mut(id.0).and_then(|node| node.dataset.as_mut())
    }

    #[instrument(level = "trace", skip(self, dataset))]
    pub fn set_dataset(&mut self, id: NodeId, dataset: Option<Dataset>) -> TreeResult<()> {
        self.node_mut(id)?.dataset = dataset;
        Ok(())
    }

    /// Create a node attached under `parent`. Sibling names are unique.
    #[instrument(level = "debug", skip(self, dataset))]
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        dataset: Option<Dataset>,
    ) -> TreeResult<NodeId> {
        let parent_node = self.node(parent)?;
        if self.child_by_name(parent, name).is_some() {
            return Err(TreeError::NameConflict {
                name: name.to_string(),
                parent: parent_node.name.clone(),
            });
        }
        let id = NodeId(self.arena.insert(Node {
            name: name.to_string(),
            dataset,
            parent: Some(parent),
            children: Vec::new(),
        }));
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|&child| self.get(child).map(|n| n.name.as_str()) == Some(name))
    }

    /// Rename a node. Fails on a sibling collision and changes nothing.
    #[instrument(level = "debug", skip(self))]
    pub fn set_name(&mut self, id: NodeId, new_name: &str) -> TreeResult<()> {
        let node = self.node(id)?;
        if node.name == new_name {
            return Ok(());
        }
        if let Some(parent) = node.parent {
            if self.child_by_name(parent, new_name).is_some() {
                return Err(TreeError::NameConflict {
                    name: new_name.to_string(),
                    parent: self.node(parent)?.name.clone(),
                });
            }
        }
        self.node_mut(id)?.name = new_name.to_string();
        Ok(())
    }

    /// Move a node (with its subtree) under a new parent, or detach it with
    /// `None`. Validates the destination before mutating anything: on
    /// failure both trees are exactly as before.
    #[instrument(level = "debug", skip(self))]
    pub fn set_parent(&mut self, id: NodeId, new_parent: Option<NodeId>) -> TreeResult<()> {
        let node = self.node(id)?;
        if node.parent == new_parent {
            return Ok(());
        }
        if let Some(dest) = new_parent {
            self.node(dest)?;
            if dest == id || self.is_ancestor(id, dest) {
                return Err(TreeError::WouldCreateCycle {
                    node: self.node(id)?.name.clone(),
                    target: self.node(dest)?.name.clone(),
                });
            }
            let name = self.node(id)?.name.clone();
            if self.child_by_name(dest, &name).is_some() {
                return Err(TreeError::NameConflict {
                    name,
                    parent: self.node(dest)?.name.clone(),
                });
            }
        }
        if let Some(old_parent) = self.node(id)?.parent {
            let old = self.node_mut(old_parent)?;
            old.children.retain(|&child| child != id);
        }
        if let Some(dest) = new_parent {
            self.node_mut(dest)?.children.push(id);
        }
        self.node_mut(id)?.parent = new_parent;
        Ok(())
    }

    /// Detach a node from its parent; its subtree becomes an orphan root.
    pub fn detach(&mut self, id: NodeId) -> TreeResult<()> {
        self.set_parent(id, None)
    }

    /// Detach a subtree and free it from the arena.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_subtree(&mut self, id: NodeId) -> TreeResult<()> {
        self.detach(id)?;
        let ids: Vec<NodeId> = self.iter_depth_first(id).collect();
        for node in ids {
            self.arena.remove(node.0);
        }
        Ok(())
    }

    /// True when `ancestor` lies on the parent chain of `node` (exclusive).
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.get(node).and_then(|n| n.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).and_then(|n| n.parent);
        }
        false
    }

    /// Ancestor chain from the node's root down to the node itself.
    pub(crate) fn lineage(&self, id: NodeId) -> TreeResult<Vec<NodeId>> {
        let mut chain = vec![id];
        let mut current = self.node(id)?.parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.node(parent)?.parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// `/`-joined names from the root to this node, the root contributing
    /// the leading separator.
    pub fn path(&self, id: NodeId) -> TreeResult<String> {
        let names: Vec<String> = self
            .lineage(id)?
            .into_iter()
            .map(|node| self.node(node).map(|n| n.name.clone()))
            .collect::<TreeResult<_>>()?;
        Ok(format!("/{}", names.join("/")))
    }

    /// Root of the (sub)tree this node belongs to; an orphan's root is the
    /// orphan subtree's top node.
    pub fn root_of(&self, id: NodeId) -> TreeResult<NodeId> {
        Ok(*self.lineage(id)?.first().expect("lineage includes the node"))
    }

    /// Distance to the root of the node's own tree.
    pub fn depth(&self, id: NodeId) -> TreeResult<usize> {
        Ok(self.lineage(id)?.len() - 1)
    }

    /// Longest edge distance from this node down to any descendant.
    pub fn subtree_max_depth(&self, id: NodeId) -> TreeResult<usize> {
        self.node(id)?;
        let mut max = 0;
        let mut stack: Vec<(NodeId, usize)> = vec![(id, 0)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            if let Some(n) = self.get(node) {
                for &child in &n.children {
                    stack.push((child, depth + 1));
                }
            }
        }
        Ok(max)
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.children.first().copied()
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.children.last().copied()
    }

    /// Siblings in insertion order; a parentless node is its own sibling set.
    pub fn siblings(&self, id: NodeId) -> Vec<NodeId> {
        match self.get(id).and_then(|n| n.parent) {
            Some(parent) => self
                .get(parent)
                .map(|p| p.children.clone())
                .unwrap_or_default(),
            None => vec![id],
        }
    }

    pub fn sibling_index(&self, id: NodeId) -> usize {
        self.siblings(id)
            .iter()
            .position(|&sibling| sibling == id)
            .unwrap_or(0)
    }

    pub fn first_sibling(&self, id: NodeId) -> NodeId {
        *self.siblings(id).first().unwrap_or(&id)
    }

    pub fn last_sibling(&self, id: NodeId) -> NodeId {
        *self.siblings(id).last().unwrap_or(&id)
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.siblings(id);
        let index = siblings.iter().position(|&sibling| sibling == id)?;
        siblings.get(index + 1).copied()
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.siblings(id);
        let index = siblings.iter().position(|&sibling| sibling == id)?;
        index.checked_sub(1).and_then(|i| siblings.get(i).copied())
    }

    /// Deepest last descendant: follow last children all the way down.
    pub fn last_node_depth_first(&self, id: NodeId) -> NodeId {
        let mut node = id;
        while let Some(last) = self.last_child(node) {
            node = last;
        }
        node
    }

    /// Preorder successor: first child, else next sibling of the nearest
    /// ancestor (including self) that has one.
    pub fn next_depth_first(&self, id: NodeId) -> Option<NodeId> {
        if let Some(child) = self.first_child(id) {
            return Some(child);
        }
        let mut node = Some(id);
        while let Some(current) = node {
            if let Some(sibling) = self.next_sibling(current) {
                return Some(sibling);
            }
            node = self.get(current).and_then(|n| n.parent);
        }
        None
    }

    /// Preorder predecessor.
    pub fn prev_depth_first(&self, id: NodeId) -> Option<NodeId> {
        if let Some(sibling) = self.prev_sibling(id) {
            return Some(self.last_node_depth_first(sibling));
        }
        self.get(id).and_then(|n| n.parent)
    }

    /// Preorder iterator over the subtree rooted at `start`.
    pub fn iter_depth_first(&self, start: NodeId) -> DepthFirstIter<'_> {
        DepthFirstIter {
            tree: self,
            stack: if self.get(start).is_some() {
                vec![start]
            } else {
                Vec::new()
            },
        }
    }

    /// Rename variables/coordinates across a whole subtree.
    ///
    /// Validates every dataset in the subtree before changing anything: if
    /// any rename would collide anywhere, nothing is applied and the error
    /// names the blocking node.
    #[instrument(level = "debug", skip(self))]
    pub fn rename_entities(&mut self, start: NodeId, renames: &[(String, String)]) -> TreeResult<()> {
        self.node(start)?;
        let nodes: Vec<NodeId> = self.iter_depth_first(start).collect();
        for &id in &nodes {
            let node = self.node(id)?;
            let Some(ds) = node.dataset.as_ref() else {
                continue;
            };
            let mut names: Vec<String> = ds
                .variable_names()
                .chain(ds.coord_names())
                .map(|s| s.to_string())
                .collect();
            for (old, new) in renames {
                if !names.contains(old) {
                    continue;
                }
                if names.contains(new) {
                    return Err(TreeError::RenameBlocked {
                        old: old.clone(),
                        new: new.clone(),
                        node: node.name.clone(),
                    });
                }
                names.retain(|n| n != old);
                names.push(new.clone());
            }
        }
        for &id in &nodes {
            let applicable: Vec<(String, String)> = match self.node(id)?.dataset.as_ref() {
                Some(ds) => renames
                    .iter()
                    .filter(|(old, _)| ds.contains(old))
                    .cloned()
                    .collect(),
                None => continue,
            };
            if let Some(ds) = self.dataset_mut(id) {
                for (old, new) in &applicable {
                    ds.rename(old, new)?;
                }
            }
        }
        Ok(())
    }

    /// Render a subtree for terminal display.
    pub fn render(&self, id: NodeId) -> Tree<String> {
        let label = self
            .get(id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| "<gone>".to_string());
        let leaves: Vec<Tree<String>> = self
            .get(id)
            .map(|n| n.children.iter().map(|&child| self.render(child)).collect())
            .unwrap_or_default();
        Tree::new(label).with_leaves(leaves)
    }
}

impl std::fmt::Display for DataTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render(self.root))
    }
}

pub struct DepthFirstIter<'a> {
    tree: &'a DataTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for DepthFirstIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        if let Some(node) = self.tree.get(current) {
            // Push children in reverse order for left-to-right traversal
            for &child in node.children.iter().rev() {
                self.stack.push(child);
            }
        }
        Some(current)
    }
}

/// First name derived from `base` that does not appear in `taken`:
/// `base`, `base_1`, `base_2`, ...
pub fn unique_name(base: &str, taken: &[String]) -> String {
    if !taken.iter().any(|name| name == base) {
        return base.to_string();
    }
    let mut i = 1;
    loop {
        let candidate = format!("{base}_{i}");
        if !taken.iter().any(|name| name == &candidate) {
            return candidate;
        }
        i += 1;
    }
}
