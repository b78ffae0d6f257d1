//! Row projection of the tree for a presentation layer: a flat, addressable
//! two-column sequence of node, variable and coordinate rows.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::errors::{TreeError, TreeResult};
use crate::tree::{DataTree, NodeId};

/// Display toggles, passed as an immutable value into every rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionOptions {
    pub show_variables: bool,
    pub show_coordinates: bool,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            show_variables: true,
            show_coordinates: true,
        }
    }
}

/// What a row refers to, resolved once when the row is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    Node,
    Variable(String),
    Coordinate(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub node: NodeId,
    pub kind: RowKind,
}

/// Stateless adapter over a [`DataTree`]: rows are recomputed from the live
/// tree, never stored independently of it. Structural edits made through
/// this type refresh the row list; edits made directly on the tree require
/// a rebuild by the caller.
#[derive(Debug, Clone)]
pub struct TreeProjection {
    root: NodeId,
    options: ProjectionOptions,
    rows: Vec<Row>,
}

impl TreeProjection {
    pub fn build(tree: &DataTree, root: NodeId, options: ProjectionOptions) -> Self {
        let mut projection = Self {
            root,
            options,
            rows: Vec::new(),
        };
        projection.refresh(tree);
        projection
    }

    /// Recompute the row list from the live tree.
    pub fn refresh(&mut self, tree: &DataTree) {
        let mut rows = Vec::new();
        if tree.get(self.root).is_some() {
            expand(tree, self.root, self.options, &mut rows);
        }
        self.rows = rows;
    }

    pub fn options(&self) -> ProjectionOptions {
        self.options
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        2
    }

    /// Column 0 is the name, column 1 the details descriptor.
    pub fn get(&self, tree: &DataTree, row: usize, column: usize) -> Option<String> {
        let row = self.rows.get(row)?;
        match column {
            0 => match &row.kind {
                RowKind::Node => tree.get(row.node).map(|n| n.name().to_string()),
                RowKind::Variable(name) | RowKind::Coordinate(name) => Some(name.clone()),
            },
            1 => match &row.kind {
                RowKind::Node => Some(
                    tree.dataset(row.node)
                        .map(|ds| ds.dims_listing())
                        .unwrap_or_default(),
                ),
                RowKind::Variable(name) | RowKind::Coordinate(name) => {
                    tree.dataset(row.node)?.entry_descriptor(name)
                }
            },
            _ => None,
        }
    }

    /// Rename the entity behind a row. Node rows rename the node (sibling
    /// collisions fail); variable/coordinate rows rename within that one
    /// dataset (namespace collisions fail). Nothing changes on failure.
    #[instrument(level = "debug", skip(self, tree))]
    pub fn set_name(&mut self, tree: &mut DataTree, row: usize, value: &str) -> TreeResult<()> {
        let entry = self
            .rows
            .get(row)
            .cloned()
            .ok_or(TreeError::RowOutOfRange(row))?;
        match &entry.kind {
            RowKind::Node => tree.set_name(entry.node, value)?,
            RowKind::Variable(old) | RowKind::Coordinate(old) => {
                let ds = tree.dataset_mut(entry.node).ok_or(TreeError::NodeGone)?;
                ds.rename(old, value)?;
            }
        }
        self.refresh(tree);
        Ok(())
    }

    /// Rename a variable/coordinate key everywhere it appears in the
    /// projection. Every affected dataset is validated before any rename is
    /// applied; a collision anywhere aborts the whole batch and the error
    /// names the blocking node.
    #[instrument(level = "debug", skip(self, tree))]
    pub fn set_name_cascading(
        &mut self,
        tree: &mut DataTree,
        row: usize,
        value: &str,
    ) -> TreeResult<()> {
        let entry = self
            .rows
            .get(row)
            .cloned()
            .ok_or(TreeError::RowOutOfRange(row))?;
        let old = match &entry.kind {
            RowKind::Node => return self.set_name(tree, row, value),
            RowKind::Variable(old) | RowKind::Coordinate(old) => old.clone(),
        };
        let targets: Vec<NodeId> = self
            .rows
            .iter()
            .filter(|candidate| candidate.kind == entry.kind)
            .map(|candidate| candidate.node)
            .collect();
        for &node in &targets {
            let ds = tree.dataset(node).ok_or(TreeError::NodeGone)?;
            if ds.contains(value) {
                return Err(TreeError::RenameBlocked {
                    old: old.clone(),
                    new: value.to_string(),
                    node: tree.name(node)?.to_string(),
                });
            }
        }
        for &node in &targets {
            let ds = tree.dataset_mut(node).ok_or(TreeError::NodeGone)?;
            ds.rename(&old, value)?;
        }
        self.refresh(tree);
        Ok(())
    }

    /// Move a node row (with its subtree) under another node row.
    #[instrument(level = "debug", skip(self, tree))]
    pub fn move_row(
        &mut self,
        tree: &mut DataTree,
        row: usize,
        new_parent_row: usize,
    ) -> TreeResult<()> {
        let node = self.node_row(row)?;
        let parent = self.node_row(new_parent_row)?;
        tree.set_parent(node, Some(parent))?;
        self.refresh(tree);
        Ok(())
    }

    /// Detach the node behind a node row; its subtree becomes an orphan.
    #[instrument(level = "debug", skip(self, tree))]
    pub fn delete(&mut self, tree: &mut DataTree, row: usize) -> TreeResult<()> {
        let node = self.node_row(row)?;
        tree.detach(node)?;
        self.refresh(tree);
        Ok(())
    }

    fn node_row(&self, row: usize) -> TreeResult<NodeId> {
        let entry = self.rows.get(row).ok_or(TreeError::RowOutOfRange(row))?;
        match entry.kind {
            RowKind::Node => Ok(entry.node),
            _ => Err(TreeError::RowKindMismatch {
                row,
                expected: "node",
            }),
        }
    }
}

/// Row expansion order: the node itself, its variables, its coordinates,
/// then each child subtree.
fn expand(tree: &DataTree, id: NodeId, options: ProjectionOptions, rows: &mut Vec<Row>) {
    rows.push(Row {
        node: id,
        kind: RowKind::Node,
    });
    if let Some(ds) = tree.dataset(id) {
        if options.show_variables {
            for name in ds.variable_names() {
                rows.push(Row {
                    node: id,
                    kind: RowKind::Variable(name.to_string()),
                });
            }
        }
        if options.show_coordinates {
            for name in ds.coord_names() {
                rows.push(Row {
                    node: id,
                    kind: RowKind::Coordinate(name.to_string()),
                });
            }
        }
    }
    if let Some(node) = tree.get(id) {
        for &child in node.children() {
            expand(tree, child, options, rows);
        }
    }
}
