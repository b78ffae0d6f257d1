//! Inheritance resolution: reading data and coordinate labels through the
//! ancestor chain. All functions are read-only over the tree and report
//! missing data as errors rather than panicking.

use indexmap::IndexMap;
use tracing::instrument;

use crate::array::{CoordMap, DataArray, DimArray};
use crate::errors::{TreeError, TreeResult};
use crate::tree::{DataTree, NodeId};

/// Ancestor chain starting at the node itself.
fn ancestors_inclusive(tree: &DataTree, node: NodeId) -> Vec<NodeId> {
    let mut chain = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        chain.push(id);
        current = tree.get(id).and_then(|n| n.parent());
    }
    chain
}

fn coord_values(coord: &DimArray) -> Vec<f64> {
    coord.data().iter().cloned().collect()
}

/// Plain coordinate values per dimension, for selection.
pub fn coord_value_map(coords: &IndexMap<String, DimArray>) -> CoordMap {
    coords
        .iter()
        .map(|(dim, coord)| (dim.clone(), coord_values(coord)))
        .collect()
}

/// Nearest ancestor coordinate for `dim`, searched from `node` upward
/// (inclusive).
///
/// A found coordinate whose length differs from the node's own size for
/// `dim` is discarded; the fallback either way is a synthetic coordinate of
/// integer indices `0..size-1`. The dimension itself must exist at `node`.
#[instrument(level = "debug", skip(tree))]
pub fn inherited_coord(tree: &DataTree, node: NodeId, dim: &str) -> TreeResult<DimArray> {
    let own_size = tree
        .dataset(node)
        .and_then(|ds| ds.size_of(dim))
        .ok_or_else(|| TreeError::MissingDimension {
            dim: dim.to_string(),
            node: tree.name(node).unwrap_or("<gone>").to_string(),
        })?;
    for ancestor in ancestors_inclusive(tree, node) {
        let Some(ds) = tree.dataset(ancestor) else {
            continue;
        };
        if let Some(coord) = ds.coord(dim) {
            if coord.len() == own_size {
                return Ok(coord.clone());
            }
            // Mismatched ancestor coordinate: discard, use indices.
            break;
        }
    }
    Ok(DimArray::vector(
        dim,
        (0..own_size).map(|i| i as f64).collect(),
    ))
}

/// Coordinates for every dimension of the node's own dataset: local ones
/// win, the rest resolve through [`inherited_coord`]. A node without a
/// dataset has no dimensions and yields an empty map.
#[instrument(level = "debug", skip(tree))]
pub fn inherited_coords(tree: &DataTree, node: NodeId) -> TreeResult<IndexMap<String, DimArray>> {
    let mut coords = IndexMap::new();
    let Some(ds) = tree.dataset(node) else {
        return Ok(coords);
    };
    for dim in ds.dims().keys() {
        let coord = match ds.coord(dim) {
            Some(coord) => coord.clone(),
            None => inherited_coord(tree, node, dim)?,
        };
        coords.insert(dim.clone(), coord);
    }
    Ok(coords)
}

/// Variable resolved through the nearest defining ancestor.
///
/// Coordinate attachment is anchored at the owner: each dimension of the
/// variable takes the owner's own coordinate when present, else the owner's
/// inherited one. When the owner is the queried node itself the variable is
/// returned as stored; otherwise it is projected down onto the node's own
/// coordinate footprint.
#[instrument(level = "debug", skip(tree))]
pub fn inherited_data(tree: &DataTree, node: NodeId, name: &str) -> TreeResult<DataArray> {
    let owner = ancestors_inclusive(tree, node)
        .into_iter()
        .find(|&id| {
            tree.dataset(id)
                .map(|ds| ds.variable(name).is_some())
                .unwrap_or(false)
        })
        .ok_or_else(|| TreeError::MissingData {
            name: name.to_string(),
            node: tree.name(node).unwrap_or("<gone>").to_string(),
        })?;
    let ds = tree.dataset(owner).expect("owner was found with a dataset");
    let var = ds.variable(name).expect("owner defines the variable").clone();

    let mut coords = IndexMap::new();
    for dim in var.dims() {
        let values = match ds.coord(dim) {
            Some(coord) => coord_values(coord),
            None => coord_values(&inherited_coord(tree, owner, dim)?),
        };
        coords.insert(dim.clone(), values);
    }
    let array = DataArray::new(var, coords).map_err(TreeError::Dataset)?;

    if owner == node {
        return Ok(array);
    }
    let selection = coord_value_map(&inherited_coords(tree, node)?);
    Ok(array.select(&selection)?)
}

/// Overlay-resolved variable along the ancestor path from `root` to `node`.
///
/// Starts from a deep copy of the shallowest definer's resolved variable,
/// then overwrites, in path order, each deeper definer's own coordinate
/// footprint with that definer's stored values. Deeper definitions win
/// strictly inside their footprint; outside it the shallower values persist.
#[instrument(level = "debug", skip(tree))]
pub fn leaf_data(
    tree: &DataTree,
    node: NodeId,
    name: &str,
    root: Option<NodeId>,
) -> TreeResult<DataArray> {
    let mut path = ancestors_inclusive(tree, node);
    path.reverse();
    if let Some(root) = root {
        if let Some(pos) = path.iter().position(|&id| id == root) {
            path.drain(..pos);
        }
    }
    if path.last() == Some(&node) && path.len() == 1 {
        return inherited_data(tree, node, name);
    }

    let defines = |id: NodeId| {
        tree.dataset(id)
            .map(|ds| ds.variable(name).is_some())
            .unwrap_or(false)
    };
    let first = match path.iter().position(|&id| defines(id)) {
        Some(pos) => {
            path.drain(..pos);
            path.remove(0)
        }
        None => {
            return Err(TreeError::MissingData {
                name: name.to_string(),
                node: tree.name(node).unwrap_or("<gone>").to_string(),
            })
        }
    };

    let mut working = inherited_data(tree, first, name)?;
    for id in path {
        if !defines(id) {
            continue;
        }
        let ds = tree.dataset(id).expect("checked by defines");
        let mut selection = CoordMap::new();
        for dim in working.dims() {
            let values = match ds.coord(dim) {
                Some(coord) => coord_values(coord),
                None => coord_values(&inherited_coord(tree, id, dim)?),
            };
            selection.insert(dim.clone(), values);
        }
        let source: Vec<f64> = ds
            .variable(name)
            .expect("checked by defines")
            .data()
            .iter()
            .cloned()
            .collect();
        working.assign_where(&selection, &source)?;
    }
    Ok(working)
}
