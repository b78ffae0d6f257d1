//! Hierarchy of labeled multi-dimensional datasets.
//!
//! Descendant nodes inherit and selectively override data and coordinate
//! labels from their ancestors. Reductions and curve fits derive new child
//! datasets, and a row projection exposes the tree to presentation layers.
//!
//! - [`tree`]: arena-backed node tree with unique sibling names
//! - [`dataset`] / [`array`]: the labeled-array substrate
//! - [`inherit`]: inheritance resolution along the ancestor chain
//! - [`aggregate`] / [`fit`] / [`expr`]: reductions and curve fitting
//! - [`projection`]: two-column row view for presentation layers

pub mod aggregate;
pub mod array;
pub mod dataset;
pub mod errors;
pub mod expr;
pub mod fit;
pub mod inherit;
pub mod projection;
pub mod tree;

pub use aggregate::{curve_fit, permutations, reduce, AppendMode, FitSpec};
pub use array::{AttrValue, CoordMap, DataArray, DimArray};
pub use dataset::Dataset;
pub use errors::{DatasetError, DatasetResult, FitError, FitResult, TreeError, TreeResult};
pub use fit::{FitOptions, ParamHint, Reducer};
pub use inherit::{inherited_coord, inherited_coords, inherited_data, leaf_data};
pub use projection::{ProjectionOptions, Row, RowKind, TreeProjection};
pub use tree::{unique_name, DataTree, Node, NodeId};
