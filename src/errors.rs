use thiserror::Error;

/// Errors from tree structure, inheritance resolution and aggregation.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("name conflict: '{name}' already exists under '{parent}'")]
    NameConflict { name: String, parent: String },

    #[error("no ancestor of '{node}' defines '{name}'")]
    MissingData { name: String, node: String },

    #[error("dimension '{dim}' is not defined at node '{node}'")]
    MissingDimension { dim: String, node: String },

    #[error("node is no longer part of the tree")]
    NodeGone,

    #[error("cannot reparent '{node}' under its own descendant '{target}'")]
    WouldCreateCycle { node: String, target: String },

    #[error("rename of '{old}' to '{new}' blocked by the dataset at '{node}'")]
    RenameBlocked {
        old: String,
        new: String,
        node: String,
    },

    #[error("row index {0} is out of range")]
    RowOutOfRange(usize),

    #[error("row {row} is not a {expected} row")]
    RowKindMismatch { row: usize, expected: &'static str },

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Fit(#[from] FitError),
}

pub type TreeResult<T> = Result<T, TreeError>;

/// Errors from the labeled-array layer.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("'{name}' already exists in the dataset namespace")]
    NamespaceConflict { name: String },

    #[error("dimension '{dim}' size mismatch: expected {expected}, got {found}")]
    DimensionMismatch {
        dim: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown dimension '{0}'")]
    UnknownDimension(String),

    #[error("no variable or coordinate named '{0}'")]
    UnknownEntity(String),

    #[error("coordinate '{dim}' has no value {value}")]
    CoordValueNotFound { dim: String, value: f64 },

    #[error("{dims} dimension names given for an array of rank {rank}")]
    RankMismatch { dims: usize, rank: usize },

    #[error("duplicate dimension name '{0}'")]
    DuplicateDimension(String),

    #[error("coordinate '{name}' must be one-dimensional over its own dimension")]
    InvalidCoordinate { name: String },

    #[error("shape mismatch: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("datasets cannot be combined: {reason}")]
    MergeIncompatible { reason: String },
}

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Errors from the curve-fit engines. Inside a permutation loop these are
/// converted to NaN output slices rather than aborting the operation.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("failed to parse fit expression: {0}")]
    Parse(String),

    #[error("fit requires option '{0}'")]
    MissingOption(&'static str),

    #[error("unknown function '{0}' in fit expression")]
    UnknownFunction(String),

    #[error("not enough samples: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("linear system is singular")]
    Singular,

    #[error("fit objective is not finite")]
    NonFinite,
}

pub type FitResult<T> = Result<T, FitError>;
