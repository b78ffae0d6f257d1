//! Named-dimension arrays: the storage primitive under every dataset entity.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::errors::{DatasetError, DatasetResult};
use crate::fit::Reducer;

/// Ordered mapping from dimension name to the coordinate values selected
/// along it. Insertion order is significant (it drives permutation order).
pub type CoordMap = IndexMap<String, Vec<f64>>;

/// Attribute value attached to datasets, variables and coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

/// An n-dimensional array whose axes carry dimension names.
///
/// Element type is `f64`; the canonical dtype token in summaries is
/// `float64`. Zero-dimensional arrays (full reductions) are allowed.
#[derive(Debug, Clone, PartialEq)]
pub struct DimArray {
    dims: Vec<String>,
    data: ArrayD<f64>,
    attrs: BTreeMap<String, AttrValue>,
}

impl DimArray {
    pub fn new(dims: Vec<String>, data: ArrayD<f64>) -> DatasetResult<Self> {
        if dims.len() != data.ndim() {
            return Err(DatasetError::RankMismatch {
                dims: dims.len(),
                rank: data.ndim(),
            });
        }
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].contains(dim) {
                return Err(DatasetError::DuplicateDimension(dim.clone()));
            }
        }
        Ok(Self {
            dims,
            data,
            attrs: BTreeMap::new(),
        })
    }

    pub fn from_shape_vec(dims: &[&str], shape: &[usize], values: Vec<f64>) -> DatasetResult<Self> {
        let found = vec![values.len()];
        let data = ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| {
            DatasetError::ShapeMismatch {
                expected: shape.to_vec(),
                found,
            }
        })?;
        Self::new(dims.iter().map(|d| d.to_string()).collect(), data)
    }

    /// One-dimensional array over a single dimension.
    pub fn vector(dim: &str, values: Vec<f64>) -> Self {
        let data = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values)
            .expect("1-d shape always matches its own length");
        Self {
            dims: vec![dim.to_string()],
            data,
            attrs: BTreeMap::new(),
        }
    }

    /// Zero-dimensional array holding a single value.
    pub fn scalar(value: f64) -> Self {
        let data = ArrayD::from_shape_vec(IxDyn(&[]), vec![value])
            .expect("0-d shape holds exactly one value");
        Self {
            dims: Vec::new(),
            data,
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ArrayD<f64> {
        &mut self.data
    }

    pub fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, AttrValue> {
        &mut self.attrs
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn size_of(&self, dim: &str) -> Option<usize> {
        self.axis_of(dim).map(|ax| self.data.shape()[ax])
    }

    /// `(dims) dtype nelems` token used by summaries and the details column.
    pub fn descriptor(&self) -> String {
        format!("({}) float64 {}", self.dims.iter().join(", "), self.len())
    }

    /// Subset along one axis by positional indices.
    pub fn select_positions(&self, dim: &str, positions: &[usize]) -> DatasetResult<DimArray> {
        let ax = self
            .axis_of(dim)
            .ok_or_else(|| DatasetError::UnknownDimension(dim.to_string()))?;
        let data = self.data.select(Axis(ax), positions);
        Ok(Self {
            dims: self.dims.clone(),
            data,
            attrs: self.attrs.clone(),
        })
    }

    /// Rename a dimension label on this array (no data movement).
    pub(crate) fn rename_dim(&mut self, old: &str, new: &str) {
        for dim in &mut self.dims {
            if dim == old {
                *dim = new.to_string();
            }
        }
    }
}

/// A [`DimArray`] with coordinate labels attached for every dimension.
///
/// Produced by the inheritance resolver; supports coordinate-value selection,
/// sub-region overwrite and reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    values: DimArray,
    coords: IndexMap<String, Vec<f64>>,
}

impl DataArray {
    /// Labels are required for every dimension and must match its size.
    pub fn new(values: DimArray, coords: IndexMap<String, Vec<f64>>) -> DatasetResult<Self> {
        for dim in values.dims() {
            let labels = coords
                .get(dim)
                .ok_or_else(|| DatasetError::UnknownDimension(dim.clone()))?;
            let size = values.size_of(dim).unwrap_or(0);
            if labels.len() != size {
                return Err(DatasetError::DimensionMismatch {
                    dim: dim.clone(),
                    expected: size,
                    found: labels.len(),
                });
            }
        }
        Ok(Self { values, coords })
    }

    pub fn values(&self) -> &DimArray {
        &self.values
    }

    pub fn data(&self) -> &ArrayD<f64> {
        self.values.data()
    }

    pub fn dims(&self) -> &[String] {
        self.values.dims()
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn coords(&self) -> &IndexMap<String, Vec<f64>> {
        &self.coords
    }

    pub fn coord(&self, dim: &str) -> Option<&[f64]> {
        self.coords.get(dim).map(|c| c.as_slice())
    }

    /// Flattened values in row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.data().iter().cloned().collect()
    }

    fn positions_for(&self, dim: &str, wanted: &[f64]) -> DatasetResult<Vec<usize>> {
        let labels = self
            .coords
            .get(dim)
            .ok_or_else(|| DatasetError::UnknownDimension(dim.to_string()))?;
        wanted
            .iter()
            .map(|v| {
                labels
                    .iter()
                    .position(|label| label == v)
                    .ok_or(DatasetError::CoordValueNotFound {
                        dim: dim.to_string(),
                        value: *v,
                    })
            })
            .collect()
    }

    /// Subset by coordinate values. Selection entries for dimensions this
    /// array does not have are ignored.
    pub fn select(&self, selection: &CoordMap) -> DatasetResult<DataArray> {
        let mut values = self.values.clone();
        let mut coords = self.coords.clone();
        for (dim, wanted) in selection {
            if values.axis_of(dim).is_none() {
                continue;
            }
            let positions = self.positions_for(dim, wanted)?;
            values = values.select_positions(dim, &positions)?;
            coords.insert(dim.clone(), wanted.clone());
        }
        DataArray::new(values, coords)
    }

    /// Overwrite the sub-region addressed by coordinate values with `source`
    /// (row-major). A single-element source broadcasts over the region;
    /// otherwise element counts must match exactly.
    pub fn assign_where(&mut self, selection: &CoordMap, source: &[f64]) -> DatasetResult<()> {
        let mut axis_positions: Vec<Vec<usize>> = Vec::with_capacity(self.dims().len());
        for dim in self.dims() {
            match selection.get(dim) {
                Some(wanted) => axis_positions.push(self.positions_for(dim, wanted)?),
                None => {
                    let size = self.values.size_of(dim).unwrap_or(0);
                    axis_positions.push((0..size).collect());
                }
            }
        }
        let count: usize = axis_positions.iter().map(|p| p.len()).product();
        if source.len() != count && source.len() != 1 {
            return Err(DatasetError::ShapeMismatch {
                expected: axis_positions.iter().map(|p| p.len()).collect(),
                found: vec![source.len()],
            });
        }
        let data = self.values.data_mut();
        if axis_positions.is_empty() {
            // 0-d target
            data[IxDyn(&[])] = source[0];
            return Ok(());
        }
        for (i, index) in axis_positions
            .iter()
            .map(|p| p.iter().cloned())
            .multi_cartesian_product()
            .enumerate()
        {
            let value = if source.len() == 1 { source[0] } else { source[i] };
            data[IxDyn(&index)] = value;
        }
        Ok(())
    }

    /// Collapse one dimension, or all of them when `dim` is `None`.
    pub fn reduce(&self, op: Reducer, dim: Option<&str>) -> DatasetResult<DataArray> {
        match dim {
            Some(dim) => {
                let ax = self
                    .values
                    .axis_of(dim)
                    .ok_or_else(|| DatasetError::UnknownDimension(dim.to_string()))?;
                let data = self
                    .values
                    .data()
                    .map_axis(Axis(ax), |lane| op.apply(&lane.to_vec()));
                let dims: Vec<String> = self
                    .dims()
                    .iter()
                    .filter(|d| d.as_str() != dim)
                    .cloned()
                    .collect();
                let mut coords = self.coords.clone();
                coords.shift_remove(dim);
                coords.retain(|name, _| dims.iter().any(|d| d == name));
                DataArray::new(DimArray::new(dims, data)?, coords)
            }
            None => {
                let all: Vec<f64> = self.values.data().iter().cloned().collect();
                DataArray::new(DimArray::scalar(op.apply(&all)), IndexMap::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_select_by_coord_values() {
        let values = DimArray::from_shape_vec(
            &["sweep", "time"],
            &[3, 4],
            (0..12).map(|i| i as f64).collect(),
        )
        .unwrap();
        let mut coords = IndexMap::new();
        coords.insert("sweep".to_string(), vec![5.0, 8.0, 9.0]);
        coords.insert("time".to_string(), indices(4));
        let arr = DataArray::new(values, coords).unwrap();

        let mut selection = CoordMap::new();
        selection.insert("sweep".to_string(), vec![8.0]);
        let subset = arr.select(&selection).unwrap();

        assert_eq!(subset.shape(), &[1, 4]);
        assert_eq!(subset.to_vec(), vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(subset.coord("sweep").unwrap(), &[8.0]);
    }

    #[test]
    fn test_assign_where_overwrites_footprint_only() {
        let values = DimArray::from_shape_vec(&["sweep", "time"], &[2, 3], vec![0.0; 6]).unwrap();
        let mut coords = IndexMap::new();
        coords.insert("sweep".to_string(), vec![0.0, 1.0]);
        coords.insert("time".to_string(), indices(3));
        let mut arr = DataArray::new(values, coords).unwrap();

        let mut selection = CoordMap::new();
        selection.insert("sweep".to_string(), vec![1.0]);
        selection.insert("time".to_string(), vec![0.0, 2.0]);
        arr.assign_where(&selection, &[7.0, 9.0]).unwrap();

        assert_eq!(arr.to_vec(), vec![0.0, 0.0, 0.0, 7.0, 0.0, 9.0]);
    }

    #[test]
    fn test_reduce_along_dim_drops_coord() {
        let values = DimArray::from_shape_vec(
            &["sweep", "time"],
            &[2, 3],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .unwrap();
        let mut coords = IndexMap::new();
        coords.insert("sweep".to_string(), vec![0.0, 1.0]);
        coords.insert("time".to_string(), indices(3));
        let arr = DataArray::new(values, coords).unwrap();

        let reduced = arr.reduce(Reducer::Max, Some("sweep")).unwrap();
        assert_eq!(reduced.dims(), &["time".to_string()]);
        assert_eq!(reduced.to_vec(), vec![4.0, 5.0, 6.0]);
        assert!(reduced.coord("sweep").is_none());
    }
}
