//! Datasets: named collections of variables and coordinates sharing
//! dimensions and an attribute map.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{ArrayD, Dimension};

use crate::array::{AttrValue, DimArray};
use crate::errors::{DatasetError, DatasetResult};

/// A named collection of variables and coordinates.
///
/// Variables and coordinates share a single namespace: a name cannot refer to
/// both, and renames fail rather than collide. All entities sharing a
/// dimension name agree on its size. Coordinates are one-dimensional arrays
/// labeling positions along their own dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    variables: IndexMap<String, DimArray>,
    coords: IndexMap<String, DimArray>,
    attrs: BTreeMap<String, AttrValue>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a variable. Fails on a coordinate with the same
    /// name or a dimension-size disagreement; the dataset is unchanged on
    /// failure.
    pub fn insert_variable(&mut self, name: &str, array: DimArray) -> DatasetResult<()> {
        if self.coords.contains_key(name) {
            return Err(DatasetError::NamespaceConflict {
                name: name.to_string(),
            });
        }
        self.check_dim_sizes(&array, Some(name))?;
        self.variables.insert(name.to_string(), array);
        Ok(())
    }

    /// Insert or replace a coordinate: a 1-d array over its own dimension.
    pub fn insert_coord(&mut self, name: &str, array: DimArray) -> DatasetResult<()> {
        if array.dims() != [name.to_string()] {
            return Err(DatasetError::InvalidCoordinate {
                name: name.to_string(),
            });
        }
        if self.variables.contains_key(name) {
            return Err(DatasetError::NamespaceConflict {
                name: name.to_string(),
            });
        }
        self.check_dim_sizes(&array, Some(name))?;
        self.coords.insert(name.to_string(), array);
        Ok(())
    }

    /// Shorthand for labeling a dimension with plain values.
    pub fn set_coord_values(&mut self, dim: &str, values: Vec<f64>) -> DatasetResult<()> {
        self.insert_coord(dim, DimArray::vector(dim, values))
    }

    fn check_dim_sizes(&self, array: &DimArray, replacing: Option<&str>) -> DatasetResult<()> {
        for dim in array.dims() {
            let found = array.size_of(dim).unwrap_or(0);
            let existing = self
                .entities()
                .filter(|(name, _)| replacing != Some(name.as_str()))
                .find_map(|(_, entity)| entity.size_of(dim));
            if let Some(expected) = existing {
                if expected != found {
                    return Err(DatasetError::DimensionMismatch {
                        dim: dim.clone(),
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    fn entities(&self) -> impl Iterator<Item = (&String, &DimArray)> {
        self.variables.iter().chain(self.coords.iter())
    }

    pub fn variable(&self, name: &str) -> Option<&DimArray> {
        self.variables.get(name)
    }

    pub fn coord(&self, name: &str) -> Option<&DimArray> {
        self.coords.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&String, &DimArray)> {
        self.variables.iter()
    }

    pub fn coords(&self) -> impl Iterator<Item = (&String, &DimArray)> {
        self.coords.iter()
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(|k| k.as_str())
    }

    pub fn coord_names(&self) -> impl Iterator<Item = &str> {
        self.coords.keys().map(|k| k.as_str())
    }

    /// True when `name` is a variable or a coordinate.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name) || self.coords.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.coords.is_empty()
    }

    pub fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, AttrValue> {
        &mut self.attrs
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.attrs.insert(key.to_string(), value.into());
    }

    /// Dimension names and sizes in first-seen order.
    pub fn dims(&self) -> IndexMap<String, usize> {
        let mut dims = IndexMap::new();
        for (_, entity) in self.entities() {
            for dim in entity.dims() {
                dims.entry(dim.clone())
                    .or_insert_with(|| entity.size_of(dim).unwrap_or(0));
            }
        }
        dims
    }

    pub fn size_of(&self, dim: &str) -> Option<usize> {
        self.entities().find_map(|(_, entity)| entity.size_of(dim))
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.size_of(dim).is_some()
    }

    /// Rename a variable or coordinate. Renaming a coordinate renames its
    /// dimension on every entity in this dataset (they are 1:1 here).
    pub fn rename(&mut self, old: &str, new: &str) -> DatasetResult<()> {
        if old == new {
            return Ok(());
        }
        if !self.contains(old) {
            return Err(DatasetError::UnknownEntity(old.to_string()));
        }
        if self.contains(new) {
            return Err(DatasetError::NamespaceConflict {
                name: new.to_string(),
            });
        }
        if self.variables.contains_key(old) {
            let variables = std::mem::take(&mut self.variables);
            self.variables = variables
                .into_iter()
                .map(|(name, array)| {
                    if name == old {
                        (new.to_string(), array)
                    } else {
                        (name, array)
                    }
                })
                .collect();
        } else {
            let coords = std::mem::take(&mut self.coords);
            self.coords = coords
                .into_iter()
                .map(|(name, mut array)| {
                    if name == old {
                        array.rename_dim(old, new);
                        (new.to_string(), array)
                    } else {
                        (name, array)
                    }
                })
                .collect();
            for (_, array) in self.variables.iter_mut() {
                array.rename_dim(old, new);
            }
        }
        Ok(())
    }

    /// Override-merge: values from `self` win over `older` on overlapping
    /// coordinates, variables and coordinates are unioned, attributes are
    /// unioned with `self` winning on key conflicts. Structural
    /// impossibility is a typed [`DatasetError::MergeIncompatible`].
    pub fn combine_override(&self, older: &Dataset) -> DatasetResult<Dataset> {
        // Per-dimension result labels: equal labels kept as-is, differing
        // labels unioned ascending (positions outside a side filled NaN).
        let mut merged_coords: IndexMap<String, Vec<f64>> = IndexMap::new();
        for (name, coord) in self.coords.iter().chain(older.coords.iter()) {
            let values: Vec<f64> = coord.data().iter().cloned().collect();
            match merged_coords.get_mut(name) {
                None => {
                    merged_coords.insert(name.clone(), values);
                }
                Some(existing) if *existing == values => {}
                Some(existing) => {
                    let mut union = existing.clone();
                    union.extend(values);
                    union.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    union.dedup();
                    *existing = union;
                }
            }
        }

        let mut result = Dataset::new();
        for (name, values) in &merged_coords {
            let mut coord = DimArray::vector(name, values.clone());
            if let Some(old_attrs) = older.coords.get(name) {
                coord.attrs_mut().extend(old_attrs.attrs().clone());
            }
            if let Some(new_attrs) = self.coords.get(name) {
                coord.attrs_mut().extend(new_attrs.attrs().clone());
            }
            result.insert_coord(name, coord)?;
        }

        let names: Vec<String> = self
            .variables
            .keys()
            .chain(older.variables.keys())
            .unique()
            .cloned()
            .collect();
        for name in &names {
            let new_var = self.variables.get(name);
            let old_var = older.variables.get(name);
            let template = new_var.or(old_var).expect("name came from a key set");
            if let (Some(new_var), Some(old_var)) = (new_var, old_var) {
                if new_var.dims() != old_var.dims() {
                    return Err(DatasetError::MergeIncompatible {
                        reason: format!(
                            "variable '{}' has dims {:?} on one side and {:?} on the other",
                            name,
                            new_var.dims(),
                            old_var.dims()
                        ),
                    });
                }
            }

            // Result shape per dim: merged labels when present, else the
            // (necessarily agreeing) side size.
            let mut shape = Vec::with_capacity(template.dims().len());
            for dim in template.dims() {
                let size = match merged_coords.get(dim) {
                    Some(labels) => labels.len(),
                    None => {
                        let new_size = new_var.and_then(|v| v.size_of(dim));
                        let old_size = old_var.and_then(|v| v.size_of(dim));
                        match (new_size, old_size) {
                            (Some(a), Some(b)) if a != b => {
                                return Err(DatasetError::MergeIncompatible {
                                    reason: format!(
                                        "variable '{name}' disagrees on unlabeled dimension '{dim}' ({a} vs {b})"
                                    ),
                                });
                            }
                            (Some(size), _) | (None, Some(size)) => size,
                            (None, None) => 0,
                        }
                    }
                };
                shape.push(size);
            }

            let mut data = ArrayD::from_elem(ndarray::IxDyn(&shape), f64::NAN);
            if let Some(old_var) = old_var {
                write_side(&mut data, old_var, older, &merged_coords, name)?;
            }
            if let Some(new_var) = new_var {
                write_side(&mut data, new_var, self, &merged_coords, name)?;
            }

            let mut array = DimArray::new(template.dims().to_vec(), data)?;
            if let Some(old_var) = old_var {
                array.attrs_mut().extend(old_var.attrs().clone());
            }
            if let Some(new_var) = new_var {
                array.attrs_mut().extend(new_var.attrs().clone());
            }
            result.insert_variable(name, array)?;
        }

        let mut attrs = older.attrs.clone();
        attrs.extend(self.attrs.clone());
        result.attrs = attrs;
        Ok(result)
    }

    /// `(dim: size, ...)` listing used by the summary and the projection's
    /// details column.
    pub fn dims_listing(&self) -> String {
        format!(
            "({})",
            self.dims()
                .iter()
                .map(|(dim, size)| format!("{dim}: {size}"))
                .join(", ")
        )
    }

    /// `(dims) dtype nelems` descriptor for one variable or coordinate.
    pub fn entry_descriptor(&self, name: &str) -> Option<String> {
        self.variables
            .get(name)
            .or_else(|| self.coords.get(name))
            .map(|entity| entity.descriptor())
    }

    /// Canonical textual summary with `Coordinates:` and `Data variables:`
    /// sections.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Dimensions:  {}\n", self.dims_listing()));
        out.push_str("Coordinates:\n");
        if self.coords.is_empty() {
            out.push_str("    *empty*\n");
        }
        for (name, coord) in &self.coords {
            out.push_str(&format!("  * {name}  {}\n", coord.descriptor()));
        }
        out.push_str("Data variables:\n");
        if self.variables.is_empty() {
            out.push_str("    *empty*\n");
        }
        for (name, var) in &self.variables {
            out.push_str(&format!("    {name}  {}\n", var.descriptor()));
        }
        out
    }
}

/// Copy one side's values into the merged array, mapping positions through
/// the merged coordinate labels.
fn write_side(
    target: &mut ArrayD<f64>,
    side: &DimArray,
    side_ds: &Dataset,
    merged_coords: &IndexMap<String, Vec<f64>>,
    name: &str,
) -> DatasetResult<()> {
    let mut position_maps: Vec<Vec<usize>> = Vec::with_capacity(side.dims().len());
    for dim in side.dims() {
        let size = side.size_of(dim).unwrap_or(0);
        let map = match (side_ds.coord(dim), merged_coords.get(dim)) {
            (Some(side_coord), Some(labels)) => side_coord
                .data()
                .iter()
                .map(|value| {
                    labels
                        .iter()
                        .position(|l| l == value)
                        .ok_or(DatasetError::CoordValueNotFound {
                            dim: dim.clone(),
                            value: *value,
                        })
                })
                .collect::<DatasetResult<Vec<usize>>>()?,
            (None, Some(labels)) if labels.len() != size => {
                return Err(DatasetError::MergeIncompatible {
                    reason: format!(
                        "variable '{name}' has no coordinate for '{dim}' to align against"
                    ),
                });
            }
            _ => (0..size).collect(),
        };
        position_maps.push(map);
    }
    for (index, value) in side.data().indexed_iter() {
        let target_index: Vec<usize> = index
            .slice()
            .iter()
            .enumerate()
            .map(|(ax, &i)| position_maps[ax][i])
            .collect();
        target[ndarray::IxDyn(&target_index)] = *value;
    }
    Ok(())
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset_with_var() -> Dataset {
        let mut ds = Dataset::new();
        ds.insert_variable(
            "current",
            DimArray::from_shape_vec(&["sweep", "time"], &[2, 3], vec![0.0; 6]).unwrap(),
        )
        .unwrap();
        ds.set_coord_values("time", vec![0.0, 0.1, 0.2]).unwrap();
        ds
    }

    #[test]
    fn test_namespace_is_shared_between_variables_and_coords() {
        let mut ds = dataset_with_var();
        let err = ds.insert_variable("time", DimArray::vector("time", vec![1.0, 2.0, 3.0]));
        assert!(matches!(
            err,
            Err(DatasetError::NamespaceConflict { name }) if name == "time"
        ));
    }

    #[test]
    fn test_dimension_sizes_must_agree() {
        let mut ds = dataset_with_var();
        let err = ds.insert_variable(
            "voltage",
            DimArray::from_shape_vec(&["time"], &[5], vec![0.0; 5]).unwrap(),
        );
        assert!(matches!(err, Err(DatasetError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_rename_collision_fails_without_mutation() {
        let mut ds = dataset_with_var();
        let before = ds.clone();
        let err = ds.rename("current", "time");
        assert!(matches!(err, Err(DatasetError::NamespaceConflict { .. })));
        assert_eq!(ds, before);
    }

    #[test]
    fn test_rename_coord_renames_dimension_everywhere() {
        let mut ds = dataset_with_var();
        ds.rename("time", "t").unwrap();
        assert!(ds.coord("t").is_some());
        assert_eq!(
            ds.variable("current").unwrap().dims(),
            &["sweep".to_string(), "t".to_string()]
        );
    }

    #[test]
    fn test_combine_override_new_side_wins() {
        let mut old = Dataset::new();
        old.set_coord_values("sweep", vec![0.0, 1.0]).unwrap();
        old.insert_variable(
            "current",
            DimArray::from_shape_vec(&["sweep"], &[2], vec![1.0, 2.0]).unwrap(),
        )
        .unwrap();

        let mut new = Dataset::new();
        new.set_coord_values("sweep", vec![1.0, 2.0]).unwrap();
        new.insert_variable(
            "current",
            DimArray::from_shape_vec(&["sweep"], &[2], vec![20.0, 30.0]).unwrap(),
        )
        .unwrap();

        let merged = new.combine_override(&old).unwrap();
        let coord: Vec<f64> = merged.coord("sweep").unwrap().data().iter().cloned().collect();
        assert_eq!(coord, vec![0.0, 1.0, 2.0]);
        let values: Vec<f64> = merged
            .variable("current")
            .unwrap()
            .data()
            .iter()
            .cloned()
            .collect();
        assert_eq!(values, vec![1.0, 20.0, 30.0]);
    }

    #[test]
    fn test_summary_lists_sections() {
        let ds = dataset_with_var();
        let summary = ds.summary();
        assert!(summary.contains("Dimensions:  (sweep: 2, time: 3)"));
        assert!(summary.contains("Coordinates:\n  * time  (time) float64 3"));
        assert!(summary.contains("Data variables:\n    current  (sweep, time) float64 6"));
    }
}
