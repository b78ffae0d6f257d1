//! Reductions and curve fits over resolved data, materialized as child
//! nodes of the aggregated node.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use itertools::Itertools;
use tracing::{debug, instrument};

use crate::array::{AttrValue, CoordMap, DataArray};
use crate::dataset::Dataset;
use crate::errors::{FitError, TreeError, TreeResult};
use crate::expr::{parse_expression, Expr};
use crate::fit::{fit_expression, polyfit, polyval, spline_fit, FitOptions, Reducer};
use crate::inherit::{coord_value_map, inherited_coord, inherited_coords, inherited_data};
use crate::tree::{DataTree, NodeId};

/// Policy for storing a result dataset under an already-used child name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppendMode {
    /// Leave an existing child untouched and return nothing.
    DoNotMergeOrReplace,
    /// Drop any existing child and insert the new result.
    Replace,
    /// Combine with an existing child (new values win); incompatible
    /// structure is a typed failure without mutation.
    Merge,
    /// Like `Merge`, falling back to `Replace` when combination is
    /// impossible.
    #[default]
    MergeOrReplace,
}

/// Ordered cartesian product of coordinate value lists: one mapping per
/// combination, the last-listed dimension varying fastest.
pub fn permutations(coords: &CoordMap) -> Vec<IndexMap<String, f64>> {
    if coords.is_empty() {
        return vec![IndexMap::new()];
    }
    coords
        .iter()
        .map(|(dim, values)| {
            values
                .iter()
                .map(|value| (dim.clone(), *value))
                .collect::<Vec<_>>()
        })
        .multi_cartesian_product()
        .map(|pairs| pairs.into_iter().collect())
        .collect()
}

/// Complete a user-given selection with inherited coordinate values for
/// every dimension of the node's dataset it does not mention.
fn fill_selection(tree: &DataTree, node: NodeId, coords: &CoordMap) -> TreeResult<CoordMap> {
    let mut filled = coords.clone();
    if let Some(ds) = tree.dataset(node) {
        for dim in ds.dims().keys() {
            if !filled.contains_key(dim) {
                let coord = inherited_coord(tree, node, dim)?;
                filled.insert(dim.clone(), coord.data().iter().cloned().collect());
            }
        }
    }
    Ok(filled)
}

/// Copy a resolved array into a result dataset as a variable plus the
/// coordinates it carries.
fn insert_resolved(result: &mut Dataset, name: &str, array: &DataArray) -> TreeResult<()> {
    result.insert_variable(name, array.values().clone())?;
    for (dim, values) in array.coords() {
        if result.coord(dim).is_none() {
            result.set_coord_values(dim, values.clone())?;
        }
    }
    Ok(())
}

/// Apply a reduction to inherited data and append the result as a child
/// node. Returns the stored child, or `None` when the node has no dataset
/// or the append policy declined to store.
#[allow(clippy::too_many_arguments)]
#[instrument(level = "debug", skip(tree, coords))]
pub fn reduce(
    tree: &mut DataTree,
    node: NodeId,
    names: &[&str],
    op: Reducer,
    dim: Option<&str>,
    coords: Option<&CoordMap>,
    result_name: Option<&str>,
    append: AppendMode,
) -> TreeResult<Option<NodeId>> {
    if tree.dataset(node).is_none() {
        return Ok(None);
    }
    let selection = match coords {
        Some(coords) => Some(fill_selection(tree, node, coords)?),
        None => None,
    };
    let result_name = match result_name {
        Some(name) => name.to_string(),
        None => match dim {
            Some(dim) => format!("{dim} {}", op.name()),
            None => op.name().to_string(),
        },
    };

    let mut result = Dataset::new();
    for &name in names {
        let var = match inherited_data(tree, node, name) {
            Ok(var) => var,
            Err(TreeError::MissingData { .. }) => continue,
            Err(err) => return Err(err),
        };
        let var = match &selection {
            Some(selection) => var.select(selection)?,
            None => var,
        };
        let reduced = var.reduce(op, dim)?;
        insert_resolved(&mut result, name, &reduced)?;
    }
    append_result(tree, node, &result_name, result, append)
}

/// What a fit expression resolves to.
#[derive(Debug, Clone)]
enum FitKind {
    Reduce(Reducer),
    Polynomial(usize),
    Spline(usize),
    Expression(Expr),
}

/// Curve-fit request: the expression, the independent dimension, and the
/// optional knobs mirroring the reduction parameters.
#[derive(Debug, Clone)]
pub struct FitSpec {
    pub expression: String,
    /// Independent (fitted-along) dimension.
    pub xdim: String,
    pub options: FitOptions,
    /// x-samples used to optimize; evaluation happens on the output grid.
    pub optimize_x: Option<Vec<f64>>,
    pub coords: Option<CoordMap>,
    pub result_name: Option<String>,
    pub append: AppendMode,
}

impl FitSpec {
    pub fn new(expression: &str, xdim: &str) -> Self {
        Self {
            expression: expression.to_string(),
            xdim: xdim.to_string(),
            options: FitOptions::default(),
            optimize_x: None,
            coords: None,
            result_name: None,
            append: AppendMode::default(),
        }
    }
}

fn resolve_fit_kind(expression: &str, options: &FitOptions) -> TreeResult<FitKind> {
    if let Some(op) = Reducer::parse(expression) {
        return Ok(FitKind::Reduce(op));
    }
    match expression.to_lowercase().as_str() {
        "polynomial" => Ok(FitKind::Polynomial(
            options.degree.ok_or(FitError::MissingOption("degree"))?,
        )),
        "spline" => Ok(FitKind::Spline(
            options.segments.ok_or(FitError::MissingOption("segments"))?,
        )),
        _ => Ok(FitKind::Expression(parse_expression(expression)?)),
    }
}

fn compute_fit(
    kind: &FitKind,
    xdata: &[f64],
    ydata: &[f64],
    xfit: &[f64],
    options: &FitOptions,
    fit_attrs: &mut BTreeMap<String, AttrValue>,
) -> Result<Vec<f64>, FitError> {
    match kind {
        FitKind::Reduce(op) => Ok(vec![op.apply(ydata)]),
        FitKind::Polynomial(degree) => {
            let coefs = polyfit(xdata, ydata, *degree)?;
            Ok(xfit.iter().map(|x| polyval(&coefs, *x)).collect())
        }
        FitKind::Spline(segments) => {
            let spline = spline_fit(xdata, ydata, *segments)?;
            Ok(xfit.iter().map(|x| spline.eval(*x)).collect())
        }
        FitKind::Expression(expr) => {
            let params = fit_expression(expr, xdata, ydata, options)?;
            let values = xfit
                .iter()
                .map(|x| expr.eval(*x, &params))
                .collect::<Result<Vec<f64>, FitError>>()?;
            fit_attrs.insert(
                "optimized".to_string(),
                AttrValue::Map(
                    params
                        .into_iter()
                        .map(|(name, value)| (name, AttrValue::Float(value)))
                        .collect(),
                ),
            );
            Ok(values)
        }
    }
}

/// Fit a model to inherited data, independently per permutation of every
/// non-independent requested coordinate dimension, and append the evaluated
/// fit as a child node.
///
/// A failed fit writes NaN into that permutation's output slice and the
/// remaining permutations continue. The fit report (expression, options,
/// last optimized parameters) lands in the result dataset's `fit`
/// attribute.
#[instrument(level = "debug", skip(tree, spec), fields(expression = %spec.expression))]
pub fn curve_fit(
    tree: &mut DataTree,
    node: NodeId,
    names: &[&str],
    spec: &FitSpec,
) -> TreeResult<Option<NodeId>> {
    if tree.dataset(node).is_none() {
        return Ok(None);
    }
    let coords = match &spec.coords {
        Some(coords) => Some(fill_selection(tree, node, coords)?),
        None => None,
    };
    let result_name = spec
        .result_name
        .clone()
        .unwrap_or_else(|| spec.expression.clone());
    let kind = resolve_fit_kind(&spec.expression, &spec.options)?;

    let mut perm_base = match &coords {
        Some(coords) => coords.clone(),
        None => coord_value_map(&inherited_coords(tree, node)?),
    };
    if perm_base.shift_remove(&spec.xdim).is_none() {
        return Err(TreeError::MissingDimension {
            dim: spec.xdim.clone(),
            node: tree.name(node)?.to_string(),
        });
    }
    let perms = permutations(&perm_base);

    let optimization_coords = match &spec.optimize_x {
        Some(optimize_x) => {
            let mut oc = match &coords {
                Some(coords) => coords.clone(),
                None => coord_value_map(&inherited_coords(tree, node)?),
            };
            oc.insert(spec.xdim.clone(), optimize_x.clone());
            Some(oc)
        }
        None => coords.clone(),
    };

    let mut fit_attrs: BTreeMap<String, AttrValue> = BTreeMap::new();
    fit_attrs.insert(
        "expression".to_string(),
        AttrValue::Str(spec.expression.clone()),
    );
    if !spec.options.is_default() {
        fit_attrs.insert("options".to_string(), spec.options.to_attr());
    }

    let mut fitted: Vec<(String, DataArray, DataArray)> = Vec::new();
    for &name in names {
        let var = match inherited_data(tree, node, name) {
            Ok(var) => var,
            Err(TreeError::MissingData { .. }) => continue,
            Err(err) => return Err(err),
        };
        let data = match &optimization_coords {
            Some(oc) => var.select(oc)?,
            None => var.clone(),
        };
        // Allocation only; every slice is overwritten below.
        let fit = match &coords {
            Some(coords) => var.select(coords)?,
            None => var.clone(),
        };
        fitted.push((name.to_string(), data, fit));
    }

    for (name, data, fit) in &mut fitted {
        let xdata = data
            .coord(&spec.xdim)
            .ok_or_else(|| TreeError::MissingDimension {
                dim: spec.xdim.clone(),
                node: name.clone(),
            })?
            .to_vec();
        let xfit = fit
            .coord(&spec.xdim)
            .ok_or_else(|| TreeError::MissingDimension {
                dim: spec.xdim.clone(),
                node: name.clone(),
            })?
            .to_vec();
        for perm in &perms {
            let perm_selection: CoordMap = perm
                .iter()
                .map(|(dim, value)| (dim.clone(), vec![*value]))
                .collect();
            let ydata = data.select(&perm_selection)?.to_vec();
            let yfit = match compute_fit(&kind, &xdata, &ydata, &xfit, &spec.options, &mut fit_attrs)
            {
                Ok(yfit) => yfit,
                Err(err) => {
                    debug!(variable = %name, ?perm, %err, "fit failed, writing NaN slice");
                    vec![f64::NAN]
                }
            };
            let mut write_selection = perm_selection;
            write_selection.insert(spec.xdim.clone(), xfit.clone());
            fit.assign_where(&write_selection, &yfit)?;
        }
    }

    let mut result = Dataset::new();
    for (name, _, fit) in &fitted {
        insert_resolved(&mut result, name, fit)?;
    }
    result.set_attr("fit", AttrValue::Map(fit_attrs));
    append_result(tree, node, &result_name, result, spec.append)
}

/// Store a result dataset under `node` according to the append policy.
fn append_result(
    tree: &mut DataTree,
    node: NodeId,
    result_name: &str,
    result: Dataset,
    append: AppendMode,
) -> TreeResult<Option<NodeId>> {
    let Some(existing) = tree.child_by_name(node, result_name) else {
        return Ok(Some(tree.add_child(node, result_name, Some(result))?));
    };
    match append {
        AppendMode::DoNotMergeOrReplace => Ok(None),
        AppendMode::Replace => {
            tree.remove_subtree(existing)?;
            Ok(Some(tree.add_child(node, result_name, Some(result))?))
        }
        AppendMode::Merge => {
            let old = tree.dataset(existing).cloned().unwrap_or_default();
            let merged = result.combine_override(&old)?;
            tree.set_dataset(existing, Some(merged))?;
            Ok(Some(existing))
        }
        AppendMode::MergeOrReplace => {
            let old = tree.dataset(existing).cloned().unwrap_or_default();
            match result.combine_override(&old) {
                Ok(merged) => {
                    tree.set_dataset(existing, Some(merged))?;
                    Ok(Some(existing))
                }
                Err(err) => {
                    debug!(%err, "merge failed, replacing existing result");
                    tree.remove_subtree(existing)?;
                    Ok(Some(tree.add_child(node, result_name, Some(result))?))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutations_odometer_order() {
        let mut coords = CoordMap::new();
        coords.insert("series".to_string(), vec![1.0, 2.0]);
        coords.insert("sweep".to_string(), vec![5.0, 8.0]);

        let perms = permutations(&coords);

        let as_pairs: Vec<Vec<(String, f64)>> = perms
            .iter()
            .map(|p| p.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .collect();
        assert_eq!(
            as_pairs,
            vec![
                vec![("series".to_string(), 1.0), ("sweep".to_string(), 5.0)],
                vec![("series".to_string(), 1.0), ("sweep".to_string(), 8.0)],
                vec![("series".to_string(), 2.0), ("sweep".to_string(), 5.0)],
                vec![("series".to_string(), 2.0), ("sweep".to_string(), 8.0)],
            ]
        );
    }

    #[test]
    fn test_permutations_of_nothing_is_one_empty_mapping() {
        let perms = permutations(&CoordMap::new());
        assert_eq!(perms.len(), 1);
        assert!(perms[0].is_empty());
    }
}
