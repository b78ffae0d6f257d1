//! Numeric fit engines: reducers, polynomial and spline least squares,
//! and nonlinear expression fitting.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::array::AttrValue;
use crate::errors::{FitError, FitResult};
use crate::expr::Expr;

/// Built-in reduction operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Median,
    Min,
    Max,
    AbsMax,
    Sum,
}

impl Reducer {
    /// Lower-case operator name, used for default result names.
    pub fn name(&self) -> &'static str {
        match self {
            Reducer::Mean => "mean",
            Reducer::Median => "median",
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::AbsMax => "absmax",
            Reducer::Sum => "sum",
        }
    }

    pub fn parse(name: &str) -> Option<Reducer> {
        match name.to_lowercase().as_str() {
            "mean" => Some(Reducer::Mean),
            "median" => Some(Reducer::Median),
            "min" => Some(Reducer::Min),
            "max" => Some(Reducer::Max),
            "absmax" => Some(Reducer::AbsMax),
            "sum" => Some(Reducer::Sum),
            _ => None,
        }
    }

    /// Collapse a lane of values to a single value. Empty lanes yield NaN.
    pub fn apply(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        match self {
            Reducer::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Reducer::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            Reducer::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Reducer::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Reducer::AbsMax => values.iter().map(|v| v.abs()).fold(f64::NEG_INFINITY, f64::max),
            Reducer::Sum => values.iter().sum(),
        }
    }
}

/// Per-parameter hint for expression fits. Missing fields are tolerated:
/// whatever is present is applied, the rest falls back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamHint {
    pub value: Option<f64>,
    pub bounds: Option<(f64, f64)>,
    pub vary: Option<bool>,
}

/// Options shared by the fit engines. `degree` is required for polynomial
/// fits, `segments` for splines, `params` feeds expression fits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub degree: Option<usize>,
    pub segments: Option<usize>,
    pub params: BTreeMap<String, ParamHint>,
}

impl FitOptions {
    pub fn is_default(&self) -> bool {
        self.degree.is_none() && self.segments.is_none() && self.params.is_empty()
    }

    /// Attribute representation recorded in the result dataset's fit report.
    pub fn to_attr(&self) -> AttrValue {
        let mut map = BTreeMap::new();
        if let Some(degree) = self.degree {
            map.insert("degree".to_string(), AttrValue::Int(degree as i64));
        }
        if let Some(segments) = self.segments {
            map.insert("segments".to_string(), AttrValue::Int(segments as i64));
        }
        if !self.params.is_empty() {
            let mut params = BTreeMap::new();
            for (name, hint) in &self.params {
                let mut entry = BTreeMap::new();
                if let Some(value) = hint.value {
                    entry.insert("value".to_string(), AttrValue::Float(value));
                }
                if let Some((lo, hi)) = hint.bounds {
                    entry.insert(
                        "bounds".to_string(),
                        AttrValue::List(vec![AttrValue::Float(lo), AttrValue::Float(hi)]),
                    );
                }
                if let Some(vary) = hint.vary {
                    entry.insert("vary".to_string(), AttrValue::Bool(vary));
                }
                params.insert(name.clone(), AttrValue::Map(entry));
            }
            map.insert("params".to_string(), AttrValue::Map(params));
        }
        AttrValue::Map(map)
    }
}

/// Least-squares polynomial fit. Coefficients are returned highest power
/// first, matching the evaluation order of [`polyval`].
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> FitResult<Vec<f64>> {
    if x.len() != y.len() || x.len() < degree + 1 {
        return Err(FitError::InsufficientData {
            needed: degree + 1,
            got: x.len().min(y.len()),
        });
    }
    let ncoef = degree + 1;
    let design = DMatrix::from_fn(x.len(), ncoef, |row, col| x[row].powi((degree - col) as i32));
    let rhs = DVector::from_column_slice(y);
    let svd = design.svd(true, true);
    let coefs = svd.solve(&rhs, 1e-12).map_err(|_| FitError::Singular)?;
    let coefs: Vec<f64> = coefs.iter().cloned().collect();
    if coefs.iter().any(|c| !c.is_finite()) {
        return Err(FitError::NonFinite);
    }
    Ok(coefs)
}

/// Horner evaluation of polynomial coefficients (highest power first).
pub fn polyval(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().fold(0.0, |acc, c| acc * x + c)
}

/// A fitted cubic B-spline: full knot vector plus basis coefficients.
#[derive(Debug, Clone)]
pub struct Spline {
    knots: Vec<f64>,
    coefs: Vec<f64>,
    degree: usize,
}

impl Spline {
    pub fn eval(&self, x: f64) -> f64 {
        let ncoef = self.coefs.len();
        (0..ncoef)
            .map(|i| self.coefs[i] * bspline_basis(&self.knots, i, self.degree, x))
            .sum()
    }
}

/// Cox-de Boor basis function `B_{i,k}` over the full knot vector.
///
/// The half-open support convention is flipped at the final knot so the
/// spline is defined on the closed interval.
fn bspline_basis(knots: &[f64], i: usize, k: usize, x: f64) -> f64 {
    if k == 0 {
        if knots[i] >= knots[i + 1] {
            // zero-width span
            return 0.0;
        }
        let last_span = knots[i + 1..].iter().all(|t| *t == knots[i + 1]);
        let upper_ok = x < knots[i + 1] || (last_span && x == knots[i + 1]);
        return if x >= knots[i] && upper_ok { 1.0 } else { 0.0 };
    }
    let mut value = 0.0;
    let denom_left = knots[i + k] - knots[i];
    if denom_left > 0.0 {
        value += (x - knots[i]) / denom_left * bspline_basis(knots, i, k - 1, x);
    }
    let denom_right = knots[i + k + 1] - knots[i + 1];
    if denom_right > 0.0 {
        value += (knots[i + k + 1] - x) / denom_right * bspline_basis(knots, i + 1, k - 1, x);
    }
    value
}

/// Least-squares cubic B-spline with interior knots at every
/// `len/segments`-th sample. Degenerate knot sets (fewer than 2 usable
/// knots) fall back to the first and second-to-last interior samples.
pub fn spline_fit(x: &[f64], y: &[f64], segments: usize) -> FitResult<Spline> {
    const DEGREE: usize = 3;
    if x.len() != y.len() || x.len() < DEGREE + 2 {
        return Err(FitError::InsufficientData {
            needed: DEGREE + 2,
            got: x.len().min(y.len()),
        });
    }
    let n = x.len();
    let step = (n / segments.max(1)).max(1);
    let mut interior: Vec<f64> = x[..n - step]
        .iter()
        .skip(step)
        .step_by(step)
        .cloned()
        .collect();
    if interior.len() < 2 {
        interior = vec![x[1], x[n - 2]];
    }

    let mut knots = Vec::with_capacity(interior.len() + 2 * (DEGREE + 1));
    knots.extend(std::iter::repeat(x[0]).take(DEGREE + 1));
    knots.extend(interior.iter().cloned());
    knots.extend(std::iter::repeat(x[n - 1]).take(DEGREE + 1));

    let ncoef = knots.len() - DEGREE - 1;
    if n < ncoef {
        return Err(FitError::InsufficientData { needed: ncoef, got: n });
    }
    let design = DMatrix::from_fn(n, ncoef, |row, col| bspline_basis(&knots, col, DEGREE, x[row]));
    let rhs = DVector::from_column_slice(y);
    let svd = design.svd(true, true);
    let coefs = svd.solve(&rhs, 1e-12).map_err(|_| FitError::Singular)?;
    let coefs: Vec<f64> = coefs.iter().cloned().collect();
    if coefs.iter().any(|c| !c.is_finite()) {
        return Err(FitError::NonFinite);
    }
    Ok(Spline {
        knots,
        coefs,
        degree: DEGREE,
    })
}

const LM_MAX_ITER: usize = 100;
const LM_EPS: f64 = 1e-10;

/// Nonlinear least-squares fit of a parsed expression via
/// Levenberg-Marquardt with a numeric Jacobian.
///
/// Parameter start values come from the hints (clamped into bounds),
/// defaulting to 1.0. Parameters with `vary: false` stay fixed. Returns the
/// optimized parameter set in expression order.
pub fn fit_expression(
    expr: &Expr,
    x: &[f64],
    y: &[f64],
    options: &FitOptions,
) -> FitResult<IndexMap<String, f64>> {
    let names = expr.parameters();
    if x.len() != y.len() || x.len() < names.len().max(1) {
        return Err(FitError::InsufficientData {
            needed: names.len().max(1),
            got: x.len().min(y.len()),
        });
    }

    let mut values: Vec<f64> = Vec::with_capacity(names.len());
    let mut bounds: Vec<(f64, f64)> = Vec::with_capacity(names.len());
    let mut vary: Vec<bool> = Vec::with_capacity(names.len());
    for name in &names {
        let hint = options.params.get(name).cloned().unwrap_or_default();
        let (lo, hi) = hint.bounds.unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
        let start = hint.value.unwrap_or(1.0).clamp(lo, hi);
        values.push(start);
        bounds.push((lo, hi));
        vary.push(hint.vary.unwrap_or(true));
    }

    let residuals = |params: &[f64]| -> FitResult<DVector<f64>> {
        let env: IndexMap<String, f64> = names
            .iter()
            .cloned()
            .zip(params.iter().cloned())
            .collect();
        let mut r = DVector::zeros(x.len());
        for i in 0..x.len() {
            let value = expr.eval(x[i], &env)?;
            r[i] = y[i] - value;
        }
        if r.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }
        Ok(r)
    };

    let free: Vec<usize> = (0..names.len()).filter(|&i| vary[i]).collect();
    if free.is_empty() {
        residuals(&values)?;
        return Ok(pack(&names, &values));
    }

    let mut r = residuals(&values)?;
    let mut cost = r.norm_squared();
    let mut lambda = 1e-3;

    for _ in 0..LM_MAX_ITER {
        // Numeric Jacobian of the residual vector over the free parameters.
        let mut jac = DMatrix::zeros(x.len(), free.len());
        for (col, &pi) in free.iter().enumerate() {
            let h = 1e-8 * values[pi].abs().max(1.0);
            let mut stepped = values.clone();
            stepped[pi] += h;
            let r_stepped = residuals(&stepped)?;
            for row in 0..x.len() {
                jac[(row, col)] = (r_stepped[row] - r[row]) / h;
            }
        }
        let jtj = jac.transpose() * &jac;
        let jtr = jac.transpose() * &r;

        let mut improved = false;
        for _ in 0..10 {
            let mut damped = jtj.clone();
            for i in 0..free.len() {
                damped[(i, i)] += lambda * jtj[(i, i)].max(LM_EPS);
            }
            let delta = match damped.lu().solve(&jtr) {
                Some(delta) => delta,
                None => return Err(FitError::Singular),
            };
            let mut candidate = values.clone();
            for (col, &pi) in free.iter().enumerate() {
                let (lo, hi) = bounds[pi];
                candidate[pi] = (candidate[pi] - delta[col]).clamp(lo, hi);
            }
            match residuals(&candidate) {
                Ok(r_candidate) => {
                    let candidate_cost = r_candidate.norm_squared();
                    if candidate_cost < cost {
                        let gain = cost - candidate_cost;
                        values = candidate;
                        r = r_candidate;
                        cost = candidate_cost;
                        lambda = (lambda / 10.0).max(1e-12);
                        improved = true;
                        if gain < LM_EPS * (1.0 + cost) {
                            return Ok(pack(&names, &values));
                        }
                        break;
                    }
                }
                Err(FitError::NonFinite) => {}
                Err(err) => return Err(err),
            }
            lambda *= 10.0;
        }
        if !improved {
            break;
        }
    }

    if !cost.is_finite() {
        return Err(FitError::NonFinite);
    }
    Ok(pack(&names, &values))
}

fn pack(names: &[String], values: &[f64]) -> IndexMap<String, f64> {
    names.iter().cloned().zip(values.iter().cloned()).collect()
}
