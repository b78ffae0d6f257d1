#![allow(dead_code)]

use std::sync::Once;

use dimtree::{DataTree, Dataset, DimArray, NodeId};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub const SERIES: usize = 3;
pub const SWEEPS: usize = 10;
pub const SAMPLES: usize = 100;

/// raw current: strictly increasing in every index so selections are easy
/// to cross-check by hand.
pub fn raw_current(series: usize, sweep: usize, t: usize) -> f64 {
    (series * 10_000 + sweep * 100 + t) as f64
}

pub fn raw_voltage(series: usize, sweep: usize, t: usize) -> f64 {
    2.0 * raw_current(series, sweep, t) + 0.5
}

pub fn baselined_current(series: usize, sweep: usize, t: usize) -> f64 {
    raw_current(series, sweep, t) - 5_000.0
}

/// scaled current over series index {1} and sweeps {5, 8}.
pub fn scaled_current(sweep_index: usize, t: usize) -> f64 {
    (7_000_000 + sweep_index * 1_000 + t) as f64
}

pub fn time_values() -> Vec<f64> {
    (0..SAMPLES).map(|t| t as f64 * 0.01).collect()
}

fn cube<F: Fn(usize, usize, usize) -> f64>(f: F) -> Vec<f64> {
    let mut values = Vec::with_capacity(SERIES * SWEEPS * SAMPLES);
    for s in 0..SERIES {
        for w in 0..SWEEPS {
            for t in 0..SAMPLES {
                values.push(f(s, w, t));
            }
        }
    }
    values
}

pub struct Rig {
    pub tree: DataTree,
    pub raw: NodeId,
    pub baselined: NodeId,
    pub scaled: NodeId,
}

/// The electrophysiology-shaped hierarchy from the end-to-end scenario:
/// raw (current, voltage over [series, sweep, time], time labeled) →
/// baselined (current only, no coordinates) →
/// scaled (current over series=[1], sweep=[5, 8], both labeled).
pub fn electro_tree() -> Rig {
    init_tracing();

    let shape = [SERIES, SWEEPS, SAMPLES];
    let dims = ["series", "sweep", "time"];

    let mut raw_ds = Dataset::new();
    raw_ds
        .insert_variable(
            "current",
            DimArray::from_shape_vec(&dims, &shape, cube(raw_current))
                .unwrap()
                .with_attr("units", "A"),
        )
        .unwrap();
    raw_ds
        .insert_variable(
            "voltage",
            DimArray::from_shape_vec(&dims, &shape, cube(raw_voltage))
                .unwrap()
                .with_attr("units", "V"),
        )
        .unwrap();
    raw_ds.set_coord_values("time", time_values()).unwrap();

    let mut baselined_ds = Dataset::new();
    baselined_ds
        .insert_variable(
            "current",
            DimArray::from_shape_vec(&dims, &shape, cube(baselined_current)).unwrap(),
        )
        .unwrap();

    let mut scaled_values = Vec::with_capacity(2 * SAMPLES);
    for w in 0..2 {
        for t in 0..SAMPLES {
            scaled_values.push(scaled_current(w, t));
        }
    }
    let mut scaled_ds = Dataset::new();
    scaled_ds
        .insert_variable(
            "current",
            DimArray::from_shape_vec(&dims, &[1, 2, SAMPLES], scaled_values).unwrap(),
        )
        .unwrap();
    scaled_ds.set_coord_values("series", vec![1.0]).unwrap();
    scaled_ds.set_coord_values("sweep", vec![5.0, 8.0]).unwrap();

    let mut tree = DataTree::new("raw", Some(raw_ds));
    let raw = tree.root();
    let baselined = tree
        .add_child(raw, "baselined", Some(baselined_ds))
        .unwrap();
    let scaled = tree.add_child(baselined, "scaled", Some(scaled_ds)).unwrap();

    Rig {
        tree,
        raw,
        baselined,
        scaled,
    }
}
