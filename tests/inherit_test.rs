//! Tests for inheritance resolution across the ancestor chain.

mod common;

use common::{
    baselined_current, electro_tree, raw_voltage, scaled_current, time_values, SAMPLES, SERIES,
    SWEEPS,
};
use dimtree::{
    inherited_coord, inherited_coords, inherited_data, leaf_data, DataTree, Dataset, DimArray,
    TreeError,
};

#[test]
fn given_variable_defined_on_node_when_inheriting_then_identity() {
    // Property: at the point of definition, inherited data is the stored data.
    let rig = electro_tree();

    let voltage = inherited_data(&rig.tree, rig.raw, "voltage").unwrap();

    assert_eq!(voltage.shape(), &[SERIES, SWEEPS, SAMPLES]);
    let expected: Vec<f64> = (0..SERIES)
        .flat_map(|s| (0..SWEEPS).flat_map(move |w| (0..SAMPLES).map(move |t| raw_voltage(s, w, t))))
        .collect();
    assert_eq!(voltage.to_vec(), expected);
    // index coords synthesized for unlabeled dims, real ones inherited
    assert_eq!(voltage.coord("series").unwrap(), &[0.0, 1.0, 2.0]);
    assert_eq!(voltage.coord("time").unwrap(), time_values().as_slice());
}

#[test]
fn given_descendant_without_redefinition_when_inheriting_then_ancestor_data_is_projected() {
    let rig = electro_tree();

    // baselined spans the same footprint as raw: projection is the identity
    let at_raw = inherited_data(&rig.tree, rig.raw, "voltage").unwrap();
    let at_baselined = inherited_data(&rig.tree, rig.baselined, "voltage").unwrap();
    assert_eq!(at_baselined.to_vec(), at_raw.to_vec());

    // scaled narrows to series=1, sweep=[5, 8]
    let at_scaled = inherited_data(&rig.tree, rig.scaled, "voltage").unwrap();
    assert_eq!(at_scaled.shape(), &[1, 2, SAMPLES]);
    let expected: Vec<f64> = [5, 8]
        .iter()
        .flat_map(|&w| (0..SAMPLES).map(move |t| raw_voltage(1, w, t)))
        .collect();
    assert_eq!(at_scaled.to_vec(), expected);
    assert_eq!(at_scaled.coord("series").unwrap(), &[1.0]);
    assert_eq!(at_scaled.coord("sweep").unwrap(), &[5.0, 8.0]);
}

#[test]
fn given_no_defining_ancestor_when_inheriting_then_missing_data() {
    let rig = electro_tree();

    let result = inherited_data(&rig.tree, rig.scaled, "impedance");

    assert!(matches!(
        result,
        Err(TreeError::MissingData { name, .. }) if name == "impedance"
    ));
}

#[test]
fn given_ancestor_coord_when_inheriting_coord_then_nearest_definition_wins() {
    let rig = electro_tree();

    // time labeled at raw only, lengths agree all the way down
    let time = inherited_coord(&rig.tree, rig.scaled, "time").unwrap();
    let values: Vec<f64> = time.data().iter().cloned().collect();
    assert_eq!(values, time_values());

    // series unlabeled anywhere above baselined: synthetic indices
    let series = inherited_coord(&rig.tree, rig.baselined, "series").unwrap();
    let values: Vec<f64> = series.data().iter().cloned().collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0]);

    // scaled labels series itself: local coordinate wins
    let series = inherited_coord(&rig.tree, rig.scaled, "series").unwrap();
    let values: Vec<f64> = series.data().iter().cloned().collect();
    assert_eq!(values, vec![1.0]);
}

#[test]
fn given_length_mismatched_ancestor_coord_when_inheriting_then_synthetic_indices() {
    common::init_tracing();
    let mut root_ds = Dataset::new();
    root_ds
        .insert_variable(
            "v",
            DimArray::from_shape_vec(&["sweep"], &[4], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        )
        .unwrap();
    root_ds
        .set_coord_values("sweep", vec![10.0, 20.0, 30.0, 40.0])
        .unwrap();
    let mut child_ds = Dataset::new();
    child_ds
        .insert_variable(
            "v",
            DimArray::from_shape_vec(&["sweep"], &[2], vec![5.0, 6.0]).unwrap(),
        )
        .unwrap();
    let mut tree = DataTree::new("root", Some(root_ds));
    let child = tree.add_child(tree.root(), "child", Some(child_ds)).unwrap();

    let coord = inherited_coord(&tree, child, "sweep").unwrap();

    let values: Vec<f64> = coord.data().iter().cloned().collect();
    assert_eq!(values, vec![0.0, 1.0]);
}

#[test]
fn given_unknown_dimension_when_inheriting_coord_then_error() {
    let rig = electro_tree();

    let result = inherited_coord(&rig.tree, rig.scaled, "frequency");

    assert!(matches!(result, Err(TreeError::MissingDimension { .. })));
}

#[test]
fn given_node_dims_when_collecting_inherited_coords_then_local_wins_else_resolved() {
    let rig = electro_tree();

    let coords = inherited_coords(&rig.tree, rig.scaled).unwrap();

    assert_eq!(
        coords.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
        vec!["series", "sweep", "time"]
    );
    let sweep: Vec<f64> = coords["sweep"].data().iter().cloned().collect();
    assert_eq!(sweep, vec![5.0, 8.0]);
}

#[test]
fn given_overlapping_definitions_when_resolving_leaf_data_then_deepest_wins_inside_footprint() {
    // Property: inside the deepest definer's coordinate footprint its values
    // win; outside, the shallower ancestor's values persist.
    let rig = electro_tree();

    let leaf = leaf_data(&rig.tree, rig.scaled, "current", None).unwrap();

    assert_eq!(leaf.shape(), &[SERIES, SWEEPS, SAMPLES]);
    let values = leaf.to_vec();
    for s in 0..SERIES {
        for w in 0..SWEEPS {
            for t in 0..SAMPLES {
                let flat = (s * SWEEPS + w) * SAMPLES + t;
                let expected = if s == 1 && (w == 5 || w == 8) {
                    scaled_current(if w == 5 { 0 } else { 1 }, t)
                } else {
                    baselined_current(s, w, t)
                };
                assert_eq!(values[flat], expected, "at series={s} sweep={w} t={t}");
            }
        }
    }
}

#[test]
fn given_explicit_root_when_resolving_leaf_data_then_walk_starts_there() {
    let rig = electro_tree();

    let leaf = leaf_data(&rig.tree, rig.scaled, "current", Some(rig.baselined)).unwrap();

    // raw's values never enter the overlay: outside the scaled footprint
    // everything is baselined
    let values = leaf.to_vec();
    assert_eq!(values[0], baselined_current(0, 0, 0));
}

#[test]
fn given_leaf_query_at_root_when_resolving_then_same_as_inherited_data() {
    let rig = electro_tree();

    let leaf = leaf_data(&rig.tree, rig.raw, "voltage", Some(rig.raw)).unwrap();
    let inherited = inherited_data(&rig.tree, rig.raw, "voltage").unwrap();

    assert_eq!(leaf.to_vec(), inherited.to_vec());
}

#[test]
fn given_no_definer_on_path_when_resolving_leaf_data_then_missing_data() {
    let rig = electro_tree();

    let result = leaf_data(&rig.tree, rig.scaled, "impedance", None);

    assert!(matches!(result, Err(TreeError::MissingData { .. })));
}
