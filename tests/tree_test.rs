//! Tests for tree structure: naming, reparenting, detachment.

mod common;

use dimtree::{DataTree, Dataset, DimArray, TreeError};

fn small_dataset(var: &str) -> Dataset {
    let mut ds = Dataset::new();
    ds.insert_variable(var, DimArray::vector("time", vec![1.0, 2.0, 3.0]))
        .unwrap();
    ds
}

fn sample_tree() -> DataTree {
    common::init_tracing();
    let mut tree = DataTree::new("root", None);
    let left = tree.add_child(tree.root(), "left", None).unwrap();
    tree.add_child(tree.root(), "right", None).unwrap();
    tree.add_child(left, "leaf", None).unwrap();
    tree
}

#[test]
fn given_sibling_with_name_when_renaming_then_fails_and_nothing_changes() {
    // Arrange
    let mut tree = sample_tree();
    let left = tree.child_by_name(tree.root(), "left").unwrap();

    // Act
    let result = tree.set_name(left, "right");

    // Assert
    assert!(matches!(result, Err(TreeError::NameConflict { .. })));
    assert_eq!(tree.name(left).unwrap(), "left");
    assert_eq!(tree.child_by_name(tree.root(), "left"), Some(left));
}

#[test]
fn given_renamed_node_when_looking_up_by_name_then_lookup_follows_the_rename() {
    // Arrange
    let mut tree = sample_tree();
    let left = tree.child_by_name(tree.root(), "left").unwrap();

    // Act
    tree.set_name(left, "sorted").unwrap();

    // Assert
    assert_eq!(tree.child_by_name(tree.root(), "sorted"), Some(left));
    assert_eq!(tree.child_by_name(tree.root(), "left"), None);
}

#[test]
fn given_node_already_attached_when_reparenting_to_same_parent_then_noop() {
    let mut tree = sample_tree();
    let left = tree.child_by_name(tree.root(), "left").unwrap();

    tree.set_parent(left, Some(tree.root())).unwrap();

    assert_eq!(tree.get(left).unwrap().parent(), Some(tree.root()));
    assert_eq!(tree.sibling_index(left), 0);
}

#[test]
fn given_destination_with_same_named_child_when_moving_then_fails_with_both_trees_unchanged() {
    // Arrange
    let mut tree = sample_tree();
    let left = tree.child_by_name(tree.root(), "left").unwrap();
    let right = tree.child_by_name(tree.root(), "right").unwrap();
    let shadow = tree.add_child(right, "leaf", None).unwrap();
    let leaf = tree.child_by_name(left, "leaf").unwrap();

    // Act
    let result = tree.set_parent(leaf, Some(right));

    // Assert: rejected before any mutation, never observed half-detached
    assert!(matches!(result, Err(TreeError::NameConflict { .. })));
    assert_eq!(tree.get(leaf).unwrap().parent(), Some(left));
    assert_eq!(tree.get(left).unwrap().children(), &[leaf]);
    assert_eq!(tree.get(right).unwrap().children(), &[shadow]);
}

#[test]
fn given_descendant_destination_when_moving_then_cycle_is_rejected() {
    let mut tree = sample_tree();
    let left = tree.child_by_name(tree.root(), "left").unwrap();
    let leaf = tree.child_by_name(left, "leaf").unwrap();

    let result = tree.set_parent(left, Some(leaf));

    assert!(matches!(result, Err(TreeError::WouldCreateCycle { .. })));
    assert_eq!(tree.get(leaf).unwrap().parent(), Some(left));
}

#[test]
fn given_valid_destination_when_moving_then_subtree_follows() {
    let mut tree = sample_tree();
    let left = tree.child_by_name(tree.root(), "left").unwrap();
    let right = tree.child_by_name(tree.root(), "right").unwrap();
    let leaf = tree.child_by_name(left, "leaf").unwrap();

    tree.set_parent(leaf, Some(right)).unwrap();

    assert_eq!(tree.path(leaf).unwrap(), "/root/right/leaf");
    assert!(tree.get(left).unwrap().children().is_empty());
}

#[test]
fn given_siblings_when_navigating_then_insertion_order_is_respected() {
    let tree = sample_tree();
    let left = tree.child_by_name(tree.root(), "left").unwrap();
    let right = tree.child_by_name(tree.root(), "right").unwrap();

    assert_eq!(tree.first_sibling(left), left);
    assert_eq!(tree.last_sibling(left), right);
    assert_eq!(tree.next_sibling(left), Some(right));
    assert_eq!(tree.prev_sibling(right), Some(left));
    assert_eq!(tree.prev_sibling(left), None);
    assert_eq!(tree.sibling_index(right), 1);
    assert_eq!(tree.siblings(tree.root()), vec![tree.root()]);
}

#[test]
fn given_detached_node_when_queried_then_it_roots_an_orphan_subtree() {
    let mut tree = sample_tree();
    let left = tree.child_by_name(tree.root(), "left").unwrap();
    let leaf = tree.child_by_name(left, "leaf").unwrap();

    tree.detach(left).unwrap();

    assert_eq!(tree.root_of(left).unwrap(), left);
    assert_eq!(tree.root_of(leaf).unwrap(), left);
    assert_eq!(tree.path(leaf).unwrap(), "/left/leaf");
    assert_eq!(tree.get(tree.root()).unwrap().children().len(), 1);
}

#[test]
fn given_removed_subtree_when_accessing_then_handles_report_gone() {
    let mut tree = sample_tree();
    let left = tree.child_by_name(tree.root(), "left").unwrap();
    let leaf = tree.child_by_name(left, "leaf").unwrap();

    tree.remove_subtree(left).unwrap();

    assert!(tree.get(left).is_none());
    assert!(tree.get(leaf).is_none());
    assert!(matches!(tree.name(leaf), Err(TreeError::NodeGone)));
}

#[test]
fn given_subtree_rename_with_collision_when_applying_then_whole_batch_aborts() {
    // Arrange: both nodes define 'current'; the deeper one also has 'blocked'
    common::init_tracing();
    let mut tree = DataTree::new("root", Some(small_dataset("current")));
    let mut child_ds = small_dataset("current");
    child_ds
        .insert_variable("blocked", DimArray::vector("time", vec![0.0, 0.0, 0.0]))
        .unwrap();
    let child = tree.add_child(tree.root(), "child", Some(child_ds)).unwrap();

    // Act
    let result = tree.rename_entities(
        tree.root(),
        &[("current".to_string(), "blocked".to_string())],
    );

    // Assert: error names the blocking node, nothing was renamed anywhere
    match result {
        Err(TreeError::RenameBlocked { node, .. }) => assert_eq!(node, "child"),
        other => panic!("expected RenameBlocked, got {other:?}"),
    }
    assert!(tree.dataset(tree.root()).unwrap().contains("current"));
    assert!(tree.dataset(child).unwrap().contains("current"));
}

#[test]
fn given_subtree_rename_without_collision_when_applying_then_every_dataset_follows() {
    common::init_tracing();
    let mut tree = DataTree::new("root", Some(small_dataset("current")));
    let child = tree
        .add_child(tree.root(), "child", Some(small_dataset("current")))
        .unwrap();
    let plain = tree.add_child(tree.root(), "plain", None).unwrap();

    tree.rename_entities(
        tree.root(),
        &[("current".to_string(), "amps".to_string())],
    )
    .unwrap();

    assert!(tree.dataset(tree.root()).unwrap().contains("amps"));
    assert!(tree.dataset(child).unwrap().contains("amps"));
    assert!(tree.dataset(plain).is_none());
}
