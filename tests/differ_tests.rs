//! Integration tests for the route tree differ.

use segment_nav::tree::differ::{diff, SegmentDecision};
use segment_nav::tree::node::{DynamicKind, SegmentValue, TreeArena};

fn chain(values: Vec<SegmentValue>) -> TreeArena {
    let mut b = TreeArena::builder();
    let root = b.add(SegmentValue::Static(String::new()), true);
    let mut parent = root;
    for value in values {
        let child = b.add(value, false);
        b.attach(parent, "children", child);
        parent = child;
    }
    b.build(root)
}

fn dynamic(name: &str, value: &str) -> SegmentValue {
    SegmentValue::Dynamic {
        name: name.into(),
        value: value.into(),
        kind: DynamicKind::Single,
    }
}

fn catch_all(name: &str, parts: &[&str], optional: bool) -> SegmentValue {
    SegmentValue::CatchAll {
        name: name.into(),
        parts: parts.iter().map(|p| (*p).to_string()).collect(),
        optional,
    }
}

#[test]
fn test_static_rename_is_hard() {
    // Navigating from ['a'] to ['b'] with distinct static names: no safe
    // partial reconciliation.
    let old = chain(vec![SegmentValue::Static("a".into())]);
    let new = chain(vec![SegmentValue::Static("b".into())]);

    let map = diff(&old, &new);
    assert_eq!(map.decision(1), SegmentDecision::Hard);
    assert!(map.has_hard());
}

#[test]
fn test_dynamic_value_change_keeps_shell() {
    let old = chain(vec![
        SegmentValue::Static("blog".into()),
        dynamic("slug", "first-post"),
    ]);
    let new = chain(vec![
        SegmentValue::Static("blog".into()),
        dynamic("slug", "second-post"),
    ]);

    let map = diff(&old, &new);
    assert_eq!(map.decision(1), SegmentDecision::Reuse);
    assert_eq!(map.decision(2), SegmentDecision::Refetch);
    assert!(!map.has_hard());
}

#[test]
fn test_catch_all_capture_change_is_never_hard() {
    // Trees differing only in the captured value under an otherwise-identical
    // catch-all must diff soft.
    let old = chain(vec![catch_all("rest", &["docs", "intro"], false)]);
    let new = chain(vec![catch_all("rest", &["docs", "advanced"], false)]);

    let map = diff(&old, &new);
    assert_eq!(map.decision(1), SegmentDecision::Refetch);
    assert!(!map.has_hard());
}

#[test]
fn test_catch_all_optionality_change_is_hard() {
    let old = chain(vec![catch_all("rest", &["docs"], false)]);
    let new = chain(vec![catch_all("rest", &["docs"], true)]);

    let map = diff(&old, &new);
    assert_eq!(map.decision(1), SegmentDecision::Hard);
}

#[test]
fn test_dynamic_param_rename_is_hard() {
    let old = chain(vec![dynamic("slug", "x")]);
    let new = chain(vec![dynamic("id", "x")]);

    let map = diff(&old, &new);
    assert_eq!(map.decision(1), SegmentDecision::Hard);
}

#[test]
fn test_root_layout_marker_mismatch_is_hard() {
    let mut b = TreeArena::builder();
    let root = b.add(SegmentValue::Static(String::new()), true);
    let old = b.build(root);

    let mut b = TreeArena::builder();
    let root = b.add(SegmentValue::Static(String::new()), false);
    let new = b.build(root);

    let map = diff(&old, &new);
    assert_eq!(map.decision(0), SegmentDecision::Hard);
}

#[test]
fn test_new_parallel_slot_is_refetch() {
    let old = chain(vec![]);

    let mut b = TreeArena::builder();
    let root = b.add(SegmentValue::Static(String::new()), true);
    let main = b.add(SegmentValue::Static("inbox".into()), false);
    let modal = b.add(SegmentValue::Static("compose".into()), false);
    b.attach(root, "children", main);
    b.attach(root, "modal", modal);
    let new = b.build(root);

    let map = diff(&old, &new);
    assert_eq!(map.decision(0), SegmentDecision::Reuse);
    assert_eq!(map.decision(1), SegmentDecision::Refetch);
    assert_eq!(map.decision(2), SegmentDecision::Refetch);
}

#[test]
fn test_hard_in_one_slot_spares_siblings() {
    let mut b = TreeArena::builder();
    let root = b.add(SegmentValue::Static(String::new()), true);
    let left = b.add(SegmentValue::Static("feed".into()), false);
    let right = b.add(SegmentValue::Static("panel".into()), false);
    b.attach(root, "children", left);
    b.attach(root, "aux", right);
    let old = b.build(root);

    let mut b = TreeArena::builder();
    let root = b.add(SegmentValue::Static(String::new()), true);
    let left = b.add(SegmentValue::Static("feed".into()), false);
    let right = b.add(SegmentValue::Static("settings".into()), false);
    b.attach(root, "children", left);
    b.attach(root, "aux", right);
    let new = b.build(root);

    let map = diff(&old, &new);
    assert_eq!(map.decision(1), SegmentDecision::Reuse);
    assert_eq!(map.decision(2), SegmentDecision::Hard);
}

#[test]
fn test_diff_pure_across_repeated_calls() {
    let old = chain(vec![dynamic("slug", "a")]);
    let new = chain(vec![dynamic("slug", "b")]);

    for _ in 0..3 {
        let map = diff(&old, &new);
        assert_eq!(map.decision(0), SegmentDecision::Reuse);
        assert_eq!(map.decision(1), SegmentDecision::Refetch);
    }
}
