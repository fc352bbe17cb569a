//! Route tree differ: decides, per branch, whether rendered content can be
//! reused, needs a content refetch behind the existing shell, or requires a
//! hard reload.
//!
//! The differ is pure: it walks two arenas in lockstep by parallel slot and
//! never touches the cache or the network, so it is safe to call with stale
//! trees still referenced by in-flight renders.

use std::collections::HashMap;

use crate::tree::node::{NodeId, SegmentValue, TreeArena};

/// Per-segment diff decision, keyed by nodes of the *new* tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDecision {
    /// Segment is unchanged; reuse the rendered content and recurse.
    Reuse,
    /// Shell can be kept but the content must be refetched.
    Refetch,
    /// No safe partial reconciliation; the subtree needs a full reload.
    Hard,
}

/// Result of diffing two trees: one decision per node of the new tree.
#[derive(Debug, Default)]
pub struct DiffMap {
    decisions: HashMap<NodeId, SegmentDecision>,
}

impl DiffMap {
    /// Decision for a node of the new tree. Nodes the walk never matched
    /// against the old tree default to `Refetch` (new content, no shell yet).
    pub fn decision(&self, id: NodeId) -> SegmentDecision {
        self.decisions
            .get(&id)
            .copied()
            .unwrap_or(SegmentDecision::Refetch)
    }

    /// Whether any branch requires a hard reload.
    pub fn has_hard(&self) -> bool {
        self.decisions
            .values()
            .any(|d| *d == SegmentDecision::Hard)
    }

    fn set(&mut self, id: NodeId, decision: SegmentDecision) {
        self.decisions.insert(id, decision);
    }
}

/// Diff `old` against `new`, producing a decision for every node of `new`.
pub fn diff(old: &TreeArena, new: &TreeArena) -> DiffMap {
    let mut map = DiffMap::default();
    diff_nodes(old, old.root(), new, new.root(), &mut map);
    map
}

fn diff_nodes(old: &TreeArena, old_id: NodeId, new: &TreeArena, new_id: NodeId, map: &mut DiffMap) {
    let o = old.node(old_id);
    let n = new.node(new_id);

    // A root layout appearing or disappearing invalidates the whole subtree.
    if o.is_root_layout != n.is_root_layout {
        mark_subtree(new, new_id, SegmentDecision::Hard, map);
        return;
    }

    let decision = compare_values(&o.value, &n.value);
    if decision == SegmentDecision::Hard {
        mark_subtree(new, new_id, SegmentDecision::Hard, map);
        return;
    }
    map.set(new_id, decision);

    for (slot, &new_child) in &n.slots {
        match o.slots.get(slot) {
            Some(&old_child) => diff_nodes(old, old_child, new, new_child, map),
            // Slot exists only in the new tree: everything under it is a fetch.
            None => mark_subtree(new, new_child, SegmentDecision::Refetch, map),
        }
    }
}

fn mark_subtree(tree: &TreeArena, id: NodeId, decision: SegmentDecision, map: &mut DiffMap) {
    map.set(id, decision);
    for &child in tree.node(id).slots.values() {
        mark_subtree(tree, child, decision, map);
    }
}

fn compare_values(old: &SegmentValue, new: &SegmentValue) -> SegmentDecision {
    match (old, new) {
        (SegmentValue::Static(a), SegmentValue::Static(b)) => {
            if a == b {
                SegmentDecision::Reuse
            } else {
                // Distinct static names render different components entirely.
                SegmentDecision::Hard
            }
        }
        (
            SegmentValue::Dynamic {
                name: n1,
                value: v1,
                kind: k1,
            },
            SegmentValue::Dynamic {
                name: n2,
                value: v2,
                kind: k2,
            },
        ) => {
            if n1 != n2 || k1 != k2 {
                SegmentDecision::Hard
            } else if v1 == v2 {
                SegmentDecision::Reuse
            } else {
                // Same parameter, new value: keep the shell, refetch content.
                SegmentDecision::Refetch
            }
        }
        (
            SegmentValue::CatchAll {
                name: n1,
                parts: p1,
                optional: o1,
            },
            SegmentValue::CatchAll {
                name: n2,
                parts: p2,
                optional: o2,
            },
        ) => {
            // Catch-alls compare by kind and optionality, never by captured value.
            if o1 != o2 {
                SegmentDecision::Hard
            } else if n1 == n2 && p1 == p2 {
                SegmentDecision::Reuse
            } else {
                SegmentDecision::Refetch
            }
        }
        // Differing segment kinds: ambiguity defaults to hard.
        _ => SegmentDecision::Hard,
    }
}
