//! Route segment tree types.
//!
//! A route tree is an arena of immutable nodes addressed by index. Trees are
//! built once, wrapped in `Arc`, and shared across concurrent navigations;
//! a navigation produces a new arena, never mutates one in place. Stale trees
//! may still be referenced by in-flight renders, which is safe because nodes
//! never carry back-pointers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a dynamic segment captures its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DynamicKind {
    /// `[param]`: captures exactly one path component.
    Single,
    /// An intercepted dynamic segment (rendered in place of another route).
    Intercepted,
}

/// The value of one route segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentValue {
    /// A literal path component. The site root uses the empty string.
    Static(String),
    /// A dynamic parameter with its captured value.
    Dynamic {
        name: String,
        value: String,
        kind: DynamicKind,
    },
    /// A catch-all parameter capturing zero or more trailing components.
    CatchAll {
        name: String,
        parts: Vec<String>,
        optional: bool,
    },
}

impl SegmentValue {
    /// The URL path component this segment contributes (captured values for
    /// dynamic and catch-all segments).
    pub fn path_component(&self) -> String {
        match self {
            SegmentValue::Static(s) => s.clone(),
            SegmentValue::Dynamic { value, .. } => value.clone(),
            SegmentValue::CatchAll { parts, .. } => parts.join("/"),
        }
    }
}

/// Index of a node within its arena.
pub type NodeId = usize;

/// One node of a route tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteNode {
    /// Segment value for this node.
    pub value: SegmentValue,

    /// Parallel slots, keyed by slot name ("children" for the default slot).
    pub slots: BTreeMap<String, NodeId>,

    /// Whether this node is a root layout boundary. A navigation that crosses
    /// a root layout cannot reuse anything below it.
    pub is_root_layout: bool,
}

/// An immutable route tree: a flat arena of nodes plus a root index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeArena {
    nodes: Vec<RouteNode>,
    root: NodeId,
}

impl TreeArena {
    /// Start building a new tree.
    pub fn builder() -> TreeBuilder {
        TreeBuilder { nodes: Vec::new() }
    }

    /// The root node index.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node by index. Indices come from the same arena, so this never fails
    /// for ids produced by [`TreeBuilder::add`].
    pub fn node(&self, id: NodeId) -> &RouteNode {
        &self.nodes[id]
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node paired with the URL path of the segment chain leading to it,
    /// in depth-first slot order.
    pub fn segment_paths(&self) -> Vec<(NodeId, String)> {
        let mut out = Vec::new();
        self.collect_paths(self.root, String::new(), &mut out);
        out
    }

    fn collect_paths(&self, id: NodeId, prefix: String, out: &mut Vec<(NodeId, String)>) {
        let node = self.node(id);
        let component = node.value.path_component();
        let path = if component.is_empty() {
            if prefix.is_empty() {
                "/".to_owned()
            } else {
                prefix
            }
        } else {
            let base = if prefix == "/" { "" } else { prefix.as_str() };
            format!("{base}/{component}")
        };

        out.push((id, path.clone()));
        for &child in node.slots.values() {
            self.collect_paths(child, path.clone(), out);
        }
    }
}

/// Builder for a [`TreeArena`]. Nodes are added bottom-up or top-down; the
/// arena becomes immutable once `build` is called.
pub struct TreeBuilder {
    nodes: Vec<RouteNode>,
}

impl TreeBuilder {
    /// Add a node and return its index.
    pub fn add(&mut self, value: SegmentValue, is_root_layout: bool) -> NodeId {
        self.nodes.push(RouteNode {
            value,
            slots: BTreeMap::new(),
            is_root_layout,
        });
        self.nodes.len() - 1
    }

    /// Attach `child` under `parent` in the named parallel slot.
    pub fn attach(&mut self, parent: NodeId, slot: &str, child: NodeId) {
        self.nodes[parent].slots.insert(slot.to_owned(), child);
    }

    /// Finalize the arena with the given root.
    pub fn build(self, root: NodeId) -> TreeArena {
        TreeArena {
            nodes: self.nodes,
            root,
        }
    }
}
