// caps.rs — Component capability registry
//
// The analysis never depends on concrete component types. It asks a
// `CapabilityQuery` for the input/output widths and capability flags of a
// component, and for the component behind a network node. `Network` is the
// table-backed implementation the listing front end produces.

use std::fmt;

use crate::id::{ComponentId, NodeId};

// ── Capability flags ────────────────────────────────────────────────────────

/// Bitset of component capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Caps(u32);

impl Caps {
    pub const NONE: Caps = Caps(0);
    /// Input and output view may be the same view in Propagate.
    pub const PROPAGATE_IN_PLACE: Caps = Caps(1 << 0);
    /// Output-deriv and input-deriv may be the same view in Backprop.
    pub const BACKPROP_IN_PLACE: Caps = Caps(1 << 1);
    /// Propagate adds to its output instead of overwriting it.
    pub const PROPAGATE_ADDS: Caps = Caps(1 << 2);
    /// Backprop adds to its input-deriv instead of overwriting it.
    pub const BACKPROP_ADDS: Caps = Caps(1 << 3);
    pub const STORES_STATS: Caps = Caps(1 << 4);
    /// Has learnable state that Backprop updates.
    pub const UPDATABLE: Caps = Caps(1 << 5);
    /// Row-count preserving; takes no precomputed indexes.
    pub const SIMPLE: Caps = Caps(1 << 6);
    pub const BACKPROP_NEEDS_INPUT: Caps = Caps(1 << 7);
    pub const BACKPROP_NEEDS_OUTPUT: Caps = Caps(1 << 8);

    /// Every flag with its listing keyword, in bit order.
    pub const NAMED: [(Caps, &'static str); 9] = [
        (Caps::PROPAGATE_IN_PLACE, "propagate_in_place"),
        (Caps::BACKPROP_IN_PLACE, "backprop_in_place"),
        (Caps::PROPAGATE_ADDS, "propagate_adds"),
        (Caps::BACKPROP_ADDS, "backprop_adds"),
        (Caps::STORES_STATS, "stores_stats"),
        (Caps::UPDATABLE, "updatable"),
        (Caps::SIMPLE, "simple"),
        (Caps::BACKPROP_NEEDS_INPUT, "backprop_needs_input"),
        (Caps::BACKPROP_NEEDS_OUTPUT, "backprop_needs_output"),
    ];

    pub fn contains(self, other: Caps) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Caps) -> Caps {
        Caps(self.0 | other.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for Caps {
    type Output = Caps;

    fn bitor(self, rhs: Caps) -> Caps {
        self.union(rhs)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in Caps::NAMED {
            if self.contains(flag) {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

// ── Component and node metadata ─────────────────────────────────────────────

/// Dimensional contract and capabilities of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    pub input_dim: u32,
    pub output_dim: u32,
    pub caps: Caps,
}

impl ComponentInfo {
    pub fn has(&self, cap: Caps) -> bool {
        self.caps.contains(cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Input,
    Output,
    Component(ComponentId),
}

// ── Query interface ─────────────────────────────────────────────────────────

/// Read-only capability lookups consumed by the classifier and checker.
pub trait CapabilityQuery {
    fn num_components(&self) -> usize;

    fn num_nodes(&self) -> usize;

    fn component(&self, id: ComponentId) -> Option<&ComponentInfo>;

    fn node(&self, id: NodeId) -> Option<NodeKind>;

    /// The component behind `node`, or `None` if `node` is unknown or is
    /// not a component node.
    fn component_for_node(&self, node: NodeId) -> Option<&ComponentInfo> {
        match self.node(node)? {
            NodeKind::Component(c) => self.component(c),
            NodeKind::Input | NodeKind::Output => None,
        }
    }
}

// ── Network ─────────────────────────────────────────────────────────────────

/// Table-backed capability registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Network {
    components: Vec<ComponentInfo>,
    nodes: Vec<NodeKind>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(&mut self, info: ComponentInfo) -> ComponentId {
        self.components.push(info);
        ComponentId::from_index(self.components.len() - 1)
    }

    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(kind);
        NodeId::from_index(self.nodes.len() - 1)
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.components.iter()
    }
}

impl CapabilityQuery for Network {
    fn num_components(&self) -> usize {
        self.components.len()
    }

    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn component(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.components.get(id.index())
    }

    fn node(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(id.index()).copied()
    }
}
