//! Arena-based statechart graph.
//!
//! Machines are declared as a tree of typed nodes held in a [`Graph`]
//! arena. Nodes are addressed by stable [`NodeId`] handles: ownership is
//! arena membership, and every cross-reference (a transition's source, a
//! region's initial pseudostate) is a plain id with no lifetime
//! implications.
//!
//! The author populates names, parentage and the declared payload of each
//! node; the structural compiler fills in the derived fields (`container`,
//! `outgoing`/`incoming`, transition `kind` and `path`) exactly once, after
//! which the graph is frozen behind an `Arc` and never mutated again.

use serde::{Deserialize, Serialize};

use super::behavior::{Behavior, Constraint};
use super::event::EventKind;

/// Stable handle addressing a node in a [`Graph`].
///
/// Ids are only meaningful for the graph that created them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Build an id from a raw index. Useful in tests; ids obtained this way
    /// are only valid for a graph that actually owns that index.
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The kind tag of a pseudostate vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PseudostateKind {
    Initial,
    Choice,
    Join,
    Fork,
    EntryPoint,
    ExitPoint,
    Junction,
    DeepHistory,
    ShallowHistory,
    Terminate,
}

/// Compiler-assigned classification of a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Crosses out of the source's containment up to a common ancestor
    /// region and back down to the target.
    External,
    /// Has no target; fires its effect without exiting or entering any
    /// vertex.
    Internal,
    /// Target is a descendant of the source; the source is not exited.
    Local,
    /// Source and target are the same vertex (a self transition): the
    /// vertex is exited and re-entered.
    Loop,
}

/// Compiler-assigned enter/leave vertex sequences for a transition.
///
/// `leave` is ordered innermost-first (the source outward); `enter` is
/// ordered outermost-first (down to the target).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPath {
    pub leave: Vec<NodeId>,
    pub enter: Vec<NodeId>,
}

/// Derived fields shared by every vertex (states, final states,
/// pseudostates). Populated once by the compiler.
#[derive(Clone, Debug, Default)]
pub struct VertexCore {
    /// The region that contains this vertex.
    pub container: Option<NodeId>,
    /// Outgoing transitions, in declaration order.
    pub outgoing: Vec<NodeId>,
    /// Incoming transitions, in declaration order.
    pub incoming: Vec<NodeId>,
}

/// Payload of a state machine node.
#[derive(Clone, Debug, Default)]
pub struct MachineNode {
    /// Top-level regions, in declaration order. Derived.
    pub regions: Vec<NodeId>,
}

/// Payload of a region node.
#[derive(Clone, Debug, Default)]
pub struct RegionNode {
    /// The region's initial pseudostate, if it declares one. Derived.
    pub initial: Option<NodeId>,
}

/// Payload of a state node.
#[derive(Clone, Debug, Default)]
pub struct StateNode {
    pub vertex: VertexCore,
    /// Owned regions, in declaration order (declared or synthesized).
    /// Mutually exclusive with `submachine`.
    pub regions: Vec<NodeId>,
    /// Referenced submachine node, entered recursively instead of regions.
    pub submachine: Option<NodeId>,
    pub entry: Option<Behavior>,
    pub exit: Option<Behavior>,
    pub activity: Option<Behavior>,
    /// Synthesized completion event, created lazily by the compiler.
    pub completion: Option<NodeId>,
    /// Events this state defers when nothing deeper consumes them.
    pub deferred: Vec<NodeId>,
}

/// Payload of a pseudostate node.
#[derive(Clone, Debug)]
pub struct PseudoNode {
    pub vertex: VertexCore,
    pub kind: PseudostateKind,
}

impl PseudoNode {
    pub fn new(kind: PseudostateKind) -> Self {
        Self {
            vertex: VertexCore::default(),
            kind,
        }
    }
}

/// Payload of a transition node.
#[derive(Clone, Debug, Default)]
pub struct TransitionNode {
    pub source: Option<NodeId>,
    pub target: Option<NodeId>,
    /// Trigger event ids. Empty at declaration time means
    /// completion-triggered; the compiler substitutes the source state's
    /// synthesized completion event.
    pub events: Vec<NodeId>,
    pub guard: Option<Constraint>,
    pub effect: Option<Behavior>,
    /// Classification. Assigned by the compiler.
    pub kind: Option<TransitionKind>,
    /// Enter/leave sequences. Assigned by the compiler.
    pub path: TransitionPath,
    /// Containing region for external transitions. Assigned by the
    /// compiler.
    pub container: Option<NodeId>,
}

/// Tagged payload of a graph node.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Machine(MachineNode),
    Region(RegionNode),
    State(StateNode),
    Final(VertexCore),
    Pseudo(PseudoNode),
    Transition(TransitionNode),
    Event(EventKind),
}

/// A single node: its name, its place in the ownership tree and its typed
/// payload.
#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

/// The arena holding a declared statechart.
///
/// # Example
///
/// ```rust
/// use harel::core::{Graph, MachineNode, NodeKind, RegionNode};
///
/// let mut graph = Graph::new();
/// let machine = graph.add(None, "player", NodeKind::Machine(MachineNode::default()));
/// let region = graph.add(Some(machine), "top", NodeKind::Region(RegionNode::default()));
///
/// assert_eq!(graph.parent(region), Some(machine));
/// assert_eq!(graph.qualified_path(region), "player.top");
/// ```
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. A node added without a parent becomes the root; there
    /// can be only one, and later parentless nodes keep the first root.
    pub fn add(&mut self, parent: Option<NodeId>, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.into(),
            parent,
            children: Vec::new(),
            kind,
        });
        match parent {
            Some(p) => self.nodes[p.index()].children.push(id),
            None => {
                if self.root.is_none() {
                    self.root = Some(id);
                }
            }
        }
        id
    }

    /// The root node, if any node has been added.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Borrow a node. Panics if the id does not belong to this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Proper ancestors of a node, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    /// Whether `node` is a proper descendant of `of` in the ownership tree.
    pub fn is_descendant(&self, node: NodeId, of: NodeId) -> bool {
        self.ancestors(node).any(|a| a == of)
    }

    /// First node (in id order) with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.iter().find(|(_, n)| n.name == name).map(|(id, _)| id)
    }

    /// Depth-first search for a descendant of `root` matching the
    /// predicate. `root` itself is not considered.
    pub fn find_descendant<F>(&self, root: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(NodeId, &Node) -> bool,
    {
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if pred(id, node) {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Dotted path of names from the root down to the node, for error
    /// reporting and logs.
    pub fn qualified_path(&self, id: NodeId) -> String {
        let mut parts: Vec<&str> = self.ancestors(id).map(|a| self.node(a).name.as_str()).collect();
        parts.reverse();
        parts.push(self.node(id).name.as_str());
        parts.join(".")
    }

    /// Move a node under a new parent. Used by region synthesis only.
    pub(crate) fn reparent(&mut self, child: NodeId, new_parent: NodeId) {
        if let Some(old) = self.node(child).parent {
            let siblings = &mut self.node_mut(old).children;
            siblings.retain(|&c| c != child);
        }
        self.node_mut(child).parent = Some(new_parent);
        self.node_mut(new_parent).children.push(child);
    }

    /// Whether the node is a vertex (state, final state or pseudostate).
    pub fn is_vertex(&self, id: NodeId) -> bool {
        self.vertex(id).is_some()
    }

    /// The shared vertex fields, for any vertex kind.
    pub fn vertex(&self, id: NodeId) -> Option<&VertexCore> {
        match &self.node(id).kind {
            NodeKind::State(s) => Some(&s.vertex),
            NodeKind::Final(v) => Some(v),
            NodeKind::Pseudo(p) => Some(&p.vertex),
            _ => None,
        }
    }

    pub(crate) fn vertex_mut(&mut self, id: NodeId) -> Option<&mut VertexCore> {
        match &mut self.node_mut(id).kind {
            NodeKind::State(s) => Some(&mut s.vertex),
            NodeKind::Final(v) => Some(v),
            NodeKind::Pseudo(p) => Some(&mut p.vertex),
            _ => None,
        }
    }

    pub fn machine(&self, id: NodeId) -> Option<&MachineNode> {
        match &self.node(id).kind {
            NodeKind::Machine(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn machine_mut(&mut self, id: NodeId) -> Option<&mut MachineNode> {
        match &mut self.node_mut(id).kind {
            NodeKind::Machine(m) => Some(m),
            _ => None,
        }
    }

    pub fn region(&self, id: NodeId) -> Option<&RegionNode> {
        match &self.node(id).kind {
            NodeKind::Region(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn region_mut(&mut self, id: NodeId) -> Option<&mut RegionNode> {
        match &mut self.node_mut(id).kind {
            NodeKind::Region(r) => Some(r),
            _ => None,
        }
    }

    pub fn state(&self, id: NodeId) -> Option<&StateNode> {
        match &self.node(id).kind {
            NodeKind::State(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn state_mut(&mut self, id: NodeId) -> Option<&mut StateNode> {
        match &mut self.node_mut(id).kind {
            NodeKind::State(s) => Some(s),
            _ => None,
        }
    }

    pub fn pseudo(&self, id: NodeId) -> Option<&PseudoNode> {
        match &self.node(id).kind {
            NodeKind::Pseudo(p) => Some(p),
            _ => None,
        }
    }

    pub fn transition(&self, id: NodeId) -> Option<&TransitionNode> {
        match &self.node(id).kind {
            NodeKind::Transition(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn transition_mut(&mut self, id: NodeId) -> Option<&mut TransitionNode> {
        match &mut self.node_mut(id).kind {
            NodeKind::Transition(t) => Some(t),
            _ => None,
        }
    }

    pub fn event(&self, id: NodeId) -> Option<&EventKind> {
        match &self.node(id).kind {
            NodeKind::Event(e) => Some(e),
            _ => None,
        }
    }

    /// The nearest proper ancestor that is a state, walking the ownership
    /// tree through regions.
    pub fn enclosing_state(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id)
            .find(|&a| matches!(self.node(a).kind, NodeKind::State(_)))
    }
}
