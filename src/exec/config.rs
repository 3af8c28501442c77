//! The active-configuration map.
//!
//! The single source of mutable shared state for a machine instance: a map
//! from entered vertex to its runtime record. Only the interpreter inserts
//! and removes entries; waiter tasks read it or ask the loop for changes
//! through the command channel. The lock is never held across a suspension
//! point.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::core::{Graph, NodeId};

/// Runtime record of one entered vertex.
pub(crate) struct VertexRecord {
    /// Cancelled when the vertex exits; every waiter and activity task the
    /// vertex owns selects on it.
    pub token: CancellationToken,
    /// Whether the vertex's do-activity task is still running.
    pub activity_running: bool,
}

impl VertexRecord {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            activity_running: false,
        }
    }
}

/// Saved configuration of a region, keyed by its history pseudostate.
#[derive(Clone, Debug)]
pub(crate) enum HistoryRecord {
    /// Last active direct subvertex of the region.
    Shallow(NodeId),
    /// Last active leaf states anywhere below the region.
    Deep(Vec<NodeId>),
}

/// Map of currently entered vertices.
#[derive(Default)]
pub(crate) struct ActiveConfig {
    entries: HashMap<NodeId, VertexRecord>,
}

impl ActiveConfig {
    pub fn insert(&mut self, vertex: NodeId, record: VertexRecord) {
        self.entries.insert(vertex, record);
    }

    pub fn remove(&mut self, vertex: NodeId) -> Option<VertexRecord> {
        self.entries.remove(&vertex)
    }

    pub fn contains(&self, vertex: NodeId) -> bool {
        self.entries.contains_key(&vertex)
    }

    pub fn get(&self, vertex: NodeId) -> Option<&VertexRecord> {
        self.entries.get(&vertex)
    }

    pub fn get_mut(&mut self, vertex: NodeId) -> Option<&mut VertexRecord> {
        self.entries.get_mut(&vertex)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &VertexRecord)> {
        self.entries.iter().map(|(&v, r)| (v, r))
    }

    /// Active direct children of a region, in declaration order.
    pub fn active_children(&self, graph: &Graph, region: NodeId) -> Vec<NodeId> {
        graph
            .children(region)
            .iter()
            .copied()
            .filter(|&c| self.contains(c))
            .collect()
    }

    /// Active leaf states (states with no active state below them), in id
    /// order.
    pub fn leaf_states(&self, graph: &Graph) -> Vec<NodeId> {
        let mut leaves: Vec<NodeId> = self
            .entries
            .keys()
            .copied()
            .filter(|&v| graph.state(v).is_some())
            .filter(|&v| {
                !self
                    .entries
                    .keys()
                    .any(|&o| o != v && graph.state(o).is_some() && graph.is_descendant(o, v))
            })
            .collect();
        leaves.sort();
        leaves
    }
}
