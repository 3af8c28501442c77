//! Structural compiler: derives the execution structure from a declared
//! graph.
//!
//! Compilation runs exactly once per graph, is deterministic, and fails
//! fast: the passes synthesize regions for loosely declared composites,
//! assign every vertex its containing region, default completion triggers
//! and no-op effects, classify every transition and compute its enter/leave
//! paths, then hand the result to the validator. Only a fully valid graph
//! ever becomes a [`Chart`].

mod error;
mod path;
mod validate;

pub use error::StructuralError;

use std::sync::Arc;

use crate::core::{Behavior, EventKind, Graph, NodeId, NodeKind};

/// An immutable, compiled statechart definition.
///
/// Cheap to clone; every machine instance executing this chart shares the
/// same frozen graph.
///
/// # Example
///
/// ```rust
/// use harel::builder::ChartBuilder;
///
/// let chart = ChartBuilder::new("toggle")
///     .initial("off")
///     .state("off", |s| s.on("flip").to("on"))
///     .state("on", |s| s.on("flip").to("off"))
///     .event("flip")
///     .build()
///     .unwrap();
///
/// assert!(chart.find("on").is_some());
/// ```
#[derive(Clone, Debug)]
pub struct Chart {
    graph: Arc<Graph>,
    machine: NodeId,
}

impl Chart {
    /// Compile and validate a declared graph.
    pub fn new(mut graph: Graph) -> Result<Self, StructuralError> {
        let machine = compile(&mut graph)?;
        validate::validate(&graph)?;
        Ok(Self {
            graph: Arc::new(graph),
            machine,
        })
    }

    /// The compiled graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub(crate) fn graph_arc(&self) -> Arc<Graph> {
        Arc::clone(&self.graph)
    }

    /// The root machine node.
    pub fn machine(&self) -> NodeId {
        self.machine
    }

    /// Look a node up by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.graph.find_by_name(name)
    }
}

/// Run all compile passes over the graph, returning the machine root.
fn compile(graph: &mut Graph) -> Result<NodeId, StructuralError> {
    let root = match graph.root() {
        Some(id) if matches!(graph.node(id).kind, NodeKind::Machine(_)) => id,
        _ => return Err(StructuralError::MissingRoot),
    };

    synthesize_regions(graph);
    index_regions(graph);
    assign_containers(graph);
    wire_transitions(graph)?;

    Ok(root)
}

/// Wrap loose vertex and transition children of a composite into a single
/// synthesized region, unless the composite already declares regions.
fn synthesize_regions(graph: &mut Graph) {
    let mut pending: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

    for (id, node) in graph.iter() {
        if !matches!(node.kind, NodeKind::Machine(_) | NodeKind::State(_)) {
            continue;
        }
        let has_declared_region = node
            .children
            .iter()
            .any(|&c| matches!(graph.node(c).kind, NodeKind::Region(_)));
        if has_declared_region {
            continue;
        }
        let loose: Vec<NodeId> = node
            .children
            .iter()
            .copied()
            .filter(|&c| {
                graph.is_vertex(c) || matches!(graph.node(c).kind, NodeKind::Transition(_))
            })
            .collect();
        if !loose.is_empty() {
            pending.push((id, loose));
        }
    }

    for (owner, loose) in pending {
        let region = graph.add(
            Some(owner),
            "region",
            NodeKind::Region(crate::core::RegionNode::default()),
        );
        for child in loose {
            graph.reparent(child, region);
        }
    }
}

/// Record region lists on their owners and the initial pseudostate on each
/// region.
fn index_regions(graph: &mut Graph) {
    for id in graph.ids().collect::<Vec<_>>() {
        let children = graph.children(id).to_vec();
        let regions: Vec<NodeId> = children
            .iter()
            .copied()
            .filter(|&c| matches!(graph.node(c).kind, NodeKind::Region(_)))
            .collect();

        if graph.machine(id).is_some() {
            if let Some(machine) = graph.machine_mut(id) {
                machine.regions = regions;
            }
        } else if graph.state(id).is_some() {
            if let Some(state) = graph.state_mut(id) {
                state.regions = regions;
            }
        } else if graph.region(id).is_some() {
            let initial = children.iter().copied().find(|&c| {
                matches!(
                    graph.node(c).kind,
                    NodeKind::Pseudo(ref p) if p.kind == crate::core::PseudostateKind::Initial
                )
            });
            if let Some(region) = graph.region_mut(id) {
                region.initial = initial;
            }
        }
    }
}

/// Every vertex directly owned by a region is contained by it.
fn assign_containers(graph: &mut Graph) {
    for id in graph.ids().collect::<Vec<_>>() {
        if !matches!(graph.node(id).kind, NodeKind::Region(_)) {
            continue;
        }
        for child in graph.children(id).to_vec() {
            if let Some(vertex) = graph.vertex_mut(child) {
                vertex.container = Some(id);
            }
        }
    }
}

/// Default triggers and effects, populate per-vertex transition sets, and
/// classify every transition.
fn wire_transitions(graph: &mut Graph) -> Result<(), StructuralError> {
    let transitions: Vec<NodeId> = graph
        .ids()
        .filter(|&id| matches!(graph.node(id).kind, NodeKind::Transition(_)))
        .collect();

    for tid in transitions {
        let (source, target) = match graph.transition(tid) {
            Some(t) => (t.source, t.target),
            None => continue,
        };

        let source = match (source, target) {
            (Some(s), _) => s,
            (None, None) => {
                return Err(StructuralError::DanglingTransition {
                    path: graph.qualified_path(tid),
                })
            }
            (None, Some(_)) => {
                return Err(StructuralError::MissingSource {
                    path: graph.qualified_path(tid),
                })
            }
        };

        default_trigger(graph, tid, source);

        if let Some(t) = graph.transition_mut(tid) {
            if t.effect.is_none() {
                t.effect = Some(Behavior::noop());
            }
        }

        if let Some(v) = graph.vertex_mut(source) {
            v.outgoing.push(tid);
        }
        if let Some(target) = target {
            if let Some(v) = graph.vertex_mut(target) {
                v.incoming.push(tid);
            }
        }

        let classified = path::classify(graph, tid, source, target)?;
        if let Some(t) = graph.transition_mut(tid) {
            t.kind = Some(classified.kind);
            t.path = classified.path;
            t.container = classified.container;
        }
    }

    Ok(())
}

/// An untriggered transition out of a state defaults to the state's
/// completion event, synthesized lazily, one per state.
fn default_trigger(graph: &mut Graph, tid: NodeId, source: NodeId) {
    let needs_default = graph
        .transition(tid)
        .map(|t| t.events.is_empty())
        .unwrap_or(false)
        && graph.state(source).is_some();
    if !needs_default {
        return;
    }

    let completion = match graph.state(source).and_then(|s| s.completion) {
        Some(ev) => ev,
        None => {
            let ev = graph.add(
                Some(source),
                "completion",
                NodeKind::Event(EventKind::Completion { state: source }),
            );
            if let Some(state) = graph.state_mut(source) {
                state.completion = Some(ev);
            }
            ev
        }
    };

    if let Some(t) = graph.transition_mut(tid) {
        t.events.push(completion);
    }
}
