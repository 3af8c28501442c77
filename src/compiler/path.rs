//! Transition classification and enter/leave path computation.
//!
//! The classification rules, in order: `Internal` if the transition has no
//! target, `Loop` if source and target are the same vertex, `Local` if the
//! target is a descendant of the source, `External` otherwise. External
//! transitions are scoped by the least common ancestor region over the
//! state-containment chains of source and target.

use crate::compiler::error::StructuralError;
use crate::core::{Graph, NodeId, NodeKind, PseudostateKind, TransitionKind, TransitionPath};

/// The classification result for one transition.
pub(crate) struct Classified {
    pub kind: TransitionKind,
    pub path: TransitionPath,
    /// The least-common-ancestor region, for external and self transitions.
    pub container: Option<NodeId>,
}

/// Classify a transition and compute its exact enter/leave sequences.
pub(crate) fn classify(
    graph: &Graph,
    transition: NodeId,
    source: NodeId,
    target: Option<NodeId>,
) -> Result<Classified, StructuralError> {
    let Some(target) = target else {
        return Ok(Classified {
            kind: TransitionKind::Internal,
            path: TransitionPath::default(),
            container: None,
        });
    };

    if source == target {
        return Ok(Classified {
            kind: TransitionKind::Loop,
            path: TransitionPath {
                leave: vec![source],
                enter: vec![target],
            },
            container: Some(container_of(graph, source)?),
        });
    }

    if matches!(
        graph.node(target).kind,
        NodeKind::Pseudo(ref p) if p.kind == PseudostateKind::Join
    ) {
        // A branch arriving at a join leaves only its own source; the
        // composite the branches run in is exited when the join fires,
        // after every branch has arrived.
        return Ok(Classified {
            kind: TransitionKind::External,
            path: TransitionPath {
                leave: vec![source],
                enter: vec![target],
            },
            container: Some(container_of(graph, source)?),
        });
    }

    if graph.is_descendant(target, source) {
        // Local: the source stays active; enter walks from just below the
        // source down to the target.
        let mut enter = enclosure_chain(graph, target);
        enter.retain(|&v| graph.is_descendant(v, source));
        enter.reverse();
        return Ok(Classified {
            kind: TransitionKind::Local,
            path: TransitionPath {
                leave: Vec::new(),
                enter,
            },
            container: None,
        });
    }

    external(graph, transition, source, target)
}

fn external(
    graph: &Graph,
    transition: NodeId,
    source: NodeId,
    target: NodeId,
) -> Result<Classified, StructuralError> {
    let source_chain = enclosure_chain(graph, source);
    let target_chain = enclosure_chain(graph, target);

    for (i, &sv) in source_chain.iter().enumerate() {
        let s_container = container_of(graph, sv)?;
        for (j, &tv) in target_chain.iter().enumerate() {
            if container_of(graph, tv)? != s_container {
                continue;
            }
            if sv == tv && i >= 1 && j >= 1 {
                // Source and target sit in different regions of the same
                // state; such transitions are not allowed.
                return Err(StructuralError::CrossesRegions {
                    path: graph.qualified_path(transition),
                    state: graph.qualified_path(sv),
                });
            }
            let leave = source_chain[..=i].to_vec();
            let mut enter = target_chain[..=j].to_vec();
            enter.reverse();
            return Ok(Classified {
                kind: TransitionKind::External,
                path: TransitionPath { leave, enter },
                container: Some(s_container),
            });
        }
    }

    Err(StructuralError::NoCommonAncestor {
        path: graph.qualified_path(transition),
        source_path: graph.qualified_path(source),
        target: graph.qualified_path(target),
    })
}

/// The vertex followed by its enclosing states, innermost first.
fn enclosure_chain(graph: &Graph, vertex: NodeId) -> Vec<NodeId> {
    let mut chain = vec![vertex];
    let mut cursor = vertex;
    while let Some(state) = graph.enclosing_state(cursor) {
        chain.push(state);
        cursor = state;
    }
    chain
}

fn container_of(graph: &Graph, vertex: NodeId) -> Result<NodeId, StructuralError> {
    match graph.vertex(vertex).and_then(|v| v.container) {
        Some(region) => Ok(region),
        None => Err(StructuralError::MissingContainer {
            path: graph.qualified_path(vertex),
        }),
    }
}
