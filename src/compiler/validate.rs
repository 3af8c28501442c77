//! Well-formedness validation of a compiled graph.
//!
//! A pure read-only pass, run after the compile passes have populated the
//! derived fields. Fails fast: the first violation aborts construction and
//! no partial machine is ever handed to the interpreter.

use std::collections::HashSet;

use crate::compiler::error::StructuralError;
use crate::core::{Graph, NodeId, NodeKind, PseudostateKind, TransitionKind};

pub(crate) fn validate(graph: &Graph) -> Result<(), StructuralError> {
    for (id, node) in graph.iter() {
        match &node.kind {
            NodeKind::Region(_) => check_region(graph, id)?,
            NodeKind::Pseudo(p) => check_pseudostate(graph, id, p.kind)?,
            NodeKind::Final(v) => {
                if !v.outgoing.is_empty() {
                    return Err(StructuralError::MalformedFinal {
                        path: graph.qualified_path(id),
                    });
                }
            }
            NodeKind::State(s) => {
                if !s.regions.is_empty() && s.submachine.is_some() {
                    return Err(StructuralError::RegionsAndSubmachine {
                        path: graph.qualified_path(id),
                    });
                }
            }
            NodeKind::Transition(t) => {
                if t.kind == Some(TransitionKind::Internal) {
                    let on_state = t.source.map(|s| graph.state(s).is_some()).unwrap_or(false);
                    if !on_state {
                        return Err(StructuralError::InternalNotOnState {
                            path: graph.qualified_path(id),
                        });
                    }
                }
            }
            _ => {}
        }

        if graph.is_vertex(id) {
            let contained = graph.vertex(id).and_then(|v| v.container).is_some();
            if !contained {
                return Err(StructuralError::MissingContainer {
                    path: graph.qualified_path(id),
                });
            }
        }
    }
    Ok(())
}

/// Machine-level regions need exactly one initial pseudostate; sub-state
/// regions may omit it (they can only be entered explicitly then), but
/// never declare more than one.
fn check_region(graph: &Graph, region: NodeId) -> Result<(), StructuralError> {
    let initials = graph
        .children(region)
        .iter()
        .filter(|&&c| {
            matches!(
                graph.node(c).kind,
                NodeKind::Pseudo(ref p) if p.kind == PseudostateKind::Initial
            )
        })
        .count();

    let machine_owned = graph
        .parent(region)
        .map(|p| graph.machine(p).is_some())
        .unwrap_or(false);

    let valid = if machine_owned {
        initials == 1
    } else {
        initials <= 1
    };
    if !valid {
        return Err(StructuralError::InitialCount {
            path: graph.qualified_path(region),
            found: initials,
        });
    }
    Ok(())
}

fn check_pseudostate(
    graph: &Graph,
    id: NodeId,
    kind: PseudostateKind,
) -> Result<(), StructuralError> {
    let (outgoing, incoming) = match graph.vertex(id) {
        Some(v) => (v.outgoing.clone(), v.incoming.clone()),
        None => (Vec::new(), Vec::new()),
    };
    let path = || graph.qualified_path(id);

    match kind {
        PseudostateKind::Initial => {
            if outgoing.len() != 1 {
                return Err(StructuralError::MalformedInitial { path: path() });
            }
            let t = graph.transition(outgoing[0]);
            let clean = t.map(|t| t.guard.is_none() && t.events.is_empty()).unwrap_or(false);
            if !clean {
                return Err(StructuralError::MalformedInitial { path: path() });
            }
        }
        PseudostateKind::Choice => {
            let unguarded_last = outgoing
                .last()
                .and_then(|&t| graph.transition(t))
                .map(|t| t.guard.is_none())
                .unwrap_or(false);
            if outgoing.is_empty() || !unguarded_last {
                return Err(StructuralError::MalformedChoice { path: path() });
            }
        }
        PseudostateKind::Join => {
            if outgoing.len() != 1 || incoming.len() < 2 {
                return Err(StructuralError::MalformedJoin { path: path() });
            }
            let sources = incoming
                .iter()
                .filter_map(|&t| graph.transition(t).and_then(|t| t.source));
            if !distinct_sibling_regions(graph, sources) {
                return Err(StructuralError::MalformedJoin { path: path() });
            }
        }
        PseudostateKind::Fork => {
            if outgoing.len() < 2 {
                return Err(StructuralError::MalformedFork { path: path() });
            }
            let targets = outgoing
                .iter()
                .filter_map(|&t| graph.transition(t).and_then(|t| t.target));
            if !distinct_sibling_regions(graph, targets) {
                return Err(StructuralError::MalformedFork { path: path() });
            }
        }
        PseudostateKind::EntryPoint | PseudostateKind::ExitPoint => {
            if outgoing.len() != 1 {
                return Err(StructuralError::MalformedPseudostate { path: path() });
            }
        }
        PseudostateKind::Junction => {
            if outgoing.is_empty() {
                return Err(StructuralError::MalformedPseudostate { path: path() });
            }
        }
        PseudostateKind::DeepHistory | PseudostateKind::ShallowHistory => {
            if outgoing.len() > 1 {
                return Err(StructuralError::MalformedPseudostate { path: path() });
            }
        }
        PseudostateKind::Terminate => {
            if !outgoing.is_empty() {
                return Err(StructuralError::MalformedPseudostate { path: path() });
            }
        }
    }
    Ok(())
}

/// All the given vertices sit in pairwise distinct regions sharing one
/// owner (sibling regions of one composite).
fn distinct_sibling_regions(
    graph: &Graph,
    vertices: impl Iterator<Item = NodeId>,
) -> bool {
    let mut regions = HashSet::new();
    let mut owners = HashSet::new();
    for v in vertices {
        // Walk to the vertex directly below the join/fork's scope: use the
        // vertex's own container region.
        let Some(region) = graph.vertex(v).and_then(|c| c.container) else {
            return false;
        };
        if !regions.insert(region) {
            return false;
        }
        if let Some(owner) = graph.parent(region) {
            owners.insert(owner);
        }
    }
    owners.len() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Graph, MachineNode, NodeKind, PseudoNode, RegionNode, StateNode, TransitionNode, VertexCore,
    };

    fn machine() -> NodeKind {
        NodeKind::Machine(MachineNode::default())
    }

    fn region() -> NodeKind {
        NodeKind::Region(RegionNode::default())
    }

    fn state() -> NodeKind {
        NodeKind::State(StateNode::default())
    }

    fn pseudo(kind: PseudostateKind) -> NodeKind {
        NodeKind::Pseudo(PseudoNode::new(kind))
    }

    fn transition(source: NodeId, target: Option<NodeId>) -> NodeKind {
        NodeKind::Transition(TransitionNode {
            source: Some(source),
            target,
            ..TransitionNode::default()
        })
    }

    fn compiled(build: impl FnOnce(&mut Graph, NodeId, NodeId)) -> Result<(), StructuralError> {
        let mut g = Graph::new();
        let m = g.add(None, "m", machine());
        let top = g.add(Some(m), "top", region());
        build(&mut g, m, top);
        crate::compiler::Chart::new(g).map(|_| ())
    }

    #[test]
    fn machine_region_requires_initial() {
        let err = compiled(|g, _, top| {
            g.add(Some(top), "s", state());
        })
        .unwrap_err();
        assert!(matches!(err, StructuralError::InitialCount { found: 0, .. }));
    }

    #[test]
    fn two_initials_in_one_region_are_rejected() {
        let err = compiled(|g, m, top| {
            let i1 = g.add(Some(top), "i1", pseudo(PseudostateKind::Initial));
            let i2 = g.add(Some(top), "i2", pseudo(PseudostateKind::Initial));
            let s = g.add(Some(top), "s", state());
            g.add(Some(m), "t1", transition(i1, Some(s)));
            g.add(Some(m), "t2", transition(i2, Some(s)));
        })
        .unwrap_err();
        assert!(matches!(err, StructuralError::InitialCount { found: 2, .. }));
    }

    #[test]
    fn guarded_initial_transition_is_rejected() {
        let err = compiled(|g, m, top| {
            let init = g.add(Some(top), "init", pseudo(PseudostateKind::Initial));
            let s = g.add(Some(top), "s", state());
            g.add(
                Some(m),
                "t",
                NodeKind::Transition(TransitionNode {
                    source: Some(init),
                    target: Some(s),
                    guard: Some(crate::core::Constraint::from_fn(|_| true)),
                    ..TransitionNode::default()
                }),
            );
        })
        .unwrap_err();
        assert!(matches!(err, StructuralError::MalformedInitial { .. }));
    }

    #[test]
    fn final_state_with_outgoing_is_rejected() {
        let err = compiled(|g, m, top| {
            let init = g.add(Some(top), "init", pseudo(PseudostateKind::Initial));
            let fin = g.add(Some(top), "done", NodeKind::Final(VertexCore::default()));
            let s = g.add(Some(top), "s", state());
            g.add(Some(m), "ti", transition(init, Some(s)));
            g.add(Some(m), "t", transition(fin, Some(s)));
        })
        .unwrap_err();
        assert!(matches!(err, StructuralError::MalformedFinal { .. }));
    }

    #[test]
    fn choice_requires_unguarded_last_branch() {
        let err = compiled(|g, m, top| {
            let init = g.add(Some(top), "init", pseudo(PseudostateKind::Initial));
            let choice = g.add(Some(top), "choice", pseudo(PseudostateKind::Choice));
            let s = g.add(Some(top), "s", state());
            g.add(Some(m), "ti", transition(init, Some(choice)));
            g.add(
                Some(m),
                "t",
                NodeKind::Transition(TransitionNode {
                    source: Some(choice),
                    target: Some(s),
                    guard: Some(crate::core::Constraint::from_fn(|_| false)),
                    ..TransitionNode::default()
                }),
            );
        })
        .unwrap_err();
        assert!(matches!(err, StructuralError::MalformedChoice { .. }));
    }

    #[test]
    fn join_requires_branches_from_distinct_regions() {
        let err = compiled(|g, m, top| {
            let init = g.add(Some(top), "init", pseudo(PseudostateKind::Initial));
            let a = g.add(Some(top), "a", state());
            let b = g.add(Some(top), "b", state());
            let join = g.add(Some(top), "join", pseudo(PseudostateKind::Join));
            let s = g.add(Some(top), "s", state());
            g.add(Some(m), "ti", transition(init, Some(a)));
            // Both branches come from the same region.
            g.add(Some(m), "t1", transition(a, Some(join)));
            g.add(Some(m), "t2", transition(b, Some(join)));
            g.add(Some(m), "t3", transition(join, Some(s)));
        })
        .unwrap_err();
        assert!(matches!(err, StructuralError::MalformedJoin { .. }));
    }

    #[test]
    fn well_formed_join_passes() {
        compiled(|g, m, top| {
            let init = g.add(Some(top), "init", pseudo(PseudostateKind::Initial));
            let p = g.add(Some(top), "p", state());
            let r1 = g.add(Some(p), "r1", region());
            let r2 = g.add(Some(p), "r2", region());
            let i1 = g.add(Some(r1), "i1", pseudo(PseudostateKind::Initial));
            let i2 = g.add(Some(r2), "i2", pseudo(PseudostateKind::Initial));
            let a = g.add(Some(r1), "a", state());
            let b = g.add(Some(r2), "b", state());
            let join = g.add(Some(top), "join", pseudo(PseudostateKind::Join));
            let s = g.add(Some(top), "s", state());
            g.add(Some(m), "ti", transition(init, Some(p)));
            g.add(Some(m), "ti1", transition(i1, Some(a)));
            g.add(Some(m), "ti2", transition(i2, Some(b)));
            g.add(Some(m), "t1", transition(a, Some(join)));
            g.add(Some(m), "t2", transition(b, Some(join)));
            g.add(Some(m), "t3", transition(join, Some(s)));
        })
        .unwrap();
    }

    #[test]
    fn state_with_regions_and_submachine_is_rejected() {
        let err = compiled(|g, m, top| {
            let init = g.add(Some(top), "init", pseudo(PseudostateKind::Initial));
            let s = g.add(Some(top), "s", state());
            g.add(Some(m), "ti", transition(init, Some(s)));
            let r = g.add(Some(s), "r", region());
            let _ = r;
            let sub = g.add(Some(s), "sub", machine());
            if let Some(st) = g.state_mut(s) {
                st.submachine = Some(sub);
            }
        })
        .unwrap_err();
        assert!(matches!(err, StructuralError::RegionsAndSubmachine { .. }));
    }
}
