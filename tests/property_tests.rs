//! Property-based tests for the structural compiler.
//!
//! These tests use proptest to verify properties hold across many
//! randomly generated machine shapes.

use harel::builder::ChartBuilder;
use harel::core::{NodeKind, TransitionKind};
use harel::Chart;
use proptest::prelude::*;

/// A randomly shaped flat machine: `n` states with arbitrary unguarded
/// transitions between them, all triggered by one event.
#[derive(Clone, Debug)]
struct FlatMachine {
    states: usize,
    edges: Vec<(usize, usize)>,
}

prop_compose! {
    fn arbitrary_flat_machine()
        (states in 2..8usize)
        (edges in prop::collection::vec((0..8usize, 0..8usize), 1..12), states in Just(states))
        -> FlatMachine
    {
        let edges = edges
            .into_iter()
            .map(|(a, b)| (a % states, b % states))
            .collect();
        FlatMachine { states, edges }
    }
}

fn build(machine: &FlatMachine) -> Chart {
    let mut builder = ChartBuilder::new("m").event("e").initial("s0");
    for i in 0..machine.states {
        let name = format!("s{i}");
        builder = builder.state(&name, |_| {});
    }
    for (from, to) in &machine.edges {
        let from = format!("s{from}");
        let to = format!("s{to}");
        builder = builder.transition(&from, |t| t.on("e").to(&to));
    }
    builder.build().expect("flat machines always compile")
}

proptest! {
    #[test]
    fn compilation_is_deterministic(machine in arbitrary_flat_machine()) {
        let first = build(&machine);
        let second = build(&machine);

        prop_assert_eq!(first.graph().len(), second.graph().len());
        for (id, node) in first.graph().iter() {
            if let NodeKind::Transition(a) = &node.kind {
                let b = second.graph().transition(id).expect("same shape");
                prop_assert_eq!(a.kind, b.kind);
                prop_assert_eq!(&a.path, &b.path);
                prop_assert_eq!(a.container, b.container);
            }
        }
    }

    #[test]
    fn flat_paths_leave_source_and_enter_target(machine in arbitrary_flat_machine()) {
        let chart = build(&machine);
        for (_, node) in chart.graph().iter() {
            let NodeKind::Transition(t) = &node.kind else { continue };
            let (Some(source), Some(target)) = (t.source, t.target) else { continue };

            if source == target {
                prop_assert_eq!(t.kind, Some(TransitionKind::Loop));
            } else {
                prop_assert_eq!(t.kind, Some(TransitionKind::External));
            }
            prop_assert_eq!(t.path.leave.first().copied(), Some(source));
            prop_assert_eq!(t.path.enter.last().copied(), Some(target));
        }
    }

    #[test]
    fn qualified_paths_are_stable(machine in arbitrary_flat_machine()) {
        let first = build(&machine);
        let second = build(&machine);
        for (id, _) in first.graph().iter() {
            prop_assert_eq!(
                first.graph().qualified_path(id),
                second.graph().qualified_path(id)
            );
        }
    }
}
