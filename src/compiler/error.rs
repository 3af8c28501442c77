//! Structural errors raised while compiling or validating a graph.

use thiserror::Error;

/// A malformed statechart graph.
///
/// Structural errors are always fatal at build time: no partially compiled
/// machine is ever executable. Each variant carries the qualified dotted
/// path of the offending node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructuralError {
    #[error("graph root must be a state machine node")]
    MissingRoot,

    #[error("transition '{path}' has neither source nor target")]
    DanglingTransition { path: String },

    #[error("transition '{path}' has a target but no source")]
    MissingSource { path: String },

    #[error("vertex '{path}' is not contained in any region")]
    MissingContainer { path: String },

    #[error("no common ancestor region between '{source_path}' and '{target}' for transition '{path}'")]
    NoCommonAncestor {
        path: String,
        source_path: String,
        target: String,
    },

    #[error("transition '{path}' crosses sibling regions of state '{state}'")]
    CrossesRegions { path: String, state: String },

    #[error("machine region '{path}' must own exactly one initial pseudostate, found {found}")]
    InitialCount { path: String, found: usize },

    #[error(
        "initial pseudostate '{path}' must have exactly one outgoing transition with no guard and no triggers"
    )]
    MalformedInitial { path: String },

    #[error(
        "join '{path}' requires one outgoing transition and at least two incoming transitions from distinct sibling regions"
    )]
    MalformedJoin { path: String },

    #[error("fork '{path}' requires at least two outgoing transitions into distinct sibling regions")]
    MalformedFork { path: String },

    #[error("choice '{path}' requires at least one outgoing transition, the last of them unguarded")]
    MalformedChoice { path: String },

    #[error("pseudostate '{path}' has an invalid number of outgoing transitions for its kind")]
    MalformedPseudostate { path: String },

    #[error("final state '{path}' may not have outgoing transitions")]
    MalformedFinal { path: String },

    #[error("internal transition '{path}' must be sourced at a state")]
    InternalNotOnState { path: String },

    #[error("state '{path}' declares both regions and a submachine")]
    RegionsAndSubmachine { path: String },
}
