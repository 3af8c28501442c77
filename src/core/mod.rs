//! Core statechart graph model.
//!
//! This module contains the data the rest of the crate operates on:
//! - The arena [`Graph`] of typed nodes and its [`NodeId`] handles
//! - Event declarations and runtime [`EventInstance`]s
//! - [`Behavior`], [`Constraint`] and [`Operation`] wrappers around user code
//! - The fired-transition [`Trace`]
//!
//! Everything here is passive: the structural compiler derives execution
//! structure from it, and the interpreter executes it.

mod behavior;
mod event;
mod graph;
mod trace;

pub use behavior::{Behavior, BehaviorError, Constraint, Operation};
pub use event::{EventInstance, EventKind, TimeSpec};
pub use graph::{
    Graph, MachineNode, Node, NodeId, NodeKind, PseudoNode, PseudostateKind, RegionNode, StateNode,
    TransitionKind, TransitionNode, TransitionPath, VertexCore,
};
pub use trace::{Trace, TraceRecord};
