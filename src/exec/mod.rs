//! Concurrent interpreter.
//!
//! A [`Machine`] is one running instance of a compiled chart. It owns an
//! interpreter loop task fed by a command channel; waiter tasks (timers,
//! change pollers, activities) send into the same channel, and all mutation
//! of the active configuration happens from the loop side. Sibling regions
//! are entered, exited and offered events concurrently via gather-style
//! fan-out, never via unstructured background tasks.

mod config;
mod entry;
mod error;
mod machine;
mod scheduler;
mod step;

pub use error::ExecError;
pub use machine::{Machine, SendOutcome};

/// How a vertex on an enter path is entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EntryKind {
    /// Run the vertex's default-initial cascade (composites enter their
    /// regions via each region's initial pseudostate).
    Default,
    /// The enter path continues below this vertex; skip its own cascade.
    Explicit,
}

/// Result of offering one event to the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// A transition fired.
    Complete,
    /// Nothing matched.
    Incomplete,
    /// An active state defers the event; retry next step.
    Deferred,
}
