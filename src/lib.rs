//! Harel: a runtime for hierarchical, concurrent state machines.
//!
//! Charts are declared as a graph of states nested into orthogonal
//! regions, pseudostates (initial, choice, fork, join, history, entry/exit
//! points), and guarded, effectful transitions. The structural compiler
//! derives the execution structure from that graph — per-vertex
//! containment, least-common-ancestor transition classification, exact
//! enter/leave sequences — and the concurrent interpreter executes it
//! against a stream of call, time, change and completion events.
//!
//! # Core Concepts
//!
//! - **Chart**: an immutable, compiled machine definition
//! - **Machine**: one running instance, with its own interpreter loop
//! - **Regions**: orthogonal partitions entered, exited and offered
//!   events concurrently
//! - **Events**: external calls, timers, change predicates and
//!   synthesized completion events, scheduled as cancellable waiters
//!
//! # Example
//!
//! ```rust
//! use harel::{ChartBuilder, Machine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let chart = ChartBuilder::new("player")
//!     .event("play")
//!     .event("stop")
//!     .initial("idle")
//!     .state("idle", |s| s.on("play").to("playing"))
//!     .state("playing", |s| s.on("stop").to("idle"))
//!     .build()
//!     .unwrap();
//!
//! let machine = Machine::new(&chart);
//! machine.start().await.unwrap();
//! machine.send(chart.find("play").unwrap()).await.unwrap();
//! assert_eq!(machine.state(), vec![chart.find("playing").unwrap()]);
//! machine.terminate().await.unwrap();
//! # }
//! ```

pub mod builder;
pub mod compiler;
pub mod core;
pub mod exec;

// Re-export commonly used types
pub use builder::{BuildError, ChartBuilder};
pub use compiler::{Chart, StructuralError};
pub use exec::{ExecError, Machine, SendOutcome};
