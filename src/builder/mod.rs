//! Authoring API for declaring charts.
//!
//! The builder is one way to produce the arena graph the compiler
//! consumes; any other graph-building front end can construct a
//! [`Graph`](crate::core::Graph) directly and hand it to
//! [`Chart::new`](crate::compiler::Chart::new).
//!
//! # Example
//!
//! ```rust
//! use harel::builder::ChartBuilder;
//! use harel::core::PseudostateKind;
//!
//! let chart = ChartBuilder::new("job")
//!     .event("submit")
//!     .initial("idle")
//!     .state("idle", |s| s.on("submit").to("decide"))
//!     .pseudostate("decide", PseudostateKind::Choice)
//!     .transition("decide", |t| {
//!         t.when_fn(|ev| ev.is_some_and(|e| e.payload.is_some())).to("running")
//!     })
//!     .transition("decide", |t| t.to("idle"))
//!     .state("running", |_| {})
//!     .build()
//!     .unwrap();
//!
//! assert!(chart.find("decide").is_some());
//! ```

mod error;
mod machine;
mod state;
mod transition;

pub use error::BuildError;
pub use machine::ChartBuilder;
pub use state::{RegionBuilder, StateBuilder};
pub use transition::TransitionDraft;
