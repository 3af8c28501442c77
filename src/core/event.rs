//! Event declarations and runtime event instances.
//!
//! An [`EventKind`] is part of a declared graph node; an [`EventInstance`]
//! is the concrete value dispatched through the interpreter. Instances
//! carry an optional JSON payload so embedding applications can attach
//! arbitrary data without the runtime caring about its shape.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::behavior::{Constraint, Operation};
use super::graph::NodeId;

/// When a time event fires: a relative delay from vertex entry, or an
/// absolute deadline.
#[derive(Clone, Debug)]
pub enum TimeSpec {
    /// Fire once the given duration has elapsed after the source vertex
    /// was entered.
    After(Duration),
    /// Fire at the given wall-clock instant.
    At(DateTime<Utc>),
}

/// The declared kind of an event node.
#[derive(Clone, Debug)]
pub enum EventKind {
    /// Matches any incoming event instance.
    Any,
    /// An externally produced event, optionally wrapping a callable
    /// operation whose resolution activates the event.
    Call { operation: Option<Operation> },
    /// Fires on a timer while its source vertex is active.
    Time { when: TimeSpec },
    /// Fires once its predicate evaluates true while its source vertex is
    /// active.
    Change { predicate: Constraint },
    /// Synthesized per state; becomes active once the state's activity and
    /// all descendant activities have finished.
    Completion { state: NodeId },
}

/// A concrete occurrence of a declared event, dispatched through the
/// interpreter.
///
/// # Example
///
/// ```rust
/// use harel::core::{EventInstance, NodeId};
///
/// let ev = EventInstance::new(NodeId::from_raw(3)).with_payload(serde_json::json!({"key": 1}));
/// assert!(ev.payload.is_some());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventInstance {
    /// Unique id of this occurrence.
    pub id: Uuid,
    /// The declared event node this is an instance of.
    pub event: NodeId,
    /// Optional application data attached to the occurrence.
    pub payload: Option<Value>,
}

impl EventInstance {
    /// Create an instance of the given declared event.
    pub fn new(event: NodeId) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            payload: None,
        }
    }

    /// Attach a payload to the instance.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
