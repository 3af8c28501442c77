//! Fired-transition trace.
//!
//! Each machine instance records every transition it fires in an
//! append-only trace, queryable after the fact for diagnostics and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph::NodeId;

/// Record of a single fired transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceRecord {
    /// The transition node that fired.
    pub transition: NodeId,
    /// The transition's source vertex.
    pub source: Option<NodeId>,
    /// The transition's target vertex.
    pub target: Option<NodeId>,
    /// The event instance's declared event, if one triggered the firing.
    pub event: Option<NodeId>,
    /// When the firing completed.
    pub at: DateTime<Utc>,
}

/// Ordered, append-only history of fired transitions.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use harel::core::{NodeId, Trace, TraceRecord};
///
/// let mut trace = Trace::new();
/// trace.record(TraceRecord {
///     transition: NodeId::from_raw(5),
///     source: Some(NodeId::from_raw(1)),
///     target: Some(NodeId::from_raw(2)),
///     event: None,
///     at: Utc::now(),
/// });
/// assert_eq!(trace.records().len(), 1);
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Trace {
    records: Vec<TraceRecord>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn record(&mut self, record: TraceRecord) {
        self.records.push(record);
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    /// The most recent record.
    pub fn last(&self) -> Option<&TraceRecord> {
        self.records.last()
    }

    /// Source/target pairs in firing order, skipping internal transitions.
    pub fn path(&self) -> Vec<(NodeId, NodeId)> {
        self.records
            .iter()
            .filter_map(|r| Some((r.source?, r.target?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: u32, target: u32) -> TraceRecord {
        TraceRecord {
            transition: NodeId::from_raw(100 + source),
            source: Some(NodeId::from_raw(source)),
            target: Some(NodeId::from_raw(target)),
            event: None,
            at: Utc::now(),
        }
    }

    #[test]
    fn trace_preserves_firing_order() {
        let mut trace = Trace::new();
        trace.record(record(1, 2));
        trace.record(record(2, 3));

        let path = trace.path();
        assert_eq!(
            path,
            vec![
                (NodeId::from_raw(1), NodeId::from_raw(2)),
                (NodeId::from_raw(2), NodeId::from_raw(3)),
            ]
        );
        assert_eq!(trace.last().unwrap().target, Some(NodeId::from_raw(3)));
    }

    #[test]
    fn path_skips_internal_firings() {
        let mut trace = Trace::new();
        trace.record(record(1, 2));
        trace.record(TraceRecord {
            transition: NodeId::from_raw(50),
            source: Some(NodeId::from_raw(2)),
            target: None,
            event: None,
            at: Utc::now(),
        });

        assert_eq!(trace.records().len(), 2);
        assert_eq!(trace.path().len(), 1);
    }
}
