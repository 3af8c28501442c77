//! Event waiters: timers, change pollers and activity tasks.
//!
//! Waiters are spawned when their owning vertex is entered and cancelled
//! through the vertex's token when it exits. A cancelled waiter never
//! fires; a cancelled activity's result is discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{Behavior, Constraint, EventInstance, EventKind, NodeId, TimeSpec};

use super::machine::{Command, Runtime};
use super::ExecError;

/// How often a change event re-tests its predicate.
pub(crate) const CHANGE_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl Runtime {
    /// Spawn waiters for the time and change triggers on the vertex's
    /// outgoing transitions.
    pub(crate) fn schedule_waiters(&self, vertex: NodeId) {
        let graph = self.graph();
        let Some(core) = graph.vertex(vertex) else {
            return;
        };
        let token = match self.inner.config.lock().get(vertex) {
            Some(record) => record.token.clone(),
            None => return,
        };

        for &tid in &core.outgoing {
            let Some(transition) = graph.transition(tid) else {
                continue;
            };
            for &event in &transition.events {
                match graph.event(event) {
                    Some(EventKind::Time { when }) => {
                        self.spawn_timer(event, when.clone(), token.clone());
                    }
                    Some(EventKind::Change { predicate }) => {
                        self.spawn_change_poller(event, predicate.clone(), token.clone());
                    }
                    _ => {}
                }
            }
        }
    }

    fn spawn_timer(&self, event: NodeId, when: TimeSpec, token: CancellationToken) {
        let tx = self.inner.tx.clone();
        let delay = match when {
            TimeSpec::After(duration) => duration,
            TimeSpec::At(deadline) => (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO),
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Command::Dispatch(EventInstance::new(event), None));
                }
            }
        });
    }

    /// Re-test the predicate on a short cooperative interval until it
    /// holds, then send one instance.
    fn spawn_change_poller(
        &self,
        event: NodeId,
        predicate: Constraint,
        token: CancellationToken,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    _ = token.cancelled() => return,
                    result = predicate.test(None) => result,
                };
                match result {
                    Ok(true) => {
                        let _ = inner
                            .tx
                            .send(Command::Dispatch(EventInstance::new(event), None));
                        return;
                    }
                    Ok(false) => {}
                    Err(error) => {
                        *inner.fault.lock() = Some(ExecError::from(error));
                        return;
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(CHANGE_POLL_INTERVAL) => {}
                }
            }
        });
    }

    /// Start a state's do-activity as a background task. Natural
    /// completion reports back to the loop; cancellation discards the
    /// result.
    pub(crate) fn spawn_activity(
        &self,
        vertex: NodeId,
        activity: &Behavior,
        instance: Option<&EventInstance>,
    ) {
        let token = {
            let mut config = self.inner.config.lock();
            match config.get_mut(vertex) {
                Some(record) => {
                    record.activity_running = true;
                    record.token.clone()
                }
                None => return,
            }
        };
        debug!(state = %self.graph().qualified_path(vertex), "starting activity");

        let future = activity.run(instance.cloned());
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = future => {
                    if let Err(error) = result {
                        *inner.fault.lock() = Some(ExecError::from(error));
                    }
                    let _ = inner.tx.send(Command::ActivityDone(vertex));
                }
            }
        });
    }
}
