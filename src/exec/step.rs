//! The step loop: candidate event selection and region processing.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::{EventInstance, EventKind, NodeId, TraceRecord, TransitionNode};

use super::machine::{Ack, Command, Runtime};
use super::{EntryKind, ExecError, Outcome, SendOutcome};

/// A dispatched event instance awaiting processing, with the send future
/// that resolves once it has been handled.
pub(crate) struct Pending {
    pub instance: EventInstance,
    pub ack: Option<Ack<SendOutcome>>,
}

impl Pending {
    fn resolve(&mut self, outcome: SendOutcome) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(Ok(outcome));
        }
    }

    fn fail(&mut self, error: ExecError) -> bool {
        match self.ack.take() {
            Some(ack) => {
                let _ = ack.send(Err(error));
                true
            }
            None => false,
        }
    }
}

/// Mutable state owned by the interpreter loop.
#[derive(Default)]
pub(crate) struct LoopState {
    pub queued: VecDeque<Pending>,
    pub deferred: Vec<Pending>,
    pub stopping: bool,
    pub pending_terminate: Option<Ack<()>>,
}

impl LoopState {
    pub fn enqueue(&mut self, instance: EventInstance, ack: Option<Ack<SendOutcome>>) {
        self.queued.push_back(Pending { instance, ack });
    }

    /// Resolve every outstanding send future, e.g. at termination.
    pub fn resolve_all(&mut self, outcome: SendOutcome) {
        for mut pending in self.queued.drain(..).chain(self.deferred.drain(..)) {
            pending.resolve(outcome);
        }
    }
}

enum Picked {
    Pool(NodeId),
    Deferred(usize),
    Queued(usize),
}

impl Runtime {
    /// Drain events until nothing untried remains. Candidates are the
    /// active pool, events deferred by the previous step, and the input
    /// queue, deduplicated in first-seen order by declared event.
    pub(crate) async fn step(
        &self,
        state: &mut LoopState,
        rx: &mut mpsc::UnboundedReceiver<Command>,
    ) {
        let mut tried: HashSet<NodeId> = HashSet::new();
        let mut carried: Vec<Pending> = Vec::new();

        loop {
            if state.pending_terminate.is_some() || self.inner.halt.lock().is_some() {
                break;
            }
            self.drain_commands(state, rx);

            let Some(picked) = self.pick(state, &tried) else {
                break;
            };
            match picked {
                Picked::Pool(event) => {
                    let instance = EventInstance::new(event);
                    match self.process_machine(&instance).await {
                        Ok(Outcome::Complete) => {
                            tried.clear();
                            self.inner.active.lock().retain(|&e| e != event);
                        }
                        Ok(_) => {
                            tried.insert(event);
                        }
                        Err(error) => {
                            self.record_fault(error);
                            tried.insert(event);
                        }
                    }
                }
                Picked::Deferred(index) => {
                    let mut pending = state.deferred.remove(index);
                    let event = pending.instance.event;
                    match self.process_machine(&pending.instance).await {
                        Ok(Outcome::Complete) => {
                            tried.clear();
                            pending.resolve(SendOutcome::Consumed);
                        }
                        Ok(Outcome::Deferred) => {
                            tried.insert(event);
                            carried.push(pending);
                        }
                        // Deferred past relevance: the deferring state is
                        // gone and nothing consumes the event. Drop it.
                        Ok(Outcome::Incomplete) => {
                            tried.insert(event);
                            pending.resolve(SendOutcome::Unconsumed);
                        }
                        Err(error) => {
                            if !pending.fail(error.clone()) {
                                self.record_fault(error);
                            }
                        }
                    }
                }
                Picked::Queued(index) => {
                    let Some(mut pending) = state.queued.remove(index) else {
                        break;
                    };
                    let event = pending.instance.event;
                    match self.process_machine(&pending.instance).await {
                        Ok(Outcome::Complete) => {
                            tried.clear();
                            pending.resolve(SendOutcome::Consumed);
                        }
                        Ok(Outcome::Deferred) => {
                            tried.insert(event);
                            pending.resolve(SendOutcome::Deferred);
                            carried.push(pending);
                        }
                        Ok(Outcome::Incomplete) => {
                            tried.insert(event);
                            state.queued.push_back(pending);
                        }
                        Err(error) => {
                            if !pending.fail(error.clone()) {
                                self.record_fault(error);
                            }
                        }
                    }
                }
            }
        }

        // Nothing more fires without new input: resolve the send futures
        // of events no pending transition owns, and carry deferrals over.
        for mut pending in state.queued.drain(..) {
            warn!(
                event = %self.graph().qualified_path(pending.instance.event),
                "event matched no transition"
            );
            pending.resolve(SendOutcome::Unconsumed);
        }
        state.deferred.append(&mut carried);
    }

    /// Pull newly arrived commands without blocking the step.
    fn drain_commands(&self, state: &mut LoopState, rx: &mut mpsc::UnboundedReceiver<Command>) {
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Dispatch(instance, ack) => state.enqueue(instance, ack),
                Command::Activated(_) => {}
                Command::ActivityDone(vertex) => {
                    if let Some(record) = self.inner.config.lock().get_mut(vertex) {
                        record.activity_running = false;
                    }
                    self.refresh_completions();
                }
                Command::Start(ack) => {
                    let _ = ack.send(Err(ExecError::AlreadyStarted));
                }
                Command::Terminate(ack) => {
                    state.pending_terminate = Some(ack);
                    return;
                }
            }
        }
    }

    /// First candidate whose declared event has not been tried this round:
    /// active pool first, then deferred, then the queue.
    fn pick(&self, state: &LoopState, tried: &HashSet<NodeId>) -> Option<Picked> {
        let active = self.inner.active.lock().clone();
        if let Some(&event) = active.iter().find(|e| !tried.contains(e)) {
            return Some(Picked::Pool(event));
        }
        if let Some(index) = state
            .deferred
            .iter()
            .position(|p| !tried.contains(&p.instance.event))
        {
            return Some(Picked::Deferred(index));
        }
        if let Some(index) = state
            .queued
            .iter()
            .position(|p| !tried.contains(&p.instance.event))
        {
            return Some(Picked::Queued(index));
        }
        None
    }

    /// Offer the event to every top-level region concurrently.
    pub(crate) async fn process_machine(
        &self,
        instance: &EventInstance,
    ) -> Result<Outcome, ExecError> {
        let regions = match self.graph().machine(self.inner.machine) {
            Some(machine) => machine.regions.clone(),
            None => return Ok(Outcome::Incomplete),
        };
        self.process_regions(&regions, instance).await
    }

    async fn process_regions(
        &self,
        regions: &[NodeId],
        instance: &EventInstance,
    ) -> Result<Outcome, ExecError> {
        let results = join_all(
            regions
                .iter()
                .map(|&region| self.process_region(region, instance)),
        )
        .await;

        let mut outcome = Outcome::Incomplete;
        for result in results {
            match result? {
                Outcome::Complete => return Ok(Outcome::Complete),
                Outcome::Deferred => outcome = Outcome::Deferred,
                Outcome::Incomplete => {}
            }
        }
        Ok(outcome)
    }

    /// A region delegates to its currently active subvertices.
    fn process_region<'a>(
        &'a self,
        region: NodeId,
        instance: &'a EventInstance,
    ) -> BoxFuture<'a, Result<Outcome, ExecError>> {
        async move {
            let actives = self
                .inner
                .config
                .lock()
                .active_children(self.graph(), region);
            let mut outcome = Outcome::Incomplete;
            for vertex in actives {
                match self.process_vertex(vertex, instance).await? {
                    Outcome::Incomplete => {}
                    other => {
                        outcome = other;
                        break;
                    }
                }
            }
            Ok(outcome)
        }
        .boxed()
    }

    /// A composite first offers the event to its regions concurrently;
    /// only if none matched does it try its own outgoing transitions.
    fn process_vertex<'a>(
        &'a self,
        vertex: NodeId,
        instance: &'a EventInstance,
    ) -> BoxFuture<'a, Result<Outcome, ExecError>> {
        async move {
            let graph = self.graph();
            let Some(state) = graph.state(vertex) else {
                // Final states and parked pseudostates do not consume
                // events.
                return Ok(Outcome::Incomplete);
            };

            let regions = match state.submachine {
                Some(sub) => graph
                    .machine(sub)
                    .map(|m| m.regions.clone())
                    .unwrap_or_default(),
                None => state.regions.clone(),
            };
            if !regions.is_empty() {
                match self.process_regions(&regions, instance).await? {
                    Outcome::Incomplete => {}
                    other => return Ok(other),
                }
            }

            if self.try_transitions(vertex, instance).await? {
                return Ok(Outcome::Complete);
            }
            if state.deferred.contains(&instance.event) {
                return Ok(Outcome::Deferred);
            }
            Ok(Outcome::Incomplete)
        }
        .boxed()
    }

    /// Try each outgoing transition in declaration order; fire the first
    /// whose trigger set matches and whose guard passes.
    async fn try_transitions(
        &self,
        vertex: NodeId,
        instance: &EventInstance,
    ) -> Result<bool, ExecError> {
        let outgoing = match self.graph().vertex(vertex) {
            Some(core) => core.outgoing.clone(),
            None => return Ok(false),
        };
        for tid in outgoing {
            let Some(transition) = self.graph().transition(tid) else {
                continue;
            };
            if !self.trigger_matches(transition, instance) {
                continue;
            }
            if let Some(guard) = &transition.guard {
                if !guard.test(Some(instance.clone())).await? {
                    continue;
                }
            }
            self.exec_transition(tid, Some(instance)).await?;
            return Ok(true);
        }
        Ok(false)
    }

    fn trigger_matches(&self, transition: &TransitionNode, instance: &EventInstance) -> bool {
        transition.events.iter().any(|&event| {
            event == instance.event
                || matches!(self.graph().event(event), Some(EventKind::Any))
        })
    }

    /// Fire one transition: leave innermost-first, run the effect, enter
    /// down to the target.
    pub(crate) fn exec_transition<'a>(
        &'a self,
        tid: NodeId,
        instance: Option<&'a EventInstance>,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        async move {
            let graph = self.graph();
            let Some(transition) = graph.transition(tid) else {
                return Ok(());
            };
            let (leave, enter) = (transition.path.leave.clone(), transition.path.enter.clone());
            let (source, target, effect) =
                (transition.source, transition.target, transition.effect.clone());
            debug!(transition = %graph.qualified_path(tid), "fire");

            for &vertex in &leave {
                self.exit_vertex(vertex, instance).await?;
            }
            if let Some(effect) = effect {
                effect.run(instance.cloned()).await?;
            }
            let count = enter.len();
            for (i, &vertex) in enter.iter().enumerate() {
                let kind = if i + 1 == count {
                    EntryKind::Default
                } else {
                    EntryKind::Explicit
                };
                self.enter_vertex(vertex, kind, instance).await?;
            }

            self.inner.trace.lock().record(TraceRecord {
                transition: tid,
                source,
                target,
                event: instance.map(|i| i.event),
                at: Utc::now(),
            });
            self.refresh_completions();
            Ok(())
        }
        .boxed()
    }
}
