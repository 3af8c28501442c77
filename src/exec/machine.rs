//! Machine instances, the command channel and the interpreter loop.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::compiler::Chart;
use crate::core::{EventInstance, EventKind, Graph, NodeId, Trace};

use super::config::{ActiveConfig, HistoryRecord};
use super::error::ExecError;
use super::step::LoopState;

/// How a dispatched event was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// A transition fired for the event.
    Consumed,
    /// An active state deferred the event; it stays queued for later
    /// steps.
    Deferred,
    /// No transition matched and nothing deferred it; the event was
    /// dropped at the end of the step.
    Unconsumed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Stopped,
    Running,
}

/// Internal halt request raised from within vertex entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Halt {
    /// A final state emptied the machine's last active region.
    Graceful,
    /// A terminate pseudostate was entered: tear down without exit
    /// behaviors.
    Immediate,
}

pub(crate) type Ack<T> = oneshot::Sender<Result<T, ExecError>>;

pub(crate) enum Command {
    Start(Ack<()>),
    Dispatch(EventInstance, Option<Ack<SendOutcome>>),
    /// A pooled event (completion, resolved call) became active.
    Activated(NodeId),
    /// A state's do-activity finished naturally.
    ActivityDone(NodeId),
    Terminate(Ack<()>),
}

pub(crate) struct Inner {
    pub graph: Arc<Graph>,
    pub machine: NodeId,
    pub tx: mpsc::UnboundedSender<Command>,
    pub config: Mutex<ActiveConfig>,
    /// Pooled events currently active (completion events, resolved calls).
    pub active: Mutex<Vec<NodeId>>,
    pub history: Mutex<HashMap<NodeId, HistoryRecord>>,
    pub trace: Mutex<Trace>,
    pub phase: Mutex<Phase>,
    pub halt: Mutex<Option<Halt>>,
    /// Error raised by a background task (activity, change poller),
    /// surfaced on the next awaited call.
    pub fault: Mutex<Option<ExecError>>,
    pub cancel: CancellationToken,
}

/// Cheap handle the loop, entry logic and scheduler share.
#[derive(Clone)]
pub(crate) struct Runtime {
    pub inner: Arc<Inner>,
}

impl Runtime {
    pub(crate) fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    /// Mark a pooled event active and nudge the loop, once.
    pub(crate) fn activate(&self, event: NodeId) {
        let mut active = self.inner.active.lock();
        if active.contains(&event) {
            return;
        }
        active.push(event);
        drop(active);
        let _ = self.inner.tx.send(Command::Activated(event));
    }

    /// Activate the completion event of every active state that has run to
    /// completion: its own activity and all active-descendant activities
    /// have finished, and, for a composite, its regions have emptied out
    /// (reached a final state).
    pub(crate) fn refresh_completions(&self) {
        let graph = self.graph();
        let mut ready = Vec::new();
        {
            let config = self.inner.config.lock();
            for (v, _) in config.iter() {
                let Some(state) = graph.state(v) else { continue };
                let Some(completion) = state.completion else { continue };
                let activities_done = config
                    .iter()
                    .filter(|&(o, _)| o == v || graph.is_descendant(o, v))
                    .all(|(_, rec)| !rec.activity_running);
                let regions = match state.submachine {
                    Some(sub) => graph.machine(sub).map(|m| m.regions.as_slice()),
                    None => Some(state.regions.as_slice()),
                };
                let regions_complete = regions
                    .unwrap_or(&[])
                    .iter()
                    .all(|&r| config.active_children(graph, r).is_empty());
                if activities_done && regions_complete {
                    ready.push(completion);
                }
            }
        }
        for event in ready {
            self.activate(event);
        }
    }

    pub(crate) fn record_fault(&self, error: ExecError) {
        debug!(error = %error, "recording background fault");
        *self.inner.fault.lock() = Some(error);
    }
}

/// One running instance of a compiled chart.
///
/// Created stopped; [`start`](Machine::start) spawns the interpreter loop
/// and enters the machine's top-level regions through their initial
/// pseudostates. Each instance is independent: it owns its loop task, its
/// waiters and its active configuration.
pub struct Machine {
    inner: Arc<Inner>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl Machine {
    /// Create a stopped instance of the chart.
    pub fn new(chart: &Chart) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            graph: chart.graph_arc(),
            machine: chart.machine(),
            tx,
            config: Mutex::new(ActiveConfig::default()),
            active: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            trace: Mutex::new(Trace::new()),
            phase: Mutex::new(Phase::Stopped),
            halt: Mutex::new(None),
            fault: Mutex::new(None),
            cancel: CancellationToken::new(),
        });
        Self {
            inner,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Begin execution. Resolves once the initial active configuration is
    /// settled. A machine can be started once.
    pub async fn start(&self) -> Result<(), ExecError> {
        self.take_fault()?;
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or(ExecError::AlreadyStarted)?;
        let runtime = Runtime {
            inner: Arc::clone(&self.inner),
        };
        tokio::spawn(run_loop(runtime, rx));

        let (ack, done) = oneshot::channel();
        self.inner
            .tx
            .send(Command::Start(ack))
            .map_err(|_| ExecError::NotRunning)?;
        done.await.map_err(|_| ExecError::Interrupted)?
    }

    /// Dispatch an instance of the given event. Resolves once the event
    /// has been fully processed.
    pub async fn send(&self, event: NodeId) -> Result<SendOutcome, ExecError> {
        self.send_instance(EventInstance::new(event)).await
    }

    /// Dispatch an event instance carrying a payload.
    pub async fn send_with(&self, event: NodeId, payload: Value) -> Result<SendOutcome, ExecError> {
        self.send_instance(EventInstance::new(event).with_payload(payload))
            .await
    }

    /// Dispatch a pre-built event instance.
    pub async fn send_instance(&self, instance: EventInstance) -> Result<SendOutcome, ExecError> {
        self.take_fault()?;
        if *self.inner.phase.lock() != Phase::Running {
            return Err(ExecError::NotRunning);
        }
        let (ack, done) = oneshot::channel();
        self.inner
            .tx
            .send(Command::Dispatch(instance, Some(ack)))
            .map_err(|_| ExecError::NotRunning)?;
        done.await.map_err(|_| ExecError::Interrupted)?
    }

    /// Invoke the operation wrapped by a call event; on resolution the
    /// event is dispatched, and the operation's value is returned together
    /// with the dispatch outcome.
    pub async fn invoke(&self, event: NodeId) -> Result<(Value, SendOutcome), ExecError> {
        let operation = match self.inner.graph.event(event) {
            Some(EventKind::Call {
                operation: Some(op),
            }) => op.clone(),
            _ => {
                return Err(ExecError::NoOperation {
                    path: self.inner.graph.qualified_path(event),
                })
            }
        };
        let instance = EventInstance::new(event);
        let value = operation.call(instance.clone()).await?;
        let outcome = self.send_instance(instance).await?;
        Ok((value, outcome))
    }

    /// Exit all active regions and stop the loop. Idempotent.
    pub async fn terminate(&self) -> Result<(), ExecError> {
        self.take_fault()?;
        if *self.inner.phase.lock() != Phase::Running {
            return Ok(());
        }
        let (ack, done) = oneshot::channel();
        if self
            .inner
            .tx
            .send(Command::Terminate(ack))
            .is_err()
        {
            return Ok(());
        }
        match done.await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }

    /// Whether every given vertex is in the active configuration.
    pub fn is_active(&self, vertices: &[NodeId]) -> bool {
        let config = self.inner.config.lock();
        vertices.iter().all(|&v| config.contains(v))
    }

    /// The active leaf states, in id order. Pseudostates are excluded.
    pub fn state(&self) -> Vec<NodeId> {
        self.inner.config.lock().leaf_states(&self.inner.graph)
    }

    /// Snapshot of the fired-transition trace.
    pub fn trace(&self) -> Trace {
        self.inner.trace.lock().clone()
    }

    fn take_fault(&self) -> Result<(), ExecError> {
        match self.inner.fault.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn run_loop(runtime: Runtime, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut state = LoopState::default();
    loop {
        let command = tokio::select! {
            _ = runtime.inner.cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(c) => c,
                None => break,
            },
        };
        runtime.handle(command, &mut state, &mut rx).await;

        if let Some(ack) = state.pending_terminate.take() {
            runtime.do_terminate(&mut state, ack).await;
            break;
        }
        let halt = self_halt(&runtime);
        if let Some(mode) = halt {
            runtime.teardown(mode, &mut state);
            break;
        }
        if state.stopping {
            break;
        }
    }
    *runtime.inner.phase.lock() = Phase::Stopped;
}

fn self_halt(runtime: &Runtime) -> Option<Halt> {
    runtime.inner.halt.lock().take()
}

impl Runtime {
    async fn handle(
        &self,
        command: Command,
        state: &mut LoopState,
        rx: &mut mpsc::UnboundedReceiver<Command>,
    ) {
        match command {
            Command::Start(ack) => {
                let result = self.machine_entry().await;
                if result.is_ok() {
                    *self.inner.phase.lock() = Phase::Running;
                    self.refresh_completions();
                }
                let _ = ack.send(result);
            }
            Command::Dispatch(instance, ack) => {
                state.enqueue(instance, ack);
                self.step(state, rx).await;
            }
            Command::Activated(event) => {
                // The pool was already updated by activate(); the command
                // exists to wake the loop for a step.
                let _ = event;
                self.step(state, rx).await;
            }
            Command::ActivityDone(vertex) => {
                if let Some(record) = self.inner.config.lock().get_mut(vertex) {
                    record.activity_running = false;
                }
                self.refresh_completions();
            }
            Command::Terminate(ack) => {
                self.do_terminate(state, ack).await;
                state.stopping = true;
            }
        }
    }

    async fn do_terminate(&self, state: &mut LoopState, ack: Ack<()>) {
        let result = self.machine_exit().await;
        state.resolve_all(SendOutcome::Unconsumed);
        *self.inner.phase.lock() = Phase::Stopped;
        let _ = ack.send(result);
    }

    fn teardown(&self, mode: Halt, state: &mut LoopState) {
        if mode == Halt::Immediate {
            // Terminate pseudostate: drop the configuration without
            // running exit behaviors.
            let mut config = self.inner.config.lock();
            let vertices: Vec<NodeId> = config.iter().map(|(v, _)| v).collect();
            for vertex in vertices {
                if let Some(record) = config.remove(vertex) {
                    record.token.cancel();
                }
            }
        }
        state.resolve_all(SendOutcome::Unconsumed);
        *self.inner.phase.lock() = Phase::Stopped;
    }
}
