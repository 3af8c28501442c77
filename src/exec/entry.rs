//! Vertex entry and exit, including pseudostate semantics.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::debug;

use crate::core::{EventInstance, NodeId, NodeKind, PseudostateKind, StateNode};

use super::config::{HistoryRecord, VertexRecord};
use super::machine::{Halt, Runtime};
use super::{EntryKind, ExecError};

impl Runtime {
    /// Enter the machine's top-level regions via their default-initial
    /// paths.
    pub(crate) async fn machine_entry(&self) -> Result<(), ExecError> {
        let regions = match self.graph().machine(self.inner.machine) {
            Some(machine) => machine.regions.clone(),
            None => return Ok(()),
        };
        let results = join_all(regions.iter().map(|&r| self.enter_region(r, None))).await;
        for result in results {
            result?;
        }
        self.refresh_completions();
        Ok(())
    }

    /// Exit all active regions; mirrors entry.
    pub(crate) async fn machine_exit(&self) -> Result<(), ExecError> {
        let regions = match self.graph().machine(self.inner.machine) {
            Some(machine) => machine.regions.clone(),
            None => return Ok(()),
        };
        let results = join_all(regions.iter().map(|&r| self.exit_region(r, None))).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    fn enter_region<'a>(
        &'a self,
        region: NodeId,
        instance: Option<&'a EventInstance>,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        async move {
            match self.graph().region(region).and_then(|r| r.initial) {
                Some(initial) => self.enter_vertex(initial, EntryKind::Default, instance).await,
                // A region without an initial pseudostate is only entered
                // explicitly.
                None => Ok(()),
            }
        }
        .boxed()
    }

    fn exit_region<'a>(
        &'a self,
        region: NodeId,
        instance: Option<&'a EventInstance>,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        async move {
            let actives = self
                .inner
                .config
                .lock()
                .active_children(self.graph(), region);
            for vertex in actives {
                self.exit_vertex(vertex, instance).await?;
            }
            Ok(())
        }
        .boxed()
    }

    pub(crate) fn enter_vertex<'a>(
        &'a self,
        vertex: NodeId,
        kind: EntryKind,
        instance: Option<&'a EventInstance>,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        async move {
            match &self.graph().node(vertex).kind {
                NodeKind::State(state) => self.enter_state(vertex, state, kind, instance).await,
                NodeKind::Final(_) => self.enter_final(vertex, instance).await,
                NodeKind::Pseudo(pseudo) => {
                    self.enter_pseudostate(vertex, pseudo.kind, instance).await
                }
                _ => Ok(()),
            }
        }
        .boxed()
    }

    async fn enter_state(
        &self,
        vertex: NodeId,
        state: &StateNode,
        kind: EntryKind,
        instance: Option<&EventInstance>,
    ) -> Result<(), ExecError> {
        {
            let mut config = self.inner.config.lock();
            if config.contains(vertex) {
                // Fork branches share entered ancestors.
                return Ok(());
            }
            config.insert(vertex, VertexRecord::new(self.inner.cancel.child_token()));
        }
        debug!(state = %self.graph().qualified_path(vertex), "enter");

        if let Some(entry) = &state.entry {
            entry.run(instance.cloned()).await?;
        }
        if let Some(activity) = &state.activity {
            self.spawn_activity(vertex, activity, instance);
        }

        if let Some(sub) = state.submachine {
            // One-time recursive machine entry instead of region entry.
            let regions = self
                .graph()
                .machine(sub)
                .map(|m| m.regions.clone())
                .unwrap_or_default();
            let results = join_all(regions.iter().map(|&r| self.enter_region(r, instance))).await;
            for result in results {
                result?;
            }
        } else if kind == EntryKind::Default && !state.regions.is_empty() {
            let results = join_all(
                state
                    .regions
                    .iter()
                    .map(|&r| self.enter_region(r, instance)),
            )
            .await;
            for result in results {
                result?;
            }
        }

        self.schedule_waiters(vertex);
        Ok(())
    }

    /// A final state empties its containing region; if that was the last
    /// active region of the enclosing machine, the machine terminates, and
    /// of an enclosing composite, the composite completes.
    async fn enter_final(
        &self,
        vertex: NodeId,
        instance: Option<&EventInstance>,
    ) -> Result<(), ExecError> {
        let graph = self.graph();
        let Some(region) = graph.vertex(vertex).and_then(|v| v.container) else {
            return Ok(());
        };
        debug!(vertex = %graph.qualified_path(vertex), "final");
        self.exit_region(region, instance).await?;

        // Enclosing composites and submachine hosts complete through the
        // completion refresh at the end of the firing transition; only the
        // root machine terminates here.
        if graph.parent(region) == Some(self.inner.machine) {
            let all_empty = {
                let config = self.inner.config.lock();
                self.graph()
                    .machine(self.inner.machine)
                    .map(|m| {
                        m.regions
                            .iter()
                            .all(|&r| config.active_children(graph, r).is_empty())
                    })
                    .unwrap_or(true)
            };
            if all_empty {
                *self.inner.halt.lock() = Some(Halt::Graceful);
            }
        }
        Ok(())
    }

    async fn enter_pseudostate(
        &self,
        vertex: NodeId,
        kind: PseudostateKind,
        instance: Option<&EventInstance>,
    ) -> Result<(), ExecError> {
        let graph = self.graph();
        let outgoing = graph
            .vertex(vertex)
            .map(|v| v.outgoing.clone())
            .unwrap_or_default();

        match kind {
            PseudostateKind::Initial
            | PseudostateKind::EntryPoint
            | PseudostateKind::ExitPoint => {
                self.park(vertex);
                match outgoing.first() {
                    Some(&tid) => self.exec_transition(tid, instance).await,
                    None => Ok(()),
                }
            }
            PseudostateKind::Choice | PseudostateKind::Junction => {
                self.park(vertex);
                for tid in outgoing {
                    let Some(transition) = graph.transition(tid) else {
                        continue;
                    };
                    let pass = match &transition.guard {
                        Some(guard) => guard.test(instance.cloned()).await?,
                        None => true,
                    };
                    if pass {
                        return self.exec_transition(tid, instance).await;
                    }
                }
                Err(ExecError::NoEnabledBranch {
                    path: graph.qualified_path(vertex),
                })
            }
            PseudostateKind::Fork => {
                self.park(vertex);
                let results = join_all(
                    outgoing
                        .iter()
                        .map(|&tid| self.exec_transition(tid, instance)),
                )
                .await;
                for result in results {
                    result?;
                }
                Ok(())
            }
            PseudostateKind::Join => {
                self.park(vertex);
                let incoming = graph
                    .vertex(vertex)
                    .map(|v| v.incoming.clone())
                    .unwrap_or_default();
                let ready = {
                    let config = self.inner.config.lock();
                    incoming.iter().all(|&tid| {
                        graph
                            .transition(tid)
                            .and_then(|t| t.source)
                            .map(|source| !config.contains(source))
                            .unwrap_or(true)
                    })
                };
                if !ready {
                    // Parked until the remaining branches arrive.
                    return Ok(());
                }
                // Every branch has arrived: tear down the composite the
                // branches ran in, then fire onward.
                let branch_owner = incoming
                    .first()
                    .and_then(|&tid| graph.transition(tid))
                    .and_then(|t| t.source)
                    .and_then(|source| graph.vertex(source))
                    .and_then(|core| core.container)
                    .and_then(|region| graph.parent(region));
                if let Some(owner) = branch_owner {
                    if graph.state(owner).is_some() {
                        self.exit_vertex(owner, instance).await?;
                    }
                }
                match outgoing.first() {
                    Some(&tid) => self.exec_transition(tid, instance).await,
                    None => Ok(()),
                }
            }
            PseudostateKind::ShallowHistory | PseudostateKind::DeepHistory => {
                self.enter_history(vertex, instance).await
            }
            PseudostateKind::Terminate => {
                *self.inner.halt.lock() = Some(Halt::Immediate);
                Ok(())
            }
        }
    }

    /// Restore a region's saved configuration, or take the history
    /// vertex's default transition.
    async fn enter_history(
        &self,
        vertex: NodeId,
        instance: Option<&EventInstance>,
    ) -> Result<(), ExecError> {
        let graph = self.graph();
        let record = self.inner.history.lock().get(&vertex).cloned();
        match record {
            Some(HistoryRecord::Shallow(sub)) => {
                self.enter_vertex(sub, EntryKind::Default, instance).await
            }
            Some(HistoryRecord::Deep(leaves)) => {
                let Some(region) = graph.vertex(vertex).and_then(|v| v.container) else {
                    return Ok(());
                };
                for leaf in leaves {
                    let mut chain = vec![leaf];
                    let mut cursor = leaf;
                    while let Some(state) = graph.enclosing_state(cursor) {
                        if !graph.is_descendant(state, region) {
                            break;
                        }
                        chain.push(state);
                        cursor = state;
                    }
                    chain.reverse();
                    let count = chain.len();
                    for (i, &v) in chain.iter().enumerate() {
                        let kind = if i + 1 == count {
                            EntryKind::Default
                        } else {
                            EntryKind::Explicit
                        };
                        self.enter_vertex(v, kind, instance).await?;
                    }
                }
                Ok(())
            }
            None => match graph.vertex(vertex).and_then(|v| v.outgoing.first().copied()) {
                Some(tid) => self.exec_transition(tid, instance).await,
                None => Err(ExecError::NoHistoryDefault {
                    path: graph.qualified_path(vertex),
                }),
            },
        }
    }

    pub(crate) fn exit_vertex<'a>(
        &'a self,
        vertex: NodeId,
        instance: Option<&'a EventInstance>,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        async move {
            if !self.inner.config.lock().contains(vertex) {
                return Ok(());
            }
            let graph = self.graph();
            let Some(state) = graph.state(vertex) else {
                if let Some(record) = self.inner.config.lock().remove(vertex) {
                    record.token.cancel();
                }
                return Ok(());
            };

            let regions = match state.submachine {
                Some(sub) => graph
                    .machine(sub)
                    .map(|m| m.regions.clone())
                    .unwrap_or_default(),
                None => state.regions.clone(),
            };
            self.record_history(&regions);

            let results = join_all(regions.iter().map(|&r| self.exit_region(r, instance))).await;
            for result in results {
                result?;
            }

            // Cancel the activity task and every waiter this vertex owns
            // before its exit behavior runs.
            if let Some(record) = self.inner.config.lock().get(vertex) {
                record.token.cancel();
            }
            if let Some(exit) = &state.exit {
                exit.run(instance.cloned()).await?;
            }
            if let Some(completion) = state.completion {
                self.inner.active.lock().retain(|&e| e != completion);
            }
            self.inner.config.lock().remove(vertex);
            debug!(state = %graph.qualified_path(vertex), "exit");
            Ok(())
        }
        .boxed()
    }

    /// Save region configurations for any history vertices the exiting
    /// composite owns.
    fn record_history(&self, regions: &[NodeId]) {
        let graph = self.graph();
        for &region in regions {
            let history = graph.children(region).iter().copied().find_map(|c| {
                graph.pseudo(c).and_then(|p| match p.kind {
                    PseudostateKind::ShallowHistory | PseudostateKind::DeepHistory => {
                        Some((c, p.kind))
                    }
                    _ => None,
                })
            });
            let Some((vertex, kind)) = history else {
                continue;
            };

            let record = {
                let config = self.inner.config.lock();
                match kind {
                    PseudostateKind::ShallowHistory => config
                        .active_children(graph, region)
                        .into_iter()
                        .find(|&v| graph.state(v).is_some())
                        .map(HistoryRecord::Shallow),
                    _ => {
                        let leaves: Vec<NodeId> = config
                            .leaf_states(graph)
                            .into_iter()
                            .filter(|&leaf| graph.is_descendant(leaf, region))
                            .collect();
                        if leaves.is_empty() {
                            None
                        } else {
                            Some(HistoryRecord::Deep(leaves))
                        }
                    }
                }
            };
            if let Some(record) = record {
                self.inner.history.lock().insert(vertex, record);
            }
        }
    }

    fn park(&self, vertex: NodeId) {
        let mut config = self.inner.config.lock();
        if !config.contains(vertex) {
            config.insert(vertex, VertexRecord::new(self.inner.cancel.child_token()));
        }
    }
}
