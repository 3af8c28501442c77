//! The chart builder: assembles declarations into an arena graph and
//! compiles it.

use std::collections::HashMap;

use crate::compiler::Chart;
use crate::core::{
    Constraint, EventKind, Graph, MachineNode, NodeId, NodeKind, Operation, PseudoNode,
    PseudostateKind, RegionNode, StateNode, TimeSpec, TransitionNode, VertexCore,
};

use super::error::BuildError;
use super::state::{ChildDecls, RegionBuilder, StateBuilder};
use super::transition::{TransitionDecl, TransitionDraft};

#[derive(Debug)]
enum EventDecl {
    Any,
    Call(Option<Operation>),
    Time(TimeSpec),
    Change(Constraint),
}

/// Fluent builder producing a compiled [`Chart`].
///
/// Vertices are declared by name; transitions reference sources, targets
/// and trigger events by those names and are resolved when [`build`]
/// assembles the graph. Names must be unique across the chart.
///
/// # Example
///
/// ```rust
/// use harel::builder::ChartBuilder;
///
/// let chart = ChartBuilder::new("door")
///     .event("open")
///     .event("close")
///     .initial("closed")
///     .state("closed", |s| s.on("open").to("opened"))
///     .state("opened", |s| s.on("close").to("closed"))
///     .build()
///     .unwrap();
///
/// assert!(chart.find("closed").is_some());
/// ```
///
/// [`build`]: ChartBuilder::build
pub struct ChartBuilder {
    name: String,
    events: Vec<(String, EventDecl)>,
    regions: Vec<(String, RegionBuilder)>,
    children: ChildDecls,
}

impl ChartBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events: Vec::new(),
            regions: Vec::new(),
            children: ChildDecls::default(),
        }
    }

    /// Declare an externally sent call event.
    pub fn event(mut self, name: &str) -> Self {
        self.events.push((name.to_string(), EventDecl::Call(None)));
        self
    }

    /// Declare a call event wrapping an invocable operation.
    pub fn operation(mut self, name: &str, operation: Operation) -> Self {
        self.events
            .push((name.to_string(), EventDecl::Call(Some(operation))));
        self
    }

    /// Declare an event matching any incoming instance.
    pub fn any_event(mut self, name: &str) -> Self {
        self.events.push((name.to_string(), EventDecl::Any));
        self
    }

    /// Declare a time event.
    pub fn time_event(mut self, name: &str, when: TimeSpec) -> Self {
        self.events.push((name.to_string(), EventDecl::Time(when)));
        self
    }

    /// Declare a change event; the predicate is re-tested while a vertex
    /// sourcing a transition triggered by it is active.
    pub fn change_event(mut self, name: &str, predicate: Constraint) -> Self {
        self.events
            .push((name.to_string(), EventDecl::Change(predicate)));
        self
    }

    /// Declare a named top-level region.
    pub fn region(mut self, name: &str, f: impl FnOnce(&mut RegionBuilder)) -> Self {
        let mut region = RegionBuilder::default();
        f(&mut region);
        self.regions.push((name.to_string(), region));
        self
    }

    /// Declare the initial pseudostate of the machine's default region.
    pub fn initial(mut self, target: &str) -> Self {
        self.children.initials.push(target.to_string());
        self
    }

    /// Declare a top-level state in the machine's default region.
    pub fn state(mut self, name: &str, f: impl FnOnce(&mut StateBuilder)) -> Self {
        let mut state = StateBuilder::default();
        f(&mut state);
        self.children.states.push((name.to_string(), state));
        self
    }

    /// Declare a top-level final state.
    pub fn final_state(mut self, name: &str) -> Self {
        self.children.finals.push(name.to_string());
        self
    }

    /// Declare a top-level pseudostate.
    pub fn pseudostate(mut self, name: &str, kind: PseudostateKind) -> Self {
        self.children.pseudostates.push((name.to_string(), kind));
        self
    }

    /// Declare a transition sourced at a named vertex; the closure
    /// configures and seals the draft.
    pub fn transition(mut self, source: &str, f: impl FnOnce(TransitionDraft)) -> Self {
        let decl = TransitionDecl::new(Some(source.to_string()), source.to_string());
        let draft = TransitionDraft::new(&mut self.children.transitions, decl);
        f(draft);
        self
    }

    /// Assemble the graph, compile and validate it.
    pub fn build(self) -> Result<Chart, BuildError> {
        if !self.regions.is_empty() && !self.children.is_empty() {
            return Err(BuildError::MixedChildren(self.name));
        }

        let mut graph = Graph::new();
        let machine = graph.add(None, &self.name, NodeKind::Machine(MachineNode::default()));
        let mut asm = Assembler {
            graph,
            machine,
            names: HashMap::new(),
            pending: Vec::new(),
            defers: Vec::new(),
            after_count: 0,
        };

        for (name, decl) in self.events {
            let kind = match decl {
                EventDecl::Any => EventKind::Any,
                EventDecl::Call(operation) => EventKind::Call { operation },
                EventDecl::Time(when) => EventKind::Time { when },
                EventDecl::Change(predicate) => EventKind::Change { predicate },
            };
            let id = asm.graph.add(Some(machine), &name, NodeKind::Event(kind));
            asm.declare(&name, id)?;
        }

        let has_default = self.regions.is_empty();
        for (name, region) in self.regions {
            asm.realize_region(machine, &name, region, true)?;
        }
        if has_default {
            let region = RegionBuilder {
                children: self.children,
            };
            asm.realize_region(machine, "top", region, false)?;
        }

        asm.resolve()?;
        Ok(Chart::new(asm.graph)?)
    }
}

enum SourceRef {
    Node(NodeId),
    Named(String),
}

struct Assembler {
    graph: Graph,
    machine: NodeId,
    names: HashMap<String, NodeId>,
    pending: Vec<(SourceRef, TransitionDecl)>,
    defers: Vec<(NodeId, Vec<String>)>,
    after_count: usize,
}

impl Assembler {
    fn declare(&mut self, name: &str, id: NodeId) -> Result<(), BuildError> {
        if self.names.insert(name.to_string(), id).is_some() {
            return Err(BuildError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn realize_region(
        &mut self,
        parent: NodeId,
        name: &str,
        region: RegionBuilder,
        register: bool,
    ) -> Result<(), BuildError> {
        let id = self
            .graph
            .add(Some(parent), name, NodeKind::Region(RegionNode::default()));
        if register {
            self.declare(name, id)?;
        }
        self.realize_children(id, region.children)
    }

    fn realize_children(&mut self, parent: NodeId, decls: ChildDecls) -> Result<(), BuildError> {
        for target in decls.initials {
            let init = self.graph.add(
                Some(parent),
                "initial",
                NodeKind::Pseudo(PseudoNode::new(PseudostateKind::Initial)),
            );
            let mut decl = TransitionDecl::new(None, "initial".to_string());
            decl.target = Some(target);
            decl.finished = true;
            self.pending.push((SourceRef::Node(init), decl));
        }
        for (name, state) in decls.states {
            self.realize_state(parent, &name, state)?;
        }
        for name in decls.finals {
            let id = self
                .graph
                .add(Some(parent), &name, NodeKind::Final(VertexCore::default()));
            self.declare(&name, id)?;
        }
        for (name, kind) in decls.pseudostates {
            let id = self
                .graph
                .add(Some(parent), &name, NodeKind::Pseudo(PseudoNode::new(kind)));
            self.declare(&name, id)?;
        }
        for decl in decls.transitions {
            let source = decl.source.clone().unwrap_or_default();
            self.pending.push((SourceRef::Named(source), decl));
        }
        Ok(())
    }

    fn realize_state(
        &mut self,
        parent: NodeId,
        name: &str,
        state: StateBuilder,
    ) -> Result<(), BuildError> {
        if !state.regions.is_empty() && !state.children.is_empty() {
            return Err(BuildError::MixedChildren(name.to_string()));
        }

        let node = StateNode {
            entry: state.entry,
            exit: state.exit,
            activity: state.activity,
            ..StateNode::default()
        };
        let id = self.graph.add(Some(parent), name, NodeKind::State(node));
        self.declare(name, id)?;

        if !state.defers.is_empty() {
            self.defers.push((id, state.defers));
        }
        for decl in state.transitions {
            self.pending.push((SourceRef::Node(id), decl));
        }
        for (region_name, region) in state.regions {
            self.realize_region(id, &region_name, region, true)?;
        }
        self.realize_children(id, state.children)?;

        if let Some((sub_name, region)) = state.submachine {
            let sub = self
                .graph
                .add(Some(id), &sub_name, NodeKind::Machine(MachineNode::default()));
            self.declare(&sub_name, sub)?;
            self.realize_region(sub, "top", region, false)?;
            if let Some(st) = self.graph.state_mut(id) {
                st.submachine = Some(sub);
            }
        }
        Ok(())
    }

    fn lookup_event(&self, name: &str) -> Result<NodeId, BuildError> {
        let id = self
            .names
            .get(name)
            .copied()
            .ok_or_else(|| BuildError::UnknownEvent(name.to_string()))?;
        if self.graph.event(id).is_none() {
            return Err(BuildError::UnknownEvent(name.to_string()));
        }
        Ok(id)
    }

    fn resolve(&mut self) -> Result<(), BuildError> {
        for (state, names) in std::mem::take(&mut self.defers) {
            let mut ids = Vec::with_capacity(names.len());
            for name in &names {
                ids.push(self.lookup_event(name)?);
            }
            if let Some(st) = self.graph.state_mut(state) {
                st.deferred = ids;
            }
        }

        let pending = std::mem::take(&mut self.pending);
        for (index, (source_ref, decl)) in pending.into_iter().enumerate() {
            let source = match &source_ref {
                SourceRef::Node(id) => *id,
                SourceRef::Named(name) => {
                    let id = self
                        .names
                        .get(name)
                        .copied()
                        .ok_or_else(|| BuildError::UnknownSource(name.clone()))?;
                    if !self.graph.is_vertex(id) {
                        return Err(BuildError::UnknownSource(name.clone()));
                    }
                    id
                }
            };

            if !decl.finished {
                let label = self.graph.node(source).name.clone();
                return Err(BuildError::UnfinishedTransition(label));
            }

            let target = match &decl.target {
                Some(name) => {
                    let id = self
                        .names
                        .get(name)
                        .copied()
                        .ok_or_else(|| BuildError::UnknownTarget(name.clone()))?;
                    if !self.graph.is_vertex(id) {
                        return Err(BuildError::UnknownTarget(name.clone()));
                    }
                    Some(id)
                }
                None => None,
            };

            let mut events = Vec::with_capacity(decl.events.len());
            for name in &decl.events {
                events.push(self.lookup_event(name)?);
            }
            if let Some(delay) = decl.after {
                let name = format!("after_{}", self.after_count);
                self.after_count += 1;
                let id = self.graph.add(
                    Some(self.machine),
                    name,
                    NodeKind::Event(EventKind::Time {
                        when: TimeSpec::After(delay),
                    }),
                );
                events.push(id);
            }

            self.graph.add(
                Some(self.machine),
                format!("t{index}"),
                NodeKind::Transition(TransitionNode {
                    source: Some(source),
                    target,
                    events,
                    guard: decl.guard,
                    effect: decl.effect,
                    ..TransitionNode::default()
                }),
            );
        }
        Ok(())
    }
}
