//! State and region declaration builders.

use std::time::Duration;

use crate::core::{Behavior, BehaviorError, EventInstance, PseudostateKind};

use super::transition::{TransitionDecl, TransitionDraft};

/// Vertex and transition declarations collected inside one region (or as
/// loose children of a composite, to be wrapped by region synthesis).
#[derive(Debug, Default)]
pub(crate) struct ChildDecls {
    pub initials: Vec<String>,
    pub states: Vec<(String, StateBuilder)>,
    pub finals: Vec<String>,
    pub pseudostates: Vec<(String, PseudostateKind)>,
    pub transitions: Vec<TransitionDecl>,
}

impl ChildDecls {
    pub(crate) fn is_empty(&self) -> bool {
        self.initials.is_empty()
            && self.states.is_empty()
            && self.finals.is_empty()
            && self.pseudostates.is_empty()
            && self.transitions.is_empty()
    }
}

/// Declares the contents of one region.
#[derive(Debug, Default)]
pub struct RegionBuilder {
    pub(crate) children: ChildDecls,
}

impl RegionBuilder {
    /// Declare the region's initial pseudostate, wired to the named target.
    pub fn initial(&mut self, target: &str) -> &mut Self {
        self.children.initials.push(target.to_string());
        self
    }

    /// Declare a state.
    pub fn state(&mut self, name: &str, f: impl FnOnce(&mut StateBuilder)) -> &mut Self {
        let mut state = StateBuilder::default();
        f(&mut state);
        self.children.states.push((name.to_string(), state));
        self
    }

    /// Declare a final state.
    pub fn final_state(&mut self, name: &str) -> &mut Self {
        self.children.finals.push(name.to_string());
        self
    }

    /// Declare a pseudostate of the given kind.
    pub fn pseudostate(&mut self, name: &str, kind: PseudostateKind) -> &mut Self {
        self.children.pseudostates.push((name.to_string(), kind));
        self
    }

    /// Declare a transition sourced at the named vertex (typically a
    /// pseudostate declared in this region).
    pub fn transition(&mut self, source: &str) -> TransitionDraft<'_> {
        let decl = TransitionDecl::new(Some(source.to_string()), source.to_string());
        TransitionDraft::new(&mut self.children.transitions, decl)
    }
}

/// Declares one state: its behaviors, its outgoing transitions, and its
/// contents (regions, loose children or a submachine).
#[derive(Debug, Default)]
pub struct StateBuilder {
    pub(crate) entry: Option<Behavior>,
    pub(crate) exit: Option<Behavior>,
    pub(crate) activity: Option<Behavior>,
    pub(crate) defers: Vec<String>,
    pub(crate) regions: Vec<(String, RegionBuilder)>,
    pub(crate) children: ChildDecls,
    pub(crate) submachine: Option<(String, RegionBuilder)>,
    pub(crate) transitions: Vec<TransitionDecl>,
}

impl StateBuilder {
    /// Behavior run when the state is entered.
    pub fn entry(&mut self, behavior: Behavior) -> &mut Self {
        self.entry = Some(behavior);
        self
    }

    /// Synchronous entry behavior.
    pub fn entry_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Option<&EventInstance>) -> Result<(), BehaviorError> + Send + Sync + 'static,
    {
        self.entry(Behavior::from_fn(f))
    }

    /// Behavior run when the state is exited.
    pub fn exit(&mut self, behavior: Behavior) -> &mut Self {
        self.exit = Some(behavior);
        self
    }

    /// Synchronous exit behavior.
    pub fn exit_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Option<&EventInstance>) -> Result<(), BehaviorError> + Send + Sync + 'static,
    {
        self.exit(Behavior::from_fn(f))
    }

    /// Do-activity started as a background task on entry; its completion
    /// (together with all descendant activities) activates the state's
    /// completion event.
    pub fn activity(&mut self, behavior: Behavior) -> &mut Self {
        self.activity = Some(behavior);
        self
    }

    /// Defer the named event: while this state is active and nothing
    /// deeper consumes the event, it is re-queued for the next step.
    pub fn defer(&mut self, event: &str) -> &mut Self {
        self.defers.push(event.to_string());
        self
    }

    /// Start a transition out of this state, triggered by the named event.
    pub fn on(&mut self, event: &str) -> TransitionDraft<'_> {
        let mut decl = TransitionDecl::new(None, String::new());
        decl.events.push(event.to_string());
        TransitionDraft::new(&mut self.transitions, decl)
    }

    /// Start a transition out of this state, triggered by an anonymous
    /// relative time event.
    pub fn after(&mut self, delay: Duration) -> TransitionDraft<'_> {
        let mut decl = TransitionDecl::new(None, String::new());
        decl.after = Some(delay);
        TransitionDraft::new(&mut self.transitions, decl)
    }

    /// Start a completion-triggered transition out of this state: it fires
    /// once the state's activity and all descendant activities finish.
    pub fn on_completion(&mut self) -> TransitionDraft<'_> {
        let decl = TransitionDecl::new(None, String::new());
        TransitionDraft::new(&mut self.transitions, decl)
    }

    /// Declare an orthogonal region of this composite state.
    pub fn region(&mut self, name: &str, f: impl FnOnce(&mut RegionBuilder)) -> &mut Self {
        let mut region = RegionBuilder::default();
        f(&mut region);
        self.regions.push((name.to_string(), region));
        self
    }

    /// Declare a submachine owned by this state, entered recursively
    /// instead of regions.
    pub fn submachine(&mut self, name: &str, f: impl FnOnce(&mut RegionBuilder)) -> &mut Self {
        let mut region = RegionBuilder::default();
        f(&mut region);
        self.submachine = Some((name.to_string(), region));
        self
    }

    /// Declare the initial pseudostate of this composite's (synthesized)
    /// region.
    pub fn initial(&mut self, target: &str) -> &mut Self {
        self.children.initials.push(target.to_string());
        self
    }

    /// Declare a nested state as a loose child; the compiler wraps loose
    /// children into a synthesized region.
    pub fn state(&mut self, name: &str, f: impl FnOnce(&mut StateBuilder)) -> &mut Self {
        let mut state = StateBuilder::default();
        f(&mut state);
        self.children.states.push((name.to_string(), state));
        self
    }

    /// Declare a nested final state as a loose child.
    pub fn final_state(&mut self, name: &str) -> &mut Self {
        self.children.finals.push(name.to_string());
        self
    }

    /// Declare a nested pseudostate as a loose child.
    pub fn pseudostate(&mut self, name: &str, kind: PseudostateKind) -> &mut Self {
        self.children.pseudostates.push((name.to_string(), kind));
        self
    }

    /// Declare a transition sourced at a named nested vertex.
    pub fn transition(&mut self, source: &str) -> TransitionDraft<'_> {
        let decl = TransitionDecl::new(Some(source.to_string()), source.to_string());
        TransitionDraft::new(&mut self.children.transitions, decl)
    }
}
