//! Transition declarations and the in-progress draft handle.

use std::time::Duration;

use crate::core::{Behavior, BehaviorError, Constraint, EventInstance};

/// A declared transition, collected by the state and region builders and
/// resolved by name when the chart is assembled.
#[derive(Debug)]
pub(crate) struct TransitionDecl {
    /// Source vertex name; `None` means the state whose builder declared
    /// the transition.
    pub source: Option<String>,
    /// Human-readable source label for error messages.
    pub source_label: String,
    pub events: Vec<String>,
    /// Relative time trigger; assembled into an anonymous time event.
    pub after: Option<Duration>,
    pub guard: Option<Constraint>,
    pub effect: Option<Behavior>,
    pub target: Option<String>,
    /// Set once `.to()` or `.internal()` sealed the declaration.
    pub finished: bool,
}

impl TransitionDecl {
    pub(crate) fn new(source: Option<String>, source_label: String) -> Self {
        Self {
            source,
            source_label,
            events: Vec::new(),
            after: None,
            guard: None,
            effect: None,
            target: None,
            finished: false,
        }
    }
}

/// An in-progress transition.
///
/// Obtained from [`StateBuilder::on`](crate::builder::StateBuilder::on)
/// and friends; configure it with the chained methods, then seal it with
/// [`to`](TransitionDraft::to) or [`internal`](TransitionDraft::internal).
/// A draft dropped without being sealed turns into a build error, not a
/// silently missing transition.
pub struct TransitionDraft<'a> {
    sink: &'a mut Vec<TransitionDecl>,
    decl: Option<TransitionDecl>,
}

impl<'a> TransitionDraft<'a> {
    pub(crate) fn new(sink: &'a mut Vec<TransitionDecl>, decl: TransitionDecl) -> Self {
        Self {
            sink,
            decl: Some(decl),
        }
    }

    fn decl_mut(&mut self) -> &mut TransitionDecl {
        // The option is only emptied by the sealing methods, which consume
        // self.
        self.decl.as_mut().unwrap_or_else(|| unreachable!())
    }

    /// Add another trigger event by name.
    pub fn on(mut self, event: &str) -> Self {
        self.decl_mut().events.push(event.to_string());
        self
    }

    /// Guard the transition with a constraint.
    pub fn when(mut self, guard: Constraint) -> Self {
        self.decl_mut().guard = Some(guard);
        self
    }

    /// Guard the transition with a synchronous predicate.
    pub fn when_fn<F>(self, f: F) -> Self
    where
        F: Fn(Option<&EventInstance>) -> bool + Send + Sync + 'static,
    {
        self.when(Constraint::from_fn(f))
    }

    /// Attach an effect behavior.
    pub fn effect(mut self, effect: Behavior) -> Self {
        self.decl_mut().effect = Some(effect);
        self
    }

    /// Attach a synchronous effect closure.
    pub fn effect_fn<F>(self, f: F) -> Self
    where
        F: Fn(Option<&EventInstance>) -> Result<(), BehaviorError> + Send + Sync + 'static,
    {
        self.effect(Behavior::from_fn(f))
    }

    /// Seal the transition with a target vertex.
    pub fn to(mut self, target: &str) {
        if let Some(mut decl) = self.decl.take() {
            decl.target = Some(target.to_string());
            decl.finished = true;
            self.sink.push(decl);
        }
    }

    /// Seal the transition without a target: it fires its effect without
    /// exiting or entering any vertex.
    pub fn internal(mut self) {
        if let Some(mut decl) = self.decl.take() {
            decl.finished = true;
            self.sink.push(decl);
        }
    }
}

impl Drop for TransitionDraft<'_> {
    fn drop(&mut self) {
        // Keep unsealed drafts so build() can report them.
        if let Some(decl) = self.decl.take() {
            self.sink.push(decl);
        }
    }
}
