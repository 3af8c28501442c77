//! Behaviors, constraints and call operations attached to the graph.
//!
//! User code enters the runtime through these three wrappers. All of them
//! box an `Arc`'d closure returning a [`BoxFuture`], so synchronous and
//! asynchronous user code share one representation.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;

use super::event::EventInstance;

/// Error returned by user-supplied behavior code.
///
/// Guards, effects, entry/exit behaviors and activities all fail with this
/// type; the interpreter wraps it and surfaces it to whoever awaited the
/// `send`/`start`/`terminate` call that triggered the code.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct BehaviorError(pub String);

impl BehaviorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type BehaviorFn =
    Arc<dyn Fn(Option<EventInstance>) -> BoxFuture<'static, Result<(), BehaviorError>> + Send + Sync>;

/// An activity bound to entry, exit, a do-activity or a transition effect.
///
/// The closure receives the event instance that triggered it, or `None`
/// when the runtime enters a vertex without a triggering event (the initial
/// cascade).
///
/// # Example
///
/// ```rust
/// use harel::core::Behavior;
///
/// let log_entry = Behavior::from_fn(|_ev| {
///     // side effect here
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct Behavior {
    run: BehaviorFn,
}

impl Behavior {
    /// Create a behavior from an asynchronous closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<EventInstance>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), BehaviorError>> + Send + 'static,
    {
        Self {
            run: Arc::new(move |ev| f(ev).boxed()),
        }
    }

    /// Create a behavior from a synchronous closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Option<&EventInstance>) -> Result<(), BehaviorError> + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(move |ev| {
                let out = f(ev.as_ref());
                async move { out }.boxed()
            }),
        }
    }

    /// The behavior that does nothing and always succeeds.
    ///
    /// The compiler assigns this to transitions declared without an effect.
    pub fn noop() -> Self {
        Self::from_fn(|_| Ok(()))
    }

    pub(crate) fn run(
        &self,
        event: Option<EventInstance>,
    ) -> BoxFuture<'static, Result<(), BehaviorError>> {
        (self.run)(event)
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Behavior")
    }
}

type ConstraintFn = Arc<
    dyn Fn(Option<EventInstance>) -> BoxFuture<'static, Result<bool, BehaviorError>> + Send + Sync,
>;

/// A predicate evaluated at transition-check time.
///
/// Constraints guard transitions and back change events. A guard receives
/// the event instance being dispatched, or `None` when the transition
/// fires without one (an initial cascade passing through a choice); a
/// change-event predicate always receives `None`. Constraints may be
/// asynchronous; the interpreter awaits them inside the step that checks
/// them.
///
/// # Example
///
/// ```rust
/// use harel::core::Constraint;
///
/// let has_payload = Constraint::from_fn(|ev| ev.is_some_and(|e| e.payload.is_some()));
/// ```
#[derive(Clone)]
pub struct Constraint {
    test: ConstraintFn,
}

impl Constraint {
    /// Create a constraint from an asynchronous closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<EventInstance>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<bool, BehaviorError>> + Send + 'static,
    {
        Self {
            test: Arc::new(move |ev| f(ev).boxed()),
        }
    }

    /// Create a constraint from a synchronous, infallible predicate.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Option<&EventInstance>) -> bool + Send + Sync + 'static,
    {
        Self {
            test: Arc::new(move |ev| {
                let out = Ok(f(ev.as_ref()));
                async move { out }.boxed()
            }),
        }
    }

    pub(crate) fn test(
        &self,
        event: Option<EventInstance>,
    ) -> BoxFuture<'static, Result<bool, BehaviorError>> {
        (self.test)(event)
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Constraint")
    }
}

type OperationFn =
    Arc<dyn Fn(EventInstance) -> BoxFuture<'static, Result<Value, BehaviorError>> + Send + Sync>;

/// The external operation wrapped by a call event.
///
/// Invoking the operation resolves a result value; on resolution the call
/// event becomes active in the machine's event pool.
#[derive(Clone)]
pub struct Operation {
    call: OperationFn,
}

impl Operation {
    /// Create an operation from an asynchronous closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(EventInstance) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, BehaviorError>> + Send + 'static,
    {
        Self {
            call: Arc::new(move |ev| f(ev).boxed()),
        }
    }

    pub(crate) fn call(
        &self,
        event: EventInstance,
    ) -> BoxFuture<'static, Result<Value, BehaviorError>> {
        (self.call)(event)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Operation")
    }
}
