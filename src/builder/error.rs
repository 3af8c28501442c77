//! Build errors for the chart authoring API.

use thiserror::Error;

use crate::compiler::StructuralError;

/// Errors that can occur while assembling a declared chart.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("duplicate node name '{0}'")]
    DuplicateName(String),

    #[error("transition source '{0}' is not declared")]
    UnknownSource(String),

    #[error("transition target '{0}' is not declared")]
    UnknownTarget(String),

    #[error("event '{0}' is not declared")]
    UnknownEvent(String),

    #[error("a transition from '{0}' was never finished; call .to() or .internal()")]
    UnfinishedTransition(String),

    #[error("'{0}' mixes loose child vertices with declared regions")]
    MixedChildren(String),

    #[error(transparent)]
    Structural(#[from] StructuralError),
}
