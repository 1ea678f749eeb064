//! Error types for the InPlace life-cycle core
//!
//! Defines the errors raised by the bundle state machine, the dependency
//! options table, the executors and the configuration layer.

use crate::closure::{Closure, Operation};
use crate::project::ProjectId;
use crate::state::{BundleState, Transition};
use std::fmt;
use thiserror::Error;

/// Top-level error type for all InPlace operations
#[derive(Debug, Clone, Error)]
pub enum InPlaceError {
    #[error("Illegal state transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("Invalid closure: {0}")]
    Closure(#[from] ClosureError),

    #[error("Build errors in project {0}")]
    Build(ProjectId),

    #[error("Required service is unavailable: {0}")]
    MissingService(String),

    #[error("Corrupted dependency graph: {0}")]
    CorruptGraph(String),

    #[error("Bundle of project {0} was uninstalled outside of the workspace")]
    ExternalUninstall(ProjectId),

    #[error("Unknown project: {0}")]
    UnknownProject(ProjectId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workspace manifest error: {0}")]
    Manifest(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// A transition that is not legal from the node's current state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct TransitionError {
    pub project: ProjectId,
    pub state: BundleState,
    pub transition: Transition,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: cannot {} from state {}",
            self.project, self.transition, self.state
        )
    }
}

/// A closure that is not in the allowed set of an operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ClosureError {
    pub operation: Operation,
    pub closure: Closure,
}

impl fmt::Display for ClosureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "closure '{}' is not allowed for operation '{}'",
            self.closure, self.operation
        )
    }
}

/// Result type alias for InPlace operations
pub type InPlaceResult<T> = Result<T, InPlaceError>;

impl InPlaceError {
    /// Errors that abort the remaining part of a run
    pub fn is_fatal(&self) -> bool {
        matches!(self, InPlaceError::MissingService(_))
    }
}

impl From<std::io::Error> for InPlaceError {
    fn from(e: std::io::Error) -> Self {
        InPlaceError::Io(e.to_string())
    }
}
