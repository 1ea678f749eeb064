//! In-place bundle life-cycle core
//!
//! Keeps the bundles of workspace projects in step with the projects
//! themselves: activating a project installs, resolves and starts its bundle
//! together with the bundles it depends on, deactivating it tears them down
//! in reverse order. The host workspace is reached only through the traits
//! in [`workspace`].

pub mod error;
pub mod project;
pub mod state;
pub mod workspace;
pub mod closure;
pub mod resolver;
pub mod framework;
pub mod executor;
pub mod service;
pub mod config;
pub mod cli;

// Re-export core types for convenience
pub use error::*;
pub use closure::{Closure, DependencyOptions, Direction, Operation};
pub use executor::{Command, RunResult, RunStatus};
pub use project::{PendingSet, ProjectId};
pub use service::{LifecycleService, RunHandle};
pub use state::{BundleState, Transition};
