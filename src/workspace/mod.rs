//! Collaborators the life-cycle core depends on
//!
//! The core never talks to the host environment directly. It sees the
//! workspace through the narrow traits below, which the hosting application
//! registers once in a [`ServiceRegistry`]:
//! - the dependency graph of the projects
//! - project activation flags
//! - build status and activation policy
//! - status reporting, start/stop execution and the external-uninstall decision

pub mod manifest;
pub mod memory;

pub use manifest::{ProjectSpec, WorkspaceManifest};
pub use memory::{MemoryWorkspace, StatusEntry};

use crate::error::{InPlaceError, InPlaceResult};
use crate::project::ProjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Declared dependency edges between projects
pub trait DependencyGraphProvider: Send + Sync {
    /// Projects that `project` requires capabilities from (its providers)
    fn required_projects(&self, project: &ProjectId) -> Vec<ProjectId>;

    /// Projects that `project` provides capabilities to (its requirers)
    fn providing_projects(&self, project: &ProjectId) -> Vec<ProjectId>;
}

/// Persistent activation flag of each project
pub trait ActivationState: Send + Sync {
    fn is_activated(&self, project: &ProjectId) -> bool;
    fn set_activated(&self, project: &ProjectId, activated: bool);
}

pub trait BuildStatus: Send + Sync {
    fn has_build_errors(&self, project: &ProjectId) -> bool;

    /// Block until a running build finishes, false if `timeout` elapsed first
    fn wait_for_build(&self, _timeout: Duration) -> bool {
        true
    }
}

pub trait ActivationPolicy: Send + Sync {
    fn is_lazy(&self, project: &ProjectId) -> bool;
}

/// Severity of a reported status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

pub trait StatusSink: Send + Sync {
    fn report(&self, project: &ProjectId, severity: Severity, message: &str);
}

/// Runs the start and stop code of a bundle
///
/// Called from a helper thread; the executor waits for the result with the
/// configured timeout.
pub trait BundleActivator: Send + Sync {
    fn start(&self, project: &ProjectId) -> Result<(), String>;
    fn stop(&self, project: &ProjectId) -> Result<(), String>;
}

/// How to reconcile a bundle that was uninstalled outside of the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalChoice {
    /// Reinstall the bundle and bring its requirers back
    Restore,
    /// Deactivate the whole workspace
    Deactivate,
}

pub trait ExternalDecision: Send + Sync {
    fn decide(&self, project: &ProjectId) -> ExternalChoice;
}

/// Forwards statuses to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn report(&self, project: &ProjectId, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(project = %project, "{}", message),
            Severity::Warning => warn!(project = %project, "{}", message),
            Severity::Error => error!(project = %project, "{}", message),
        }
    }
}

struct EagerPolicy;

impl ActivationPolicy for EagerPolicy {
    fn is_lazy(&self, _project: &ProjectId) -> bool {
        false
    }
}

/// Collaborators registered by the hosting application
///
/// The dependency graph and activation state are required; a run without
/// them fails with `MissingService`. The rest fall back to defaults: no build
/// errors, eager activation, immediate start/stop, statuses to `tracing`,
/// and no external decision maker.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    graph: Option<Arc<dyn DependencyGraphProvider>>,
    activation: Option<Arc<dyn ActivationState>>,
    build: Option<Arc<dyn BuildStatus>>,
    policy: Option<Arc<dyn ActivationPolicy>>,
    sink: Option<Arc<dyn StatusSink>>,
    activator: Option<Arc<dyn BundleActivator>>,
    decision: Option<Arc<dyn ExternalDecision>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every collaborator the in-memory workspace implements
    pub fn from_workspace(workspace: Arc<MemoryWorkspace>) -> Self {
        Self::new()
            .with_graph(workspace.clone())
            .with_activation(workspace.clone())
            .with_build(workspace.clone())
            .with_policy(workspace.clone())
            .with_sink(workspace.clone())
            .with_activator(workspace)
    }

    pub fn with_graph(mut self, graph: Arc<dyn DependencyGraphProvider>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_activation(mut self, activation: Arc<dyn ActivationState>) -> Self {
        self.activation = Some(activation);
        self
    }

    pub fn with_build(mut self, build: Arc<dyn BuildStatus>) -> Self {
        self.build = Some(build);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn ActivationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_activator(mut self, activator: Arc<dyn BundleActivator>) -> Self {
        self.activator = Some(activator);
        self
    }

    pub fn with_decision(mut self, decision: Arc<dyn ExternalDecision>) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn graph(&self) -> InPlaceResult<&dyn DependencyGraphProvider> {
        self.graph
            .as_deref()
            .ok_or_else(|| InPlaceError::MissingService("dependency graph provider".to_string()))
    }

    pub fn activation(&self) -> InPlaceResult<&dyn ActivationState> {
        self.activation
            .as_deref()
            .ok_or_else(|| InPlaceError::MissingService("activation state".to_string()))
    }

    pub fn has_build_errors(&self, project: &ProjectId) -> bool {
        self.build.as_ref().map_or(false, |b| b.has_build_errors(project))
    }

    pub fn wait_for_build(&self, timeout: Duration) -> bool {
        self.build.as_ref().map_or(true, |b| b.wait_for_build(timeout))
    }

    pub fn policy(&self) -> &dyn ActivationPolicy {
        match self.policy.as_deref() {
            Some(policy) => policy,
            None => &EagerPolicy,
        }
    }

    pub fn report(&self, project: &ProjectId, severity: Severity, message: &str) {
        match self.sink.as_deref() {
            Some(sink) => sink.report(project, severity, message),
            None => TracingSink.report(project, severity, message),
        }
    }

    pub fn activator(&self) -> Option<Arc<dyn BundleActivator>> {
        self.activator.clone()
    }

    pub fn decision(&self) -> Option<&dyn ExternalDecision> {
        self.decision.as_deref()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("graph", &self.graph.is_some())
            .field("activation", &self.activation.is_some())
            .field("build", &self.build.is_some())
            .field("policy", &self.policy.is_some())
            .field("sink", &self.sink.is_some())
            .field("activator", &self.activator.is_some())
            .field("decision", &self.decision.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_graph_is_reported() {
        let services = ServiceRegistry::new();
        match services.graph() {
            Err(InPlaceError::MissingService(name)) => assert!(name.contains("graph")),
            other => panic!("Expected missing service, got {:?}", other.map(|_| ())),
        }
        assert!(services.activation().is_err());
    }

    #[test]
    fn test_defaults_for_optional_services() {
        let services = ServiceRegistry::new();
        let project = ProjectId::from("a");
        assert!(!services.has_build_errors(&project));
        assert!(!services.policy().is_lazy(&project));
        assert!(services.activator().is_none());
        assert!(services.decision().is_none());
    }
}
