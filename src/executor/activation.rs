//! Install, resolve and start

use super::BundleExecutor;
use crate::config::TimeoutPolicy;
use crate::framework::ResolveRequest;
use crate::project::ProjectId;
use crate::resolver::ResolutionFilter;
use crate::state::{BundleState, Transition, TransitionErrorKind};
use crate::workspace::{ActivationState, DependencyGraphProvider, Severity};
use indexmap::IndexMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ActivatorCall {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ActivatorFailure {
    Failed(String),
    TimedOut,
}

/// True once `state` is at least as far along as `target`
fn reached(state: BundleState, target: BundleState) -> bool {
    if target.is_running() {
        state.is_running()
    } else if target.is_resolved() {
        state.is_resolved()
    } else {
        state.is_installed()
    }
}

impl BundleExecutor<'_> {
    /// Bring every project of a block to its target state
    ///
    /// Without `targets` every project is activated and started. With them
    /// each project is brought back to its listed state and activation flags
    /// are left alone. A cycle block is installed and resolved as a whole
    /// before any member starts.
    pub(super) fn activate_block(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
        block: &[ProjectId],
        targets: Option<&IndexMap<ProjectId, BundleState>>,
    ) {
        let mut installed = Vec::new();
        for project in block {
            let target = targets
                .and_then(|t| t.get(project).copied())
                .unwrap_or(BundleState::Active);
            if !target.is_installed() {
                self.done(project);
                continue;
            }
            if self.blocked_by_build_errors(project) {
                continue;
            }
            if targets.is_none() {
                activation.set_activated(project, true);
                let node = self.node(project);
                node.set_activated(true);
                node.remove_pending_transition(Transition::ActivateProject);
            }
            if self.install(project) {
                installed.push((project.clone(), target));
            } else {
                self.done(project);
            }
        }

        let to_resolve: Vec<ProjectId> = installed
            .iter()
            .filter(|(p, target)| {
                target.is_resolved() && !self.core.registry.state(p).is_resolved()
            })
            .map(|(p, _)| p.clone())
            .collect();
        if !to_resolve.is_empty() {
            self.resolve(graph, activation, &to_resolve);
        }

        for (project, target) in installed {
            if target.is_running() && self.core.registry.state(&project) == BundleState::Resolved {
                self.start(&project);
            }
            if reached(self.core.registry.state(&project), target) {
                self.succeed(&project);
            } else {
                self.done(&project);
            }
            if self.cancelled {
                break;
            }
        }
    }

    /// Install the bundle of `project` unless it is already installed
    pub(super) fn install(&mut self, project: &ProjectId) -> bool {
        if self.core.registry.state(project).is_installed() {
            return true;
        }
        self.core.framework.install(project);
        if self.apply(project, Transition::Install).is_err() {
            self.core.framework.uninstall(project);
            return false;
        }
        true
    }

    /// Record a build failure unless activation despite errors is allowed
    pub(super) fn blocked_by_build_errors(&mut self, project: &ProjectId) -> bool {
        if !self.services.has_build_errors(project) {
            return false;
        }
        if self.settings.activate_on_compile_error {
            let message = format!("{} has build errors, activating anyway", project);
            self.note(project, Severity::Warning, &message);
            return false;
        }
        let message = format!("{} has build errors and was not activated", project);
        self.fail(project, Transition::Build, TransitionErrorKind::BuildErrors, &message);
        self.done(project);
        true
    }

    /// Resolve every installed bundle, reporting on `requested`
    pub(super) fn resolve(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
        requested: &[ProjectId],
    ) {
        if !self.services.wait_for_build(self.settings.build_wait()) {
            warn!(projects = requested.len(), "build still running, resolving anyway");
        }

        let core = &mut *self.core;
        let request = ResolveRequest {
            unresolved: core
                .registry
                .in_state(BundleState::Installed)
                .into_iter()
                .filter(|p| core.framework.is_installed(p))
                .collect(),
            resolved: core
                .registry
                .iter()
                .filter(|node| node.state().is_resolved())
                .map(|node| node.id().clone())
                .collect(),
        };

        let (outcome, deferred) = {
            let mut filter = ResolutionFilter::new(&mut core.registry, activation, graph)
                .with_duplicates(core.framework.duplicate_groups());
            let outcome = core.framework.resolve(&request, graph, &mut filter);
            (outcome, filter.deferred().clone())
        };
        debug!(
            resolved = outcome.resolved.len(),
            unresolved = outcome.unresolved.len(),
            "resolve attempt finished"
        );

        for project in &outcome.resolved {
            let _ = self.apply(project, Transition::Resolve);
        }

        for project in requested {
            if outcome.is_resolved(project) {
                continue;
            }
            if deferred.contains(project) {
                let message =
                    format!("{} waits for deactivated providers to be activated", project);
                self.note(project, Severity::Warning, &message);
            } else {
                let message = format!("{} could not be resolved", project);
                self.fail(
                    project,
                    Transition::Resolve,
                    TransitionErrorKind::Unresolved,
                    &message,
                );
            }
        }
    }

    /// Start a resolved or lazily started bundle, running its start code
    pub(super) fn start(&mut self, project: &ProjectId) {
        match self.apply(project, Transition::Start) {
            Ok(BundleState::Active) => {}
            // Lazy bundles run their start code on first class load
            _ => return,
        }

        match self.call_activator(project, ActivatorCall::Start) {
            Ok(()) => {}
            Err(ActivatorFailure::Failed(reason)) => {
                let _ = self.apply(project, Transition::Stop);
                let message = format!("{} failed to start: {}", project, reason);
                self.fail(
                    project,
                    Transition::Start,
                    TransitionErrorKind::ActivatorFailed,
                    &message,
                );
            }
            Err(ActivatorFailure::TimedOut) => self.timed_out(project, Transition::Start),
        }
    }

    /// Start requested explicitly, for a single project
    pub(super) fn start_requested(&mut self, project: &ProjectId) {
        if self.core.registry.state(project) == BundleState::Active {
            self.note(project, Severity::Info, &format!("{} is already active", project));
            self.done(project);
            return;
        }
        if self.blocked_by_build_errors(project) {
            return;
        }
        self.start(project);
        if self.core.registry.state(project).is_running() {
            self.succeed(project);
        } else {
            self.done(project);
        }
    }

    /// Run start or stop code on a helper thread, bounded by the timeout
    pub(super) fn call_activator(
        &self,
        project: &ProjectId,
        call: ActivatorCall,
    ) -> Result<(), ActivatorFailure> {
        let Some(activator) = self.services.activator() else {
            return Ok(());
        };

        let (sender, receiver) = mpsc::channel();
        let target = project.clone();
        let spawned = thread::Builder::new()
            .name(format!("activator-{}", project))
            .spawn(move || {
                let outcome = match call {
                    ActivatorCall::Start => activator.start(&target),
                    ActivatorCall::Stop => activator.stop(&target),
                };
                let _ = sender.send(outcome);
            });
        if let Err(e) = spawned {
            let reason = format!("cannot spawn activator thread: {}", e);
            return Err(ActivatorFailure::Failed(reason));
        }

        match receiver.recv_timeout(self.settings.timeout()) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ActivatorFailure::Failed(reason)),
            Err(RecvTimeoutError::Timeout) => Err(ActivatorFailure::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(ActivatorFailure::Failed(
                "activator ended without reporting".to_string(),
            )),
        }
    }

    /// Apply the timeout policy to a start or stop that did not finish
    pub(super) fn timed_out(&mut self, project: &ProjectId, transition: Transition) {
        let message = format!(
            "{} of {} did not finish within {} ms",
            transition, project, self.settings.timeout_ms
        );
        self.fail(project, transition, TransitionErrorKind::Timeout, &message);

        match self.settings.timeout_policy {
            TimeoutPolicy::Cancel => self.cancelled = true,
            TimeoutPolicy::Deactivate => self.force_deactivate(project),
            TimeoutPolicy::Terminate => {
                let message = format!("{} needs to be terminated manually", project);
                self.note(project, Severity::Warning, &message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reached_targets() {
        assert!(reached(BundleState::Starting, BundleState::Active));
        assert!(reached(BundleState::Active, BundleState::Resolved));
        assert!(!reached(BundleState::Installed, BundleState::Resolved));
        assert!(reached(BundleState::Resolved, BundleState::Installed));
        assert!(!reached(BundleState::Uninstalled, BundleState::Installed));
    }
}
