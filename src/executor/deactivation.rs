//! Stop and uninstall

use super::activation::{ActivatorCall, ActivatorFailure};
use super::BundleExecutor;
use crate::config::TimeoutPolicy;
use crate::project::ProjectId;
use crate::state::{BundleState, Transition};
use crate::workspace::{ActivationState, Severity};
use tracing::debug;

impl BundleExecutor<'_> {
    /// Stop and uninstall every project of a block
    ///
    /// All members of a cycle block are stopped before any is uninstalled.
    /// `clear_flag` also deactivates the projects themselves.
    pub(super) fn deactivate_block(
        &mut self,
        activation: &dyn ActivationState,
        block: &[ProjectId],
        clear_flag: bool,
    ) {
        for project in block {
            // An explicit deactivation overrides a pending activation request
            self.node(project).remove_pending_transition(Transition::ActivateProject);
            let running = self.core.registry.state(project).is_running();
            if running && !self.stop(project) && self.cancelled {
                return;
            }
        }

        for project in block {
            if !self.uninstall(project) {
                self.done(project);
                continue;
            }
            if clear_flag {
                activation.set_activated(project, false);
                self.node(project).set_activated(false);
            }
            self.succeed(project);
        }
    }

    /// Stop a running bundle, false if it is still running afterwards
    pub(super) fn stop(&mut self, project: &ProjectId) -> bool {
        let state = self.core.registry.state(project);
        if !state.is_running() {
            return true;
        }

        // A lazily started bundle never ran its start code
        if state == BundleState::Active {
            match self.call_activator(project, ActivatorCall::Stop) {
                Ok(()) => {}
                Err(ActivatorFailure::Failed(reason)) => {
                    let message = format!("stop code of {} failed: {}", project, reason);
                    self.note(project, Severity::Warning, &message);
                }
                Err(ActivatorFailure::TimedOut) => {
                    self.timed_out(project, Transition::Stop);
                    match self.settings.timeout_policy {
                        TimeoutPolicy::Cancel => return false,
                        TimeoutPolicy::Deactivate => {
                            return !self.core.registry.state(project).is_running();
                        }
                        TimeoutPolicy::Terminate => {}
                    }
                }
            }
        }

        self.apply(project, Transition::Stop).is_ok()
    }

    /// Stop requested explicitly, for a single project
    pub(super) fn stop_requested(&mut self, project: &ProjectId) {
        if !self.core.registry.state(project).is_running() {
            self.note(project, Severity::Info, &format!("{} is not running", project));
            self.done(project);
            return;
        }
        if self.stop(project) {
            self.succeed(project);
        } else {
            self.done(project);
        }
    }

    /// Uninstall a bundle
    ///
    /// The pending `Uninstall` lets the `Unresolve` event finish the job: a
    /// resolved bundle is first taken back to `Installed`, an unresolved one
    /// goes straight to the completing event. Returns false if the bundle is
    /// still installed afterwards.
    pub(super) fn uninstall(&mut self, project: &ProjectId) -> bool {
        let state = self.core.registry.state(project);
        if !state.is_installed() {
            return true;
        }

        self.node(project).add_pending_transition(Transition::Uninstall);
        let uninstalled = match state {
            BundleState::Resolved => {
                self.apply(project, Transition::Uninstall).is_ok()
                    && self.apply(project, Transition::Unresolve).is_ok()
            }
            BundleState::Installed => self.apply(project, Transition::Unresolve).is_ok(),
            _ => self.apply(project, Transition::Uninstall).is_ok(),
        };

        if !uninstalled {
            self.node(project).remove_pending_transition(Transition::Uninstall);
            return false;
        }
        self.core.framework.uninstall(project);
        true
    }

    /// Stop, uninstall and deactivate without running any bundle code
    pub(super) fn force_deactivate(&mut self, project: &ProjectId) {
        debug!(project = %project, "forcing deactivation");
        if self.core.registry.state(project).is_running() {
            let _ = self.apply(project, Transition::Stop);
        }
        self.uninstall(project);

        let services = self.services;
        if let Ok(activation) = services.activation() {
            activation.set_activated(project, false);
        }
        self.node(project).set_activated(false);
        self.note(project, Severity::Warning, &format!("{} was deactivated", project));
    }
}
