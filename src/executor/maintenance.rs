//! Update, refresh, reset and reconciliation of external uninstalls

use super::BundleExecutor;
use crate::closure::{Direction, ProjectSorter};
use crate::config::ExternalPolicy;
use crate::project::ProjectId;
use crate::state::{BundleState, Transition, TransitionErrorKind};
use crate::workspace::{ActivationState, DependencyGraphProvider, ExternalChoice, Severity};
use indexmap::{IndexMap, IndexSet};
use tracing::info;

impl BundleExecutor<'_> {
    /// Replace the bundle of `project` with a new revision
    ///
    /// The old revision stays around until the new one resolves, then it is
    /// refreshed away. A running bundle is stopped first and restarted.
    pub(super) fn update(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
        project: &ProjectId,
    ) {
        let state = self.core.registry.state(project);
        if !state.is_installed() {
            let _ = self.apply(project, Transition::Update);
            self.done(project);
            return;
        }
        if self.blocked_by_build_errors(project) {
            return;
        }

        let was_running = state.is_running();
        if was_running && !self.stop(project) {
            self.done(project);
            return;
        }
        if self.core.registry.state(project) == BundleState::Resolved
            && self.apply(project, Transition::Update).is_err()
        {
            self.done(project);
            return;
        }

        self.core.framework.update(project);
        self.resolve(graph, activation, std::slice::from_ref(project));
        if self.core.registry.state(project).is_resolved() {
            let dropped = self.core.framework.refresh(project);
            info!(
                project = %project,
                stale = dropped,
                "update resolved, stale revisions refreshed"
            );
        }

        if was_running && self.core.registry.state(project) == BundleState::Resolved {
            self.start(project);
        }

        let state = self.core.registry.state(project);
        if (was_running && state.is_running()) || (!was_running && state.is_resolved()) {
            self.succeed(project);
        } else {
            self.done(project);
        }
    }

    /// Re-resolve a block, restarting the projects that were running
    pub(super) fn refresh_block(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
        block: &[ProjectId],
    ) {
        let mut refreshed = Vec::new();
        let mut restart = IndexSet::new();

        for project in block {
            let state = self.core.registry.state(project);
            if !state.is_installed() {
                self.note(project, Severity::Info, &format!("{} is not installed", project));
                self.done(project);
                continue;
            }
            if state == BundleState::Active {
                if !self.stop(project) {
                    self.done(project);
                    continue;
                }
                restart.insert(project.clone());
            } else if state == BundleState::Starting {
                restart.insert(project.clone());
            }

            let state = self.core.registry.state(project);
            if matches!(state, BundleState::Resolved | BundleState::Starting)
                && self.apply(project, Transition::Refresh).is_err()
            {
                self.done(project);
                continue;
            }
            self.core.framework.refresh(project);
            refreshed.push(project.clone());
        }

        let to_resolve: Vec<ProjectId> = refreshed
            .iter()
            .filter(|p| self.core.registry.state(p) == BundleState::Installed)
            .cloned()
            .collect();
        if !to_resolve.is_empty() {
            self.resolve(graph, activation, &to_resolve);
        }

        for project in refreshed {
            let restarting = restart.contains(&project);
            if restarting && self.core.registry.state(&project) == BundleState::Resolved {
                self.start(&project);
            }
            let state = self.core.registry.state(&project);
            if (restarting && state.is_running()) || (!restarting && state.is_resolved()) {
                self.succeed(&project);
            } else {
                self.done(&project);
            }
            if self.cancelled {
                break;
            }
        }
    }

    /// Uninstall and reinstall the seed, its providers and their requirers,
    /// bringing each back to the state it had before
    pub(super) fn reset(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
        seed: &IndexSet<ProjectId>,
    ) {
        if seed.is_empty() {
            return;
        }

        let sorter = ProjectSorter::new(graph);
        let set = sorter.providing_then_requiring(seed);
        let snapshot: IndexMap<ProjectId, BundleState> = set
            .iter()
            .map(|p| (p.clone(), self.core.registry.state(p)))
            .collect();
        for project in &set {
            self.node(project).add_pending_transition(Transition::Reset);
        }
        info!(seed = seed.len(), projects = set.len(), "resetting projects");

        for block in sorter.sort(&set, Direction::Deactivation).blocks() {
            if self.check_cancelled() {
                return;
            }
            for project in block {
                let running = self.core.registry.state(project).is_running();
                if running && !self.stop(project) && self.cancelled {
                    return;
                }
            }
            for project in block {
                self.uninstall(project);
            }
        }

        for block in sorter.sort(&set, Direction::Activation).blocks() {
            if self.check_cancelled() {
                break;
            }
            self.activate_block(graph, activation, block, Some(&snapshot));
            if self.cancelled {
                break;
            }
        }
    }

    /// Bring the workspace back in line after bundles were uninstalled
    /// behind its back
    pub(super) fn reconcile(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
        seed: &IndexSet<ProjectId>,
    ) {
        for project in seed {
            let previous = self.core.registry.state(project);
            if !previous.is_installed() {
                self.note(project, Severity::Info, &format!("{} has no installed bundle", project));
                continue;
            }

            // The bundle is gone, so no start or stop code runs
            self.node(project).add_pending_transition(Transition::External);
            if previous.is_running() {
                let _ = self.apply(project, Transition::Stop);
            }
            self.uninstall(project);
            let message = format!("{} was uninstalled outside of the workspace", project);
            self.fail(
                project,
                Transition::External,
                TransitionErrorKind::ExternalUninstall,
                &message,
            );

            let services = self.services;
            let choice = match self.settings.external_policy {
                ExternalPolicy::Restore => ExternalChoice::Restore,
                ExternalPolicy::Deactivate => ExternalChoice::Deactivate,
                ExternalPolicy::Ask => services
                    .decision()
                    .map_or(ExternalChoice::Deactivate, |decision| decision.decide(project)),
            };
            info!(project = %project, ?choice, "reconciling external uninstall");

            match choice {
                ExternalChoice::Restore => self.restore(graph, activation, project, previous),
                ExternalChoice::Deactivate => self.deactivate_workspace(graph, activation),
            }
            self.done(project);
        }
    }

    /// Reinstall `project` to `previous` and refresh its requirers
    fn restore(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
        project: &ProjectId,
        previous: BundleState,
    ) {
        let mut targets = IndexMap::new();
        targets.insert(project.clone(), previous);
        self.activate_block(graph, activation, std::slice::from_ref(project), Some(&targets));

        let sorter = ProjectSorter::new(graph);
        let seed: IndexSet<ProjectId> = std::iter::once(project.clone()).collect();
        let requirers: IndexSet<ProjectId> = sorter
            .requiring(&seed)
            .into_iter()
            .filter(|p| p != project && self.core.registry.state(p).is_installed())
            .collect();
        for block in sorter.sort(&requirers, Direction::Activation).blocks() {
            self.refresh_block(graph, activation, block);
        }
    }

    /// Deactivate every project that is activated or has a bundle installed
    fn deactivate_workspace(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
    ) {
        let targets: IndexSet<ProjectId> = self
            .core
            .registry
            .iter()
            .filter(|node| node.state().is_installed() || activation.is_activated(node.id()))
            .map(|node| node.id().clone())
            .collect();

        for block in ProjectSorter::new(graph).sort(&targets, Direction::Deactivation).blocks() {
            self.deactivate_block(activation, block, true);
        }
    }
}
