//! Bundle executors
//!
//! A [`BundleExecutor`] carries out one [`Command`] over a pending set of
//! projects:
//! - drop projects already in the requested condition
//! - expand the rest with the operation's dependency closure and order it
//! - drive every bundle node through its transitions, block by block
//! - collect per-project statuses into a [`RunResult`]
//!
//! A failure on one project is recorded on its node and in the result, and
//! the run moves on to the next project. Only a missing collaborator or an
//! inconsistent dependency graph aborts the run.

mod activation;
mod deactivation;
mod maintenance;

use crate::closure::{
    Closure, DependencyOptions, Direction, Operation, ProjectSorter, SortedProjects,
};
use crate::config::LifecycleSettings;
use crate::error::InPlaceError;
use crate::framework::BundleFramework;
use crate::project::{PendingSet, ProjectId};
use crate::state::{BundleNode, BundleRegistry, BundleState, Transition, TransitionErrorKind};
use crate::workspace::{ActivationState, DependencyGraphProvider, ServiceRegistry, Severity};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Work an executor can be asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ActivateProject,
    ActivateBundle,
    DeactivateProject,
    DeactivateBundle,
    Install,
    Start,
    Stop,
    Update,
    Refresh,
    Reset,
    /// Reconcile a bundle uninstalled outside of the workspace
    ExternalUninstall,
}

impl Command {
    pub const ALL: [Command; 11] = [
        Command::ActivateProject,
        Command::ActivateBundle,
        Command::DeactivateProject,
        Command::DeactivateBundle,
        Command::Install,
        Command::Start,
        Command::Stop,
        Command::Update,
        Command::Refresh,
        Command::Reset,
        Command::ExternalUninstall,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::ActivateProject => "activate",
            Command::ActivateBundle => "activate-bundle",
            Command::DeactivateProject => "deactivate",
            Command::DeactivateBundle => "deactivate-bundle",
            Command::Install => "install",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Update => "update",
            Command::Refresh => "refresh",
            Command::Reset => "reset",
            Command::ExternalUninstall => "external-uninstall",
        }
    }

    /// Operation whose closure setting applies to this command
    pub fn operation(self) -> Option<Operation> {
        match self {
            Command::ActivateProject => Some(Operation::ActivateProject),
            Command::ActivateBundle => Some(Operation::ActivateBundle),
            Command::DeactivateProject => Some(Operation::DeactivateProject),
            Command::DeactivateBundle => Some(Operation::DeactivateBundle),
            _ => None,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Command::DeactivateProject
            | Command::DeactivateBundle
            | Command::Stop
            | Command::ExternalUninstall => Direction::Deactivation,
            _ => Direction::Activation,
        }
    }

    /// Pending transition marking projects this command has not processed yet
    pub fn marker(self) -> Transition {
        match self {
            Command::ActivateProject | Command::ActivateBundle => Transition::ActivateProject,
            Command::DeactivateProject | Command::DeactivateBundle => Transition::Deactivate,
            Command::Install => Transition::Install,
            Command::Start => Transition::Start,
            Command::Stop => Transition::Stop,
            Command::Update => Transition::Update,
            Command::Refresh => Transition::Refresh,
            Command::Reset => Transition::Reset,
            Command::ExternalUninstall => Transition::External,
        }
    }

    fn is_activation(self) -> bool {
        matches!(self, Command::ActivateProject | Command::ActivateBundle)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = InPlaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Command::ALL
            .into_iter()
            .find(|c| c.name() == normalized)
            .ok_or_else(|| InPlaceError::Config(format!("unknown command '{}'", s)))
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// All projects were processed, some may have failed
    Completed,
    /// Stopped early; unprocessed projects are listed as pending
    Cancelled,
    /// Aborted before or during processing
    Fatal(String),
}

/// Outcome reported for one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectStatus {
    pub project: ProjectId,
    pub severity: Severity,
    pub message: String,
    pub error: Option<TransitionErrorKind>,
}

/// A state change applied during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub project: ProjectId,
    pub transition: Transition,
    pub state: BundleState,
}

/// Aggregated result of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub id: u64,
    pub command: Command,
    pub status: RunStatus,
    /// Projects that reached the command's target state
    pub success: Vec<ProjectId>,
    /// Informational and warning statuses
    pub warnings: Vec<ProjectStatus>,
    pub errors: Vec<ProjectStatus>,
    /// Projects left unprocessed
    pub pending: Vec<ProjectId>,
    /// Every applied transition, in order
    pub transitions: Vec<TransitionRecord>,
}

impl RunResult {
    pub fn new(id: u64, command: Command) -> Self {
        RunResult {
            id,
            command,
            status: RunStatus::Completed,
            success: vec![],
            warnings: vec![],
            errors: vec![],
            pending: vec![],
            transitions: vec![],
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || matches!(self.status, RunStatus::Fatal(_))
    }

    /// Transitions applied to `project`, in order
    pub fn transitions_of(&self, project: &ProjectId) -> Vec<Transition> {
        self.transitions
            .iter()
            .filter(|r| &r.project == project)
            .map(|r| r.transition)
            .collect()
    }

    /// Index in the transition log of the first `transition` on `project`
    pub fn first_index_of(&self, project: &ProjectId, transition: Transition) -> Option<usize> {
        self.transitions
            .iter()
            .position(|r| &r.project == project && r.transition == transition)
    }

    pub fn error_for(&self, project: &ProjectId) -> Option<&ProjectStatus> {
        self.errors.iter().find(|s| &s.project == project)
    }
}

/// Mutable life-cycle state shared by every run
#[derive(Debug, Default)]
pub struct LifecycleCore {
    pub registry: BundleRegistry,
    pub framework: BundleFramework,
    pub options: DependencyOptions,
}

impl LifecycleCore {
    pub fn new(options: DependencyOptions) -> Self {
        LifecycleCore {
            registry: BundleRegistry::new(),
            framework: BundleFramework::new(),
            options,
        }
    }
}

/// Runs one command over a pending set of projects
pub struct BundleExecutor<'a> {
    core: &'a mut LifecycleCore,
    services: &'a ServiceRegistry,
    settings: &'a LifecycleSettings,
    command: Command,
    pending: PendingSet,
    enclosing: Option<Operation>,
    cancel: Option<Arc<AtomicBool>>,
    cancelled: bool,
    result: RunResult,
}

impl<'a> BundleExecutor<'a> {
    pub fn new(
        core: &'a mut LifecycleCore,
        services: &'a ServiceRegistry,
        settings: &'a LifecycleSettings,
        command: Command,
    ) -> Self {
        Self {
            core,
            services,
            settings,
            command,
            pending: PendingSet::new(),
            enclosing: None,
            cancel: None,
            cancelled: false,
            result: RunResult::new(0, command),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.result.id = id;
        self
    }

    /// Share a flag that cancels the run between blocks once set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run as part of an enclosing project operation
    pub fn within(mut self, enclosing: Operation) -> Self {
        self.enclosing = Some(enclosing);
        self
    }

    pub fn add(&mut self, project: ProjectId) -> bool {
        self.pending.insert(project)
    }

    pub fn add_all<I: IntoIterator<Item = ProjectId>>(&mut self, projects: I) {
        self.pending.extend(projects);
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    pub fn run(mut self) -> RunResult {
        info!(command = %self.command, projects = self.pending.len(), "run started");

        let services = self.services;
        let services_ready = services
            .graph()
            .and_then(|graph| Ok((graph, services.activation()?)));
        let (graph, activation) = match services_ready {
            Ok(ready) => ready,
            Err(e) => return self.abort(e),
        };

        let mut checked: IndexSet<ProjectId> = self.pending.iter().cloned().collect();
        if self.command.is_activation() {
            checked.extend(self.core.registry.with_pending(Transition::ActivateProject));
        }
        if let Err(e) = ProjectSorter::new(graph).check_consistency(&checked) {
            return self.abort(e);
        }

        let seed: IndexSet<ProjectId> = std::mem::take(&mut self.pending).into_iter().collect();
        match self.command {
            Command::Reset => self.reset(graph, activation, &seed),
            Command::ExternalUninstall => self.reconcile(graph, activation, &seed),
            _ => self.execute(graph, activation, seed),
        }

        if self.cancelled {
            self.result.status = RunStatus::Cancelled;
        }

        let marker = self.command.marker();
        self.result.pending = self.core.registry.with_pending(marker);

        info!(
            command = %self.command,
            status = ?self.result.status,
            success = self.result.success.len(),
            warnings = self.result.warnings.len(),
            errors = self.result.errors.len(),
            "run finished"
        );
        self.result
    }

    /// End the run before any project is touched, leaving the seed pending
    fn abort(mut self, error: InPlaceError) -> RunResult {
        warn!(command = %self.command, error = %error, "run aborted");
        self.result.pending = self.pending.clone().into_vec();
        self.result.status = RunStatus::Fatal(error.to_string());
        self.result
    }

    /// Generic path shared by every command except reset and reconciliation
    fn execute(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
        seed: IndexSet<ProjectId>,
    ) {
        let mut working = IndexSet::new();
        for project in seed {
            match self.already_done(activation, &project) {
                Some(message) => {
                    self.withdraw_activation(&project);
                    self.note(&project, Severity::Info, &message);
                }
                None => {
                    working.insert(project);
                }
            }
        }

        if self.command.is_activation() {
            for project in self.core.registry.with_pending(Transition::ActivateProject) {
                if working.insert(project.clone()) {
                    debug!(project = %project, "activation requested by resolution filter");
                }
            }
        }

        if working.is_empty() {
            return;
        }

        let sorted = self.plan(graph, &working);
        for project in sorted.iter() {
            self.withdraw_activation(project);
        }
        // Projects pulled in by the closure that need nothing are skipped quietly
        let sorted = self.skip_satisfied(activation, sorted, &working);
        self.mark_pending(&sorted, activation);

        for block in sorted.blocks() {
            if self.check_cancelled() {
                break;
            }
            self.process_block(graph, activation, block);
            if self.cancelled {
                break;
            }
        }
    }

    /// Drop the activation request the resolution filter left on `project`
    /// once it is explicitly deactivated
    fn withdraw_activation(&mut self, project: &ProjectId) {
        if !matches!(self.command, Command::DeactivateProject | Command::DeactivateBundle) {
            return;
        }
        if let Some(node) = self.core.registry.get_mut(project) {
            if node.remove_pending_transition(Transition::ActivateProject) {
                debug!(project = %project, "activation request withdrawn");
            }
        }
    }

    fn plan(
        &self,
        graph: &dyn DependencyGraphProvider,
        working: &IndexSet<ProjectId>,
    ) -> SortedProjects {
        let closure = match (self.command, self.command.operation()) {
            (_, Some(op)) => self.core.options.effective(op, self.enclosing),
            (Command::Refresh, None) => Closure::Requiring,
            _ => Closure::Single,
        };
        ProjectSorter::new(graph).plan(working, closure, self.command.direction())
    }

    fn process_block(
        &mut self,
        graph: &dyn DependencyGraphProvider,
        activation: &dyn ActivationState,
        block: &[ProjectId],
    ) {
        match self.command {
            Command::ActivateProject | Command::ActivateBundle => {
                self.activate_block(graph, activation, block, None)
            }
            Command::DeactivateProject => self.deactivate_block(activation, block, true),
            Command::DeactivateBundle => self.deactivate_block(activation, block, false),
            Command::Install => {
                for project in block {
                    if self.install(project) {
                        self.succeed(project);
                    } else {
                        self.done(project);
                    }
                }
            }
            Command::Start => {
                for project in block {
                    self.start_requested(project);
                }
            }
            Command::Stop => {
                for project in block {
                    self.stop_requested(project);
                }
            }
            Command::Update => {
                for project in block {
                    self.update(graph, activation, project);
                }
            }
            Command::Refresh => self.refresh_block(graph, activation, block),
            Command::Reset | Command::ExternalUninstall => {}
        }
    }

    /// Message explaining why `project` needs no work, if it does not
    fn already_done(
        &self,
        activation: &dyn ActivationState,
        project: &ProjectId,
    ) -> Option<String> {
        let state = self.core.registry.state(project);
        let activated = activation.is_activated(project);
        match self.command {
            Command::ActivateProject if activated && state.is_running() => {
                Some(format!("{} is already activated", project))
            }
            Command::ActivateBundle if state.is_running() => {
                Some(format!("{} is already {}", project, state))
            }
            Command::DeactivateProject if !activated && !state.is_installed() => {
                Some(format!("{} is already deactivated", project))
            }
            Command::DeactivateBundle if !state.is_installed() => {
                Some(format!("{} has no installed bundle", project))
            }
            Command::Install if state.is_installed() => {
                Some(format!("{} is already installed", project))
            }
            _ => None,
        }
    }

    fn skip_satisfied(
        &self,
        activation: &dyn ActivationState,
        sorted: SortedProjects,
        requested: &IndexSet<ProjectId>,
    ) -> SortedProjects {
        let kept: IndexSet<ProjectId> = sorted
            .iter()
            .filter(|p| requested.contains(*p) || self.already_done(activation, p).is_none())
            .cloned()
            .collect();
        if kept.len() == sorted.len() {
            sorted
        } else {
            sorted.retain(&kept)
        }
    }

    fn mark_pending(&mut self, sorted: &SortedProjects, activation: &dyn ActivationState) {
        let marker = self.command.marker();
        for project in sorted.iter() {
            self.core
                .registry
                .ensure(project, activation.is_activated(project))
                .add_pending_transition(marker);
        }
    }

    /// Clear the command's pending marker once a project is processed
    fn done(&mut self, project: &ProjectId) {
        let marker = self.command.marker();
        if let Some(node) = self.core.registry.get_mut(project) {
            node.remove_pending_transition(marker);
        }
    }

    fn check_cancelled(&mut self) -> bool {
        if !self.cancelled {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::SeqCst) {
                    info!(command = %self.command, "run cancelled");
                    self.cancelled = true;
                }
            }
        }
        self.cancelled
    }

    /// Node of `project`, created with its current activation flag if untracked
    fn node(&mut self, project: &ProjectId) -> &mut BundleNode {
        let services = self.services;
        let activated = services.activation().map_or(false, |a| a.is_activated(project));
        self.core.registry.ensure(project, activated)
    }

    /// Apply one transition to a node, logging it in the result
    fn apply(&mut self, project: &ProjectId, transition: Transition) -> Result<BundleState, ()> {
        let services = self.services;
        let node = self.node(project);

        node.set_current_transition(Some(transition));
        let outcome = node.transition(transition, services.policy());
        node.set_current_transition(None);

        match outcome {
            Ok(state) => {
                self.result.transitions.push(TransitionRecord {
                    project: project.clone(),
                    transition,
                    state,
                });
                Ok(state)
            }
            Err(e) => {
                self.record_error(project, TransitionErrorKind::IllegalTransition, &e.to_string());
                Err(())
            }
        }
    }

    /// Record a failure on the node and in the result
    fn fail(
        &mut self,
        project: &ProjectId,
        transition: Transition,
        kind: TransitionErrorKind,
        message: &str,
    ) {
        let node = self.node(project);
        node.set_transition_error(transition, kind);
        node.add_pending_transition(transition);
        self.record_error(project, kind, message);
    }

    fn record_error(&mut self, project: &ProjectId, kind: TransitionErrorKind, message: &str) {
        warn!(project = %project, error = %kind, "{}", message);
        self.services.report(project, Severity::Error, message);
        self.result.errors.push(ProjectStatus {
            project: project.clone(),
            severity: Severity::Error,
            message: message.to_string(),
            error: Some(kind),
        });
    }

    fn note(&mut self, project: &ProjectId, severity: Severity, message: &str) {
        self.services.report(project, severity, message);
        self.result.warnings.push(ProjectStatus {
            project: project.clone(),
            severity,
            message: message.to_string(),
            error: None,
        });
    }

    fn succeed(&mut self, project: &ProjectId) {
        if !self.result.success.contains(project) {
            self.result.success.push(project.clone());
        }
        self.done(project);
    }
}
