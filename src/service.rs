//! Life-cycle service
//!
//! Owns the bundle registry and runs commands one at a time on a worker
//! thread, in submission order. Callers get a [`RunHandle`] back to wait for
//! the result or cancel the run.

use crate::closure::{Closure, DependencyOptions, Operation};
use crate::config::{LifecycleSettings, Settings};
use crate::error::{InPlaceError, InPlaceResult};
use crate::executor::{BundleExecutor, Command, LifecycleCore, RunResult, RunStatus};
use crate::project::ProjectId;
use crate::state::{BundleState, Transition, TransitionFailure};
use crate::workspace::ServiceRegistry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Point-in-time view of one tracked project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub project: ProjectId,
    pub state: BundleState,
    pub activated: bool,
    pub pending: Vec<Transition>,
    pub error: Option<TransitionFailure>,
}

struct Job {
    id: u64,
    command: Command,
    projects: Vec<ProjectId>,
    enclosing: Option<Operation>,
    cancel: Arc<AtomicBool>,
    reply: mpsc::Sender<RunResult>,
}

enum WorkItem {
    Run(Job),
    Shutdown,
}

struct Shared {
    core: Mutex<LifecycleCore>,
    services: ServiceRegistry,
    settings: LifecycleSettings,
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, LifecycleCore> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle on a submitted run
pub struct RunHandle {
    id: u64,
    command: Command,
    cancel: Arc<AtomicBool>,
    receiver: mpsc::Receiver<RunResult>,
}

impl RunHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn command(&self) -> Command {
        self.command
    }

    /// Ask the run to stop before its next block
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Wait for the run to finish
    pub fn join(self) -> InPlaceResult<RunResult> {
        self.receiver.recv().map_err(|_| InPlaceError::Cancelled)
    }
}

pub struct LifecycleService {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::Sender<WorkItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl LifecycleService {
    pub fn new(services: ServiceRegistry, settings: &Settings) -> InPlaceResult<Self> {
        let options = settings.dependency_options()?;
        let shared = Arc::new(Shared {
            core: Mutex::new(LifecycleCore::new(options)),
            services,
            settings: settings.lifecycle.clone(),
        });

        let (sender, receiver) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("inplace-lifecycle".to_string())
            .spawn(move || Self::worker_thread(worker_shared, receiver))?;

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            next_id: AtomicU64::new(1),
        })
    }

    fn worker_thread(shared: Arc<Shared>, receiver: mpsc::Receiver<WorkItem>) {
        debug!("lifecycle worker started");
        while let Ok(WorkItem::Run(job)) = receiver.recv() {
            let result = Self::execute(&shared, &job);
            // The submitter may have dropped its handle
            let _ = job.reply.send(result);
        }
        debug!("lifecycle worker stopped");
    }

    fn execute(shared: &Shared, job: &Job) -> RunResult {
        let mut core = shared.core();

        if job.cancel.load(Ordering::SeqCst) {
            info!(run = job.id, command = %job.command, "run cancelled before it started");
            let marker = job.command.marker();
            for project in &job.projects {
                let activated = shared
                    .services
                    .activation()
                    .map_or(false, |a| a.is_activated(project));
                core.registry.ensure(project, activated).add_pending_transition(marker);
            }
            let mut result = RunResult::new(job.id, job.command);
            result.status = RunStatus::Cancelled;
            result.pending = job.projects.clone();
            return result;
        }

        let mut executor =
            BundleExecutor::new(&mut core, &shared.services, &shared.settings, job.command)
                .with_id(job.id)
                .with_cancel_flag(Arc::clone(&job.cancel));
        if let Some(enclosing) = job.enclosing {
            executor = executor.within(enclosing);
        }
        executor.add_all(job.projects.iter().cloned());
        executor.run()
    }

    /// Queue `command` over `projects`
    pub fn submit<I>(&self, command: Command, projects: I) -> InPlaceResult<RunHandle>
    where
        I: IntoIterator<Item = ProjectId>,
    {
        self.enqueue(command, projects.into_iter().collect(), None)
    }

    /// Queue `command` as part of an enclosing project operation
    pub fn submit_within<I>(
        &self,
        command: Command,
        projects: I,
        enclosing: Operation,
    ) -> InPlaceResult<RunHandle>
    where
        I: IntoIterator<Item = ProjectId>,
    {
        self.enqueue(command, projects.into_iter().collect(), Some(enclosing))
    }

    /// Submit and wait
    pub fn run<I>(&self, command: Command, projects: I) -> InPlaceResult<RunResult>
    where
        I: IntoIterator<Item = ProjectId>,
    {
        self.submit(command, projects)?.join()
    }

    /// Report a bundle uninstalled by someone other than the workspace
    pub fn notify_external_uninstall(&self, project: ProjectId) -> InPlaceResult<RunHandle> {
        self.submit(Command::ExternalUninstall, [project])
    }

    fn enqueue(
        &self,
        command: Command,
        projects: Vec<ProjectId>,
        enclosing: Option<Operation>,
    ) -> InPlaceResult<RunHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        let (reply, receiver) = mpsc::channel();

        let job = Job {
            id,
            command,
            projects,
            enclosing,
            cancel: Arc::clone(&cancel),
            reply,
        };

        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let sender = sender
            .as_ref()
            .ok_or_else(|| InPlaceError::Config("lifecycle service is shut down".to_string()))?;
        sender
            .send(WorkItem::Run(job))
            .map_err(|_| InPlaceError::Config("lifecycle worker is gone".to_string()))?;
        debug!(run = id, %command, "run queued");

        Ok(RunHandle {
            id,
            command,
            cancel,
            receiver,
        })
    }

    /// Current state of `project`, `StateLess` if untracked
    pub fn current_state(&self, project: &ProjectId) -> BundleState {
        self.shared.core().registry.state(project)
    }

    pub fn snapshot(&self) -> Vec<ProjectSnapshot> {
        let core = self.shared.core();
        core.registry
            .iter()
            .map(|node| ProjectSnapshot {
                project: node.id().clone(),
                state: node.state(),
                activated: node.is_activated(),
                pending: node.pending_transitions().copied().collect(),
                error: node.transition_error(),
            })
            .collect()
    }

    /// Drop the recorded failure of `project`
    pub fn clear_error(&self, project: &ProjectId) -> bool {
        let mut core = self.shared.core();
        match core.registry.get_mut(project) {
            Some(node) => {
                let had_error = node.has_transition_error();
                node.clear_transition_error();
                had_error
            }
            None => false,
        }
    }

    pub fn dependency_closure(&self, operation: Operation) -> Closure {
        self.shared.core().options.get(operation)
    }

    pub fn set_dependency_closure(
        &self,
        operation: Operation,
        closure: Closure,
    ) -> InPlaceResult<()> {
        self.shared.core().options.set(operation, closure)?;
        info!(%operation, %closure, "dependency closure changed");
        Ok(())
    }

    pub fn dependency_options(&self) -> DependencyOptions {
        self.shared.core().options.clone()
    }

    /// Stop accepting runs, finish the queued ones and stop the worker
    pub fn shutdown(&self) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sender) = sender {
            let _ = sender.send(WorkItem::Shutdown);
        }
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl Drop for LifecycleService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{ActivationState, MemoryWorkspace, ProjectSpec};

    fn service() -> (Arc<MemoryWorkspace>, LifecycleService) {
        let workspace = Arc::new(
            MemoryWorkspace::from_projects(vec![
                ProjectSpec::new("app").requires(["lib"]),
                ProjectSpec::new("lib"),
            ])
            .unwrap(),
        );
        let services = ServiceRegistry::from_workspace(workspace.clone());
        let service = LifecycleService::new(services, &Settings::default()).unwrap();
        (workspace, service)
    }

    #[test]
    fn test_run_activates_closure() {
        let (workspace, service) = service();
        let result = service.run(Command::ActivateProject, ["app".into()]).unwrap();

        assert!(result.is_completed());
        assert_eq!(result.success.len(), 2);
        assert_eq!(service.current_state(&"lib".into()), BundleState::Active);
        assert!(workspace.is_activated(&"app".into()));
    }

    #[test]
    fn test_queued_run_cancelled_before_it_starts() {
        let workspace = Arc::new(
            MemoryWorkspace::from_projects(vec![
                ProjectSpec::new("slow").start_delay_ms(200),
                ProjectSpec::new("quick"),
            ])
            .unwrap(),
        );
        let services = ServiceRegistry::from_workspace(workspace.clone());
        let service = LifecycleService::new(services, &Settings::default()).unwrap();

        let busy = service.submit(Command::ActivateProject, ["slow".into()]).unwrap();
        let queued = service.submit(Command::ActivateProject, ["quick".into()]).unwrap();
        assert!(queued.id() > busy.id());
        queued.cancel();

        assert!(busy.join().unwrap().is_completed());
        let result = queued.join().unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.pending, vec![ProjectId::from("quick")]);
        assert_eq!(service.current_state(&"quick".into()), BundleState::StateLess);
        assert!(workspace.started().iter().all(|p| p.as_str() != "quick"));
    }

    #[test]
    fn test_set_dependency_closure_validates() {
        let (_workspace, service) = service();
        assert!(service
            .set_dependency_closure(Operation::ActivateProject, Closure::Requiring)
            .is_err());
        service
            .set_dependency_closure(Operation::ActivateProject, Closure::PartialGraph)
            .unwrap();
        assert_eq!(service.dependency_closure(Operation::ActivateProject), Closure::PartialGraph);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let (_workspace, service) = service();
        service.shutdown();
        assert!(service.submit(Command::Install, ["lib".into()]).is_err());
    }
}
