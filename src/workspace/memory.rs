//! In-memory workspace backing every collaborator trait
//!
//! Used by the command-line driver (built from a manifest) and as the
//! fixture of the test-suite.

use super::{
    ActivationPolicy, ActivationState, BuildStatus, BundleActivator, DependencyGraphProvider,
    ProjectSpec, Severity, StatusSink, WorkspaceManifest,
};
use crate::error::{InPlaceError, InPlaceResult};
use crate::project::ProjectId;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use std::sync::{Mutex, RwLock};
use std::thread;
use std::time::Duration;

/// A status reported through [`StatusSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub project: ProjectId,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone)]
struct ProjectEntry {
    requires: Vec<ProjectId>,
    lazy: bool,
    start_delay: Duration,
}

/// Workspace held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    projects: IndexMap<ProjectId, ProjectEntry>,
    requirers: IndexMap<ProjectId, Vec<ProjectId>>,
    activated: RwLock<HashSet<ProjectId>>,
    build_errors: RwLock<HashSet<ProjectId>>,
    start_failures: RwLock<HashSet<ProjectId>>,
    statuses: Mutex<Vec<StatusEntry>>,
    started: Mutex<Vec<ProjectId>>,
    stopped: Mutex<Vec<ProjectId>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_manifest(manifest: &WorkspaceManifest) -> InPlaceResult<Self> {
        manifest.validate()?;
        Self::from_projects(manifest.projects.iter().cloned())
    }

    /// Build a workspace from project declarations
    ///
    /// Requirements may name projects declared later in the list.
    pub fn from_projects<I>(projects: I) -> InPlaceResult<Self>
    where
        I: IntoIterator<Item = ProjectSpec>,
    {
        let mut workspace = MemoryWorkspace::new();
        let specs: Vec<ProjectSpec> = projects.into_iter().collect();

        for spec in &specs {
            let id = ProjectId::new(spec.name.clone());
            let entry = ProjectEntry {
                requires: spec.requires.iter().cloned().map(ProjectId::from).collect(),
                lazy: spec.lazy,
                start_delay: Duration::from_millis(spec.start_delay_ms),
            };
            workspace.projects.insert(id.clone(), entry);
            workspace.requirers.insert(id.clone(), Vec::new());

            if spec.activated {
                write(&workspace.activated).insert(id.clone());
            }
            if spec.build_errors {
                write(&workspace.build_errors).insert(id);
            }
        }

        for (id, entry) in &workspace.projects {
            for required in &entry.requires {
                match workspace.requirers.get_mut(required) {
                    Some(requirers) => requirers.push(id.clone()),
                    None => {
                        return Err(InPlaceError::Manifest(format!(
                            "project '{}' requires unknown project '{}'",
                            id, required
                        )))
                    }
                }
            }
        }

        Ok(workspace)
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectId> {
        self.projects.keys()
    }

    pub fn contains(&self, project: &ProjectId) -> bool {
        self.projects.contains_key(project)
    }

    pub fn set_build_errors(&self, project: &ProjectId, errors: bool) {
        let mut build_errors = write(&self.build_errors);
        if errors {
            build_errors.insert(project.clone());
        } else {
            build_errors.remove(project);
        }
    }

    /// Make the activator fail when starting `project`
    pub fn set_start_failure(&self, project: &ProjectId, fail: bool) {
        let mut failures = write(&self.start_failures);
        if fail {
            failures.insert(project.clone());
        } else {
            failures.remove(project);
        }
    }

    pub fn statuses(&self) -> Vec<StatusEntry> {
        lock(&self.statuses).clone()
    }

    /// Projects in the order their start code ran
    pub fn started(&self) -> Vec<ProjectId> {
        lock(&self.started).clone()
    }

    /// Projects in the order their stop code ran
    pub fn stopped(&self) -> Vec<ProjectId> {
        lock(&self.stopped).clone()
    }

    pub fn activated_projects(&self) -> IndexSet<ProjectId> {
        let activated = read(&self.activated);
        self.projects
            .keys()
            .filter(|p| activated.contains(*p))
            .cloned()
            .collect()
    }
}

impl DependencyGraphProvider for MemoryWorkspace {
    fn required_projects(&self, project: &ProjectId) -> Vec<ProjectId> {
        self.projects
            .get(project)
            .map(|entry| entry.requires.clone())
            .unwrap_or_default()
    }

    fn providing_projects(&self, project: &ProjectId) -> Vec<ProjectId> {
        self.requirers.get(project).cloned().unwrap_or_default()
    }
}

impl ActivationState for MemoryWorkspace {
    fn is_activated(&self, project: &ProjectId) -> bool {
        read(&self.activated).contains(project)
    }

    fn set_activated(&self, project: &ProjectId, activated: bool) {
        let mut flags = write(&self.activated);
        if activated {
            flags.insert(project.clone());
        } else {
            flags.remove(project);
        }
    }
}

impl BuildStatus for MemoryWorkspace {
    fn has_build_errors(&self, project: &ProjectId) -> bool {
        read(&self.build_errors).contains(project)
    }
}

impl ActivationPolicy for MemoryWorkspace {
    fn is_lazy(&self, project: &ProjectId) -> bool {
        self.projects.get(project).map_or(false, |entry| entry.lazy)
    }
}

impl StatusSink for MemoryWorkspace {
    fn report(&self, project: &ProjectId, severity: Severity, message: &str) {
        lock(&self.statuses).push(StatusEntry {
            project: project.clone(),
            severity,
            message: message.to_string(),
        });
    }
}

impl BundleActivator for MemoryWorkspace {
    fn start(&self, project: &ProjectId) -> Result<(), String> {
        let delay = self
            .projects
            .get(project)
            .map(|entry| entry.start_delay)
            .unwrap_or_default();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        if read(&self.start_failures).contains(project) {
            return Err(format!("start of {} threw an exception", project));
        }

        lock(&self.started).push(project.clone());
        Ok(())
    }

    fn stop(&self, project: &ProjectId) -> Result<(), String> {
        lock(&self.stopped).push(project.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_edges_both_directions() {
        let workspace = MemoryWorkspace::from_projects(vec![
            ProjectSpec::new("ui").requires(["core"]),
            ProjectSpec::new("core"),
            ProjectSpec::new("cli").requires(["core"]),
        ])
        .unwrap();

        let core = ProjectId::from("core");
        assert!(workspace.required_projects(&core).is_empty());
        assert_eq!(
            workspace.providing_projects(&core),
            vec![ProjectId::from("ui"), ProjectId::from("cli")]
        );
        assert_eq!(workspace.required_projects(&"ui".into()), vec![core]);
    }

    #[test]
    fn test_activation_flags() {
        let workspace = MemoryWorkspace::from_projects(vec![
            ProjectSpec::new("a").activated(true),
            ProjectSpec::new("b"),
        ])
        .unwrap();

        assert!(workspace.is_activated(&"a".into()));
        assert!(!workspace.is_activated(&"b".into()));

        workspace.set_activated(&"b".into(), true);
        workspace.set_activated(&"a".into(), false);
        let activated: Vec<ProjectId> = workspace.activated_projects().into_iter().collect();
        assert_eq!(activated, vec![ProjectId::from("b")]);
    }

    #[test]
    fn test_unknown_requirement() {
        let result = MemoryWorkspace::from_projects(vec![ProjectSpec::new("a").requires(["zzz"])]);
        assert!(matches!(result, Err(InPlaceError::Manifest(_))));
    }
}
