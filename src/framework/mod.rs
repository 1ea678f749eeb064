//! Simulated bundle framework
//!
//! Stands in for the module system underneath the workspace: it hands out
//! bundle revisions, keeps superseded revisions around until a refresh, and
//! runs resolve attempts that call a [`ResolverHook`].

use crate::project::ProjectId;
use crate::resolver::{Candidate, DuplicateGroup, ResolverHook};
use crate::workspace::DependencyGraphProvider;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Input of one resolve attempt
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// Installed but unresolved projects to resolve
    pub unresolved: Vec<ProjectId>,
    /// Projects already resolved, usable as providers
    pub resolved: HashSet<ProjectId>,
}

/// Result of one resolve attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub resolved: Vec<ProjectId>,
    pub unresolved: Vec<ProjectId>,
}

impl ResolveOutcome {
    pub fn is_resolved(&self, project: &ProjectId) -> bool {
        self.resolved.contains(project)
    }
}

#[derive(Debug, Default)]
pub struct BundleFramework {
    installed: IndexMap<ProjectId, u64>,
    stale: IndexMap<ProjectId, Vec<u64>>,
    next_revision: u64,
}

impl BundleFramework {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the bundle of `project`, returning its revision
    pub fn install(&mut self, project: &ProjectId) -> u64 {
        if let Some(&revision) = self.installed.get(project) {
            return revision;
        }
        let revision = self.allocate();
        self.installed.insert(project.clone(), revision);
        debug!(project = %project, revision, "bundle installed");
        revision
    }

    /// Remove every revision of `project`, false if nothing was installed
    pub fn uninstall(&mut self, project: &ProjectId) -> bool {
        self.stale.shift_remove(project);
        self.installed.shift_remove(project).is_some()
    }

    /// Install a new revision, keeping the old one until the next refresh
    pub fn update(&mut self, project: &ProjectId) -> Option<u64> {
        let old = *self.installed.get(project)?;
        let revision = self.allocate();
        self.stale.entry(project.clone()).or_default().push(old);
        self.installed.insert(project.clone(), revision);
        debug!(project = %project, old, revision, "bundle updated");
        Some(revision)
    }

    /// Drop superseded revisions, returns how many were removed
    pub fn refresh(&mut self, project: &ProjectId) -> usize {
        self.stale.shift_remove(project).map_or(0, |revisions| revisions.len())
    }

    pub fn is_installed(&self, project: &ProjectId) -> bool {
        self.installed.contains_key(project)
    }

    pub fn revision(&self, project: &ProjectId) -> Option<u64> {
        self.installed.get(project).copied()
    }

    pub fn stale_revisions(&self, project: &ProjectId) -> &[u64] {
        self.stale.get(project).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Current and stale revisions of each project with stale revisions
    pub fn duplicate_groups(&self) -> Vec<DuplicateGroup> {
        self.stale
            .iter()
            .filter_map(|(project, stale)| {
                let current = *self.installed.get(project)?;
                let mut members: Vec<Candidate> =
                    stale.iter().map(|&r| Candidate::new(project.clone(), r)).collect();
                members.push(Candidate::new(project.clone(), current));
                Some(DuplicateGroup::new(members))
            })
            .collect()
    }

    /// Run one resolve attempt through `hook`
    pub fn resolve(
        &self,
        request: &ResolveRequest,
        graph: &dyn DependencyGraphProvider,
        hook: &mut dyn ResolverHook,
    ) -> ResolveOutcome {
        let mut candidates = Vec::new();
        for project in &request.unresolved {
            let Some(&current) = self.installed.get(project) else {
                continue;
            };
            for &old in self.stale_revisions(project) {
                candidates.push(Candidate::new(project.clone(), old));
            }
            candidates.push(Candidate::new(project.clone(), current));
        }

        hook.filter_resolvable(&mut candidates);
        let candidates = self.select_singletons(candidates, hook);

        // Greatest fixpoint: drop candidates with a requirement nobody satisfies,
        // so mutually requiring candidates resolve together
        let mut resolving: IndexSet<ProjectId> =
            candidates.into_iter().map(|c| c.project).collect();
        loop {
            let unsatisfied: Vec<ProjectId> = resolving
                .iter()
                .filter(|p| {
                    graph
                        .required_projects(p)
                        .iter()
                        .any(|r| !request.resolved.contains(r) && !resolving.contains(r))
                })
                .cloned()
                .collect();
            if unsatisfied.is_empty() {
                break;
            }
            for project in unsatisfied {
                debug!(project = %project, "missing requirement, not resolved");
                resolving.shift_remove(&project);
            }
        }

        hook.end();

        let resolved: Vec<ProjectId> = resolving.into_iter().collect();
        let unresolved = request
            .unresolved
            .iter()
            .filter(|p| !resolved.contains(p))
            .cloned()
            .collect();

        ResolveOutcome { resolved, unresolved }
    }

    /// Keep one revision per project; the newest wins unless a collision
    /// survives the hook, in which case the project does not resolve
    fn select_singletons(
        &self,
        candidates: Vec<Candidate>,
        hook: &mut dyn ResolverHook,
    ) -> Vec<Candidate> {
        let mut by_project: IndexMap<ProjectId, Vec<Candidate>> = IndexMap::new();
        for candidate in candidates {
            by_project.entry(candidate.project.clone()).or_default().push(candidate);
        }

        let mut selected = Vec::new();
        for (project, mut revisions) in by_project {
            revisions.sort_by_key(|c| c.revision);
            let Some(singleton) = revisions.pop() else {
                continue;
            };
            if !revisions.is_empty() {
                hook.filter_singleton_collisions(&singleton, &mut revisions);
                if !revisions.is_empty() {
                    warn!(
                        project = %project,
                        stale = revisions.len(),
                        "stale revision collides with update"
                    );
                    continue;
                }
            }
            selected.push(singleton);
        }
        selected
    }

    fn allocate(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}
