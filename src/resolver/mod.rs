//! Resolver hook keeping the workspace consistent during resolution
//!
//! The framework calls the hook from inside a resolve attempt with the
//! candidate revisions it is about to wire. [`ResolutionFilter`] strips
//! deactivated projects (and the activated ones that would need them) and
//! stale duplicates of updated bundles. One filter is built per resolve
//! attempt; its duplicate groups are dropped at [`ResolverHook::end`].

use crate::project::ProjectId;
use crate::state::{BundleRegistry, Transition};
use crate::workspace::{ActivationState, DependencyGraphProvider};
use indexmap::IndexSet;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

/// One revision of a project's bundle offered for resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub project: ProjectId,
    pub revision: u64,
}

impl Candidate {
    pub fn new(project: impl Into<ProjectId>, revision: u64) -> Self {
        Candidate {
            project: project.into(),
            revision,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.project, self.revision)
    }
}

/// Revisions that are duplicates of each other, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateGroup {
    members: Vec<Candidate>,
}

impl DuplicateGroup {
    pub fn new(members: Vec<Candidate>) -> Self {
        DuplicateGroup { members }
    }

    pub fn contains(&self, candidate: &Candidate) -> bool {
        self.members.contains(candidate)
    }

    pub fn members(&self) -> &[Candidate] {
        &self.members
    }
}

/// Entry points the framework calls during one resolve attempt
///
/// `filter_resolvable` runs first and narrows the candidates that later
/// reach `filter_singleton_collisions`.
pub trait ResolverHook {
    fn filter_resolvable(&mut self, candidates: &mut Vec<Candidate>);

    fn filter_singleton_collisions(
        &mut self,
        singleton: &Candidate,
        collision_candidates: &mut Vec<Candidate>,
    );

    fn filter_matches(&mut self, _requirer: &Candidate, _candidates: &mut Vec<Candidate>) {}

    fn end(&mut self);
}

/// The workspace's resolver hook
pub struct ResolutionFilter<'a> {
    nodes: &'a mut BundleRegistry,
    activation: &'a dyn ActivationState,
    graph: &'a dyn DependencyGraphProvider,
    groups: Option<Vec<DuplicateGroup>>,
    deferred: IndexSet<ProjectId>,
}

impl<'a> ResolutionFilter<'a> {
    pub fn new(
        nodes: &'a mut BundleRegistry,
        activation: &'a dyn ActivationState,
        graph: &'a dyn DependencyGraphProvider,
    ) -> Self {
        Self {
            nodes,
            activation,
            graph,
            groups: None,
            deferred: IndexSet::new(),
        }
    }

    /// Duplicate groups known for this resolve attempt
    pub fn with_duplicates(mut self, groups: Vec<DuplicateGroup>) -> Self {
        self.groups = if groups.is_empty() { None } else { Some(groups) };
        self
    }

    /// Activated projects held back because a provider is deactivated
    pub fn deferred(&self) -> &IndexSet<ProjectId> {
        &self.deferred
    }

    pub fn has_duplicate_groups(&self) -> bool {
        self.groups.is_some()
    }

    /// Deactivated candidates `start` depends on, walking only through
    /// activated candidates
    fn deactivated_providers(
        &self,
        start: &ProjectId,
        activated: &IndexSet<ProjectId>,
        deactivated: &IndexSet<ProjectId>,
    ) -> IndexSet<ProjectId> {
        let mut found = IndexSet::new();
        let mut visited = HashSet::new();
        let mut stack = self.graph.required_projects(start);

        while let Some(next) = stack.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            if deactivated.contains(&next) {
                found.insert(next);
            } else if activated.contains(&next) {
                stack.extend(self.graph.required_projects(&next));
            }
        }

        found
    }
}

impl ResolverHook for ResolutionFilter<'_> {
    fn filter_resolvable(&mut self, candidates: &mut Vec<Candidate>) {
        let mut activated = IndexSet::new();
        let mut deactivated = IndexSet::new();
        for candidate in candidates.iter() {
            if !self.nodes.contains(&candidate.project) {
                continue;
            }
            if self.activation.is_activated(&candidate.project) {
                activated.insert(candidate.project.clone());
            } else {
                deactivated.insert(candidate.project.clone());
            }
        }

        if deactivated.is_empty() {
            return;
        }

        candidates.retain(|c| !deactivated.contains(&c.project));
        debug!(removed = deactivated.len(), "deactivated candidates removed");

        let mut blocked = IndexSet::new();
        for project in &activated {
            let providers = self.deactivated_providers(project, &activated, &deactivated);
            if providers.is_empty() {
                continue;
            }

            info!(
                project = %project,
                providers = ?providers.iter().map(ProjectId::as_str).collect::<Vec<_>>(),
                "resolution deferred until deactivated providers are activated"
            );
            for provider in providers {
                if let Some(node) = self.nodes.get_mut(&provider) {
                    node.add_pending_transition(Transition::ActivateProject);
                }
            }
            blocked.insert(project.clone());
        }

        candidates.retain(|c| !blocked.contains(&c.project));
        self.deferred.extend(blocked);
    }

    fn filter_singleton_collisions(
        &mut self,
        singleton: &Candidate,
        collision_candidates: &mut Vec<Candidate>,
    ) {
        let Some(groups) = self.groups.as_ref() else {
            return;
        };

        let own_group = groups.iter().position(|g| g.contains(singleton));
        collision_candidates.retain(|candidate| {
            match groups.iter().position(|g| g.contains(candidate)) {
                Some(group) => Some(group) != own_group,
                None => false,
            }
        });
        debug!(
            singleton = %singleton,
            remaining = collision_candidates.len(),
            "singleton collisions filtered"
        );
    }

    fn end(&mut self) {
        self.groups = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{MemoryWorkspace, ProjectSpec};

    fn registry_for(workspace: &MemoryWorkspace) -> BundleRegistry {
        let mut registry = BundleRegistry::new();
        for project in workspace.projects() {
            registry.ensure(project, workspace.is_activated(project));
        }
        registry
    }

    #[test]
    fn test_no_deactivated_candidates_keeps_everything() {
        let workspace = MemoryWorkspace::from_projects(vec![
            ProjectSpec::new("a").requires(["b"]).activated(true),
            ProjectSpec::new("b").activated(true),
        ])
        .unwrap();
        let mut registry = registry_for(&workspace);
        let mut filter = ResolutionFilter::new(&mut registry, &workspace, &workspace);

        let mut candidates = vec![Candidate::new("a", 1), Candidate::new("b", 2)];
        filter.filter_resolvable(&mut candidates);
        assert_eq!(candidates.len(), 2);
        assert!(filter.deferred().is_empty());
    }

    #[test]
    fn test_transitive_requirer_of_deactivated_is_removed() {
        // top -> mid -> off, off is deactivated
        let workspace = MemoryWorkspace::from_projects(vec![
            ProjectSpec::new("top").requires(["mid"]).activated(true),
            ProjectSpec::new("mid").requires(["off"]).activated(true),
            ProjectSpec::new("off"),
            ProjectSpec::new("free").activated(true),
        ])
        .unwrap();
        let mut registry = registry_for(&workspace);
        let mut candidates = vec![
            Candidate::new("top", 1),
            Candidate::new("mid", 2),
            Candidate::new("off", 3),
            Candidate::new("free", 4),
        ];

        {
            let mut filter = ResolutionFilter::new(&mut registry, &workspace, &workspace);
            filter.filter_resolvable(&mut candidates);
            assert_eq!(filter.deferred().len(), 2);
        }

        assert_eq!(candidates, vec![Candidate::new("free", 4)]);
        assert!(registry
            .get(&"off".into())
            .unwrap()
            .has_pending_transition(Transition::ActivateProject));
        assert!(!registry
            .get(&"free".into())
            .unwrap()
            .has_pending_transition(Transition::ActivateProject));
    }

    #[test]
    fn test_collision_filter_drops_same_group_and_unknown() {
        let workspace = MemoryWorkspace::new();
        let mut registry = BundleRegistry::new();
        let group = DuplicateGroup::new(vec![Candidate::new("a", 1), Candidate::new("a", 5)]);
        let other = DuplicateGroup::new(vec![Candidate::new("b", 2), Candidate::new("b", 6)]);
        let mut filter = ResolutionFilter::new(&mut registry, &workspace, &workspace)
            .with_duplicates(vec![group, other]);

        let mut collisions = vec![
            Candidate::new("a", 1),
            Candidate::new("a", 9),
            Candidate::new("b", 2),
        ];
        filter.filter_singleton_collisions(&Candidate::new("a", 5), &mut collisions);
        assert_eq!(collisions, vec![Candidate::new("b", 2)]);
    }

    #[test]
    fn test_end_clears_groups() {
        let workspace = MemoryWorkspace::new();
        let mut registry = BundleRegistry::new();
        let group = DuplicateGroup::new(vec![Candidate::new("a", 1), Candidate::new("a", 2)]);
        let mut filter = ResolutionFilter::new(&mut registry, &workspace, &workspace)
            .with_duplicates(vec![group]);

        assert!(filter.has_duplicate_groups());
        filter.end();
        assert!(!filter.has_duplicate_groups());

        // Without groups nothing is filtered
        let mut collisions = vec![Candidate::new("a", 1)];
        filter.filter_singleton_collisions(&Candidate::new("a", 2), &mut collisions);
        assert_eq!(collisions.len(), 1);
    }
}
