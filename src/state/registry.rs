//! Table of bundle nodes keyed by project

use super::{BundleNode, BundleState, Transition};
use crate::project::ProjectId;
use indexmap::IndexMap;

/// All tracked bundle nodes, in the order projects became known
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    nodes: IndexMap<ProjectId, BundleNode>,
}

impl BundleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project: &ProjectId) -> Option<&BundleNode> {
        self.nodes.get(project)
    }

    pub fn get_mut(&mut self, project: &ProjectId) -> Option<&mut BundleNode> {
        self.nodes.get_mut(project)
    }

    /// Node for `project`, created with the given activation flag if unknown
    pub fn ensure(&mut self, project: &ProjectId, activated: bool) -> &mut BundleNode {
        self.nodes
            .entry(project.clone())
            .or_insert_with(|| BundleNode::new(project.clone(), activated))
    }

    /// Forget a project that was deleted, closed or permanently uninstalled
    pub fn remove(&mut self, project: &ProjectId) -> Option<BundleNode> {
        self.nodes.shift_remove(project)
    }

    pub fn contains(&self, project: &ProjectId) -> bool {
        self.nodes.contains_key(project)
    }

    /// Current state, `StateLess` for unknown projects
    pub fn state(&self, project: &ProjectId) -> BundleState {
        self.nodes
            .get(project)
            .map(BundleNode::state)
            .unwrap_or(BundleState::StateLess)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BundleNode> {
        self.nodes.values()
    }

    /// Projects carrying `transition` as a pending transition
    pub fn with_pending(&self, transition: Transition) -> Vec<ProjectId> {
        self.nodes
            .values()
            .filter(|node| node.has_pending_transition(transition))
            .map(|node| node.id().clone())
            .collect()
    }

    /// Projects whose node records a transition failure
    pub fn with_errors(&self) -> Vec<ProjectId> {
        self.nodes
            .values()
            .filter(|node| node.has_transition_error())
            .map(|node| node.id().clone())
            .collect()
    }

    /// Projects whose bundle is in `state`
    pub fn in_state(&self, state: BundleState) -> Vec<ProjectId> {
        self.nodes
            .values()
            .filter(|node| node.state() == state)
            .map(|node| node.id().clone())
            .collect()
    }
}
