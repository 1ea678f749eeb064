//! Project identifiers and the ordered pending set

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a workspace project
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(name: impl Into<String>) -> Self {
        ProjectId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(name: &str) -> Self {
        ProjectId(name.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(name: String) -> Self {
        ProjectId(name)
    }
}

/// Projects queued for one executor run
///
/// Keeps first-insertion order and drops duplicates; the sorter breaks
/// ordering ties by this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSet {
    projects: IndexSet<ProjectId>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a project, returns false if it was already pending
    pub fn insert(&mut self, project: ProjectId) -> bool {
        self.projects.insert(project)
    }

    pub fn extend<I: IntoIterator<Item = ProjectId>>(&mut self, projects: I) {
        self.projects.extend(projects);
    }

    /// Remove a project, keeping the relative order of the rest
    pub fn remove(&mut self, project: &ProjectId) -> bool {
        self.projects.shift_remove(project)
    }

    pub fn contains(&self, project: &ProjectId) -> bool {
        self.projects.contains(project)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectId> {
        self.projects.iter()
    }

    pub fn as_set(&self) -> &IndexSet<ProjectId> {
        &self.projects
    }

    pub fn into_vec(self) -> Vec<ProjectId> {
        self.projects.into_iter().collect()
    }
}

impl FromIterator<ProjectId> for PendingSet {
    fn from_iter<I: IntoIterator<Item = ProjectId>>(iter: I) -> Self {
        PendingSet {
            projects: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for PendingSet {
    type Item = ProjectId;
    type IntoIter = indexmap::set::IntoIter<ProjectId>;

    fn into_iter(self) -> Self::IntoIter {
        self.projects.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_set_keeps_insertion_order() {
        let mut pending = PendingSet::new();
        assert!(pending.insert("c".into()));
        assert!(pending.insert("a".into()));
        assert!(pending.insert("b".into()));
        assert!(!pending.insert("a".into()));

        let order: Vec<&str> = pending.iter().map(|p| p.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_pending_set_remove_preserves_order() {
        let mut pending: PendingSet = ["x", "y", "z"].iter().map(|s| ProjectId::from(*s)).collect();
        assert!(pending.remove(&"y".into()));
        assert!(!pending.remove(&"y".into()));
        assert_eq!(pending.into_vec(), vec![ProjectId::from("x"), ProjectId::from("z")]);
    }
}
