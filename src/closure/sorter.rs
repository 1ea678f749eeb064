//! Closure expansion and dependency ordering
//!
//! Expansion walks the dependency graph breadth-first from the seed, so the
//! result lists the seed in its original order followed by projects in
//! discovery order. Ordering groups mutually requiring projects into blocks
//! (strongly connected components) and emits the blocks in dependency order,
//! breaking ties by position in the expanded set.

use super::{Closure, Direction};
use crate::error::{InPlaceError, InPlaceResult};
use crate::project::ProjectId;
use crate::workspace::DependencyGraphProvider;
use indexmap::IndexSet;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use tracing::debug;

/// Projects in processing order, grouped into dependency blocks
///
/// A block holds more than one project only when they form a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedProjects {
    blocks: Vec<Vec<ProjectId>>,
}

impl SortedProjects {
    pub fn blocks(&self) -> &[Vec<ProjectId>] {
        &self.blocks
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectId> {
        self.blocks.iter().flatten()
    }

    pub fn to_vec(&self) -> Vec<ProjectId> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, project: &ProjectId) -> bool {
        self.iter().any(|p| p == project)
    }

    pub fn position(&self, project: &ProjectId) -> Option<usize> {
        self.iter().position(|p| p == project)
    }

    /// Index of the block holding `project`
    pub fn block_of(&self, project: &ProjectId) -> Option<usize> {
        self.blocks.iter().position(|block| block.contains(project))
    }

    /// Keep only the projects in `keep`, preserving blocks and order
    pub fn retain(self, keep: &IndexSet<ProjectId>) -> SortedProjects {
        let blocks = self
            .blocks
            .into_iter()
            .map(|block| block.into_iter().filter(|p| keep.contains(p)).collect::<Vec<_>>())
            .filter(|block| !block.is_empty())
            .collect();
        SortedProjects { blocks }
    }
}

/// Computes closures and orderings over a dependency graph
pub struct ProjectSorter<'a> {
    graph: &'a dyn DependencyGraphProvider,
}

impl<'a> ProjectSorter<'a> {
    pub fn new(graph: &'a dyn DependencyGraphProvider) -> Self {
        Self { graph }
    }

    /// Seed plus everything it requires, directly or indirectly
    pub fn providing(&self, seed: &IndexSet<ProjectId>) -> IndexSet<ProjectId> {
        self.walk(seed, |p| self.graph.required_projects(p))
    }

    /// Seed plus everything that requires it, directly or indirectly
    pub fn requiring(&self, seed: &IndexSet<ProjectId>) -> IndexSet<ProjectId> {
        self.walk(seed, |p| self.graph.providing_projects(p))
    }

    pub fn requiring_then_providing(&self, seed: &IndexSet<ProjectId>) -> IndexSet<ProjectId> {
        self.providing(&self.requiring(seed))
    }

    pub fn providing_then_requiring(&self, seed: &IndexSet<ProjectId>) -> IndexSet<ProjectId> {
        self.requiring(&self.providing(seed))
    }

    /// Every project connected to the seed, following edges either way
    pub fn partial_graph(&self, seed: &IndexSet<ProjectId>) -> IndexSet<ProjectId> {
        self.walk(seed, |p| {
            let mut neighbours = self.graph.required_projects(p);
            neighbours.extend(self.graph.providing_projects(p));
            neighbours
        })
    }

    pub fn expand(&self, seed: &IndexSet<ProjectId>, closure: Closure) -> IndexSet<ProjectId> {
        let expanded = match closure {
            Closure::Providing => self.providing(seed),
            Closure::Requiring => self.requiring(seed),
            Closure::RequiringThenProviding => self.requiring_then_providing(seed),
            Closure::ProvidingThenRequiring => self.providing_then_requiring(seed),
            Closure::PartialGraph => self.partial_graph(seed),
            Closure::Single => seed.clone(),
        };
        debug!(
            %closure,
            seed = seed.len(),
            expanded = expanded.len(),
            "closure expanded"
        );
        expanded
    }

    /// Check that every edge connected to `seed` is declared from both ends
    ///
    /// A project naming a provider that does not list it back, or one the
    /// graph does not know at all, leaves closures and orderings undefined.
    pub fn check_consistency(&self, seed: &IndexSet<ProjectId>) -> InPlaceResult<()> {
        for project in self.partial_graph(seed) {
            for provider in self.graph.required_projects(&project) {
                if !self.graph.providing_projects(&provider).contains(&project) {
                    return Err(InPlaceError::CorruptGraph(format!(
                        "{} requires {}, which does not list it as a requirer",
                        project, provider
                    )));
                }
            }
            for requirer in self.graph.providing_projects(&project) {
                if !self.graph.required_projects(&requirer).contains(&project) {
                    return Err(InPlaceError::CorruptGraph(format!(
                        "{} lists {} as a requirer, which does not require it",
                        project, requirer
                    )));
                }
            }
        }
        Ok(())
    }

    /// Expand `seed` with `closure` and order the result for `direction`
    pub fn plan(
        &self,
        seed: &IndexSet<ProjectId>,
        closure: Closure,
        direction: Direction,
    ) -> SortedProjects {
        self.sort(&self.expand(seed, closure), direction)
    }

    /// Order `projects` so every block comes after the blocks it depends on
    ///
    /// For `Activation` a provider precedes its requirers, for `Deactivation`
    /// the reverse. Requirements through projects outside the set still
    /// count, so a partial set keeps a dependency-correct order.
    pub fn sort(&self, projects: &IndexSet<ProjectId>, direction: Direction) -> SortedProjects {
        let requires: Vec<Vec<usize>> = projects
            .iter()
            .map(|p| self.requirements_within(p, projects))
            .collect();

        let components = strongly_connected(&requires);
        let mut component_of = vec![0usize; projects.len()];
        for (index, members) in components.iter().enumerate() {
            for &member in members {
                component_of[member] = index;
            }
        }

        // Component edges oriented "must come before"
        let mut successors: Vec<HashSet<usize>> = vec![HashSet::new(); components.len()];
        for (node, providers) in requires.iter().enumerate() {
            for &provider in providers {
                let (from, to) = match direction {
                    Direction::Activation => (component_of[provider], component_of[node]),
                    Direction::Deactivation => (component_of[node], component_of[provider]),
                };
                if from != to {
                    successors[from].insert(to);
                }
            }
        }

        let mut in_degree = vec![0usize; components.len()];
        for targets in &successors {
            for &target in targets {
                in_degree[target] += 1;
            }
        }

        // Members are sorted, so the first one is the component's earliest position
        let key = |component: usize| components[component][0];
        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = (0..components.len())
            .filter(|&c| in_degree[c] == 0)
            .map(|c| Reverse((key(c), c)))
            .collect();

        let mut blocks = Vec::with_capacity(components.len());
        while let Some(Reverse((_, component))) = ready.pop() {
            let members = &components[component];
            if members.len() > 1 {
                debug!(
                    members = ?members.iter().map(|&m| projects[m].as_str()).collect::<Vec<_>>(),
                    "dependency cycle detected, processing as one block"
                );
            }
            blocks.push(members.iter().map(|&m| projects[m].clone()).collect());

            let mut next: Vec<usize> = successors[component].iter().copied().collect();
            next.sort_unstable();
            for target in next {
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    ready.push(Reverse((key(target), target)));
                }
            }
        }

        SortedProjects { blocks }
    }

    /// Positions of the members of `set` that `project` requires, looking
    /// through requirements on projects outside `set`
    fn requirements_within(&self, project: &ProjectId, set: &IndexSet<ProjectId>) -> Vec<usize> {
        let mut found = Vec::new();
        let mut visited: HashSet<ProjectId> = HashSet::new();
        let mut stack = self.graph.required_projects(project);

        while let Some(next) = stack.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            match set.get_index_of(&next) {
                Some(index) => found.push(index),
                None => stack.extend(self.graph.required_projects(&next)),
            }
        }

        found.sort_unstable();
        found
    }

    fn walk<F>(&self, seed: &IndexSet<ProjectId>, neighbours: F) -> IndexSet<ProjectId>
    where
        F: Fn(&ProjectId) -> Vec<ProjectId>,
    {
        let mut result = seed.clone();
        let mut cursor = 0;
        while let Some(project) = result.get_index(cursor).cloned() {
            for next in neighbours(&project) {
                result.insert(next);
            }
            cursor += 1;
        }
        result
    }
}

/// Tarjan's algorithm; each component's members come back in ascending order
fn strongly_connected(edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct Tarjan<'e> {
        edges: &'e [Vec<usize>],
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        counter: usize,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, node: usize) {
            self.index[node] = Some(self.counter);
            self.low[node] = self.counter;
            self.counter += 1;
            self.stack.push(node);
            self.on_stack[node] = true;

            let edges = self.edges;
            for &next in &edges[node] {
                match self.index[next] {
                    None => {
                        self.visit(next);
                        self.low[node] = self.low[node].min(self.low[next]);
                    }
                    Some(next_index) if self.on_stack[next] => {
                        self.low[node] = self.low[node].min(next_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.low[node]) == self.index[node] {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                component.sort_unstable();
                self.components.push(component);
            }
        }
    }

    let count = edges.len();
    let mut tarjan = Tarjan {
        edges,
        index: vec![None; count],
        low: vec![0; count],
        on_stack: vec![false; count],
        stack: Vec::new(),
        counter: 0,
        components: Vec::new(),
    };

    for node in 0..count {
        if tarjan.index[node].is_none() {
            tarjan.visit(node);
        }
    }

    tarjan.components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{MemoryWorkspace, ProjectSpec};

    fn ids(names: &[&str]) -> IndexSet<ProjectId> {
        names.iter().map(|n| ProjectId::from(*n)).collect()
    }

    fn names(projects: &[ProjectId]) -> Vec<&str> {
        projects.iter().map(ProjectId::as_str).collect()
    }

    /// app -> lib -> base, tool -> base
    fn layered() -> MemoryWorkspace {
        MemoryWorkspace::from_projects(vec![
            ProjectSpec::new("app").requires(["lib"]),
            ProjectSpec::new("lib").requires(["base"]),
            ProjectSpec::new("base"),
            ProjectSpec::new("tool").requires(["base"]),
            ProjectSpec::new("lonely"),
        ])
        .unwrap()
    }

    #[test]
    fn test_providing_closure() {
        let workspace = layered();
        let sorter = ProjectSorter::new(&workspace);
        let expanded = sorter.providing(&ids(&["app"]));
        assert_eq!(expanded, ids(&["app", "lib", "base"]));
    }

    #[test]
    fn test_requiring_closure() {
        let workspace = layered();
        let sorter = ProjectSorter::new(&workspace);
        let expanded = sorter.requiring(&ids(&["base"]));
        assert_eq!(expanded, ids(&["base", "lib", "tool", "app"]));
    }

    #[test]
    fn test_combined_closures() {
        let workspace = layered();
        let sorter = ProjectSorter::new(&workspace);

        // lib's requirers are {lib, app}, their providers add base
        assert_eq!(sorter.requiring_then_providing(&ids(&["lib"])), ids(&["lib", "app", "base"]));
        // lib's providers are {lib, base}, their requirers add app and tool
        assert_eq!(
            sorter.providing_then_requiring(&ids(&["lib"])),
            ids(&["lib", "base", "app", "tool"])
        );
    }

    #[test]
    fn test_partial_graph_excludes_disconnected() {
        let workspace = layered();
        let sorter = ProjectSorter::new(&workspace);
        let expanded = sorter.partial_graph(&ids(&["tool"]));
        assert_eq!(expanded.len(), 4);
        assert!(!expanded.contains(&ProjectId::from("lonely")));
    }

    #[test]
    fn test_activation_order_puts_providers_first() {
        let workspace = layered();
        let sorter = ProjectSorter::new(&workspace);
        let sorted = sorter.plan(&ids(&["app", "tool"]), Closure::Providing, Direction::Activation);
        // Expanded set is [app, tool, lib, base]; tool is free once base is done
        assert_eq!(names(&sorted.to_vec()), vec!["base", "tool", "lib", "app"]);
    }

    #[test]
    fn test_deactivation_order_puts_requirers_first() {
        let workspace = layered();
        let sorter = ProjectSorter::new(&workspace);
        let sorted = sorter.plan(&ids(&["base"]), Closure::Requiring, Direction::Deactivation);
        assert_eq!(names(&sorted.to_vec()), vec!["tool", "app", "lib", "base"]);
    }

    #[test]
    fn test_single_orders_through_outside_projects() {
        let workspace = layered();
        let sorter = ProjectSorter::new(&workspace);
        // app reaches base only through lib, which is not part of the set
        let sorted = sorter.plan(&ids(&["app", "base"]), Closure::Single, Direction::Activation);
        assert_eq!(names(&sorted.to_vec()), vec!["base", "app"]);
    }

    #[test]
    fn test_cycle_is_one_block() {
        let workspace = MemoryWorkspace::from_projects(vec![
            ProjectSpec::new("a").requires(["b"]),
            ProjectSpec::new("b").requires(["a", "c"]),
            ProjectSpec::new("c"),
            ProjectSpec::new("d").requires(["a"]),
        ])
        .unwrap();
        let sorter = ProjectSorter::new(&workspace);

        let sorted = sorter.plan(&ids(&["d"]), Closure::Providing, Direction::Activation);
        assert_eq!(sorted.blocks().len(), 3);
        assert_eq!(names(&sorted.blocks()[0]), vec!["c"]);
        assert_eq!(sorted.blocks()[1].len(), 2);
        assert_eq!(sorted.block_of(&"a".into()), sorted.block_of(&"b".into()));
        assert_eq!(names(&sorted.blocks()[2]), vec!["d"]);
    }

    #[test]
    fn test_ties_follow_seed_order() {
        let workspace = layered();
        let sorter = ProjectSorter::new(&workspace);
        let sorted = sorter.sort(&ids(&["lonely", "base", "tool"]), Direction::Activation);
        assert_eq!(names(&sorted.to_vec()), vec!["lonely", "base", "tool"]);
    }

    /// Edges only declared from the requiring side
    struct OneSided;

    impl DependencyGraphProvider for OneSided {
        fn required_projects(&self, project: &ProjectId) -> Vec<ProjectId> {
            match project.as_str() {
                "app" => vec![ProjectId::from("ghost")],
                _ => Vec::new(),
            }
        }

        fn providing_projects(&self, _project: &ProjectId) -> Vec<ProjectId> {
            Vec::new()
        }
    }

    #[test]
    fn test_consistent_graph_passes_check() {
        let workspace = layered();
        let sorter = ProjectSorter::new(&workspace);
        assert!(sorter.check_consistency(&ids(&["app", "lonely"])).is_ok());
    }

    #[test]
    fn test_one_sided_edge_is_corruption() {
        let sorter = ProjectSorter::new(&OneSided);
        let result = sorter.check_consistency(&ids(&["app"]));
        assert!(matches!(result, Err(InPlaceError::CorruptGraph(_))));
        assert!(sorter.check_consistency(&ids(&["other"])).is_ok());
    }
}
