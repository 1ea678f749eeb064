//! Property tests for closures, ordering, the state table and the resolver hook

use indexmap::IndexSet;
use inplace_core::closure::{Closure, DependencyOptions, Direction, Operation, ProjectSorter};
use inplace_core::resolver::{Candidate, DuplicateGroup, ResolutionFilter, ResolverHook};
use inplace_core::state::{BundleNode, BundleRegistry, BundleState, Transition};
use inplace_core::workspace::{
    ActivationPolicy, ActivationState, DependencyGraphProvider, MemoryWorkspace, ProjectSpec,
};
use inplace_core::ProjectId;
use quickcheck_macros::quickcheck;

const PROJECTS: usize = 7;

fn name(index: u8) -> String {
    format!("p{}", index as usize % PROJECTS)
}

/// Workspace over p0..p6 with the given requirement edges and activation bits
fn workspace(edges: &[(u8, u8)], activated: u8) -> MemoryWorkspace {
    let specs = (0..PROJECTS as u8).map(|i| {
        let requires: IndexSet<String> = edges
            .iter()
            .filter(|(from, to)| name(*from) == name(i) && name(*to) != name(i))
            .map(|(_, to)| name(*to))
            .collect();
        ProjectSpec::new(name(i))
            .requires(requires)
            .activated(activated & (1 << i) != 0)
    });
    MemoryWorkspace::from_projects(specs).unwrap()
}

fn seed(indices: &[u8]) -> IndexSet<ProjectId> {
    indices.iter().map(|&i| ProjectId::from(name(i))).collect()
}

fn closure_from(index: u8) -> Closure {
    Closure::ALL[index as usize % Closure::ALL.len()]
}

#[quickcheck]
fn prop_closure_contains_seed_and_grows_with_it(
    edges: Vec<(u8, u8)>,
    first: Vec<u8>,
    more: Vec<u8>,
    closure: u8,
) -> bool {
    let workspace = workspace(&edges, 0);
    let sorter = ProjectSorter::new(&workspace);
    let closure = closure_from(closure);

    let small = seed(&first);
    let mut large = small.clone();
    large.extend(seed(&more));

    let small_closure = sorter.expand(&small, closure);
    let large_closure = sorter.expand(&large, closure);
    small.iter().all(|p| small_closure.contains(p))
        && small_closure.iter().all(|p| large_closure.contains(p))
}

#[quickcheck]
fn prop_expansion_lists_seed_first(edges: Vec<(u8, u8)>, start: Vec<u8>, closure: u8) -> bool {
    let workspace = workspace(&edges, 0);
    let start = seed(&start);
    let expanded = ProjectSorter::new(&workspace).expand(&start, closure_from(closure));
    expanded.iter().take(start.len()).eq(start.iter())
}

#[quickcheck]
fn prop_partial_graph_is_idempotent(edges: Vec<(u8, u8)>, start: Vec<u8>) -> bool {
    let workspace = workspace(&edges, 0);
    let sorter = ProjectSorter::new(&workspace);
    let once = sorter.partial_graph(&seed(&start));
    let twice = sorter.partial_graph(&once);
    once.len() == twice.len() && once.iter().all(|p| twice.contains(p))
}

#[quickcheck]
fn prop_order_respects_dependencies(edges: Vec<(u8, u8)>, start: Vec<u8>, closure: u8) -> bool {
    let workspace = workspace(&edges, 0);
    let sorter = ProjectSorter::new(&workspace);
    let expanded = sorter.expand(&seed(&start), closure_from(closure));

    let up = sorter.sort(&expanded, Direction::Activation);
    let down = sorter.sort(&expanded, Direction::Deactivation);
    if up.len() != expanded.len() || down.len() != expanded.len() {
        return false;
    }

    expanded.iter().all(|project| {
        workspace
            .required_projects(project)
            .iter()
            .filter(|provider| expanded.contains(*provider))
            .all(|provider| {
                up.block_of(provider) <= up.block_of(project)
                    && down.block_of(project) <= down.block_of(provider)
            })
    })
}

#[quickcheck]
fn prop_options_accept_only_allowed_closures(operation: u8, closure: u8) -> bool {
    let operation = Operation::ALL[operation as usize % Operation::ALL.len()];
    let closure = closure_from(closure);
    let mut options = DependencyOptions::default();
    let before = options.get(operation);

    match options.set(operation, closure) {
        Ok(()) => {
            DependencyOptions::is_allowed(operation, closure) && options.get(operation) == closure
        }
        Err(_) => {
            !DependencyOptions::is_allowed(operation, closure) && options.get(operation) == before
        }
    }
}

struct Eager;

impl ActivationPolicy for Eager {
    fn is_lazy(&self, _project: &ProjectId) -> bool {
        false
    }
}

#[quickcheck]
fn prop_illegal_transitions_leave_state_alone(steps: Vec<u8>) -> bool {
    let mut node = BundleNode::new(ProjectId::from("p"), true);
    steps.iter().all(|&step| {
        let transition = Transition::ALL[step as usize % Transition::ALL.len()];
        let before = node.state();
        match node.transition(transition, &Eager) {
            Ok(after) => node.state() == after && BundleState::ALL.contains(&after),
            Err(e) => node.state() == before && e.state == before && node.has_transition_error(),
        }
    })
}

#[quickcheck]
fn prop_filter_leaves_no_deactivated_dependency(edges: Vec<(u8, u8)>, activated: u8) -> bool {
    let workspace = workspace(&edges, activated);
    let mut registry = BundleRegistry::new();
    let mut candidates = Vec::new();
    for (revision, project) in workspace.projects().enumerate() {
        registry.ensure(project, workspace.is_activated(project));
        candidates.push(Candidate::new(project.clone(), revision as u64));
    }

    {
        let mut filter = ResolutionFilter::new(&mut registry, &workspace, &workspace);
        filter.filter_resolvable(&mut candidates);
        filter.end();
    }

    let kept: IndexSet<ProjectId> = candidates.iter().map(|c| c.project.clone()).collect();
    let no_deactivated = kept.iter().all(|p| workspace.is_activated(p));
    // Providers of a kept candidate are either kept or not deactivated-blocked
    let closed = kept.iter().all(|p| {
        workspace
            .required_projects(p)
            .iter()
            .all(|provider| kept.contains(provider))
    });
    // Every removed activated project marks at least one deactivated provider
    let marked = workspace
        .projects()
        .filter(|p| workspace.is_activated(p) && !kept.contains(*p))
        .all(|_| !registry.with_pending(Transition::ActivateProject).is_empty());

    no_deactivated && closed && marked
}

#[quickcheck]
fn prop_collision_filter_keeps_nothing_from_singleton_group(
    revisions: Vec<u8>,
    strangers: Vec<u8>,
) -> bool {
    let revisions: IndexSet<u64> = revisions.into_iter().map(u64::from).collect();
    let Some(&newest) = revisions.iter().max() else {
        return true;
    };
    let group = DuplicateGroup::new(revisions.iter().map(|&r| Candidate::new("a", r)).collect());
    let singleton = Candidate::new("a", newest);

    let mut collisions: Vec<Candidate> = revisions
        .iter()
        .filter(|&&r| r != newest)
        .map(|&r| Candidate::new("a", r))
        .collect();
    // Revisions outside every known group
    collisions.extend(strangers.into_iter().map(|r| Candidate::new("b", u64::from(r))));

    let workspace = MemoryWorkspace::new();
    let mut registry = BundleRegistry::new();
    let mut filter = ResolutionFilter::new(&mut registry, &workspace, &workspace)
        .with_duplicates(vec![group.clone()]);
    filter.filter_singleton_collisions(&singleton, &mut collisions);

    collisions.iter().all(|c| !group.contains(c))
        && collisions.iter().all(|c| c.project.as_str() != "b")
}
