//! Per-project bundle node

use super::{BundleState, Transition, TransitionErrorKind};
use crate::error::TransitionError;
use crate::project::ProjectId;
use crate::workspace::ActivationPolicy;
use indexmap::IndexSet;
use tracing::debug;

/// The last failure recorded on a node, kept until explicitly cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionFailure {
    pub transition: Transition,
    pub kind: TransitionErrorKind,
}

/// Life-cycle bookkeeping for one tracked project
#[derive(Debug, Clone)]
pub struct BundleNode {
    id: ProjectId,
    activated: bool,
    state: BundleState,
    pending: IndexSet<Transition>,
    current: Option<Transition>,
    error: Option<TransitionFailure>,
}

impl BundleNode {
    pub fn new(id: ProjectId, activated: bool) -> Self {
        Self {
            id,
            activated,
            state: BundleState::StateLess,
            pending: IndexSet::new(),
            current: None,
            error: None,
        }
    }

    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    pub fn state(&self) -> BundleState {
        self.state
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn set_activated(&mut self, activated: bool) {
        self.activated = activated;
    }

    /// Apply `transition` using the table in [`BundleState::next`]
    ///
    /// An illegal transition leaves the state untouched, records an
    /// `IllegalTransition` failure and returns the error.
    pub fn transition(
        &mut self,
        transition: Transition,
        policy: &dyn ActivationPolicy,
    ) -> Result<BundleState, TransitionError> {
        let uninstalling = self.pending.contains(&Transition::Uninstall);
        let id = &self.id;
        match self.state.next(transition, uninstalling, || policy.is_lazy(id)) {
            Some(next) => {
                debug!(
                    project = %self.id,
                    from = %self.state,
                    to = %next,
                    %transition,
                    "bundle transition"
                );
                self.state = next;
                if next == BundleState::Uninstalled {
                    self.pending.shift_remove(&Transition::Uninstall);
                }
                Ok(next)
            }
            None => {
                self.set_transition_error(transition, TransitionErrorKind::IllegalTransition);
                Err(TransitionError {
                    project: self.id.clone(),
                    state: self.state,
                    transition,
                })
            }
        }
    }

    pub fn add_pending_transition(&mut self, transition: Transition) -> bool {
        self.pending.insert(transition)
    }

    pub fn remove_pending_transition(&mut self, transition: Transition) -> bool {
        self.pending.shift_remove(&transition)
    }

    pub fn has_pending_transition(&self, transition: Transition) -> bool {
        self.pending.contains(&transition)
    }

    /// True if any of `transitions` is pending
    pub fn contains_pending_transition(&self, transitions: &[Transition]) -> bool {
        transitions.iter().any(|t| self.pending.contains(t))
    }

    pub fn pending_transitions(&self) -> impl Iterator<Item = &Transition> {
        self.pending.iter()
    }

    pub fn clear_pending_transitions(&mut self) {
        self.pending.clear();
    }

    /// Transition under execution, owned by the running executor
    pub fn current_transition(&self) -> Option<Transition> {
        self.current
    }

    pub fn set_current_transition(&mut self, transition: Option<Transition>) {
        self.current = transition;
    }

    pub fn set_transition_error(&mut self, transition: Transition, kind: TransitionErrorKind) {
        self.error = Some(TransitionFailure { transition, kind });
    }

    pub fn clear_transition_error(&mut self) {
        self.error = None;
    }

    pub fn has_transition_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn transition_error(&self) -> Option<TransitionFailure> {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Eager;

    impl ActivationPolicy for Eager {
        fn is_lazy(&self, _project: &ProjectId) -> bool {
            false
        }
    }

    struct Lazy;

    impl ActivationPolicy for Lazy {
        fn is_lazy(&self, _project: &ProjectId) -> bool {
            true
        }
    }

    #[test]
    fn test_eager_activation_sequence() {
        let mut node = BundleNode::new("a".into(), true);
        assert_eq!(node.transition(Transition::Install, &Eager).unwrap(), BundleState::Installed);
        assert_eq!(node.transition(Transition::Resolve, &Eager).unwrap(), BundleState::Resolved);
        assert_eq!(node.transition(Transition::Start, &Eager).unwrap(), BundleState::Active);
        assert!(!node.has_transition_error());
    }

    #[test]
    fn test_lazy_start_then_class_load() {
        let mut node = BundleNode::new("a".into(), true);
        node.transition(Transition::Install, &Lazy).unwrap();
        node.transition(Transition::Resolve, &Lazy).unwrap();
        assert_eq!(node.transition(Transition::Start, &Lazy).unwrap(), BundleState::Starting);
        assert_eq!(node.transition(Transition::LazyActivate, &Lazy).unwrap(), BundleState::Active);
    }

    #[test]
    fn test_illegal_transition_keeps_state_and_sets_sticky_error() {
        let mut node = BundleNode::new("a".into(), true);
        node.transition(Transition::Install, &Eager).unwrap();

        let err = node.transition(Transition::Start, &Eager).unwrap_err();
        assert_eq!(err.state, BundleState::Installed);
        assert_eq!(err.transition, Transition::Start);
        assert_eq!(node.state(), BundleState::Installed);

        // Error survives later successful transitions
        node.transition(Transition::Resolve, &Eager).unwrap();
        let failure = node.transition_error().unwrap();
        assert_eq!(failure.transition, Transition::Start);
        assert_eq!(failure.kind, TransitionErrorKind::IllegalTransition);

        node.clear_transition_error();
        assert!(!node.has_transition_error());
    }

    #[test]
    fn test_uninstall_clears_pending_marker_when_complete() {
        let mut node = BundleNode::new("a".into(), true);
        node.transition(Transition::Install, &Eager).unwrap();
        node.transition(Transition::Resolve, &Eager).unwrap();

        node.add_pending_transition(Transition::Uninstall);
        assert_eq!(node.transition(Transition::Uninstall, &Eager).unwrap(), BundleState::Installed);
        assert!(node.has_pending_transition(Transition::Uninstall));
        assert_eq!(
            node.transition(Transition::Unresolve, &Eager).unwrap(),
            BundleState::Uninstalled
        );
        assert!(!node.has_pending_transition(Transition::Uninstall));
    }

    #[test]
    fn test_pending_transitions_coexist() {
        let mut node = BundleNode::new("a".into(), false);
        assert!(node.add_pending_transition(Transition::ActivateProject));
        assert!(node.add_pending_transition(Transition::Build));
        assert!(!node.add_pending_transition(Transition::Build));

        assert!(node.contains_pending_transition(&[Transition::Stop, Transition::Build]));
        assert!(!node.contains_pending_transition(&[Transition::Stop]));

        assert!(node.remove_pending_transition(Transition::Build));
        assert_eq!(node.pending_transitions().count(), 1);
    }
}
