//! Closure policy per operation

use super::{Closure, Operation};
use crate::error::{ClosureError, InPlaceResult};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::debug;

/// Current closure of each operation
///
/// Only explicitly set closures are stored; an operation without an entry
/// uses its default. A stored closure is always one of the operation's
/// allowed closures and there is exactly one current closure per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyOptions {
    current: IndexMap<Operation, Closure>,
}

impl DependencyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allowed_closures(op: Operation) -> &'static [Closure] {
        use Closure::*;

        match op {
            Operation::ActivateProject => &[Providing, RequiringThenProviding, PartialGraph],
            Operation::DeactivateProject => &[Requiring, ProvidingThenRequiring, PartialGraph],
            Operation::ActivateBundle => &[Providing, RequiringThenProviding, PartialGraph, Single],
            Operation::DeactivateBundle => {
                &[Requiring, ProvidingThenRequiring, PartialGraph, Single]
            }
        }
    }

    pub fn default_closure(op: Operation) -> Closure {
        match op {
            Operation::ActivateProject | Operation::ActivateBundle => Closure::Providing,
            Operation::DeactivateProject | Operation::DeactivateBundle => Closure::Requiring,
        }
    }

    pub fn is_allowed(op: Operation, closure: Closure) -> bool {
        Self::allowed_closures(op).contains(&closure)
    }

    /// Current closure of `op`, its default if none was set
    pub fn get(&self, op: Operation) -> Closure {
        self.current
            .get(&op)
            .copied()
            .unwrap_or_else(|| Self::default_closure(op))
    }

    /// True if `closure` is the current closure of `op`
    pub fn is_current(&self, op: Operation, closure: Closure) -> bool {
        self.get(op) == closure
    }

    pub fn is_default(op: Operation, closure: Closure) -> bool {
        Self::default_closure(op) == closure
    }

    /// Make `closure` current for `op`; rejected without change if not allowed
    pub fn set(&mut self, op: Operation, closure: Closure) -> Result<(), ClosureError> {
        if !Self::is_allowed(op, closure) {
            return Err(ClosureError { operation: op, closure });
        }

        debug!(operation = %op, closure = %closure, "dependency closure set");
        self.current.insert(op, closure);
        Ok(())
    }

    /// Drop an explicit setting so `op` falls back to its default
    pub fn reset(&mut self, op: Operation) {
        self.current.shift_remove(&op);
    }

    /// Closure to apply for `op` when run inside `enclosing`
    ///
    /// A bundle operation nested in a project operation of the same
    /// direction follows the closure of the project operation.
    pub fn effective(&self, op: Operation, enclosing: Option<Operation>) -> Closure {
        match enclosing {
            Some(outer)
                if op.is_bundle_operation()
                    && !outer.is_bundle_operation()
                    && outer.direction() == op.direction() =>
            {
                self.get(outer)
            }
            _ => self.get(op),
        }
    }

    /// Load settings kept by a preference store as operation-name -> closure-name
    pub fn from_map(map: &BTreeMap<String, String>) -> InPlaceResult<Self> {
        let mut options = DependencyOptions::new();
        for (op_name, closure_name) in map {
            let op: Operation = op_name.parse()?;
            let closure: Closure = closure_name.parse()?;
            options.set(op, closure)?;
        }
        Ok(options)
    }

    /// Every operation with its current closure, defaults included
    pub fn to_map(&self) -> BTreeMap<String, String> {
        Operation::ALL
            .into_iter()
            .map(|op| (op.name().to_string(), self.get(op).name().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InPlaceError;

    #[test]
    fn test_defaults() {
        let options = DependencyOptions::new();
        assert_eq!(options.get(Operation::ActivateProject), Closure::Providing);
        assert_eq!(options.get(Operation::DeactivateProject), Closure::Requiring);
        assert!(DependencyOptions::is_default(Operation::ActivateBundle, Closure::Providing));
        assert!(!DependencyOptions::is_default(Operation::ActivateBundle, Closure::Single));
    }

    #[test]
    fn test_set_rejects_disallowed_closure() {
        let mut options = DependencyOptions::new();
        let err = options.set(Operation::ActivateProject, Closure::Requiring).unwrap_err();
        assert_eq!(err.operation, Operation::ActivateProject);
        assert_eq!(err.closure, Closure::Requiring);
        assert_eq!(options.get(Operation::ActivateProject), Closure::Providing);
    }

    #[test]
    fn test_only_one_current_closure() {
        let mut options = DependencyOptions::new();
        options.set(Operation::ActivateBundle, Closure::Single).unwrap();
        options.set(Operation::ActivateBundle, Closure::PartialGraph).unwrap();

        let current: Vec<Closure> = Closure::ALL
            .into_iter()
            .filter(|c| options.is_current(Operation::ActivateBundle, *c))
            .collect();
        assert_eq!(current, vec![Closure::PartialGraph]);
    }

    #[test]
    fn test_bundle_operation_inherits_enclosing_closure() {
        let mut options = DependencyOptions::new();
        options.set(Operation::ActivateProject, Closure::PartialGraph).unwrap();
        options.set(Operation::ActivateBundle, Closure::Single).unwrap();

        assert_eq!(
            options.effective(Operation::ActivateBundle, Some(Operation::ActivateProject)),
            Closure::PartialGraph
        );
        assert_eq!(options.effective(Operation::ActivateBundle, None), Closure::Single);
        // Opposite direction does not inherit
        assert_eq!(
            options.effective(Operation::ActivateBundle, Some(Operation::DeactivateProject)),
            Closure::Single
        );
    }

    #[test]
    fn test_map_conversion() {
        let mut map = BTreeMap::new();
        map.insert("deactivate_bundle".to_string(), "single".to_string());
        let options = DependencyOptions::from_map(&map).unwrap();
        assert_eq!(options.get(Operation::DeactivateBundle), Closure::Single);

        let stored = options.to_map();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored["activate_project"], "providing");
        assert_eq!(stored["deactivate_bundle"], "single");

        map.insert("activate_project".to_string(), "requiring".to_string());
        assert!(matches!(DependencyOptions::from_map(&map), Err(InPlaceError::Closure(_))));
    }
}
