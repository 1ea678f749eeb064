//! Bundle life-cycle states and the transition table
//!
//! States are a closed enum; the legal transitions are one `match` in
//! [`BundleState::next`]. Everything else about a bundle (pending transitions,
//! sticky errors, activation flag) lives in [`BundleNode`].

pub mod node;
pub mod registry;

pub use node::{BundleNode, TransitionFailure};
pub use registry::BundleRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Life-cycle state of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BundleState {
    /// Known project without a bundle
    StateLess,
    Uninstalled,
    Installed,
    Resolved,
    /// Started with a lazy activation policy, waiting for the first class load
    Starting,
    Active,
    Stopping,
}

/// Transitions a bundle can be asked to perform or have pending
///
/// `Reset`, `ActivateProject`, `Deactivate`, `External` and `Build` are
/// bookkeeping markers for pending work; none of them moves a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    Install,
    Uninstall,
    Resolve,
    Unresolve,
    Start,
    LazyActivate,
    Stop,
    Update,
    Refresh,
    Reset,
    ActivateProject,
    Deactivate,
    External,
    Build,
}

/// Kind of failure recorded on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionErrorKind {
    IllegalTransition,
    BuildErrors,
    Unresolved,
    Timeout,
    ActivatorFailed,
    ExternalUninstall,
}

impl BundleState {
    pub const ALL: [BundleState; 7] = [
        BundleState::StateLess,
        BundleState::Uninstalled,
        BundleState::Installed,
        BundleState::Resolved,
        BundleState::Starting,
        BundleState::Active,
        BundleState::Stopping,
    ];

    /// Destination of `transition` from this state, `None` when illegal
    ///
    /// `uninstalling` is true while an `Uninstall` is pending on the node;
    /// it lets the `Unresolve` event complete the uninstall of an installed
    /// bundle. `is_lazy` is only consulted for `Start` from `Resolved`.
    pub fn next<F>(
        self,
        transition: Transition,
        uninstalling: bool,
        is_lazy: F,
    ) -> Option<BundleState>
    where
        F: FnOnce() -> bool,
    {
        use BundleState::*;
        use Transition::*;

        match (self, transition) {
            (StateLess, Install) | (Uninstalled, Install) => Some(Installed),
            (Installed, Resolve) => Some(Resolved),
            (Installed, Unresolve) if uninstalling => Some(Uninstalled),
            (Resolved, Uninstall) => Some(Installed),
            (Resolved, Unresolve) | (Resolved, Refresh) | (Resolved, Update) => Some(Installed),
            (Resolved, Start) => Some(if is_lazy() { Starting } else { Active }),
            (Starting, Start) | (Starting, LazyActivate) => Some(Active),
            (Starting, Stop) | (Starting, Refresh) => Some(Resolved),
            (Active, Stop) => Some(Resolved),
            _ => None,
        }
    }

    /// A bundle exists in the framework
    pub fn is_installed(self) -> bool {
        !matches!(self, BundleState::StateLess | BundleState::Uninstalled)
    }

    /// Resolved or further along
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            BundleState::Resolved
                | BundleState::Starting
                | BundleState::Active
                | BundleState::Stopping
        )
    }

    /// Started, eagerly or lazily
    pub fn is_running(self) -> bool {
        matches!(self, BundleState::Starting | BundleState::Active)
    }
}

impl Transition {
    pub const ALL: [Transition; 14] = [
        Transition::Install,
        Transition::Uninstall,
        Transition::Resolve,
        Transition::Unresolve,
        Transition::Start,
        Transition::LazyActivate,
        Transition::Stop,
        Transition::Update,
        Transition::Refresh,
        Transition::Reset,
        Transition::ActivateProject,
        Transition::Deactivate,
        Transition::External,
        Transition::Build,
    ];
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BundleState::StateLess => "stateless",
            BundleState::Uninstalled => "uninstalled",
            BundleState::Installed => "installed",
            BundleState::Resolved => "resolved",
            BundleState::Starting => "starting",
            BundleState::Active => "active",
            BundleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Install => "install",
            Transition::Uninstall => "uninstall",
            Transition::Resolve => "resolve",
            Transition::Unresolve => "unresolve",
            Transition::Start => "start",
            Transition::LazyActivate => "lazy activate",
            Transition::Stop => "stop",
            Transition::Update => "update",
            Transition::Refresh => "refresh",
            Transition::Reset => "reset",
            Transition::ActivateProject => "activate project",
            Transition::Deactivate => "deactivate",
            Transition::External => "external",
            Transition::Build => "build",
        };
        f.write_str(name)
    }
}

impl fmt::Display for TransitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            TransitionErrorKind::IllegalTransition => "illegal state transition",
            TransitionErrorKind::BuildErrors => "project has build errors",
            TransitionErrorKind::Unresolved => "bundle could not be resolved",
            TransitionErrorKind::Timeout => "timed out waiting for the bundle",
            TransitionErrorKind::ActivatorFailed => "bundle activator failed",
            TransitionErrorKind::ExternalUninstall => "uninstalled outside of the workspace",
        };
        f.write_str(message)
    }
}
