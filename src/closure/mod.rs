//! Dependency closures
//!
//! A closure decides which dependency-related peers join a seed set of
//! projects. [`DependencyOptions`] holds the closure in force for each
//! operation and [`ProjectSorter`] computes the expansion and processing
//! order.

pub mod options;
pub mod sorter;

pub use options::DependencyOptions;
pub use sorter::{ProjectSorter, SortedProjects};

use crate::error::InPlaceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Expansion strategy applied to a seed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Closure {
    /// Add every direct and indirect provider
    Providing,
    /// Add every direct and indirect requirer
    Requiring,
    RequiringThenProviding,
    ProvidingThenRequiring,
    /// The weakly-connected sub-graph around the seed
    PartialGraph,
    /// No expansion, only ordering
    Single,
}

/// Operations that carry their own closure setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ActivateProject,
    DeactivateProject,
    ActivateBundle,
    DeactivateBundle,
}

/// Which side of an edge is processed first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Providers before their requirers
    Activation,
    /// Requirers before their providers
    Deactivation,
}

impl Closure {
    pub const ALL: [Closure; 6] = [
        Closure::Providing,
        Closure::Requiring,
        Closure::RequiringThenProviding,
        Closure::ProvidingThenRequiring,
        Closure::PartialGraph,
        Closure::Single,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Closure::Providing => "providing",
            Closure::Requiring => "requiring",
            Closure::RequiringThenProviding => "requiring_then_providing",
            Closure::ProvidingThenRequiring => "providing_then_requiring",
            Closure::PartialGraph => "partial_graph",
            Closure::Single => "single",
        }
    }
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::ActivateProject,
        Operation::DeactivateProject,
        Operation::ActivateBundle,
        Operation::DeactivateBundle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::ActivateProject => "activate_project",
            Operation::DeactivateProject => "deactivate_project",
            Operation::ActivateBundle => "activate_bundle",
            Operation::DeactivateBundle => "deactivate_bundle",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Operation::ActivateProject | Operation::ActivateBundle => Direction::Activation,
            Operation::DeactivateProject | Operation::DeactivateBundle => Direction::Deactivation,
        }
    }

    pub fn is_bundle_operation(self) -> bool {
        matches!(self, Operation::ActivateBundle | Operation::DeactivateBundle)
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Closure {
    type Err = InPlaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Closure::ALL
            .into_iter()
            .find(|c| c.name() == normalized)
            .ok_or_else(|| InPlaceError::Config(format!("unknown closure '{}'", s)))
    }
}

impl FromStr for Operation {
    type Err = InPlaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == normalized)
            .ok_or_else(|| InPlaceError::Config(format!("unknown operation '{}'", s)))
    }
}
