//! Workspace manifest parsing (workspace.toml)
//!
//! The manifest is the one file the core reads: the list of projects with
//! their declared requirements and initial flags.

use crate::error::{InPlaceError, InPlaceResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Parsed workspace manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceManifest {
    #[serde(rename = "project", default)]
    pub projects: Vec<ProjectSpec>,
}

/// One `[[project]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub name: String,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub activated: bool,
    #[serde(default)]
    pub lazy: bool,
    #[serde(default)]
    pub build_errors: bool,
    /// Simulated duration of the bundle's start code
    #[serde(default)]
    pub start_delay_ms: u64,
}

impl ProjectSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ProjectSpec {
            name: name.into(),
            requires: vec![],
            activated: false,
            lazy: false,
            build_errors: false,
            start_delay_ms: 0,
        }
    }

    pub fn requires<I, S>(mut self, projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = projects.into_iter().map(Into::into).collect();
        self
    }

    pub fn activated(mut self, activated: bool) -> Self {
        self.activated = activated;
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn build_errors(mut self, build_errors: bool) -> Self {
        self.build_errors = build_errors;
        self
    }

    pub fn start_delay_ms(mut self, delay: u64) -> Self {
        self.start_delay_ms = delay;
        self
    }
}

impl WorkspaceManifest {
    /// Load a manifest from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> InPlaceResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            InPlaceError::Io(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;

        Self::from_toml(&content)
    }

    /// Parse a manifest and check that every requirement names a declared project
    pub fn from_toml(content: &str) -> InPlaceResult<Self> {
        let manifest: WorkspaceManifest =
            toml::from_str(content).map_err(|e| InPlaceError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> InPlaceResult<()> {
        let mut seen = std::collections::HashSet::new();
        for project in &self.projects {
            if !seen.insert(project.name.as_str()) {
                return Err(InPlaceError::Manifest(format!(
                    "project '{}' is declared twice",
                    project.name
                )));
            }
        }

        for project in &self.projects {
            if let Some(missing) = project.requires.iter().find(|r| !seen.contains(r.as_str())) {
                return Err(InPlaceError::Manifest(format!(
                    "project '{}' requires unknown project '{}'",
                    project.name, missing
                )));
            }
        }

        Ok(())
    }

    pub fn to_toml(&self) -> InPlaceResult<String> {
        toml::to_string(self).map_err(|e| InPlaceError::Manifest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let manifest = WorkspaceManifest::from_toml(
            r#"
[[project]]
name = "core"
activated = true

[[project]]
name = "ui"
requires = ["core"]
lazy = true
"#,
        )
        .unwrap();

        assert_eq!(manifest.projects.len(), 2);
        assert!(manifest.projects[0].activated);
        assert!(manifest.projects[0].requires.is_empty());
        assert_eq!(manifest.projects[1].requires, vec!["core"]);
        assert!(manifest.projects[1].lazy);
        assert!(!manifest.projects[1].activated);
    }

    #[test]
    fn test_unknown_requirement_rejected() {
        let result = WorkspaceManifest::from_toml(
            r#"
[[project]]
name = "ui"
requires = ["missing"]
"#,
        );
        assert!(matches!(result, Err(InPlaceError::Manifest(_))));
    }

    #[test]
    fn test_duplicate_project_rejected() {
        let manifest = WorkspaceManifest {
            projects: vec![ProjectSpec::new("a"), ProjectSpec::new("a")],
        };
        assert!(manifest.validate().is_err());
    }
}
