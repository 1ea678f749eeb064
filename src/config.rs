//! Settings parsing for inplace.toml files

use crate::closure::DependencyOptions;
use crate::error::{InPlaceError, InPlaceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// All settings of the life-cycle core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lifecycle: LifecycleSettings,
    /// Operation name to closure name, as kept by the preference store
    pub closures: BTreeMap<String, String>,
}

/// Timeouts and policies applied by the executors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// How long to wait for a bundle's start or stop code
    pub timeout_ms: u64,
    pub timeout_policy: TimeoutPolicy,
    /// How long to wait for a running build before resolving
    pub build_wait_ms: u64,
    pub activate_on_compile_error: bool,
    pub external_policy: ExternalPolicy,
}

/// What happens when a start or stop exceeds the timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// End the run as cancelled
    Cancel,
    /// Deactivate the stuck project and continue
    Deactivate,
    /// Record an error for manual termination and continue
    Terminate,
}

/// Reaction to a bundle uninstalled outside of the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalPolicy {
    /// Ask the registered decision service, deactivate if there is none
    Ask,
    Restore,
    Deactivate,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        LifecycleSettings {
            timeout_ms: 5000,
            timeout_policy: TimeoutPolicy::Cancel,
            build_wait_ms: 30_000,
            activate_on_compile_error: false,
            external_policy: ExternalPolicy::Ask,
        }
    }
}

impl LifecycleSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn build_wait(&self) -> Duration {
        Duration::from_millis(self.build_wait_ms)
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> InPlaceResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            InPlaceError::Io(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> InPlaceResult<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| InPlaceError::Config(e.to_string()))?;
        // Reject unknown or disallowed closures up front
        settings.dependency_options()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> InPlaceResult<String> {
        toml::to_string(self).map_err(|e| InPlaceError::Config(e.to_string()))
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> InPlaceResult<()> {
        fs::write(path.as_ref(), self.to_toml()?).map_err(|e| {
            InPlaceError::Io(format!("Failed to write {}: {}", path.as_ref().display(), e))
        })
    }

    pub fn dependency_options(&self) -> InPlaceResult<DependencyOptions> {
        DependencyOptions::from_map(&self.closures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::{Closure, Operation};

    #[test]
    fn test_defaults_when_empty() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.lifecycle.timeout(), Duration::from_secs(5));
        assert_eq!(settings.lifecycle.timeout_policy, TimeoutPolicy::Cancel);
        assert_eq!(settings.lifecycle.external_policy, ExternalPolicy::Ask);
        assert!(!settings.lifecycle.activate_on_compile_error);
        assert!(settings.closures.is_empty());
    }

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::from_toml(
            r#"
[lifecycle]
timeout_ms = 250
timeout_policy = "deactivate"
activate_on_compile_error = true
external_policy = "restore"

[closures]
activate_project = "partial_graph"
"#,
        )
        .unwrap();

        assert_eq!(settings.lifecycle.timeout_ms, 250);
        assert_eq!(settings.lifecycle.timeout_policy, TimeoutPolicy::Deactivate);
        assert_eq!(settings.lifecycle.external_policy, ExternalPolicy::Restore);
        assert!(settings.lifecycle.activate_on_compile_error);

        let options = settings.dependency_options().unwrap();
        assert_eq!(options.get(Operation::ActivateProject), Closure::PartialGraph);
    }

    #[test]
    fn test_disallowed_closure_rejected() {
        let result = Settings::from_toml(
            r#"
[closures]
deactivate_project = "providing"
"#,
        );
        assert!(matches!(result, Err(InPlaceError::Closure(_))));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result = Settings::from_toml(
            r#"
[lifecycle]
timeout_policy = "panic"
"#,
        );
        assert!(matches!(result, Err(InPlaceError::Config(_))));
    }
}
