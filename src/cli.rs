//! Command-line interface for inplace
//!
//! Loads a workspace manifest, builds a life-cycle service over it and
//! drives it from the command line: preview a dependency closure, run a
//! sequence of commands, or show the initial bundle states.

use clap::{Parser, Subcommand};
use colored::*;
use indexmap::IndexSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::closure::{Closure, DependencyOptions, Operation, ProjectSorter};
use crate::config::Settings;
use crate::error::{ClosureError, InPlaceError, InPlaceResult};
use crate::executor::{Command, RunResult, RunStatus};
use crate::project::ProjectId;
use crate::service::LifecycleService;
use crate::workspace::{
    ActivationState, MemoryWorkspace, ServiceRegistry, Severity, WorkspaceManifest,
};

/// In-place bundle life-cycle manager
#[derive(Parser)]
#[command(name = "inplace")]
#[command(about = "Activate, deactivate and refresh workspace bundles in place")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Workspace manifest
    #[arg(short, long, global = true, default_value = "workspace.toml")]
    pub workspace: PathBuf,

    /// Settings file
    #[arg(short = 'c', long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the processing order of an operation without running it
    Plan {
        /// activate-project, deactivate-project, activate-bundle or deactivate-bundle
        operation: Operation,

        /// Closure to use instead of the configured one
        #[arg(long)]
        closure: Option<Closure>,

        /// Projects to start from
        #[arg(required = true)]
        projects: Vec<String>,
    },

    /// Run commands in order, each written as `command:project,project`
    Run {
        #[arg(required = true)]
        steps: Vec<String>,
    },

    /// List the projects of the workspace
    Status,
}

/// One parsed `command:project,...` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub command: Command,
    pub projects: Vec<ProjectId>,
}

impl std::str::FromStr for Step {
    type Err = InPlaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (command, projects) = s.split_once(':').ok_or_else(|| {
            InPlaceError::Config(format!("expected command:projects, got '{}'", s))
        })?;
        let projects: Vec<ProjectId> = projects
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ProjectId::from)
            .collect();
        if projects.is_empty() {
            return Err(InPlaceError::Config(format!("no projects given in '{}'", s)));
        }
        Ok(Step {
            command: command.parse()?,
            projects,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CliContext {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Instant,
}

impl CliContext {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            verbose,
            quiet,
            start_time: Instant::now(),
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{}", message);
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("{} {}", "verbose:".dimmed(), message.dimmed());
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", "warning:".yellow().bold(), message);
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "error:".red().bold(), message);
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", "success:".green().bold(), message);
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }
}

/// Loads the workspace and carries out CLI commands
pub struct Driver {
    context: CliContext,
    workspace: Arc<MemoryWorkspace>,
    settings: Settings,
}

impl Driver {
    pub fn load(context: CliContext, cli: &Cli) -> InPlaceResult<Self> {
        let manifest = WorkspaceManifest::from_file(&cli.workspace)?;
        context.verbose(&format!(
            "Loaded {} projects from {}",
            manifest.projects.len(),
            cli.workspace.display()
        ));

        let settings = match &cli.settings {
            Some(path) => {
                context.verbose(&format!("Using settings from {}", path.display()));
                Settings::from_file(path)?
            }
            None => Settings::default(),
        };

        Ok(Self {
            context,
            workspace: Arc::new(MemoryWorkspace::from_manifest(&manifest)?),
            settings,
        })
    }

    /// Returns false if any step reported an error
    pub fn execute(&self, command: &Commands) -> InPlaceResult<bool> {
        match command {
            Commands::Plan {
                operation,
                closure,
                projects,
            } => self.plan(*operation, *closure, projects).map(|()| true),
            Commands::Run { steps } => self.run(steps),
            Commands::Status => {
                self.status();
                Ok(true)
            }
        }
    }

    fn plan(
        &self,
        operation: Operation,
        closure: Option<Closure>,
        projects: &[String],
    ) -> InPlaceResult<()> {
        let options = self.settings.dependency_options()?;
        let closure = match closure {
            Some(closure) => {
                if !DependencyOptions::is_allowed(operation, closure) {
                    return Err(ClosureError { operation, closure }.into());
                }
                closure
            }
            None => options.get(operation),
        };

        let seed: IndexSet<ProjectId> = projects
            .iter()
            .map(|p| self.project(p))
            .collect::<InPlaceResult<_>>()?;
        let sorter = ProjectSorter::new(self.workspace.as_ref());
        let sorted = sorter.plan(&seed, closure, operation.direction());

        self.context.info(&format!(
            "{} {} with {} closure:",
            operation.to_string().bold(),
            projects.join(", "),
            closure
        ));
        for (index, block) in sorted.blocks().iter().enumerate() {
            let names: Vec<&str> = block.iter().map(ProjectId::as_str).collect();
            let line = format!("{:>3}. {}", index + 1, names.join(" + "));
            if block.len() > 1 {
                self.context.info(&format!("{} {}", line, "(cycle)".dimmed()));
            } else {
                self.context.info(&line);
            }
        }
        Ok(())
    }

    fn run(&self, steps: &[String]) -> InPlaceResult<bool> {
        let steps = steps.iter().map(|s| s.parse::<Step>()).collect::<InPlaceResult<Vec<_>>>()?;
        for step in &steps {
            for project in &step.projects {
                self.project(project.as_str())?;
            }
        }

        let services = ServiceRegistry::from_workspace(self.workspace.clone());
        let service = LifecycleService::new(services, &self.settings)?;

        let mut clean = true;
        for step in steps {
            self.context.verbose(&format!(
                "Submitting {} for {} projects",
                step.command,
                step.projects.len()
            ));
            let result = service.run(step.command, step.projects)?;
            clean &= !result.has_errors();
            self.report(&result);
        }

        if !self.context.quiet {
            println!();
            for snapshot in service.snapshot() {
                let flag = if snapshot.activated {
                    "activated".green()
                } else {
                    "deactivated".dimmed()
                };
                println!(
                    "  {:<24} {:<12} {}",
                    snapshot.project.as_str(),
                    snapshot.state.to_string(),
                    flag
                );
            }
        }
        service.shutdown();

        self.context.verbose(&format!("Finished in {} ms", self.context.elapsed_ms()));
        Ok(clean)
    }

    fn report(&self, result: &RunResult) {
        let header = format!("[{}] {}", result.id, result.command);
        match &result.status {
            RunStatus::Completed if result.errors.is_empty() => self.context.success(&format!(
                "{}: {} projects done",
                header,
                result.success.len()
            )),
            RunStatus::Completed => self.context.warn(&format!(
                "{}: {} done, {} failed",
                header,
                result.success.len(),
                result.errors.len()
            )),
            RunStatus::Cancelled => self.context.warn(&format!(
                "{}: cancelled, {} projects pending",
                header,
                result.pending.len()
            )),
            RunStatus::Fatal(reason) => self.context.error(&format!("{}: {}", header, reason)),
        }

        for record in &result.transitions {
            self.context.verbose(&format!(
                "{} {} -> {}",
                record.project, record.transition, record.state
            ));
        }
        for status in &result.warnings {
            match status.severity {
                Severity::Info => self.context.verbose(&status.message),
                _ => self.context.warn(&status.message),
            }
        }
        for status in &result.errors {
            self.context.error(&status.message);
        }
    }

    fn status(&self) {
        let workspace = self.workspace.as_ref();
        for project in workspace.projects() {
            let flag = if workspace.is_activated(project) {
                "activated".green()
            } else {
                "deactivated".dimmed()
            };
            println!("  {:<24} {}", project.as_str(), flag);
        }
    }

    fn project(&self, name: &str) -> InPlaceResult<ProjectId> {
        let project = ProjectId::from(name);
        if self.workspace.contains(&project) {
            Ok(project)
        } else {
            Err(InPlaceError::UnknownProject(project))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step() {
        let step: Step = "activate:app, lib".parse().unwrap();
        assert_eq!(step.command, Command::ActivateProject);
        assert_eq!(step.projects, vec![ProjectId::from("app"), ProjectId::from("lib")]);

        assert!("activate".parse::<Step>().is_err());
        assert!("activate:".parse::<Step>().is_err());
        assert!("launch:app".parse::<Step>().is_err());
    }

    #[test]
    fn test_cli_parses_plan() {
        let cli = Cli::try_parse_from([
            "inplace",
            "-w",
            "ws.toml",
            "plan",
            "deactivate-project",
            "--closure",
            "partial-graph",
            "base",
        ])
        .unwrap();
        match cli.command {
            Commands::Plan {
                operation,
                closure,
                projects,
            } => {
                assert_eq!(operation, Operation::DeactivateProject);
                assert_eq!(closure, Some(Closure::PartialGraph));
                assert_eq!(projects, vec!["base".to_string()]);
            }
            _ => panic!("Expected plan command"),
        }
    }
}
