//! Toolchain subprocess abstraction.
//!
//! The pipeline never shells out directly; it asks a [`ToolchainRunner`]
//! to execute one of five well-known commands inside the workspace. The
//! production implementation wraps the Terraform CLI (simulator-flavored
//! where appropriate); tests substitute a scripted runner.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// The toolchain commands the pipeline can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCommand {
    /// Initialize the backend and providers.
    Init,
    /// Syntactic validation of the configuration.
    Validate,
    /// Produce an execution plan against the simulator.
    Plan,
    /// Apply the plan.
    Apply,
    /// Run the user-supplied verification script.
    Verify,
}

impl ToolCommand {
    /// Program and arguments for the real CLI.
    fn command_line(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            ToolCommand::Init => ("tflocal", &["init", "-upgrade"]),
            ToolCommand::Validate => ("terraform", &["validate"]),
            ToolCommand::Plan => ("tflocal", &["plan"]),
            ToolCommand::Apply => ("tflocal", &["apply", "-auto-approve"]),
            ToolCommand::Verify => ("python3", &["test_infra.py"]),
        }
    }

    /// Stage name used in reports.
    pub fn stage_name(&self) -> &'static str {
        match self {
            ToolCommand::Init => "setup",
            ToolCommand::Validate => "validate",
            ToolCommand::Plan => "plan",
            ToolCommand::Apply => "apply",
            ToolCommand::Verify => "verify",
        }
    }
}

/// Captured output of one subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Process exit code (-1 when unavailable).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-empty stdout lines, trimmed.
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Executes toolchain commands in a workspace directory.
#[async_trait]
pub trait ToolchainRunner: Send + Sync {
    /// Run one command to completion, capturing stdio.
    async fn run(&self, command: ToolCommand, workspace: &Path) -> Result<CommandOutput>;
}

/// Real toolchain runner shelling out to the Terraform CLI.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    /// Wall-clock cap per invocation.
    pub timeout: Duration,
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
        }
    }
}

impl TerraformCli {
    /// Runner with a custom per-invocation timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolchainRunner for TerraformCli {
    async fn run(&self, command: ToolCommand, workspace: &Path) -> Result<CommandOutput> {
        let (program, args) = command.command_line();
        debug!(stage = command.stage_name(), program, "running toolchain command");

        let future = tokio::process::Command::new(program)
            .args(args)
            .current_dir(workspace)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| PipelineError::Subprocess {
                command: program.to_string(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| PipelineError::Subprocess {
                command: program.to_string(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Files and directories purged from the workspace before a run.
pub const WORKSPACE_STATE_ENTRIES: [&str; 5] = [
    ".terraform",
    ".terraform.lock.hcl",
    "terraform.tfstate",
    "terraform.tfstate.backup",
    "localstack_providers_override.tf",
];

/// Remove stale toolchain state from the workspace, creating the
/// directory if needed.
pub fn purge_workspace(workspace: &Path) -> Result<()> {
    std::fs::create_dir_all(workspace)?;
    for entry in WORKSPACE_STATE_ENTRIES {
        let path = workspace.join(entry);
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Write the configuration and verification script into the workspace.
pub fn write_artifacts(workspace: &Path, hcl_code: &str, test_script: &str) -> Result<()> {
    std::fs::write(workspace.join("main.tf"), hcl_code)?;
    std::fs::write(workspace.join("test_infra.py"), test_script)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        assert_eq!(ToolCommand::Validate.stage_name(), "validate");
        assert_eq!(ToolCommand::Verify.stage_name(), "verify");
    }

    #[test]
    fn purge_clears_state_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".terraform")).unwrap();
        std::fs::write(dir.path().join("terraform.tfstate"), "{}").unwrap();
        std::fs::write(dir.path().join("main.tf"), "# keep").unwrap();

        purge_workspace(dir.path()).unwrap();

        assert!(!dir.path().join(".terraform").exists());
        assert!(!dir.path().join("terraform.tfstate").exists());
        assert!(dir.path().join("main.tf").exists());
    }

    #[test]
    fn write_artifacts_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), "resource {}", "print('ok')").unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.tf")).unwrap(),
            "resource {}"
        );
        assert!(dir.path().join("test_infra.py").exists());
    }
}
