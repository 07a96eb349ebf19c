//! The five-stage self-healing verification pipeline.
//!
//! Stages run in order: Setup, Validate, Plan, Apply, Verify. Validate,
//! Plan and Apply failures feed a bounded repair loop (deterministic
//! fixers first, model repair second) that rewrites `main.tf` and
//! restarts from Validate. Verify failures surface directly: a failing
//! verifier means a design error, not a code typo.
//!
//! The pipeline is built to run on a worker task. Stage completions are
//! pushed through a bounded channel as they happen; a dropped receiver is
//! treated as cancellation and honored at the next stage boundary, never
//! by interrupting a subprocess mid-flight.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use llm::{GenerateRequest, ModelBackend, RetryPolicy};

use crate::command::{
    purge_workspace, write_artifacts, CommandOutput, ToolCommand, ToolchainRunner,
};
use crate::error::{PipelineError, Result};
use crate::{fixers, policy, status};

/// How far the pipeline is allowed to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Full run against the simulator, through Apply and Verify.
    Deploy,
    /// Stop after Plan (optionally with a simulated apply/verify).
    Draft,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Deploy
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(ExecutionMode::Deploy),
            "draft" => Ok(ExecutionMode::Draft),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    /// The stage passed.
    Success,
    /// The stage failed.
    Failed,
}

/// Report for one completed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name (`setup`, `validate`, `plan`, `apply`, `verify`).
    pub name: String,
    /// Pass/fail outcome.
    pub status: StageOutcome,
    /// Captured output lines.
    pub logs: Vec<String>,
    /// Error text when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    fn success(name: &str, logs: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            status: StageOutcome::Success,
            logs,
            error: None,
        }
    }

    fn failed(name: &str, logs: Vec<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: StageOutcome::Failed,
            logs,
            error: Some(error.into()),
        }
    }
}

/// Final pipeline outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Whether the run ended with every stage passing.
    pub success: bool,
    /// The configuration as last written (post-repair).
    pub hcl_code: String,
    /// Every stage report, in execution order, including retried stages.
    pub stages: Vec<StageReport>,
    /// Human-readable summary.
    pub final_message: String,
    /// Per-resource verification status.
    #[serde(default)]
    pub resource_statuses: BTreeMap<String, String>,
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory the toolchain runs in.
    pub workspace_dir: PathBuf,
    /// Repair attempts before giving up.
    pub max_retries: u32,
    /// Deploy or draft.
    pub execution_mode: ExecutionMode,
    /// In draft mode, synthesize apply/verify stages instead of stopping.
    pub simulate_apply: bool,
}

impl PipelineConfig {
    /// Configuration with defaults for the given workspace.
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            max_retries: 3,
            execution_mode: ExecutionMode::default(),
            simulate_apply: false,
        }
    }

    /// Set the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Enable synthetic apply/verify in draft mode.
    pub fn with_simulated_apply(mut self, simulate: bool) -> Self {
        self.simulate_apply = simulate;
        self
    }
}

/// Drives the five stages, the repair loop and stage streaming.
pub struct PipelineManager {
    toolchain: Arc<dyn ToolchainRunner>,
    model: Arc<dyn ModelBackend>,
    retry_policy: RetryPolicy,
    config: PipelineConfig,
}

impl PipelineManager {
    /// Create a manager over the given toolchain and repair model.
    pub fn new(
        toolchain: Arc<dyn ToolchainRunner>,
        model: Arc<dyn ModelBackend>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            toolchain,
            model,
            retry_policy: RetryPolicy::default(),
            config,
        }
    }

    /// Run the pipeline on a worker task. Stage reports stream through the
    /// returned receiver as stages complete; the join handle resolves to
    /// the final result.
    pub fn spawn(
        self: Arc<Self>,
        hcl_code: String,
        test_script: String,
        expected_ids: Vec<String>,
    ) -> (mpsc::Receiver<StageReport>, JoinHandle<Result<PipelineResult>>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move {
            self.run(&hcl_code, &test_script, &expected_ids, tx).await
        });
        (rx, handle)
    }

    /// Run the pipeline to completion, pushing each stage report into
    /// `stage_tx`.
    pub async fn run(
        &self,
        hcl_code: &str,
        test_script: &str,
        expected_ids: &[String],
        stage_tx: mpsc::Sender<StageReport>,
    ) -> Result<PipelineResult> {
        let mut stages: Vec<StageReport> = Vec::new();
        let mut current_hcl = hcl_code.to_string();
        let workspace = self.config.workspace_dir.clone();

        // --- Setup ---
        purge_workspace(&workspace)?;
        write_artifacts(&workspace, &current_hcl, test_script)?;
        let init = self.toolchain.run(ToolCommand::Init, &workspace).await?;
        let setup = if init.success() {
            StageReport::success("setup", init.stdout_lines())
        } else {
            StageReport::failed("setup", init.stdout_lines(), trim_excerpt(&init.stderr))
        };
        let setup_failed = setup.status == StageOutcome::Failed;
        Self::emit(&stage_tx, &mut stages, setup).await?;
        if setup_failed {
            return Ok(Self::finish(
                false,
                current_hcl,
                stages,
                "Workspace setup failed.",
                BTreeMap::new(),
            ));
        }

        // --- Retry loop over Validate / Plan / Apply ---
        for attempt in 1..=self.config.max_retries {
            info!(attempt, max = self.config.max_retries, "pipeline attempt");

            // Validate: toolchain + static policy.
            let output = self.toolchain.run(ToolCommand::Validate, &workspace).await?;
            let violations = policy::check_security_group_rules(&current_hcl);
            let report = if !output.success() {
                StageReport::failed("validate", capture_logs(&output), trim_excerpt(&output.stderr))
            } else if !violations.is_empty() {
                let detail = violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                StageReport::failed(
                    "validate",
                    capture_logs(&output),
                    format!("static policy violation: {detail}"),
                )
            } else {
                StageReport::success("validate", capture_logs(&output))
            };
            if let Some(error) = Self::emit_and_check(&stage_tx, &mut stages, report).await? {
                current_hcl = self.repair("validate", &error, &current_hcl).await?;
                write_artifacts(&workspace, &current_hcl, test_script)?;
                continue;
            }

            // Plan.
            let output = self.toolchain.run(ToolCommand::Plan, &workspace).await?;
            let report = if output.success() {
                StageReport::success("plan", capture_logs(&output))
            } else {
                StageReport::failed("plan", capture_logs(&output), trim_excerpt(&output.stderr))
            };
            if let Some(error) = Self::emit_and_check(&stage_tx, &mut stages, report).await? {
                current_hcl = self.repair("plan", &error, &current_hcl).await?;
                write_artifacts(&workspace, &current_hcl, test_script)?;
                continue;
            }

            // Draft mode ends here, with or without a simulated tail.
            if self.config.execution_mode == ExecutionMode::Draft {
                if !self.config.simulate_apply {
                    return Ok(Self::finish(
                        true,
                        current_hcl,
                        stages,
                        "Draft plan complete (stopped before apply).",
                        BTreeMap::new(),
                    ));
                }
                return self
                    .simulated_tail(current_hcl, stages, expected_ids, &stage_tx)
                    .await;
            }

            // Apply.
            let output = self.toolchain.run(ToolCommand::Apply, &workspace).await?;
            let report = if output.success() {
                StageReport::success("apply", capture_logs(&output))
            } else {
                StageReport::failed("apply", capture_logs(&output), trim_excerpt(&output.stderr))
            };
            if let Some(error) = Self::emit_and_check(&stage_tx, &mut stages, report).await? {
                current_hcl = self.repair("apply", &error, &current_hcl).await?;
                write_artifacts(&workspace, &current_hcl, test_script)?;
                continue;
            }

            // Verify: no repair path, design errors surface.
            let output = self.toolchain.run(ToolCommand::Verify, &workspace).await?;
            let logs = capture_logs(&output);
            let mut statuses = status::parse_status_map(&logs).unwrap_or_default();
            let report = if statuses.is_empty() {
                StageReport::failed("verify", logs, "no status map")
            } else {
                let failed = status::reconcile(&mut statuses, expected_ids);
                if !output.success() {
                    StageReport::failed("verify", logs, trim_excerpt(&output.stderr))
                } else if !failed.is_empty() {
                    StageReport::failed(
                        "verify",
                        logs,
                        format!("verification failed for: {}", failed.join(", ")),
                    )
                } else {
                    StageReport::success("verify", logs)
                }
            };
            let verified = report.status == StageOutcome::Success;
            Self::emit(&stage_tx, &mut stages, report).await?;

            return Ok(if verified {
                Self::finish(
                    true,
                    current_hcl,
                    stages,
                    "Infrastructure deployed and verified successfully.",
                    statuses,
                )
            } else {
                Self::finish(
                    false,
                    current_hcl,
                    stages,
                    "Deployment succeeded, but the verification script failed.",
                    statuses,
                )
            });
        }

        let last_error = stages
            .iter()
            .rev()
            .find_map(|s| s.error.clone())
            .unwrap_or_else(|| "unknown stage failure".to_string());
        Ok(Self::finish(
            false,
            current_hcl,
            stages,
            format!(
                "Pipeline failed after {} attempts: {last_error}",
                self.config.max_retries
            ),
            BTreeMap::new(),
        ))
    }

    /// Deterministic fixers first; the model only when they change
    /// nothing.
    async fn repair(&self, stage: &str, error: &str, hcl: &str) -> Result<String> {
        let fixed = fixers::apply_all(hcl);
        if fixed != hcl {
            info!(stage, "deterministic fixers rewrote the configuration");
            return Ok(fixed);
        }

        warn!(stage, "escalating to model repair");
        let prompt = repair_prompt(stage, error, hcl);
        let response =
            llm::generate_with_retry(self.model.as_ref(), &GenerateRequest::text(prompt), &self.retry_policy)
                .await?;
        Ok(strip_hcl_fences(&response))
    }

    /// Synthetic apply/verify reports for draft mode with simulation on.
    async fn simulated_tail(
        &self,
        hcl_code: String,
        mut stages: Vec<StageReport>,
        expected_ids: &[String],
        stage_tx: &mpsc::Sender<StageReport>,
    ) -> Result<PipelineResult> {
        let apply = StageReport::success(
            "apply",
            vec![
                format!(
                    "Apply complete! Resources: {} added, 0 changed, 0 destroyed.",
                    expected_ids.len()
                ),
                "(simulated)".to_string(),
            ],
        );
        Self::emit(stage_tx, &mut stages, apply).await?;

        let statuses: BTreeMap<String, String> = expected_ids
            .iter()
            .map(|id| (id.clone(), "success".to_string()))
            .collect();
        let status_line = serde_json::to_string(&statuses).unwrap_or_default();
        let verify = StageReport::success(
            "verify",
            vec!["Simulated verification complete.".to_string(), status_line],
        );
        Self::emit(stage_tx, &mut stages, verify).await?;

        Ok(Self::finish(
            true,
            hcl_code,
            stages,
            "Draft plan complete (apply and verify simulated).",
            statuses,
        ))
    }

    /// Record and stream one stage report. A closed channel means the
    /// client went away; honor it at this stage boundary.
    async fn emit(
        stage_tx: &mpsc::Sender<StageReport>,
        stages: &mut Vec<StageReport>,
        report: StageReport,
    ) -> Result<()> {
        stages.push(report.clone());
        stage_tx
            .send(report)
            .await
            .map_err(|_| PipelineError::Cancelled)
    }

    /// Emit a report, returning its error text when it failed.
    async fn emit_and_check(
        stage_tx: &mpsc::Sender<StageReport>,
        stages: &mut Vec<StageReport>,
        report: StageReport,
    ) -> Result<Option<String>> {
        let error = (report.status == StageOutcome::Failed)
            .then(|| report.error.clone().unwrap_or_default());
        Self::emit(stage_tx, stages, report).await?;
        Ok(error)
    }

    fn finish(
        success: bool,
        hcl_code: String,
        stages: Vec<StageReport>,
        final_message: impl Into<String>,
        resource_statuses: BTreeMap<String, String>,
    ) -> PipelineResult {
        PipelineResult {
            success,
            hcl_code,
            stages,
            final_message: final_message.into(),
            resource_statuses,
        }
    }
}

fn capture_logs(output: &CommandOutput) -> Vec<String> {
    let mut logs = output.stdout_lines();
    if !output.stderr.trim().is_empty() {
        logs.push(format!("STDERR: {}", output.stderr.trim()));
    }
    logs
}

/// Keep the first and last 500 characters of a long error excerpt.
fn trim_excerpt(text: &str) -> String {
    let text = text.trim();
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= 1000 {
        return text.to_string();
    }
    let head: String = chars[..500].iter().collect();
    let tail: String = chars[chars.len() - 500..].iter().collect();
    format!("{head}\n... [trimmed] ...\n{tail}")
}

fn repair_prompt(stage: &str, error: &str, hcl: &str) -> String {
    format!(
        r#"You are an expert Terraform debugger.

A pipeline stage failed and the configuration below must be fixed.

FAILED STAGE: {stage}

ERROR:
{error}

CURRENT CONFIGURATION:
{hcl}

Return ONLY the complete, fixed HCL configuration. No commentary, no code fences."#
    )
}

fn strip_hcl_fences(text: &str) -> String {
    text.replace("```hcl", "")
        .replace("```terraform", "")
        .replace("```", "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_excerpt_keeps_short_text() {
        assert_eq!(trim_excerpt("short error"), "short error");
    }

    #[test]
    fn trim_excerpt_cuts_long_text() {
        let long = "x".repeat(3000);
        let trimmed = trim_excerpt(&long);
        assert!(trimmed.len() < 1100);
        assert!(trimmed.contains("[trimmed]"));
    }

    #[test]
    fn execution_mode_parses() {
        assert_eq!("deploy".parse::<ExecutionMode>(), Ok(ExecutionMode::Deploy));
        assert_eq!("draft".parse::<ExecutionMode>(), Ok(ExecutionMode::Draft));
        assert!("prod".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn fences_are_stripped_from_repairs() {
        let fixed = strip_hcl_fences("```hcl\nresource \"aws_vpc\" \"v\" {}\n```");
        assert_eq!(fixed, "resource \"aws_vpc\" \"v\" {}");
    }
}
