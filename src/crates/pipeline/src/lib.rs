//! Five-stage verification pipeline with self-healing repair.
//!
//! The pipeline takes generated Terraform HCL plus a verification script,
//! drives the toolchain through Setup → Validate → Plan → Apply → Verify
//! in a workspace directory, and repairs the configuration between
//! bounded attempts: deterministic textual fixes first, a model repair
//! call second. Stage completions stream through a bounded channel so
//! the caller's event loop never blocks on subprocess I/O.

pub mod command;
pub mod error;
pub mod fixers;
pub mod policy;
pub mod runner;
pub mod status;

pub use command::{
    purge_workspace, write_artifacts, CommandOutput, TerraformCli, ToolCommand, ToolchainRunner,
};
pub use error::{PipelineError, Result};
pub use policy::PolicyViolation;
pub use runner::{
    ExecutionMode, PipelineConfig, PipelineManager, PipelineResult, StageOutcome, StageReport,
};
