//! Error types for pipeline execution.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that terminate a pipeline run.
///
/// Stage failures inside the retry budget are not errors; they surface
/// as failed [`crate::StageReport`]s and feed the repair loop. These
/// variants are the unrecoverable outcomes.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Workspace file I/O failed.
    #[error("Workspace I/O error: {0}")]
    Workspace(#[from] std::io::Error),

    /// A subprocess could not be spawned or exceeded its wall-clock cap.
    #[error("Subprocess '{command}' failed: {reason}")]
    Subprocess {
        /// The toolchain command.
        command: String,
        /// What went wrong.
        reason: String,
    },

    /// The repair model call failed beyond its transient retry budget.
    #[error("Code repair failed: {0}")]
    Repair(#[from] llm::LlmError),

    /// The consumer went away; the run stopped at a stage boundary.
    #[error("Pipeline cancelled: stage consumer disconnected")]
    Cancelled,
}
