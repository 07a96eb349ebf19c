//! Error types for the orchestrator.

use thiserror::Error;

use crate::events::StreamClosed;
use crate::session::SessionPhase;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur while driving the graph lifecycle.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Graph-level failure (integrity, traversal, serialization).
    #[error(transparent)]
    Graph(#[from] infra_graph::GraphError),

    /// Model backend failure that exhausted its retries or was permanent.
    #[error(transparent)]
    Model(#[from] llm::LlmError),

    /// Verification pipeline failure.
    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),

    /// A user action arrived in a phase that does not permit it.
    #[error("Action '{action}' is not allowed in phase '{phase}'")]
    PhaseContract {
        /// The attempted action.
        action: String,
        /// The session phase at the time.
        phase: SessionPhase,
    },

    /// An operation needed a graph the session does not hold.
    #[error("No {0} graph available")]
    MissingGraph(&'static str),

    /// A phase runner ended without producing its terminal graph.
    #[error("Phase '{0}' produced no graph")]
    PhaseFailed(&'static str),

    /// The deploy pipeline failed beyond its retry budget.
    #[error("Deployment failed: {0}")]
    Deploy(String),

    /// Session persistence failure.
    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON failure while persisting or restoring session state.
    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The event stream consumer went away.
    #[error(transparent)]
    StreamClosed(#[from] StreamClosed),
}
