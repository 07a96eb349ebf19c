//! Error types for graph operations.

use thiserror::Error;

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while building, mutating or validating a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node id was referenced but does not exist in the graph.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// An edge was referenced but does not exist in the graph.
    #[error("Edge not found: {from} -> {target}")]
    EdgeNotFound {
        /// Source node id.
        from: String,
        /// Target node id.
        target: String,
    },

    /// A node with the same id already exists.
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    /// An edge connects a node to itself.
    #[error("Self-loop rejected on node: {0}")]
    SelfLoop(String),

    /// An edge endpoint refers to a node that is not present.
    #[error("Dangling edge {from} -> {target}: missing {missing}")]
    DanglingEdge {
        /// Source node id.
        from: String,
        /// Target node id.
        target: String,
        /// The endpoint that could not be resolved.
        missing: String,
    },

    /// A graph payload failed structural validation.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
