//! HTTP gateway: axum routes over the orchestrator.
//!
//! Streaming endpoints bridge the orchestrator's event receivers into
//! newline-delimited JSON response bodies; read-only endpoints return
//! plain JSON. Routes are a transport detail; all semantics live in the
//! `agent` crate.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use agent::Orchestrator;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The single orchestrator instance behind every route.
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the complete API router.
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(handlers::health))
        // Lifecycle actions (streaming)
        .route("/agent/submit", post(handlers::submit))
        .route("/agent/visualize", post(handlers::visualize))
        .route("/agent/approve/intent", post(handlers::approve_intent))
        .route("/agent/modify", post(handlers::modify))
        .route("/graph/confirm_change", post(handlers::confirm_change))
        .route("/agent/deploy", post(handlers::deploy))
        // Session control
        .route("/graph/reset", post(handlers::reset))
        // Read-only views
        .route("/agent/session", get(handlers::session))
        .route("/graph", get(handlers::graph))
        .route("/cost", get(handlers::cost))
        // Simulation
        .route("/simulate/blast_radius", post(handlers::blast_radius))
        .route("/simulate/explain", post(handlers::explain))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Test doubles and constructors shared by the gateway's unit tests.
#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;

    use agent::{Orchestrator, OrchestratorConfig};
    use llm::{GenerateRequest, LlmError, ModelBackend};
    use pipeline::{CommandOutput, PipelineError, ToolCommand, ToolchainRunner};

    /// Backend double: every call fails fast. Gateway tests exercise the
    /// transport layer, never the model.
    struct IdleBackend;

    #[async_trait::async_trait]
    impl ModelBackend for IdleBackend {
        async fn generate(&self, _request: &GenerateRequest) -> llm::Result<String> {
            Err(LlmError::Provider("no backend in gateway tests".into()))
        }

        async fn generate_stream(
            &self,
            _request: &GenerateRequest,
        ) -> llm::Result<llm::ChunkReceiver> {
            Err(LlmError::Provider("no backend in gateway tests".into()))
        }
    }

    /// Toolchain double: every command succeeds with empty output.
    struct IdleToolchain;

    #[async_trait::async_trait]
    impl ToolchainRunner for IdleToolchain {
        async fn run(
            &self,
            _command: ToolCommand,
            _workspace: &Path,
        ) -> Result<CommandOutput, PipelineError> {
            Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    /// An orchestrator over a fresh session in the given directories.
    pub(crate) fn orchestrator(session_dir: &Path, workspace_dir: &Path) -> Arc<Orchestrator> {
        let config = OrchestratorConfig::new(session_dir, workspace_dir);
        Arc::new(
            Orchestrator::new(Arc::new(IdleBackend), Arc::new(IdleToolchain), config)
                .expect("test orchestrator"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_over_a_fresh_session() {
        let session_dir = tempfile::tempdir().unwrap();
        let workspace_dir = tempfile::tempdir().unwrap();
        let orchestrator = test_support::orchestrator(session_dir.path(), workspace_dir.path());
        // Route registration panics on malformed paths; building the
        // router is the check.
        let _router = create_router(orchestrator);
    }
}
