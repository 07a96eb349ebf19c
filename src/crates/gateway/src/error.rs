//! API error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use agent::AgentError;

/// JSON error body returned to clients.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    /// Error classification.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

/// Wrapper mapping orchestrator errors onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub AgentError);

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            AgentError::PhaseContract { .. } => StatusCode::CONFLICT,
            AgentError::MissingGraph(_) => StatusCode::BAD_REQUEST,
            AgentError::Graph(infra_graph::GraphError::NodeNotFound(_)) => StatusCode::NOT_FOUND,
            AgentError::Model(e) if !e.is_transient() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error-code string for programmatic handling.
    pub fn code(&self) -> &'static str {
        match &self.0 {
            AgentError::PhaseContract { .. } => "phase_contract",
            AgentError::MissingGraph(_) => "missing_graph",
            AgentError::Graph(infra_graph::GraphError::NodeNotFound(_)) => "node_not_found",
            AgentError::Model(e) if !e.is_transient() => "model_backend",
            _ => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorBody {
            error: self.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// API result alias.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use agent::SessionPhase;
    use infra_graph::GraphError;
    use llm::LlmError;

    #[test]
    fn phase_contract_is_a_conflict() {
        let err = ApiError(AgentError::PhaseContract {
            action: "deploy".to_string(),
            phase: SessionPhase::Idle,
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "phase_contract");
    }

    #[test]
    fn missing_graph_is_a_bad_request() {
        let err = ApiError(AgentError::MissingGraph("implementation"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "missing_graph");
    }

    #[test]
    fn unknown_node_is_not_found() {
        let err = ApiError(AgentError::Graph(GraphError::NodeNotFound(
            "ghost".to_string(),
        )));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "node_not_found");
    }

    #[test]
    fn permanent_model_failure_is_a_bad_gateway() {
        let err = ApiError(AgentError::Model(LlmError::Authentication(
            "bad key".to_string(),
        )));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "model_backend");
    }

    #[test]
    fn transient_model_failure_is_internal() {
        // A transient error that still surfaced means the retry budget
        // ran out; that is an internal condition, not a gateway one.
        let err = ApiError(AgentError::Model(LlmError::RateLimited(
            "429".to_string(),
        )));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "internal");
    }

    #[test]
    fn other_errors_are_internal() {
        let err = ApiError(AgentError::Deploy("pipeline exhausted".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "internal");
    }

    #[test]
    fn response_body_carries_code_and_message() {
        let err = ApiError(AgentError::MissingGraph("intent"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("application/json"));
    }
}
