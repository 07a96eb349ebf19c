//! Route handlers.

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;

use agent::EventReceiver;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Wrap an orchestrator event stream as an NDJSON response body.
fn ndjson(receiver: EventReceiver) -> Response {
    let stream = ReceiverStream::new(receiver)
        .map(|event| Ok::<_, Infallible>(Bytes::from(event.to_ndjson())));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Request body for prompt-driven actions.
#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    /// The user's natural-language input.
    pub prompt: String,
}

/// Request body for the confirm action.
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    /// Accept (`true`) or discard (`false`) the pending modification.
    pub accept: bool,
}

/// Request body for deploy (prompt optional).
#[derive(Debug, Deserialize, Default)]
pub struct DeployRequest {
    /// Optional instruction forwarded to code generation.
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Request body for blast-radius simulation.
#[derive(Debug, Deserialize)]
pub struct SimulationRequest {
    /// The node under analysis.
    pub target_node_id: String,
}

/// Request body for the impact explanation.
#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    /// The node under analysis.
    pub target_node_id: String,
    /// Precomputed affected set; recomputed when omitted.
    #[serde(default)]
    pub affected_nodes: Option<Vec<String>>,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session = state.orchestrator.session_view().await;
    Json(json!({ "status": "ok", "phase": session.phase }))
}

/// `POST /agent/submit`: text prompt to intent graph (streaming).
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<PromptRequest>,
) -> ApiResult<Response> {
    let receiver = state.orchestrator.submit_text(request.prompt).await?;
    Ok(ndjson(receiver))
}

/// `POST /agent/visualize`: diagram image to intent graph (streaming).
/// The image arrives as the raw request body; its MIME type in
/// `Content-Type`.
pub async fn visualize(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/png")
        .to_string();
    let receiver = state
        .orchestrator
        .submit_image(mime_type, body.to_vec())
        .await?;
    Ok(ndjson(receiver))
}

/// `POST /agent/approve/intent`: run the architecture loop (streaming).
pub async fn approve_intent(State(state): State<AppState>) -> ApiResult<Response> {
    let receiver = state.orchestrator.approve_intent().await?;
    Ok(ndjson(receiver))
}

/// `POST /agent/modify`: refine the current graph (streaming).
pub async fn modify(
    State(state): State<AppState>,
    Json(request): Json<PromptRequest>,
) -> ApiResult<Response> {
    let receiver = state.orchestrator.modify(request.prompt).await?;
    Ok(ndjson(receiver))
}

/// `POST /graph/confirm_change`: resolve a pending modification
/// (streaming).
pub async fn confirm_change(
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<Response> {
    let receiver = state.orchestrator.confirm_change(request.accept).await?;
    Ok(ndjson(receiver))
}

/// `POST /agent/deploy`: generate code and run the pipeline (streaming).
pub async fn deploy(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<Response> {
    let receiver = state.orchestrator.deploy(request.prompt).await?;
    Ok(ndjson(receiver))
}

/// `POST /graph/reset`: hard reset.
pub async fn reset(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.orchestrator.reset().await?;
    Ok(Json(json!({ "message": "session hard reset complete" })))
}

/// `GET /agent/session`: session state for client recovery.
pub async fn session(State(state): State<AppState>) -> Json<agent::SessionView> {
    Json(state.orchestrator.session_view().await)
}

/// `GET /graph`: the live implementation graph.
pub async fn graph(State(state): State<AppState>) -> ApiResult<Json<infra_graph::GraphState>> {
    state
        .orchestrator
        .graph_view()
        .await
        .map(Json)
        .ok_or_else(|| ApiError(agent::AgentError::MissingGraph("implementation")))
}

/// `GET /cost`: derived cost report.
pub async fn cost(State(state): State<AppState>) -> ApiResult<Json<agent::CostReport>> {
    Ok(Json(state.orchestrator.cost_view().await?))
}

/// `POST /simulate/blast_radius`: containment-based impact set.
pub async fn blast_radius(
    State(state): State<AppState>,
    Json(request): Json<SimulationRequest>,
) -> ApiResult<Json<agent::BlastSummary>> {
    Ok(Json(
        state.orchestrator.blast_radius(&request.target_node_id).await?,
    ))
}

/// `POST /simulate/explain`: model-written impact explanation.
pub async fn explain(
    State(state): State<AppState>,
    Json(request): Json<ExplainRequest>,
) -> ApiResult<Json<agent::BlastAnalysis>> {
    Ok(Json(
        state
            .orchestrator
            .explain_blast(&request.target_node_id, request.affected_nodes)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use agent::{AgentError, AgentEvent, EventEmitter, SessionPhase};

    fn fresh_state(
        session_dir: &std::path::Path,
        workspace_dir: &std::path::Path,
    ) -> AppState {
        AppState {
            orchestrator: test_support::orchestrator(session_dir, workspace_dir),
        }
    }

    #[tokio::test]
    async fn health_reports_the_session_phase() {
        let session_dir = tempfile::tempdir().unwrap();
        let workspace_dir = tempfile::tempdir().unwrap();
        let state = fresh_state(session_dir.path(), workspace_dir.path());

        let Json(body) = health(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["phase"], "idle");
    }

    #[tokio::test]
    async fn session_view_starts_empty() {
        let session_dir = tempfile::tempdir().unwrap();
        let workspace_dir = tempfile::tempdir().unwrap();
        let state = fresh_state(session_dir.path(), workspace_dir.path());

        let Json(view) = session(State(state)).await;
        assert_eq!(view.phase, SessionPhase::Idle);
        assert!(view.intent_graph.is_none());
        assert!(view.decision_log.is_empty());
    }

    #[tokio::test]
    async fn graph_without_an_implementation_is_missing() {
        let session_dir = tempfile::tempdir().unwrap();
        let workspace_dir = tempfile::tempdir().unwrap();
        let state = fresh_state(session_dir.path(), workspace_dir.path());

        let result = graph(State(state)).await;
        let err = result.err().expect("no graph yet");
        assert!(matches!(err.0, AgentError::MissingGraph(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn actions_in_the_wrong_phase_map_to_conflict() {
        let session_dir = tempfile::tempdir().unwrap();
        let workspace_dir = tempfile::tempdir().unwrap();
        let state = fresh_state(session_dir.path(), workspace_dir.path());

        // Nothing submitted: approve violates the phase contract.
        let result = approve_intent(State(state)).await;
        let err = result.err().expect("contract violation");
        assert!(matches!(err.0, AgentError::PhaseContract { .. }));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn ndjson_frames_events_line_by_line() {
        let (emitter, receiver) = EventEmitter::channel(8);
        emitter.log("starting").await.unwrap();
        emitter
            .emit(AgentEvent::result(json!({"ok": true})))
            .await
            .unwrap();
        drop(emitter);

        let response = ndjson(receiver);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/x-ndjson")
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "log");
        let last: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["type"], "result");
        assert_eq!(last["content"]["ok"], true);
    }
}
