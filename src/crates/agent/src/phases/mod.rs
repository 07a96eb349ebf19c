//! Phase runners.
//!
//! Every runner is a lazy stream of [`PhaseItem`]s: zero or more events
//! followed by at most one terminal graph. A stream that finishes without
//! a terminal failed; its last `error` event says why. The consumer
//! distinguishes by the tag, never by inspecting event contents.

pub mod cost;
pub mod expansion;
pub mod intent;
pub mod policy;

use std::pin::Pin;

use futures::Stream;
use serde_json::json;
use uuid::Uuid;

use infra_graph::{GraphPhase, GraphState};
use llm::LlmError;

use crate::events::{AgentEvent, EventEmitter, StreamClosed};

/// One item yielded by a phase runner.
#[derive(Debug)]
pub enum PhaseItem {
    /// An event to forward to the subscribed client.
    Event(AgentEvent),
    /// The runner's final graph.
    Terminal(GraphState),
}

/// Boxed phase runner stream.
pub type PhaseStream = Pin<Box<dyn Stream<Item = PhaseItem> + Send>>;

/// Forward a runner's events to the emitter and capture its terminal.
pub async fn drain(
    mut stream: PhaseStream,
    emitter: &EventEmitter,
) -> Result<Option<GraphState>, StreamClosed> {
    use futures::StreamExt;

    let mut terminal = None;
    while let Some(item) = stream.next().await {
        match item {
            PhaseItem::Event(event) => emitter.emit(event).await?,
            PhaseItem::Terminal(graph) => terminal = Some(graph),
        }
    }
    Ok(terminal)
}

/// Turn a coerced model payload into a typed graph in the given phase.
///
/// The phase is forced (the model is not trusted to label it), runner
/// side-channel keys are stripped, and a non-UUID `graph_version` (the
/// model tends to echo the literal "uuid") is dropped so the default
/// takes over.
pub(crate) fn graph_from_payload(
    mut payload: serde_json::Value,
    phase: GraphPhase,
) -> Result<GraphState, LlmError> {
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("graph_phase".to_string(), json!(phase.to_string()));
        obj.remove("decisions");
        obj.remove("violations_remaining");
        obj.remove("thoughts");
        let version_ok = obj
            .get("graph_version")
            .and_then(serde_json::Value::as_str)
            .map(|s| Uuid::parse_str(s).is_ok())
            .unwrap_or(false);
        if !version_ok {
            obj.remove("graph_version");
        }
    }
    serde_json::from_value(payload)
        .map_err(|e| LlmError::Parse(format!("graph payload does not validate: {e}")))
}
