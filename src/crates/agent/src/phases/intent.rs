//! Phase 1: lift free text or a diagram image into an intent graph.

use std::sync::Arc;

use async_stream::stream;

use infra_graph::{is_abstract_type, validate, GraphPhase};
use llm::{collect_streamed, coerce_graph_payload, GenerateRequest, ModelBackend, RetryPolicy};

use crate::events::{AgentEvent, StageStatus};
use crate::phases::{graph_from_payload, PhaseItem, PhaseStream};
use crate::prompts;

/// Stage name used in `stage` events.
pub const STAGE: &str = "intent";

/// User input to the intent runner.
#[derive(Debug, Clone)]
pub enum IntentInput {
    /// Natural-language request.
    Text(String),
    /// Architecture diagram image.
    Image {
        /// MIME type of the image.
        mime_type: String,
        /// Raw image bytes.
        data: Vec<u8>,
    },
}

/// Run the intent phase. Streams the model, coerces the JSON, validates
/// against the closed semantic type set, and terminates with the intent
/// graph.
pub fn run_intent(
    backend: Arc<dyn ModelBackend>,
    retry: RetryPolicy,
    input: IntentInput,
) -> PhaseStream {
    Box::pin(stream! {
        yield PhaseItem::Event(AgentEvent::log("Interpreting request..."));
        yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Running));

        let request = match &input {
            IntentInput::Text(text) => GenerateRequest::json(prompts::intent_prompt(text)),
            IntentInput::Image { mime_type, data } => {
                GenerateRequest::json(prompts::vision_prompt())
                    .with_image(mime_type.clone(), data.clone())
            }
        };

        let raw = match collect_streamed(backend.as_ref(), &request, &retry).await {
            Ok(text) => text,
            Err(e) => {
                yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Failed));
                yield PhaseItem::Event(AgentEvent::error(format!("Intent generation failed: {e}")));
                return;
            }
        };

        let graph = match coerce_graph_payload(&raw)
            .and_then(|payload| graph_from_payload(payload, GraphPhase::Intent))
        {
            Ok(graph) => graph,
            Err(e) => {
                yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Failed));
                yield PhaseItem::Event(AgentEvent::error(format!("Failed to parse intent graph: {e}")));
                return;
            }
        };

        if let Err(e) = validate::check_integrity(&graph) {
            yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Failed));
            yield PhaseItem::Event(AgentEvent::error(format!("Intent graph is inconsistent: {e}")));
            return;
        }

        let foreign: Vec<&str> = graph
            .resources
            .iter()
            .filter(|r| !is_abstract_type(&r.resource_type))
            .map(|r| r.id.as_str())
            .collect();
        if !foreign.is_empty() {
            yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Failed));
            yield PhaseItem::Event(AgentEvent::error(format!(
                "Intent graph contains non-semantic types on: {}",
                foreign.join(", ")
            )));
            return;
        }

        yield PhaseItem::Event(AgentEvent::log(format!(
            "Intent graph generated: {} nodes.",
            graph.resources.len()
        )));
        yield PhaseItem::Event(AgentEvent::snapshot(&graph));
        yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Success));
        yield PhaseItem::Event(AgentEvent::control("wait_confirmation", "reasoning"));
        yield PhaseItem::Terminal(graph);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use futures::StreamExt;
    use llm::LlmError;
    use tokio::sync::{mpsc, Mutex};

    /// Scripted backend: pops canned responses in order.
    struct Scripted {
        responses: Mutex<Vec<llm::Result<String>>>,
    }

    impl Scripted {
        fn new(responses: Vec<llm::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait::async_trait]
    impl ModelBackend for Scripted {
        async fn generate(&self, _request: &GenerateRequest) -> llm::Result<String> {
            self.responses
                .lock()
                .await
                .pop()
                .unwrap_or(Err(LlmError::Provider("script exhausted".into())))
        }

        async fn generate_stream(
            &self,
            request: &GenerateRequest,
        ) -> llm::Result<llm::ChunkReceiver> {
            let text = self.generate(request).await?;
            let (tx, rx) = mpsc::channel(4);
            // Split into two chunks to exercise accumulation.
            let mid = text.len() / 2;
            let (a, b) = text.split_at(mid);
            let _ = tx.send(Ok(a.to_string())).await;
            let _ = tx.send(Ok(b.to_string())).await;
            Ok(rx)
        }
    }

    const INTENT_RESPONSE: &str = r#"Here you go:
```json
{
  "graph_phase": "intent",
  "add_resources": [
    {"id": "web", "type": "compute_service"},
    {"id": "db", "type": "relational_database"}
  ],
  "add_edges": [
    {"from": "web", "to": "db", "relation": "connects_to"}
  ],
  "reasoning": "a web tier backed by a database"
}
```"#;

    async fn collect(stream: PhaseStream) -> (Vec<AgentEvent>, Option<infra_graph::GraphState>) {
        let mut events = Vec::new();
        let mut terminal = None;
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                PhaseItem::Event(e) => events.push(e),
                PhaseItem::Terminal(g) => terminal = Some(g),
            }
        }
        (events, terminal)
    }

    #[tokio::test]
    async fn text_input_yields_intent_graph() {
        let backend = Scripted::new(vec![Ok(INTENT_RESPONSE.to_string())]);
        let stream = run_intent(
            backend,
            RetryPolicy::new(1),
            IntentInput::Text("web server with a database".into()),
        );
        let (events, terminal) = collect(stream).await;

        let graph = terminal.expect("terminal graph");
        assert_eq!(graph.graph_phase, GraphPhase::Intent);
        let ids: Vec<_> = graph.ids().collect();
        assert_eq!(ids, vec!["web", "db"]);
        assert_eq!(graph.edges[0].source, "web");

        // Snapshot, stage success and the control handoff are all present.
        assert!(events.iter().any(|e| e.kind == EventKind::GraphSnapshot));
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::Control
                && e.content["next_phase"] == "reasoning"));
    }

    #[tokio::test]
    async fn provider_types_in_intent_are_rejected() {
        let backend = Scripted::new(vec![Ok(
            r#"{"resources": [{"id": "web", "type": "aws_instance"}], "edges": []}"#.to_string(),
        )]);
        let stream = run_intent(backend, RetryPolicy::new(1), IntentInput::Text("x".into()));
        let (events, terminal) = collect(stream).await;

        assert!(terminal.is_none());
        assert!(events.iter().any(|e| e.kind == EventKind::Error));
    }

    #[tokio::test]
    async fn garbage_output_surfaces_a_parse_error() {
        let backend = Scripted::new(vec![Ok("I cannot help with that".to_string())]);
        let stream = run_intent(backend, RetryPolicy::new(1), IntentInput::Text("x".into()));
        let (events, terminal) = collect(stream).await;

        assert!(terminal.is_none());
        let error = events.iter().find(|e| e.kind == EventKind::Error).unwrap();
        assert!(error.content.as_str().unwrap().contains("parse"));
    }
}
