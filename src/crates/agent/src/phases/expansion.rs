//! Phase 3: materialize the reasoned graph into provider resources.
//!
//! One model call, warnings instead of retries: the outer architecture
//! loop decides whether to iterate again. Only referential validity is a
//! hard failure here.

use std::sync::Arc;

use async_stream::stream;

use infra_graph::{validate, GraphPhase, GraphState};
use llm::{coerce_graph_payload, generate_with_retry, GenerateRequest, ModelBackend, RetryPolicy};

use crate::events::AgentEvent;
use crate::phases::{graph_from_payload, PhaseItem, PhaseStream};
use crate::prompts;

/// Run the expansion phase over a reasoned graph.
pub fn run_expansion(
    backend: Arc<dyn ModelBackend>,
    retry: RetryPolicy,
    reasoned: GraphState,
    execution_mode: String,
) -> PhaseStream {
    Box::pin(stream! {
        yield PhaseItem::Event(AgentEvent::log("Expanding architecture to provider primitives..."));

        let graph_json = match serde_json::to_string(&reasoned) {
            Ok(json) => json,
            Err(e) => {
                yield PhaseItem::Event(AgentEvent::error(format!("Expansion failed: {e}")));
                return;
            }
        };
        let request =
            GenerateRequest::json(prompts::expansion_prompt(&graph_json, &execution_mode));
        let raw = match generate_with_retry(backend.as_ref(), &request, &retry).await {
            Ok(text) => text,
            Err(e) => {
                yield PhaseItem::Event(AgentEvent::error(format!("Expansion failed: {e}")));
                return;
            }
        };

        let expanded = match coerce_graph_payload(&raw)
            .and_then(|payload| graph_from_payload(payload, GraphPhase::Implementation))
        {
            Ok(graph) => graph,
            Err(e) => {
                yield PhaseItem::Event(AgentEvent::error(format!(
                    "Failed to parse implementation graph: {e}"
                )));
                return;
            }
        };

        if let Err(e) = validate::check_integrity(&expanded) {
            yield PhaseItem::Event(AgentEvent::error(format!(
                "Implementation graph is inconsistent: {e}"
            )));
            return;
        }

        let added = expanded.resources.len().saturating_sub(reasoned.resources.len());
        yield PhaseItem::Event(AgentEvent::thought(format!(
            "Expansion materialized {added} supporting infrastructure resources."
        )));

        let missing = validate::missing_ids(&reasoned, &expanded);
        if !missing.is_empty() {
            yield PhaseItem::Event(AgentEvent::log(format!(
                "Warning: expansion dropped nodes {missing:?}; the architecture loop will re-evaluate."
            )));
        }
        for (id, was, now) in validate::changed_types(&reasoned, &expanded) {
            // Abstract-to-concrete is the whole point; only report drift
            // between two already-concrete types.
            if !infra_graph::is_abstract_type(&was) {
                yield PhaseItem::Event(AgentEvent::log(format!(
                    "Warning: type drift on {id}: {was} -> {now}"
                )));
            }
        }
        let lingering = validate::lingering_abstract_ids(&expanded);
        if !lingering.is_empty() {
            yield PhaseItem::Event(AgentEvent::log(format!(
                "Warning: abstract nodes {lingering:?} still present; expansion incomplete."
            )));
        }

        yield PhaseItem::Terminal(expanded);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use futures::StreamExt;
    use infra_graph::{Edge, Relation, Resource};
    use llm::LlmError;
    use tokio::sync::Mutex;

    struct Scripted {
        responses: Mutex<Vec<llm::Result<String>>>,
    }

    #[async_trait::async_trait]
    impl ModelBackend for Scripted {
        async fn generate(&self, _request: &GenerateRequest) -> llm::Result<String> {
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                Err(LlmError::Provider("script exhausted".into()))
            } else {
                responses.remove(0)
            }
        }

        async fn generate_stream(
            &self,
            _request: &GenerateRequest,
        ) -> llm::Result<llm::ChunkReceiver> {
            Err(LlmError::Provider("no streaming in this test".into()))
        }
    }

    fn reasoned() -> GraphState {
        let mut g = GraphState::empty(GraphPhase::Reasoned);
        g.resources.push(Resource::new("web", "compute_service"));
        g.resources
            .push(Resource::new("db", "relational_database"));
        g.edges.push(Edge::new("web", "db", Relation::ConnectsTo));
        g
    }

    const EXPANDED: &str = r#"{
        "graph_phase": "implementation",
        "resources": [
            {"id": "vpc-main", "type": "aws_vpc"},
            {"id": "subnet-public", "type": "aws_subnet", "parent_id": "vpc-main"},
            {"id": "subnet-private", "type": "aws_subnet", "parent_id": "vpc-main"},
            {"id": "web", "type": "aws_instance", "parent_id": "subnet-public"},
            {"id": "db", "type": "aws_db_instance", "parent_id": "subnet-private"}
        ],
        "edges": [
            {"source": "vpc-main", "target": "subnet-public", "relation": "contains"},
            {"source": "vpc-main", "target": "subnet-private", "relation": "contains"},
            {"source": "web", "target": "db", "relation": "connects_to"}
        ]
    }"#;

    async fn collect(stream: PhaseStream) -> (Vec<AgentEvent>, Option<GraphState>) {
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
    async fn expansion_materializes_and_preserves_ids() {
        let backend = Arc::new(Scripted {
            responses: Mutex::new(vec![Ok(EXPANDED.to_string())]),
        });
        let (_, terminal) = collect(run_expansion(
            backend,
            RetryPolicy::new(1),
            reasoned(),
            "deploy".into(),
        ))
        .await;

        let graph = terminal.expect("terminal graph");
        assert_eq!(graph.graph_phase, GraphPhase::Implementation);
        assert!(graph.contains("web") && graph.contains("db"));
        assert_eq!(graph.resource("web").unwrap().resource_type, "aws_instance");
        assert!(infra_graph::validate::lingering_abstract_ids(&graph).is_empty());
    }

    #[tokio::test]
    async fn dropped_node_warns_but_still_terminates() {
        let partial = r#"{
            "resources": [{"id": "web", "type": "aws_instance"}],
            "edges": []
        }"#;
        let backend = Arc::new(Scripted {
            responses: Mutex::new(vec![Ok(partial.to_string())]),
        });
        let (events, terminal) = collect(run_expansion(
            backend,
            RetryPolicy::new(1),
            reasoned(),
            "deploy".into(),
        ))
        .await;

        assert!(terminal.is_some());
        assert!(events.iter().any(|e| {
            e.kind == EventKind::Log
                && e.content.as_str().is_some_and(|s| s.contains("dropped nodes"))
        }));
    }

    #[tokio::test]
    async fn dangling_edges_are_fatal() {
        let invalid = r#"{
            "resources": [{"id": "web", "type": "aws_instance"}],
            "edges": [{"source": "web", "target": "ghost", "relation": "connects_to"}]
        }"#;
        let backend = Arc::new(Scripted {
            responses: Mutex::new(vec![Ok(invalid.to_string())]),
        });
        let (events, terminal) = collect(run_expansion(
            backend,
            RetryPolicy::new(1),
            reasoned(),
            "deploy".into(),
        ))
        .await;

        assert!(terminal.is_none());
        assert!(events.iter().any(|e| e.kind == EventKind::Error));
    }
}
