//! Phase 2: the bounded policy self-correction loop.
//!
//! Each cycle sends the current graph to the policy engine and validates
//! what comes back. A cycle that drops intent nodes or mutates semantic
//! types is rejected outright and retried with the same input; accepted
//! cycles append their decisions to the stream. The loop ends when the
//! engine reports zero remaining violations or the cycle budget runs out.

use std::sync::Arc;

use async_stream::stream;
use chrono::Utc;
use serde_json::Value;

use infra_graph::{validate, DecisionLogEntry, GraphPhase, GraphState};
use llm::{coerce_graph_payload, generate_with_retry, GenerateRequest, ModelBackend, RetryPolicy};

use crate::events::AgentEvent;
use crate::phases::{graph_from_payload, PhaseItem, PhaseStream};
use crate::prompts;

/// Self-correction cycle budget.
pub const MAX_POLICY_CYCLES: u32 = 3;

fn decision_from_value(raw: &Value, cycle: u32) -> DecisionLogEntry {
    let text = |key: &str, default: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };
    DecisionLogEntry {
        stage: "reasoned".to_string(),
        cycle,
        timestamp: Utc::now(),
        trigger: text("trigger", "policy_check"),
        affected_nodes: raw
            .get("affected_nodes")
            .and_then(Value::as_array)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        action: text("action", "mutation"),
        result: text("result", "applied"),
    }
}

/// Run the policy loop over an intent (or fed-back) graph.
pub fn run_policy(
    backend: Arc<dyn ModelBackend>,
    retry: RetryPolicy,
    input: GraphState,
) -> PhaseStream {
    Box::pin(stream! {
        let mut current = input.clone();
        current.graph_phase = GraphPhase::Reasoned;

        let mut cycle = 0u32;
        while cycle < MAX_POLICY_CYCLES {
            yield PhaseItem::Event(AgentEvent::log(format!(
                "Cycle {}/{MAX_POLICY_CYCLES}: analyzing architecture against policies...",
                cycle + 1
            )));

            let graph_json = match serde_json::to_string_pretty(&current) {
                Ok(json) => json,
                Err(e) => {
                    yield PhaseItem::Event(AgentEvent::error(format!("Policy engine failed: {e}")));
                    return;
                }
            };
            let request = GenerateRequest::json(prompts::policy_prompt(&graph_json));
            let raw = match generate_with_retry(backend.as_ref(), &request, &retry).await {
                Ok(text) => text,
                Err(e) => {
                    yield PhaseItem::Event(AgentEvent::error(format!("Policy engine failed: {e}")));
                    return;
                }
            };

            let payload = match coerce_graph_payload(&raw) {
                Ok(payload) => payload,
                Err(e) => {
                    yield PhaseItem::Event(AgentEvent::error(format!("Policy output unusable: {e}")));
                    return;
                }
            };

            if let Some(reasoning) = payload.get("reasoning").and_then(Value::as_str) {
                yield PhaseItem::Event(AgentEvent::thought(format!("Analysis: {reasoning}")));
            }
            let decisions_raw: Vec<Value> = payload
                .get("decisions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let violations_remaining = payload
                .get("violations_remaining")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            let reasoning_fallback = payload
                .get("reasoning")
                .and_then(Value::as_str)
                .map(String::from);

            let candidate = match graph_from_payload(payload, GraphPhase::Reasoned) {
                Ok(graph) => match validate::check_integrity(&graph) {
                    Ok(()) => graph,
                    Err(e) => {
                        yield PhaseItem::Event(AgentEvent::error(format!(
                            "Policy output unusable: {e}"
                        )));
                        return;
                    }
                },
                Err(e) => {
                    yield PhaseItem::Event(AgentEvent::error(format!("Policy output unusable: {e}")));
                    return;
                }
            };

            // Monotonicity: every intent id must survive.
            let missing = validate::missing_ids(&input, &candidate);
            if !missing.is_empty() {
                yield PhaseItem::Event(AgentEvent::log(format!(
                    "CRITICAL: policy phase removed nodes {missing:?} - retrying..."
                )));
                cycle += 1;
                continue;
            }

            // Semantic stability: ids keep their intent-phase types.
            let changed = validate::changed_types(&input, &candidate);
            if !changed.is_empty() {
                for (id, was, now) in &changed {
                    yield PhaseItem::Event(AgentEvent::log(format!(
                        "CRITICAL: semantic role changed for {id}: {was} -> {now} - retrying..."
                    )));
                }
                cycle += 1;
                continue;
            }

            // Accepted: stream the decisions.
            let decision_count = decisions_raw.len();
            for raw_decision in &decisions_raw {
                let entry = decision_from_value(raw_decision, cycle);
                yield PhaseItem::Event(AgentEvent::decision(&entry));
            }
            if decisions_raw.is_empty() {
                if let Some(reasoning) = reasoning_fallback {
                    let mut summary = reasoning;
                    if summary.len() > 50 {
                        summary = format!("{}...", summary.chars().take(50).collect::<String>());
                    }
                    let entry = DecisionLogEntry {
                        stage: "reasoned".to_string(),
                        cycle,
                        timestamp: Utc::now(),
                        trigger: "reasoning".to_string(),
                        affected_nodes: Vec::new(),
                        action: "log".to_string(),
                        result: summary,
                    };
                    yield PhaseItem::Event(AgentEvent::decision(&entry));
                }
            }

            current = candidate;
            yield PhaseItem::Event(AgentEvent::log(format!(
                "Cycle {}: applied {decision_count} decisions.",
                cycle + 1
            )));

            if violations_remaining == 0 {
                yield PhaseItem::Event(AgentEvent::log("Policy check passed. No violations."));
                break;
            }
            cycle += 1;
        }

        yield PhaseItem::Terminal(current);
    })
}
