//! The fixed-point architecture loop.
//!
//! Drives Policy → Expansion → structural verification → convergence
//! check, feeding each iteration's output back in until two consecutive
//! iterations hash identically or the cycle budget runs out. Cost runs
//! once, on the stable graph. Cancellation (a session reset) is honored
//! at cycle boundaries only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_stream::stream;
use chrono::Utc;
use futures::StreamExt;

use infra_graph::{canonical_hash, verify_structure, DecisionLogEntry, GraphState};
use llm::{ModelBackend, RetryPolicy};
use pipeline::ExecutionMode;

use crate::cost::CostTable;
use crate::events::{AgentEvent, EventKind, StageStatus};
use crate::phases::{cost::run_cost, expansion::run_expansion, policy::run_policy, PhaseItem, PhaseStream};

/// Outer iteration budget.
pub const MAX_GLOBAL_CYCLES: u32 = 3;

/// Stage name used in `stage` events.
pub const STAGE: &str = "architecture";

/// Cancellation token checked at cycle boundaries. A reset bumps the
/// shared epoch; a loop started under an older epoch stops at its next
/// boundary.
#[derive(Debug, Clone)]
pub struct CancelGuard {
    epoch: Arc<AtomicU64>,
    started_at: u64,
}

impl CancelGuard {
    /// Guard bound to the shared epoch counter at its current value.
    pub fn new(epoch: Arc<AtomicU64>) -> Self {
        let started_at = epoch.load(Ordering::Acquire);
        Self { epoch, started_at }
    }

    /// Guard that never fires (for tests and non-resettable contexts).
    pub fn never() -> Self {
        Self::new(Arc::new(AtomicU64::new(0)))
    }

    /// Whether the epoch moved since this guard was taken.
    pub fn is_cancelled(&self) -> bool {
        self.epoch.load(Ordering::Acquire) != self.started_at
    }
}

/// Configuration of one architecture loop run.
pub struct LoopConfig {
    /// Model backend shared by the inner runners.
    pub backend: Arc<dyn ModelBackend>,
    /// Retry policy for model calls.
    pub retry: RetryPolicy,
    /// Cost rule table.
    pub cost_table: CostTable,
    /// Execution mode forwarded to the expansion prompt.
    pub execution_mode: ExecutionMode,
    /// Outer cycle budget.
    pub max_cycles: u32,
}

impl LoopConfig {
    /// Configuration with the default cycle budget.
    pub fn new(backend: Arc<dyn ModelBackend>, retry: RetryPolicy, cost_table: CostTable) -> Self {
        Self {
            backend,
            retry,
            cost_table,
            execution_mode: ExecutionMode::default(),
            max_cycles: MAX_GLOBAL_CYCLES,
        }
    }
}

fn mode_str(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Deploy => "deploy",
        ExecutionMode::Draft => "draft",
    }
}

/// Run the loop from an approved intent graph (or a confirmed pending
/// graph). Terminal is the cost-annotated implementation graph.
pub fn run_architecture(config: LoopConfig, start: GraphState, cancel: CancelGuard) -> PhaseStream {
    Box::pin(stream! {
        yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Running));

        let mut prev_hash: Option<String> = None;
        let mut current = start;
        let mut last_verified: Option<GraphState> = None;
        let mut converged = false;

        for cycle in 0..config.max_cycles {
            if cancel.is_cancelled() {
                yield PhaseItem::Event(AgentEvent::log(
                    "Session reset; abandoning the architecture loop.",
                ));
                return;
            }
            if cycle > 0 {
                yield PhaseItem::Event(AgentEvent::log(format!(
                    "Re-evaluating architecture (iteration {})...",
                    cycle + 1
                )));
            }

            // Policy.
            let mut reasoned = None;
            let mut inner = run_policy(config.backend.clone(), config.retry.clone(), current.clone());
            while let Some(item) = inner.next().await {
                match item {
                    PhaseItem::Event(e) => yield PhaseItem::Event(e),
                    PhaseItem::Terminal(g) => reasoned = Some(g),
                }
            }
            let Some(reasoned) = reasoned else {
                yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Failed));
                return;
            };
            yield PhaseItem::Event(AgentEvent::snapshot(&reasoned));

            // Expansion.
            let mut expanded = None;
            let mut inner = run_expansion(
                config.backend.clone(),
                config.retry.clone(),
                reasoned,
                mode_str(config.execution_mode).to_string(),
            );
            while let Some(item) = inner.next().await {
                match item {
                    PhaseItem::Event(e) => yield PhaseItem::Event(e),
                    PhaseItem::Terminal(g) => expanded = Some(g),
                }
            }
            let Some(expanded) = expanded else {
                yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Failed));
                return;
            };

            // Structural verification: warnings only, the loop decides.
            yield PhaseItem::Event(AgentEvent::log("Verifying containment and connectivity..."));
            let violations = verify_structure(&expanded);
            if violations.is_empty() {
                yield PhaseItem::Event(AgentEvent::log("Architecture verification passed."));
            } else {
                yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Warning));
                for violation in &violations {
                    yield PhaseItem::Event(AgentEvent::log(format!("Warning: {violation}")));
                }
            }

            // Convergence check.
            let hash = canonical_hash(&expanded);
            if prev_hash.as_deref() == Some(hash.as_str()) {
                let entry = DecisionLogEntry {
                    stage: "architecture".to_string(),
                    cycle,
                    timestamp: Utc::now(),
                    trigger: "Convergence Check".to_string(),
                    affected_nodes: Vec::new(),
                    action: "Fixed Point Reached".to_string(),
                    result: format!("Stability achieved after {} iterations", cycle + 1),
                };
                let mut event = AgentEvent::decision(&entry);
                if let Some(content) = event.content.as_object_mut() {
                    content.insert(
                        "rule".to_string(),
                        serde_json::Value::String("Convergence Check".to_string()),
                    );
                }
                yield PhaseItem::Event(event);

                last_verified = Some(expanded);
                converged = true;
                break;
            }
            prev_hash = Some(hash);
            current = expanded.clone();
            last_verified = Some(expanded);
        }

        if !converged {
            yield PhaseItem::Event(AgentEvent::log(
                "Warning: architecture stability loop exhausted its budget; proceeding with the last result.",
            ));
        }
        let Some(final_graph) = last_verified else {
            yield PhaseItem::Event(AgentEvent::error("Architecture loop produced no graph."));
            return;
        };

        // Cost runs once, on the stable graph.
        let mut annotated = None;
        let mut inner = run_cost(config.cost_table.clone(), final_graph);
        while let Some(item) = inner.next().await {
            match item {
                PhaseItem::Event(e) => yield PhaseItem::Event(e),
                PhaseItem::Terminal(g) => annotated = Some(g),
            }
        }
        let Some(annotated) = annotated else {
            yield PhaseItem::Event(AgentEvent::error("Cost estimation produced no graph."));
            return;
        };

        yield PhaseItem::Event(AgentEvent::stage(STAGE, StageStatus::Success));
        yield PhaseItem::Terminal(annotated);
    })
}

/// Whether an event is a `decision` carrying the given rule marker.
pub fn is_decision_with_rule(event: &AgentEvent, rule: &str) -> bool {
    event.kind == EventKind::Decision
        && event
            .content
            .get("rule")
            .and_then(serde_json::Value::as_str)
            == Some(rule)
}
