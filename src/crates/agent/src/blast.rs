//! Blast-radius analysis.
//!
//! The affected set is a pure graph computation: descendants of the
//! target under the `contains` ownership relation only, so connectivity
//! cycles never inflate it. The model contributes prose (explanation and
//! mitigation), not the set itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use infra_graph::{GraphState, GraphStore, Relation};
use llm::{generate_with_retry, extract_json_object, GenerateRequest, ModelBackend, RetryPolicy};

use crate::error::Result;
use crate::prompts;

/// Severity bucket for an impact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactLevel {
    /// Nothing else is affected.
    Low,
    /// One or two dependents.
    Medium,
    /// Three to five dependents.
    High,
    /// More than five dependents.
    Critical,
}

impl ImpactLevel {
    /// Bucket an affected count.
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => ImpactLevel::Low,
            1..=2 => ImpactLevel::Medium,
            3..=5 => ImpactLevel::High,
            _ => ImpactLevel::Critical,
        }
    }
}

/// Full impact analysis for one target node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastAnalysis {
    /// The node under analysis.
    pub target_node: String,
    /// Severity bucket.
    pub impact_level: ImpactLevel,
    /// Size of the affected set.
    pub affected_count: usize,
    /// The affected resource ids.
    pub affected_node_ids: Vec<String>,
    /// Why these nodes are affected.
    pub explanation: String,
    /// How to remove the target safely.
    pub mitigation_strategy: String,
}

/// Compute the affected set and its severity for a target node.
pub fn blast_radius(store: &GraphStore, target: &str) -> Result<(Vec<String>, ImpactLevel)> {
    let affected = store.descendants(target, Some(Relation::Contains))?;
    let level = ImpactLevel::from_count(affected.len());
    Ok((affected, level))
}

/// Ask the model to explain an already-computed impact set.
pub async fn explain_impact(
    backend: &dyn ModelBackend,
    retry: &RetryPolicy,
    graph: &GraphState,
    target: &str,
    affected: &[String],
) -> Result<BlastAnalysis> {
    let graph_json = serde_json::to_string(graph)?;
    let request = GenerateRequest::json(prompts::blast_prompt(&graph_json, target, affected));
    let raw = generate_with_retry(backend, &request, retry).await?;

    // Prose fields only; the set and severity stay deterministic.
    let parsed: Option<Value> = extract_json_object(&raw)
        .and_then(|text| serde_json::from_str(text).ok());
    let field = |key: &str, default: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };

    Ok(BlastAnalysis {
        target_node: target.to_string(),
        impact_level: ImpactLevel::from_count(affected.len()),
        affected_count: affected.len(),
        affected_node_ids: affected.to_vec(),
        explanation: field("explanation", "Impact derived from containment traversal."),
        mitigation_strategy: field(
            "mitigation_strategy",
            "Migrate contained resources before removal.",
        ),
    })
}
