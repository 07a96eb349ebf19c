//! Structural cost estimation.
//!
//! Cost is a rule-table estimate over resource types, not a live pricing
//! lookup. The table is configuration: callers may replace the rates
//! entirely; the defaults are the conventional demo numbers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use infra_graph::GraphState;

/// Substring-to-monthly-rate rule table. The first matching rule wins;
/// unmatched types cost nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostTable {
    rules: Vec<(String, u64)>,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            // "db" precedes "instance" so aws_db_instance prices as a
            // database, not as compute.
            rules: vec![
                ("db".to_string(), 60),
                ("lb".to_string(), 20),
                ("nat".to_string(), 30),
                ("instance".to_string(), 40),
            ],
        }
    }
}

impl CostTable {
    /// A table with custom rules.
    pub fn new(rules: Vec<(String, u64)>) -> Self {
        Self { rules }
    }

    /// Monthly rate for one resource type.
    pub fn monthly_rate(&self, resource_type: &str) -> u64 {
        self.rules
            .iter()
            .find(|(needle, _)| resource_type.contains(needle.as_str()))
            .map(|(_, rate)| *rate)
            .unwrap_or(0)
    }
}

/// Derived cost summary for a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostReport {
    /// Formatted total, e.g. `"$100/mo"`.
    pub total: String,
    /// Per-resource formatted rates, priced resources only.
    pub breakdown: BTreeMap<String, String>,
    /// Currency code.
    pub currency: String,
}

/// Price a graph against the table.
pub fn estimate(table: &CostTable, graph: &GraphState) -> CostReport {
    let mut total = 0u64;
    let mut breakdown = BTreeMap::new();
    for resource in &graph.resources {
        let rate = table.monthly_rate(&resource.resource_type);
        if rate > 0 {
            total += rate;
            breakdown.insert(resource.id.clone(), format!("${rate}/mo"));
        }
    }
    CostReport {
        total: format!("${total}/mo"),
        breakdown,
        currency: "USD".to_string(),
    }
}

/// Annotate a graph's metadata with its cost estimate and a fresh
/// architecture version id. Returns the report alongside.
pub fn annotate(table: &CostTable, graph: &mut GraphState) -> CostReport {
    let report = estimate(table, graph);
    graph
        .metadata
        .insert("cost_estimate".to_string(), json!(report.total));
    graph
        .metadata
        .insert("cost_breakdown".to_string(), json!(report.breakdown));
    graph.metadata.insert(
        "architecture_version_id".to_string(),
        json!(Uuid::new_v4().to_string()),
    );
    report
}
