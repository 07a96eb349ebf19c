//! Canonical graph hashing for fixed-point convergence checks.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::state::GraphState;

/// Deterministic hex digest of a graph's stable content.
///
/// Resources are sorted by id and serialized without `metadata`; edges are
/// sorted by `(source, target, relation)`. `graph_version`, `graph_phase`
/// metadata and `reasoning` are excluded so that volatile fields (cost
/// estimates, version ids, timestamps) never break convergence. serde_json
/// maps are BTree-backed, so nested object keys serialize in sorted order.
pub fn canonical_hash(state: &GraphState) -> String {
    let mut resources: Vec<Value> = state
        .resources
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "type": r.resource_type,
                "properties": r.properties,
                "parent_id": r.parent_id,
                "status": r.status,
            })
        })
        .collect();
    resources.sort_by(|a, b| {
        a["id"]
            .as_str()
            .unwrap_or_default()
            .cmp(b["id"].as_str().unwrap_or_default())
    });

    let mut edges: Vec<&crate::state::Edge> = state.edges.iter().collect();
    edges.sort_by_key(|e| e.sort_key());
    let edges: Vec<Value> = edges
        .into_iter()
        .map(|e| {
            json!({
                "source": e.source,
                "target": e.target,
                "relation": e.relation,
            })
        })
        .collect();

    let canonical = json!({ "resources": resources, "edges": edges });
    // Serialization of an in-memory Value cannot fail.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}
