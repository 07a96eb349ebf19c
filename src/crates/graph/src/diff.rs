//! Differencing of implementation graphs.

use std::collections::{HashMap, HashSet};

use crate::state::{GraphState, PlanDiff};

/// Compute the change set that turns `old` into `new`.
///
/// A resource counts as an addition when its id is new or when any stable
/// field (type, properties, parent, status) differs; `metadata` changes
/// alone do not produce an entry. Edges compare by their full triple.
pub fn diff_graphs(old: &GraphState, new: &GraphState) -> PlanDiff {
    let old_by_id: HashMap<&str, &crate::state::Resource> =
        old.resources.iter().map(|r| (r.id.as_str(), r)).collect();
    let new_ids: HashSet<&str> = new.ids().collect();

    let add_resources = new
        .resources
        .iter()
        .filter(|r| {
            old_by_id.get(r.id.as_str()).map_or(true, |prev| {
                prev.resource_type != r.resource_type
                    || prev.properties != r.properties
                    || prev.parent_id != r.parent_id
                    || prev.status != r.status
            })
        })
        .cloned()
        .collect();

    let remove_resources = old
        .ids()
        .filter(|id| !new_ids.contains(id))
        .map(String::from)
        .collect();

    let old_edges: HashSet<_> = old.edges.iter().map(|e| e.sort_key()).collect();
    let new_edges: HashSet<_> = new.edges.iter().map(|e| e.sort_key()).collect();

    let add_edges = new
        .edges
        .iter()
        .filter(|e| !old_edges.contains(&e.sort_key()))
        .cloned()
        .collect();
    let remove_edges = old
        .edges
        .iter()
        .filter(|e| !new_edges.contains(&e.sort_key()))
        .cloned()
        .collect();

    PlanDiff {
        add_resources,
        remove_resources,
        add_edges,
        remove_edges,
        reasoning: new.reasoning.clone().unwrap_or_default(),
        logs: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Edge, GraphPhase, Relation, Resource};

    #[test]
    fn diff_detects_adds_removes_and_updates() {
        let mut old = GraphState::empty(GraphPhase::Implementation);
        old.resources.push(Resource::new("web", "aws_instance"));
        old.resources.push(Resource::new("legacy", "aws_s3_bucket"));
        old.edges
            .push(Edge::new("web", "legacy", Relation::WritesTo));

        let mut new = GraphState::empty(GraphPhase::Implementation);
        new.resources.push(
            Resource::new("web", "aws_instance")
                .with_property("instance_type", serde_json::json!("t3.large")),
        );
        new.resources.push(Resource::new("db", "aws_db_instance"));
        new.edges.push(Edge::new("web", "db", Relation::ConnectsTo));

        let diff = diff_graphs(&old, &new);
        let added: Vec<_> = diff.add_resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(added, vec!["web", "db"]); // web updated, db new
        assert_eq!(diff.remove_resources, vec!["legacy"]);
        assert_eq!(diff.add_edges.len(), 1);
        assert_eq!(diff.remove_edges.len(), 1);
    }

    #[test]
    fn metadata_only_change_is_invisible() {
        let mut old = GraphState::empty(GraphPhase::Implementation);
        old.resources.push(Resource::new("web", "aws_instance"));
        let mut new = old.clone();
        new.resources[0]
            .metadata
            .insert("position".into(), serde_json::json!({"x": 1}));

        let diff = diff_graphs(&old, &new);
        assert!(diff.add_resources.is_empty());
        assert!(diff.remove_resources.is_empty());
    }
}
