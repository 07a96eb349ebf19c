//! Graph invariant checks.
//!
//! Hard invariants (unique ids, referentially valid edges) make a payload
//! unusable and return errors. Cross-phase invariants (monotonicity,
//! semantic stability, materialization) and structural checks return the
//! violating ids so callers decide between retrying a cycle, warning, or
//! surfacing.

use std::collections::{HashMap, HashSet};

use crate::error::{GraphError, Result};
use crate::state::{is_abstract_type, GraphState, Relation};

/// Check unique resource ids and referentially valid edges.
pub fn check_integrity(state: &GraphState) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for resource in &state.resources {
        if !seen.insert(&resource.id) {
            return Err(GraphError::DuplicateNode(resource.id.clone()));
        }
    }
    for edge in &state.edges {
        if edge.source == edge.target {
            return Err(GraphError::SelfLoop(edge.source.clone()));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !seen.contains(endpoint.as_str()) {
                return Err(GraphError::DanglingEdge {
                    from: edge.source.clone(),
                    target: edge.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Ids present in `base` but missing from `derived`. Empty means the
/// derived graph preserves identity.
pub fn missing_ids(base: &GraphState, derived: &GraphState) -> Vec<String> {
    let derived_ids: HashSet<&str> = derived.ids().collect();
    base.ids()
        .filter(|id| !derived_ids.contains(id))
        .map(String::from)
        .collect()
}

/// Ids whose semantic type changed between `base` and `derived`,
/// reported as `(id, base_type, derived_type)`.
pub fn changed_types(base: &GraphState, derived: &GraphState) -> Vec<(String, String, String)> {
    let base_types: HashMap<&str, &str> = base
        .resources
        .iter()
        .map(|r| (r.id.as_str(), r.resource_type.as_str()))
        .collect();
    derived
        .resources
        .iter()
        .filter_map(|r| {
            base_types.get(r.id.as_str()).and_then(|base_type| {
                (*base_type != r.resource_type).then(|| {
                    (
                        r.id.clone(),
                        (*base_type).to_string(),
                        r.resource_type.clone(),
                    )
                })
            })
        })
        .collect()
}

/// Ids that still carry an abstract semantic type. Must be empty for
/// a complete implementation graph.
pub fn lingering_abstract_ids(state: &GraphState) -> Vec<String> {
    state
        .resources
        .iter()
        .filter(|r| is_abstract_type(&r.resource_type))
        .map(|r| r.id.clone())
        .collect()
}

/// One structural problem found by [`verify_structure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralViolation {
    /// `parent_id` points at a missing or non-container resource.
    BadParent {
        /// The child resource.
        child: String,
        /// The claimed parent id.
        parent: String,
    },
    /// A network zone has no containing network.
    OrphanZone {
        /// The zone resource id.
        zone: String,
    },
    /// A `connects_to` edge between types the provider policy forbids.
    DisallowedConnection {
        /// Edge source id.
        source: String,
        /// Edge target id.
        target: String,
        /// Why the connection is forbidden.
        reason: String,
    },
    /// The `contains` relation forms a cycle.
    ContainmentCycle {
        /// A node on the cycle.
        node: String,
    },
}

impl std::fmt::Display for StructuralViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructuralViolation::BadParent { child, parent } => {
                write!(f, "'{child}' names parent '{parent}' which is not a container")
            }
            StructuralViolation::OrphanZone { zone } => {
                write!(f, "zone '{zone}' has no containing network")
            }
            StructuralViolation::DisallowedConnection {
                source,
                target,
                reason,
            } => write!(f, "connection {source} -> {target} not allowed: {reason}"),
            StructuralViolation::ContainmentCycle { node } => {
                write!(f, "containment cycle through '{node}'")
            }
        }
    }
}

/// Coarse category of a resource type, derived by substring matching so
/// that both semantic and provider types classify without a lookup table
/// per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeCategory {
    Compute,
    Database,
    Cache,
    Storage,
    LoadBalancer,
    Queue,
    Topic,
    Network,
    Other,
}

fn categorize(resource_type: &str) -> TypeCategory {
    let t = resource_type;
    if t.contains("vpc") || t.contains("subnet") || t.contains("network") {
        TypeCategory::Network
    } else if t.contains("cache") || t.contains("redis") || t.contains("memcache") {
        TypeCategory::Cache
    } else if t.contains("db") || t.contains("database") || t.contains("rds") {
        TypeCategory::Database
    } else if t.contains("lb") || t.contains("load_balancer") {
        TypeCategory::LoadBalancer
    } else if t.contains("queue") || t.contains("sqs") {
        TypeCategory::Queue
    } else if t.contains("topic") || t.contains("sns") || t.contains("pubsub") {
        TypeCategory::Topic
    } else if t.contains("instance") || t.contains("compute") || t.contains("lambda") {
        TypeCategory::Compute
    } else if t.contains("s3") || t.contains("bucket") || t.contains("storage") {
        TypeCategory::Storage
    } else {
        TypeCategory::Other
    }
}

/// Whether a `connects_to` edge between the two types is allowed.
///
/// The table is intentionally small: data stores accept traffic only from
/// compute, load balancers feed compute, and pure network containers do
/// not originate connections. Unknown types are never rejected.
fn connection_allowed(source_type: &str, target_type: &str) -> std::result::Result<(), String> {
    let source = categorize(source_type);
    let target = categorize(target_type);

    if source == TypeCategory::Network {
        return Err("network containers do not originate connections".to_string());
    }
    match target {
        TypeCategory::Database | TypeCategory::Cache => {
            if source == TypeCategory::Compute || source == TypeCategory::Other {
                Ok(())
            } else {
                Err("data stores accept connections from compute only".to_string())
            }
        }
        TypeCategory::Compute => match source {
            TypeCategory::LoadBalancer | TypeCategory::Compute | TypeCategory::Other => Ok(()),
            _ => Err("compute accepts traffic from load balancers and compute".to_string()),
        },
        _ => Ok(()),
    }
}

fn is_container_type(resource_type: &str) -> bool {
    matches!(categorize(resource_type), TypeCategory::Network)
}

fn is_zone_type(resource_type: &str) -> bool {
    resource_type.contains("subnet") || resource_type == "network_zone"
}

/// Structural verification of an (implementation) graph.
///
/// Violations downgrade the architecture to warning status; they never
/// abort the loop that called this.
pub fn verify_structure(state: &GraphState) -> Vec<StructuralViolation> {
    let mut violations = Vec::new();
    let types: HashMap<&str, &str> = state
        .resources
        .iter()
        .map(|r| (r.id.as_str(), r.resource_type.as_str()))
        .collect();

    // (a) every parent_id resolves to a container-typed resource.
    for resource in &state.resources {
        if let Some(parent) = &resource.parent_id {
            let ok = types
                .get(parent.as_str())
                .map(|t| is_container_type(t))
                .unwrap_or(false);
            if !ok {
                violations.push(StructuralViolation::BadParent {
                    child: resource.id.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }

    // (b) every zone is contained in a network.
    for resource in &state.resources {
        if !is_zone_type(&resource.resource_type) {
            continue;
        }
        let by_parent = resource
            .parent_id
            .as_deref()
            .and_then(|p| types.get(p))
            .map(|t| is_container_type(t))
            .unwrap_or(false);
        let by_edge = state.edges.iter().any(|e| {
            e.relation == Relation::Contains
                && e.target == resource.id
                && types
                    .get(e.source.as_str())
                    .map(|t| is_container_type(t))
                    .unwrap_or(false)
        });
        if !by_parent && !by_edge {
            violations.push(StructuralViolation::OrphanZone {
                zone: resource.id.clone(),
            });
        }
    }

    // (c) connects_to edges obey the provider policy table.
    for edge in &state.edges {
        if edge.relation != Relation::ConnectsTo {
            continue;
        }
        let (Some(source_type), Some(target_type)) = (
            types.get(edge.source.as_str()),
            types.get(edge.target.as_str()),
        ) else {
            continue;
        };
        if let Err(reason) = connection_allowed(source_type, target_type) {
            violations.push(StructuralViolation::DisallowedConnection {
                source: edge.source.clone(),
                target: edge.target.clone(),
                reason,
            });
        }
    }

    // (d) contains (edges plus parent_id links) is acyclic.
    if let Some(node) = containment_cycle(state) {
        violations.push(StructuralViolation::ContainmentCycle { node });
    }

    violations
}

/// Find a node on a containment cycle, if one exists. Containment edges
/// and `parent_id` links are treated as one ownership relation.
fn containment_cycle(state: &GraphState) -> Option<String> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &state.edges {
        if edge.relation == Relation::Contains {
            children
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
    }
    for resource in &state.resources {
        if let Some(parent) = &resource.parent_id {
            children
                .entry(parent.as_str())
                .or_default()
                .push(resource.id.as_str());
        }
    }

    // Iterative DFS with colors: 0 unvisited, 1 on stack, 2 done.
    let mut color: HashMap<&str, u8> = HashMap::new();
    for start in state.ids() {
        if color.get(start).copied().unwrap_or(0) != 0 {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        color.insert(start, 1);
        while let Some((node, idx)) = stack.pop() {
            let next = children
                .get(node)
                .and_then(|c| c.get(idx))
                .copied();
            match next {
                Some(child) => {
                    stack.push((node, idx + 1));
                    match color.get(child).copied().unwrap_or(0) {
                        0 => {
                            color.insert(child, 1);
                            stack.push((child, 0));
                        }
                        1 => return Some(child.to_string()),
                        _ => {}
                    }
                }
                None => {
                    color.insert(node, 2);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Edge, GraphPhase, GraphState, Relation, Resource};

    fn graph(resources: Vec<Resource>, edges: Vec<Edge>) -> GraphState {
        let mut g = GraphState::empty(GraphPhase::Implementation);
        g.resources = resources;
        g.edges = edges;
        g
    }

    #[test]
    fn integrity_rejects_duplicate_ids() {
        let g = graph(
            vec![
                Resource::new("web", "aws_instance"),
                Resource::new("web", "aws_instance"),
            ],
            vec![],
        );
        assert!(matches!(
            check_integrity(&g),
            Err(GraphError::DuplicateNode(_))
        ));
    }

    #[test]
    fn integrity_rejects_dangling_edges() {
        let g = graph(
            vec![Resource::new("web", "aws_instance")],
            vec![Edge::new("web", "ghost", Relation::ConnectsTo)],
        );
        assert!(matches!(
            check_integrity(&g),
            Err(GraphError::DanglingEdge { .. })
        ));
    }

    #[test]
    fn monotonicity_reports_dropped_ids() {
        let base = graph(
            vec![
                Resource::new("web", "compute_service"),
                Resource::new("db", "relational_database"),
            ],
            vec![],
        );
        let derived = graph(vec![Resource::new("web", "compute_service")], vec![]);
        assert_eq!(missing_ids(&base, &derived), vec!["db".to_string()]);
    }

    #[test]
    fn semantic_stability_reports_type_changes() {
        let base = graph(vec![Resource::new("db", "relational_database")], vec![]);
        let derived = graph(vec![Resource::new("db", "object_storage")], vec![]);
        let changed = changed_types(&base, &derived);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].0, "db");
    }

    #[test]
    fn materialization_finds_abstract_leftovers() {
        let g = graph(
            vec![
                Resource::new("vpc-main", "aws_vpc"),
                Resource::new("web", "compute_service"),
            ],
            vec![],
        );
        assert_eq!(lingering_abstract_ids(&g), vec!["web".to_string()]);
    }

    #[test]
    fn structure_flags_orphan_zone() {
        let g = graph(vec![Resource::new("subnet-public", "aws_subnet")], vec![]);
        let violations = verify_structure(&g);
        assert!(violations
            .iter()
            .any(|v| matches!(v, StructuralViolation::OrphanZone { zone } if zone == "subnet-public")));
    }

    #[test]
    fn structure_accepts_contained_zone() {
        let g = graph(
            vec![
                Resource::new("vpc-main", "aws_vpc"),
                Resource::new("subnet-public", "aws_subnet").with_parent("vpc-main"),
            ],
            vec![],
        );
        assert!(verify_structure(&g).is_empty());
    }

    #[test]
    fn structure_flags_db_fed_by_lb() {
        let g = graph(
            vec![
                Resource::new("edge-lb", "aws_lb"),
                Resource::new("db", "aws_db_instance"),
            ],
            vec![Edge::new("edge-lb", "db", Relation::ConnectsTo)],
        );
        let violations = verify_structure(&g);
        assert!(violations
            .iter()
            .any(|v| matches!(v, StructuralViolation::DisallowedConnection { .. })));
    }

    #[test]
    fn structure_allows_compute_to_db() {
        let g = graph(
            vec![
                Resource::new("web", "aws_instance"),
                Resource::new("db", "aws_db_instance"),
            ],
            vec![Edge::new("web", "db", Relation::ConnectsTo)],
        );
        assert!(verify_structure(&g).is_empty());
    }

    #[test]
    fn structure_detects_containment_cycle() {
        let g = graph(
            vec![
                Resource::new("vpc-a", "aws_vpc"),
                Resource::new("vpc-b", "aws_vpc"),
            ],
            vec![
                Edge::new("vpc-a", "vpc-b", Relation::Contains),
                Edge::new("vpc-b", "vpc-a", Relation::Contains),
            ],
        );
        let violations = verify_structure(&g);
        assert!(violations
            .iter()
            .any(|v| matches!(v, StructuralViolation::ContainmentCycle { .. })));
    }

    #[test]
    fn parent_cycle_via_parent_id_detected() {
        let mut a = Resource::new("vpc-a", "aws_vpc");
        a.parent_id = Some("vpc-b".into());
        let mut b = Resource::new("vpc-b", "aws_vpc");
        b.parent_id = Some("vpc-a".into());
        let g = graph(vec![a, b], vec![]);
        let violations = verify_structure(&g);
        assert!(violations
            .iter()
            .any(|v| matches!(v, StructuralViolation::ContainmentCycle { .. })));
    }
}
