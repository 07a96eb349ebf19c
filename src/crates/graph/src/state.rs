//! Core graph data model.
//!
//! A [`GraphState`] is the serialized form of an architecture at one point
//! of its lifecycle. The same shape carries all three phases: the abstract
//! intent graph, the policy-checked reasoned graph, and the concrete
//! implementation graph. Resource ids are the stable identity across
//! phases; the `type` field switches meaning from a semantic role to a
//! provider type when the graph is materialized.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The closed set of abstract semantic types allowed in intent and
/// reasoned graphs. Implementation graphs must not contain any of these.
pub const ABSTRACT_TYPES: [&str; 9] = [
    "compute_service",
    "relational_database",
    "object_storage",
    "load_balancer",
    "message_queue",
    "pubsub_topic",
    "cache_service",
    "network_container",
    "network_zone",
];

/// Whether a resource type belongs to the abstract semantic set.
pub fn is_abstract_type(resource_type: &str) -> bool {
    ABSTRACT_TYPES.contains(&resource_type)
}

/// Lifecycle phase of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphPhase {
    /// Abstract business-level intent.
    Intent,
    /// Policy-compliant refinement, still semantic.
    Reasoned,
    /// Concrete provider resources.
    Implementation,
}

impl Default for GraphPhase {
    fn default() -> Self {
        GraphPhase::Implementation
    }
}

impl std::fmt::Display for GraphPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphPhase::Intent => write!(f, "intent"),
            GraphPhase::Reasoned => write!(f, "reasoned"),
            GraphPhase::Implementation => write!(f, "implementation"),
        }
    }
}

/// Lifecycle status of a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Declared but not yet applied.
    Planned,
    /// Part of a pending, unconfirmed modification.
    Proposed,
    /// Applied and live.
    Active,
    /// Marked for removal.
    Deleted,
}

impl Default for ResourceStatus {
    fn default() -> Self {
        ResourceStatus::Planned
    }
}

/// Directed relationship kinds between resources.
///
/// `Contains` is the single ownership axis and must stay acyclic; the
/// other relations may form cycles and are excluded from blast-radius
/// traversal by a relation filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Ownership/containment (VPC contains subnet).
    Contains,
    /// Network connectivity.
    ConnectsTo,
    /// Data read dependency.
    ReadsFrom,
    /// Data write dependency.
    WritesTo,
    /// Event publication.
    PublishesTo,
    /// Event consumption.
    ConsumesFrom,
    /// Generic ordering dependency.
    DependsOn,
}

impl Relation {
    /// Stable string form, matching the wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Contains => "contains",
            Relation::ConnectsTo => "connects_to",
            Relation::ReadsFrom => "reads_from",
            Relation::WritesTo => "writes_to",
            Relation::PublishesTo => "publishes_to",
            Relation::ConsumesFrom => "consumes_from",
            Relation::DependsOn => "depends_on",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single node of the architecture graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Stable identity across all lifecycle phases.
    pub id: String,

    /// Semantic role (intent/reasoned) or provider type (implementation).
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Configuration parameters.
    #[serde(default)]
    pub properties: Map<String, Value>,

    /// Id of the containing resource, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Lifecycle status.
    #[serde(default)]
    pub status: ResourceStatus,

    /// Volatile annotations (cost, UI hints). Excluded from hashing.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Resource {
    /// Create a resource with the given id and type and empty properties.
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            properties: Map::new(),
            parent_id: None,
            status: ResourceStatus::default(),
            metadata: Map::new(),
        }
    }

    /// Set the containing resource.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set a configuration property.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// A directed, typed edge between two resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source resource id.
    pub source: String,
    /// Target resource id.
    pub target: String,
    /// Relationship kind.
    pub relation: Relation,
}

impl Edge {
    /// Create an edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>, relation: Relation) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation,
        }
    }

    /// Sort key used by the canonical hash.
    pub fn sort_key(&self) -> (String, String, &'static str) {
        (
            self.source.clone(),
            self.target.clone(),
            self.relation.as_str(),
        )
    }
}

/// A complete graph at one lifecycle phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    /// Lifecycle phase of this graph.
    #[serde(default)]
    pub graph_phase: GraphPhase,

    /// Version id, regenerated on every new graph. Excluded from hashing.
    #[serde(default = "Uuid::new_v4")]
    pub graph_version: Uuid,

    /// Nodes, in insertion order. Ids are unique.
    #[serde(default)]
    pub resources: Vec<Resource>,

    /// Edges, in insertion order.
    #[serde(default)]
    pub edges: Vec<Edge>,

    /// Volatile annotations (cost estimate, version ids).
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Model-supplied explanation of the graph or its latest change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl GraphState {
    /// Create an empty graph in the given phase.
    pub fn empty(phase: GraphPhase) -> Self {
        Self {
            graph_phase: phase,
            graph_version: Uuid::new_v4(),
            resources: Vec::new(),
            edges: Vec::new(),
            metadata: Map::new(),
            reasoning: None,
        }
    }

    /// Look up a resource by id.
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// All resource ids, in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(|r| r.id.as_str())
    }

    /// Whether a resource with the given id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.resources.iter().any(|r| r.id == id)
    }
}

/// A set of changes between two implementation graphs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanDiff {
    /// Resources to add or update.
    #[serde(default)]
    pub add_resources: Vec<Resource>,
    /// Resource ids to remove.
    #[serde(default)]
    pub remove_resources: Vec<String>,
    /// Edges to add.
    #[serde(default)]
    pub add_edges: Vec<Edge>,
    /// Edges to remove.
    #[serde(default)]
    pub remove_edges: Vec<Edge>,
    /// Why these changes are being made.
    #[serde(default)]
    pub reasoning: String,
    /// Progress log accumulated while producing the diff.
    #[serde(default)]
    pub logs: Vec<String>,
}

/// One entry of the per-session decision log. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    /// Lifecycle stage that produced the decision (e.g. "reasoned").
    pub stage: String,
    /// Self-correction cycle number within the stage.
    pub cycle: u32,
    /// Wall-clock time of the decision.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Policy or rule that triggered the decision.
    pub trigger: String,
    /// Resource ids affected by the decision.
    #[serde(default)]
    pub affected_nodes: Vec<String>,
    /// What was changed.
    pub action: String,
    /// Outcome of the change.
    pub result: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_roundtrip_preserves_type_key() {
        let r = Resource::new("web", "compute_service").with_parent("subnet-public");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "compute_service");
        assert_eq!(json["parent_id"], "subnet-public");

        let back: Resource = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn default_status_is_planned() {
        let r: Resource = serde_json::from_value(serde_json::json!({
            "id": "db",
            "type": "relational_database"
        }))
        .unwrap();
        assert_eq!(r.status, ResourceStatus::Planned);
    }

    #[test]
    fn relation_wire_format() {
        let e = Edge::new("web", "db", Relation::ConnectsTo);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["relation"], "connects_to");
    }

    #[test]
    fn unknown_relation_is_a_parse_error() {
        let result: std::result::Result<Edge, _> = serde_json::from_value(serde_json::json!({
            "source": "a",
            "target": "b",
            "relation": "talks_to"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn abstract_type_set_is_closed() {
        assert!(is_abstract_type("compute_service"));
        assert!(is_abstract_type("network_zone"));
        assert!(!is_abstract_type("aws_instance"));
        assert!(!is_abstract_type("aws_vpc"));
    }

    #[test]
    fn graph_state_roundtrips_through_its_persisted_form() {
        let mut g = GraphState::empty(GraphPhase::Reasoned);
        g.resources.push(
            Resource::new("db", "relational_database")
                .with_property("encrypted", serde_json::json!(true)),
        );
        g.resources
            .push(Resource::new("web", "compute_service").with_parent("subnet-public"));
        g.edges.push(Edge::new("web", "db", Relation::ReadsFrom));
        g.metadata
            .insert("cost_estimate".into(), serde_json::json!("$60/mo"));
        g.reasoning = Some("isolated the database".into());

        let text = serde_json::to_string_pretty(&g).unwrap();
        let back: GraphState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn graph_state_defaults() {
        let g: GraphState = serde_json::from_value(serde_json::json!({
            "graph_phase": "intent",
            "resources": [],
            "edges": []
        }))
        .unwrap();
        assert_eq!(g.graph_phase, GraphPhase::Intent);
        assert!(g.resources.is_empty());
    }
}
