//! Graph data model, store and invariants for the skyforge lifecycle.
//!
//! An architecture moves through three phases (intent, reasoned,
//! implementation), all carried by the same [`GraphState`] shape. This
//! crate owns that shape, the in-memory [`GraphStore`] with
//! relation-filtered traversal, the canonical convergence hash, the
//! cross-phase invariant checks, and graph differencing.
//!
//! # Example
//!
//! ```rust
//! use infra_graph::{Edge, GraphPhase, GraphState, GraphStore, Relation, Resource};
//!
//! let mut graph = GraphState::empty(GraphPhase::Intent);
//! graph.resources.push(Resource::new("web", "compute_service"));
//! graph.resources.push(Resource::new("db", "relational_database"));
//! graph.edges.push(Edge::new("web", "db", Relation::ConnectsTo));
//!
//! infra_graph::validate::check_integrity(&graph).unwrap();
//!
//! let mut store = GraphStore::new();
//! store.import(&graph).unwrap();
//! assert_eq!(store.descendants("web", None).unwrap(), vec!["db"]);
//! ```

pub mod diff;
pub mod error;
pub mod hash;
pub mod state;
pub mod store;
pub mod validate;

pub use diff::diff_graphs;
pub use error::{GraphError, Result};
pub use hash::canonical_hash;
pub use state::{
    is_abstract_type, DecisionLogEntry, Edge, GraphPhase, GraphState, PlanDiff, Relation,
    Resource, ResourceStatus, ABSTRACT_TYPES,
};
pub use store::GraphStore;
pub use validate::{verify_structure, StructuralViolation};
