//! In-memory directed graph store.
//!
//! The store indexes resources and their edges for O(1) membership checks
//! and adjacency access, and provides BFS traversal in both directions.
//! Traversal accepts a relation filter so that ownership queries (blast
//! radius over `contains`) are never polluted by connectivity cycles.
//!
//! The store is the single mutable home of the implementation graph; the
//! intent and reasoned graphs stay as immutable [`GraphState`] values in
//! the session.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{GraphError, Result};
use crate::state::{Edge, GraphPhase, GraphState, Relation, Resource};

/// Directed graph with O(1) node/edge access and relation-aware traversal.
#[derive(Debug, Default, Clone)]
pub struct GraphStore {
    nodes: HashMap<String, Resource>,
    /// Edges keyed by source id.
    out_edges: HashMap<String, Vec<Edge>>,
    /// Edges keyed by target id.
    in_edges: HashMap<String, Vec<Edge>>,
    /// Node insertion order, for stable export.
    order: Vec<String>,
}

impl GraphStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.out_edges.values().map(Vec::len).sum()
    }

    /// Whether the store holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a node with the given id exists.
    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Result<&Resource> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    /// Insert a node. Replaces an existing node with the same id in place,
    /// keeping its edges.
    pub fn add_node(&mut self, resource: Resource) {
        if !self.nodes.contains_key(&resource.id) {
            self.order.push(resource.id.clone());
        }
        self.nodes.insert(resource.id.clone(), resource);
    }

    /// Remove a node and every edge incident to it.
    pub fn remove_node(&mut self, id: &str) -> Result<Resource> {
        let resource = self
            .nodes
            .remove(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        self.order.retain(|n| n != id);

        // Drop edges touching the removed node from both indexes.
        if let Some(outgoing) = self.out_edges.remove(id) {
            for edge in outgoing {
                if let Some(list) = self.in_edges.get_mut(&edge.target) {
                    list.retain(|e| e.source != id);
                }
            }
        }
        if let Some(incoming) = self.in_edges.remove(id) {
            for edge in incoming {
                if let Some(list) = self.out_edges.get_mut(&edge.source) {
                    list.retain(|e| e.target != id);
                }
            }
        }
        Ok(resource)
    }

    /// Whether an edge with the given endpoints and relation exists.
    pub fn has_edge(&self, source: &str, target: &str, relation: Relation) -> bool {
        self.out_edges
            .get(source)
            .map(|edges| {
                edges
                    .iter()
                    .any(|e| e.target == target && e.relation == relation)
            })
            .unwrap_or(false)
    }

    /// Insert an edge. Both endpoints must exist; self-loops are rejected.
    /// Inserting an identical edge twice is a no-op.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if edge.source == edge.target {
            return Err(GraphError::SelfLoop(edge.source));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::DanglingEdge {
                    from: edge.source.clone(),
                    target: edge.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        if self.has_edge(&edge.source, &edge.target, edge.relation) {
            return Ok(());
        }
        self.in_edges
            .entry(edge.target.clone())
            .or_default()
            .push(edge.clone());
        self.out_edges
            .entry(edge.source.clone())
            .or_default()
            .push(edge);
        Ok(())
    }

    /// Remove an edge.
    pub fn remove_edge(&mut self, source: &str, target: &str, relation: Relation) -> Result<()> {
        if !self.has_edge(source, target, relation) {
            return Err(GraphError::EdgeNotFound {
                from: source.to_string(),
                target: target.to_string(),
            });
        }
        if let Some(list) = self.out_edges.get_mut(source) {
            list.retain(|e| !(e.target == target && e.relation == relation));
        }
        if let Some(list) = self.in_edges.get_mut(target) {
            list.retain(|e| !(e.source == source && e.relation == relation));
        }
        Ok(())
    }

    /// Outgoing edges of a node.
    pub fn edges_out(&self, id: &str) -> Result<&[Edge]> {
        self.node(id)?;
        Ok(self.out_edges.get(id).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Incoming edges of a node.
    pub fn edges_in(&self, id: &str) -> Result<&[Edge]> {
        self.node(id)?;
        Ok(self.in_edges.get(id).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Forward BFS from `id`, excluding `id` itself. When `relation_filter`
    /// is set, only edges of that relation are followed.
    pub fn descendants(&self, id: &str, relation_filter: Option<Relation>) -> Result<Vec<String>> {
        self.traverse(id, relation_filter, Direction::Forward)
    }

    /// Backward BFS from `id`, excluding `id` itself.
    pub fn ancestors(&self, id: &str, relation_filter: Option<Relation>) -> Result<Vec<String>> {
        self.traverse(id, relation_filter, Direction::Backward)
    }

    fn traverse(
        &self,
        start: &str,
        relation_filter: Option<Relation>,
        direction: Direction,
    ) -> Result<Vec<String>> {
        self.node(start)?;

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut result = Vec::new();
        visited.insert(start);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            let edges = match direction {
                Direction::Forward => self.out_edges.get(current),
                Direction::Backward => self.in_edges.get(current),
            };
            let Some(edges) = edges else { continue };
            for edge in edges {
                if let Some(filter) = relation_filter {
                    if edge.relation != filter {
                        continue;
                    }
                }
                let next = match direction {
                    Direction::Forward => edge.target.as_str(),
                    Direction::Backward => edge.source.as_str(),
                };
                if visited.insert(next) {
                    result.push(next.to_string());
                    queue.push_back(next);
                }
            }
        }
        Ok(result)
    }

    /// Export the store as an implementation-phase [`GraphState`], nodes in
    /// insertion order.
    pub fn export(&self) -> GraphState {
        let mut state = GraphState::empty(GraphPhase::Implementation);
        for id in &self.order {
            if let Some(resource) = self.nodes.get(id) {
                state.resources.push(resource.clone());
            }
        }
        for id in &self.order {
            if let Some(edges) = self.out_edges.get(id) {
                state.edges.extend(edges.iter().cloned());
            }
        }
        state
    }

    /// Replace the store contents with the given graph.
    pub fn import(&mut self, state: &GraphState) -> Result<()> {
        let mut fresh = GraphStore::new();
        for resource in &state.resources {
            if fresh.has_node(&resource.id) {
                return Err(GraphError::DuplicateNode(resource.id.clone()));
            }
            fresh.add_node(resource.clone());
        }
        for edge in &state.edges {
            fresh.add_edge(edge.clone())?;
        }
        *self = fresh;
        Ok(())
    }

    /// Clear all nodes and edges.
    pub fn clear(&mut self) {
        *self = GraphStore::new();
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}
