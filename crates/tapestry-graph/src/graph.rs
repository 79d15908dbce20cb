use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use tapestry_core::{Error, Result};

use crate::operation::{Operation, ValidationResult};
use crate::spec::TensorSpec;

// ComputeGraph — operations as nodes, tensors as edges
//
// A ComputeGraph is a plain, mutable DAG. Nodes carry an Operation together
// with the specs of what it consumes and produces; edges carry the spec of
// the tensor flowing from one node's output port to another node's input
// port. Both are kept in insertion order, which makes traversal, export and
// topological tie-breaking deterministic.
//
// Mutation is permissive: add_edge accepts edges whose
// endpoints are missing or whose ports are out of range. Such defects are
// collected by validate(), in the same spirit as Operation::validate_inputs.
//
// Cloning the graph is a deep copy of the structure; operations are shared
// because they are immutable.

/// One operation placed in a graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub operation: Arc<dyn Operation>,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub metadata: BTreeMap<String, String>,
}

impl GraphNode {
    pub fn new(
        id: impl Into<String>,
        operation: Arc<dyn Operation>,
        inputs: Vec<TensorSpec>,
        outputs: Vec<TensorSpec>,
    ) -> Self {
        GraphNode {
            id: id.into(),
            operation,
            inputs,
            outputs,
            metadata: BTreeMap::new(),
        }
    }

    /// A node whose output specs are inferred from `inputs`.
    pub fn from_operation(
        id: impl Into<String>,
        operation: Arc<dyn Operation>,
        inputs: Vec<TensorSpec>,
    ) -> Result<Self> {
        let outputs = operation.infer_outputs(&inputs)?;
        Ok(GraphNode::new(id, operation, inputs, outputs))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A tensor flowing from `source.outputs[source_output_index]` into
/// `destination.inputs[destination_input_index]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub source_output_index: usize,
    pub destination_input_index: usize,
    pub spec: TensorSpec,
}

impl GraphEdge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        source_output_index: usize,
        destination_input_index: usize,
        spec: TensorSpec,
    ) -> Self {
        GraphEdge {
            id: id.into(),
            source: source.into(),
            destination: destination.into(),
            source_output_index,
            destination_input_index,
            spec,
        }
    }
}

/// A directed graph of operations.
#[derive(Debug, Clone, Default)]
pub struct ComputeGraph {
    nodes: IndexMap<String, GraphNode>,
    edges: IndexMap<String, GraphEdge>,
    next_edge: usize,
}

impl ComputeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // Mutation

    /// Add a node, rejecting an id that is already present.
    pub fn add_node(&mut self, node: GraphNode) -> Result<&GraphNode> {
        if self.nodes.contains_key(&node.id) {
            return Err(Error::DuplicateNode(node.id));
        }
        debug!("graph: add node `{}` ({})", node.id, node.operation.name());
        let entry = self.nodes.entry(node.id.clone()).or_insert(node);
        Ok(&*entry)
    }

    /// Add an edge. Endpoints are not checked here; see [`validate`](Self::validate).
    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<&GraphEdge> {
        if self.edges.contains_key(&edge.id) {
            return Err(Error::msg(format!("duplicate graph edge `{}`", edge.id)));
        }
        debug!(
            "graph: add edge `{}` {}:{} -> {}:{}",
            edge.id,
            edge.source,
            edge.source_output_index,
            edge.destination,
            edge.destination_input_index
        );
        let entry = self.edges.entry(edge.id.clone()).or_insert(edge);
        Ok(&*entry)
    }

    /// Connect an existing output port to an input port, taking the edge
    /// spec from the source node and generating the edge id.
    pub fn connect(
        &mut self,
        source: &str,
        destination: &str,
        source_output_index: usize,
        destination_input_index: usize,
    ) -> Result<&GraphEdge> {
        let src = self
            .nodes
            .get(source)
            .ok_or_else(|| Error::NodeNotFound(source.to_string()))?;
        if !self.nodes.contains_key(destination) {
            return Err(Error::NodeNotFound(destination.to_string()));
        }
        let spec = src.outputs.get(source_output_index).cloned().ok_or_else(|| {
            Error::msg(format!(
                "node `{source}` has {} outputs, no output {source_output_index}",
                src.outputs.len()
            ))
        })?;
        let id = self.fresh_edge_id();
        self.add_edge(GraphEdge::new(
            id,
            source,
            destination,
            source_output_index,
            destination_input_index,
            spec,
        ))
    }

    fn fresh_edge_id(&mut self) -> String {
        loop {
            let id = format!("e{}", self.next_edge);
            self.next_edge += 1;
            if !self.edges.contains_key(&id) {
                return id;
            }
        }
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<GraphNode> {
        let node = self.nodes.shift_remove(id)?;
        self.edges
            .retain(|_, e| e.source != node.id && e.destination != node.id);
        debug!("graph: removed node `{id}`");
        Some(node)
    }

    pub fn remove_edge(&mut self, id: &str) -> Option<GraphEdge> {
        self.edges.shift_remove(id)
    }

    /// Remove every node without outgoing edges, returning them.
    pub fn remove_output_nodes(&mut self) -> Vec<GraphNode> {
        let sinks: Vec<String> = self.output_nodes().iter().map(|n| n.id.clone()).collect();
        sinks
            .iter()
            .filter_map(|id| self.remove_node(id))
            .collect()
    }

    // Lookup

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn edge(&self, id: &str) -> Option<&GraphEdge> {
        self.edges.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Edges ending at `id`, in insertion order.
    pub fn incoming_edges<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.values().filter(move |e| e.destination == id)
    }

    /// Edges starting at `id`, in insertion order.
    pub fn outgoing_edges<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.values().filter(move |e| e.source == id)
    }

    // Structural queries

    /// Nodes without incoming edges.
    pub fn input_nodes(&self) -> Vec<&GraphNode> {
        self.nodes
            .values()
            .filter(|n| self.incoming_edges(&n.id).next().is_none())
            .collect()
    }

    /// Nodes without outgoing edges.
    pub fn output_nodes(&self) -> Vec<&GraphNode> {
        self.nodes
            .values()
            .filter(|n| self.outgoing_edges(&n.id).next().is_none())
            .collect()
    }

    /// Nodes feeding `id`, each listed once.
    pub fn input_nodes_of(&self, id: &str) -> Vec<&GraphNode> {
        let mut seen = HashSet::new();
        self.incoming_edges(id)
            .filter(|e| seen.insert(e.source.as_str()))
            .filter_map(|e| self.nodes.get(&e.source))
            .collect()
    }

    /// Nodes fed by `id`, each listed once.
    pub fn output_nodes_of(&self, id: &str) -> Vec<&GraphNode> {
        let mut seen = HashSet::new();
        self.outgoing_edges(id)
            .filter(|e| seen.insert(e.destination.as_str()))
            .filter_map(|e| self.nodes.get(&e.destination))
            .collect()
    }

    /// Kahn's algorithm. Among ready nodes the earliest inserted goes first.
    /// Edges with a missing endpoint are ignored.
    pub fn topological_order(&self) -> Result<Vec<&GraphNode>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for edge in self.edges.values() {
            let (Some(src), Some(dst)) = (
                self.nodes.get_index_of(&edge.source),
                self.nodes.get_index_of(&edge.destination),
            ) else {
                continue;
            };
            successors[src].push(dst);
            in_degree[dst] += 1;
        }

        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &successors[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let nodes = (0..self.nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .filter_map(|i| self.nodes.get_index(i).map(|(id, _)| id.clone()))
                .collect();
            return Err(Error::CycleDetected { nodes });
        }
        Ok(order
            .into_iter()
            .filter_map(|i| self.nodes.get_index(i).map(|(_, n)| n))
            .collect())
    }

    /// Check every edge against the nodes it connects, then check for
    /// cycles. All problems are reported, not just the first.
    pub fn validate(&self) -> ValidationResult {
        let mut reasons = Vec::new();
        for edge in self.edges.values() {
            let src = self.nodes.get(&edge.source);
            let dst = self.nodes.get(&edge.destination);
            if src.is_none() {
                reasons.push(format!(
                    "edge `{}`: source node `{}` does not exist",
                    edge.id, edge.source
                ));
            }
            if dst.is_none() {
                reasons.push(format!(
                    "edge `{}`: destination node `{}` does not exist",
                    edge.id, edge.destination
                ));
            }
            if let Some(src) = src {
                match src.outputs.get(edge.source_output_index) {
                    None => reasons.push(format!(
                        "edge `{}`: source `{}` has {} outputs, index {} is out of range",
                        edge.id,
                        src.id,
                        src.outputs.len(),
                        edge.source_output_index
                    )),
                    Some(spec) if !spec.is_compatible_with(&edge.spec) => reasons.push(format!(
                        "edge `{}`: spec {} does not match output {} of `{}` ({})",
                        edge.id, edge.spec, edge.source_output_index, src.id, spec
                    )),
                    Some(_) => {}
                }
            }
            if let Some(dst) = dst {
                match dst.inputs.get(edge.destination_input_index) {
                    None => reasons.push(format!(
                        "edge `{}`: destination `{}` has {} inputs, index {} is out of range",
                        edge.id,
                        dst.id,
                        dst.inputs.len(),
                        edge.destination_input_index
                    )),
                    Some(spec) if !spec.is_compatible_with(&edge.spec) => reasons.push(format!(
                        "edge `{}`: spec {} does not match input {} of `{}` ({})",
                        edge.id, edge.spec, edge.destination_input_index, dst.id, spec
                    )),
                    Some(_) => {}
                }
            }
        }
        if let Err(e) = self.topological_order() {
            reasons.push(e.to_string());
        }
        ValidationResult::from_reasons(reasons)
    }
}

impl fmt::Display for ComputeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ComputeGraph ({} nodes, {} edges)",
            self.nodes.len(),
            self.edges.len()
        )?;
        for node in self.nodes.values() {
            writeln!(f, "  {} = {}", node.id, node.operation.name())?;
        }
        for edge in self.edges.values() {
            writeln!(
                f,
                "  {}:{} -> {}:{}  {}",
                edge.source,
                edge.source_output_index,
                edge.destination,
                edge.destination_input_index,
                edge.spec
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;
    use tapestry_core::DType;

    fn spec(name: &str) -> TensorSpec {
        TensorSpec::new(name, (2, 3), DType::F32)
    }

    /// a -> b -> c, each a relu over [2, 3].
    fn chain() -> ComputeGraph {
        let mut g = ComputeGraph::new();
        for id in ["a", "b", "c"] {
            g.add_node(GraphNode::from_operation(id, ops::relu(), vec![spec("x")]).unwrap())
                .unwrap();
        }
        g.connect("a", "b", 0, 0).unwrap();
        g.connect("b", "c", 0, 0).unwrap();
        g
    }

    fn ids<'a>(nodes: &[&'a GraphNode]) -> Vec<&'a str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_chain_order_and_queries() {
        let g = chain();
        assert_eq!(ids(&g.topological_order().unwrap()), vec!["a", "b", "c"]);
        assert!(g.validate().is_valid());
        assert_eq!(ids(&g.input_nodes()), vec!["a"]);
        assert_eq!(ids(&g.output_nodes()), vec!["c"]);
        assert_eq!(ids(&g.input_nodes_of("b")), vec!["a"]);
        assert_eq!(ids(&g.output_nodes_of("b")), vec!["c"]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut g = chain();
        g.connect("c", "a", 0, 0).unwrap();
        assert!(matches!(
            g.topological_order(),
            Err(Error::CycleDetected { nodes }) if nodes.len() == 3
        ));
        let r = g.validate();
        assert!(!r.is_valid());
        assert!(r.reasons().iter().any(|m| m.contains("cycle")));
    }

    #[test]
    fn test_insertion_order_tie_breaking() {
        let mut g = ComputeGraph::new();
        for id in ["z", "y", "x"] {
            g.add_node(GraphNode::from_operation(id, ops::relu(), vec![spec("x")]).unwrap())
                .unwrap();
        }
        g.connect("x", "z", 0, 0).unwrap();
        assert_eq!(ids(&g.topological_order().unwrap()), vec!["y", "x", "z"]);
    }

    #[test]
    fn test_duplicate_and_removal() {
        let mut g = chain();
        let dup = GraphNode::from_operation("b", ops::relu(), vec![spec("x")]).unwrap();
        assert!(matches!(g.add_node(dup), Err(Error::DuplicateNode(id)) if id == "b"));

        let removed = g.remove_node("b").unwrap();
        assert_eq!(removed.id, "b");
        assert_eq!(g.edge_count(), 0);

        let mut g = chain();
        let sinks = g.remove_output_nodes();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].id, "c");
        assert_eq!(ids(&g.output_nodes()), vec!["b"]);
    }

    #[test]
    fn test_validate_reports_every_defect() {
        let mut g = chain();
        g.add_edge(GraphEdge::new("dangling", "a", "ghost", 0, 0, spec("x")))
            .unwrap();
        g.add_edge(GraphEdge::new("port", "a", "c", 3, 5, spec("x")))
            .unwrap();
        g.add_edge(GraphEdge::new(
            "mismatch",
            "a",
            "c",
            0,
            0,
            TensorSpec::new("x", (3, 3), DType::F32),
        ))
        .unwrap();
        let r = g.validate();
        // ghost destination, two bad ports, two spec mismatches
        assert_eq!(r.reasons().len(), 5, "{:?}", r.reasons());
        // dangling edges do not break ordering
        assert!(g.topological_order().is_ok());
    }

    #[test]
    fn test_clone_is_deep() {
        let g = chain();
        let mut copy = g.clone();
        copy.remove_node("c");
        assert_eq!(g.node_count(), 3);
        assert_eq!(copy.node_count(), 2);
        assert!(g.to_string().contains("a:0 -> b:0"));
    }
}
