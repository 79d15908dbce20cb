use std::collections::HashSet;
use std::fmt::{self, Write};

use log::warn;

use crate::graph::{ComputeGraph, GraphNode};
use crate::operation::OpType;

/// Graphviz layout direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankDir {
    /// Left to right.
    #[default]
    LR,
    /// Top to bottom.
    TB,
}

impl fmt::Display for RankDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankDir::LR => f.write_str("LR"),
            RankDir::TB => f.write_str("TB"),
        }
    }
}

/// Options for [`to_dot`].
#[derive(Debug, Clone, Default)]
pub struct DotOptions {
    pub rank_dir: RankDir,
    /// Only draw nodes these node ids depend on (themselves included).
    pub outputs: Option<Vec<String>>,
}

impl DotOptions {
    pub fn with_rank_dir(mut self, rank_dir: RankDir) -> Self {
        self.rank_dir = rank_dir;
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(outputs.into_iter().map(Into::into).collect());
        self
    }
}

fn node_style(op_type: OpType) -> &'static str {
    match op_type {
        OpType::Input => "shape=ellipse, style=filled, fillcolor=lightblue",
        OpType::Output => "shape=ellipse, style=filled, fillcolor=lightgray",
        OpType::Math => "shape=box",
        OpType::Shape => "shape=box, style=dashed",
        OpType::Activation => "shape=box, style=rounded",
        OpType::Reduction => "shape=trapezium",
        OpType::Nn => "shape=box3d",
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Ids of `outputs` and everything they transitively depend on.
fn reachable(graph: &ComputeGraph, outputs: &[String]) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();
    for id in outputs {
        if graph.node(id).is_some() {
            stack.push(id);
        } else {
            warn!("dot export: output node `{id}` not in graph, ignored");
        }
    }
    while let Some(id) = stack.pop() {
        if !seen.insert(id.to_string()) {
            continue;
        }
        stack.extend(graph.input_nodes_of(id).into_iter().map(|n| n.id.as_str()));
    }
    seen
}

fn node_label(node: &GraphNode) -> String {
    let mut label = format!("{}\\n{}", escape(&node.id), node.operation.name());
    for spec in &node.outputs {
        let _ = write!(label, "\\n{}{}", spec.dtype, spec.shape);
    }
    label
}

/// Render `graph` in Graphviz DOT syntax.
pub fn to_dot(graph: &ComputeGraph, options: &DotOptions) -> String {
    let keep = options.outputs.as_deref().map(|o| reachable(graph, o));
    let included = |id: &str| keep.as_ref().map_or(true, |k| k.contains(id));

    let mut out = String::from("digraph {\n");
    let _ = writeln!(out, "  rankdir={};", options.rank_dir);
    out.push_str("  node [fontname=\"Helvetica\"];\n");
    for node in graph.nodes().filter(|n| included(&n.id)) {
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\", {}];",
            escape(&node.id),
            node_label(node),
            node_style(node.operation.op_type())
        );
    }
    for edge in graph
        .edges()
        .filter(|e| included(&e.source) && included(&e.destination))
    {
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}{}\"];",
            escape(&edge.source),
            escape(&edge.destination),
            edge.spec.dtype,
            edge.spec.shape
        );
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;
    use crate::ops;
    use crate::spec::TensorSpec;
    use tapestry_core::DType;

    fn graph() -> ComputeGraph {
        let spec = TensorSpec::new("x", (2, 3), DType::F32);
        let mut g = ComputeGraph::new();
        for (id, op) in [
            ("x", ops::input()),
            ("act", ops::relu()),
            ("side", ops::tanh()),
            ("out", ops::output()),
        ] {
            g.add_node(GraphNode::from_operation(id, op, vec![spec.clone()]).unwrap())
                .unwrap();
        }
        g.connect("x", "act", 0, 0).unwrap();
        g.connect("act", "out", 0, 0).unwrap();
        g.connect("x", "side", 0, 0).unwrap();
        g
    }

    #[test]
    fn test_dot_layout() {
        let g = graph();
        let dot = to_dot(&g, &DotOptions::default());
        assert!(dot.starts_with("digraph {\n  rankdir=LR;"));
        assert!(dot.contains(
            "\"x\" [label=\"x\\ninput\\nfp32[2, 3]\", shape=ellipse, \
             style=filled, fillcolor=lightblue];"
        ));
        assert!(dot.contains("\"x\" -> \"act\" [label=\"fp32[2, 3]\"];"));
        assert_eq!(dot, to_dot(&g, &DotOptions::default()));

        let tb = to_dot(&g, &DotOptions::default().with_rank_dir(RankDir::TB));
        assert!(tb.contains("rankdir=TB;"));
    }

    #[test]
    fn test_dot_restricted_to_outputs() {
        let g = graph();
        let dot = to_dot(&g, &DotOptions::default().with_outputs(["out"]));
        assert!(dot.contains("\"act\""));
        assert!(!dot.contains("\"side\""));
        assert!(!dot.contains("-> \"side\""));
    }
}
