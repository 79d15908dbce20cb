use std::collections::HashMap;
use std::fmt::Write;

use log::warn;
use tapestry_core::{DType, Result};

use crate::graph::{ComputeGraph, GraphNode};
use crate::operation::OpType;
use crate::spec::TensorSpec;

// StableHLO export — the supported subset as an MLIR-style listing
//
// Nodes are visited in topological order. Every (node, output) pair gets an
// SSA name; every node input with no incoming edge becomes a function
// argument %argN. Lowering rules:
//
//   input / output   forward their operands unchanged
//   add              stablehlo.add, after stablehlo.convert and
//                    stablehlo.broadcast_in_dim on any operand whose element
//                    type or shape differs from the result
//   matmul           stablehlo.dot_general, contracting [1] x [0]
//   relu             stablehlo.maximum against a zero constant of the
//                    element type
//
// Anything else is emitted as a `// unsupported` line, and its outputs still
// get SSA names so later lines stay readable. The function returns the
// outputs of the `output` nodes, or of the sink nodes when there are none.

/// Options for [`to_stablehlo`].
#[derive(Debug, Clone)]
pub struct StableHloOptions {
    pub function_name: String,
}

impl Default for StableHloOptions {
    fn default() -> Self {
        StableHloOptions {
            function_name: "main".into(),
        }
    }
}

impl StableHloOptions {
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }
}

fn element_type(dtype: DType) -> &'static str {
    match dtype {
        DType::F32 => "f32",
        DType::F16 => "f16",
        DType::I32 => "i32",
        DType::I8 => "i8",
        DType::I4 => "i4",
        DType::Ternary => "i2",
    }
}

/// Zero literal for a `dense<...>` constant of `dtype`.
fn zero_literal(dtype: DType) -> &'static str {
    if dtype.is_float() {
        "0.000000e+00"
    } else {
        "0"
    }
}

/// `tensor<2x3xf32>`, or `tensor<f32>` for a scalar.
fn tensor_type(spec: &TensorSpec) -> String {
    let mut ty = String::from("tensor<");
    for d in spec.shape.dims() {
        let _ = write!(ty, "{d}x");
    }
    ty.push_str(element_type(spec.dtype));
    ty.push('>');
    ty
}

struct Emitter {
    body: String,
    next_value: usize,
    values: HashMap<(String, usize), String>,
}

impl Emitter {
    fn fresh(&mut self) -> String {
        let name = format!("%{}", self.next_value);
        self.next_value += 1;
        name
    }

    fn line(&mut self, text: &str) {
        self.body.push_str("    ");
        self.body.push_str(text);
        self.body.push('\n');
    }

    fn bind(&mut self, node: &GraphNode, index: usize, value: String) {
        self.values.insert((node.id.clone(), index), value);
    }

    /// `value` converted to the element type of `to` and broadcast to its
    /// shape. Operand axes line up with the trailing result axes.
    fn coerce(&mut self, value: &str, from: &TensorSpec, to: &TensorSpec) -> String {
        let mut value = value.to_string();
        let mut from = from.clone();
        if from.dtype != to.dtype {
            let converted = TensorSpec::new(from.name.clone(), from.shape.clone(), to.dtype);
            let v = self.fresh();
            self.line(&format!(
                "{v} = stablehlo.convert {value} : ({}) -> {}",
                tensor_type(&from),
                tensor_type(&converted)
            ));
            value = v;
            from = converted;
        }
        if from.shape == to.shape {
            return value;
        }
        let lead = to.rank().saturating_sub(from.rank());
        let dims: Vec<String> = (lead..to.rank()).map(|d| d.to_string()).collect();
        let v = self.fresh();
        self.line(&format!(
            "{v} = stablehlo.broadcast_in_dim {value}, dims = [{}] : ({}) -> {}",
            dims.join(", "),
            tensor_type(&from),
            tensor_type(to)
        ));
        v
    }

    fn lower(&mut self, node: &GraphNode, operands: &[String]) {
        let op = node.operation.name();
        let out_ty = node.outputs.first().map(tensor_type).unwrap_or_default();
        match (node.operation.op_type(), op, operands) {
            (OpType::Input | OpType::Output, _, _) => {
                for (i, value) in operands.iter().enumerate().take(node.outputs.len()) {
                    self.bind(node, i, value.clone());
                }
            }
            (_, "add", [a, b]) if !node.outputs.is_empty() => {
                let out = &node.outputs[0];
                let a = self.coerce(a, &node.inputs[0], out);
                let b = self.coerce(b, &node.inputs[1], out);
                let v = self.fresh();
                self.line(&format!("{v} = stablehlo.add {a}, {b} : {out_ty}"));
                self.bind(node, 0, v);
            }
            (_, "matmul", [a, b]) => {
                let a_ty = tensor_type(&node.inputs[0]);
                let b_ty = tensor_type(&node.inputs[1]);
                let v = self.fresh();
                self.line(&format!(
                    "{v} = stablehlo.dot_general {a}, {b}, contracting_dims = [1] x [0] \
                     : ({a_ty}, {b_ty}) -> {out_ty}"
                ));
                self.bind(node, 0, v);
            }
            (_, "relu", [x]) => {
                let literal = zero_literal(node.inputs[0].dtype);
                let zero = self.fresh();
                self.line(&format!(
                    "{zero} = stablehlo.constant dense<{literal}> : {out_ty}"
                ));
                let v = self.fresh();
                self.line(&format!("{v} = stablehlo.maximum {x}, {zero} : {out_ty}"));
                self.bind(node, 0, v);
            }
            _ => {
                warn!("stablehlo export: `{op}` ({}) is not supported", node.id);
                let results: Vec<String> =
                    (0..node.outputs.len()).map(|_| self.fresh()).collect();
                self.line(&format!(
                    "// unsupported: {} = {op}({}) [{}]",
                    results.join(", "),
                    operands.join(", "),
                    node.id
                ));
                for (i, v) in results.into_iter().enumerate() {
                    self.bind(node, i, v);
                }
            }
        }
    }
}

/// Render `graph` as a single StableHLO function.
pub fn to_stablehlo(graph: &ComputeGraph, options: &StableHloOptions) -> Result<String> {
    let order = graph.topological_order()?;
    let mut emitter = Emitter {
        body: String::new(),
        next_value: 0,
        values: HashMap::new(),
    };
    let mut args: Vec<String> = Vec::new();

    for node in &order {
        let mut operands = Vec::with_capacity(node.inputs.len());
        for (port, spec) in node.inputs.iter().enumerate() {
            let incoming = graph
                .incoming_edges(&node.id)
                .find(|e| e.destination_input_index == port);
            let value = incoming.and_then(|e| {
                emitter
                    .values
                    .get(&(e.source.clone(), e.source_output_index))
                    .cloned()
            });
            let value = match value {
                Some(v) => v,
                None => {
                    let name = format!("%arg{}", args.len());
                    args.push(format!("{name}: {}", tensor_type(spec)));
                    name
                }
            };
            operands.push(value);
        }
        emitter.lower(node, &operands);
    }

    let mut sinks: Vec<&GraphNode> = order
        .iter()
        .copied()
        .filter(|n| n.operation.op_type() == OpType::Output)
        .collect();
    if sinks.is_empty() {
        let outputs = graph.output_nodes();
        sinks = order
            .iter()
            .copied()
            .filter(|n| outputs.iter().any(|o| o.id == n.id))
            .collect();
    }
    let mut results = Vec::new();
    let mut result_types = Vec::new();
    for node in sinks {
        for (i, spec) in node.outputs.iter().enumerate() {
            if let Some(v) = emitter.values.get(&(node.id.clone(), i)) {
                results.push(v.clone());
                result_types.push(tensor_type(spec));
            }
        }
    }

    let signature = match result_types.len() {
        1 => result_types[0].clone(),
        _ => format!("({})", result_types.join(", ")),
    };
    let mut out = String::from("module {\n");
    let _ = writeln!(
        out,
        "  func.func @{}({}) -> {} {{",
        options.function_name,
        args.join(", "),
        signature
    );
    out.push_str(&emitter.body);
    if results.is_empty() {
        out.push_str("    return\n");
    } else {
        let _ = writeln!(
            out,
            "    return {} : {}",
            results.join(", "),
            result_types.join(", ")
        );
    }
    out.push_str("  }\n}\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;
    use crate::ops;

    /// out = relu(x @ w + b)
    fn mlp() -> ComputeGraph {
        let x = TensorSpec::new("x", (2, 3), DType::F32);
        let w = TensorSpec::new("w", (3, 4), DType::F32);
        let b = TensorSpec::new("b", (2, 4), DType::F32);
        let h = TensorSpec::new("h", (2, 4), DType::F32);
        let mut g = ComputeGraph::new();
        let nodes = [
            GraphNode::from_operation("x", ops::input(), vec![x.clone()]),
            GraphNode::from_operation("mm", ops::matmul(), vec![x, w]),
            GraphNode::from_operation("bias", ops::add(), vec![h.clone(), b]),
            GraphNode::from_operation("act", ops::relu(), vec![h.clone()]),
            GraphNode::from_operation("out", ops::output(), vec![h]),
        ];
        for node in nodes {
            g.add_node(node.unwrap()).unwrap();
        }
        g.connect("x", "mm", 0, 0).unwrap();
        g.connect("mm", "bias", 0, 0).unwrap();
        g.connect("bias", "act", 0, 0).unwrap();
        g.connect("act", "out", 0, 0).unwrap();
        g
    }

    #[test]
    fn test_lowering() {
        let text = to_stablehlo(&mlp(), &StableHloOptions::default()).unwrap();
        let expected = "\
module {
  func.func @main(%arg0: tensor<2x3xf32>, %arg1: tensor<3x4xf32>, %arg2: tensor<2x4xf32>) -> tensor<2x4xf32> {
    %0 = stablehlo.dot_general %arg0, %arg1, contracting_dims = [1] x [0] : (tensor<2x3xf32>, tensor<3x4xf32>) -> tensor<2x4xf32>
    %1 = stablehlo.add %0, %arg2 : tensor<2x4xf32>
    %2 = stablehlo.constant dense<0.000000e+00> : tensor<2x4xf32>
    %3 = stablehlo.maximum %1, %2 : tensor<2x4xf32>
    return %3 : tensor<2x4xf32>
  }
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_unsupported_and_function_name() {
        let mut g = ComputeGraph::new();
        let spec = TensorSpec::new("x", (2, 2), DType::F16);
        g.add_node(GraphNode::from_operation("s", ops::softmax(None), vec![spec]).unwrap())
            .unwrap();
        let text = to_stablehlo(&g, &StableHloOptions::default().with_function_name("f"))
            .unwrap();
        assert!(text.contains("func.func @f(%arg0: tensor<2x2xf16>) -> tensor<2x2xf16> {"));
        assert!(text.contains("// unsupported: %0 = softmax(%arg0) [s]"));
        assert!(text.contains("return %0 : tensor<2x2xf16>"));
    }

    #[test]
    fn test_integer_relu_and_broadcast_add() {
        let x = TensorSpec::new("x", (2, 2), DType::I32);
        let row = TensorSpec::new("row", (1, 2), DType::I32);
        let mut g = ComputeGraph::new();
        let nodes = [
            GraphNode::from_operation("sum", ops::add(), vec![x.clone(), row]),
            GraphNode::from_operation("act", ops::relu(), vec![x]),
        ];
        for node in nodes {
            g.add_node(node.unwrap()).unwrap();
        }
        g.connect("sum", "act", 0, 0).unwrap();
        let text = to_stablehlo(&g, &StableHloOptions::default()).unwrap();
        let expected = "\
module {
  func.func @main(%arg0: tensor<2x2xi32>, %arg1: tensor<1x2xi32>) -> tensor<2x2xi32> {
    %0 = stablehlo.broadcast_in_dim %arg1, dims = [0, 1] : (tensor<1x2xi32>) -> tensor<2x2xi32>
    %1 = stablehlo.add %arg0, %0 : tensor<2x2xi32>
    %2 = stablehlo.constant dense<0> : tensor<2x2xi32>
    %3 = stablehlo.maximum %1, %2 : tensor<2x2xi32>
    return %3 : tensor<2x2xi32>
  }
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_mixed_dtype_add_converts_first() {
        let a = TensorSpec::new("a", 3, DType::F16);
        let b = TensorSpec::new("b", (2, 3), DType::I8);
        let mut g = ComputeGraph::new();
        g.add_node(GraphNode::from_operation("sum", ops::add(), vec![a, b]).unwrap())
            .unwrap();
        let text = to_stablehlo(&g, &StableHloOptions::default()).unwrap();
        let body: Vec<&str> = text.lines().skip(2).take(4).map(str::trim).collect();
        assert_eq!(
            body,
            vec![
                "%0 = stablehlo.broadcast_in_dim %arg0, dims = [1] \
                 : (tensor<3xf16>) -> tensor<2x3xf16>",
                "%1 = stablehlo.convert %arg1 : (tensor<2x3xi8>) -> tensor<2x3xf16>",
                "%2 = stablehlo.add %0, %1 : tensor<2x3xf16>",
                "return %2 : tensor<2x3xf16>",
            ]
        );
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut g = mlp();
        g.connect("act", "mm", 0, 1).unwrap();
        assert!(to_stablehlo(&g, &StableHloOptions::default()).is_err());
    }
}
