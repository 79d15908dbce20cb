use std::any::{type_name, Any};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::{debug, trace};
use tapestry_core::{Error, Result, Tensor, TensorId};

use crate::graph::{ComputeGraph, GraphEdge, GraphNode};
use crate::operation::Operation;
use crate::spec::TensorSpec;

// ExecutionTape — a linear history of executed operations
//
// While Recording, every operation executed through a Session is appended
// together with the specs of its inputs and outputs and a sequence number.
// Recording while Idle is a silent no-op. Sequence numbers restart at 0 after
// clear(), so they are unique only within one epoch.
//
// Specs taken from live tensors carry the tensor's id. That is enough to
// follow dataflow for prune() and replay(). to_compute_graph() does not use
// it for edges: each operation is connected to its immediate predecessor
// only, so branching dataflow is flattened into a chain.
//
// TapeStack holds nested tapes. Every recording tape on the stack sees every
// operation, so an outer scope also captures what inner scopes record.

/// One entry of an [`ExecutionTape`].
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub operation: Arc<dyn Operation>,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub sequence: u64,
}

impl RecordedOperation {
    /// Graph node id for this entry: `{name}_{sequence}`.
    pub fn node_id(&self) -> String {
        format!("{}_{}", self.operation.name(), self.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TapeState {
    #[default]
    Idle,
    Recording,
}

/// Anything that can sit on a [`TapeStack`].
pub trait Tape: Any + Send + fmt::Debug {
    fn is_recording(&self) -> bool;

    /// Record an executed operation. A no-op unless recording.
    fn record(&mut self, operation: &Arc<dyn Operation>, inputs: &[Tensor], outputs: &[Tensor]);

    /// The underlying operation history.
    fn execution_tape(&self) -> &ExecutionTape;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Ordered record of operations.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTape {
    state: TapeState,
    operations: Vec<RecordedOperation>,
    next_sequence: u64,
}

impl ExecutionTape {
    /// An idle, empty tape.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty tape that is already recording.
    pub fn recording() -> Self {
        let mut tape = Self::new();
        tape.start_recording();
        tape
    }

    pub fn state(&self) -> TapeState {
        self.state
    }

    pub fn start_recording(&mut self) {
        self.state = TapeState::Recording;
    }

    pub fn stop_recording(&mut self) {
        self.state = TapeState::Idle;
    }

    /// Append an operation, returning its sequence number, or `None` when
    /// the tape is idle.
    pub fn record_operation(
        &mut self,
        operation: Arc<dyn Operation>,
        inputs: Vec<TensorSpec>,
        outputs: Vec<TensorSpec>,
    ) -> Option<u64> {
        if self.state != TapeState::Recording {
            trace!("tape idle, dropping `{}`", operation.name());
            return None;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!("tape: recorded `{}` as #{sequence}", operation.name());
        self.operations.push(RecordedOperation {
            operation,
            inputs,
            outputs,
            sequence,
        });
        Some(sequence)
    }

    pub fn operations(&self) -> &[RecordedOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Drop every entry and restart sequence numbers at 0. The state is kept.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.next_sequence = 0;
    }

    /// Tensors consumed by the tape that no recorded operation produced.
    pub fn leaf_inputs(&self) -> Vec<TensorId> {
        let mut produced = HashSet::new();
        let mut seen = HashSet::new();
        let mut leaves = Vec::new();
        for op in &self.operations {
            for id in op.inputs.iter().filter_map(|s| s.tensor) {
                if !produced.contains(&id) && seen.insert(id) {
                    leaves.push(id);
                }
            }
            produced.extend(op.outputs.iter().filter_map(|s| s.tensor));
        }
        leaves
    }

    /// Build a graph with one node per entry, each connected to the entry
    /// recorded just before it.
    ///
    /// The edge carries the predecessor's first output and lands on the
    /// successor's input with the same tensor id, else the first input with
    /// a compatible spec, else input 0. Entries without outputs or without
    /// inputs break the chain.
    pub fn to_compute_graph(&self) -> Result<ComputeGraph> {
        let mut graph = ComputeGraph::new();
        for op in &self.operations {
            graph.add_node(GraphNode::new(
                op.node_id(),
                Arc::clone(&op.operation),
                op.inputs.clone(),
                op.outputs.clone(),
            ))?;
        }
        for (i, pair) in self.operations.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            let Some(produced) = prev.outputs.first() else {
                continue;
            };
            if next.inputs.is_empty() {
                continue;
            }
            let port = next
                .inputs
                .iter()
                .position(|s| s.tensor.is_some() && s.tensor == produced.tensor)
                .or_else(|| {
                    next.inputs
                        .iter()
                        .position(|s| s.is_compatible_with(produced))
                })
                .unwrap_or(0);
            graph.add_edge(GraphEdge::new(
                format!("e{i}"),
                prev.node_id(),
                next.node_id(),
                0,
                port,
                produced.clone(),
            ))?;
        }
        Ok(graph)
    }

    /// A tape holding only the entries that contribute to `targets`,
    /// following tensor ids backwards. Sequence numbers are preserved.
    pub fn prune(&self, targets: &[TensorId]) -> ExecutionTape {
        let mut needed: HashSet<TensorId> = targets.iter().copied().collect();
        let mut kept = Vec::new();
        for op in self.operations.iter().rev() {
            let contributes = op
                .outputs
                .iter()
                .any(|s| s.tensor.is_some_and(|id| needed.contains(&id)));
            if contributes {
                needed.extend(op.inputs.iter().filter_map(|s| s.tensor));
                kept.push(op.clone());
            }
        }
        kept.reverse();
        ExecutionTape {
            state: TapeState::Idle,
            operations: kept,
            next_sequence: self.next_sequence,
        }
    }

    /// Re-execute every entry in order, reading inputs from `bindings` (or
    /// from outputs of earlier entries). Returns every tensor by the id it
    /// had when recorded, bindings included.
    pub fn replay(
        &self,
        bindings: &HashMap<TensorId, Tensor>,
    ) -> Result<HashMap<TensorId, Tensor>> {
        let mut env = bindings.clone();
        for op in &self.operations {
            let name = op.operation.name();
            let inputs = op
                .inputs
                .iter()
                .enumerate()
                .map(|(i, spec)| {
                    spec.tensor
                        .and_then(|id| env.get(&id).cloned())
                        .ok_or_else(|| {
                            Error::msg(format!(
                                "replay: no tensor bound for input {i} ({}) of `{}`",
                                spec.name,
                                op.node_id()
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let outputs = op.operation.execute(&inputs)?;
            if outputs.len() != op.outputs.len() {
                return Err(Error::msg(format!(
                    "replay: `{name}` produced {} outputs, {} were recorded",
                    outputs.len(),
                    op.outputs.len()
                )));
            }
            for (spec, tensor) in op.outputs.iter().zip(outputs) {
                if let Some(id) = spec.tensor {
                    env.insert(id, tensor);
                }
            }
        }
        Ok(env)
    }
}

impl Tape for ExecutionTape {
    fn is_recording(&self) -> bool {
        self.state == TapeState::Recording
    }

    fn record(&mut self, operation: &Arc<dyn Operation>, inputs: &[Tensor], outputs: &[Tensor]) {
        let specs = |ts: &[Tensor]| {
            ts.iter()
                .map(|t| TensorSpec::of(t.id().to_string(), t))
                .collect::<Vec<_>>()
        };
        self.record_operation(Arc::clone(operation), specs(inputs), specs(outputs));
    }

    fn execution_tape(&self) -> &ExecutionTape {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Nested tapes. The top of the stack is the innermost scope.
#[derive(Debug, Default)]
pub struct TapeStack {
    tapes: Vec<Box<dyn Tape>>,
}

impl TapeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: Tape>(&mut self, tape: T) {
        self.tapes.push(Box::new(tape));
    }

    pub fn pop(&mut self) -> Option<Box<dyn Tape>> {
        self.tapes.pop()
    }

    /// Pop the top tape as a `T`. The stack is left untouched when it is
    /// empty or the top is of another type.
    pub fn pop_as<T: Tape>(&mut self) -> Result<T> {
        match self.tapes.last() {
            None => return Err(Error::msg("tape stack is empty")),
            Some(top) if !top.as_any().is::<T>() => {
                return Err(Error::TapeTypeMismatch {
                    expected: type_name::<T>(),
                })
            }
            Some(_) => {}
        }
        let top = self.tapes.pop().ok_or_else(|| Error::msg("tape stack is empty"))?;
        top.into_any()
            .downcast::<T>()
            .map(|tape| *tape)
            .map_err(|_| Error::TapeTypeMismatch {
                expected: type_name::<T>(),
            })
    }

    pub fn current(&self) -> Option<&dyn Tape> {
        self.tapes.last().map(|t| t.as_ref())
    }

    pub fn current_as<T: Tape>(&self) -> Option<&T> {
        self.tapes.last()?.as_any().downcast_ref::<T>()
    }

    pub fn current_as_mut<T: Tape>(&mut self) -> Option<&mut T> {
        self.tapes.last_mut()?.as_any_mut().downcast_mut::<T>()
    }

    pub fn len(&self) -> usize {
        self.tapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tapes.is_empty()
    }

    /// True when any tape on the stack is recording.
    pub fn is_recording(&self) -> bool {
        self.tapes.iter().any(|t| t.is_recording())
    }

    /// Forward to every recording tape, returning how many recorded it.
    pub fn record(
        &mut self,
        operation: &Arc<dyn Operation>,
        inputs: &[Tensor],
        outputs: &[Tensor],
    ) -> usize {
        let mut count = 0;
        for tape in self.tapes.iter_mut().filter(|t| t.is_recording()) {
            tape.record(operation, inputs, outputs);
            count += 1;
        }
        if count == 0 {
            trace!("no recording tape for `{}`", operation.name());
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;
    use crate::ops::test_util::tensor;

    fn run(tape: &mut ExecutionTape, op: Arc<dyn Operation>, inputs: &[Tensor]) -> Tensor {
        let outputs = op.execute(inputs).unwrap();
        tape.record(&op, inputs, &outputs);
        outputs.into_iter().next().unwrap()
    }

    #[test]
    fn test_records_only_while_recording() {
        let x = tensor(&[1.0, -2.0], 2);
        let mut tape = ExecutionTape::recording();
        let y = run(&mut tape, ops::relu(), &[x.clone()]);
        run(&mut tape, ops::add(), &[y, x.clone()]);
        assert_eq!(tape.len(), 2);
        assert_eq!(tape.operations()[1].sequence, 1);

        let mut idle = ExecutionTape::new();
        run(&mut idle, ops::relu(), &[x.clone()]);
        run(&mut idle, ops::relu(), &[x]);
        assert_eq!(idle.len(), 0);
        assert!(idle
            .record_operation(ops::relu(), vec![], vec![])
            .is_none());
    }

    #[test]
    fn test_clear_resets_sequence_and_clone_is_independent() {
        let x = tensor(&[1.0], 1);
        let mut tape = ExecutionTape::recording();
        run(&mut tape, ops::relu(), &[x.clone()]);
        run(&mut tape, ops::relu(), &[x.clone()]);
        let copy = tape.clone();
        tape.clear();
        assert!(tape.is_empty());
        assert_eq!(copy.len(), 2);
        run(&mut tape, ops::relu(), &[x]);
        assert_eq!(tape.operations()[0].sequence, 0);
    }

    #[test]
    fn test_to_compute_graph_chains_neighbours() {
        let a = tensor(&[1.0, 2.0, 3.0, 4.0], (2, 2));
        let w = tensor(&[1.0, 0.0, 0.0, 1.0], (2, 2));
        let mut tape = ExecutionTape::recording();
        let h = run(&mut tape, ops::matmul(), &[a, w.clone()]);
        // h enters `add` on port 1
        let s = run(&mut tape, ops::add(), &[w, h]);
        run(&mut tape, ops::relu(), &[s]);

        let graph = tape.to_compute_graph().unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        let e0 = graph.edge("e0").unwrap();
        assert_eq!(
            (e0.source.as_str(), e0.destination.as_str()),
            ("matmul_0", "add_1")
        );
        assert_eq!(e0.destination_input_index, 1);
        assert!(graph.validate().is_valid());
        let order: Vec<_> = graph
            .topological_order()
            .unwrap()
            .iter()
            .map(|n| n.id.clone())
            .collect();
        assert_eq!(order, vec!["matmul_0", "add_1", "relu_2"]);
    }

    #[test]
    fn test_prune_and_replay() {
        let x = tensor(&[1.0, -2.0, 3.0], 3);
        let mut tape = ExecutionTape::recording();
        let y = run(&mut tape, ops::relu(), &[x.clone()]);
        let _unused = run(&mut tape, ops::tanh(), &[x.clone()]);
        let z = run(&mut tape, ops::multiply(), &[y.clone(), y]);

        let pruned = tape.prune(&[z.id()]);
        let names: Vec<_> = pruned
            .operations()
            .iter()
            .map(|o| o.operation.name().to_string())
            .collect();
        assert_eq!(names, vec!["relu", "multiply"]);
        assert_eq!(pruned.leaf_inputs(), vec![x.id()]);

        let fresh = tensor(&[2.0, 2.0, -1.0], 3);
        let bindings = HashMap::from([(x.id(), fresh)]);
        let env = pruned.replay(&bindings).unwrap();
        assert_eq!(env[&z.id()].to_f64_vec().unwrap(), vec![4.0, 4.0, 0.0]);

        assert!(pruned.replay(&HashMap::new()).is_err());
    }

    #[test]
    fn test_stack_nesting_and_typed_pop() {
        let x = tensor(&[1.0], 1);
        let op = ops::relu();
        let out = op.execute(&[x.clone()]).unwrap();

        let mut stack = TapeStack::new();
        assert!(!stack.is_recording());
        stack.push(ExecutionTape::recording());
        stack.push(ExecutionTape::new());
        assert!(stack.is_recording());
        assert_eq!(stack.record(&op, &[x.clone()], &out), 1);
        stack
            .current_as_mut::<ExecutionTape>()
            .unwrap()
            .start_recording();
        assert_eq!(stack.record(&op, &[x], &out), 2);

        let inner: ExecutionTape = stack.pop_as().unwrap();
        assert_eq!(inner.len(), 1);
        let outer = stack.pop().unwrap();
        assert_eq!(outer.execution_tape().len(), 2);
        assert!(stack.pop_as::<ExecutionTape>().is_err());
    }
}
