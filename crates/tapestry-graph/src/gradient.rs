use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use tapestry_core::{Result, Tensor, TensorId};

use crate::operation::Operation;
use crate::tape::{ExecutionTape, Tape};

// GradientTape — reverse-mode differentiation over a recorded tape
//
// A GradientTape is an ExecutionTape that also keeps the concrete input and
// output tensors of every operation it records. compute_gradients walks
// those records backwards:
//
//   1. Seed grad(target) = ones_like(target) for every target.
//   2. For each record, newest first, skip it unless one of its outputs has
//      a gradient. Missing output gradients are taken as zeros.
//   3. Call Operation::backward(inputs, outputs, grad_outputs) and add each
//      returned input gradient to that input's running total.
//
// ACCUMULATION: a tensor consumed by several operations (or twice by the
// same one, as in x * x) receives the sum of every contribution.
//
// Gradients are computed for every tensor on the path, but only watched
// sources appear in the result. A watched source with no path to any
// target gets no entry at all.

/// Gradients keyed by tensor id.
#[derive(Debug, Clone, Default)]
pub struct GradientMap {
    grads: HashMap<TensorId, Tensor>,
}

impl GradientMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gradient of `tensor`, if it received one.
    pub fn get(&self, tensor: &Tensor) -> Option<&Tensor> {
        self.grads.get(&tensor.id())
    }

    pub fn get_by_id(&self, id: TensorId) -> Option<&Tensor> {
        self.grads.get(&id)
    }

    pub fn contains(&self, tensor: &Tensor) -> bool {
        self.grads.contains_key(&tensor.id())
    }

    /// Add `grad` to the gradient already held for `id`, if any.
    pub fn accumulate(&mut self, id: TensorId, grad: Tensor) -> Result<()> {
        let total = match self.grads.remove(&id) {
            Some(existing) => existing.add(&grad)?,
            None => grad,
        };
        self.grads.insert(id, total);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TensorId, &Tensor)> {
        self.grads.iter()
    }
}

#[derive(Debug, Clone)]
struct SavedTensors {
    inputs: Vec<Tensor>,
    outputs: Vec<Tensor>,
}

/// Tape that records enough to differentiate what it saw.
#[derive(Debug, Clone, Default)]
pub struct GradientTape {
    tape: ExecutionTape,
    saved: Vec<SavedTensors>,
    watched: HashSet<TensorId>,
}

impl GradientTape {
    /// An idle, empty tape.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty tape that is already recording.
    pub fn recording() -> Self {
        GradientTape {
            tape: ExecutionTape::recording(),
            ..Self::default()
        }
    }

    pub fn start_recording(&mut self) {
        self.tape.start_recording();
    }

    pub fn stop_recording(&mut self) {
        self.tape.stop_recording();
    }

    /// Mark tensors whose gradients should be reported.
    pub fn watch<'a>(&mut self, tensors: impl IntoIterator<Item = &'a Tensor>) {
        self.watched.extend(tensors.into_iter().map(Tensor::id));
    }

    pub fn stop_watching<'a>(&mut self, tensors: impl IntoIterator<Item = &'a Tensor>) {
        for t in tensors {
            self.watched.remove(&t.id());
        }
    }

    pub fn is_watched(&self, tensor: &Tensor) -> bool {
        self.watched.contains(&tensor.id())
    }

    pub fn tape(&self) -> &ExecutionTape {
        &self.tape
    }

    pub fn len(&self) -> usize {
        self.tape.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// Forget recorded operations. Watched tensors stay watched.
    pub fn clear(&mut self) {
        self.tape.clear();
        self.saved.clear();
    }

    /// Gradients of the sum of `targets` with respect to the watched
    /// tensors among `sources`.
    pub fn compute_gradients(&self, targets: &[Tensor], sources: &[Tensor]) -> Result<GradientMap> {
        let mut grads = GradientMap::new();
        for target in targets {
            grads.accumulate(target.id(), target.ones_like()?)?;
        }

        for (record, saved) in self.tape.operations().iter().zip(&self.saved).rev() {
            if !saved.outputs.iter().any(|o| grads.contains(o)) {
                continue;
            }
            let grad_outputs = saved
                .outputs
                .iter()
                .map(|o| match grads.get(o) {
                    Some(g) => Ok(g.clone()),
                    None => o.zeros_like(),
                })
                .collect::<Result<Vec<_>>>()?;
            let grad_inputs =
                record
                    .operation
                    .backward(&saved.inputs, &saved.outputs, &grad_outputs)?;
            for (input, grad) in saved.inputs.iter().zip(grad_inputs) {
                if let Some(grad) = grad {
                    grads.accumulate(input.id(), grad)?;
                }
            }
        }

        let mut result = GradientMap::new();
        for source in sources {
            if !self.is_watched(source) {
                continue;
            }
            if let Some(g) = grads.get(source) {
                result.grads.insert(source.id(), g.clone());
            }
        }
        debug!(
            "gradients: {} of {} sources over {} operations",
            result.len(),
            sources.len(),
            self.tape.len()
        );
        Ok(result)
    }
}

impl Tape for GradientTape {
    fn is_recording(&self) -> bool {
        self.tape.is_recording()
    }

    fn record(&mut self, operation: &Arc<dyn Operation>, inputs: &[Tensor], outputs: &[Tensor]) {
        if !self.tape.is_recording() {
            return;
        }
        self.tape.record(operation, inputs, outputs);
        self.saved.push(SavedTensors {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        });
    }

    fn execution_tape(&self) -> &ExecutionTape {
        &self.tape
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;
    use crate::ops::test_util::{assert_close, tensor};
    use tapestry_core::Error;

    fn run(tape: &mut GradientTape, op: Arc<dyn Operation>, inputs: &[Tensor]) -> Tensor {
        let outputs = op.execute(inputs).unwrap();
        tape.record(&op, inputs, &outputs);
        outputs.into_iter().next().unwrap()
    }

    #[test]
    fn test_square_accumulates() {
        let x = tensor(&[1.0, 2.0, -3.0], 3);
        let mut tape = GradientTape::recording();
        tape.watch([&x]);
        let y = run(&mut tape, ops::multiply(), &[x.clone(), x.clone()]);
        let loss = run(&mut tape, ops::sum(&[], false), &[y]);
        let grads = tape.compute_gradients(&[loss], &[x.clone()]).unwrap();
        assert_close(
            &grads.get(&x).unwrap().to_f64_vec().unwrap(),
            &[2.0, 4.0, -6.0],
            1e-6,
        );
    }

    #[test]
    fn test_unwatched_and_unconnected_sources_absent() {
        let x = tensor(&[1.0, 2.0], 2);
        let w = tensor(&[3.0, 4.0], 2);
        let lonely = tensor(&[5.0], 1);
        let mut tape = GradientTape::recording();
        tape.watch([&x, &lonely]);
        let y = run(&mut tape, ops::multiply(), &[x.clone(), w.clone()]);
        let loss = run(&mut tape, ops::sum(&[], false), &[y]);

        let grads = tape
            .compute_gradients(&[loss.clone()], &[x.clone(), w.clone(), lonely.clone()])
            .unwrap();
        assert_eq!(grads.len(), 1);
        assert_close(&grads.get(&x).unwrap().to_f64_vec().unwrap(), &[3.0, 4.0], 1e-6);
        assert!(!grads.contains(&w));
        assert!(!grads.contains(&lonely));

        tape.stop_watching([&x]);
        assert!(tape
            .compute_gradients(&[loss], &[x])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_idle_tape_saves_nothing() {
        let x = tensor(&[1.0], 1);
        let mut tape = GradientTape::new();
        tape.watch([&x]);
        let y = run(&mut tape, ops::relu(), &[x.clone()]);
        assert!(tape.is_empty());
        let grads = tape.compute_gradients(&[y], &[x]).unwrap();
        assert!(grads.is_empty());
    }

    #[test]
    fn test_conv2d_backward_surfaces_not_implemented() {
        let x = tensor(&[1.0; 4], (1, 1, 2, 2));
        let w = tensor(&[1.0], (1, 1, 1, 1));
        let mut tape = GradientTape::recording();
        tape.watch([&x]);
        let y = run(&mut tape, ops::conv2d(1, 0), &[x.clone(), w]);
        assert!(matches!(
            tape.compute_gradients(&[y], &[x]),
            Err(Error::NotImplemented { .. })
        ));
    }
}
