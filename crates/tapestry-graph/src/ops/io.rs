use std::sync::Arc;

use tapestry_core::{Result, Tensor};

use super::{check_arity, one, require_valid};
use crate::operation::{OpType, Operation, Parameters, ValidationResult};
use crate::spec::TensorSpec;

/// Marks a value entering the computation. Passes its single input through
/// under a fresh tensor id.
#[derive(Debug, Clone, Default)]
pub struct InputOp {
    params: Parameters,
}

impl Operation for InputOp {
    fn name(&self) -> &str {
        "input"
    }

    fn op_type(&self) -> OpType {
        OpType::Input
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        check_arity(self.name(), inputs, 1, 1, &mut reasons);
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        let mut out = inputs[0].clone();
        out.tensor = None;
        Ok(vec![out])
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        Ok(vec![one(self.name(), inputs)?.identity()])
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(InputOp { params }))
    }

    fn backward(
        &self,
        _inputs: &[Tensor],
        _outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        Ok(grad_outputs.iter().take(1).cloned().map(Some).collect())
    }
}

/// Marks the values leaving the computation. Passes every input through.
#[derive(Debug, Clone, Default)]
pub struct OutputOp {
    params: Parameters,
}

impl Operation for OutputOp {
    fn name(&self) -> &str {
        "output"
    }

    fn op_type(&self) -> OpType {
        OpType::Output
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        check_arity(self.name(), inputs, 1, usize::MAX, &mut reasons);
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        Ok(inputs
            .iter()
            .map(|s| {
                let mut out = s.clone();
                out.tensor = None;
                out
            })
            .collect())
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        Ok(inputs.iter().map(Tensor::identity).collect())
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(OutputOp { params }))
    }

    fn backward(
        &self,
        _inputs: &[Tensor],
        _outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        Ok(grad_outputs.iter().cloned().map(Some).collect())
    }
}
