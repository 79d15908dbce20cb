use std::sync::Arc;

use tapestry_core::{Result, Shape, Tensor};

use super::{check_arity, grad_of, output_spec, require_valid, two};
use crate::operation::{OpType, Operation, Parameters, ValidationResult};
use crate::spec::TensorSpec;

/// `[m, k] @ [k, n] → [m, n]`.
#[derive(Debug, Clone, Default)]
pub struct MatMulOp {
    params: Parameters,
}

impl Operation for MatMulOp {
    fn name(&self) -> &str {
        "matmul"
    }

    fn op_type(&self) -> OpType {
        OpType::Math
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        if !check_arity(self.name(), inputs, 2, 2, &mut reasons) {
            return ValidationResult::from_reasons(reasons);
        }
        for (i, spec) in inputs.iter().enumerate() {
            if spec.rank() != 2 {
                reasons.push(format!(
                    "matmul: input {i} ({}) must be rank 2, got shape {}",
                    spec.name, spec.shape
                ));
            }
        }
        if reasons.is_empty() {
            let cols = inputs[0].shape.dims()[1];
            let rows = inputs[1].shape.dims()[0];
            if cols != rows {
                reasons.push(format!(
                    "matmul: inner dimensions differ: input 0 has {cols} columns, \
                     input 1 has {rows} rows"
                ));
            }
        }
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        let shape = Shape::from((inputs[0].shape.dims()[0], inputs[1].shape.dims()[1]));
        let dtype = inputs[0].dtype.common_precision_with(inputs[1].dtype);
        Ok(vec![output_spec(self.name(), 0, shape, dtype, inputs)])
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let (a, b) = two(self.name(), inputs)?;
        Ok(vec![a.matmul(b)?])
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(MatMulOp { params }))
    }

    /// dA = G @ Bᵀ, dB = Aᵀ @ G
    fn backward(
        &self,
        inputs: &[Tensor],
        _outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        let (a, b) = two(self.name(), inputs)?;
        let g = grad_of(self.name(), grad_outputs)?;
        let ga = g.matmul(&b.t()?)?;
        let gb = a.t()?.matmul(g)?;
        Ok(vec![Some(ga), Some(gb)])
    }
}
