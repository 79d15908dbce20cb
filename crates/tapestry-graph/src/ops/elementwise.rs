use std::sync::Arc;

use tapestry_core::{BinaryOp, Result, Shape, Tensor};

use super::{check_arity, grad_of, output_spec, require_valid, two};
use crate::operation::{OpType, Operation, Parameters, ValidationResult};
use crate::spec::TensorSpec;

/// Element-wise `add` / `subtract` / `multiply` / `divide` with NumPy
/// broadcasting. Mixed dtypes promote to their common precision.
#[derive(Debug, Clone)]
pub struct ElementwiseOp {
    kind: BinaryOp,
    params: Parameters,
}

impl ElementwiseOp {
    pub fn new(kind: BinaryOp) -> Self {
        ElementwiseOp {
            kind,
            params: Parameters::new(),
        }
    }

    pub fn add() -> Self {
        Self::new(BinaryOp::Add)
    }

    pub fn subtract() -> Self {
        Self::new(BinaryOp::Sub)
    }

    pub fn multiply() -> Self {
        Self::new(BinaryOp::Mul)
    }

    pub fn divide() -> Self {
        Self::new(BinaryOp::Div)
    }

    pub fn kind(&self) -> BinaryOp {
        self.kind
    }
}

impl Operation for ElementwiseOp {
    fn name(&self) -> &str {
        match self.kind {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "subtract",
            BinaryOp::Mul => "multiply",
            BinaryOp::Div => "divide",
        }
    }

    fn op_type(&self) -> OpType {
        OpType::Math
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        if check_arity(self.name(), inputs, 2, 2, &mut reasons) {
            if let Err(e) = Shape::broadcast_shape(&inputs[0].shape, &inputs[1].shape) {
                reasons.push(format!("{}: inputs 0 and 1: {e}", self.name()));
            }
        }
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        let shape = Shape::broadcast_shape(&inputs[0].shape, &inputs[1].shape)?;
        let dtype = inputs[0].dtype.common_precision_with(inputs[1].dtype);
        Ok(vec![output_spec(self.name(), 0, shape, dtype, inputs)])
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let (a, b) = two(self.name(), inputs)?;
        let out = match self.kind {
            BinaryOp::Add => a.add(b)?,
            BinaryOp::Sub => a.sub(b)?,
            BinaryOp::Mul => a.mul(b)?,
            BinaryOp::Div => a.div(b)?,
        };
        Ok(vec![out])
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(ElementwiseOp {
            kind: self.kind,
            params,
        }))
    }

    /// Gradients are summed back to each operand's shape when the forward
    /// pass broadcast it.
    fn backward(
        &self,
        inputs: &[Tensor],
        _outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        let (a, b) = two(self.name(), inputs)?;
        let g = grad_of(self.name(), grad_outputs)?;
        let (ga, gb) = match self.kind {
            BinaryOp::Add => (g.clone(), g.clone()),
            BinaryOp::Sub => (g.clone(), g.neg()?),
            BinaryOp::Mul => (g.mul(b)?, g.mul(a)?),
            // d(a/b)/db = -a / b²
            BinaryOp::Div => (g.div(b)?, g.mul(a)?.div(&b.mul(b)?)?.neg()?),
        };
        Ok(vec![
            Some(ga.sum_to_shape(a.shape())?),
            Some(gb.sum_to_shape(b.shape())?),
        ])
    }
}
