use std::sync::Arc;

use tapestry_core::{Error, Result, Tensor, UnaryOp};

use super::{check_arity, grad_of, one, output_spec, require_valid};
use crate::operation::{OpType, Operation, Parameters, ValidationResult};
use crate::spec::TensorSpec;

/// Element-wise `relu` / `sigmoid` / `tanh`, plus `sqrt`.
#[derive(Debug, Clone)]
pub struct ActivationOp {
    kind: UnaryOp,
    params: Parameters,
}

impl ActivationOp {
    fn new(kind: UnaryOp) -> Self {
        ActivationOp {
            kind,
            params: Parameters::new(),
        }
    }

    pub fn relu() -> Self {
        Self::new(UnaryOp::Relu)
    }

    pub fn sigmoid() -> Self {
        Self::new(UnaryOp::Sigmoid)
    }

    pub fn tanh() -> Self {
        Self::new(UnaryOp::Tanh)
    }

    pub fn sqrt() -> Self {
        Self::new(UnaryOp::Sqrt)
    }
}

impl Operation for ActivationOp {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn op_type(&self) -> OpType {
        match self.kind {
            UnaryOp::Sqrt => OpType::Math,
            _ => OpType::Activation,
        }
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        if check_arity(self.name(), inputs, 1, 1, &mut reasons)
            && self.kind != UnaryOp::Relu
            && !inputs[0].dtype.is_float()
        {
            reasons.push(format!(
                "{}: input 0 must be a float dtype, got {}",
                self.name(),
                inputs[0].dtype
            ));
        }
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        let x = &inputs[0];
        Ok(vec![output_spec(
            self.name(),
            0,
            x.shape.clone(),
            x.dtype,
            inputs,
        )])
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = one(self.name(), inputs)?;
        let y = match self.kind {
            UnaryOp::Relu => x.relu()?,
            UnaryOp::Sigmoid => x.sigmoid()?,
            UnaryOp::Tanh => x.tanh()?,
            UnaryOp::Sqrt => x.sqrt()?,
            other => return Err(Error::not_implemented(other.name(), "activation")),
        };
        Ok(vec![y])
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(ActivationOp {
            kind: self.kind,
            params,
        }))
    }

    //   relu'(x)    = step(x)
    //   sigmoid'(x) = y (1 - y)
    //   tanh'(x)    = 1 - y²
    //   sqrt'(x)    = 1 / 2y
    fn backward(
        &self,
        inputs: &[Tensor],
        outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        let x = one(self.name(), inputs)?;
        let y = outputs
            .first()
            .ok_or_else(|| Error::msg(format!("{}.backward: missing output", self.name())))?;
        let g = grad_of(self.name(), grad_outputs)?;
        let gx = match self.kind {
            UnaryOp::Relu => g.mul(&x.step()?)?,
            UnaryOp::Sigmoid => g.mul(y)?.mul(&y.affine(-1.0, 1.0)?)?,
            UnaryOp::Tanh => g.mul(&y.mul(y)?.affine(-1.0, 1.0)?)?,
            UnaryOp::Sqrt => g.div(&y.affine(2.0, 0.0)?)?,
            other => return Err(Error::not_implemented(other.name(), "autodiff")),
        };
        Ok(vec![Some(gx)])
    }
}

/// Softmax along one axis (the last one unless configured).
#[derive(Debug, Clone)]
pub struct SoftmaxOp {
    axis: Option<usize>,
    params: Parameters,
}

impl SoftmaxOp {
    pub fn new(axis: Option<usize>) -> Self {
        let mut params = Parameters::new();
        if let Some(axis) = axis {
            params.insert("axis", axis);
        }
        SoftmaxOp { axis, params }
    }

    fn from_params(params: Parameters) -> Result<Self> {
        let axis = match params.get("axis") {
            None => None,
            Some(_) => Some(params.usize_or("softmax", "axis", 0)?),
        };
        Ok(SoftmaxOp { axis, params })
    }

    fn resolve_axis(&self, rank: usize) -> Option<usize> {
        match self.axis {
            Some(axis) if axis < rank => Some(axis),
            Some(_) => None,
            None => rank.checked_sub(1),
        }
    }
}

impl Operation for SoftmaxOp {
    fn name(&self) -> &str {
        "softmax"
    }

    fn op_type(&self) -> OpType {
        OpType::Activation
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        if check_arity(self.name(), inputs, 1, 1, &mut reasons) {
            let x = &inputs[0];
            if self.resolve_axis(x.rank()).is_none() {
                reasons.push(format!(
                    "softmax: axis {:?} out of range for input 0 with shape {}",
                    self.axis, x.shape
                ));
            }
            if !x.dtype.is_float() {
                reasons.push(format!(
                    "softmax: input 0 must be a float dtype, got {}",
                    x.dtype
                ));
            }
        }
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        let x = &inputs[0];
        Ok(vec![output_spec(
            self.name(),
            0,
            x.shape.clone(),
            x.dtype,
            inputs,
        )])
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = one(self.name(), inputs)?;
        let axis = self.resolve_axis(x.rank()).ok_or(Error::DimOutOfRange {
            dim: self.axis.unwrap_or(0),
            rank: x.rank(),
        })?;
        Ok(vec![x.softmax(axis)?])
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(SoftmaxOp::from_params(params)?))
    }

    /// dx = y ⊙ (g − Σ(g ⊙ y)) along the softmax axis.
    fn backward(
        &self,
        _inputs: &[Tensor],
        outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        let y = one(self.name(), outputs)?;
        let g = grad_of(self.name(), grad_outputs)?;
        let axis = self.resolve_axis(y.rank()).ok_or(Error::DimOutOfRange {
            dim: self.axis.unwrap_or(0),
            rank: y.rank(),
        })?;
        let dot = g.mul(y)?.sum(&[axis], true)?;
        Ok(vec![Some(g.sub(&dot)?.mul(y)?)])
    }
}
