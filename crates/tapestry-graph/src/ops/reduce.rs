use std::sync::Arc;

use tapestry_core::backend::{reduce_dims, reduce_shape};
use tapestry_core::{Error, ReduceOp, Result, Tensor};

use super::{check_arity, grad_of, one, output_spec, require_valid};
use crate::operation::{OpType, Operation, Parameters, ValidationResult};
use crate::spec::TensorSpec;

/// `sum` / `mean` over a set of axes (all axes when the set is empty).
#[derive(Debug, Clone)]
pub struct ReductionOp {
    kind: ReduceOp,
    axes: Vec<usize>,
    keep_dims: bool,
    params: Parameters,
}

impl ReductionOp {
    fn new(kind: ReduceOp, axes: Vec<usize>, keep_dims: bool) -> Self {
        let params = Parameters::new()
            .with("axes", axes.clone())
            .with("keep_dims", keep_dims);
        ReductionOp {
            kind,
            axes,
            keep_dims,
            params,
        }
    }

    pub fn sum(axes: Vec<usize>, keep_dims: bool) -> Self {
        Self::new(ReduceOp::Sum, axes, keep_dims)
    }

    pub fn mean(axes: Vec<usize>, keep_dims: bool) -> Self {
        Self::new(ReduceOp::Mean, axes, keep_dims)
    }

    fn from_params(kind: ReduceOp, params: Parameters) -> Result<Self> {
        let name = kind.name();
        let axes = params.usizes_or_empty(name, "axes")?;
        let keep_dims = params.bool_or(name, "keep_dims", false)?;
        Ok(ReductionOp {
            kind,
            axes,
            keep_dims,
            params,
        })
    }
}

impl Operation for ReductionOp {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn op_type(&self) -> OpType {
        OpType::Reduction
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        if check_arity(self.name(), inputs, 1, 1, &mut reasons) {
            if let Err(e) = reduce_dims(&inputs[0].shape, &self.axes) {
                reasons.push(format!("{}: input 0: {e}", self.name()));
            }
        }
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        let x = &inputs[0];
        let dims = reduce_dims(&x.shape, &self.axes)?;
        let shape = reduce_shape(&x.shape, &dims, self.keep_dims);
        Ok(vec![output_spec(self.name(), 0, shape, x.dtype, inputs)])
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = one(self.name(), inputs)?;
        let y = match self.kind {
            ReduceOp::Sum => x.sum(&self.axes, self.keep_dims)?,
            ReduceOp::Mean => x.mean(&self.axes, self.keep_dims)?,
            other => return Err(Error::not_implemented(other.name(), "reduction")),
        };
        Ok(vec![y])
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(ReductionOp::from_params(self.kind, params)?))
    }

    /// The output gradient is broadcast back over the reduced axes (and
    /// scaled by 1/count for mean).
    fn backward(
        &self,
        inputs: &[Tensor],
        _outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        let x = one(self.name(), inputs)?;
        let g = grad_of(self.name(), grad_outputs)?;
        let dims = reduce_dims(x.shape(), &self.axes)?;
        let kept = g.reshape(reduce_shape(x.shape(), &dims, true))?;
        let mut gx = x.zeros_like()?.add(&kept)?;
        if self.kind == ReduceOp::Mean {
            let count: usize = dims.iter().map(|&d| x.dims()[d]).product();
            gx = gx.affine(1.0 / count.max(1) as f64, 0.0)?;
        }
        Ok(vec![Some(gx)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::{assert_close, numeric_grad, tensor};
    use tapestry_core::DType;

    #[test]
    fn test_infer() {
        let spec = TensorSpec::new("x", (2, 3, 4), DType::F32);
        let out = ReductionOp::sum(vec![1], false)
            .infer_outputs(&[spec.clone()])
            .unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 4]);
        let out = ReductionOp::mean(vec![], true)
            .infer_outputs(&[spec.clone()])
            .unwrap();
        assert_eq!(out[0].shape.dims(), &[1, 1, 1]);
        assert!(!ReductionOp::sum(vec![3], false)
            .validate_inputs(&[spec])
            .is_valid());
    }

    #[test]
    fn test_backward_matches_numeric() {
        let x = tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        let w = tensor(&[1.0, -1.0, 2.0], 3);
        for op in [
            ReductionOp::sum(vec![0], false),
            ReductionOp::mean(vec![0], false),
            ReductionOp::mean(vec![], false),
        ] {
            let inputs = vec![x.clone()];
            let out = op.execute(&inputs).unwrap();
            let g = if out[0].rank() == 1 {
                w.clone()
            } else {
                out[0].ones_like().unwrap()
            };
            let grads = op.backward(&inputs, &out, &[g.clone()]).unwrap();
            let f = |xs: &[Tensor]| op.execute(xs).unwrap().remove(0).mul(&g).unwrap();
            assert_close(
                &grads[0].as_ref().unwrap().to_f64_vec().unwrap(),
                &numeric_grad(&f, &inputs, 0),
                1e-2,
            );
        }
    }

    #[test]
    fn test_execute_dispatches_on_kind() {
        let inputs = vec![tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3))];
        let sum = ReductionOp::sum(vec![1], false).execute(&inputs).unwrap();
        assert_close(&sum[0].to_f64_vec().unwrap(), &[6.0, 15.0], 1e-6);
        let mean = ReductionOp::mean(vec![1], false).execute(&inputs).unwrap();
        assert_close(&mean[0].to_f64_vec().unwrap(), &[2.0, 5.0], 1e-6);
        let max = ReductionOp::new(ReduceOp::Max, vec![1], false);
        assert!(matches!(
            max.execute(&inputs),
            Err(Error::NotImplemented { ref op, .. }) if op == "max"
        ));
    }

    #[test]
    fn test_from_params() {
        let op = ReductionOp::sum(vec![], false)
            .with_parameters(Parameters::new().with("axes", 1usize).with("keep_dims", true))
            .unwrap();
        let out = op
            .infer_outputs(&[TensorSpec::new("x", (2, 3), DType::F32)])
            .unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 1]);
    }
}
