use std::sync::Arc;

use tapestry_core::{Result, Shape, Tensor};

use super::{check_arity, grad_of, one, output_spec, require_valid};
use crate::operation::{OpType, Operation, Parameters, ValidationResult};
use crate::spec::TensorSpec;

/// Same elements under a new shape of equal volume.
#[derive(Debug, Clone)]
pub struct ReshapeOp {
    shape: Shape,
    params: Parameters,
}

impl ReshapeOp {
    pub fn new(shape: Shape) -> Self {
        let params = Parameters::new().with("shape", shape.dims().to_vec());
        ReshapeOp { shape, params }
    }

    fn from_params(params: Parameters) -> Result<Self> {
        let shape = Shape::new(params.usizes("reshape", "shape")?);
        Ok(ReshapeOp { shape, params })
    }
}

impl Operation for ReshapeOp {
    fn name(&self) -> &str {
        "reshape"
    }

    fn op_type(&self) -> OpType {
        OpType::Shape
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        if check_arity(self.name(), inputs, 1, 1, &mut reasons) {
            let x = &inputs[0];
            if x.shape.volume() != self.shape.volume() {
                reasons.push(format!(
                    "reshape: input 0 has shape {} ({} elements), target {} has {}",
                    x.shape,
                    x.shape.volume(),
                    self.shape,
                    self.shape.volume()
                ));
            }
        }
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        Ok(vec![output_spec(
            self.name(),
            0,
            self.shape.clone(),
            inputs[0].dtype,
            inputs,
        )])
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = one(self.name(), inputs)?;
        Ok(vec![x.reshape(&self.shape)?])
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(ReshapeOp::from_params(params)?))
    }

    fn backward(
        &self,
        inputs: &[Tensor],
        _outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        let x = one(self.name(), inputs)?;
        let g = grad_of(self.name(), grad_outputs)?;
        Ok(vec![Some(g.reshape(x.shape())?)])
    }
}

/// Swap two axes.
#[derive(Debug, Clone)]
pub struct TransposeOp {
    dim0: usize,
    dim1: usize,
    params: Parameters,
}

impl TransposeOp {
    pub fn new(dim0: usize, dim1: usize) -> Self {
        let params = Parameters::new().with("dim0", dim0).with("dim1", dim1);
        TransposeOp { dim0, dim1, params }
    }

    fn from_params(params: Parameters) -> Result<Self> {
        let dim0 = params.usize_or("transpose", "dim0", 0)?;
        let dim1 = params.usize_or("transpose", "dim1", 1)?;
        Ok(TransposeOp { dim0, dim1, params })
    }
}

impl Operation for TransposeOp {
    fn name(&self) -> &str {
        "transpose"
    }

    fn op_type(&self) -> OpType {
        OpType::Shape
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        if check_arity(self.name(), inputs, 1, 1, &mut reasons) {
            let rank = inputs[0].rank();
            for d in [self.dim0, self.dim1] {
                if d >= rank {
                    reasons.push(format!(
                        "transpose: axis {d} out of range for input 0 with shape {}",
                        inputs[0].shape
                    ));
                }
            }
        }
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        let mut dims = inputs[0].shape.dims().to_vec();
        dims.swap(self.dim0, self.dim1);
        Ok(vec![output_spec(
            self.name(),
            0,
            Shape::new(dims),
            inputs[0].dtype,
            inputs,
        )])
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let x = one(self.name(), inputs)?;
        Ok(vec![x.transpose(self.dim0, self.dim1)?])
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(TransposeOp::from_params(params)?))
    }

    fn backward(
        &self,
        _inputs: &[Tensor],
        _outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        let g = grad_of(self.name(), grad_outputs)?;
        Ok(vec![Some(g.transpose(self.dim0, self.dim1)?)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::tensor;
    use tapestry_core::DType;

    #[test]
    fn test_reshape() {
        let op = ReshapeOp::new(Shape::from((3, 2)));
        let spec = TensorSpec::new("x", (2, 3), DType::F32);
        assert_eq!(op.infer_outputs(&[spec]).unwrap()[0].shape.dims(), &[3, 2]);
        assert!(!op
            .validate_inputs(&[TensorSpec::new("x", 5, DType::F32)])
            .is_valid());

        let x = tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        let out = op.execute(&[x.clone()]).unwrap();
        let g = op.backward(&[x.clone()], &out, &[out[0].ones_like().unwrap()]).unwrap();
        assert_eq!(g[0].as_ref().unwrap().shape(), x.shape());
    }

    #[test]
    fn test_reshape_from_params() {
        let op = ReshapeOp::new(Shape::from(6));
        let other = op
            .with_parameters(Parameters::new().with("shape", vec![2usize, 3]))
            .unwrap();
        let out = other
            .infer_outputs(&[TensorSpec::new("x", 6, DType::F32)])
            .unwrap();
        assert_eq!(out[0].shape.dims(), &[2, 3]);
        assert!(op.with_parameters(Parameters::new()).is_err());
    }

    #[test]
    fn test_transpose() {
        let op = TransposeOp::new(0, 2);
        let spec = TensorSpec::new("x", (2, 3, 4), DType::F16);
        let out = op.infer_outputs(&[spec]).unwrap();
        assert_eq!(out[0].shape.dims(), &[4, 3, 2]);
        assert_eq!(out[0].dtype, DType::F16);
        assert!(!op
            .validate_inputs(&[TensorSpec::new("x", (2, 3), DType::F32)])
            .is_valid());

        let x = tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        let t = TransposeOp::new(0, 1);
        let y = t.execute(&[x.clone()]).unwrap();
        let g = t.backward(&[x], &y, &[y[0].clone()]).unwrap();
        assert_eq!(
            g[0].as_ref().unwrap().to_f64_vec().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }
}
