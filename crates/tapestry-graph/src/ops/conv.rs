use std::sync::Arc;

use tapestry_core::backend::conv2d_shape;
use tapestry_core::{Error, Result, Shape, Tensor};

use super::{check_arity, output_spec, require_valid};
use crate::operation::{OpType, Operation, Parameters, ValidationResult};
use crate::spec::TensorSpec;

/// 2-D convolution: inputs `x [N, C, H, W]`, `weight [O, C, KH, KW]` and an
/// optional `bias [O]`.
#[derive(Debug, Clone)]
pub struct Conv2dOp {
    stride: usize,
    padding: usize,
    params: Parameters,
}

impl Conv2dOp {
    pub fn new(stride: usize, padding: usize) -> Self {
        let params = Parameters::new()
            .with("stride", stride)
            .with("padding", padding);
        Conv2dOp {
            stride,
            padding,
            params,
        }
    }

    fn from_params(params: Parameters) -> Result<Self> {
        let stride = params.usize_or("conv2d", "stride", 1)?;
        let padding = params.usize_or("conv2d", "padding", 0)?;
        Ok(Conv2dOp {
            stride,
            padding,
            params,
        })
    }
}

impl Operation for Conv2dOp {
    fn name(&self) -> &str {
        "conv2d"
    }

    fn op_type(&self) -> OpType {
        OpType::Nn
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult {
        let mut reasons = Vec::new();
        if !check_arity(self.name(), inputs, 2, 3, &mut reasons) {
            return ValidationResult::from_reasons(reasons);
        }
        match conv2d_shape(
            &inputs[0].shape,
            &inputs[1].shape,
            self.stride,
            self.padding,
        ) {
            Err(e) => reasons.push(format!("conv2d: inputs 0 and 1: {e}")),
            Ok(out) => {
                if let Some(bias) = inputs.get(2) {
                    let channels = out.dims()[1];
                    if bias.shape.volume() != channels {
                        reasons.push(format!(
                            "conv2d: input 2 (bias) must hold {channels} values, got shape {}",
                            bias.shape
                        ));
                    }
                }
            }
        }
        ValidationResult::from_reasons(reasons)
    }

    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>> {
        require_valid(self, inputs)?;
        let shape: Shape = conv2d_shape(
            &inputs[0].shape,
            &inputs[1].shape,
            self.stride,
            self.padding,
        )?;
        let dtype = inputs[0].dtype.common_precision_with(inputs[1].dtype);
        Ok(vec![output_spec(self.name(), 0, shape, dtype, inputs)])
    }

    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let (x, w, bias) = match inputs {
            [x, w] => (x, w, None),
            [x, w, b] => (x, w, Some(b)),
            _ => {
                return Err(Error::InvalidOperation {
                    op: self.name().to_string(),
                    reasons: vec![format!(
                        "conv2d: expected 2 to 3 inputs, got {}",
                        inputs.len()
                    )],
                })
            }
        };
        Ok(vec![x.conv2d(w, bias, self.stride, self.padding)?])
    }

    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(Conv2dOp::from_params(params)?))
    }

    fn backward(
        &self,
        _inputs: &[Tensor],
        _outputs: &[Tensor],
        _grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        Err(Error::not_implemented("conv2d.backward", "autodiff"))
    }
}
