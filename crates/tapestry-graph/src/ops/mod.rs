//! Built-in operations.
//!
//! | name        | type        | parameters                         |
//! |-------------|-------------|------------------------------------|
//! | `input`     | input       |                                    |
//! | `output`    | output      |                                    |
//! | `add`       | math        |                                    |
//! | `subtract`  | math        |                                    |
//! | `multiply`  | math        |                                    |
//! | `divide`    | math        |                                    |
//! | `matmul`    | math        |                                    |
//! | `relu`      | activation  |                                    |
//! | `sigmoid`   | activation  |                                    |
//! | `tanh`      | activation  |                                    |
//! | `sqrt`      | math        |                                    |
//! | `softmax`   | activation  | `axis` (default: last)             |
//! | `reshape`   | shape       | `shape` (required)                 |
//! | `transpose` | shape       | `dim0` (0), `dim1` (1)             |
//! | `sum`       | reduction   | `axes` (default: all), `keep_dims` |
//! | `mean`      | reduction   | `axes` (default: all), `keep_dims` |
//! | `conv2d`    | nn          | `stride` (1), `padding` (0)        |

use std::sync::Arc;

use tapestry_core::{DType, Error, Result, Shape, Tensor};

use crate::operation::Operation;
use crate::spec::TensorSpec;

mod activation;
mod conv;
mod elementwise;
mod io;
mod matmul;
mod reduce;
mod shape;

pub use activation::{ActivationOp, SoftmaxOp};
pub use conv::Conv2dOp;
pub use elementwise::ElementwiseOp;
pub use io::{InputOp, OutputOp};
pub use matmul::MatMulOp;
pub use reduce::ReductionOp;
pub use shape::{ReshapeOp, TransposeOp};

// Constructors with default parameters

pub fn input() -> Arc<dyn Operation> {
    Arc::new(InputOp::default())
}

pub fn output() -> Arc<dyn Operation> {
    Arc::new(OutputOp::default())
}

pub fn add() -> Arc<dyn Operation> {
    Arc::new(ElementwiseOp::add())
}

pub fn subtract() -> Arc<dyn Operation> {
    Arc::new(ElementwiseOp::subtract())
}

pub fn multiply() -> Arc<dyn Operation> {
    Arc::new(ElementwiseOp::multiply())
}

pub fn divide() -> Arc<dyn Operation> {
    Arc::new(ElementwiseOp::divide())
}

pub fn matmul() -> Arc<dyn Operation> {
    Arc::new(MatMulOp::default())
}

pub fn relu() -> Arc<dyn Operation> {
    Arc::new(ActivationOp::relu())
}

pub fn sigmoid() -> Arc<dyn Operation> {
    Arc::new(ActivationOp::sigmoid())
}

pub fn tanh() -> Arc<dyn Operation> {
    Arc::new(ActivationOp::tanh())
}

pub fn sqrt() -> Arc<dyn Operation> {
    Arc::new(ActivationOp::sqrt())
}

/// Softmax along `axis`, or the last axis when `None`.
pub fn softmax(axis: Option<usize>) -> Arc<dyn Operation> {
    Arc::new(SoftmaxOp::new(axis))
}

pub fn reshape(shape: impl Into<Shape>) -> Arc<dyn Operation> {
    Arc::new(ReshapeOp::new(shape.into()))
}

pub fn transpose(dim0: usize, dim1: usize) -> Arc<dyn Operation> {
    Arc::new(TransposeOp::new(dim0, dim1))
}

/// Sum over `axes` (every axis when empty).
pub fn sum(axes: &[usize], keep_dims: bool) -> Arc<dyn Operation> {
    Arc::new(ReductionOp::sum(axes.to_vec(), keep_dims))
}

pub fn mean(axes: &[usize], keep_dims: bool) -> Arc<dyn Operation> {
    Arc::new(ReductionOp::mean(axes.to_vec(), keep_dims))
}

pub fn conv2d(stride: usize, padding: usize) -> Arc<dyn Operation> {
    Arc::new(Conv2dOp::new(stride, padding))
}

// Helpers shared by the implementations

/// Push a reason unless `inputs.len()` is within `min..=max`.
pub(crate) fn check_arity(
    op: &str,
    inputs: &[TensorSpec],
    min: usize,
    max: usize,
    reasons: &mut Vec<String>,
) -> bool {
    let n = inputs.len();
    if n < min || n > max {
        let expected = if min == max {
            format!("{min}")
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("{min} to {max}")
        };
        reasons.push(format!("{op}: expected {expected} inputs, got {n}"));
        return false;
    }
    true
}

/// Fail with the collected reasons if `op` rejects `inputs`.
pub(crate) fn require_valid(op: &dyn Operation, inputs: &[TensorSpec]) -> Result<()> {
    op.validate_inputs(inputs).into_result(op.name())
}

/// Spec of output `index` of `op`. Requires grad when any input does.
pub(crate) fn output_spec(
    op: &str,
    index: usize,
    shape: Shape,
    dtype: DType,
    inputs: &[TensorSpec],
) -> TensorSpec {
    TensorSpec::new(format!("{op}:{index}"), shape, dtype)
        .with_requires_grad(inputs.iter().any(|s| s.requires_grad))
}

pub(crate) fn one<'a>(op: &str, inputs: &'a [Tensor]) -> Result<&'a Tensor> {
    match inputs {
        [x] => Ok(x),
        _ => Err(arity_error(op, 1, inputs.len())),
    }
}

pub(crate) fn two<'a>(op: &str, inputs: &'a [Tensor]) -> Result<(&'a Tensor, &'a Tensor)> {
    match inputs {
        [a, b] => Ok((a, b)),
        _ => Err(arity_error(op, 2, inputs.len())),
    }
}

/// The first output gradient, for single-output operations.
pub(crate) fn grad_of<'a>(op: &str, grad_outputs: &'a [Tensor]) -> Result<&'a Tensor> {
    grad_outputs
        .first()
        .ok_or_else(|| Error::msg(format!("{op}.backward: no output gradient")))
}

fn arity_error(op: &str, expected: usize, got: usize) -> Error {
    Error::InvalidOperation {
        op: op.to_string(),
        reasons: vec![format!("{op}: expected {expected} inputs, got {got}")],
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use tapestry_core::{CpuOps, DType, Shape, Tensor, TensorData};

    pub fn tensor(values: &[f64], shape: impl Into<Shape>) -> Tensor {
        let data = TensorData::from_f64_slice(values, shape, DType::F32).unwrap();
        Tensor::new(data, Arc::new(CpuOps))
    }

    pub fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len(), "length mismatch: {:?} vs {:?}", a, b);
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() < tol, "element {i}: {x} vs {y}");
        }
    }

    /// Central-difference gradient of `sum(f(x))` with respect to input
    /// `which`.
    pub fn numeric_grad(
        f: &dyn Fn(&[Tensor]) -> Tensor,
        inputs: &[Tensor],
        which: usize,
    ) -> Vec<f64> {
        let eps = 1e-3;
        let base = inputs[which].to_f64_vec().unwrap();
        let shape = inputs[which].shape().clone();
        (0..base.len())
            .map(|i| {
                let eval = |delta: f64| {
                    let mut v = base.clone();
                    v[i] += delta;
                    let mut xs = inputs.to_vec();
                    xs[which] = tensor(&v, shape.clone());
                    f(&xs).sum_all().unwrap().to_scalar().unwrap()
                };
                (eval(eps) - eval(-eps)) / (2.0 * eps)
            })
            .collect()
    }
}
