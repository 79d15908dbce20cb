use std::fmt;

use crate::data::TensorData;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;

// TensorOps — the numeric capability set behind every Tensor
//
// A Tensor is one TensorData plus one shared TensorOps binding. The binding
// is stateless (or internally synchronized) and shared through
// Arc<dyn TensorOps>, so one CpuOps instance serves every tensor of a
// context.
//
// Every method takes its operands by reference and returns fresh data.
// Kernels never write into an operand.
//
// Three bindings ship with the crate:
//
//   CpuOps   dense kernels, computed in f64 and cast back to the result dtype
//   VoidOps  shape and dtype propagation only; the results hold no values
//   MockOps  records every call by name and delegates to an inner binding
//
// A binding that has no kernel for some method returns
// Error::NotImplemented. It never fabricates a zero-filled result.
//
// The shape rules (broadcasting, matmul, reductions, convolution) live in
// free functions below so that every binding agrees on output shapes.

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
    Relu,
    Sigmoid,
    Tanh,
    /// Heaviside step: 1 where x > 0, else 0. The derivative mask of relu.
    Step,
}

impl UnaryOp {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Relu => x.max(0.0),
            UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Step => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Relu => "relu",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Step => "step",
        }
    }
}

/// Reductions along one or more axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
}

impl ReduceOp {
    pub fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Mean => "mean",
            ReduceOp::Max => "max",
        }
    }
}

/// Numeric capability set shared by tensors.
///
/// Results of mixed-dtype binary kernels and of matmul use
/// [`DType::common_precision_with`]. Every other kernel keeps the input's
/// dtype.
pub trait TensorOps: Send + Sync + fmt::Debug {
    /// Short name used in logs and `NotImplemented` errors.
    fn name(&self) -> &str;

    /// A tensor of `shape` with every element equal to `value`.
    fn full(&self, shape: &Shape, value: f64, dtype: DType) -> Result<TensorData>;

    /// Element-wise `op(lhs, rhs)` with NumPy broadcasting.
    fn binary(&self, op: BinaryOp, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData>;

    fn unary(&self, op: UnaryOp, x: &TensorData) -> Result<TensorData>;

    /// `x * mul + add`, element-wise.
    fn affine(&self, x: &TensorData, mul: f64, add: f64) -> Result<TensorData>;

    /// `[m, k] @ [k, n] → [m, n]`.
    fn matmul(&self, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData>;

    /// Reduce over `dims` (all axes when empty).
    fn reduce(
        &self,
        op: ReduceOp,
        x: &TensorData,
        dims: &[usize],
        keep_dim: bool,
    ) -> Result<TensorData>;

    /// Softmax along `axis`.
    fn softmax(&self, x: &TensorData, axis: usize) -> Result<TensorData>;

    /// 2-D convolution, NCHW input and OIHW weight.
    fn conv2d(
        &self,
        x: &TensorData,
        weight: &TensorData,
        bias: Option<&TensorData>,
        stride: usize,
        padding: usize,
    ) -> Result<TensorData> {
        let _ = (x, weight, bias, stride, padding);
        Err(Error::not_implemented("conv2d", self.name()))
    }

    /// Swap two axes. The default returns a zero-copy view.
    fn transpose(&self, x: &TensorData, dim0: usize, dim1: usize) -> Result<TensorData> {
        x.transpose(dim0, dim1)
    }

    fn reshape(&self, x: &TensorData, shape: &Shape) -> Result<TensorData> {
        x.reshape(shape)
    }

    /// Convert along the dtype compatibility table.
    fn cast(&self, x: &TensorData, dtype: DType) -> Result<TensorData> {
        x.to_dtype(dtype)
    }
}

// Shape rules shared by every binding

/// Dtype of a binary kernel's result.
pub fn binary_dtype(lhs: DType, rhs: DType) -> DType {
    lhs.common_precision_with(rhs)
}

/// Output shape of `[m, k] @ [k, n]`.
pub fn matmul_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    if lhs.rank() != 2 {
        return Err(Error::RankMismatch {
            expected: 2,
            got: lhs.rank(),
        });
    }
    if rhs.rank() != 2 {
        return Err(Error::RankMismatch {
            expected: 2,
            got: rhs.rank(),
        });
    }
    let (m, k1) = (lhs.dims()[0], lhs.dims()[1]);
    let (k2, n) = (rhs.dims()[0], rhs.dims()[1]);
    if k1 != k2 {
        return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
    }
    Ok(Shape::from((m, n)))
}

/// Validated, sorted, de-duplicated reduction axes. Empty means every axis.
pub fn reduce_dims(shape: &Shape, dims: &[usize]) -> Result<Vec<usize>> {
    if dims.is_empty() {
        return Ok((0..shape.rank()).collect());
    }
    let mut out = Vec::with_capacity(dims.len());
    for &d in dims {
        if d >= shape.rank() {
            return Err(Error::DimOutOfRange {
                dim: d,
                rank: shape.rank(),
            });
        }
        if !out.contains(&d) {
            out.push(d);
        }
    }
    out.sort_unstable();
    Ok(out)
}

/// Output shape of a reduction over already-validated `dims`.
pub fn reduce_shape(shape: &Shape, dims: &[usize], keep_dim: bool) -> Shape {
    let out: Vec<usize> = shape
        .dims()
        .iter()
        .enumerate()
        .filter_map(|(axis, &d)| match (dims.contains(&axis), keep_dim) {
            (false, _) => Some(d),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect();
    Shape::new(out)
}

/// Output shape of an NCHW convolution.
pub fn conv2d_shape(x: &Shape, weight: &Shape, stride: usize, padding: usize) -> Result<Shape> {
    if x.rank() != 4 {
        return Err(Error::RankMismatch {
            expected: 4,
            got: x.rank(),
        });
    }
    if weight.rank() != 4 {
        return Err(Error::RankMismatch {
            expected: 4,
            got: weight.rank(),
        });
    }
    if stride == 0 {
        return Err(Error::msg("conv2d stride must be at least 1"));
    }
    let (n, c, h, w) = (x.dims()[0], x.dims()[1], x.dims()[2], x.dims()[3]);
    let (o, wc, kh, kw) = (
        weight.dims()[0],
        weight.dims()[1],
        weight.dims()[2],
        weight.dims()[3],
    );
    if c != wc {
        return Err(Error::msg(format!(
            "conv2d: input has {c} channels, weight expects {wc}"
        )));
    }
    if h + 2 * padding < kh || w + 2 * padding < kw {
        return Err(Error::msg(format!(
            "conv2d: kernel {kh}x{kw} larger than padded input {}x{}",
            h + 2 * padding,
            w + 2 * padding
        )));
    }
    let oh = (h + 2 * padding - kh) / stride + 1;
    let ow = (w + 2 * padding - kw) / stride + 1;
    Ok(Shape::from((n, o, oh, ow)))
}

/// Fail unless `axis < rank`.
pub fn check_axis(shape: &Shape, axis: usize) -> Result<()> {
    if axis >= shape.rank() {
        return Err(Error::DimOutOfRange {
            dim: axis,
            rank: shape.rank(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_shape() {
        let s = matmul_shape(&Shape::from((2, 3)), &Shape::from((3, 5))).unwrap();
        assert_eq!(s.dims(), &[2, 5]);
        assert!(matches!(
            matmul_shape(&Shape::from((2, 3)), &Shape::from((4, 5))),
            Err(Error::MatmulShapeMismatch {
                m: 2,
                k1: 3,
                k2: 4,
                n: 5
            })
        ));
        assert!(matmul_shape(&Shape::from(3), &Shape::from((3, 1))).is_err());
    }

    #[test]
    fn test_reduce_shape() {
        let shape = Shape::from((2, 3, 4));
        let dims = reduce_dims(&shape, &[2, 0, 2]).unwrap();
        assert_eq!(dims, vec![0, 2]);
        assert_eq!(reduce_shape(&shape, &dims, false).dims(), &[3]);
        assert_eq!(reduce_shape(&shape, &dims, true).dims(), &[1, 3, 1]);
        let all = reduce_dims(&shape, &[]).unwrap();
        assert_eq!(reduce_shape(&shape, &all, false), Shape::scalar());
        assert!(reduce_dims(&shape, &[3]).is_err());
    }

    #[test]
    fn test_conv2d_shape() {
        let s = conv2d_shape(&Shape::from((1, 3, 8, 8)), &Shape::from((4, 3, 3, 3)), 1, 1).unwrap();
        assert_eq!(s.dims(), &[1, 4, 8, 8]);
        let s =
            conv2d_shape(&Shape::from((2, 1, 5, 5)), &Shape::from((1, 1, 3, 3)), 2, 0).unwrap();
        assert_eq!(s.dims(), &[2, 1, 2, 2]);
        let mismatched = Shape::from((1, 3, 3, 3));
        assert!(conv2d_shape(&Shape::from((1, 2, 4, 4)), &mismatched, 1, 0).is_err());
    }

    #[test]
    fn test_op_scalars() {
        assert_eq!(BinaryOp::Div.apply(1.0, 4.0), 0.25);
        assert_eq!(UnaryOp::Relu.apply(-2.0), 0.0);
        assert_eq!(UnaryOp::Step.apply(0.0), 0.0);
        assert!((UnaryOp::Sigmoid.apply(0.0) - 0.5).abs() < 1e-12);
    }
}
