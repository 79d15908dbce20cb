use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::{BinaryOp, ReduceOp, TensorOps, UnaryOp};
use crate::data::TensorData;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::SliceSpec;
use crate::shape::Shape;

// Tensor — TensorData bound to a TensorOps
//
// A Tensor is exactly one TensorData plus one shared Arc<dyn TensorOps>.
// The data says *what* the values are; the ops binding says *how* to
// compute with them. Every method dispatches explicitly to the binding and
// wraps the result in a new Tensor with a fresh TensorId that shares the
// same binding. Operands are never written.
//
// Cloning a Tensor is cheap and yields the *same* tensor: same id, same
// buffer. Tapes use the id to follow dataflow between recorded operations.

/// Unique identifier for a tensor (process-wide atomic counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// An n-dimensional array bound to a compute binding.
#[derive(Clone)]
pub struct Tensor {
    id: TensorId,
    data: TensorData,
    ops: Arc<dyn TensorOps>,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(id={}, shape={}, dtype={}, ops={})",
            self.id,
            self.data.shape(),
            self.data.dtype(),
            self.ops.name(),
        )
    }
}

impl Tensor {
    /// Bind data to a compute binding under a fresh id.
    pub fn new(data: TensorData, ops: Arc<dyn TensorOps>) -> Self {
        Tensor {
            id: TensorId::new(),
            data,
            ops,
        }
    }

    /// New tensor sharing this tensor's binding.
    fn wrap(&self, data: TensorData) -> Tensor {
        Tensor::new(data, Arc::clone(&self.ops))
    }

    // Accessors

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn ops(&self) -> &Arc<dyn TensorOps> {
        &self.ops
    }

    pub fn shape(&self) -> &Shape {
        self.data.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.data.dims()
    }

    pub fn rank(&self) -> usize {
        self.data.rank()
    }

    pub fn volume(&self) -> usize {
        self.data.volume()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Element at `indices`.
    pub fn get(&self, indices: &[usize]) -> Result<f64> {
        self.data.get(indices)
    }

    /// Every element as f64, row-major.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        self.data.to_f64_vec()
    }

    /// The single value of a one-element tensor.
    pub fn to_scalar(&self) -> Result<f64> {
        if self.volume() != 1 {
            return Err(Error::ShapeMismatch {
                expected: Shape::scalar(),
                got: self.shape().clone(),
            });
        }
        let v = self.to_f64_vec()?;
        Ok(v[0])
    }

    // Creation from an existing tensor

    /// Same data and binding under a fresh id. Pass-through operations use
    /// it so that their output is a distinct node in a tape's dataflow.
    pub fn identity(&self) -> Tensor {
        self.wrap(self.data.clone())
    }

    /// Same shape and dtype, every element `value`.
    pub fn full_like(&self, value: f64) -> Result<Tensor> {
        let data = self.ops.full(self.shape(), value, self.dtype())?;
        Ok(self.wrap(data))
    }

    pub fn zeros_like(&self) -> Result<Tensor> {
        self.full_like(0.0)
    }

    pub fn ones_like(&self) -> Result<Tensor> {
        self.full_like(1.0)
    }

    // Element-wise binary

    fn binary(&self, op: BinaryOp, rhs: &Tensor) -> Result<Tensor> {
        let data = self.ops.binary(op, &self.data, &rhs.data)?;
        Ok(self.wrap(data))
    }

    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(BinaryOp::Div, rhs)
    }

    // Element-wise unary

    fn unary(&self, op: UnaryOp) -> Result<Tensor> {
        let data = self.ops.unary(op, &self.data)?;
        Ok(self.wrap(data))
    }

    pub fn neg(&self) -> Result<Tensor> {
        self.unary(UnaryOp::Neg)
    }

    pub fn exp(&self) -> Result<Tensor> {
        self.unary(UnaryOp::Exp)
    }

    pub fn log(&self) -> Result<Tensor> {
        self.unary(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> Result<Tensor> {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn relu(&self) -> Result<Tensor> {
        self.unary(UnaryOp::Relu)
    }

    pub fn sigmoid(&self) -> Result<Tensor> {
        self.unary(UnaryOp::Sigmoid)
    }

    pub fn tanh(&self) -> Result<Tensor> {
        self.unary(UnaryOp::Tanh)
    }

    /// 1 where the element is positive, else 0.
    pub fn step(&self) -> Result<Tensor> {
        self.unary(UnaryOp::Step)
    }

    /// `self * mul + add`.
    pub fn affine(&self, mul: f64, add: f64) -> Result<Tensor> {
        let data = self.ops.affine(&self.data, mul, add)?;
        Ok(self.wrap(data))
    }

    // Linear algebra

    /// `[m, k] @ [k, n] → [m, n]`.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        let data = self.ops.matmul(&self.data, &rhs.data)?;
        Ok(self.wrap(data))
    }

    /// NCHW convolution with an OIHW weight.
    pub fn conv2d(
        &self,
        weight: &Tensor,
        bias: Option<&Tensor>,
        stride: usize,
        padding: usize,
    ) -> Result<Tensor> {
        let data = self.ops.conv2d(
            &self.data,
            &weight.data,
            bias.map(|b| &b.data),
            stride,
            padding,
        )?;
        Ok(self.wrap(data))
    }

    // Reductions

    pub fn sum(&self, dims: &[usize], keep_dim: bool) -> Result<Tensor> {
        let data = self.ops.reduce(ReduceOp::Sum, &self.data, dims, keep_dim)?;
        Ok(self.wrap(data))
    }

    pub fn mean(&self, dims: &[usize], keep_dim: bool) -> Result<Tensor> {
        let data = self
            .ops
            .reduce(ReduceOp::Mean, &self.data, dims, keep_dim)?;
        Ok(self.wrap(data))
    }

    pub fn max(&self, dims: &[usize], keep_dim: bool) -> Result<Tensor> {
        let data = self.ops.reduce(ReduceOp::Max, &self.data, dims, keep_dim)?;
        Ok(self.wrap(data))
    }

    /// Sum of every element, as a rank-0 tensor.
    pub fn sum_all(&self) -> Result<Tensor> {
        self.sum(&[], false)
    }

    pub fn mean_all(&self) -> Result<Tensor> {
        self.mean(&[], false)
    }

    /// Sum away the axes that broadcasting added or stretched, so the result
    /// has `target`'s shape. Used to route a gradient back to a broadcast
    /// operand.
    pub fn sum_to_shape(&self, target: &Shape) -> Result<Tensor> {
        if self.shape() == target {
            return Ok(self.clone());
        }
        let broadcast = Shape::broadcast_shape(target, self.shape())?;
        if &broadcast != self.shape() {
            return Err(Error::ShapeMismatch {
                expected: broadcast,
                got: self.shape().clone(),
            });
        }
        let extra = self.rank() - target.rank();
        let dims: Vec<usize> = (0..self.rank())
            .filter(|&axis| {
                axis < extra || (target.dims()[axis - extra] == 1 && self.dims()[axis] != 1)
            })
            .collect();
        let summed = if dims.is_empty() {
            self.clone()
        } else {
            self.sum(&dims, true)?
        };
        summed.reshape(target)
    }

    pub fn softmax(&self, axis: usize) -> Result<Tensor> {
        let data = self.ops.softmax(&self.data, axis)?;
        Ok(self.wrap(data))
    }

    // Shape manipulation

    /// Swap two axes (zero-copy with the default binding).
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Tensor> {
        let data = self.ops.transpose(&self.data, dim0, dim1)?;
        Ok(self.wrap(data))
    }

    /// Transpose of a matrix.
    pub fn t(&self) -> Result<Tensor> {
        if self.rank() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: self.rank(),
            });
        }
        self.transpose(0, 1)
    }

    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        let data = self.ops.reshape(&self.data, &shape)?;
        Ok(self.wrap(data))
    }

    /// Zero-copy view from per-axis slice descriptors.
    pub fn slice(&self, specs: &[SliceSpec]) -> Result<Tensor> {
        let data = self.data.slice(specs)?;
        Ok(self.wrap(data))
    }

    /// Dense copy detached from any shared buffer.
    pub fn materialize(&self) -> Result<Tensor> {
        let data = self.data.materialize()?;
        Ok(self.wrap(data))
    }

    /// Convert along the dtype compatibility table.
    pub fn to_dtype(&self, dtype: DType) -> Result<Tensor> {
        let data = self.ops.cast(&self.data, dtype)?;
        Ok(self.wrap(data))
    }
}
