use std::sync::{Arc, Mutex};

use crate::backend::{BinaryOp, ReduceOp, TensorOps, UnaryOp};
use crate::cpu::CpuOps;
use crate::data::TensorData;
use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Shape;

/// A [`TensorOps`] that records the name of every call and then delegates.
///
/// Tests use it to assert which kernels an operation actually dispatched,
/// e.g. that a recorded-but-not-executed tape never touched the backend.
#[derive(Debug)]
pub struct MockOps {
    inner: Arc<dyn TensorOps>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockOps {
    fn default() -> Self {
        Self::new(Arc::new(CpuOps))
    }
}

impl MockOps {
    pub fn new(inner: Arc<dyn TensorOps>) -> Self {
        MockOps {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Names of the calls seen so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        match self.calls.lock() {
            Ok(mut calls) => calls.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn record(&self, call: impl Into<String>) {
        let call = call.into();
        log::trace!("mock ops call: {call}");
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }
}

impl TensorOps for MockOps {
    fn name(&self) -> &str {
        "mock"
    }

    fn full(&self, shape: &Shape, value: f64, dtype: DType) -> Result<TensorData> {
        self.record("full");
        self.inner.full(shape, value, dtype)
    }

    fn binary(&self, op: BinaryOp, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData> {
        self.record(op.name());
        self.inner.binary(op, lhs, rhs)
    }

    fn unary(&self, op: UnaryOp, x: &TensorData) -> Result<TensorData> {
        self.record(op.name());
        self.inner.unary(op, x)
    }

    fn affine(&self, x: &TensorData, mul: f64, add: f64) -> Result<TensorData> {
        self.record("affine");
        self.inner.affine(x, mul, add)
    }

    fn matmul(&self, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData> {
        self.record("matmul");
        self.inner.matmul(lhs, rhs)
    }

    fn reduce(
        &self,
        op: ReduceOp,
        x: &TensorData,
        dims: &[usize],
        keep_dim: bool,
    ) -> Result<TensorData> {
        self.record(op.name());
        self.inner.reduce(op, x, dims, keep_dim)
    }

    fn softmax(&self, x: &TensorData, axis: usize) -> Result<TensorData> {
        self.record("softmax");
        self.inner.softmax(x, axis)
    }

    fn conv2d(
        &self,
        x: &TensorData,
        weight: &TensorData,
        bias: Option<&TensorData>,
        stride: usize,
        padding: usize,
    ) -> Result<TensorData> {
        self.record("conv2d");
        self.inner.conv2d(x, weight, bias, stride, padding)
    }

    fn transpose(&self, x: &TensorData, dim0: usize, dim1: usize) -> Result<TensorData> {
        self.record("transpose");
        self.inner.transpose(x, dim0, dim1)
    }

    fn reshape(&self, x: &TensorData, shape: &Shape) -> Result<TensorData> {
        self.record("reshape");
        self.inner.reshape(x, shape)
    }

    fn cast(&self, x: &TensorData, dtype: DType) -> Result<TensorData> {
        self.record("cast");
        self.inner.cast(x, dtype)
    }
}
