use crate::backend::{
    binary_dtype, check_axis, conv2d_shape, matmul_shape, reduce_dims, reduce_shape, BinaryOp,
    ReduceOp, TensorOps, UnaryOp,
};
use crate::data::TensorData;
use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Shape;

// VoidOps — shape propagation without values
//
// Useful for dry runs: a model can be executed end to end to check that
// every shape and dtype lines up, without allocating or computing any
// elements. Each kernel applies the same shape rules as CpuOps and returns
// void data, so shape errors still surface. Reading an element of the
// result fails with Error::VoidData.

/// Shape-only implementation of [`TensorOps`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidOps;

impl TensorOps for VoidOps {
    fn name(&self) -> &str {
        "void"
    }

    fn full(&self, shape: &Shape, _value: f64, dtype: DType) -> Result<TensorData> {
        Ok(TensorData::void(shape.clone(), dtype))
    }

    fn binary(&self, _op: BinaryOp, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData> {
        let shape = Shape::broadcast_shape(lhs.shape(), rhs.shape())?;
        Ok(TensorData::void(
            shape,
            binary_dtype(lhs.dtype(), rhs.dtype()),
        ))
    }

    fn unary(&self, _op: UnaryOp, x: &TensorData) -> Result<TensorData> {
        Ok(TensorData::void(x.shape().clone(), x.dtype()))
    }

    fn affine(&self, x: &TensorData, _mul: f64, _add: f64) -> Result<TensorData> {
        Ok(TensorData::void(x.shape().clone(), x.dtype()))
    }

    fn matmul(&self, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData> {
        let shape = matmul_shape(lhs.shape(), rhs.shape())?;
        Ok(TensorData::void(
            shape,
            binary_dtype(lhs.dtype(), rhs.dtype()),
        ))
    }

    fn reduce(
        &self,
        _op: ReduceOp,
        x: &TensorData,
        dims: &[usize],
        keep_dim: bool,
    ) -> Result<TensorData> {
        let dims = reduce_dims(x.shape(), dims)?;
        Ok(TensorData::void(
            reduce_shape(x.shape(), &dims, keep_dim),
            x.dtype(),
        ))
    }

    fn softmax(&self, x: &TensorData, axis: usize) -> Result<TensorData> {
        check_axis(x.shape(), axis)?;
        Ok(TensorData::void(x.shape().clone(), x.dtype()))
    }

    fn conv2d(
        &self,
        x: &TensorData,
        weight: &TensorData,
        _bias: Option<&TensorData>,
        stride: usize,
        padding: usize,
    ) -> Result<TensorData> {
        let shape = conv2d_shape(x.shape(), weight.shape(), stride, padding)?;
        Ok(TensorData::void(
            shape,
            binary_dtype(x.dtype(), weight.dtype()),
        ))
    }

    fn cast(&self, x: &TensorData, dtype: DType) -> Result<TensorData> {
        x.dtype().check_convertible_to(dtype)?;
        Ok(TensorData::void(x.shape().clone(), dtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_void_propagates_shapes() {
        let ops = VoidOps;
        let a = ops.full(&Shape::from((2, 3)), 1.0, DType::F32).unwrap();
        let b = ops.full(&Shape::from((3, 4)), 1.0, DType::F16).unwrap();
        let c = ops.matmul(&a, &b).unwrap();
        assert_eq!(c.dims(), &[2, 4]);
        assert_eq!(c.dtype(), DType::F32);
        let s = ops.reduce(ReduceOp::Sum, &c, &[0], false).unwrap();
        assert_eq!(s.dims(), &[4]);
        let t = ops.transpose(&c, 0, 1).unwrap();
        assert_eq!(t.dims(), &[4, 2]);
        assert!(matches!(c.get(&[0, 0]), Err(Error::VoidData { .. })));
    }

    #[test]
    fn test_void_still_checks_shapes() {
        let ops = VoidOps;
        let a = ops.full(&Shape::from((2, 3)), 0.0, DType::F32).unwrap();
        let b = ops.full(&Shape::from((4, 5)), 0.0, DType::F32).unwrap();
        assert!(matches!(
            ops.matmul(&a, &b),
            Err(Error::MatmulShapeMismatch { .. })
        ));
        assert!(ops.cast(&a, DType::I8).is_err());
        assert!(ops.softmax(&a, 5).is_err());
    }
}
