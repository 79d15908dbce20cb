use rayon::prelude::*;

use crate::backend::{
    binary_dtype, check_axis, conv2d_shape, matmul_shape, reduce_dims, reduce_shape, BinaryOp,
    ReduceOp, TensorOps, UnaryOp,
};
use crate::data::TensorData;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::shape::Shape;

// CpuOps — dense reference kernels
//
// Every kernel reads its operands in logical order as f64, computes in f64
// and stores the result with cast semantics into the result dtype (floats
// round, integers truncate toward zero and saturate, packed kinds clamp to
// their range). Views and packed data are read through their layouts, so
// the kernels never care how an operand is backed.
//
// Matmul splits output rows across the rayon pool; everything else is a
// straight loop.

/// Dense CPU implementation of [`TensorOps`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuOps;

impl CpuOps {
    pub fn new() -> Self {
        CpuOps
    }
}

/// Buffer positions that read a `src`-shaped row-major buffer as if it had
/// the broadcast shape `target`.
fn broadcast_positions(src: &Shape, target: &Shape) -> Vec<usize> {
    let strides = src.broadcast_strides(target);
    Layout::new(target.clone(), strides, 0)
        .strided_indices()
        .collect()
}

impl TensorOps for CpuOps {
    fn name(&self) -> &str {
        "cpu"
    }

    fn full(&self, shape: &Shape, value: f64, dtype: DType) -> Result<TensorData> {
        dtype.validate_value(value)?;
        Ok(TensorData::from_f64_cast(
            &vec![value; shape.volume()],
            shape.clone(),
            dtype,
        ))
    }

    fn binary(&self, op: BinaryOp, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData> {
        let out_shape = Shape::broadcast_shape(lhs.shape(), rhs.shape())?;
        let dtype = binary_dtype(lhs.dtype(), rhs.dtype());
        let a = lhs.to_f64_vec()?;
        let b = rhs.to_f64_vec()?;

        let out: Vec<f64> = if lhs.shape() == rhs.shape() {
            a.iter().zip(&b).map(|(&x, &y)| op.apply(x, y)).collect()
        } else {
            let a_pos = broadcast_positions(lhs.shape(), &out_shape);
            let b_pos = broadcast_positions(rhs.shape(), &out_shape);
            a_pos
                .iter()
                .zip(&b_pos)
                .map(|(&i, &j)| op.apply(a[i], b[j]))
                .collect()
        };
        Ok(TensorData::from_f64_cast(&out, out_shape, dtype))
    }

    fn unary(&self, op: UnaryOp, x: &TensorData) -> Result<TensorData> {
        let out: Vec<f64> = x.to_f64_vec()?.into_iter().map(|v| op.apply(v)).collect();
        Ok(TensorData::from_f64_cast(
            &out,
            x.shape().clone(),
            x.dtype(),
        ))
    }

    fn affine(&self, x: &TensorData, mul: f64, add: f64) -> Result<TensorData> {
        let out: Vec<f64> = x
            .to_f64_vec()?
            .into_iter()
            .map(|v| v * mul + add)
            .collect();
        Ok(TensorData::from_f64_cast(
            &out,
            x.shape().clone(),
            x.dtype(),
        ))
    }

    fn matmul(&self, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData> {
        let out_shape = matmul_shape(lhs.shape(), rhs.shape())?;
        let (m, k) = (lhs.dims()[0], lhs.dims()[1]);
        let n = rhs.dims()[1];
        let a = lhs.to_f64_vec()?;
        let b = rhs.to_f64_vec()?;

        let mut out = vec![0.0f64; m * n];
        if n > 0 {
            out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
                let a_row = &a[i * k..(i + 1) * k];
                for (p, &a_ip) in a_row.iter().enumerate() {
                    let b_row = &b[p * n..(p + 1) * n];
                    for (o, &b_pj) in row.iter_mut().zip(b_row) {
                        *o += a_ip * b_pj;
                    }
                }
            });
        }
        let dtype = binary_dtype(lhs.dtype(), rhs.dtype());
        Ok(TensorData::from_f64_cast(&out, out_shape, dtype))
    }

    fn reduce(
        &self,
        op: ReduceOp,
        x: &TensorData,
        dims: &[usize],
        keep_dim: bool,
    ) -> Result<TensorData> {
        let shape = x.shape();
        let dims = reduce_dims(shape, dims)?;
        let kept = reduce_shape(shape, &dims, true);
        let values = x.to_f64_vec()?;

        let init = match op {
            ReduceOp::Sum | ReduceOp::Mean => 0.0,
            ReduceOp::Max => f64::NEG_INFINITY,
        };
        let mut acc = vec![init; kept.volume()];
        for (flat, &v) in values.iter().enumerate() {
            let mut idx = shape.unravel(flat);
            for &d in &dims {
                idx[d] = 0;
            }
            let slot = kept.index(&idx)?;
            match op {
                ReduceOp::Sum | ReduceOp::Mean => acc[slot] += v,
                ReduceOp::Max => acc[slot] = acc[slot].max(v),
            }
        }
        if op == ReduceOp::Mean {
            let count: usize = dims.iter().map(|&d| shape.dims()[d]).product();
            for a in acc.iter_mut() {
                *a /= count as f64;
            }
        }

        let out_shape = reduce_shape(shape, &dims, keep_dim);
        Ok(TensorData::from_f64_cast(&acc, out_shape, x.dtype()))
    }

    fn softmax(&self, x: &TensorData, axis: usize) -> Result<TensorData> {
        check_axis(x.shape(), axis)?;
        let dims = x.dims();
        let len = dims[axis];
        let inner: usize = dims[axis + 1..].iter().product();
        let outer: usize = dims[..axis].iter().product();
        let mut values = x.to_f64_vec()?;

        for o in 0..outer {
            for i in 0..inner {
                let base = o * len * inner + i;
                let at = |k: usize| base + k * inner;
                let max = (0..len)
                    .map(|k| values[at(k)])
                    .fold(f64::NEG_INFINITY, f64::max);
                let mut denom = 0.0;
                for k in 0..len {
                    let e = (values[at(k)] - max).exp();
                    values[at(k)] = e;
                    denom += e;
                }
                for k in 0..len {
                    values[at(k)] /= denom;
                }
            }
        }
        Ok(TensorData::from_f64_cast(
            &values,
            x.shape().clone(),
            x.dtype(),
        ))
    }

    fn conv2d(
        &self,
        x: &TensorData,
        weight: &TensorData,
        bias: Option<&TensorData>,
        stride: usize,
        padding: usize,
    ) -> Result<TensorData> {
        let out_shape = conv2d_shape(x.shape(), weight.shape(), stride, padding)?;
        let (n, c, h, w) = (x.dims()[0], x.dims()[1], x.dims()[2], x.dims()[3]);
        let (kh, kw) = (weight.dims()[2], weight.dims()[3]);
        let (o_ch, oh, ow) = (out_shape.dims()[1], out_shape.dims()[2], out_shape.dims()[3]);

        let bias = match bias {
            Some(b) => {
                if b.volume() != o_ch {
                    return Err(Error::ShapeMismatch {
                        expected: Shape::from(o_ch),
                        got: b.shape().clone(),
                    });
                }
                b.to_f64_vec()?
            }
            None => vec![0.0; o_ch],
        };
        let xv = x.to_f64_vec()?;
        let wv = weight.to_f64_vec()?;

        let mut out = vec![0.0f64; out_shape.volume()];
        for b in 0..n {
            for oc in 0..o_ch {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let mut sum = bias[oc];
                        for ic in 0..c {
                            for ky in 0..kh {
                                let iy = (oy * stride + ky) as isize - padding as isize;
                                if iy < 0 || iy >= h as isize {
                                    continue;
                                }
                                for kx in 0..kw {
                                    let ix = (ox * stride + kx) as isize - padding as isize;
                                    if ix < 0 || ix >= w as isize {
                                        continue;
                                    }
                                    let xi = ((b * c + ic) * h + iy as usize) * w + ix as usize;
                                    let wi = ((oc * c + ic) * kh + ky) * kw + kx;
                                    sum += xv[xi] * wv[wi];
                                }
                            }
                        }
                        out[((b * o_ch + oc) * oh + oy) * ow + ox] = sum;
                    }
                }
            }
        }
        let dtype = binary_dtype(x.dtype(), weight.dtype());
        Ok(TensorData::from_f64_cast(&out, out_shape, dtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SliceSpec;

    fn data(values: &[f64], shape: impl Into<Shape>) -> TensorData {
        TensorData::from_f64_slice(values, shape, DType::F32).unwrap()
    }

    fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len(), "length mismatch: {:?} vs {:?}", a, b);
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() < tol, "element {i}: {x} vs {y}");
        }
    }

    #[test]
    fn test_binary_broadcast() {
        let ops = CpuOps;
        let a = data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        let b = data(&[10.0, 20.0, 30.0], 3);
        let c = ops.binary(BinaryOp::Add, &a, &b).unwrap();
        assert_eq!(c.dims(), &[2, 3]);
        assert_eq!(
            c.to_f64_vec().unwrap(),
            vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]
        );
        let col = data(&[2.0, 4.0], (2, 1));
        let d = ops.binary(BinaryOp::Div, &a, &col).unwrap();
        assert_eq!(d.to_f64_vec().unwrap(), vec![0.5, 1.0, 1.5, 1.0, 1.25, 1.5]);
        assert!(ops.binary(BinaryOp::Add, &a, &data(&[1.0, 2.0], 2)).is_err());
    }

    #[test]
    fn test_binary_promotes_dtype() {
        let ops = CpuOps;
        let a = TensorData::from_f64_slice(&[1.0, 2.0], 2, DType::I8).unwrap();
        let b = TensorData::from_f64_slice(&[0.5, 0.5], 2, DType::F16).unwrap();
        let c = ops.binary(BinaryOp::Mul, &a, &b).unwrap();
        assert_eq!(c.dtype(), DType::F16);
        assert_eq!(c.to_f64_vec().unwrap(), vec![0.5, 1.0]);

        let x = TensorData::from_f64_slice(&[7.0, -8.0], 2, DType::I4).unwrap();
        let y = ops.binary(BinaryOp::Add, &x, &x).unwrap();
        assert_eq!(y.dtype(), DType::I4);
        assert_eq!(y.to_f64_vec().unwrap(), vec![7.0, -8.0]);
    }

    #[test]
    fn test_matmul() {
        let ops = CpuOps;
        let a = data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        let b = data(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], (3, 2));
        let c = ops.matmul(&a, &b).unwrap();
        assert_eq!(c.dims(), &[2, 2]);
        assert_eq!(c.to_f64_vec().unwrap(), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_through_transposed_view() {
        let ops = CpuOps;
        let a = data(&[1.0, 2.0, 3.0, 4.0], (2, 2));
        let at = a.transpose(0, 1).unwrap();
        let c = ops.matmul(&at, &a).unwrap();
        // [[1,3],[2,4]] @ [[1,2],[3,4]]
        assert_eq!(c.to_f64_vec().unwrap(), vec![10.0, 14.0, 14.0, 20.0]);
    }

    #[test]
    fn test_reduce() {
        let ops = CpuOps;
        let a = data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        let s = ops.reduce(ReduceOp::Sum, &a, &[1], false).unwrap();
        assert_eq!(s.dims(), &[2]);
        assert_eq!(s.to_f64_vec().unwrap(), vec![6.0, 15.0]);
        let m = ops.reduce(ReduceOp::Mean, &a, &[0], true).unwrap();
        assert_eq!(m.dims(), &[1, 3]);
        assert_eq!(m.to_f64_vec().unwrap(), vec![2.5, 3.5, 4.5]);
        let mx = ops.reduce(ReduceOp::Max, &a, &[], false).unwrap();
        assert_eq!(mx.rank(), 0);
        assert_eq!(mx.to_f64_vec().unwrap(), vec![6.0]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let ops = CpuOps;
        let a = data(&[1.0, 2.0, 3.0, 1000.0, 1000.0, 1000.0], (2, 3));
        let s = ops.softmax(&a, 1).unwrap().to_f64_vec().unwrap();
        assert_close(&s[3..], &[1.0 / 3.0; 3], 1e-6);
        assert!((s[..3].iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!(s[2] > s[1] && s[1] > s[0]);
        assert!(ops.softmax(&a, 2).is_err());
    }

    #[test]
    fn test_conv2d_identity_kernel() {
        let ops = CpuOps;
        let x = data(&(0..9).map(|i| i as f64).collect::<Vec<_>>(), (1, 1, 3, 3));
        let mut k = vec![0.0; 9];
        k[4] = 1.0;
        let w = data(&k, (1, 1, 3, 3));
        let bias = data(&[0.5], 1);
        let y = ops.conv2d(&x, &w, Some(&bias), 1, 1).unwrap();
        assert_eq!(y.dims(), &[1, 1, 3, 3]);
        let expected: Vec<f64> = (0..9).map(|i| i as f64 + 0.5).collect();
        assert_eq!(y.to_f64_vec().unwrap(), expected);
    }

    #[test]
    fn test_kernels_read_views() {
        let ops = CpuOps;
        let a = data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (3, 2));
        let rows = a.slice(&[SliceSpec::range(1, 3)]).unwrap();
        let r = ops.unary(UnaryOp::Neg, &rows).unwrap();
        assert_eq!(r.to_f64_vec().unwrap(), vec![-3.0, -4.0, -5.0, -6.0]);
        assert_eq!(a.get(&[1, 0]).unwrap(), 3.0);
    }

    #[test]
    fn test_full_validates() {
        let ops = CpuOps;
        let t = ops.full(&Shape::from((2, 2)), 1.0, DType::Ternary).unwrap();
        assert_eq!(t.to_f64_vec().unwrap(), vec![1.0; 4]);
        assert!(ops.full(&Shape::from(2), 2.0, DType::Ternary).is_err());
    }
}
