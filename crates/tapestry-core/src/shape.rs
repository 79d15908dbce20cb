use std::fmt;

use crate::error::{Error, Result};

// Shape — immutable dimension vector
//
// A Shape describes the extent of each axis of a tensor:
//   - Scalar: Shape([])          — rank 0, volume 1
//   - Vector: Shape([5])         — rank 1, volume 5
//   - Matrix: Shape([3, 4])      — rank 2, volume 12
//
// Shapes are values. Every constructor copies its input, so a caller that
// keeps mutating its own Vec or array afterwards cannot change a Shape that
// was already built from it. Equality and hashing are structural.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a shape from dimension sizes.
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Shape(dims.into())
    }

    /// The scalar shape (rank 0).
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. The empty (scalar) shape has volume 1.
    pub fn volume(&self) -> usize {
        self.0.iter().product()
    }

    /// Size of axis `d`.
    pub fn dim(&self, d: usize) -> Result<usize> {
        self.0.get(d).copied().ok_or(Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// Row-major (C-order) strides.
    ///
    /// For shape [2, 3, 4] the strides are [12, 4, 1]: the last axis is
    /// contiguous and each earlier axis jumps over the product of the
    /// axes after it.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// Row-major flat offset of `indices`.
    ///
    /// Fails if the number of indices differs from the rank, or if any index
    /// is outside its axis. Never clamps or wraps.
    pub fn index(&self, indices: &[usize]) -> Result<usize> {
        if indices.len() != self.rank() {
            return Err(Error::RankMismatch {
                expected: self.rank(),
                got: indices.len(),
            });
        }
        let mut flat = 0usize;
        for (axis, (&idx, &bound)) in indices.iter().zip(&self.0).enumerate() {
            if idx >= bound {
                return Err(Error::IndexOutOfBounds {
                    index: idx,
                    axis,
                    bound,
                    shape: self.clone(),
                });
            }
            flat = flat * bound + idx;
        }
        Ok(flat)
    }

    /// Inverse of [`Shape::index`] for an in-range flat offset.
    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        let mut out = vec![0usize; self.rank()];
        for axis in (0..self.rank()).rev() {
            let d = self.0[axis];
            if d > 0 {
                out[axis] = flat % d;
                flat /= d;
            }
        }
        out
    }

    // Broadcasting

    /// Compute the broadcast shape of two shapes (NumPy rules).
    ///
    /// Shapes are aligned from the right; two sizes are compatible if they are
    /// equal or one of them is 1; missing leading axes count as 1.
    ///
    ///   [3, 4] and [4]       → [3, 4]
    ///   [2, 1] and [1, 3]    → [2, 3]
    ///   [3] and [4]          → Error
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };

            if ld == rd || rd == 1 {
                result.push(ld);
            } else if ld == 1 {
                result.push(rd);
            } else {
                return Err(Error::msg(format!(
                    "shapes {} and {} are not broadcast-compatible \
                     (axis {} from the right: {} vs {})",
                    lhs, rhs, i, ld, rd
                )));
            }
        }

        result.reverse();
        Ok(Shape(result))
    }

    /// Strides that read `self` as if it had the (broadcast) `target` shape.
    /// Broadcast axes get stride 0.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let self_dims = self.dims();
        let target_dims = target.dims();
        let self_strides = self.strides();

        let mut result = vec![0usize; target_dims.len()];
        let offset = target_dims.len() - self_dims.len();
        for i in 0..self_dims.len() {
            if self_dims[i] == target_dims[i + offset] {
                result[i + offset] = self_strides[i];
            }
        }
        result
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// These let you write Shape::from((3, 4)) instead of Shape::new(vec![3, 4]).

impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Shape::scalar()
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize,)> for Shape {
    fn from((d0,): (usize,)) -> Self {
        Shape(vec![d0])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(a: [usize; N]) -> Self {
        Shape(a.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(s: &Shape) -> Self {
        s.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.volume(), 1);
        assert_eq!(s.strides(), Vec::<usize>::new());
        assert_eq!(s.index(&[]).unwrap(), 0);
    }

    #[test]
    fn test_zero_sized_axis() {
        let s = Shape::from((3, 0));
        assert_eq!(s.volume(), 0);
    }

    #[test]
    fn test_rank_one_conversions_agree() {
        let from_tuple = Shape::from((4,));
        assert_eq!(from_tuple, Shape::from(4));
        assert_eq!(from_tuple, Shape::from([4]));
        assert_eq!(from_tuple.dims(), &[4]);
    }

    #[test]
    fn test_3d_strides() {
        let s = Shape::from((2, 3, 4));
        assert_eq!(s.strides(), vec![12, 4, 1]);
        assert_eq!(s.volume(), 24);
    }

    #[test]
    fn test_shape_owns_its_dims() {
        let mut dims = vec![2, 3];
        let s = Shape::from(dims.as_slice());
        dims[0] = 99;
        assert_eq!(s.dims(), &[2, 3]);
    }

    #[test]
    fn test_index_errors_name_index_and_shape() {
        let s = Shape::from((2, 3));
        let err = s.index(&[1, 3]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("index 3"), "{msg}");
        assert!(msg.contains("[2, 3]"), "{msg}");
        assert!(matches!(
            s.index(&[1]),
            Err(Error::RankMismatch {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_structural_equality() {
        let a = Shape::new(vec![4, 5]);
        let b = Shape::from((4, 5));
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert_ne!(Shape::from((5, 4)), b);
    }

    #[test]
    fn test_broadcast_shape() {
        let a = Shape::from((5, 3, 1));
        let b = Shape::from((3, 4));
        assert_eq!(Shape::broadcast_shape(&a, &b).unwrap().dims(), &[5, 3, 4]);
        assert!(Shape::broadcast_shape(&Shape::from(3), &Shape::from(4)).is_err());
    }

    #[test]
    fn test_unravel_inverts_index() {
        let s = Shape::from((2, 3, 4));
        assert_eq!(s.unravel(23), vec![1, 2, 3]);
        assert_eq!(s.index(&[1, 2, 3]).unwrap(), 23);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::from((3, 4))), "[3, 4]");
    }

    proptest! {
        #[test]
        fn prop_volume_and_rank(dims in prop::collection::vec(0usize..=6, 0..=4)) {
            let s = Shape::from(dims.as_slice());
            prop_assert_eq!(s.volume(), dims.iter().product::<usize>());
            prop_assert_eq!(s.rank(), dims.len());
        }

        #[test]
        fn prop_index_is_injective_and_in_range(dims in prop::collection::vec(1usize..=4, 1..=4)) {
            let s = Shape::from(dims.as_slice());
            let mut seen = HashSet::new();
            for flat in 0..s.volume() {
                let idx = s.unravel(flat);
                let off = s.index(&idx).unwrap();
                prop_assert!(off < s.volume());
                prop_assert!(seen.insert(off));
            }
            prop_assert_eq!(seen.len(), s.volume());
        }
    }
}
