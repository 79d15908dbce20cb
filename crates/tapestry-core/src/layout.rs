use crate::error::{Error, Result};
use crate::shape::Shape;

// Layout — how a logical shape maps onto a flat buffer
//
// A Layout is shape + strides + offset. It decouples the *logical* tensor
// from how the elements sit in the buffer, which is what makes transpose and
// slicing free: they produce a new Layout over the same buffer.
//
//   flat = offset + Σ index[i] * stride[i]
//
// Slicing is described per axis by a SliceSpec:
//
//   All                 — axis passes through unchanged
//   Range(start,end,s)  — axis shrinks to ceil((end - start) / s) elements,
//                         stride becomes parent_stride * s
//   Index(i)            — axis disappears, contributes i * parent_stride
//                         to the offset
//
// Axes without a descriptor (trailing ones) behave as All.

/// Per-axis slice descriptor used to build views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceSpec {
    /// Keep the whole axis.
    All,
    /// Half-open range `start..end` walked with `step` (>= 1).
    Range {
        start: usize,
        end: usize,
        step: usize,
    },
    /// Select a single position; the axis is removed.
    Index(usize),
}

impl SliceSpec {
    /// `start..end` with step 1.
    pub fn range(start: usize, end: usize) -> Self {
        SliceSpec::Range {
            start,
            end,
            step: 1,
        }
    }

    /// `start..end` with an explicit step.
    pub fn range_step(start: usize, end: usize, step: usize) -> Self {
        SliceSpec::Range { start, end, step }
    }
}

/// Layout describes how a tensor's logical shape maps to flat storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
    /// Position of element [0, 0, ...] inside the buffer.
    offset: usize,
}

impl Layout {
    /// Contiguous row-major layout, offset 0.
    pub fn contiguous(shape: Shape) -> Self {
        let strides = shape.strides();
        Layout {
            shape,
            strides,
            offset: 0,
        }
    }

    /// Layout with explicit strides and offset (for views).
    pub fn new(shape: Shape, strides: Vec<usize>, offset: usize) -> Self {
        Layout {
            shape,
            strides,
            offset,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn volume(&self) -> usize {
        self.shape.volume()
    }

    /// Row-major with no gaps and offset 0.
    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.strides == self.shape.strides()
    }

    /// One past the largest buffer position this layout can address
    /// (0 for an empty layout).
    pub fn extent(&self) -> usize {
        if self.volume() == 0 {
            return 0;
        }
        let last: usize = self
            .dims()
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s)
            .sum();
        self.offset + last + 1
    }

    /// Buffer position of `indices`, with rank and per-axis bounds checks.
    pub fn flat_index(&self, indices: &[usize]) -> Result<usize> {
        if indices.len() != self.rank() {
            return Err(Error::RankMismatch {
                expected: self.rank(),
                got: indices.len(),
            });
        }
        let mut flat = self.offset;
        for (axis, (&idx, &bound)) in indices.iter().zip(self.dims()).enumerate() {
            if idx >= bound {
                return Err(Error::IndexOutOfBounds {
                    index: idx,
                    axis,
                    bound,
                    shape: self.shape.clone(),
                });
            }
            flat += idx * self.strides[axis];
        }
        Ok(flat)
    }

    /// Swap two axes. No data moves.
    ///
    /// [2, 3, 4] transpose(0, 2) → [4, 3, 2], strides [12, 4, 1] → [1, 4, 12]
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Layout> {
        let rank = self.rank();
        if dim0 >= rank || dim1 >= rank {
            return Err(Error::DimOutOfRange {
                dim: dim0.max(dim1),
                rank,
            });
        }
        let mut new_dims = self.shape.dims().to_vec();
        let mut new_strides = self.strides.clone();
        new_dims.swap(dim0, dim1);
        new_strides.swap(dim0, dim1);
        Ok(Layout::new(Shape::new(new_dims), new_strides, self.offset))
    }

    /// Derive a view layout from per-axis slice descriptors.
    pub fn slice(&self, specs: &[SliceSpec]) -> Result<Layout> {
        if specs.len() > self.rank() {
            return Err(Error::RankMismatch {
                expected: self.rank(),
                got: specs.len(),
            });
        }
        let mut dims = Vec::with_capacity(self.rank());
        let mut strides = Vec::with_capacity(self.rank());
        let mut offset = self.offset;

        for axis in 0..self.rank() {
            let size = self.dims()[axis];
            let stride = self.strides[axis];
            match specs.get(axis).copied().unwrap_or(SliceSpec::All) {
                SliceSpec::All => {
                    dims.push(size);
                    strides.push(stride);
                }
                SliceSpec::Range { start, end, step } => {
                    if step == 0 {
                        return Err(Error::InvalidSlice {
                            axis,
                            reason: "step must be at least 1".into(),
                        });
                    }
                    if start > end || end > size {
                        return Err(Error::InvalidSlice {
                            axis,
                            reason: format!("range {start}..{end} outside axis of size {size}"),
                        });
                    }
                    dims.push((end - start).div_ceil(step));
                    strides.push(stride * step);
                    offset += start * stride;
                }
                SliceSpec::Index(i) => {
                    if i >= size {
                        return Err(Error::IndexOutOfBounds {
                            index: i,
                            axis,
                            bound: size,
                            shape: self.shape.clone(),
                        });
                    }
                    offset += i * stride;
                }
            }
        }
        Ok(Layout::new(Shape::new(dims), strides, offset))
    }

    /// Buffer positions of every element, in logical row-major order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }
}

// StridedIter — walks a (possibly non-contiguous) layout in logical order
//
// For a contiguous layout this counts 0, 1, 2, ... For a transposed or
// sliced one it jumps around the buffer following the strides.

/// Iterator that yields buffer positions for each element of a Layout.
pub struct StridedIter {
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        StridedIter {
            current: vec![0; layout.rank()],
            dims: layout.dims().to_vec(),
            strides: layout.strides().to_vec(),
            offset: layout.offset(),
            remaining: layout.volume(),
            started: false,
        }
    }

    fn buffer_position(&self) -> usize {
        self.current
            .iter()
            .zip(&self.strides)
            .fold(self.offset, |acc, (&i, &s)| acc + i * s)
    }

    /// Advance the multi-index by one, rightmost axis first.
    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.dims[i] {
                return;
            }
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.buffer_position())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_indices() {
        let layout = Layout::contiguous(Shape::from((2, 3)));
        assert!(layout.is_contiguous());
        let indices: Vec<usize> = layout.strided_indices().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(layout.extent(), 6);
    }

    #[test]
    fn test_strided_iter_by_ref() {
        let layout = Layout::contiguous(Shape::from((2, 3)))
            .transpose(0, 1)
            .unwrap();
        let mut iter = layout.strided_indices();
        assert_eq!(iter.len(), 6);
        let head: Vec<usize> = iter.by_ref().take(2).collect();
        assert_eq!(head, vec![0, 3]);
        assert_eq!(iter.next(), Some(1));
        assert_eq!(iter.len(), 3);
        assert_eq!(iter.collect::<Vec<_>>(), vec![4, 2, 5]);
    }

    #[test]
    fn test_transpose_indices() {
        // [[0, 1, 2],
        //  [3, 4, 5]] read column-major
        let layout = Layout::contiguous(Shape::from((2, 3)));
        let transposed = layout.transpose(0, 1).unwrap();
        assert_eq!(transposed.dims(), &[3, 2]);
        assert_eq!(transposed.strides(), &[1, 3]);
        assert!(!transposed.is_contiguous());
        let indices: Vec<usize> = transposed.strided_indices().collect();
        assert_eq!(indices, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_slice_range_with_step() {
        // [4, 6]: rows 1..4 step 2 → rows 1 and 3; cols 2..5 → 3 cols
        let layout = Layout::contiguous(Shape::from((4, 6)));
        let view = layout
            .slice(&[SliceSpec::range_step(1, 4, 2), SliceSpec::range(2, 5)])
            .unwrap();
        assert_eq!(view.dims(), &[2, 3]);
        assert_eq!(view.strides(), &[12, 1]);
        assert_eq!(view.offset(), 6 + 2);
        assert_eq!(view.flat_index(&[1, 2]).unwrap(), 8 + 12 + 2);
        assert!(view.extent() <= layout.extent());
    }

    #[test]
    fn test_slice_index_removes_axis() {
        let layout = Layout::contiguous(Shape::from((2, 3, 4)));
        let view = layout.slice(&[SliceSpec::All, SliceSpec::Index(2)]).unwrap();
        assert_eq!(view.dims(), &[2, 4]);
        assert_eq!(view.strides(), &[12, 1]);
        assert_eq!(view.offset(), 8);
    }

    #[test]
    fn test_slice_rejects_bad_specs() {
        let layout = Layout::contiguous(Shape::from((4, 6)));
        assert!(layout.slice(&[SliceSpec::range(2, 5)]).is_err());
        assert!(layout.slice(&[SliceSpec::range_step(0, 2, 0)]).is_err());
        assert!(layout.slice(&[SliceSpec::Index(4)]).is_err());
        assert!(layout
            .slice(&[SliceSpec::All, SliceSpec::All, SliceSpec::All])
            .is_err());
    }

    #[test]
    fn test_flat_index_bounds() {
        let layout = Layout::contiguous(Shape::from((2, 3, 4)));
        assert_eq!(layout.flat_index(&[1, 2, 3]).unwrap(), 23);
        let err = layout.flat_index(&[0, 3, 0]).unwrap_err();
        assert!(matches!(
            err,
            Error::IndexOutOfBounds {
                index: 3,
                axis: 1,
                bound: 3,
                ..
            }
        ));
    }
}
