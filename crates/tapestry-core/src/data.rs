use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::{Layout, SliceSpec};
use crate::shape::Shape;
use crate::storage::Storage;

// TensorData — a Shape bound to a flat element buffer
//
// The buffer lives behind Arc<RwLock<Storage>>. A TensorData created by
// slicing or transposing another one clones the Arc, not the elements, and
// carries its own Layout (shape, strides, offset). Every element access goes
// through
//
//   position = offset + Σ index[i] * stride[i]
//
// so a write through a view lands in the parent's buffer. Nothing is copied
// unless `materialize()` is called.
//
// Cloning a TensorData is shallow: the clone shares the buffer. The public
// tensor operations never write into their operands; `set` is the one
// in-place mutation and is reserved for building data.

/// How a TensorData reaches its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Contiguous, offset 0, canonical strides, byte-aligned elements.
    Dense,
    /// Shares another TensorData's buffer through its own layout.
    View,
    /// Sub-byte elements (I4 / Ternary) packed several per byte.
    Packed,
    /// Shape-only; holds no values.
    Void,
}

/// Indexed multi-dimensional value container.
#[derive(Clone)]
pub struct TensorData {
    storage: Arc<RwLock<Storage>>,
    layout: Layout,
    dtype: DType,
    is_view: bool,
}

impl std::fmt::Debug for TensorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TensorData(shape={}, dtype={}, backing={:?})",
            self.layout.shape(),
            self.dtype,
            self.backing()
        )
    }
}

impl TensorData {
    // Constructors

    /// Wrap a buffer whose length equals the shape's volume.
    pub fn from_storage(storage: Storage, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if storage.len() != shape.volume() {
            return Err(Error::ElementCountMismatch {
                expected: shape.volume(),
                got: storage.len(),
                shape,
            });
        }
        let dtype = storage.dtype();
        Ok(TensorData {
            storage: Arc::new(RwLock::new(storage)),
            layout: Layout::contiguous(shape),
            dtype,
            is_view: false,
        })
    }

    /// Zero-filled data.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        let shape = shape.into();
        let storage = Storage::zeros(dtype, shape.volume());
        TensorData {
            storage: Arc::new(RwLock::new(storage)),
            layout: Layout::contiguous(shape),
            dtype,
            is_view: false,
        }
    }

    /// Shape-only data; reading any element fails with [`Error::VoidData`].
    pub fn void(shape: impl Into<Shape>, dtype: DType) -> Self {
        let shape = shape.into();
        let storage = Storage::void(dtype, shape.volume());
        TensorData {
            storage: Arc::new(RwLock::new(storage)),
            layout: Layout::contiguous(shape),
            dtype,
            is_view: false,
        }
    }

    /// Build from row-major f64 values, validating each against `dtype`.
    pub fn from_f64_slice(data: &[f64], shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.volume() {
            return Err(Error::ElementCountMismatch {
                expected: shape.volume(),
                got: data.len(),
                shape,
            });
        }
        Self::from_storage(Storage::from_f64_checked(dtype, data)?, shape)
    }

    /// Build from kernel output with cast semantics (see
    /// [`Storage::from_f64_cast`]).
    pub(crate) fn from_f64_cast(data: &[f64], shape: Shape, dtype: DType) -> Self {
        let storage = Storage::from_f64_cast(dtype, data);
        TensorData {
            storage: Arc::new(RwLock::new(storage)),
            layout: Layout::contiguous(shape),
            dtype,
            is_view: false,
        }
    }

    fn view_with_layout(&self, layout: Layout) -> Result<Self> {
        let len = self.read_storage()?.len();
        if layout.extent() > len {
            return Err(Error::msg(format!(
                "view addresses up to position {} of a {}-element buffer",
                layout.extent(),
                len
            )));
        }
        Ok(TensorData {
            storage: Arc::clone(&self.storage),
            layout,
            dtype: self.dtype,
            is_view: true,
        })
    }

    // Accessors

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn volume(&self) -> usize {
        self.layout.volume()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn is_view(&self) -> bool {
        self.is_view
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Whether the buffer has no data. A storage never changes variant, so
    /// this still answers through a poisoned lock.
    pub fn is_void(&self) -> bool {
        let storage = self
            .storage
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        storage.is_void()
    }

    pub fn backing(&self) -> Backing {
        if self.is_void() {
            Backing::Void
        } else if self.is_view {
            Backing::View
        } else if self.dtype.is_packed() {
            Backing::Packed
        } else {
            Backing::Dense
        }
    }

    /// Whether both share one underlying buffer.
    pub fn shares_storage_with(&self, other: &TensorData) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub(crate) fn read_storage(&self) -> Result<RwLockReadGuard<'_, Storage>> {
        self.storage
            .read()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    fn write_storage(&self) -> Result<RwLockWriteGuard<'_, Storage>> {
        self.storage
            .write()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    fn void_error(&self) -> Error {
        Error::VoidData {
            shape: self.shape().clone(),
        }
    }

    // Element access

    /// Read the element at `indices`.
    pub fn get(&self, indices: &[usize]) -> Result<f64> {
        let pos = self.layout.flat_index(indices)?;
        let storage = self.read_storage()?;
        if storage.is_void() {
            return Err(self.void_error());
        }
        storage.get(pos)
    }

    /// Write the element at `indices`. Rejects values the dtype cannot hold.
    /// Writes through a view are visible to every TensorData sharing the
    /// buffer.
    pub fn set(&mut self, indices: &[usize], value: f64) -> Result<()> {
        let pos = self.layout.flat_index(indices)?;
        let mut storage = self.write_storage()?;
        if storage.is_void() {
            return Err(self.void_error());
        }
        storage.set(pos, value)
    }

    /// All elements as f64, in logical row-major order.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let storage = self.read_storage()?;
        if storage.is_void() {
            return Err(self.void_error());
        }
        self.layout
            .strided_indices()
            .map(|pos| storage.get(pos))
            .collect()
    }

    // Views

    /// Zero-copy view from per-axis slice descriptors.
    pub fn slice(&self, specs: &[SliceSpec]) -> Result<Self> {
        let layout = self.layout.slice(specs)?;
        self.view_with_layout(layout)
    }

    /// Zero-copy view with two axes swapped.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self> {
        let layout = self.layout.transpose(dim0, dim1)?;
        self.view_with_layout(layout)
    }

    /// Same elements under a new shape. Shares the buffer when the data is
    /// contiguous; otherwise materializes first.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.volume() != self.volume() {
            return Err(Error::ReshapeElementMismatch {
                src: self.volume(),
                dst: shape.volume(),
                dst_shape: shape,
            });
        }
        let base = if self.is_contiguous() {
            self.clone()
        } else {
            self.materialize()?
        };
        base.view_with_layout(Layout::contiguous(shape))
    }

    /// Copy the logical elements into a fresh dense buffer.
    pub fn materialize(&self) -> Result<Self> {
        let storage = self.read_storage()?;
        if storage.is_void() {
            return Ok(TensorData::void(self.shape().clone(), self.dtype));
        }
        let values: Vec<f64> = self
            .layout
            .strided_indices()
            .map(|pos| storage.get(pos))
            .collect::<Result<_>>()?;
        Ok(TensorData::from_f64_cast(
            &values,
            self.shape().clone(),
            self.dtype,
        ))
    }

    // Conversion

    /// Convert to `target`, allowed only along the dtype compatibility table.
    ///
    /// Floats convert to integers by truncation toward zero. A value outside
    /// the target's range is an error, never a silent saturation.
    pub fn to_dtype(&self, target: DType) -> Result<Self> {
        self.dtype.check_convertible_to(target)?;
        if target == self.dtype {
            return self.materialize();
        }
        if self.is_void() {
            return Ok(TensorData::void(self.shape().clone(), target));
        }
        let mut values = self.to_f64_vec()?;
        if !target.is_float() {
            for v in values.iter_mut() {
                *v = v.trunc();
            }
        }
        TensorData::from_f64_slice(&values, self.shape().clone(), target)
    }

    // Byte boundary

    /// Decode little-endian bytes produced by a weight loader.
    ///
    /// F32 / F16 / I32 / I8 are read element by element; I4 and Ternary are
    /// taken as already-packed bytes.
    pub fn from_le_bytes(bytes: &[u8], shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        let n = shape.volume();
        let expected = dtype.storage_bytes(n);
        if bytes.len() != expected {
            return Err(Error::msg(format!(
                "{dtype} data of shape {shape} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let storage = match dtype {
            DType::F32 => Storage::F32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DType::F16 => Storage::F16(
                bytes
                    .chunks_exact(2)
                    .map(|c| half::f16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            DType::I32 => Storage::I32(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DType::I8 => Storage::I8(bytes.iter().map(|&b| b as i8).collect()),
            DType::I4 | DType::Ternary => Storage::from_packed_bytes(dtype, bytes.to_vec(), n)?,
        };
        Self::from_storage(storage, shape)
    }

    /// Encode the logical elements as little-endian bytes (packed kinds as
    /// their packed bytes).
    pub fn to_le_bytes(&self) -> Result<Vec<u8>> {
        let dense = if self.is_contiguous() && !self.is_view {
            self.clone()
        } else {
            self.materialize()?
        };
        let storage = dense.read_storage()?;
        let bytes = match &*storage {
            Storage::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Storage::F16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Storage::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Storage::I8(v) => v.iter().map(|&x| x as u8).collect(),
            Storage::I4 { bytes, .. } | Storage::Ternary { bytes, .. } => bytes.clone(),
            Storage::Void { .. } => return Err(self.void_error()),
        };
        Ok(bytes)
    }
}
