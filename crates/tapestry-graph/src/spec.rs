use std::fmt;

use tapestry_core::{DType, Shape, Tensor, TensorId};

/// Lightweight description of a tensor: what flows along a graph edge
/// before (or instead of) any data existing.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
    pub requires_grad: bool,
    /// The concrete tensor this spec was taken from, if any.
    pub tensor: Option<TensorId>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, shape: impl Into<Shape>, dtype: DType) -> Self {
        TensorSpec {
            name: name.into(),
            shape: shape.into(),
            dtype,
            requires_grad: false,
            tensor: None,
        }
    }

    /// Describe an existing tensor.
    pub fn of(name: impl Into<String>, tensor: &Tensor) -> Self {
        TensorSpec {
            name: name.into(),
            shape: tensor.shape().clone(),
            dtype: tensor.dtype(),
            requires_grad: false,
            tensor: Some(tensor.id()),
        }
    }

    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    pub fn with_tensor(mut self, id: TensorId) -> Self {
        self.tensor = Some(id);
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Same shape and dtype. Names and tensor links are ignored.
    pub fn is_compatible_with(&self, other: &TensorSpec) -> bool {
        self.shape == other.shape && self.dtype == other.dtype
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.name, self.dtype, self.shape)
    }
}
