//! # tapestry-core
//!
//! Tensor primitives for tapestry.
//!
//! This crate provides:
//! - [`Shape`] / [`Layout`] / [`SliceSpec`] — shape, strides, views
//! - [`DType`] — the closed set of element kinds (fp32, fp16, int32, int8, int4, ternary)
//! - [`TensorData`] — dense, view and packed element containers
//! - [`TensorOps`] — the numeric capability set, with [`CpuOps`], [`VoidOps`] and [`MockOps`]
//! - [`Tensor`] — data bound to a compute binding
//! - [`ExecutionContext`] — explicit source of bindings and tensor constructors

pub mod backend;
pub mod context;
pub mod cpu;
pub mod data;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod mock;
pub mod shape;
pub mod storage;
pub mod tensor;
pub mod void;

pub use backend::{BinaryOp, ReduceOp, TensorOps, UnaryOp};
pub use context::{ContextConfig, ExecutionContext};
pub use cpu::CpuOps;
pub use data::{Backing, TensorData};
pub use dtype::{DType, Element};
pub use error::{Error, Result};
pub use layout::{Layout, SliceSpec};
pub use mock::MockOps;
pub use shape::Shape;
pub use storage::Storage;
pub use tensor::{Tensor, TensorId};
pub use void::VoidOps;
