//! # Tapestry
//!
//! Tensors, operations, tapes and compute graphs for scripting neural
//! networks.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use tapestry::prelude::*;
//!
//! # fn main() -> tapestry::Result<()> {
//! let ctx = ExecutionContext::cpu();
//! let net = network("mlp").input(4).dense(8).relu().dense(3).build(&ctx)?;
//! let x = ctx.ones((2, 4), ctx.default_dtype())?;
//!
//! let mut session = Session::new(ctx);
//! let (tape, y) = session.record_with(ExecutionTape::recording(), |s| net.forward(s, &x))?;
//! assert_eq!(y.dims(), &[2, 3]);
//!
//! let graph = tape.to_compute_graph()?;
//! println!("{}", to_dot(&graph, &DotOptions::default()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `tapestry-core` | Shape, DType, TensorData, TensorOps backends, Tensor, ExecutionContext |
//! | `tapestry-graph` | Operations, registry, tapes, compute graphs, export, gradients, Session |
//! | `tapestry-nn` | Module trait, Linear, activations, LayerNorm, Sequential, network DSL |
//! | `tapestry-data` | Dataset trait, TensorDataset, DataLoader |

/// Re-export core types.
pub use tapestry_core::{
    bail, Backing, BinaryOp, ContextConfig, CpuOps, DType, Element, Error, ExecutionContext,
    Layout, MockOps, ReduceOp, Result, Shape, SliceSpec, Storage, Tensor, TensorData, TensorId,
    TensorOps, UnaryOp, VoidOps,
};

/// Operations, tapes, graphs and gradients.
pub mod graph {
    pub use tapestry_graph::*;
}

/// Re-export neural network modules.
pub mod nn {
    pub use tapestry_nn::*;
}

/// Re-export the dataset boundary.
pub mod data {
    pub use tapestry_data::*;
}

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::data::{DataLoader, DataLoaderConfig, Dataset, TensorDataset};
    pub use crate::graph::{
        ops, to_dot, to_stablehlo, ComputeGraph, DotOptions, ExecutionTape, GradientMap,
        GradientTape, Operation, OperationRegistry, Parameters, RankDir, Session,
        StableHloOptions, Tape, TapeStack, TensorSpec, ValidationResult,
    };
    pub use crate::nn::{
        network, LayerNorm, Linear, Module, Network, ReLU, Sequential, Sigmoid, Softmax, Tanh,
    };
    pub use crate::{ContextConfig, DType, ExecutionContext, Shape, SliceSpec, Tensor};
}
