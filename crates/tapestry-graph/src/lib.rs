//! # tapestry-graph
//!
//! Operations and the machinery that records, replays and differentiates
//! them.
//!
//! - [`Operation`] — a named computation with validation, shape inference,
//!   execution and a backward rule; built-ins live in [`ops`]
//! - [`OperationRegistry`] — name → factory lookup
//! - [`ExecutionTape`] / [`TapeStack`] — linear history of executed operations
//! - [`ComputeGraph`] — node/edge DAG, topological order, validation; see
//!   [`export`] for DOT and StableHLO text
//! - [`GradientTape`] — reverse-mode gradients over a recorded tape
//! - [`Session`] — validates, executes and records operations

pub mod export;
pub mod gradient;
pub mod graph;
pub mod operation;
pub mod ops;
pub mod registry;
pub mod session;
pub mod spec;
pub mod tape;

pub use export::{to_dot, to_stablehlo, DotOptions, RankDir, StableHloOptions};
pub use gradient::{GradientMap, GradientTape};
pub use graph::{ComputeGraph, GraphEdge, GraphNode};
pub use operation::{OpType, Operation, ParamValue, Parameters, ValidationResult};
pub use registry::{OperationFactory, OperationRegistry};
pub use session::Session;
pub use spec::TensorSpec;
pub use tape::{ExecutionTape, RecordedOperation, Tape, TapeStack, TapeState};
