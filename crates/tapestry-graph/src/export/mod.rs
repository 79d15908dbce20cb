//! Text renderings of a [`ComputeGraph`](crate::graph::ComputeGraph).
//!
//! - [`to_dot`] — Graphviz, for looking at a graph
//! - [`to_stablehlo`] — a StableHLO-flavoured MLIR listing of the supported
//!   subset, for reading only (it is not meant to be re-imported)
//!
//! Both walk nodes and edges in insertion order, so the same graph always
//! renders to the same text.

mod dot;
mod stablehlo;

pub use dot::{to_dot, DotOptions, RankDir};
pub use stablehlo::{to_stablehlo, StableHloOptions};
