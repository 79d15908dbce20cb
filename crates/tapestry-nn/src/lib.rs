//! # tapestry-nn
//!
//! Neural network layers built on tapestry operations.
//!
//! 1. **Module trait** — every layer implements `forward()` through a
//!    [`Session`](tapestry_graph::Session), so forward passes are recorded
//! 2. **Linear** — fully connected: `y = x @ W + b`
//! 3. **Activations** — ReLU, Sigmoid, Tanh, Softmax as modules
//! 4. **LayerNorm** — normalization over the feature axis
//! 5. **Sequential** and the [`network`] DSL — composition

pub mod activation;
pub mod dsl;
pub mod layernorm;
pub mod linear;
pub mod module;
pub mod sequential;

pub use activation::{ReLU, Sigmoid, Softmax, Tanh};
pub use dsl::{network, Network, NetworkBuilder};
pub use layernorm::LayerNorm;
pub use linear::Linear;
pub use module::Module;
pub use sequential::Sequential;
