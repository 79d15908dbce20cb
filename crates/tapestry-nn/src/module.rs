// Module trait — the interface every layer implements
//
// A Module owns its parameter tensors and describes its forward pass in
// terms of operations executed through a Session. Going through the Session
// (instead of calling Tensor methods directly) is what makes a forward pass
// visible to whatever tapes are recording: an ExecutionTape sees the
// operations, a GradientTape can differentiate them.
//
// Composite modules expose their sub-modules through children(); the default
// parameters() and named_parameters() walk that tree, so only leaf modules
// need to list tensors themselves.

use std::fmt;

use tapestry_core::{Result, Tensor};
use tapestry_graph::Session;

/// A layer or a composition of layers.
pub trait Module: fmt::Debug {
    /// Short name, used in parameter paths.
    fn name(&self) -> &str;

    /// Compute the output for `x`, executing every operation through
    /// `session`.
    fn forward(&self, session: &mut Session, x: &Tensor) -> Result<Tensor>;

    /// Direct sub-modules, in forward order.
    fn children(&self) -> Vec<&dyn Module> {
        Vec::new()
    }

    /// Every trainable tensor of this module and its children.
    fn parameters(&self) -> Vec<Tensor> {
        self.children()
            .into_iter()
            .flat_map(|c| c.parameters())
            .collect()
    }

    /// Parameters with dotted paths such as `0.weight`.
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.children()
            .into_iter()
            .enumerate()
            .flat_map(|(i, c)| {
                c.named_parameters()
                    .into_iter()
                    .map(move |(k, v)| (format!("{i}.{k}"), v))
            })
            .collect()
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.volume()).sum()
    }
}
