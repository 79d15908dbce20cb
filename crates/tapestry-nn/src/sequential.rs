// Sequential — modules applied one after another
//
//   let model = Sequential::new()
//       .add(Linear::new(&ctx, 4, 8, true)?)
//       .add(ReLU)
//       .add(Linear::new(&ctx, 8, 3, true)?);
//
//   let y = model.forward(&mut session, &x)?;
//
// Sequential is itself a Module, so it nests.

use tapestry_core::{Result, Tensor};
use tapestry_graph::Session;

use crate::module::Module;

#[derive(Debug)]
pub struct Sequential {
    name: String,
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    pub fn new() -> Self {
        Sequential {
            name: "sequential".into(),
            layers: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a layer. Returns self for chaining.
    #[allow(clippy::should_implement_trait)]
    pub fn add<M: Module + 'static>(mut self, module: M) -> Self {
        self.layers.push(Box::new(module));
        self
    }

    pub fn push(&mut self, module: Box<dyn Module>) {
        self.layers.push(module);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Sequential {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, session: &mut Session, x: &Tensor) -> Result<Tensor> {
        let mut out = x.clone();
        for layer in &self.layers {
            out = layer.forward(session, &out)?;
        }
        Ok(out)
    }

    fn children(&self) -> Vec<&dyn Module> {
        self.layers.iter().map(|l| l.as_ref()).collect()
    }
}
