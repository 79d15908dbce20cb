// Network DSL — declarative construction of feed-forward networks
//
//   let net = network("mlp")
//       .input(4)
//       .dense(8)
//       .relu()
//       .dense(3)
//       .softmax()
//       .build(&ctx)?;
//
// The builder only records layer descriptions. build() walks them in order,
// threading the running feature width through each step, so every dense
// layer learns its input size from whatever precedes it. All layers are
// created from the given context, which makes a seeded context produce the
// same network every time.
//
// Problems in the description (no input width, a zero-width layer, layers
// declared before input) are reported by build(), never during chaining.

use log::debug;
use tapestry_core::{Error, ExecutionContext, Result, Tensor};
use tapestry_graph::Session;

use crate::{LayerNorm, Linear, Module, ReLU, Sequential, Sigmoid, Softmax, Tanh};

#[derive(Debug, Clone, PartialEq)]
enum LayerSpec {
    Dense { units: usize, bias: bool },
    LayerNorm { eps: f64 },
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

/// Start describing a network called `name`.
pub fn network(name: impl Into<String>) -> NetworkBuilder {
    NetworkBuilder {
        name: name.into(),
        input: None,
        layers: Vec::new(),
        errors: Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    name: String,
    input: Option<usize>,
    layers: Vec<LayerSpec>,
    errors: Vec<String>,
}

impl NetworkBuilder {
    /// Width of the feature axis the network accepts. Must come first.
    pub fn input(mut self, width: usize) -> Self {
        if self.input.is_some() {
            self.errors.push("input declared more than once".into());
        } else if !self.layers.is_empty() {
            self.errors
                .push("input must be declared before any layer".into());
        }
        self.input = Some(width);
        self
    }

    /// Fully-connected layer with bias.
    pub fn dense(self, units: usize) -> Self {
        self.push(LayerSpec::Dense { units, bias: true })
    }

    pub fn dense_no_bias(self, units: usize) -> Self {
        self.push(LayerSpec::Dense { units, bias: false })
    }

    pub fn layer_norm(self) -> Self {
        self.push(LayerSpec::LayerNorm {
            eps: LayerNorm::DEFAULT_EPS,
        })
    }

    pub fn relu(self) -> Self {
        self.push(LayerSpec::Relu)
    }

    pub fn sigmoid(self) -> Self {
        self.push(LayerSpec::Sigmoid)
    }

    pub fn tanh(self) -> Self {
        self.push(LayerSpec::Tanh)
    }

    /// Softmax over the feature axis.
    pub fn softmax(self) -> Self {
        self.push(LayerSpec::Softmax)
    }

    fn push(mut self, layer: LayerSpec) -> Self {
        if self.input.is_none() && self.layers.is_empty() {
            self.errors
                .push(format!("{layer:?} declared before input"));
        }
        self.layers.push(layer);
        self
    }

    /// Instantiate every layer from `ctx`.
    pub fn build(self, ctx: &ExecutionContext) -> Result<Network> {
        if !self.errors.is_empty() {
            return Err(Error::msg(format!(
                "network '{}': {}",
                self.name,
                self.errors.join("; ")
            )));
        }
        let Some(input_width) = self.input else {
            return Err(Error::msg(format!(
                "network '{}': missing input width",
                self.name
            )));
        };
        if input_width == 0 {
            return Err(Error::msg(format!(
                "network '{}': input width must be positive",
                self.name
            )));
        }

        let mut body = Sequential::new().with_name(self.name.clone());
        let mut width = input_width;
        for (i, layer) in self.layers.iter().enumerate() {
            match *layer {
                LayerSpec::Dense { units, bias } => {
                    let linear = Linear::new(ctx, width, units, bias)
                        .map_err(|e| Error::msg(format!("network '{}' layer {i}: {e}", self.name)))?
                        .with_name(format!("dense_{i}"));
                    body.push(Box::new(linear));
                    width = units;
                }
                LayerSpec::LayerNorm { eps } => {
                    body.push(Box::new(LayerNorm::with_eps(ctx, width, eps)?))
                }
                LayerSpec::Relu => body.push(Box::new(ReLU)),
                LayerSpec::Sigmoid => body.push(Box::new(Sigmoid)),
                LayerSpec::Tanh => body.push(Box::new(Tanh)),
                LayerSpec::Softmax => body.push(Box::new(Softmax::new())),
            }
        }
        debug!(
            "built network '{}': {} layers, {} -> {}",
            self.name,
            body.len(),
            input_width,
            width
        );
        Ok(Network {
            name: self.name,
            input_width,
            output_width: width,
            body,
        })
    }
}

/// A network produced by the DSL.
#[derive(Debug)]
pub struct Network {
    name: String,
    input_width: usize,
    output_width: usize,
    body: Sequential,
}

impl Network {
    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn output_width(&self) -> usize {
        self.output_width
    }

    pub fn layers(&self) -> &Sequential {
        &self.body
    }
}

impl Module for Network {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, session: &mut Session, x: &Tensor) -> Result<Tensor> {
        match x.dims().last() {
            Some(&w) if w == self.input_width => self.body.forward(session, x),
            _ => Err(Error::msg(format!(
                "network '{}' expects {} input features, got shape {}",
                self.name,
                self.input_width,
                x.shape()
            ))),
        }
    }

    fn children(&self) -> Vec<&dyn Module> {
        self.body.children()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tapestry_core::{ContextConfig, CpuOps};

    fn seeded() -> ExecutionContext {
        ExecutionContext::new(Arc::new(CpuOps), ContextConfig::default().with_seed(42))
    }

    #[test]
    fn test_mlp() {
        let _ = env_logger::builder().is_test(true).try_init();
        let ctx = seeded();
        let net = network("mlp")
            .input(4)
            .dense(8)
            .relu()
            .dense(3)
            .softmax()
            .build(&ctx)
            .unwrap();
        assert_eq!(net.name(), "mlp");
        assert_eq!((net.input_width(), net.output_width()), (4, 3));
        assert_eq!(net.layers().len(), 4);
        // 4*8 + 8 + 8*3 + 3
        assert_eq!(net.num_parameters(), 67);

        let x = ctx.rand_uniform((5, 4), -1.0, 1.0).unwrap();
        let mut session = Session::new(ctx);
        let y = net.forward(&mut session, &x).unwrap();
        assert_eq!(y.dims(), &[5, 3]);
        for row in y.to_f64_vec().unwrap().chunks(3) {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-5);
        }

        let wrong = session.context().zeros((5, 3), x.dtype()).unwrap();
        assert!(net.forward(&mut session, &wrong).is_err());
    }

    #[test]
    fn test_seeded_builds_match() {
        let build = || {
            network("n")
                .input(2)
                .dense(2)
                .tanh()
                .layer_norm()
                .build(&seeded())
                .unwrap()
        };
        let (a, b) = (build(), build());
        let names: Vec<_> = a.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["0.weight", "0.bias", "2.gamma", "2.beta"]);
        for (pa, pb) in a.parameters().iter().zip(b.parameters().iter()) {
            assert_eq!(pa.to_f64_vec().unwrap(), pb.to_f64_vec().unwrap());
        }
    }

    #[test]
    fn test_invalid_descriptions() {
        let ctx = ExecutionContext::cpu();
        assert!(network("a").dense(3).input(2).build(&ctx).is_err());
        assert!(network("b").dense(3).build(&ctx).is_err());
        assert!(network("c").input(0).build(&ctx).is_err());
        assert!(network("d").input(2).input(3).build(&ctx).is_err());
        let err = network("e").input(2).dense(0).build(&ctx).unwrap_err();
        assert!(err.to_string().contains("layer 0"), "{err}");
        assert!(network("f").input(2).sigmoid().dense_no_bias(1).build(&ctx).is_ok());
    }
}
