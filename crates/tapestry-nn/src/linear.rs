// Linear — fully-connected layer: y = x @ W + b
//
// PARAMETER SHAPES:
//
//   weight: [in_features, out_features]
//   bias:   [1, out_features]   broadcast across the batch
//
// The weight is stored input-major so the forward pass is a single matmul
// with no transpose.
//
// WEIGHT INITIALIZATION:
//
// Kaiming uniform, U(-k, k) with k = sqrt(1 / in_features), drawn from the
// context RNG. A seeded context therefore builds identical layers.

use tapestry_core::{Error, ExecutionContext, Result, Tensor};
use tapestry_graph::{ops, Session};

use crate::module::Module;

/// A fully-connected layer.
#[derive(Debug, Clone)]
pub struct Linear {
    name: String,
    weight: Tensor,
    bias: Option<Tensor>,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// A new layer with Kaiming-uniform weight and bias.
    pub fn new(
        ctx: &ExecutionContext,
        in_features: usize,
        out_features: usize,
        use_bias: bool,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(Error::msg(format!(
                "Linear: feature sizes must be positive, got {in_features} -> {out_features}"
            )));
        }
        let k = (1.0 / in_features as f64).sqrt();
        let weight = ctx.rand_uniform((in_features, out_features), -k, k)?;
        let bias = if use_bias {
            Some(ctx.rand_uniform((1, out_features), -k, k)?)
        } else {
            None
        };
        Ok(Linear {
            name: "linear".into(),
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Build from existing tensors, e.g. weights loaded from bytes.
    pub fn from_tensors(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let [in_features, out_features] = weight.dims() else {
            return Err(Error::msg(format!(
                "Linear weight must be rank 2, got shape {}",
                weight.shape()
            )));
        };
        let (in_features, out_features) = (*in_features, *out_features);
        if let Some(b) = &bias {
            if b.volume() != out_features {
                return Err(Error::msg(format!(
                    "Linear bias must hold {out_features} values, got shape {}",
                    b.shape()
                )));
            }
        }
        let bias = bias.map(|b| b.reshape((1, out_features))).transpose()?;
        Ok(Linear {
            name: "linear".into(),
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }
}

impl Module for Linear {
    fn name(&self) -> &str {
        &self.name
    }

    /// `[batch, in_features] → [batch, out_features]`
    fn forward(&self, session: &mut Session, x: &Tensor) -> Result<Tensor> {
        let y = session.apply(&ops::matmul(), &[x.clone(), self.weight.clone()])?;
        match &self.bias {
            Some(b) => session.apply(&ops::add(), &[y, b.clone()]),
            None => Ok(y),
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![self.weight.clone()];
        params.extend(self.bias.clone());
        params
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut named = vec![("weight".to_string(), self.weight.clone())];
        if let Some(b) = &self.bias {
            named.push(("bias".to_string(), b.clone()));
        }
        named
    }
}
