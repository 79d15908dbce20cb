// LayerNorm — normalization over the last axis
//
//   y = (x - mean(x)) / sqrt(var(x) + eps) * gamma + beta
//
// mean and var are taken over the last axis of each row; gamma and beta have
// one entry per feature and broadcast over the leading axes. Every step is
// an operation executed through the Session, so the whole normalization is
// recorded and differentiable.

use tapestry_core::{Error, ExecutionContext, Result, Tensor};
use tapestry_graph::{ops, Session};

use crate::module::Module;

#[derive(Debug, Clone)]
pub struct LayerNorm {
    /// Scale, initialised to ones: [features]
    gamma: Tensor,
    /// Shift, initialised to zeros: [features]
    beta: Tensor,
    eps: Tensor,
    features: usize,
}

impl LayerNorm {
    pub const DEFAULT_EPS: f64 = 1e-5;

    pub fn new(ctx: &ExecutionContext, features: usize) -> Result<Self> {
        Self::with_eps(ctx, features, Self::DEFAULT_EPS)
    }

    pub fn with_eps(ctx: &ExecutionContext, features: usize, eps: f64) -> Result<Self> {
        let dtype = ctx.default_dtype();
        Ok(LayerNorm {
            gamma: ctx.ones(features, dtype)?,
            beta: ctx.zeros(features, dtype)?,
            eps: ctx.full(1, eps, dtype)?,
            features,
        })
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn gamma(&self) -> &Tensor {
        &self.gamma
    }

    pub fn beta(&self) -> &Tensor {
        &self.beta
    }
}

impl Module for LayerNorm {
    fn name(&self) -> &str {
        "layer_norm"
    }

    fn forward(&self, session: &mut Session, x: &Tensor) -> Result<Tensor> {
        let Some(last) = x.rank().checked_sub(1) else {
            return Err(Error::msg("LayerNorm: input must have at least 1 dimension"));
        };
        if x.dims()[last] != self.features {
            return Err(Error::msg(format!(
                "LayerNorm: expected {} features on the last axis, got shape {}",
                self.features,
                x.shape()
            )));
        }
        let mean = ops::mean(&[last], true);
        let mu = session.apply(&mean, &[x.clone()])?;
        let centered = session.apply(&ops::subtract(), &[x.clone(), mu])?;
        let sq = session.apply(&ops::multiply(), &[centered.clone(), centered.clone()])?;
        let var = session.apply(&mean, &[sq])?;
        let shifted = session.apply(&ops::add(), &[var, self.eps.clone()])?;
        let std = session.apply(&ops::sqrt(), &[shifted])?;
        let norm = session.apply(&ops::divide(), &[centered, std])?;
        let scaled = session.apply(&ops::multiply(), &[norm, self.gamma.clone()])?;
        session.apply(&ops::add(), &[scaled, self.beta.clone()])
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.gamma.clone(), self.beta.clone()]
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![
            ("gamma".to_string(), self.gamma.clone()),
            ("beta".to_string(), self.beta.clone()),
        ]
    }
}
