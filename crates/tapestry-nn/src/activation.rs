// Activation modules — parameter-free wrappers around activation operations
//
// They let activations sit in a Sequential next to layers that have
// weights.

use std::sync::Arc;

use tapestry_core::{Result, Tensor};
use tapestry_graph::{ops, Operation, Session};

use crate::module::Module;

/// max(0, x)
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl Module for ReLU {
    fn name(&self) -> &str {
        "relu"
    }

    fn forward(&self, session: &mut Session, x: &Tensor) -> Result<Tensor> {
        session.apply(&ops::relu(), &[x.clone()])
    }
}

/// 1 / (1 + e^(-x))
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Module for Sigmoid {
    fn name(&self) -> &str {
        "sigmoid"
    }

    fn forward(&self, session: &mut Session, x: &Tensor) -> Result<Tensor> {
        session.apply(&ops::sigmoid(), &[x.clone()])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl Module for Tanh {
    fn name(&self) -> &str {
        "tanh"
    }

    fn forward(&self, session: &mut Session, x: &Tensor) -> Result<Tensor> {
        session.apply(&ops::tanh(), &[x.clone()])
    }
}

/// Softmax along one axis, the last one by default.
#[derive(Debug, Clone)]
pub struct Softmax {
    op: Arc<dyn Operation>,
}

impl Softmax {
    pub fn new() -> Self {
        Softmax {
            op: ops::softmax(None),
        }
    }

    pub fn along(axis: usize) -> Self {
        Softmax {
            op: ops::softmax(Some(axis)),
        }
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Softmax {
    fn name(&self) -> &str {
        "softmax"
    }

    fn forward(&self, session: &mut Session, x: &Tensor) -> Result<Tensor> {
        session.apply(&self.op, &[x.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapestry_core::ExecutionContext;

    #[test]
    fn test_activations() {
        let ctx = ExecutionContext::cpu();
        let x = ctx.tensor(&[-1.0, 0.0, 2.0, 1.0], (2, 2)).unwrap();
        let mut session = Session::new(ctx);

        let y = ReLU.forward(&mut session, &x).unwrap();
        assert_eq!(y.to_f64_vec().unwrap(), vec![0.0, 0.0, 2.0, 1.0]);
        let y = Sigmoid.forward(&mut session, &x).unwrap();
        assert!((y.to_f64_vec().unwrap()[1] - 0.5).abs() < 1e-6);
        let y = Tanh.forward(&mut session, &x).unwrap();
        assert!(y.to_f64_vec().unwrap()[1].abs() < 1e-6);

        let rows = Softmax::new().forward(&mut session, &x).unwrap();
        let sums = rows.sum(&[1], false).unwrap().to_f64_vec().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        let cols = Softmax::along(0).forward(&mut session, &x).unwrap();
        let sums = cols.sum(&[0], false).unwrap().to_f64_vec().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        assert_eq!(ReLU.num_parameters(), 0);
    }
}
