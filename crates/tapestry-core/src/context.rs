use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::TensorOps;
use crate::cpu::CpuOps;
use crate::data::TensorData;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::Tensor;

// ExecutionContext — where tensors get their compute binding
//
// There are no process-wide factories. Whoever creates tensors holds an
// ExecutionContext and asks it for them; the context picks the binding for
// the tensor's dtype (a per-dtype override, else the default binding). A
// tensor without a binding cannot be constructed.
//
// The context also owns the random generator used for parameter
// initialisation, so a seeded context reproduces the same weights.

/// Context configuration.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Dtype used by constructors that don't take one (default: F32).
    pub default_dtype: DType,
    /// Seed for the context RNG. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_dtype: DType::F32,
            seed: None,
        }
    }
}

impl ContextConfig {
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.default_dtype = dtype;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Explicit source of compute bindings and tensor constructors.
pub struct ExecutionContext {
    default_ops: Arc<dyn TensorOps>,
    overrides: HashMap<DType, Arc<dyn TensorOps>>,
    config: ContextConfig,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut overrides: Vec<_> = self
            .overrides
            .iter()
            .map(|(d, ops)| format!("{d}={}", ops.name()))
            .collect();
        overrides.sort();
        f.debug_struct("ExecutionContext")
            .field("default_ops", &self.default_ops.name())
            .field("overrides", &overrides)
            .field("config", &self.config)
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(default_ops: Arc<dyn TensorOps>, config: ContextConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        log::debug!(
            "execution context: ops={}, default dtype={}, seed={:?}",
            default_ops.name(),
            config.default_dtype,
            config.seed
        );
        ExecutionContext {
            default_ops,
            overrides: HashMap::new(),
            config,
            rng: Mutex::new(rng),
        }
    }

    /// CPU binding with the default configuration.
    pub fn cpu() -> Self {
        Self::new(Arc::new(CpuOps), ContextConfig::default())
    }

    /// Use `ops` for tensors of `dtype` instead of the default binding.
    pub fn with_ops_for(mut self, dtype: DType, ops: Arc<dyn TensorOps>) -> Self {
        self.overrides.insert(dtype, ops);
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn default_dtype(&self) -> DType {
        self.config.default_dtype
    }

    /// The binding used for tensors of `dtype`.
    pub fn ops_for(&self, dtype: DType) -> Arc<dyn TensorOps> {
        Arc::clone(self.overrides.get(&dtype).unwrap_or(&self.default_ops))
    }

    // Constructors

    /// Bind existing data to the binding for its dtype.
    pub fn from_data(&self, data: TensorData) -> Tensor {
        let ops = self.ops_for(data.dtype());
        Tensor::new(data, ops)
    }

    pub fn full(&self, shape: impl Into<Shape>, value: f64, dtype: DType) -> Result<Tensor> {
        let shape = shape.into();
        let ops = self.ops_for(dtype);
        let data = ops.full(&shape, value, dtype)?;
        Ok(Tensor::new(data, ops))
    }

    pub fn zeros(&self, shape: impl Into<Shape>, dtype: DType) -> Result<Tensor> {
        self.full(shape, 0.0, dtype)
    }

    pub fn ones(&self, shape: impl Into<Shape>, dtype: DType) -> Result<Tensor> {
        self.full(shape, 1.0, dtype)
    }

    /// Row-major values in the default dtype.
    pub fn tensor(&self, values: &[f64], shape: impl Into<Shape>) -> Result<Tensor> {
        self.tensor_with_dtype(values, shape, self.config.default_dtype)
    }

    pub fn tensor_with_dtype(
        &self,
        values: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
    ) -> Result<Tensor> {
        let data = TensorData::from_f64_slice(values, shape, dtype)?;
        Ok(self.from_data(data))
    }

    /// Rank-0 tensor in the default dtype.
    pub fn scalar(&self, value: f64) -> Result<Tensor> {
        self.tensor(&[value], ())
    }

    /// Uniform values in `[low, high)` drawn from the context RNG, in the
    /// default dtype.
    pub fn rand_uniform(&self, shape: impl Into<Shape>, low: f64, high: f64) -> Result<Tensor> {
        if low >= high {
            return Err(Error::msg(format!(
                "rand_uniform: empty range [{low}, {high})"
            )));
        }
        let shape = shape.into();
        let values: Vec<f64> = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| Error::msg("context rng lock poisoned"))?;
            (0..shape.volume())
                .map(|_| rng.gen_range(low..high))
                .collect()
        };
        self.tensor(&values, shape)
    }

    /// Next raw value from the context RNG (used for shuffling).
    pub fn next_seed(&self) -> Result<u64> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| Error::msg("context rng lock poisoned"))?;
        Ok(rng.gen())
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::cpu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockOps;
    use crate::void::VoidOps;

    #[test]
    fn test_constructors_use_default_dtype() {
        let ctx = ExecutionContext::new(
            Arc::new(CpuOps),
            ContextConfig::default().with_dtype(DType::F16),
        );
        let t = ctx.tensor(&[1.0, 2.0], 2).unwrap();
        assert_eq!(t.dtype(), DType::F16);
        let z = ctx.zeros((2, 2), DType::I8).unwrap();
        assert_eq!(z.to_f64_vec().unwrap(), vec![0.0; 4]);
        assert_eq!(ctx.scalar(3.0).unwrap().rank(), 0);
    }

    #[test]
    fn test_per_dtype_override() {
        let ctx = ExecutionContext::cpu().with_ops_for(DType::I4, Arc::new(VoidOps));
        assert_eq!(ctx.ops_for(DType::F32).name(), "cpu");
        assert_eq!(ctx.ops_for(DType::I4).name(), "void");
        let t = ctx.ones(3, DType::I4).unwrap();
        assert!(t.data().is_void());
    }

    #[test]
    fn test_seeded_rng_reproduces() {
        let cfg = ContextConfig::default().with_seed(42);
        let a = ExecutionContext::new(Arc::new(CpuOps), cfg.clone());
        let b = ExecutionContext::new(Arc::new(CpuOps), cfg);
        let ta = a.rand_uniform((3, 3), -1.0, 1.0).unwrap();
        let tb = b.rand_uniform((3, 3), -1.0, 1.0).unwrap();
        assert_eq!(ta.to_f64_vec().unwrap(), tb.to_f64_vec().unwrap());
        assert!(ta.to_f64_vec().unwrap().iter().all(|v| (-1.0..1.0).contains(v)));
        assert!(a.rand_uniform(2, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_tensors_share_context_binding() {
        let mock = Arc::new(MockOps::default());
        let ctx = ExecutionContext::new(mock.clone(), ContextConfig::default());
        let a = ctx.tensor(&[1.0, 2.0], 2).unwrap();
        let _ = a.add(&a).unwrap().relu().unwrap();
        assert_eq!(mock.calls(), vec!["add", "relu"]);
    }
}
