// DataLoader — batching, shuffling, iteration

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{thread_rng, SeedableRng};

use log::trace;
use tapestry_core::{Error, Result, Shape, Tensor, TensorData};

use crate::dataset::Dataset;

/// Configuration for the DataLoader.
#[derive(Debug, Clone)]
pub struct DataLoaderConfig {
    /// Number of samples per batch.
    pub batch_size: usize,
    /// Whether to shuffle indices each epoch.
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch.
    pub drop_last: bool,
    /// Optional random seed for reproducible shuffling.
    pub seed: Option<u64>,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            seed: None,
        }
    }
}

impl DataLoaderConfig {
    pub fn batch_size(mut self, bs: usize) -> Self {
        self.batch_size = bs;
        self
    }

    pub fn shuffle(mut self, s: bool) -> Self {
        self.shuffle = s;
        self
    }

    pub fn drop_last(mut self, d: bool) -> Self {
        self.drop_last = d;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = Some(s);
        self
    }
}

/// Wraps a Dataset and produces `(x, y)` batches with a leading batch axis.
pub struct DataLoader<'a> {
    dataset: &'a dyn Dataset,
    config: DataLoaderConfig,
    indices: Vec<usize>,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a dyn Dataset, config: DataLoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::msg("DataLoader: batch_size must be positive"));
        }
        Ok(Self {
            dataset,
            config,
            indices: (0..dataset.len()).collect(),
        })
    }

    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    /// The number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        if self.config.drop_last {
            self.dataset.len() / self.config.batch_size
        } else {
            self.dataset.len().div_ceil(self.config.batch_size)
        }
    }

    /// Reshuffle indices (call at the start of each epoch).
    pub fn reshuffle(&mut self) {
        if self.config.shuffle {
            match self.config.seed {
                Some(seed) => self.indices.shuffle(&mut StdRng::seed_from_u64(seed)),
                None => self.indices.shuffle(&mut thread_rng()),
            }
        }
    }

    /// Iterate over one epoch, one batch at a time.
    pub fn iter_batches(mut self) -> Batches<'a> {
        self.reshuffle();
        Batches {
            loader: self,
            batch_idx: 0,
        }
    }

    fn batch(&self, indices: &[usize]) -> Result<(Tensor, Tensor)> {
        let xs = indices
            .iter()
            .map(|&i| self.dataset.get_x(i))
            .collect::<Result<Vec<_>>>()?;
        let ys = indices
            .iter()
            .map(|&i| self.dataset.get_y(i))
            .collect::<Result<Vec<_>>>()?;
        Ok((stack(&xs)?, stack(&ys)?))
    }
}

/// Stack same-shaped samples along a new leading axis.
fn stack(samples: &[Tensor]) -> Result<Tensor> {
    let Some(first) = samples.first() else {
        return Err(Error::msg("DataLoader: cannot stack an empty batch"));
    };
    let mut values = Vec::with_capacity(samples.len() * first.volume());
    for s in samples {
        if s.shape() != first.shape() {
            return Err(Error::ShapeMismatch {
                expected: first.shape().clone(),
                got: s.shape().clone(),
            });
        }
        values.extend(s.to_f64_vec()?);
    }
    let mut dims = vec![samples.len()];
    dims.extend_from_slice(first.dims());
    let data = TensorData::from_f64_slice(&values, Shape::from(dims), first.dtype())?;
    Ok(Tensor::new(data, first.ops().clone()))
}

/// Iterator that yields one `(x, y)` batch at a time.
pub struct Batches<'a> {
    loader: DataLoader<'a>,
    batch_idx: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<(Tensor, Tensor)>;

    fn next(&mut self) -> Option<Self::Item> {
        let bs = self.loader.config.batch_size;
        let n = self.loader.dataset.len();
        let start = self.batch_idx * bs;

        if start >= n {
            return None;
        }
        if self.loader.config.drop_last && start + bs > n {
            return None;
        }

        let end = (start + bs).min(n);
        self.batch_idx += 1;
        trace!("batch {} covers samples {start}..{end}", self.batch_idx - 1);
        Some(self.loader.batch(&self.loader.indices[start..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TensorDataset;
    use tapestry_core::ExecutionContext;

    fn toy(n: usize) -> TensorDataset {
        let ctx = ExecutionContext::cpu();
        let xs: Vec<f64> = (0..n * 3).map(|v| v as f64).collect();
        let ys: Vec<f64> = (0..n).map(|v| v as f64).collect();
        TensorDataset::new(
            &ctx.tensor(&xs, (n, 3)).unwrap(),
            &ctx.tensor(&ys, (n, 1)).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_last_partial_batch_kept() {
        let ds = toy(10);
        let batches: Vec<_> = ds.batches(4).unwrap().map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].0.dims(), &[4, 3]);
        assert_eq!(batches[0].1.dims(), &[4, 1]);
        assert_eq!(batches[2].0.dims(), &[2, 3]);
        assert_eq!(batches[2].1.to_f64_vec().unwrap(), vec![8.0, 9.0]);
        assert!(ds.batches(0).is_err());
    }

    #[test]
    fn test_drop_last_and_count() {
        let ds = toy(10);
        let config = DataLoaderConfig::default().batch_size(4).drop_last(true).seed(1);
        let loader = DataLoader::new(&ds, config).unwrap();
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.iter_batches().count(), 2);
    }

    #[test]
    fn test_seeded_shuffle_covers_every_sample() {
        let ds = toy(9);
        let run = || -> Vec<f64> {
            let config = DataLoaderConfig::default().batch_size(2).seed(5);
            DataLoader::new(&ds, config)
                .unwrap()
                .iter_batches()
                .flat_map(|b| b.unwrap().1.to_f64_vec().unwrap())
                .collect()
        };
        let (a, b) = (run(), run());
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted, (0..9).map(|v| v as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_stack_rejects_mixed_shapes() {
        let ctx = ExecutionContext::cpu();
        let a = ctx.zeros(2, ctx.default_dtype()).unwrap();
        let b = ctx.zeros(3, ctx.default_dtype()).unwrap();
        assert!(stack(&[a, b]).is_err());
        assert!(stack(&[]).is_err());
    }
}
