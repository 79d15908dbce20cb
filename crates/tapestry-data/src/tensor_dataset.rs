// TensorDataset — in-memory rows taken from a pair of tensors
//
// The leading axis of both tensors indexes samples; whatever follows is the
// per-sample shape. Rows are copied out once at construction, so splitting
// and shuffling only move rows around and never touch the source tensors.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use tapestry_core::{DType, Error, Result, Shape, Tensor, TensorData, TensorOps};

use crate::dataset::Dataset;
use crate::loader::{Batches, DataLoader, DataLoaderConfig};

/// One side of a dataset (features or targets): flat rows plus how to
/// rebuild a tensor from them.
#[derive(Debug, Clone)]
struct Rows {
    rows: Vec<Vec<f64>>,
    sample_shape: Shape,
    dtype: DType,
    ops: Arc<dyn TensorOps>,
}

impl Rows {
    fn from_tensor(t: &Tensor) -> Result<Self> {
        let Some((&n, rest)) = t.dims().split_first() else {
            return Err(Error::msg(format!(
                "TensorDataset: tensors need a leading sample axis, got shape {}",
                t.shape()
            )));
        };
        let values = t.to_f64_vec()?;
        let width = rest.iter().product::<usize>();
        let rows = if width == 0 {
            vec![Vec::new(); n]
        } else {
            values.chunks(width).map(<[f64]>::to_vec).collect()
        };
        Ok(Rows {
            rows,
            sample_shape: Shape::from(rest),
            dtype: t.dtype(),
            ops: Arc::clone(t.ops()),
        })
    }

    fn select(&self, order: &[usize]) -> Self {
        Rows {
            rows: order.iter().map(|&i| self.rows[i].clone()).collect(),
            sample_shape: self.sample_shape.clone(),
            dtype: self.dtype,
            ops: Arc::clone(&self.ops),
        }
    }

    fn sample(&self, index: usize) -> Result<Tensor> {
        let row = self.rows.get(index).ok_or_else(|| Error::IndexOutOfBounds {
            index,
            axis: 0,
            bound: self.rows.len(),
            shape: Shape::from(vec![self.rows.len()]),
        })?;
        let data = TensorData::from_f64_slice(row, self.sample_shape.clone(), self.dtype)?;
        Ok(Tensor::new(data, Arc::clone(&self.ops)))
    }
}

#[derive(Debug, Clone)]
pub struct TensorDataset {
    x: Rows,
    y: Rows,
}

impl TensorDataset {
    /// Pair `x` and `y` row by row. Both must have the same leading size.
    pub fn new(x: &Tensor, y: &Tensor) -> Result<Self> {
        let (x, y) = (Rows::from_tensor(x)?, Rows::from_tensor(y)?);
        if x.rows.len() != y.rows.len() {
            return Err(Error::msg(format!(
                "TensorDataset: {} inputs but {} targets",
                x.rows.len(),
                y.rows.len()
            )));
        }
        Ok(TensorDataset { x, y })
    }

    pub fn feature_shape(&self) -> &Shape {
        &self.x.sample_shape
    }

    pub fn target_shape(&self) -> &Shape {
        &self.y.sample_shape
    }

    /// First `round(len * ratio)` samples and the rest, order preserved.
    /// Shuffle first for a random split.
    pub fn split(&self, ratio: f64) -> Result<(TensorDataset, TensorDataset)> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Error::msg(format!(
                "TensorDataset::split: ratio must be in [0, 1], got {ratio}"
            )));
        }
        let n = self.len();
        let cut = ((n as f64 * ratio).round() as usize).min(n);
        let (head, tail): (Vec<usize>, Vec<usize>) = ((0..cut).collect(), (cut..n).collect());
        Ok((self.select(&head), self.select(&tail)))
    }

    /// Same samples in a permuted order. Equal seeds give equal orders.
    pub fn shuffle(&self, seed: u64) -> TensorDataset {
        let mut order: Vec<usize> = (0..self.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);
        self.select(&order)
    }

    /// Consecutive batches of `batch_size` samples; the last one may be
    /// smaller.
    pub fn batches(&self, batch_size: usize) -> Result<Batches<'_>> {
        let config = DataLoaderConfig::default()
            .batch_size(batch_size)
            .shuffle(false);
        Ok(DataLoader::new(self, config)?.iter_batches())
    }

    fn select(&self, order: &[usize]) -> TensorDataset {
        TensorDataset {
            x: self.x.select(order),
            y: self.y.select(order),
        }
    }
}

impl Dataset for TensorDataset {
    fn len(&self) -> usize {
        self.x.rows.len()
    }

    fn get_x(&self, index: usize) -> Result<Tensor> {
        self.x.sample(index)
    }

    fn get_y(&self, index: usize) -> Result<Tensor> {
        self.y.sample(index)
    }

    fn name(&self) -> &str {
        "tensor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapestry_core::ExecutionContext;

    fn toy(n: usize) -> TensorDataset {
        let ctx = ExecutionContext::cpu();
        let xs: Vec<f64> = (0..n).flat_map(|i| [i as f64, 2.0 * i as f64]).collect();
        let ys: Vec<f64> = (0..n).map(|i| (i % 3) as f64).collect();
        TensorDataset::new(
            &ctx.tensor(&xs, (n, 2)).unwrap(),
            &ctx.tensor(&ys, n).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_rows_and_shapes() {
        let ds = toy(4);
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.feature_shape().dims(), &[2]);
        assert_eq!(ds.target_shape().dims(), &[] as &[usize]);
        assert_eq!(ds.get_x(3).unwrap().to_f64_vec().unwrap(), vec![3.0, 6.0]);
        assert_eq!(ds.get_y(2).unwrap().to_scalar().unwrap(), 2.0);
        assert!(ds.get_x(4).is_err());
    }

    #[test]
    fn test_mismatched_lengths() {
        let ctx = ExecutionContext::cpu();
        let x = ctx.zeros((3, 2), DType::F32).unwrap();
        let y = ctx.zeros(2, DType::F32).unwrap();
        assert!(TensorDataset::new(&x, &y).is_err());
        let scalar = ctx.scalar(1.0).unwrap();
        assert!(TensorDataset::new(&scalar, &scalar).is_err());
    }

    #[test]
    fn test_split() {
        let ds = toy(10);
        let (train, test) = ds.split(0.8).unwrap();
        assert_eq!((train.len(), test.len()), (8, 2));
        assert_eq!(test.get_x(0).unwrap().to_f64_vec().unwrap(), vec![8.0, 16.0]);
        let (all, none) = ds.split(1.0).unwrap();
        assert_eq!((all.len(), none.len()), (10, 0));
        assert!(ds.split(1.5).is_err());
    }

    #[test]
    fn test_shuffle_is_seeded_permutation() {
        let ds = toy(20);
        let firsts = |d: &TensorDataset| -> Vec<f64> {
            (0..d.len())
                .map(|i| d.get_x(i).unwrap().to_f64_vec().unwrap()[0])
                .collect()
        };
        let a = firsts(&ds.shuffle(42));
        let b = firsts(&ds.shuffle(42));
        assert_eq!(a, b);
        assert_ne!(a, firsts(&ds));
        let mut sorted = a.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted, firsts(&ds));
        // features and targets move together
        let shuffled = ds.shuffle(7);
        for i in 0..shuffled.len() {
            let x0 = shuffled.get_x(i).unwrap().to_f64_vec().unwrap()[0];
            let y = shuffled.get_y(i).unwrap().to_scalar().unwrap();
            assert_eq!(y, (x0 as usize % 3) as f64);
        }
    }
}
