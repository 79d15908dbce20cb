// Dataset trait — unified interface for any data source
//
// A dataset is an indexed collection of (x, y) pairs. Each accessor returns
// the single sample at `index` without a batch axis; the loader stacks
// samples into batches.

use tapestry_core::{Result, Tensor};

pub trait Dataset {
    /// Total number of samples in the dataset.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Input features of sample `index`.
    fn get_x(&self, index: usize) -> Result<Tensor>;

    /// Target of sample `index`.
    fn get_y(&self, index: usize) -> Result<Tensor>;

    /// Optional human-readable name.
    fn name(&self) -> &str {
        "dataset"
    }
}
