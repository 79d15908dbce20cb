//! # tapestry-data
//!
//! The dataset boundary for tapestry.
//!
//! - [`Dataset`] trait — indexed `(x, y)` samples
//! - [`TensorDataset`] — in-memory rows with `split`, `shuffle` and `batches`
//! - [`DataLoader`] — batching and seeded shuffling over any Dataset

pub mod dataset;
pub mod loader;
pub mod tensor_dataset;

pub use dataset::Dataset;
pub use loader::{Batches, DataLoader, DataLoaderConfig};
pub use tensor_dataset::TensorDataset;
