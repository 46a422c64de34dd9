//! Dataset wrappers
//!
//! Concatenation and repetition of indexed datasets.

use std::sync::Arc;

use crate::dataset::{ClassTable, IndexedDataset};
use crate::error::{Result, StrataError};
use crate::record::Record;

/// Several datasets end to end; class table taken from the first
pub struct ConcatDataset {
    datasets: Vec<Arc<dyn IndexedDataset>>,
    cumulative_sizes: Vec<usize>,
}

impl ConcatDataset {
    pub fn new(datasets: Vec<Arc<dyn IndexedDataset>>) -> Result<Self> {
        if datasets.is_empty() {
            return Err(StrataError::InvalidConfig {
                reason: "ConcatDataset needs at least one dataset".into(),
            });
        }
        let cumulative_sizes = datasets
            .iter()
            .scan(0, |total, ds| {
                *total += ds.len();
                Some(*total)
            })
            .collect();
        Ok(Self {
            datasets,
            cumulative_sizes,
        })
    }

    /// `(dataset, local index)` for a global index
    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        let which = self.cumulative_sizes.partition_point(|&end| end <= index);
        if which >= self.datasets.len() {
            return Err(StrataError::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        let start = if which == 0 {
            0
        } else {
            self.cumulative_sizes[which - 1]
        };
        Ok((which, index - start))
    }
}

impl IndexedDataset for ConcatDataset {
    fn len(&self) -> usize {
        self.cumulative_sizes.last().copied().unwrap_or(0)
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        let (which, local) = self.locate(index)?;
        self.datasets[which].get(local)
    }

    fn labels(&self) -> Result<Vec<i64>> {
        let mut out = Vec::with_capacity(self.len());
        for ds in &self.datasets {
            out.extend(ds.labels()?);
        }
        Ok(out)
    }

    fn classes(&self) -> &ClassTable {
        self.datasets[0].classes()
    }
}

/// One dataset repeated `times` times
pub struct RepeatDataset {
    dataset: Arc<dyn IndexedDataset>,
    times: usize,
}

impl RepeatDataset {
    pub fn new(dataset: Arc<dyn IndexedDataset>, times: usize) -> Self {
        Self { dataset, times }
    }
}

impl IndexedDataset for RepeatDataset {
    fn len(&self) -> usize {
        self.dataset.len() * self.times
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        let len = self.len();
        if index >= len {
            return Err(StrataError::IndexOutOfBounds { index, len });
        }
        self.dataset.get(index % self.dataset.len())
    }

    fn labels(&self) -> Result<Vec<i64>> {
        let once = self.dataset.labels()?;
        Ok(once
            .iter()
            .copied()
            .cycle()
            .take(once.len() * self.times)
            .collect())
    }

    fn classes(&self) -> &ClassTable {
        self.dataset.classes()
    }
}
