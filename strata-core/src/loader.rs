//! Batching loader
//!
//! Groups transformed samples into batches. Samples the pipeline vetoes are
//! skipped and the batch is filled from the following indices, so every batch
//! except possibly the last is full.

use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;
use tracing::debug;

use crate::dataset::IndexedDataset;
use crate::error::{Result, StrataError};
use crate::record::Record;
use crate::sampler::DistributedSampler;

/// Loader settings
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Samples per batch
    pub batch_size: usize,
    /// Threads preparing samples; 0 prepares them on the caller's thread
    pub num_workers: usize,
    /// Drop a trailing batch smaller than `batch_size`
    pub drop_last: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            num_workers: 0,
            drop_last: false,
        }
    }
}

/// Iterator of batches over an indexed dataset
pub struct DataLoader {
    dataset: Arc<dyn IndexedDataset>,
    indices: Vec<usize>,
    cursor: usize,
    config: LoaderConfig,
    pool: Option<ThreadPool>,
    skipped: usize,
    failed: bool,
}

impl DataLoader {
    /// Loader visiting `indices` in order
    pub fn new(
        dataset: Arc<dyn IndexedDataset>,
        indices: Vec<usize>,
        config: LoaderConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(StrataError::InvalidConfig {
                reason: "batch_size must be positive".into(),
            });
        }
        let pool = if config.num_workers > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.num_workers)
                    .thread_name(|i| format!("strata-loader-{}", i))
                    .build()
                    .map_err(|e| StrataError::Internal {
                        message: format!("Failed to build loader thread pool: {}", e),
                    })?,
            )
        } else {
            None
        };
        Ok(Self {
            dataset,
            indices,
            cursor: 0,
            config,
            pool,
            skipped: 0,
            failed: false,
        })
    }

    /// Every index in order
    pub fn sequential(dataset: Arc<dyn IndexedDataset>, config: LoaderConfig) -> Result<Self> {
        let indices = (0..dataset.len()).collect();
        Self::new(dataset, indices, config)
    }

    /// This rank's share of `epoch` as chosen by `sampler`
    pub fn with_sampler(
        dataset: Arc<dyn IndexedDataset>,
        sampler: &DistributedSampler,
        epoch: u64,
        config: LoaderConfig,
    ) -> Result<Self> {
        Self::new(dataset, sampler.indices(epoch), config)
    }

    /// Samples vetoed so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn prepare(&self, indices: &[usize]) -> Result<Vec<Option<Record>>> {
        let dataset = &self.dataset;
        match &self.pool {
            Some(pool) => pool.install(|| indices.par_iter().map(|&i| dataset.get(i)).collect()),
            None => indices.iter().map(|&i| dataset.get(i)).collect(),
        }
    }

    fn next_batch(&mut self) -> Result<Option<Vec<Record>>> {
        let mut batch = Vec::with_capacity(self.config.batch_size);

        while batch.len() < self.config.batch_size && self.cursor < self.indices.len() {
            let want = self.config.batch_size - batch.len();
            let end = (self.cursor + want).min(self.indices.len());
            let chunk = self.indices[self.cursor..end].to_vec();
            self.cursor = end;

            for (index, sample) in chunk.iter().zip(self.prepare(&chunk)?) {
                match sample {
                    Some(record) => batch.push(record),
                    None => {
                        self.skipped += 1;
                        debug!("Skipping vetoed sample {}", index);
                    }
                }
            }
        }

        if batch.is_empty() || (self.config.drop_last && batch.len() < self.config.batch_size) {
            return Ok(None);
        }
        Ok(Some(batch))
    }
}

impl Iterator for DataLoader {
    type Item = Result<Vec<Record>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_batch() {
            Ok(batch) => batch.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ClassTable, Dataset};
    use crate::pipeline::{from_fn, Pipeline};

    fn odd_vetoed(len: i64) -> Arc<dyn IndexedDataset> {
        let records = (0..len).map(|i| Record::new().with("gt_label", i)).collect();
        let pipeline = Pipeline::from_stages(vec![from_fn("drop-odd", |r: Record| {
            (r.int("gt_label")? % 2 == 0).then_some(r)
        })]);
        Arc::new(Dataset::from_parts("odd", records, ClassTable::default(), pipeline))
    }

    fn labels(batch: &[Record]) -> Vec<i64> {
        batch.iter().filter_map(|r| r.int("gt_label")).collect()
    }

    #[test]
    fn test_skips_vetoed_and_refills() {
        let config = LoaderConfig {
            batch_size: 2,
            ..Default::default()
        };
        let mut loader = DataLoader::sequential(odd_vetoed(7), config).unwrap();

        assert_eq!(labels(&loader.next().unwrap().unwrap()), vec![0, 2]);
        assert_eq!(labels(&loader.next().unwrap().unwrap()), vec![4, 6]);
        assert!(loader.next().is_none());
        assert_eq!(loader.skipped(), 3);
    }

    #[test]
    fn test_parallel_preserves_order() {
        let config = LoaderConfig {
            batch_size: 3,
            num_workers: 2,
            drop_last: true,
        };
        let loader = DataLoader::sequential(odd_vetoed(14), config).unwrap();
        let batches: Vec<Vec<i64>> = loader.map(|b| labels(&b.unwrap())).collect();
        assert_eq!(batches, vec![vec![0, 2, 4], vec![6, 8, 10]]);
    }

    #[test]
    fn test_error_ends_iteration() {
        let loader = DataLoader::new(
            odd_vetoed(2),
            vec![0, 9],
            LoaderConfig {
                batch_size: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let results: Vec<_> = loader.collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
