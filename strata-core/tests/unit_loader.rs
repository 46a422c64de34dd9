//! Unit tests for distributed sampling and batching

use std::collections::HashSet;
use std::sync::Arc;
use strata_core::source::MemorySource;
use strata_core::{
    DataLoader, Dataset, DatasetOptions, DistributedSampler, IndexedDataset, LoaderConfig,
    LocalGroup, Record, TransformRegistry,
};

fn dataset(len: i64) -> Arc<dyn IndexedDataset> {
    let records = (0..len).map(|i| Record::new().with("gt_label", i)).collect();
    let source = MemorySource::new("numbers", vec![], records);
    Arc::new(
        Dataset::new(&source, DatasetOptions::default(), &TransformRegistry::new()).unwrap(),
    )
}

#[test]
fn test_ranks_cover_dataset_each_epoch() {
    let groups = LocalGroup::new(4);
    for epoch in 0..3 {
        let mut seen = HashSet::new();
        for group in &groups {
            let sampler = DistributedSampler::for_group(21, group, true, 11).unwrap();
            let indices = sampler.indices(epoch);
            assert_eq!(indices.len(), sampler.num_samples());
            seen.extend(indices);
        }
        assert_eq!(seen.len(), 21);
    }
}

#[test]
fn test_loader_over_sampler() {
    let data = dataset(10);
    let mut labels = Vec::new();
    for rank in 0..2 {
        let sampler = DistributedSampler::new(data.len(), rank, 2, true, 3).unwrap();
        let config = LoaderConfig {
            batch_size: 2,
            num_workers: 2,
            drop_last: false,
        };
        let loader = DataLoader::with_sampler(data.clone(), &sampler, 0, config).unwrap();
        for batch in loader {
            let batch = batch.unwrap();
            assert!(batch.len() <= 2);
            labels.extend(batch.iter().filter_map(|r| r.int("gt_label")));
        }
    }
    labels.sort_unstable();
    assert_eq!(labels, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_zero_batch_size_rejected() {
    let config = LoaderConfig {
        batch_size: 0,
        ..Default::default()
    };
    assert!(DataLoader::sequential(dataset(3), config).is_err());
}
