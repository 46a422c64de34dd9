//! Unit tests for rank-aware dataset synchronization
//!
//! A fake fetcher writes small IDX files in place of a download, so the
//! rank-0 fetch, barrier and missing-data checks run without a network.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use strata_core::idx::encode;
use strata_core::source::{IdxSource, RecordSource, Split};
use strata_core::{ArchiveFetcher, Checksum, LocalGroup, ProcessGroup, StrataError, Tensor};

#[derive(Debug, Default)]
struct FakeFetcher {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeFetcher {
    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

impl ArchiveFetcher for FakeFetcher {
    fn fetch_and_verify(
        &self,
        url: &str,
        dest_dir: &Path,
        _checksum: &Checksum,
    ) -> strata_core::Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StrataError::Fetch {
                url: url.to_string(),
                reason: "connection refused".into(),
            });
        }

        let name = url.rsplit('/').next().unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(name);
        let tensor = if name.contains("images") {
            Tensor::from_u8(vec![3, 2, 2], (0..12).collect()).unwrap()
        } else {
            Tensor::from_u8(vec![3], vec![7, 1, 4]).unwrap()
        };
        let path = dest_dir.join(name);
        std::fs::write(&path, encode(&tensor).unwrap()).unwrap();
        Ok(path)
    }
}

/// Fixed rank that counts barrier calls instead of blocking
#[derive(Debug)]
struct CountingGroup {
    rank: usize,
    world_size: usize,
    barriers: AtomicUsize,
}

impl CountingGroup {
    fn new(rank: usize, world_size: usize) -> Self {
        Self {
            rank,
            world_size,
            barriers: AtomicUsize::new(0),
        }
    }
}

impl ProcessGroup for CountingGroup {
    fn rank_and_world_size(&self) -> (usize, usize) {
        (self.rank, self.world_size)
    }

    fn barrier(&self) -> strata_core::Result<()> {
        self.barriers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_single_process_fetches_without_barrier() {
    let dir = tempfile::tempdir().unwrap();
    let group = Arc::new(CountingGroup::new(0, 1));
    let fetcher = Arc::new(FakeFetcher::default());
    let source = IdxSource::mnist(dir.path(), Split::Train, group.clone(), fetcher.clone()).unwrap();

    let records = source.load().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].int("gt_label"), Some(7));
    assert_eq!(records[2].tensor("img").unwrap().shape(), &[2, 2]);

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
    assert_eq!(group.barriers.load(Ordering::SeqCst), 0);
}

#[test]
fn test_present_files_are_not_fetched_again() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    let group = Arc::new(CountingGroup::new(0, 1));
    let source = IdxSource::mnist(dir.path(), Split::Test, group, fetcher.clone()).unwrap();

    source.load().unwrap();
    source.load().unwrap();
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_non_main_rank_reports_missing_data() {
    let dir = tempfile::tempdir().unwrap();
    let group = Arc::new(CountingGroup::new(1, 2));
    let fetcher = Arc::new(FakeFetcher::default());
    let source = IdxSource::mnist(dir.path(), Split::Train, group.clone(), fetcher.clone()).unwrap();

    let err = source.load().unwrap_err();
    match err {
        StrataError::MissingData { path, location } => {
            assert!(path.starts_with(dir.path()));
            assert!(location.contains("mnist"));
        }
        other => panic!("expected MissingData, got {:?}", other),
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(group.barriers.load(Ordering::SeqCst), 1);
}

#[test]
fn test_world_of_four_fetches_once() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());

    let handles: Vec<_> = LocalGroup::new(4)
        .into_iter()
        .map(|group| {
            let root = dir.path().to_path_buf();
            let fetcher = fetcher.clone();
            thread::spawn(move || {
                let source =
                    IdxSource::fashion_mnist(root, Split::Train, Arc::new(group), fetcher).unwrap();
                source.load().map(|records| records.len())
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 3);
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_main_rank_failure_releases_others() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::failing());

    let handles: Vec<_> = LocalGroup::new(2)
        .into_iter()
        .map(|group| {
            let root = dir.path().to_path_buf();
            let fetcher = fetcher.clone();
            thread::spawn(move || {
                let rank = group.rank();
                let source = IdxSource::mnist(root, Split::Train, Arc::new(group), fetcher).unwrap();
                (rank, source.load().unwrap_err())
            })
        })
        .collect();

    for handle in handles {
        let (rank, err) = handle.join().unwrap();
        if rank == 0 {
            assert!(matches!(err, StrataError::Fetch { .. }));
        } else {
            assert!(matches!(err, StrataError::MissingData { .. }));
        }
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}
