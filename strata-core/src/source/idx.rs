//! IDX-backed dataset sources (MNIST family)
//!
//! Loading first synchronizes the local copy across ranks: rank 0 alone
//! downloads missing files, every rank then meets at the barrier, and only
//! afterwards are the files checked and decoded.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use super::manifest::{
    ResourceManifest, IDX_RESOURCE_KEYS, TEST_IMAGE_FILE, TEST_LABEL_FILE, TRAIN_IMAGE_FILE,
    TRAIN_LABEL_FILE,
};
use super::RecordSource;
use crate::dist::ProcessGroup;
use crate::error::{Result, StrataError};
use crate::fetch::ArchiveFetcher;
use crate::idx::{read_idx_file, DType, Tensor};
use crate::metrics::standard;
use crate::record::Record;

/// Which half of the dataset to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Split {
    #[default]
    Train,
    Test,
}

impl Split {
    pub fn from_test_mode(test_mode: bool) -> Self {
        if test_mode {
            Split::Test
        } else {
            Split::Train
        }
    }

    fn keys(&self) -> (&'static str, &'static str) {
        match self {
            Split::Train => (TRAIN_IMAGE_FILE, TRAIN_LABEL_FILE),
            Split::Test => (TEST_IMAGE_FILE, TEST_LABEL_FILE),
        }
    }
}

/// Image/label IDX file pair with rank-aware download
#[derive(Debug, Clone)]
pub struct IdxSource {
    manifest: ResourceManifest,
    root: PathBuf,
    split: Split,
    group: Arc<dyn ProcessGroup>,
    fetcher: Arc<dyn ArchiveFetcher>,
}

impl IdxSource {
    pub fn new(
        manifest: ResourceManifest,
        root: impl Into<PathBuf>,
        split: Split,
        group: Arc<dyn ProcessGroup>,
        fetcher: Arc<dyn ArchiveFetcher>,
    ) -> Result<Self> {
        manifest.validate()?;
        Ok(Self {
            manifest,
            root: root.into(),
            split,
            group,
            fetcher,
        })
    }

    pub fn mnist(
        root: impl Into<PathBuf>,
        split: Split,
        group: Arc<dyn ProcessGroup>,
        fetcher: Arc<dyn ArchiveFetcher>,
    ) -> Result<Self> {
        Self::new(ResourceManifest::mnist(), root, split, group, fetcher)
    }

    pub fn fashion_mnist(
        root: impl Into<PathBuf>,
        split: Split,
        group: Arc<dyn ProcessGroup>,
        fetcher: Arc<dyn ArchiveFetcher>,
    ) -> Result<Self> {
        Self::new(ResourceManifest::fashion_mnist(), root, split, group, fetcher)
    }

    pub fn manifest(&self) -> &ResourceManifest {
        &self.manifest
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn split(&self) -> Split {
        self.split
    }

    /// Unpacked paths of all four files, both splits included
    pub fn required_files(&self) -> Result<Vec<PathBuf>> {
        IDX_RESOURCE_KEYS
            .iter()
            .map(|key| self.manifest.local_path(&self.root, key))
            .collect()
    }

    /// Make the local copy present on every rank
    ///
    /// Only rank 0 fetches. A rank-0 fetch error is held until after the
    /// barrier so the other ranks are released before it is reported.
    pub fn synchronize(&self) -> Result<()> {
        let files = self.required_files()?;
        let (rank, world_size) = self.group.rank_and_world_size();

        let mut fetched = Ok(());
        if rank == 0 && files.iter().any(|path| !path.exists()) {
            info!(
                "Fetching {} into {} from {}",
                self.manifest.name,
                self.root.display(),
                self.manifest.url_prefix
            );
            fetched = self.fetch_all();
            if let Err(e) = &fetched {
                error!("Fetch of {} failed on rank 0: {}", self.manifest.name, e);
            }
        }

        if world_size > 1 {
            debug!("Rank {}/{} waiting at fetch barrier", rank, world_size);
            self.group.barrier()?;
        }
        fetched?;

        if let Some(missing) = files.iter().find(|path| !path.exists()) {
            return Err(StrataError::MissingData {
                path: missing.clone(),
                location: self.manifest.url_prefix.clone(),
            });
        }
        Ok(())
    }

    fn fetch_all(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        for resource in &self.manifest.resources {
            let url = self.manifest.url(resource);
            self.fetcher
                .fetch_and_verify(&url, &self.root, &resource.checksum)?;
        }
        Ok(())
    }
}

impl RecordSource for IdxSource {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn default_classes(&self) -> Vec<String> {
        self.manifest.classes.clone()
    }

    fn load(&self) -> Result<Vec<Record>> {
        self.synchronize()?;

        let (image_key, label_key) = self.split.keys();
        let start = Instant::now();
        let images = read_image_file(&self.manifest.local_path(&self.root, image_key)?)?;
        let labels = read_label_file(&self.manifest.local_path(&self.root, label_key)?)?;
        let records = records_from_tensors(&images, &labels)?;
        let elapsed = start.elapsed();

        standard::DECODE_DURATION.observe(elapsed.as_secs_f64());
        standard::RECORDS_DECODED.inc_by(records.len() as u64);
        info!(
            "Decoded {} {:?} records of {} in {:?}",
            records.len(),
            self.split,
            self.manifest.name,
            elapsed
        );
        Ok(records)
    }
}

fn expect_layout(tensor: &Tensor, ndim: usize, what: &str, path: &Path) -> Result<()> {
    if tensor.dtype() != DType::U8 || tensor.ndim() != ndim {
        return Err(StrataError::format(format!(
            "{} file {} must be a {}-d uint8 tensor, got {}-d {}",
            what,
            path.display(),
            ndim,
            tensor.ndim(),
            tensor.dtype()
        )));
    }
    Ok(())
}

/// Decode an image file: `uint8`, `[count, height, width]`
pub fn read_image_file(path: &Path) -> Result<Tensor> {
    let tensor = read_idx_file(path, false)?;
    expect_layout(&tensor, 3, "Image", path)?;
    Ok(tensor)
}

/// Decode a label file: `uint8`, `[count]`
pub fn read_label_file(path: &Path) -> Result<Tensor> {
    let tensor = read_idx_file(path, false)?;
    expect_layout(&tensor, 1, "Label", path)?;
    Ok(tensor)
}

/// Pair images with labels by position into `{img, gt_label}` records
pub fn records_from_tensors(images: &Tensor, labels: &Tensor) -> Result<Vec<Record>> {
    let count = images.shape().first().copied().unwrap_or(0);
    if labels.numel() != count {
        return Err(StrataError::format(format!(
            "{} images but {} labels",
            count,
            labels.numel()
        )));
    }

    images
        .unstack()?
        .into_iter()
        .enumerate()
        .map(|(i, img)| {
            let label = labels
                .value_f64(i)
                .ok_or(StrataError::IndexOutOfBounds { index: i, len: count })?;
            Ok(Record::new()
                .with(crate::IMAGE_KEY, img)
                .with(crate::dataset::LABEL_KEY, label as i64))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_from_tensors() {
        let images = Tensor::from_u8(vec![2, 2, 2], vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let labels = Tensor::from_u8(vec![2], vec![7, 3]).unwrap();

        let records = records_from_tensors(&images, &labels).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].int("gt_label"), Some(3));
        let img = records[1].tensor("img").unwrap();
        assert_eq!(img.shape(), &[2, 2]);
        assert_eq!(img.value_f64(0), Some(5.0));
    }

    #[test]
    fn test_count_mismatch() {
        let images = Tensor::from_u8(vec![2, 1, 1], vec![1, 2]).unwrap();
        let labels = Tensor::from_u8(vec![3], vec![0, 1, 2]).unwrap();
        assert!(matches!(
            records_from_tensors(&images, &labels),
            Err(StrataError::Format { .. })
        ));
    }

    #[test]
    fn test_split_keys() {
        assert_eq!(Split::from_test_mode(true).keys().0, TEST_IMAGE_FILE);
        assert_eq!(Split::default().keys().1, TRAIN_LABEL_FILE);
    }
}
