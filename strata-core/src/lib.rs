//! Strata Core - Dataset loading for training jobs
//!
//! This crate provides:
//! - IDX binary decoding into typed tensors
//! - Registries of dataset sources and transform stages
//! - Short-circuiting transform pipelines built from configuration
//! - Rank-0 dataset fetch with checksum verification and a cross-rank barrier
//! - Indexed datasets, distributed sampling and batching

pub mod builder;
pub mod config;
pub mod dataset;
pub mod dist;
pub mod error;
pub mod fetch;
pub mod idx;
pub mod jsonl;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod runtime;
pub mod sampler;
pub mod source;
pub mod split;
pub mod wrappers;

pub use builder::{build_dataset, BuildContext, DatasetRegistry};
pub use config::{DataConfig, DatasetConfig};
pub use dataset::{ClassTable, Dataset, DatasetOptions, IndexedDataset};
pub use dist::{EnvGroup, LocalGroup, ProcessGroup, SingleProcess};
pub use error::{Result, StrataError};
pub use fetch::{ArchiveFetcher, Checksum, HttpArchiveFetcher};
pub use idx::Tensor;
pub use loader::{DataLoader, LoaderConfig};
pub use pipeline::{Pipeline, Stage, TransformRegistry};
pub use record::{Record, Value};
pub use sampler::DistributedSampler;
pub use source::{IdxSource, RecordSource};

/// Key under which decoded images are stored in a record
pub const IMAGE_KEY: &str = "img";

/// Directory name, under the data root, used for file barriers
pub const BARRIER_DIR: &str = ".strata-barrier";
