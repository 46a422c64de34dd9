//! Dataset construction from configuration
//!
//! `DatasetRegistry` maps a dataset kind to a source factory; `build_dataset`
//! turns a `DatasetConfig` into a ready `Dataset`.

use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

use crate::config::DatasetConfig;
use crate::dataset::{ClassesSpec, Dataset, DatasetOptions};
use crate::dist::ProcessGroup;
use crate::error::Result;
use crate::fetch::ArchiveFetcher;
use crate::pipeline::{StageSpec, TransformRegistry};
use crate::registry::Registry;
use crate::source::{IdxSource, RecordSource, ResourceManifest, Split};

/// Collaborators a source may need while loading
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub group: Arc<dyn ProcessGroup>,
    pub fetcher: Arc<dyn ArchiveFetcher>,
}

impl BuildContext {
    pub fn new(group: Arc<dyn ProcessGroup>, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        Self { group, fetcher }
    }
}

/// Builds the record source for one config entry
pub type SourceFactory =
    Arc<dyn Fn(&DatasetConfig, &BuildContext) -> Result<Box<dyn RecordSource>> + Send + Sync>;

/// Name to source-factory map
#[derive(Clone, Debug)]
pub struct DatasetRegistry {
    factories: Registry<SourceFactory>,
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self {
            factories: Registry::new("dataset"),
        }
    }

    /// Registry holding `MNIST` and `FashionMNIST`
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        for (kind, manifest) in [
            ("MNIST", ResourceManifest::mnist as fn() -> ResourceManifest),
            ("FashionMNIST", ResourceManifest::fashion_mnist),
        ] {
            registry.register(kind, move |config, ctx| {
                let source = IdxSource::new(
                    manifest(),
                    config.data_root(),
                    Split::from_test_mode(config.test_mode),
                    ctx.group.clone(),
                    ctx.fetcher.clone(),
                )?;
                Ok(Box::new(source) as Box<dyn RecordSource>)
            })?;
        }
        Ok(registry)
    }

    /// Process-wide registry, populated with the built-ins on first use
    pub fn global() -> Result<&'static RwLock<DatasetRegistry>> {
        static GLOBAL: OnceLock<RwLock<DatasetRegistry>> = OnceLock::new();
        if let Some(global) = GLOBAL.get() {
            return Ok(global);
        }
        let registry = Self::with_builtins()?;
        Ok(GLOBAL.get_or_init(|| RwLock::new(registry)))
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&DatasetConfig, &BuildContext) -> Result<Box<dyn RecordSource>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.register(kind, Arc::new(factory))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys()
    }

    /// Source for a config entry, without loading it
    pub fn source(&self, config: &DatasetConfig, ctx: &BuildContext) -> Result<Box<dyn RecordSource>> {
        let factory = self.factories.get(&config.kind)?;
        factory(config, ctx)
    }
}

/// Resolve and load the dataset a config entry describes
///
/// Kind, class override and pipeline are all validated before the source
/// loads anything.
pub fn build_dataset(
    config: &DatasetConfig,
    ctx: &BuildContext,
    datasets: &DatasetRegistry,
    transforms: &TransformRegistry,
) -> Result<Dataset> {
    let classes = ClassesSpec::from_value(&config.classes)?;
    let source = datasets.source(config, ctx)?;
    let options = DatasetOptions {
        pipeline: config
            .pipeline
            .iter()
            .cloned()
            .map(StageSpec::Config)
            .collect(),
        classes,
    };
    Dataset::new(source.as_ref(), options, transforms)
}
