//! Record sources
//!
//! A source materializes the full list of records for a dataset. Concrete
//! datasets differ only in their source; class tables and the pipeline live
//! in `Dataset`.

pub mod idx;
pub mod manifest;

use std::fmt;

use crate::error::Result;
use crate::record::Record;

pub use idx::{IdxSource, Split};
pub use manifest::{Resource, ResourceManifest};

/// Produces the records of a dataset
pub trait RecordSource: Send + Sync + fmt::Debug {
    /// Dataset name, used in logs
    fn name(&self) -> &str;

    /// Class names used when no override is configured
    fn default_classes(&self) -> Vec<String>;

    /// Build every record, in index order
    fn load(&self) -> Result<Vec<Record>>;
}

/// Source over records already in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    classes: Vec<String>,
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, classes: Vec<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            classes,
            records,
        }
    }
}

impl RecordSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_classes(&self) -> Vec<String> {
        self.classes.clone()
    }

    fn load(&self) -> Result<Vec<Record>> {
        Ok(self.records.clone())
    }
}
