//! Dataset core
//!
//! A `Dataset` owns the records produced by a source, a class table and a
//! resolved pipeline. Indexing deep-copies the stored record and runs the
//! pipeline over the copy, so stored records never change.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::expand_user;
use crate::error::{Result, StrataError};
use crate::metrics::standard;
use crate::pipeline::{Pipeline, StageSpec, TransformRegistry};
use crate::record::Record;
use crate::source::RecordSource;

/// Label field every classification record carries
pub const LABEL_KEY: &str = "gt_label";

/// Override for a dataset's class names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassesSpec {
    /// Text file with one class name per line
    File(PathBuf),
    /// Explicit names
    Names(Vec<String>),
}

impl ClassesSpec {
    /// Interpret a config value: string is a file, list is names, null is none
    pub fn from_value(value: &serde_json::Value) -> Result<Option<Self>> {
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(path) => Ok(Some(ClassesSpec::File(PathBuf::from(path)))),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| StrataError::InvalidClasses {
                            reason: format!("class names must be strings, got {}", item),
                        })
                })
                .collect::<Result<Vec<_>>>()
                .map(|names| Some(ClassesSpec::Names(names))),
            other => Err(StrataError::InvalidClasses {
                reason: format!("unsupported classes value {}", other),
            }),
        }
    }
}

/// Ordered class names with their reverse index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl ClassTable {
    /// Build a table; names must be unique
    pub fn new(names: Vec<String>) -> Result<Self> {
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(StrataError::InvalidClasses {
                    reason: format!("duplicate class name '{}'", name),
                });
            }
        }
        Ok(Self { names, index })
    }

    /// Apply an optional override to a source's default names
    pub fn resolve(default: Vec<String>, spec: Option<ClassesSpec>) -> Result<Self> {
        match spec {
            None => Self::new(default),
            Some(ClassesSpec::Names(names)) => Self::new(names),
            Some(ClassesSpec::File(path)) => Self::from_file(&path),
        }
    }

    /// Read one name per line; line endings are stripped and blank lines skipped
    pub fn from_file(path: &Path) -> Result<Self> {
        let path = expand_user(path);
        let text = std::fs::read_to_string(&path).map_err(|e| StrataError::InvalidClasses {
            reason: format!("cannot read class file {}: {}", path.display(), e),
        })?;
        let names = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        Self::new(names)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Class name to position
    pub fn class_to_index(&self) -> &HashMap<String, usize> {
        &self.index
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// Construction options for `Dataset`
#[derive(Debug, Clone, Default)]
pub struct DatasetOptions {
    pub pipeline: Vec<StageSpec>,
    pub classes: Option<ClassesSpec>,
}

/// Random-access collection of samples
pub trait IndexedDataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transformed sample at `index`; `Ok(None)` when the pipeline vetoed it
    fn get(&self, index: usize) -> Result<Option<Record>>;

    /// Ground-truth label of every sample, in index order
    fn labels(&self) -> Result<Vec<i64>>;

    fn classes(&self) -> &ClassTable;
}

/// Records plus class table plus pipeline
pub struct Dataset {
    name: String,
    records: Vec<Record>,
    classes: ClassTable,
    pipeline: Pipeline,
}

impl Dataset {
    /// Resolve the pipeline and class table, then load the source
    ///
    /// Configuration is checked before the source is touched, so a bad stage
    /// or class override fails without any I/O.
    pub fn new(
        source: &dyn RecordSource,
        options: DatasetOptions,
        registry: &TransformRegistry,
    ) -> Result<Self> {
        let pipeline = Pipeline::new(options.pipeline, registry)?;
        let classes = ClassTable::resolve(source.default_classes(), options.classes)?;
        let records = source.load()?;

        info!(
            "Dataset {} ready: {} records, {} classes, {} stages",
            source.name(),
            records.len(),
            classes.len(),
            pipeline.len()
        );
        Ok(Self::from_parts(source.name(), records, classes, pipeline))
    }

    /// Assemble a dataset from already-loaded parts
    pub fn from_parts(
        name: impl Into<String>,
        records: Vec<Record>,
        classes: ClassTable,
        pipeline: Pipeline,
    ) -> Self {
        standard::DATASETS_LOADED.add(1);
        Self {
            name: name.into(),
            records,
            classes,
            pipeline,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn class_to_index(&self) -> &HashMap<String, usize> {
        self.classes.class_to_index()
    }

    /// Stored record without the pipeline applied
    pub fn raw(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    /// Deep copy of record `index` run through the pipeline
    pub fn get(&self, index: usize) -> Result<Option<Record>> {
        let record = self
            .records
            .get(index)
            .ok_or(StrataError::IndexOutOfBounds {
                index,
                len: self.records.len(),
            })?
            .clone();

        let out = self.pipeline.apply(record);
        match &out {
            Some(_) => standard::SAMPLES_SERVED.inc(),
            None => {
                standard::SAMPLES_VETOED.inc();
                debug!("Sample {} of {} vetoed by pipeline", index, self.name);
            }
        }
        Ok(out)
    }

    /// Ground-truth labels of all records
    pub fn labels(&self) -> Result<Vec<i64>> {
        (0..self.records.len()).map(|i| self.label(i)).collect()
    }

    /// Categories of record `index`; single-label records yield one entry
    pub fn category_ids(&self, index: usize) -> Result<Vec<i64>> {
        if index >= self.records.len() {
            return Err(StrataError::IndexOutOfBounds {
                index,
                len: self.records.len(),
            });
        }
        Ok(vec![self.label(index)?])
    }

    fn label(&self, index: usize) -> Result<i64> {
        self.records[index]
            .int(LABEL_KEY)
            .ok_or_else(|| StrataError::MissingField {
                index,
                field: LABEL_KEY.to_string(),
            })
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        standard::DATASETS_LOADED.add(-1);
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("len", &self.records.len())
            .field("classes", &self.classes.names())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl IndexedDataset for Dataset {
    fn len(&self) -> usize {
        Dataset::len(self)
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        Dataset::get(self, index)
    }

    fn labels(&self) -> Result<Vec<i64>> {
        Dataset::labels(self)
    }

    fn classes(&self) -> &ClassTable {
        Dataset::classes(self)
    }
}
