//! Pipeline stage trait

use std::fmt;
use std::sync::Arc;

use crate::record::Record;

/// One record-to-record step of a pipeline
///
/// Returning `None` vetoes the sample: the pipeline stops and the dataset
/// reports the sample as unavailable.
pub trait Stage: Send + Sync + fmt::Debug {
    /// Display name, used when rendering a pipeline
    fn name(&self) -> String;

    /// Transform an owned record
    fn apply(&self, record: Record) -> Option<Record>;
}

type StageFn = dyn Fn(Record) -> Option<Record> + Send + Sync;

/// Adapts a closure into a `Stage`
#[derive(Clone)]
pub struct FnStage {
    name: String,
    func: Arc<StageFn>,
}

impl FnStage {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Record) -> Option<Record> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

impl Stage for FnStage {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn apply(&self, record: Record) -> Option<Record> {
        (self.func)(record)
    }
}

/// Wrap a closure as a shareable stage
pub fn from_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn Stage>
where
    F: Fn(Record) -> Option<Record> + Send + Sync + 'static,
{
    Arc::new(FnStage::new(name, func))
}
