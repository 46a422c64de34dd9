//! Sequential composition of stages

use std::fmt;
use std::sync::Arc;

use super::registry::{StageSpec, TransformRegistry};
use super::stage::Stage;
use crate::error::{Result, StrataError};
use crate::record::Record;

/// Ordered list of resolved stages applied one after another
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Resolve every entry up front; any bad entry fails construction
    pub fn new<I, S>(specs: I, registry: &TransformRegistry) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<StageSpec>,
    {
        let stages = specs
            .into_iter()
            .map(|spec| registry.build(spec.into()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stages })
    }

    /// Build from a JSON array of descriptors; `null` means no stages
    pub fn from_value(value: &serde_json::Value, registry: &TransformRegistry) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(Self::identity()),
            serde_json::Value::Array(entries) => Self::new(entries.iter().cloned(), registry),
            other => Err(StrataError::InvalidStage {
                reason: format!("pipeline must be a list of stages, got {}", other),
            }),
        }
    }

    /// Pipeline of already-built stages
    pub fn from_stages(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Pipeline that returns every record unchanged
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Run the stages in order, stopping at the first veto
    pub fn apply(&self, record: Record) -> Option<Record> {
        self.stages
            .iter()
            .try_fold(record, |record, stage| stage.apply(record))
    }
}

impl Stage for Pipeline {
    fn name(&self) -> String {
        self.to_string()
    }

    fn apply(&self, record: Record) -> Option<Record> {
        Pipeline::apply(self, record)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Compose(")?;
        for stage in &self.stages {
            write!(f, "\n    {}", stage.name())?;
        }
        f.write_str("\n)")
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::from_fn;

    #[test]
    fn test_identity() {
        let record = Record::new().with("x", 1i64);
        assert_eq!(Pipeline::identity().apply(record.clone()), Some(record));
    }

    #[test]
    fn test_display() {
        let pipeline = Pipeline::from_stages(vec![from_fn("A", Some), from_fn("B", Some)]);
        assert_eq!(pipeline.to_string(), "Compose(\n    A\n    B\n)");
        assert_eq!(Pipeline::identity().to_string(), "Compose(\n)");
    }

    #[test]
    fn test_from_value_rejects_non_list() {
        let registry = TransformRegistry::new();
        let err = Pipeline::from_value(&serde_json::json!({"type": "X"}), &registry).unwrap_err();
        assert!(matches!(err, StrataError::InvalidStage { .. }));
        assert!(Pipeline::from_value(&serde_json::Value::Null, &registry)
            .unwrap()
            .is_empty());
    }
}
