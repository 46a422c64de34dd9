//! Transform registry
//!
//! Maps transform kind names to factories that build stages from JSON
//! parameters. Pipeline descriptors look like
//! `{"type": "Normalize", "mean": [0.5], "std": [0.5]}`.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};

use super::stage::Stage;
use super::transforms;
use crate::error::{Result, StrataError};
use crate::registry::Registry;

/// Stage parameters: the descriptor object minus its kind key
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Builds a stage from its parameters
pub type StageFactory = Arc<dyn Fn(&Params) -> Result<Arc<dyn Stage>> + Send + Sync>;

/// Keys accepted as the kind discriminator, in priority order
const KIND_KEYS: [&str; 2] = ["type", "kind"];

/// A pipeline entry before resolution
#[derive(Debug, Clone)]
pub enum StageSpec {
    /// An already-constructed stage, used as is
    Built(Arc<dyn Stage>),
    /// A `{"type": name, ...params}` descriptor
    Config(serde_json::Value),
}

impl From<Arc<dyn Stage>> for StageSpec {
    fn from(stage: Arc<dyn Stage>) -> Self {
        StageSpec::Built(stage)
    }
}

impl From<serde_json::Value> for StageSpec {
    fn from(value: serde_json::Value) -> Self {
        StageSpec::Config(value)
    }
}

/// Name to stage-factory map
#[derive(Clone, Debug)]
pub struct TransformRegistry {
    factories: Registry<StageFactory>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: Registry::new("pipeline"),
        }
    }

    /// Registry holding every built-in transform
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        transforms::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Process-wide registry, populated with the built-ins on first use
    pub fn global() -> Result<&'static RwLock<TransformRegistry>> {
        static GLOBAL: OnceLock<RwLock<TransformRegistry>> = OnceLock::new();
        if let Some(global) = GLOBAL.get() {
            return Ok(global);
        }
        let registry = Self::with_builtins()?;
        Ok(GLOBAL.get_or_init(|| RwLock::new(registry)))
    }

    /// Register a raw factory under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&Params) -> Result<Arc<dyn Stage>> + Send + Sync + 'static,
    {
        self.factories.register(name, Arc::new(factory))
    }

    /// Register a constructor taking a typed parameter struct
    ///
    /// Parameters are deserialized into `P`; unknown fields, missing required
    /// fields and type mismatches all surface as `InvalidParams`.
    pub fn register_typed<P, S, F>(&mut self, name: &str, ctor: F) -> Result<()>
    where
        P: DeserializeOwned,
        S: Stage + 'static,
        F: Fn(P) -> Result<S> + Send + Sync + 'static,
    {
        let kind = name.to_string();
        self.register(name, move |params: &Params| {
            let parsed: P = serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| StrataError::InvalidParams {
                    kind: kind.clone(),
                    reason: e.to_string(),
                })?;
            let stage: Arc<dyn Stage> = Arc::new(ctor(parsed)?);
            Ok(stage)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains(name)
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys()
    }

    /// Resolve one pipeline entry into a stage
    pub fn build(&self, spec: StageSpec) -> Result<Arc<dyn Stage>> {
        match spec {
            StageSpec::Built(stage) => Ok(stage),
            StageSpec::Config(value) => self.build_value(&value),
        }
    }

    /// Resolve a `{"type": name, ...}` descriptor into a stage
    pub fn build_value(&self, value: &serde_json::Value) -> Result<Arc<dyn Stage>> {
        let object = value.as_object().ok_or_else(|| StrataError::InvalidStage {
            reason: format!("expected a stage or a mapping, got {}", value),
        })?;

        let mut params = object.clone();
        let kind = KIND_KEYS
            .iter()
            .find_map(|key| params.remove(*key))
            .ok_or_else(|| StrataError::InvalidStage {
                reason: format!("descriptor {} has no \"type\" key", value),
            })?;
        // "type" wins when both are present; the other must not leak into params
        for key in KIND_KEYS {
            params.remove(key);
        }

        let kind = kind.as_str().ok_or_else(|| StrataError::InvalidStage {
            reason: format!("stage type must be a string, got {}", kind),
        })?;

        let factory = self.factories.get(kind)?;
        factory(&params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::from_fn;
    use crate::record::Record;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug)]
    struct AddN(i64);

    impl Stage for AddN {
        fn name(&self) -> String {
            format!("AddN(n={})", self.0)
        }

        fn apply(&self, mut record: Record) -> Option<Record> {
            let x = record.int("x")?;
            record.insert("x", x + self.0);
            Some(record)
        }
    }

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct AddNParams {
        n: i64,
    }

    fn registry() -> TransformRegistry {
        let mut registry = TransformRegistry::new();
        registry
            .register_typed("AddN", |p: AddNParams| Ok(AddN(p.n)))
            .unwrap();
        registry
    }

    #[test]
    fn test_build_from_descriptor() {
        let stage = registry().build_value(&json!({"type": "AddN", "n": 3})).unwrap();
        let out = stage.apply(Record::new().with("x", 1i64)).unwrap();
        assert_eq!(out.int("x"), Some(4));
    }

    #[test]
    fn test_kind_alias() {
        let stage = registry().build_value(&json!({"kind": "AddN", "n": 1}));
        assert!(stage.is_ok());
    }

    #[test]
    fn test_built_stage_passes_through() {
        let stage = from_fn("noop", Some);
        let built = registry().build(StageSpec::Built(stage.clone())).unwrap();
        assert!(Arc::ptr_eq(&stage, &built));
    }

    #[test]
    fn test_unknown_kind() {
        let err = registry().build_value(&json!({"type": "Blur"})).unwrap_err();
        assert!(matches!(err, StrataError::UnknownKind { .. }));
    }

    #[test]
    fn test_non_mapping_is_invalid_stage() {
        let err = registry().build_value(&json!(42)).unwrap_err();
        assert!(matches!(err, StrataError::InvalidStage { .. }));

        let err = registry().build_value(&json!({"n": 1})).unwrap_err();
        assert!(matches!(err, StrataError::InvalidStage { .. }));
    }

    #[test]
    fn test_bad_params() {
        let registry = registry();
        for bad in [
            json!({"type": "AddN"}),
            json!({"type": "AddN", "n": "three"}),
            json!({"type": "AddN", "n": 1, "m": 2}),
        ] {
            let err = registry.build_value(&bad).unwrap_err();
            assert!(matches!(err, StrataError::InvalidParams { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = registry();
        let err = registry
            .register_typed("AddN", |p: AddNParams| Ok(AddN(p.n)))
            .unwrap_err();
        assert!(matches!(err, StrataError::DuplicateRegistration { .. }));
    }

    #[test]
    fn test_builtins_fail_fast_on_conflict() {
        let mut registry = TransformRegistry::new();
        registry
            .register("Collect", |_: &Params| Ok(from_fn("Collect", Some)))
            .unwrap();
        let err = transforms::register_builtins(&mut registry).unwrap_err();
        assert!(matches!(err, StrataError::DuplicateRegistration { .. }));
        assert_eq!(TransformRegistry::with_builtins().unwrap().kinds().len(), 11);
    }

    #[test]
    fn test_global_has_builtins() {
        let global = TransformRegistry::global().unwrap().read();
        assert!(global.contains("Collect"));
        assert!(global.contains("Normalize"));
    }
}
