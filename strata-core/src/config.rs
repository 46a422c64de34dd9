//! Declarative dataset configuration
//!
//! Mirrors the `{type: ..., data_prefix: ..., pipeline: [...]}` dictionaries
//! datasets are described with, loadable from JSON files.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StrataError};

/// One dataset entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    /// Registered dataset kind, e.g. `MNIST`
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    /// Directory holding (or receiving) the data files
    #[serde(alias = "data_path_prefix")]
    pub data_prefix: PathBuf,
    /// Stage descriptors, applied in order
    #[serde(default)]
    pub pipeline: Vec<serde_json::Value>,
    /// `null`, a class-list file path, or a list of names
    #[serde(default)]
    pub classes: serde_json::Value,
    /// Annotation file for sources that read one
    #[serde(default)]
    pub ann_file: Option<PathBuf>,
    #[serde(default)]
    pub test_mode: bool,
}

impl DatasetConfig {
    pub fn new(kind: impl Into<String>, data_prefix: impl Into<PathBuf>) -> Self {
        Self {
            kind: kind.into(),
            data_prefix: data_prefix.into(),
            pipeline: Vec::new(),
            classes: serde_json::Value::Null,
            ann_file: None,
            test_mode: false,
        }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| StrataError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StrataError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(expand_user(path))?)
    }

    /// Data prefix with `~` expanded
    pub fn data_root(&self) -> PathBuf {
        expand_user(&self.data_prefix)
    }
}

fn default_samples_per_gpu() -> usize {
    32
}

fn default_workers_per_gpu() -> usize {
    2
}

/// Train/val/test datasets plus loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Batch size per process
    #[serde(default = "default_samples_per_gpu")]
    pub samples_per_gpu: usize,
    /// Loader threads per process
    #[serde(default = "default_workers_per_gpu")]
    pub workers_per_gpu: usize,
    pub train: DatasetConfig,
    #[serde(default)]
    pub val: Option<DatasetConfig>,
    #[serde(default)]
    pub test: Option<DatasetConfig>,
}

impl DataConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StrataError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(expand_user(path))?)
    }

    /// Configured datasets with their role names
    pub fn datasets(&self) -> Vec<(&'static str, &DatasetConfig)> {
        let mut out = vec![("train", &self.train)];
        if let Some(val) = &self.val {
            out.push(("val", val));
        }
        if let Some(test) = &self.test {
            out.push(("test", test));
        }
        out
    }
}

/// Replace a leading `~` with the home directory
pub fn expand_user(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_dataset_config() {
        let config = DatasetConfig::from_value(json!({
            "type": "MNIST",
            "data_prefix": "data/mnist",
            "pipeline": [{"type": "Collect", "keys": ["img"]}],
            "test_mode": true
        }))
        .unwrap();
        assert_eq!(config.kind, "MNIST");
        assert_eq!(config.pipeline.len(), 1);
        assert!(config.classes.is_null());
        assert!(config.test_mode);
    }

    #[test]
    fn test_aliases() {
        let config = DatasetConfig::from_value(json!({
            "kind": "FashionMNIST",
            "data_path_prefix": "/data/fashion",
            "classes": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(config.kind, "FashionMNIST");
        assert_eq!(config.data_prefix, PathBuf::from("/data/fashion"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = DatasetConfig::from_value(json!({
            "type": "MNIST",
            "data_prefix": "d",
            "pipelines": []
        }))
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_data_config_defaults() {
        let config = DataConfig::from_json_str(
            r#"{"train": {"type": "MNIST", "data_prefix": "data/mnist"}}"#,
        )
        .unwrap();
        assert_eq!(config.samples_per_gpu, 32);
        assert_eq!(config.datasets().len(), 1);
    }

    #[test]
    fn test_expand_user() {
        assert_eq!(expand_user(Path::new("/abs/x")), PathBuf::from("/abs/x"));
        assert_eq!(expand_user(Path::new("rel/x")), PathBuf::from("rel/x"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_user(Path::new("~/classes.txt")),
                PathBuf::from(home).join("classes.txt")
            );
        }
    }
}
