//! Resource manifests
//!
//! A manifest names the archives a dataset is built from, where they are
//! downloaded from and the checksum each must match.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Result, StrataError};
use crate::fetch::Checksum;
use crate::idx::strip_compression_suffix;

pub const TRAIN_IMAGE_FILE: &str = "train_image_file";
pub const TRAIN_LABEL_FILE: &str = "train_label_file";
pub const TEST_IMAGE_FILE: &str = "test_image_file";
pub const TEST_LABEL_FILE: &str = "test_label_file";

/// Keys every IDX dataset manifest carries
pub const IDX_RESOURCE_KEYS: [&str; 4] = [
    TRAIN_IMAGE_FILE,
    TRAIN_LABEL_FILE,
    TEST_IMAGE_FILE,
    TEST_LABEL_FILE,
];

/// One downloadable archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Role of the file, e.g. `train_image_file`
    pub key: String,
    /// Archive name under the URL prefix
    pub filename: String,
    /// Expected digest of the archive
    pub checksum: Checksum,
}

impl Resource {
    pub fn new(key: &str, filename: &str, checksum: Checksum) -> Self {
        Self {
            key: key.to_string(),
            filename: filename.to_string(),
            checksum,
        }
    }
}

/// Download manifest of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceManifest {
    /// Manifest version for compatibility
    #[serde(default = "current_version")]
    pub version: u32,
    /// Dataset name
    pub name: String,
    /// URL every resource filename is appended to
    pub url_prefix: String,
    pub resources: Vec<Resource>,
    /// Default class names
    #[serde(default)]
    pub classes: Vec<String>,
}

fn current_version() -> u32 {
    ResourceManifest::CURRENT_VERSION
}

impl ResourceManifest {
    pub const CURRENT_VERSION: u32 = 1;

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        if manifest.version > Self::CURRENT_VERSION {
            return Err(StrataError::InvalidConfig {
                reason: format!(
                    "Manifest version {} is newer than supported {}",
                    manifest.version,
                    Self::CURRENT_VERSION
                ),
            });
        }
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check resource keys are unique and the IDX roles are all present
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.key.as_str()) {
                return Err(StrataError::InvalidConfig {
                    reason: format!("duplicate resource key '{}'", resource.key),
                });
            }
        }
        if let Some(missing) = IDX_RESOURCE_KEYS.iter().find(|k| !seen.contains(**k)) {
            return Err(StrataError::InvalidConfig {
                reason: format!("manifest '{}' lacks resource '{}'", self.name, missing),
            });
        }
        Ok(())
    }

    pub fn resource(&self, key: &str) -> Result<&Resource> {
        self.resources
            .iter()
            .find(|r| r.key == key)
            .ok_or_else(|| StrataError::InvalidConfig {
                reason: format!("manifest '{}' has no resource '{}'", self.name, key),
            })
    }

    /// Download URL of a resource
    pub fn url(&self, resource: &Resource) -> String {
        if self.url_prefix.ends_with('/') {
            format!("{}{}", self.url_prefix, resource.filename)
        } else {
            format!("{}/{}", self.url_prefix, resource.filename)
        }
    }

    /// Path of the unpacked resource under `root`
    pub fn local_path(&self, root: &Path, key: &str) -> Result<PathBuf> {
        let resource = self.resource(key)?;
        Ok(strip_compression_suffix(&root.join(&resource.filename)))
    }

    pub fn mnist() -> Self {
        Self::idx(
            "MNIST",
            "http://yann.lecun.com/exdb/mnist/",
            [
                "f68b3c2dcbeaaa9fbdd348bbdeb94873",
                "d53e105ee54ea40749a09fcbcd1e9432",
                "9fb629c4189551a2d022fa330f9573f3",
                "ec29112dd5afa0611ce80d1b7f02629c",
            ],
            &[
                "0 - zero", "1 - one", "2 - two", "3 - three", "4 - four", "5 - five",
                "6 - six", "7 - seven", "8 - eight", "9 - nine",
            ],
        )
    }

    pub fn fashion_mnist() -> Self {
        Self::idx(
            "FashionMNIST",
            "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com/",
            [
                "8d4fb7e6c68d591d4c3dfef9ec88bf0d",
                "25c81989df183df01b3e8a0aad5dffbe",
                "bef4ecab320f06d8554ea6380940ec79",
                "bb300cfdad3c16e7a12a480ee83cd310",
            ],
            &[
                "T-shirt/top", "Trouser", "Pullover", "Dress", "Coat", "Sandal", "Shirt",
                "Sneaker", "Bag", "Ankle boot",
            ],
        )
    }

    /// Manifest using the standard MNIST archive names
    fn idx(name: &str, url_prefix: &str, md5s: [&str; 4], classes: &[&str]) -> Self {
        let filenames = [
            "train-images-idx3-ubyte.gz",
            "train-labels-idx1-ubyte.gz",
            "t10k-images-idx3-ubyte.gz",
            "t10k-labels-idx1-ubyte.gz",
        ];
        let resources = IDX_RESOURCE_KEYS
            .iter()
            .zip(filenames)
            .zip(md5s)
            .map(|((key, filename), md5)| {
                Resource::new(key, filename, Checksum::Md5(md5.to_string()))
            })
            .collect();
        Self {
            version: Self::CURRENT_VERSION,
            name: name.to_string(),
            url_prefix: url_prefix.to_string(),
            resources,
            classes: classes.iter().map(|c| c.to_string()).collect(),
        }
    }
}
