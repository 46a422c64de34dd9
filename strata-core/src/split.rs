//! Train/val split of an image-folder tree
//!
//! Input is `data_root/<category>/<image>`. Each category's images are
//! shuffled with a seeded RNG, the first `split_ratio` share goes to train and
//! the rest to val. Files are copied on a thread pool; manifests are written
//! once all copies finish, in a deterministic order.

use chrono::Local;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::info;

use crate::error::{Result, StrataError};
use crate::jsonl::save_jsonl;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Manifest layout written after the split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestFormat {
    /// `meta/{train,val,classes}.txt` with `"<path> <label>"` lines; images
    /// under `output_root/{train,val}/<category>/`
    #[default]
    Txt,
    /// `train_set_<n>_<date>.json` / `val_set_<n>_<date>.json` JSON lines;
    /// images under `output_root/<category>/image/`
    Jsonl,
}

impl FromStr for ManifestFormat {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" => Ok(ManifestFormat::Txt),
            "json" | "jsonl" => Ok(ManifestFormat::Jsonl),
            other => Err(StrataError::InvalidConfig {
                reason: format!("unknown manifest format '{}'", other),
            }),
        }
    }
}

/// Split tool settings
#[derive(Debug, Clone)]
pub struct SplitConfig {
    pub data_root: PathBuf,
    pub output_root: PathBuf,
    /// Share of each category sent to train
    pub split_ratio: f64,
    pub seed: u64,
    /// Copy threads
    pub num_threads: usize,
    pub format: ManifestFormat,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            output_root: PathBuf::from("output"),
            split_ratio: 0.8,
            seed: 2023,
            num_threads: 20,
            format: ManifestFormat::Txt,
        }
    }
}

impl SplitConfig {
    /// Read `DATA_ROOT`, `OUTPUT_ROOT`, `SPLIT_RATIO`, `SEED`, `NUM_THREADS`
    /// and `SPLIT_FORMAT`, keeping defaults for unset variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("DATA_ROOT") {
            config.data_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("OUTPUT_ROOT") {
            config.output_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SPLIT_RATIO") {
            config.split_ratio = parse_env("SPLIT_RATIO", &v)?;
        }
        if let Ok(v) = std::env::var("SEED") {
            config.seed = parse_env("SEED", &v)?;
        }
        if let Ok(v) = std::env::var("NUM_THREADS") {
            config.num_threads = parse_env("NUM_THREADS", &v)?;
        }
        if let Ok(v) = std::env::var("SPLIT_FORMAT") {
            config.format = v.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.split_ratio) {
            return Err(StrataError::InvalidConfig {
                reason: format!("split_ratio must be in [0, 1], got {}", self.split_ratio),
            });
        }
        if self.num_threads == 0 {
            return Err(StrataError::InvalidConfig {
                reason: "num_threads must be positive".into(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| StrataError::InvalidConfig {
        reason: format!("{}={} is not valid", name, value),
    })
}

/// One copied image in the JSON-lines manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitEntry {
    pub filename: String,
    pub category: String,
    pub label: usize,
}

/// Outcome of a split run
#[derive(Debug, Clone, Default)]
pub struct SplitSummary {
    pub classes: Vec<String>,
    pub train: usize,
    pub val: usize,
    /// Manifest files written
    pub manifests: Vec<PathBuf>,
}

struct CopyJob {
    src: PathBuf,
    dst: PathBuf,
    category: String,
    label: usize,
}

impl CopyJob {
    fn run(&self) -> Result<()> {
        if let Some(parent) = self.dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.src, &self.dst)?;
        Ok(())
    }

    fn txt_line(&self) -> String {
        format!("{} {}", self.dst.display(), self.label)
    }

    fn entry(&self) -> SplitEntry {
        SplitEntry {
            filename: file_name(&self.src),
            category: self.category.clone(),
            label: self.label,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Sorted subdirectories of `root`
fn categories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Sorted image files directly inside `dir`
fn images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Split `data_root` into train and val copies under `output_root`
pub fn split_image_folder(config: &SplitConfig) -> Result<SplitSummary> {
    config.validate()?;
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut summary = SplitSummary::default();
    let mut train_jobs = Vec::new();
    let mut val_jobs = Vec::new();

    for (label, dir) in categories(&config.data_root)?.into_iter().enumerate() {
        let category = file_name(&dir);
        let mut files = images(&dir)?;
        files.shuffle(&mut rng);
        let split_at = (files.len() as f64 * config.split_ratio) as usize;
        info!(
            "{}: train set: {}, val set: {}",
            category,
            split_at,
            files.len() - split_at
        );

        for (i, src) in files.into_iter().enumerate() {
            let train = i < split_at;
            let dst = match config.format {
                ManifestFormat::Txt => config
                    .output_root
                    .join(if train { "train" } else { "val" })
                    .join(&category)
                    .join(file_name(&src)),
                ManifestFormat::Jsonl => config
                    .output_root
                    .join(&category)
                    .join("image")
                    .join(file_name(&src)),
            };
            let job = CopyJob {
                src,
                dst,
                category: category.clone(),
                label,
            };
            if train {
                train_jobs.push(job);
            } else {
                val_jobs.push(job);
            }
        }
        summary.classes.push(category);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build()
        .map_err(|e| StrataError::Internal {
            message: format!("Failed to build copy thread pool: {}", e),
        })?;
    pool.install(|| {
        train_jobs
            .par_iter()
            .chain(val_jobs.par_iter())
            .try_for_each(CopyJob::run)
    })?;

    summary.train = train_jobs.len();
    summary.val = val_jobs.len();
    info!("Number of categories: {}", summary.classes.len());
    info!("Total train set: {}, total val set: {}", summary.train, summary.val);

    summary.manifests = match config.format {
        ManifestFormat::Txt => write_txt_manifests(config, &summary, &train_jobs, &val_jobs)?,
        ManifestFormat::Jsonl => write_jsonl_manifests(config, &train_jobs, &val_jobs)?,
    };

    info!("Split finished in {:?}", start.elapsed());
    Ok(summary)
}

fn write_txt_manifests(
    config: &SplitConfig,
    summary: &SplitSummary,
    train: &[CopyJob],
    val: &[CopyJob],
) -> Result<Vec<PathBuf>> {
    let meta = config.output_root.join("meta");
    fs::create_dir_all(&meta)?;

    let files = [
        (meta.join("train.txt"), train.iter().map(CopyJob::txt_line).collect::<Vec<_>>()),
        (meta.join("val.txt"), val.iter().map(CopyJob::txt_line).collect()),
        (meta.join("classes.txt"), summary.classes.clone()),
    ];
    let mut written = Vec::with_capacity(files.len());
    for (path, lines) in files {
        fs::write(&path, lines.join("\n"))?;
        written.push(path);
    }
    Ok(written)
}

fn write_jsonl_manifests(
    config: &SplitConfig,
    train: &[CopyJob],
    val: &[CopyJob],
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&config.output_root)?;
    let date = Local::now().format("%Y%m%d").to_string();

    let mut written = Vec::with_capacity(2);
    for (prefix, jobs) in [("train_set", train), ("val_set", val)] {
        let entries: Vec<SplitEntry> = jobs.iter().map(CopyJob::entry).collect();
        let path = config
            .output_root
            .join(format!("{}_{}_{}.json", prefix, entries.len(), date));
        save_jsonl(&path, &entries)?;
        written.push(path);
    }
    Ok(written)
}
