//! JSON-lines files
//!
//! One JSON document per line, as used for annotation manifests. Lines that
//! fail to parse are logged and skipped rather than aborting the load.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;

/// Progress is logged every this many lines
pub const LOG_INTERVAL: usize = 50_000;

/// Read lines `start..end` (all remaining when `end` is `None`)
pub fn load_jsonl<T: DeserializeOwned>(path: &Path, start: usize, end: Option<usize>) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        if end.is_some_and(|end| i >= end) {
            break;
        }
        let line = line?;
        if i >= start {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                match serde_json::from_str(trimmed) {
                    Ok(item) => items.push(item),
                    Err(e) => warn!("Skipping line {} of {}: {}", i + 1, path.display(), e),
                }
            }
        }
        if (i + 1) % LOG_INTERVAL == 0 {
            info!("Loaded {} lines of {}", i + 1, path.display());
        }
    }
    Ok(items)
}

/// Write one document per line, replacing the file
pub fn save_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (i, item) in items.iter().enumerate() {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
        if (i + 1) % LOG_INTERVAL == 0 {
            info!("Wrote {} items to {}", i + 1, path.display());
        }
    }
    writer.flush()?;
    Ok(())
}
