//! Image-folder split binary
//!
//! Configured through `DATA_ROOT`, `OUTPUT_ROOT`, `SPLIT_RATIO`, `SEED`,
//! `NUM_THREADS` and `SPLIT_FORMAT` (`txt` or `json`).

use strata_core::split::{split_image_folder, SplitConfig};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = SplitConfig::from_env()?;
    info!(
        "Splitting {} into {} (ratio {}, seed {})",
        config.data_root.display(),
        config.output_root.display(),
        config.split_ratio,
        config.seed
    );

    let summary = split_image_folder(&config)?;
    for path in &summary.manifests {
        info!("Wrote {}", path.display());
    }
    Ok(())
}
