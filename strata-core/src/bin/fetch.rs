//! Dataset fetch binary
//!
//! Builds every dataset in a data config so the files are downloaded,
//! verified and decodable before a training job starts. Run one copy per rank
//! with `RANK` / `WORLD_SIZE` set; only rank 0 downloads. Multi-rank runs also
//! need a `JOB_ID` unique to the run, which scopes the barrier markers.

use std::path::PathBuf;
use std::sync::Arc;
use strata_core::fetch::FetchConfig;
use strata_core::{
    build_dataset, BuildContext, DataConfig, DatasetRegistry, EnvGroup, HttpArchiveFetcher,
    ProcessGroup, TransformRegistry, BARRIER_DIR,
};
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config_path = PathBuf::from(
        std::env::var("DATASET_CONFIG").unwrap_or_else(|_| "configs/data.json".into()),
    );
    let data_root = PathBuf::from(std::env::var("DATA_ROOT").unwrap_or_else(|_| "data".into()));

    info!("Loading data config from {}", config_path.display());
    let config = DataConfig::from_json_file(&config_path)?;

    let group = EnvGroup::from_env(data_root.join(BARRIER_DIR))?;
    info!(
        "Starting strata-fetch as rank {} of {} (job {})",
        group.rank(),
        group.world_size(),
        group.job_id()
    );

    let fetch_config = FetchConfig {
        remove_archive: std::env::var("REMOVE_ARCHIVE").is_ok_and(|v| v == "1"),
        ..Default::default()
    };
    let ctx = BuildContext::new(Arc::new(group), Arc::new(HttpArchiveFetcher::new(fetch_config)?));

    let datasets = DatasetRegistry::global()?.read();
    let transforms = TransformRegistry::global()?.read();

    for (role, dataset_config) in config.datasets() {
        match build_dataset(dataset_config, &ctx, &datasets, &transforms) {
            Ok(dataset) => info!(
                "{} dataset {}: {} samples, {} classes",
                role,
                dataset.name(),
                dataset.len(),
                dataset.classes().len()
            ),
            Err(e) => {
                error!("Failed to build {} dataset: {}", role, e);
                return Err(e.into());
            }
        }
    }

    info!("{}", strata_core::metrics::gather_metrics());
    Ok(())
}
