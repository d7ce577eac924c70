//! Trains image classifiers, a convolutional network or a vision transformer, over a labeled
//! image dataset described by CSV tables.
//!
//! Every epoch trains over the whole training set, evaluates over the test set, reports the
//! metrics and leaves a checkpoint of the parameters in the run directory.

pub mod checkpoint;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod run;
pub mod training;

use std::sync::Arc;

use config::TrainConfig;
use dashboard::JsonlDashboard;
use data::{DataLoader, ImageCache, read_table};

pub use error::{Result, TrainErr};
pub use run::RunOutcome;

/// Runs the training described by the configuration from start to end.
///
/// # Errors
/// Returns a `TrainErr` if the configuration is invalid, a table or image can't be read or
/// any output can't be written.
pub fn launch(cfg: &TrainConfig) -> Result<RunOutcome> {
    cfg.validate()?;
    let run_name = cfg.run_name();

    log::info!("reading dataset tables");
    let train_samples = read_table(&cfg.train_table, cfg.num_classes)?;
    let test_samples = read_table(&cfg.test_table, cfg.num_classes)?;
    log::info!(
        "{} training and {} test samples",
        train_samples.len(),
        test_samples.len()
    );

    let cache = Arc::new(ImageCache::new(cfg.image_size));
    let mut train = DataLoader::new(
        train_samples,
        cfg.batch_size,
        true,
        Arc::clone(&cache),
        cfg.num_workers,
        cfg.seed,
    )?;
    let mut val = DataLoader::new(
        test_samples,
        cfg.batch_size,
        false,
        cache,
        cfg.num_workers,
        cfg.seed,
    )?;

    let model = cfg.model.build(cfg);
    let mut dashboard =
        JsonlDashboard::new(cfg.run_dir().join(format!("{run_name}_dashboard.jsonl")));

    run::run(cfg, &run_name, model, &mut train, &mut val, &mut dashboard)
}
