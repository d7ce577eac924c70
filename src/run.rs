use std::{collections::HashMap, fs, path::PathBuf};

use machine_learning::arch::{Model, Network, loss::CrossEntropy};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    checkpoint,
    config::TrainConfig,
    dashboard::{Dashboard, HyperParams},
    data::DataLoader,
    error::Result,
    metrics::{EpochRecord, accuracy, average_loss, write_results},
    training::{eval_epoch, train_epoch},
};

/// Everything a finished run left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_dir: PathBuf,
    pub records: Vec<EpochRecord>,
    pub checkpoints: Vec<PathBuf>,
    pub results: PathBuf,
}

/// Trains a model for the configured amount of epochs, evaluating it after each one.
///
/// Every epoch starts with a freshly built optimizer and leaves a checkpoint in the run
/// directory, the results of all of them are written as a table once the last one finishes.
///
/// # Arguments
/// * `cfg` - The configuration of the run.
/// * `run` - The name of the run.
/// * `model` - The architecture to train.
/// * `train` - The loader of the training set.
/// * `val` - The loader of the validation set.
/// * `dashboard` - Receives the metrics of every epoch.
///
/// # Returns
/// The outputs of the run or the first error that occurred.
pub fn run<M, D>(
    cfg: &TrainConfig,
    run: &str,
    model: M,
    train: &mut DataLoader,
    val: &mut DataLoader,
    dashboard: &mut D,
) -> Result<RunOutcome>
where
    M: Model + Send + Sync,
    D: Dashboard + ?Sized,
{
    dashboard.init(&cfg.project, run, &HyperParams::from(cfg))?;

    let run_dir = cfg.output_root.join(run);
    fs::create_dir_all(&run_dir)?;

    let pool = cfg.device.build_pool()?;
    let mut net = Network::new(model, &mut StdRng::seed_from_u64(cfg.seed))?;
    let loss_fn = CrossEntropy::new();
    log::info!(
        "training {run} ({} parameters) on {} thread(s)",
        net.size(),
        pool.current_num_threads()
    );

    let epochs = cfg.epochs.get();
    let mut records = Vec::with_capacity(epochs);
    let mut checkpoints = Vec::with_capacity(epochs);

    for epoch in 0..epochs {
        // Optimizer state doesn't outlive the epoch.
        let mut optimizer = cfg.optimizer.build(net.size(), cfg.learning_rate);
        let trained =
            pool.install(|| train_epoch(&mut net, &loss_fn, optimizer.as_mut(), train.iter()))?;
        let evaluated = pool.install(|| eval_epoch(&net, &loss_fn, val.iter()))?;

        let record = EpochRecord {
            epoch,
            train_acc: accuracy(&trained.preds, &trained.labels),
            train_loss: average_loss(trained.loss, train.len()),
            val_acc: accuracy(&evaluated.preds, &evaluated.labels),
            val_loss: average_loss(evaluated.loss, val.len()),
        };

        log::info!(
            "Epoch [{}/{epochs}], Train Loss: {}, Train Accuracy: {}, Val Loss: {}, Val Accuracy: {}",
            epoch + 1,
            record.train_loss,
            record.train_acc,
            record.val_loss,
            record.val_acc
        );

        dashboard.log(&[
            ("Train Accuracy", record.train_acc),
            ("Train Loss", record.train_loss),
            ("Val Accuracy", record.val_acc),
            ("Val Loss", record.val_loss),
        ])?;
        records.push(record);

        let path = checkpoint::checkpoint_path(&run_dir, run, epoch + 1);
        let metadata = HashMap::from([
            ("run".to_string(), run.to_string()),
            ("epoch".to_string(), (epoch + 1).to_string()),
            ("model".to_string(), cfg.model.name().to_string()),
        ]);
        checkpoint::save(&net, &path, metadata)?;
        checkpoints.push(path);
    }

    let results = run_dir.join(format!("results_{run}_cache.csv"));
    write_results(&results, &records)?;
    dashboard.finish()?;
    log::info!("results written to {}", results.display());

    Ok(RunOutcome {
        run_dir,
        records,
        checkpoints,
        results,
    })
}
