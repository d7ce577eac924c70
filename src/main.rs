use pest_classifier::{config::TrainConfig, launch, logging};

fn main() -> anyhow::Result<()> {
    logging::init();

    let cfg = TrainConfig::from_env()?;
    let outcome = launch(&cfg)?;

    log::info!(
        "finished {} epoch(s), outputs in {}",
        outcome.records.len(),
        outcome.run_dir.display()
    );
    Ok(())
}
