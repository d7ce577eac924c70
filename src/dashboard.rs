use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
};

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{config::TrainConfig, error::Result};

/// The hyper-parameters a run reports to its dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HyperParams {
    pub learning_rate: f32,
    pub epochs: usize,
    pub batch_size: usize,
}

impl From<&TrainConfig> for HyperParams {
    fn from(cfg: &TrainConfig) -> Self {
        Self {
            learning_rate: cfg.learning_rate,
            epochs: cfg.epochs.get(),
            batch_size: cfg.batch_size.get(),
        }
    }
}

/// An experiment tracker receiving the metrics of every epoch of a run.
pub trait Dashboard {
    /// Starts the session of a run.
    ///
    /// # Arguments
    /// * `project` - The project the run belongs to.
    /// * `run` - The display name of the run.
    /// * `params` - The hyper-parameters of the run.
    fn init(&mut self, project: &str, run: &str, params: &HyperParams) -> Result<()>;

    /// Records the metrics of a step, in the order they are given.
    fn log(&mut self, metrics: &[(&str, f32)]) -> Result<()>;

    /// Closes the session.
    fn finish(&mut self) -> Result<()>;
}

/// Appends one JSON object per event to a file.
#[derive(Debug)]
pub struct JsonlDashboard {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    step: usize,
}

impl JsonlDashboard {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            step: 0,
        }
    }

    fn write(&mut self, event: Value) -> Result<()> {
        let writer = match &mut self.writer {
            Some(writer) => writer,
            slot @ None => {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                slot.insert(BufWriter::new(file))
            }
        };

        serde_json::to_writer(&mut *writer, &event)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl Dashboard for JsonlDashboard {
    fn init(&mut self, project: &str, run: &str, params: &HyperParams) -> Result<()> {
        self.step = 0;
        self.write(json!({
            "event": "init",
            "project": project,
            "run": run,
            "config": params,
        }))
    }

    fn log(&mut self, metrics: &[(&str, f32)]) -> Result<()> {
        let metrics: Map<String, Value> = metrics
            .iter()
            .map(|&(name, value)| (name.to_string(), json!(value)))
            .collect();

        self.write(json!({
            "event": "log",
            "step": self.step,
            "metrics": metrics,
        }))?;

        self.step += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.write(json!({ "event": "finish", "steps": self.step }))?;
        self.writer = None;
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDashboard;

impl Dashboard for NullDashboard {
    fn init(&mut self, _project: &str, _run: &str, _params: &HyperParams) -> Result<()> {
        Ok(())
    }

    fn log(&mut self, _metrics: &[(&str, f32)]) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
