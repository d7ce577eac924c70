use std::{
    env, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    thread,
};

use machine_learning::optimization::{Adam, GradientDescent, Optimizer};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TrainErr},
    models::ModelKind,
};

/// The environment variable naming a JSON file that overrides the default configuration.
pub const CONFIG_ENV: &str = "TRAIN_CONFIG";

pub const DEFAULT_PROJECT: &str = "Pests-Classification";

const fn non_zero(n: usize) -> NonZeroUsize {
    match NonZeroUsize::new(n) {
        Some(n) => n,
        None => NonZeroUsize::MIN,
    }
}

/// Where the training computation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Device {
    /// A single compute thread.
    Cpu,
    /// A pool of compute threads, as many as available cores when `threads` is missing.
    Parallel { threads: Option<NonZeroUsize> },
}

impl Default for Device {
    fn default() -> Self {
        Self::Parallel { threads: None }
    }
}

impl Device {
    pub fn threads(&self) -> usize {
        match self {
            Self::Cpu => 1,
            Self::Parallel { threads: Some(n) } => n.get(),
            Self::Parallel { threads: None } => {
                thread::available_parallelism().map_or(1, NonZeroUsize::get)
            }
        }
    }

    /// Builds the pool the training and evaluation loops run inside.
    pub fn build_pool(&self) -> Result<ThreadPool> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads())
            .thread_name(|i| format!("compute-{i}"))
            .build()?;

        Ok(pool)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam { b1: f32, b2: f32, eps: f32 },
    GradientDescent,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            b1: Adam::BETA1,
            b2: Adam::BETA2,
            eps: Adam::EPSILON,
        }
    }
}

impl OptimizerConfig {
    /// Creates the optimizer for a model of `len` parameters.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters of the model.
    /// * `learning_rate` - The step size.
    pub fn build(&self, len: usize, learning_rate: f32) -> Box<dyn Optimizer + Send> {
        match *self {
            Self::Adam { b1, b2, eps } => Box::new(Adam::new(len, learning_rate, b1, b2, eps)),
            Self::GradientDescent => Box::new(GradientDescent::new(learning_rate)),
        }
    }
}

/// Widths of the convolutional network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CnnConfig {
    pub conv1: usize,
    pub conv2: usize,
    pub hidden: usize,
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            conv1: 16,
            conv2: 32,
            hidden: 64,
        }
    }
}

/// Sizes of the vision transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitConfig {
    pub patch: usize,
    pub dim: usize,
    pub hidden: usize,
}

impl Default for VitConfig {
    fn default() -> Self {
        Self {
            patch: 8,
            dim: 64,
            hidden: 128,
        }
    }
}

/// Everything a training run needs to know, fixed for its whole duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub learning_rate: f32,
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub device: Device,
    pub seed: u64,
    /// Side of the square images fed to the model.
    pub image_size: usize,
    pub num_classes: usize,
    /// Threads decoding images for each loader.
    pub num_workers: NonZeroUsize,
    pub optimizer: OptimizerConfig,
    pub model: ModelKind,
    /// Defaults to the model's own run name.
    pub run_name: Option<String>,
    pub project: String,
    pub train_table: PathBuf,
    pub test_table: PathBuf,
    pub output_root: PathBuf,
    pub cnn: CnnConfig,
    pub vit: VitConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            epochs: non_zero(10),
            batch_size: non_zero(32),
            device: Device::default(),
            seed: 42,
            image_size: 64,
            num_classes: 4,
            num_workers: non_zero(4),
            optimizer: OptimizerConfig::default(),
            model: ModelKind::Vit,
            run_name: None,
            project: DEFAULT_PROJECT.to_string(),
            train_table: PathBuf::from("../Output/train_dataset.csv"),
            test_table: PathBuf::from("../Output/test_dataset.csv"),
            output_root: PathBuf::from("../Output"),
            cnn: CnnConfig::default(),
            vit: VitConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Reads a configuration from a JSON file, missing fields take their default value.
    ///
    /// # Arguments
    /// * `path` - The path of the JSON file.
    ///
    /// # Returns
    /// The validated configuration or an error if the file can't be read or is invalid.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads the configuration named by `TRAIN_CONFIG`, or the defaults if it isn't set.
    pub fn from_env() -> Result<Self> {
        match env::var_os(CONFIG_ENV) {
            Some(path) => {
                log::info!("reading config from {}", Path::new(&path).display());
                Self::from_json(path)
            }
            None => {
                let cfg = Self::default();
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    /// Returns the name of the run, used to name every output file.
    pub fn run_name(&self) -> String {
        self.run_name
            .clone()
            .unwrap_or_else(|| self.model.default_run_name().to_string())
    }

    /// Returns the directory where the outputs of this run are written.
    pub fn run_dir(&self) -> PathBuf {
        self.output_root.join(self.run_name())
    }

    /// Checks the configuration before any work is done.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TrainErr::InvalidConfig(msg));

        if !self.learning_rate.is_finite() || self.learning_rate <= 0. {
            return invalid(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            ));
        }
        if self.num_classes < 2 {
            return invalid(format!(
                "num_classes must be at least 2, got {}",
                self.num_classes
            ));
        }
        if self.run_name().is_empty() {
            return invalid("run_name must not be empty".into());
        }

        match self.model {
            ModelKind::Cnn => {
                if self.image_size < 4 {
                    return invalid(format!(
                        "image_size must be at least 4 for the cnn, got {}",
                        self.image_size
                    ));
                }
                if self.cnn.conv1 == 0 || self.cnn.conv2 == 0 || self.cnn.hidden == 0 {
                    return invalid("cnn widths must not be zero".into());
                }
            }
            ModelKind::Vit => {
                let VitConfig { patch, dim, hidden } = self.vit;
                if patch == 0 || self.image_size == 0 || self.image_size % patch != 0 {
                    return invalid(format!(
                        "image_size {} must be a positive multiple of the patch {patch}",
                        self.image_size
                    ));
                }
                if dim == 0 || hidden == 0 {
                    return invalid("vit sizes must not be zero".into());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TrainConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.run_name(), "vit-learn");
        assert_eq!(cfg.project, "Pests-Classification");
        assert_eq!(cfg.run_dir(), PathBuf::from("../Output/vit-learn"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model": "cnn", "epochs": 3, "optimizer": {{"kind": "gradient_descent"}}}}"#
        )
        .unwrap();

        let cfg = TrainConfig::from_json(file.path()).unwrap();
        assert_eq!(cfg.model, ModelKind::Cnn);
        assert_eq!(cfg.run_name(), "cnn");
        assert_eq!(cfg.epochs.get(), 3);
        assert_eq!(cfg.optimizer, OptimizerConfig::GradientDescent);
        assert_eq!(cfg.batch_size, TrainConfig::default().batch_size);
    }

    #[test]
    fn rejects_zero_epochs() {
        let res: std::result::Result<TrainConfig, _> = serde_json::from_str(r#"{"epochs": 0}"#);
        assert!(res.is_err());
    }

    #[test]
    fn rejects_patch_not_dividing_image() {
        let cfg = TrainConfig {
            image_size: 30,
            ..TrainConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TrainErr::InvalidConfig(_))));
    }

    #[test]
    fn rejects_non_positive_learning_rate() {
        let cfg = TrainConfig {
            learning_rate: 0.,
            ..TrainConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TrainErr::InvalidConfig(_))));
    }

    #[test]
    fn device_threads() {
        assert_eq!(Device::Cpu.threads(), 1);
        let two = Device::Parallel {
            threads: NonZeroUsize::new(2),
        };
        assert_eq!(two.threads(), 2);
        assert_eq!(two.build_pool().unwrap().current_num_threads(), 2);
    }
}
