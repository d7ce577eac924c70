use std::{error::Error, fmt, io, path::PathBuf};

use machine_learning::MlErr;
use rayon::ThreadPoolBuildError;
use safetensors::SafeTensorError;

/// The trainer's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Everything that can abort a training run.
#[derive(Debug)]
pub enum TrainErr {
    Io(io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    /// An image of the dataset couldn't be decoded.
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    /// A row of a dataset table is unusable.
    InvalidSample {
        path: PathBuf,
        row: usize,
        msg: String,
    },
    /// Invalid configuration, caught before any work is done.
    InvalidConfig(String),
    SafeTensors(SafeTensorError),
    /// A checkpoint doesn't match the model it's being loaded into.
    Checkpoint(String),
    ThreadPool(ThreadPoolBuildError),
    Ml(MlErr),
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Csv(e) => write!(f, "csv error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Image { path, source } => {
                write!(f, "failed to decode image {}: {source}", path.display())
            }
            Self::InvalidSample { path, row, msg } => {
                write!(f, "invalid sample at row {row} of {}: {msg}", path.display())
            }
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::SafeTensors(e) => write!(f, "safetensors error: {e}"),
            Self::Checkpoint(msg) => write!(f, "invalid checkpoint: {msg}"),
            Self::ThreadPool(e) => write!(f, "failed to build a thread pool: {e}"),
            Self::Ml(e) => write!(f, "{e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Csv(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Image { source, .. } => Some(source),
            Self::SafeTensors(e) => Some(e),
            Self::ThreadPool(e) => Some(e),
            Self::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for TrainErr {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<SafeTensorError> for TrainErr {
    fn from(e: SafeTensorError) -> Self {
        Self::SafeTensors(e)
    }
}

impl From<ThreadPoolBuildError> for TrainErr {
    fn from(e: ThreadPoolBuildError) -> Self {
        Self::ThreadPool(e)
    }
}

impl From<MlErr> for TrainErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}
