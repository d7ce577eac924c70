use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidShape {
        layer: &'static str,
        expected: &'static str,
        got: Vec<usize>,
    },
    Shape(ShapeError),
    NotForwarded {
        layer: &'static str,
    },
    InvalidLabel {
        label: usize,
        classes: usize,
    },
    EmptyBatch,
    InvalidDistribution(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => {
                format!(
                    "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
                )
            }
            MlErr::InvalidShape {
                layer,
                expected,
                got,
            } => format!("The {layer} layer expected an input of shape {expected}, got {got:?}"),
            MlErr::Shape(e) => format!("Failed to build an array view: {e}"),
            MlErr::NotForwarded { layer } => {
                format!("Tried to backpropagate through the {layer} layer before a forward pass")
            }
            MlErr::InvalidLabel { label, classes } => {
                format!("The label {label} is out of range for a model of {classes} classes")
            }
            MlErr::EmptyBatch => "Tried to compute the loss of an empty batch".to_string(),
            MlErr::InvalidDistribution(e) => {
                format!("Failed to build the initialization distribution: {e}")
            }
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}
