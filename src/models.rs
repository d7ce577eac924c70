use machine_learning::arch::{Sequential, activations::ActFn, layers::Layer};
use serde::{Deserialize, Serialize};

use crate::config::{CnnConfig, TrainConfig, VitConfig};

/// Input images are RGB.
pub const CHANNELS: usize = 3;

/// The model variants a run can train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Cnn,
    Vit,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cnn => "cnn",
            Self::Vit => "vit",
        }
    }

    /// The run name used when the configuration doesn't set one.
    pub fn default_run_name(&self) -> &'static str {
        match self {
            Self::Cnn => "cnn",
            Self::Vit => "vit-learn",
        }
    }

    /// Builds the architecture of this variant for the configured image size and classes.
    pub fn build(&self, cfg: &TrainConfig) -> Sequential {
        match self {
            Self::Cnn => cnn(&cfg.cnn, cfg.image_size, cfg.num_classes),
            Self::Vit => vit(&cfg.vit, cfg.image_size, cfg.num_classes),
        }
    }
}

/// Two convolution blocks followed by a two layer classifier head.
fn cnn(cfg: &CnnConfig, image_size: usize, classes: usize) -> Sequential {
    let side = image_size / 2 / 2;

    Sequential::new([
        Layer::conv2d(CHANNELS, cfg.conv1, 3, 1),
        Layer::relu(),
        Layer::max_pool2d(2),
        Layer::conv2d(cfg.conv1, cfg.conv2, 3, 1),
        Layer::relu(),
        Layer::max_pool2d(2),
        Layer::flatten(),
        Layer::dense((cfg.conv2 * side * side, cfg.hidden), Some(ActFn::relu())),
        Layer::dense((cfg.hidden, classes), None),
    ])
}

/// A single post-norm encoder block over patch embeddings, mean pooled into a linear head.
fn vit(cfg: &VitConfig, image_size: usize, classes: usize) -> Sequential {
    let VitConfig { patch, dim, hidden } = *cfg;

    Sequential::new([
        Layer::patch_embed(CHANNELS, image_size, patch, dim),
        Layer::self_attention(dim),
        Layer::layer_norm(dim),
        Layer::feed_forward(dim, hidden),
        Layer::layer_norm(dim),
        Layer::mean_pool(),
        Layer::dense((dim, classes), None),
    ])
}
