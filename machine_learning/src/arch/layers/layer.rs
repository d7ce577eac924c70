use ndarray::{Array, ArrayD, Dimension, Ix2, Ix3, Ix4};
use rand::Rng;

use super::{
    Activation, Conv2d, Dense, FeedForward, Flatten, LayerNorm, MaxPool2d, MeanPool, PatchEmbed,
    SelfAttention, check_len,
};
use crate::{MlErr, Result, arch::activations::ActFn};

/// Every layer a `Sequential` can be made of.
///
/// Layers exchange dynamically shaped arrays, each variant checks that its input has the
/// dimensionality it works with.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    Conv2d(Conv2d),
    MaxPool2d(MaxPool2d),
    Activation(Activation),
    Flatten(Flatten),
    PatchEmbed(PatchEmbed),
    SelfAttention(SelfAttention),
    LayerNorm(LayerNorm),
    FeedForward(FeedForward),
    MeanPool(MeanPool),
}

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(Dense::new(dim, act_fn))
    }

    pub fn conv2d(in_channels: usize, out_channels: usize, kernel: usize, padding: usize) -> Self {
        Self::Conv2d(Conv2d::new(in_channels, out_channels, kernel, padding))
    }

    pub fn max_pool2d(size: usize) -> Self {
        Self::MaxPool2d(MaxPool2d::new(size))
    }

    pub fn activation(act_fn: ActFn) -> Self {
        Self::Activation(Activation::new(act_fn))
    }

    pub fn relu() -> Self {
        Self::activation(ActFn::relu())
    }

    pub fn flatten() -> Self {
        Self::Flatten(Flatten::new())
    }

    pub fn patch_embed(in_channels: usize, image_size: usize, patch: usize, dim: usize) -> Self {
        Self::PatchEmbed(PatchEmbed::new(in_channels, image_size, patch, dim))
    }

    pub fn self_attention(dim: usize) -> Self {
        Self::SelfAttention(SelfAttention::new(dim))
    }

    pub fn layer_norm(dim: usize) -> Self {
        Self::LayerNorm(LayerNorm::new(dim))
    }

    pub fn feed_forward(dim: usize, hidden: usize) -> Self {
        Self::FeedForward(FeedForward::new(dim, hidden))
    }

    pub fn mean_pool() -> Self {
        Self::MeanPool(MeanPool::new())
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Self::Dense(l) => l.size(),
            Self::Conv2d(l) => l.size(),
            Self::PatchEmbed(l) => l.size(),
            Self::SelfAttention(l) => l.size(),
            Self::LayerNorm(l) => l.size(),
            Self::FeedForward(l) => l.size(),
            Self::MaxPool2d(_) | Self::Activation(_) | Self::Flatten(_) | Self::MeanPool(_) => 0,
        }
    }

    /// A short name of the kind of layer, used to name its parameters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dense(_) => Dense::NAME,
            Self::Conv2d(_) => Conv2d::NAME,
            Self::MaxPool2d(_) => MaxPool2d::NAME,
            Self::Activation(_) => Activation::NAME,
            Self::Flatten(_) => Flatten::NAME,
            Self::PatchEmbed(_) => PatchEmbed::NAME,
            Self::SelfAttention(_) => SelfAttention::NAME,
            Self::LayerNorm(_) => LayerNorm::NAME,
            Self::FeedForward(_) => FeedForward::NAME,
            Self::MeanPool(_) => MeanPool::NAME,
        }
    }

    /// Returns the name and shape of each parameter tensor of this layer, in the order they are
    /// laid out in its parameter slice.
    pub fn param_blocks(&self) -> Vec<(&'static str, Vec<usize>)> {
        match self {
            Self::Dense(l) => l.param_blocks(),
            Self::Conv2d(l) => l.param_blocks(),
            Self::PatchEmbed(l) => l.param_blocks(),
            Self::SelfAttention(l) => l.param_blocks(),
            Self::LayerNorm(l) => l.param_blocks(),
            Self::FeedForward(l) => l.param_blocks(),
            Self::MaxPool2d(_) | Self::Activation(_) | Self::Flatten(_) | Self::MeanPool(_) => {
                Vec::new()
            }
        }
    }

    /// Initializes the parameters of this layer.
    ///
    /// # Arguments
    /// * `params` - The slice of parameters that corresponds to this layer.
    /// * `rng` - A random number generator.
    pub fn init_params<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        match self {
            Self::Dense(l) => l.init_params(params, rng),
            Self::Conv2d(l) => l.init_params(params, rng),
            Self::PatchEmbed(l) => l.init_params(params, rng),
            Self::SelfAttention(l) => l.init_params(params, rng),
            Self::LayerNorm(l) => l.init_params(params),
            Self::FeedForward(l) => l.init_params(params, rng),
            Self::MaxPool2d(_) | Self::Activation(_) | Self::Flatten(_) | Self::MeanPool(_) => {
                check_len(self.kind(), params.len(), 0)
            }
        }
    }

    /// Makes a forward pass through the layer, caching what the backward pass needs.
    ///
    /// # Arguments
    /// * `params` - The slice of parameters that corresponds to this layer.
    /// * `x` - The input of the layer.
    ///
    /// # Returns
    /// The output of the layer or an error if the input has the wrong shape.
    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let kind = self.kind();

        let y = match self {
            Self::Dense(l) => l.forward(params, cast::<Ix2>(kind, x)?)?.into_dyn(),
            Self::Conv2d(l) => l.forward(params, cast::<Ix4>(kind, x)?)?.into_dyn(),
            Self::MaxPool2d(l) => l.forward(cast::<Ix4>(kind, x)?)?.into_dyn(),
            Self::Activation(l) => l.forward(x),
            Self::Flatten(l) => l.forward(x)?,
            Self::PatchEmbed(l) => l.forward(params, cast::<Ix4>(kind, x)?)?.into_dyn(),
            Self::SelfAttention(l) => l.forward(params, cast::<Ix3>(kind, x)?)?.into_dyn(),
            Self::LayerNorm(l) => l.forward(params, x)?,
            Self::FeedForward(l) => l.forward(params, x)?,
            Self::MeanPool(l) => l.forward(cast::<Ix3>(kind, x)?)?.into_dyn(),
        };

        Ok(y)
    }

    /// Makes a forward pass through the layer without keeping any state.
    pub fn infer(&self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let kind = self.kind();

        let y = match self {
            Self::Dense(l) => l.infer(params, cast::<Ix2>(kind, x)?)?.into_dyn(),
            Self::Conv2d(l) => l.infer(params, cast::<Ix4>(kind, x)?)?.into_dyn(),
            Self::MaxPool2d(l) => l.infer(cast::<Ix4>(kind, x)?)?.into_dyn(),
            Self::Activation(l) => l.infer(x),
            Self::Flatten(l) => l.infer(x)?,
            Self::PatchEmbed(l) => l.infer(params, cast::<Ix4>(kind, x)?)?.into_dyn(),
            Self::SelfAttention(l) => l.infer(params, cast::<Ix3>(kind, x)?)?.into_dyn(),
            Self::LayerNorm(l) => l.infer(params, x)?,
            Self::FeedForward(l) => l.infer(params, x)?,
            Self::MeanPool(l) => l.infer(cast::<Ix3>(kind, x)?.view())?.into_dyn(),
        };

        Ok(y)
    }

    /// Makes a backward pass through the layer, accumulating into `grad` the gradient of its
    /// parameters.
    ///
    /// # Arguments
    /// * `params` - The slice of parameters that corresponds to this layer.
    /// * `grad` - The slice of the gradient that corresponds to this layer.
    /// * `d` - The gradient of the loss with respect to the output of the layer.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the input of the layer.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        let kind = self.kind();

        let dx = match self {
            Self::Dense(l) => l.backward(params, grad, cast::<Ix2>(kind, d)?)?.into_dyn(),
            Self::Conv2d(l) => l.backward(params, grad, cast::<Ix4>(kind, d)?)?.into_dyn(),
            Self::MaxPool2d(l) => l.backward(cast::<Ix4>(kind, d)?)?.into_dyn(),
            Self::Activation(l) => l.backward(d)?,
            Self::Flatten(l) => l.backward(d)?,
            Self::PatchEmbed(l) => l.backward(params, grad, cast::<Ix3>(kind, d)?)?.into_dyn(),
            Self::SelfAttention(l) => l.backward(params, grad, cast::<Ix3>(kind, d)?)?.into_dyn(),
            Self::LayerNorm(l) => l.backward(params, grad, d)?,
            Self::FeedForward(l) => l.backward(params, grad, d)?,
            Self::MeanPool(l) => l.backward(cast::<Ix2>(kind, d)?)?.into_dyn(),
        };

        Ok(dx)
    }
}

/// Converts a dynamically shaped array into one of a fixed dimensionality.
fn cast<D: Dimension>(layer: &'static str, x: ArrayD<f32>) -> Result<Array<f32, D>> {
    let got = x.shape().to_vec();
    x.into_dimensionality::<D>()
        .map_err(|_| MlErr::InvalidShape {
            layer,
            expected: dimensionality::<D>(),
            got,
        })
}

fn dimensionality<D: Dimension>() -> &'static str {
    match D::NDIM {
        Some(2) => "an array of 2 dimensions",
        Some(3) => "an array of 3 dimensions",
        Some(4) => "an array of 4 dimensions",
        _ => "an array of fixed dimensions",
    }
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use super::*;

    #[test]
    fn wrong_dimensionality() {
        let mut layer = Layer::max_pool2d(2);
        let res = layer.forward(&[], ArrayD::zeros(IxDyn(&[2, 4])));
        assert!(matches!(
            res,
            Err(MlErr::InvalidShape {
                layer: "max_pool2d",
                ..
            })
        ));
    }

    #[test]
    fn parameterless_layers() {
        for layer in [Layer::relu(), Layer::flatten(), Layer::mean_pool(), Layer::max_pool2d(2)] {
            assert_eq!(layer.size(), 0);
            assert!(layer.param_blocks().is_empty());
        }
    }

    #[test]
    fn blocks_cover_size() {
        let layers = [
            Layer::dense((3, 2), None),
            Layer::conv2d(3, 4, 3, 1),
            Layer::patch_embed(3, 8, 4, 6),
            Layer::self_attention(6),
            Layer::layer_norm(6),
            Layer::feed_forward(6, 12),
        ];

        for layer in layers {
            let total: usize = layer
                .param_blocks()
                .iter()
                .map(|(_, shape)| shape.iter().product::<usize>())
                .sum();
            assert_eq!(total, layer.size(), "{}", layer.kind());
        }
    }
}
