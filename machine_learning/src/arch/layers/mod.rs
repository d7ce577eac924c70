mod activation;
mod conv2d;
mod dense;
mod feed_forward;
mod flatten;
#[cfg(test)]
mod gradcheck;
mod layer;
mod layer_norm;
mod max_pool;
mod mean_pool;
mod patch_embed;
mod self_attention;

pub use activation::Activation;
pub use conv2d::Conv2d;
pub use dense::Dense;
pub use feed_forward::FeedForward;
pub use flatten::Flatten;
pub use layer::Layer;
pub use layer_norm::LayerNorm;
pub use max_pool::MaxPool2d;
pub use mean_pool::MeanPool;
pub use patch_embed::PatchEmbed;
pub use self_attention::SelfAttention;

use std::mem;

use crate::{MlErr, Result};

/// Checks that a layer was handed exactly the amount of parameters it needs.
fn check_len(layer: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            a: layer,
            b: "params",
            got,
            expected,
        });
    }

    Ok(())
}

/// Splits a parameter slice in consecutive chunks of the given sizes.
fn split<'a, const N: usize>(mut rest: &'a [f32], sizes: [usize; N]) -> [&'a [f32]; N] {
    sizes.map(|size| {
        let (chunk, tail) = rest.split_at(size);
        rest = tail;
        chunk
    })
}

/// Splits a gradient slice in consecutive chunks of the given sizes.
fn split_mut<'a, const N: usize>(mut rest: &'a mut [f32], sizes: [usize; N]) -> [&'a mut [f32]; N] {
    sizes.map(|size| {
        let (chunk, tail) = mem::take(&mut rest).split_at_mut(size);
        rest = tail;
        chunk
    })
}
