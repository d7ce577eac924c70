use ndarray::prelude::*;

use crate::{MlErr, Result};

/// Averages a sequence of token embeddings, `(batch, tokens, dim)` into `(batch, dim)`.
#[derive(Debug, Clone, Default)]
pub struct MeanPool {
    tokens: Option<usize>,
}

impl MeanPool {
    pub const NAME: &'static str = "mean_pool";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: Array3<f32>) -> Result<Array2<f32>> {
        let out = self.infer(x.view())?;
        self.tokens = Some(x.dim().1);
        Ok(out)
    }

    pub fn infer(&self, x: ArrayView3<f32>) -> Result<Array2<f32>> {
        x.mean_axis(Axis(1)).ok_or_else(|| MlErr::InvalidShape {
            layer: Self::NAME,
            expected: "(batch, tokens, dim) with at least one token",
            got: x.shape().to_vec(),
        })
    }

    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array3<f32>> {
        let tokens = self
            .tokens
            .take()
            .ok_or(MlErr::NotForwarded { layer: Self::NAME })?;
        let (n, dim) = d.dim();

        let spread = d.insert_axis(Axis(1));
        let spread = spread
            .broadcast((n, tokens, dim))
            .ok_or_else(|| MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, dim)",
                got: vec![n, dim],
            })?;

        Ok(spread.to_owned() / tokens as f32)
    }
}
