use ndarray::{ArrayD, IxDyn};

use crate::{MlErr, Result};

/// Collapses every axis but the batch one.
#[derive(Debug, Clone, Default)]
pub struct Flatten {
    shape: Option<Vec<usize>>,
}

impl Flatten {
    pub const NAME: &'static str = "flatten";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = x.shape().to_vec();
        let out = self.infer(x)?;
        self.shape = Some(shape);
        Ok(out)
    }

    pub fn infer(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some((&n, rest)) = x.shape().split_first() else {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, ..)",
                got: Vec::new(),
            });
        };

        let features = rest.iter().product::<usize>();
        Ok(x.to_shape((n, features))?.into_owned().into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = self
            .shape
            .take()
            .ok_or(MlErr::NotForwarded { layer: Self::NAME })?;

        Ok(d.to_shape(IxDyn(&shape))?.into_owned())
    }
}
