use std::ops::Range;

use ndarray::ArrayD;
use rand::Rng;

use super::{Model, layers::Layer};
use crate::{MlErr, ParamBlock, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    ranges: Vec<Range<usize>>,
    size: usize,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<_> = layers.into_iter().collect();
        let mut ranges = Vec::with_capacity(layers.len());
        let mut offset = 0;

        for layer in &layers {
            ranges.push(offset..offset + layer.size());
            offset += layer.size();
        }

        Self {
            layers,
            ranges,
            size: offset,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn check_params(&self, got: usize) -> Result<()> {
        if got != self.size {
            return Err(MlErr::SizeMismatch {
                a: "params",
                b: "model",
                got,
                expected: self.size,
            });
        }

        Ok(())
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.size
    }

    fn param_blocks(&self) -> Vec<ParamBlock> {
        let mut blocks = Vec::new();

        for (i, (layer, range)) in self.layers.iter().zip(&self.ranges).enumerate() {
            let mut offset = range.start;

            for (name, shape) in layer.param_blocks() {
                let len: usize = shape.iter().product();
                blocks.push(ParamBlock {
                    name: format!("{i}.{}.{name}", layer.kind()),
                    shape,
                    range: offset..offset + len,
                });
                offset += len;
            }
        }

        blocks
    }

    fn init_params<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        self.check_params(params.len())?;

        for (layer, range) in self.layers.iter().zip(&self.ranges) {
            layer.init_params(&mut params[range.clone()], rng)?;
        }

        Ok(())
    }

    fn forward(&mut self, params: &[f32], mut x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.check_params(params.len())?;

        for (layer, range) in self.layers.iter_mut().zip(&self.ranges) {
            x = layer.forward(&params[range.clone()], x)?;
        }

        Ok(x)
    }

    fn infer(&self, params: &[f32], mut x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.check_params(params.len())?;

        for (layer, range) in self.layers.iter().zip(&self.ranges) {
            x = layer.infer(&params[range.clone()], x)?;
        }

        Ok(x)
    }

    fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        self.check_params(params.len())?;
        self.check_params(grad.len())?;

        for (layer, range) in self.layers.iter_mut().zip(&self.ranges).rev() {
            d = layer.backward(&params[range.clone()], &mut grad[range.clone()], d)?;
        }

        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, IxDyn};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::activations::ActFn;

    fn mlp() -> Sequential {
        Sequential::new([
            Layer::dense((3, 4), Some(ActFn::relu())),
            Layer::dense((4, 2), None),
        ])
    }

    #[test]
    fn blocks_are_named_by_position_and_kind() {
        let model = mlp();
        let blocks = model.param_blocks();
        let names: Vec<_> = blocks.iter().map(|b| b.name.as_str()).collect();

        assert_eq!(
            names,
            ["0.dense.weight", "0.dense.bias", "1.dense.weight", "1.dense.bias"]
        );
        assert_eq!(blocks[2].range, 16..24);
        assert_eq!(blocks.last().map(|b| b.range.end), Some(model.size()));
    }

    #[test]
    fn rejects_wrong_amount_of_params() {
        let model = mlp();
        let res = model.infer(&[0.; 3], Array2::zeros((1, 3)).into_dyn());
        assert!(matches!(res, Err(MlErr::SizeMismatch { .. })));
    }

    #[test]
    fn forward_and_backward_shapes() {
        let mut model = mlp();
        let mut params = vec![0.; model.size()];
        model
            .init_params(&mut params, &mut StdRng::seed_from_u64(3))
            .unwrap();

        let x = ArrayD::ones(IxDyn(&[5, 3]));
        let y = model.forward(&params, x.clone()).unwrap();
        assert_eq!(y.shape(), &[5, 2]);
        assert_eq!(model.infer(&params, x).unwrap(), y);

        let mut grad = vec![0.; model.size()];
        let dx = model.backward(&params, &mut grad, ArrayD::ones(IxDyn(&[5, 2]))).unwrap();
        assert_eq!(dx.shape(), &[5, 3]);
        assert!(grad.iter().any(|&g| g != 0.));
    }
}
