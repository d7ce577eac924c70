use ndarray::prelude::*;

use super::{check_len, split, split_mut};
use crate::{MlErr, Result, initialization::constant};

const EPSILON: f32 = 1e-5;

/// Normalizes the last axis of its input to zero mean and unit variance, then applies a learned
/// gain and bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    dim: usize,

    // Forward metadata
    xhat: Option<Array2<f32>>,
    inv_std: Option<Array1<f32>>,
    shape: Option<Vec<usize>>,
}

impl LayerNorm {
    pub const NAME: &'static str = "layer_norm";

    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            xhat: None,
            inv_std: None,
            shape: None,
        }
    }

    pub fn size(&self) -> usize {
        2 * self.dim
    }

    pub fn param_blocks(&self) -> Vec<(&'static str, Vec<usize>)> {
        vec![("gain", vec![self.dim]), ("bias", vec![self.dim])]
    }

    pub fn init_params(&self, params: &mut [f32]) -> Result<()> {
        check_len(Self::NAME, params.len(), self.size())?;
        let [gain, bias] = split_mut(params, [self.dim; 2]);
        constant(gain, 1.);
        constant(bias, 0.);
        Ok(())
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = x.shape().to_vec();
        let (xhat, inv_std) = self.normalize(x)?;
        let y = self.affine(params, &xhat)?;

        self.xhat = Some(xhat);
        self.inv_std = Some(inv_std);
        self.shape = Some(shape.clone());

        Ok(y.into_shape_with_order(shape)?)
    }

    pub fn infer(&self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = x.shape().to_vec();
        let (xhat, _) = self.normalize(x)?;
        let y = self.affine(params, &xhat)?;
        Ok(y.into_shape_with_order(shape)?)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        let xhat = self.xhat.take().ok_or(MlErr::NotForwarded { layer: Self::NAME })?;
        let inv_std = self
            .inv_std
            .take()
            .ok_or(MlErr::NotForwarded { layer: Self::NAME })?;
        let shape = self.shape.take().ok_or(MlErr::NotForwarded { layer: Self::NAME })?;

        if d.shape() != shape.as_slice() {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "the shape of the forwarded input",
                got: d.shape().to_vec(),
            });
        }

        let d = d.to_shape(xhat.dim())?.into_owned();

        check_len(Self::NAME, grad.len(), self.size())?;
        let [dgain, dbias] = split_mut(grad, [self.dim; 2]);
        let mut dgain = ArrayViewMut1::from_shape(self.dim, dgain)?;
        let mut dbias = ArrayViewMut1::from_shape(self.dim, dbias)?;
        dgain += &(&d * &xhat).sum_axis(Axis(0));
        dbias += &d.sum_axis(Axis(0));

        let (gain, _) = self.view_params(params)?;
        let dxhat = d * &gain;

        let n = self.dim as f32;
        let sum = dxhat.sum_axis(Axis(1)).insert_axis(Axis(1));
        let dot = (&dxhat * &xhat).sum_axis(Axis(1)).insert_axis(Axis(1));
        let inv_std = inv_std.insert_axis(Axis(1));

        let dx = (dxhat * n - &sum - &(&xhat * &dot)) * &inv_std / n;
        Ok(dx.into_shape_with_order(shape)?)
    }

    /// Flattens every axis but the last one and normalizes each row.
    ///
    /// # Returns
    /// The normalized rows and the inverse standard deviation of each one.
    fn normalize(&self, x: ArrayD<f32>) -> Result<(Array2<f32>, Array1<f32>)> {
        if x.shape().last() != Some(&self.dim) {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(.., dim)",
                got: x.shape().to_vec(),
            });
        }

        let rows = x.len() / self.dim.max(1);
        let mut x = x.to_shape((rows, self.dim))?.into_owned();

        let mean = x.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(rows));
        x -= &mean.insert_axis(Axis(1));

        let var = x.mapv(|v| v * v).mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(rows));
        let inv_std = var.mapv(|v| 1. / (v + EPSILON).sqrt());
        x *= &inv_std.view().insert_axis(Axis(1));

        Ok((x, inv_std))
    }

    fn affine(&self, params: &[f32], xhat: &Array2<f32>) -> Result<Array2<f32>> {
        let (gain, bias) = self.view_params(params)?;
        Ok(xhat * &gain + &bias)
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView1<'a, f32>, ArrayView1<'a, f32>)> {
        check_len(Self::NAME, params.len(), self.size())?;
        let [gain, bias] = split(params, [self.dim; 2]);
        Ok((
            ArrayView1::from_shape(self.dim, gain)?,
            ArrayView1::from_shape(self.dim, bias)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::{Layer, gradcheck};

    #[test]
    fn normalizes_last_axis() {
        let norm = LayerNorm::new(4);
        let mut params = vec![0.; norm.size()];
        norm.init_params(&mut params).unwrap();

        let x = array![[1., 2., 3., 4.], [10., 10., 10., 10.]].into_dyn();
        let y = norm.infer(&params, x).unwrap();

        for row in y.rows() {
            assert!(row.sum().abs() < 1e-5);
        }
        assert!(y.slice(s![1, ..]).iter().all(|v| v.abs() < 1e-5));
        assert!((y.slice(s![0, ..]).mapv(|v| v * v).mean().unwrap() - 1.).abs() < 1e-3);
    }

    #[test]
    fn wrong_last_axis() {
        let norm = LayerNorm::new(3);
        let params = vec![1.; norm.size()];
        let res = norm.infer(&params, Array2::zeros((2, 4)).into_dyn());
        assert!(matches!(res, Err(MlErr::InvalidShape { .. })));
    }

    #[test]
    fn gradients() {
        let x = gradcheck::random_input(&[2, 3, 4], 31);
        gradcheck::check(Layer::layer_norm(4), x, 32);
    }
}
