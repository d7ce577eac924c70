use ndarray::{linalg, prelude::*};
use rand::Rng;

use super::{check_len, split, split_mut};
use crate::{
    MlErr, Result,
    arch::activations::ActFn,
    initialization::{constant, kaiming, xavier},
};

/// Position-wise two layer perceptron with a GELU in between and a residual connection:
/// `y = x + gelu(x w1 + b1) w2 + b2`, applied to every token independently.
#[derive(Debug, Clone)]
pub struct FeedForward {
    dim: usize,
    hidden: usize,

    // Forward metadata
    x: Option<Array2<f32>>,
    z: Option<Array2<f32>>,
    shape: Option<Vec<usize>>,
}

type Weights<'a> = (
    ArrayView2<'a, f32>,
    ArrayView1<'a, f32>,
    ArrayView2<'a, f32>,
    ArrayView1<'a, f32>,
);

impl FeedForward {
    pub const NAME: &'static str = "feed_forward";

    /// Creates a new `FeedForward` block.
    ///
    /// # Arguments
    /// * `dim` - The size of each token.
    /// * `hidden` - The size of the inner projection.
    pub fn new(dim: usize, hidden: usize) -> Self {
        Self {
            dim,
            hidden,
            x: None,
            z: None,
            shape: None,
        }
    }

    fn sizes(&self) -> [usize; 4] {
        [self.dim * self.hidden, self.hidden, self.hidden * self.dim, self.dim]
    }

    pub fn size(&self) -> usize {
        self.sizes().iter().sum()
    }

    pub fn param_blocks(&self) -> Vec<(&'static str, Vec<usize>)> {
        vec![
            ("fc1.weight", vec![self.dim, self.hidden]),
            ("fc1.bias", vec![self.hidden]),
            ("fc2.weight", vec![self.hidden, self.dim]),
            ("fc2.bias", vec![self.dim]),
        ]
    }

    pub fn init_params<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        check_len(Self::NAME, params.len(), self.size())?;
        let [w1, b1, w2, b2] = split_mut(params, self.sizes());
        kaiming(w1, self.dim, rng)?;
        constant(b1, 0.);
        xavier(w2, self.hidden, self.dim, rng)?;
        constant(b2, 0.);
        Ok(())
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = x.shape().to_vec();
        let x = self.tokens(x)?;
        let (w1, b1, w2, b2) = self.view_params(params)?;

        let z = x.dot(&w1) + &b1;
        let h = z.mapv(|z| ActFn::Gelu.f(z));
        let y = &x + &(h.dot(&w2) + &b2);

        self.x = Some(x);
        self.z = Some(z);
        self.shape = Some(shape.clone());

        Ok(y.into_shape_with_order(shape)?)
    }

    pub fn infer(&self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = x.shape().to_vec();
        let x = self.tokens(x)?;
        let (w1, b1, w2, b2) = self.view_params(params)?;

        let mut h = x.dot(&w1) + &b1;
        h.par_mapv_inplace(|z| ActFn::Gelu.f(z));
        let y = x + &(h.dot(&w2) + &b2);

        Ok(y.into_shape_with_order(shape)?)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        let x = self.x.take().ok_or(MlErr::NotForwarded { layer: Self::NAME })?;
        let z = self.z.take().ok_or(MlErr::NotForwarded { layer: Self::NAME })?;
        let shape = self.shape.take().ok_or(MlErr::NotForwarded { layer: Self::NAME })?;

        if d.shape() != shape.as_slice() {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "the shape of the forwarded input",
                got: d.shape().to_vec(),
            });
        }

        let d = d.to_shape(x.dim())?.into_owned();
        let (w1, _, w2, _) = self.view_params(params)?;

        check_len(Self::NAME, grad.len(), self.size())?;
        let [dw1, db1, dw2, db2] = split_mut(grad, self.sizes());
        let mut dw1 = ArrayViewMut2::from_shape((self.dim, self.hidden), dw1)?;
        let mut db1 = ArrayViewMut1::from_shape(self.hidden, db1)?;
        let mut dw2 = ArrayViewMut2::from_shape((self.hidden, self.dim), dw2)?;
        let mut db2 = ArrayViewMut1::from_shape(self.dim, db2)?;

        let h = z.mapv(|z| ActFn::Gelu.f(z));
        linalg::general_mat_mul(1.0, &h.t(), &d, 1.0, &mut dw2);
        db2 += &d.sum_axis(Axis(0));

        let mut dz = d.dot(&w2.t());
        dz.zip_mut_with(&z, |dz, &z| *dz *= ActFn::Gelu.df(z));

        linalg::general_mat_mul(1.0, &x.t(), &dz, 1.0, &mut dw1);
        db1 += &dz.sum_axis(Axis(0));

        let dx = d + &dz.dot(&w1.t());
        Ok(dx.into_shape_with_order(shape)?)
    }

    /// Flattens every axis but the last one, leaving a token per row.
    fn tokens(&self, x: ArrayD<f32>) -> Result<Array2<f32>> {
        if x.shape().last() != Some(&self.dim) {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(.., dim)",
                got: x.shape().to_vec(),
            });
        }

        let rows = x.len() / self.dim.max(1);
        Ok(x.to_shape((rows, self.dim))?.into_owned())
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> Result<Weights<'a>> {
        check_len(Self::NAME, params.len(), self.size())?;
        let [w1, b1, w2, b2] = split(params, self.sizes());

        Ok((
            ArrayView2::from_shape((self.dim, self.hidden), w1)?,
            ArrayView1::from_shape(self.hidden, b1)?,
            ArrayView2::from_shape((self.hidden, self.dim), w2)?,
            ArrayView1::from_shape(self.dim, b2)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::{Layer, gradcheck};

    #[test]
    fn zero_weights_is_identity() {
        let ff = FeedForward::new(3, 5);
        let params = vec![0.; ff.size()];
        let x = array![[[1., -2., 3.], [0.5, 0., -1.]]].into_dyn();
        assert_eq!(ff.infer(&params, x.clone()).unwrap(), x);
    }

    #[test]
    fn gradients() {
        let x = gradcheck::random_input(&[2, 3, 4], 41);
        gradcheck::check(Layer::feed_forward(4, 6), x, 42);
    }
}
