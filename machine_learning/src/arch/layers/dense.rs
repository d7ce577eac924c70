use ndarray::{linalg, prelude::*};
use rand::Rng;

use super::check_len;
use crate::{
    MlErr, Result,
    arch::activations::ActFn,
    initialization::{constant, kaiming, xavier},
};

/// A fully connected layer with an optional activation function.
///
/// Optimizations:
///   1. Find a way to not copy `x` in each `Dense::forward` call.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Option<Array2<f32>>,
    z: Option<Array2<f32>>,
}

impl Dense {
    pub const NAME: &'static str = "dense";

    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The amount of inputs and outputs of the layer.
    /// * `act_fn` - The activation applied to the outputs, if any.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: None,
            z: None,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn param_blocks(&self) -> Vec<(&'static str, Vec<usize>)> {
        let (n, m) = self.dim;
        vec![("weight", vec![n, m]), ("bias", vec![m])]
    }

    pub fn init_params<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        check_len(Self::NAME, params.len(), self.size)?;
        let (n, m) = self.dim;
        let (w, b) = params.split_at_mut(n * m);

        match self.act_fn {
            Some(_) => kaiming(w, n, rng)?,
            None => xavier(w, n, m, rng)?,
        }

        constant(b, 0.);
        Ok(())
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>) -> Result<Array2<f32>> {
        let z = self.linear(params, x.view())?;
        self.x = Some(x);

        let Some(act_fn) = self.act_fn else {
            return Ok(z);
        };

        let a = z.mapv(|z| act_fn.f(z));
        self.z = Some(z);
        Ok(a)
    }

    pub fn infer(&self, params: &[f32], x: Array2<f32>) -> Result<Array2<f32>> {
        let mut z = self.linear(params, x.view())?;

        if let Some(act_fn) = self.act_fn {
            z.mapv_inplace(|z| act_fn.f(z));
        }

        Ok(z)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let x = self.x.take().ok_or(MlErr::NotForwarded { layer: Self::NAME })?;

        if d.dim() != (x.nrows(), self.dim.1) {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, outputs)",
                got: d.shape().to_vec(),
            });
        }

        if let Some(act_fn) = self.act_fn {
            let z = self.z.take().ok_or(MlErr::NotForwarded { layer: Self::NAME })?;
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    fn linear(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, inputs)",
                got: x.shape().to_vec(),
            });
        }

        let (w, b) = self.view_params(params)?;
        Ok(x.dot(&w) + &b)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    ///
    /// # Arguments
    /// * `grad` - A gradient slice.
    ///
    /// # Returns
    /// A tuple containing the delta weights and delta biases.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        check_len(Self::NAME, grad.len(), self.size)?;
        let (dw_raw, db_raw) = grad.split_at_mut(self.size - self.dim.1);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    ///
    /// # Arguments
    /// * `params` - A slice of parameters.
    ///
    /// # Returns
    /// A tuple containing the weights and biases.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        check_len(Self::NAME, params.len(), self.size)?;
        let (w_raw, b_raw) = params.split_at(self.size - self.dim.1);
        let weights = ArrayView2::from_shape(self.dim, w_raw)?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((weights, biases))
    }
}
