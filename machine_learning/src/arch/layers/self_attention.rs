use std::mem;

use ndarray::prelude::*;
use rand::Rng;
use rayon::prelude::*;

use super::{check_len, split, split_mut};
use crate::{MlErr, Result, arch::ops::softmax_rows, initialization::xavier};

/// Single head scaled dot-product self-attention with a residual connection:
/// `y = x + softmax(q k^T / sqrt(dim)) v w_o`.
#[derive(Debug, Clone)]
pub struct SelfAttention {
    dim: usize,

    // Forward metadata, one entry per sample
    caches: Vec<AttentionCache>,
}

#[derive(Debug, Clone)]
struct AttentionCache {
    x: Array2<f32>,
    q: Array2<f32>,
    k: Array2<f32>,
    v: Array2<f32>,
    a: Array2<f32>,
    h: Array2<f32>,
}

type Projections<'a> = [ArrayView2<'a, f32>; 4];

impl SelfAttention {
    pub const NAME: &'static str = "self_attention";

    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            caches: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        4 * self.dim * self.dim
    }

    pub fn param_blocks(&self) -> Vec<(&'static str, Vec<usize>)> {
        let shape = vec![self.dim, self.dim];
        ["query", "key", "value", "output"]
            .into_iter()
            .map(|name| (name, shape.clone()))
            .collect()
    }

    pub fn init_params<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        check_len(Self::NAME, params.len(), self.size())?;

        for w in split_mut(params, [self.dim * self.dim; 4]) {
            xavier(w, self.dim, self.dim, rng)?;
        }

        Ok(())
    }

    pub fn forward(&mut self, params: &[f32], x: Array3<f32>) -> Result<Array3<f32>> {
        let (out, caches) = self.attend_batch(params, x.view())?;
        self.caches = caches;
        Ok(out)
    }

    pub fn infer(&self, params: &[f32], x: Array3<f32>) -> Result<Array3<f32>> {
        let (out, _) = self.attend_batch(params, x.view())?;
        Ok(out)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array3<f32>,
    ) -> Result<Array3<f32>> {
        let caches = mem::take(&mut self.caches);
        let Some(first) = caches.first() else {
            return Err(MlErr::NotForwarded { layer: Self::NAME });
        };

        if d.dim() != (caches.len(), first.x.nrows(), self.dim) {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, tokens, dim)",
                got: d.shape().to_vec(),
            });
        }

        let w = self.view_params(params)?;
        let scale = self.scale();

        let per_sample: Vec<_> = caches
            .par_iter()
            .enumerate()
            .map(|(i, cache)| attend_backward(&w, cache, d.index_axis(Axis(0), i), scale))
            .collect();

        check_len(Self::NAME, grad.len(), self.size())?;
        let mut dws = Vec::with_capacity(4);
        for chunk in split_mut(grad, [self.dim * self.dim; 4]) {
            dws.push(ArrayViewMut2::from_shape((self.dim, self.dim), chunk)?);
        }

        let mut dx = Array3::zeros(d.dim());

        for (i, (dw_i, dx_i)) in per_sample.into_iter().enumerate() {
            for (dw, dw_i) in dws.iter_mut().zip(&dw_i) {
                *dw += dw_i;
            }
            dx.index_axis_mut(Axis(0), i).assign(&dx_i);
        }

        Ok(dx)
    }

    fn scale(&self) -> f32 {
        1. / (self.dim as f32).sqrt()
    }

    fn attend_batch(
        &self,
        params: &[f32],
        x: ArrayView3<f32>,
    ) -> Result<(Array3<f32>, Vec<AttentionCache>)> {
        let (n, _, dim) = x.dim();

        if dim != self.dim {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, tokens, dim)",
                got: x.shape().to_vec(),
            });
        }

        let w = self.view_params(params)?;
        let scale = self.scale();

        let per_sample: Vec<_> = (0..n)
            .into_par_iter()
            .map(|i| attend(&w, x.index_axis(Axis(0), i), scale))
            .collect();

        let mut out = Array3::zeros(x.dim());
        let mut caches = Vec::with_capacity(n);

        for (i, (y, cache)) in per_sample.into_iter().enumerate() {
            out.index_axis_mut(Axis(0), i).assign(&y);
            caches.push(cache);
        }

        Ok((out, caches))
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> Result<Projections<'a>> {
        check_len(Self::NAME, params.len(), self.size())?;
        let [wq, wk, wv, wo] = split(params, [self.dim * self.dim; 4]);
        let dim = (self.dim, self.dim);

        Ok([
            ArrayView2::from_shape(dim, wq)?,
            ArrayView2::from_shape(dim, wk)?,
            ArrayView2::from_shape(dim, wv)?,
            ArrayView2::from_shape(dim, wo)?,
        ])
    }
}

fn attend(w: &Projections, x: ArrayView2<f32>, scale: f32) -> (Array2<f32>, AttentionCache) {
    let q = x.dot(&w[0]);
    let k = x.dot(&w[1]);
    let v = x.dot(&w[2]);

    let mut a = q.dot(&k.t()) * scale;
    softmax_rows(&mut a);

    let h = a.dot(&v);
    let y = &x + &h.dot(&w[3]);

    let cache = AttentionCache {
        x: x.to_owned(),
        q,
        k,
        v,
        a,
        h,
    };

    (y, cache)
}

/// Returns the gradients of the four projections and the gradient of the input.
fn attend_backward(
    w: &Projections,
    c: &AttentionCache,
    d: ArrayView2<f32>,
    scale: f32,
) -> ([Array2<f32>; 4], Array2<f32>) {
    let dwo = c.h.t().dot(&d);
    let dh = d.dot(&w[3].t());

    let da = dh.dot(&c.v.t());
    let dv = c.a.t().dot(&dh);

    // Softmax backward, row by row: a * (da - sum(da * a)).
    let a_da = &c.a * &da;
    let row_dot = a_da.sum_axis(Axis(1)).insert_axis(Axis(1));
    let ds = (a_da - &(&c.a * &row_dot)) * scale;

    let dq = ds.dot(&c.k);
    let dk = ds.t().dot(&c.q);

    let dwq = c.x.t().dot(&dq);
    let dwk = c.x.t().dot(&dk);
    let dwv = c.x.t().dot(&dv);

    let mut dx = d.to_owned();
    dx += &dq.dot(&w[0].t());
    dx += &dk.dot(&w[1].t());
    dx += &dv.dot(&w[2].t());

    ([dwq, dwk, dwv, dwo], dx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::{Layer, gradcheck};

    #[test]
    fn zero_output_projection_is_identity() {
        let attention = SelfAttention::new(2);
        let mut params = vec![0.3; attention.size()];
        params[12..].fill(0.);

        let x = array![[[1., 2.], [3., 4.], [5., 6.]]];
        assert_eq!(attention.infer(&params, x.clone()).unwrap(), x);
    }

    #[test]
    fn backward_without_forward() {
        let mut attention = SelfAttention::new(2);
        let mut grad = vec![0.; attention.size()];
        let params = grad.clone();
        let res = attention.backward(&params, &mut grad, Array3::zeros((1, 1, 2)));
        assert!(matches!(res, Err(MlErr::NotForwarded { .. })));
    }

    #[test]
    fn gradients() {
        let x = gradcheck::random_input(&[2, 3, 4], 21);
        gradcheck::check(Layer::self_attention(4), x, 22);
    }
}
