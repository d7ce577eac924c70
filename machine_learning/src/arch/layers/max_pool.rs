use ndarray::prelude::*;

use crate::{MlErr, Result};

/// Non overlapping 2D max pooling, trailing rows and columns that don't fill a window are
/// dropped.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    size: usize,

    // Forward metadata
    argmax: Option<Array4<usize>>,
    input_dim: Option<(usize, usize, usize, usize)>,
}

impl MaxPool2d {
    pub const NAME: &'static str = "max_pool2d";

    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            argmax: None,
            input_dim: None,
        }
    }

    pub fn forward(&mut self, x: Array4<f32>) -> Result<Array4<f32>> {
        let (out, argmax) = self.pool(x.view())?;
        self.argmax = Some(argmax);
        self.input_dim = Some(x.dim());
        Ok(out)
    }

    pub fn infer(&self, x: Array4<f32>) -> Result<Array4<f32>> {
        let (out, _) = self.pool(x.view())?;
        Ok(out)
    }

    pub fn backward(&mut self, d: Array4<f32>) -> Result<Array4<f32>> {
        let argmax = self
            .argmax
            .take()
            .ok_or(MlErr::NotForwarded { layer: Self::NAME })?;
        let (n, c, h, w) = self
            .input_dim
            .take()
            .ok_or(MlErr::NotForwarded { layer: Self::NAME })?;

        if d.dim() != argmax.dim() {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "the shape of the pooled output",
                got: d.shape().to_vec(),
            });
        }

        let mut dx = Array4::zeros((n, c, h, w));
        for ((ni, ci, oy, ox), &g) in d.indexed_iter() {
            let at = argmax[[ni, ci, oy, ox]];
            dx[[ni, ci, at / w, at % w]] += g;
        }

        Ok(dx)
    }

    fn pool(&self, x: ArrayView4<f32>) -> Result<(Array4<f32>, Array4<usize>)> {
        let (n, c, h, w) = x.dim();
        let s = self.size;
        let (ho, wo) = (h / s, w / s);

        if ho == 0 || wo == 0 {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "an image at least as large as the pooling window",
                got: x.shape().to_vec(),
            });
        }

        let mut out = Array4::zeros((n, c, ho, wo));
        let mut argmax = Array4::zeros((n, c, ho, wo));

        for ((ni, ci, oy, ox), o) in out.indexed_iter_mut() {
            let mut best = x[[ni, ci, oy * s, ox * s]];
            let mut best_at = oy * s * w + ox * s;

            for ky in 0..s {
                for kx in 0..s {
                    let (iy, ix) = (oy * s + ky, ox * s + kx);
                    let v = x[[ni, ci, iy, ix]];
                    if v > best {
                        best = v;
                        best_at = iy * w + ix;
                    }
                }
            }

            *o = best;
            argmax[[ni, ci, oy, ox]] = best_at;
        }

        Ok((out, argmax))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use super::*;
    use crate::arch::layers::{Layer, gradcheck};

    #[test]
    fn picks_window_maximum() {
        let mut pool = MaxPool2d::new(2);
        let x = Array4::from_shape_vec(
            (1, 1, 3, 4),
            vec![
                1., 5., 2., 0., //
                3., 4., 8., 1., //
                9., 9., 9., 9., //
            ],
        )
        .unwrap();

        let y = pool.forward(x).unwrap();
        assert_eq!(y, array![[[[5., 8.]]]]);

        let dx = pool.backward(array![[[[1., 2.]]]]).unwrap();
        assert_eq!(dx[[0, 0, 0, 1]], 1.);
        assert_eq!(dx[[0, 0, 1, 2]], 2.);
        assert_eq!(dx.sum(), 3.);
    }

    #[test]
    fn gradients() {
        // Values within a window are at least 0.3 apart so the finite differences never
        // change the argmax.
        let x = ArrayD::from_shape_fn(IxDyn(&[2, 2, 4, 4]), |idx| {
            ((idx[1] * 5 + idx[2] * 7 + idx[3] * 3 + idx[0]) % 16) as f32 * 0.1
        });
        gradcheck::check(Layer::max_pool2d(2), x, 5);
    }
}
