use ndarray::prelude::*;
use rand::Rng;
use rayon::prelude::*;

use super::check_len;
use crate::{
    MlErr, Result,
    initialization::{constant, kaiming},
};

/// A 2D convolution with unit stride and symmetric zero padding.
///
/// Implemented as im2col followed by a matrix product, the weight matrix has one row per
/// `(channel, ky, kx)` triple and one column per output channel.
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    padding: usize,

    // Forward metadata
    cols: Vec<Array2<f32>>,
    input_dim: Option<(usize, usize, usize, usize)>,
}

impl Conv2d {
    pub const NAME: &'static str = "conv2d";

    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `in_channels` - The amount of channels of the input images.
    /// * `out_channels` - The amount of filters.
    /// * `kernel` - The side of the square kernel.
    /// * `padding` - The amount of zeros added on each side of the input.
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, padding: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            padding,
            cols: Vec::new(),
            input_dim: None,
        }
    }

    fn patch_len(&self) -> usize {
        self.in_channels * self.kernel * self.kernel
    }

    pub fn size(&self) -> usize {
        (self.patch_len() + 1) * self.out_channels
    }

    pub fn param_blocks(&self) -> Vec<(&'static str, Vec<usize>)> {
        vec![
            ("weight", vec![self.patch_len(), self.out_channels]),
            ("bias", vec![self.out_channels]),
        ]
    }

    pub fn init_params<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        check_len(Self::NAME, params.len(), self.size())?;
        let (w, b) = params.split_at_mut(self.patch_len() * self.out_channels);
        kaiming(w, self.patch_len(), rng)?;
        constant(b, 0.);
        Ok(())
    }

    /// Returns the spatial size of the output for an input of `h` by `w`.
    pub fn output_hw(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let (hp, wp) = (h + 2 * self.padding, w + 2 * self.padding);

        if hp < self.kernel || wp < self.kernel {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "an image at least as large as the kernel",
                got: vec![h, w],
            });
        }

        Ok((hp - self.kernel + 1, wp - self.kernel + 1))
    }

    pub fn forward(&mut self, params: &[f32], x: Array4<f32>) -> Result<Array4<f32>> {
        let (out, cols) = self.convolve(params, x.view())?;
        self.cols = cols;
        self.input_dim = Some(x.dim());
        Ok(out)
    }

    pub fn infer(&self, params: &[f32], x: Array4<f32>) -> Result<Array4<f32>> {
        let (out, _) = self.convolve(params, x.view())?;
        Ok(out)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        let (n, c, h, w) = self
            .input_dim
            .take()
            .ok_or(MlErr::NotForwarded { layer: Self::NAME })?;
        let cols = std::mem::take(&mut self.cols);
        let (ho, wo) = self.output_hw(h, w)?;
        let o = self.out_channels;

        if d.dim() != (n, o, ho, wo) {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, out_channels, out_height, out_width)",
                got: d.shape().to_vec(),
            });
        }

        let (weights, _) = self.view_params(params)?;
        let this = &*self;

        let per_sample = cols
            .par_iter()
            .enumerate()
            .map(|(i, cols_i)| -> Result<_> {
                let d_i = d.index_axis(Axis(0), i);
                let d_i = d_i.to_shape((o, ho * wo))?;

                let dw = cols_i.t().dot(&d_i.t());
                let db = d_i.sum_axis(Axis(1));
                let dcols = d_i.t().dot(&weights.t());
                let dx = this.col2im(dcols.view(), (c, h, w), (ho, wo));

                Ok((dw, db, dx))
            })
            .collect::<Result<Vec<_>>>()?;

        let (mut dw, mut db) = self.view_grad(grad)?;
        let mut dx = Array4::zeros((n, c, h, w));

        for (i, (dw_i, db_i, dx_i)) in per_sample.into_iter().enumerate() {
            dw += &dw_i;
            db += &db_i;
            dx.index_axis_mut(Axis(0), i).assign(&dx_i);
        }

        Ok(dx)
    }

    fn convolve(
        &self,
        params: &[f32],
        x: ArrayView4<f32>,
    ) -> Result<(Array4<f32>, Vec<Array2<f32>>)> {
        let (n, c, h, w) = x.dim();

        if c != self.in_channels {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, in_channels, height, width)",
                got: x.shape().to_vec(),
            });
        }

        let (ho, wo) = self.output_hw(h, w)?;
        let (weights, biases) = self.view_params(params)?;
        let biases = biases.insert_axis(Axis(1));

        let per_sample: Vec<(Array2<f32>, Array2<f32>)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let cols = self.im2col(x.index_axis(Axis(0), i), (ho, wo));
                let y = weights.t().dot(&cols.t()) + &biases;
                (cols, y)
            })
            .collect();

        let mut out = Array4::zeros((n, self.out_channels, ho, wo));
        let mut cols = Vec::with_capacity(n);

        for (i, (cols_i, y)) in per_sample.into_iter().enumerate() {
            out.index_axis_mut(Axis(0), i)
                .assign(&y.to_shape((self.out_channels, ho, wo))?);
            cols.push(cols_i);
        }

        Ok((out, cols))
    }

    /// Unrolls every receptive field of `x` into a row.
    fn im2col(&self, x: ArrayView3<f32>, (ho, wo): (usize, usize)) -> Array2<f32> {
        let (c, h, w) = x.dim();
        let k = self.kernel;
        let mut cols = Array2::zeros((ho * wo, self.patch_len()));

        for oy in 0..ho {
            for ox in 0..wo {
                let row = oy * wo + ox;
                for ci in 0..c {
                    for ky in 0..k {
                        for kx in 0..k {
                            if let Some((iy, ix)) = self.source(oy + ky, ox + kx, h, w) {
                                cols[[row, (ci * k + ky) * k + kx]] = x[[ci, iy, ix]];
                            }
                        }
                    }
                }
            }
        }

        cols
    }

    /// Scatters the gradient of the unrolled receptive fields back into an image.
    fn col2im(
        &self,
        dcols: ArrayView2<f32>,
        (c, h, w): (usize, usize, usize),
        (ho, wo): (usize, usize),
    ) -> Array3<f32> {
        let k = self.kernel;
        let mut dx = Array3::zeros((c, h, w));

        for oy in 0..ho {
            for ox in 0..wo {
                let row = oy * wo + ox;
                for ci in 0..c {
                    for ky in 0..k {
                        for kx in 0..k {
                            if let Some((iy, ix)) = self.source(oy + ky, ox + kx, h, w) {
                                dx[[ci, iy, ix]] += dcols[[row, (ci * k + ky) * k + kx]];
                            }
                        }
                    }
                }
            }
        }

        dx
    }

    /// Maps a position of the padded input to the unpadded one, `None` when it falls on padding.
    fn source(&self, py: usize, px: usize, h: usize, w: usize) -> Option<(usize, usize)> {
        let iy = py.checked_sub(self.padding)?;
        let ix = px.checked_sub(self.padding)?;
        (iy < h && ix < w).then_some((iy, ix))
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        check_len(Self::NAME, grad.len(), self.size())?;
        let (dw_raw, db_raw) = grad.split_at_mut(self.patch_len() * self.out_channels);
        let dw = ArrayViewMut2::from_shape((self.patch_len(), self.out_channels), dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.out_channels, db_raw)?;
        Ok((dw, db))
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        check_len(Self::NAME, params.len(), self.size())?;
        let (w_raw, b_raw) = params.split_at(self.patch_len() * self.out_channels);
        let weights = ArrayView2::from_shape((self.patch_len(), self.out_channels), w_raw)?;
        let biases = ArrayView1::from_shape(self.out_channels, b_raw)?;
        Ok((weights, biases))
    }
}
