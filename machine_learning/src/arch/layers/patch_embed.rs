use ndarray::{linalg, prelude::*};
use rand::Rng;

use super::{check_len, split, split_mut};
use crate::{
    MlErr, Result,
    initialization::{constant, normal, xavier},
};

/// Splits square images in non overlapping patches, projects every patch to an embedding and
/// adds a learned position embedding: `(batch, channels, size, size)` into
/// `(batch, patches, dim)`.
#[derive(Debug, Clone)]
pub struct PatchEmbed {
    in_channels: usize,
    image_size: usize,
    patch: usize,
    dim: usize,

    // Forward metadata
    patches: Option<Array2<f32>>,
    batch: Option<usize>,
}

impl PatchEmbed {
    pub const NAME: &'static str = "patch_embed";

    /// Creates a new `PatchEmbed` layer.
    ///
    /// # Arguments
    /// * `in_channels` - The amount of channels of the input images.
    /// * `image_size` - The side of the input images, a multiple of `patch`.
    /// * `patch` - The side of each patch.
    /// * `dim` - The embedding size.
    pub fn new(in_channels: usize, image_size: usize, patch: usize, dim: usize) -> Self {
        Self {
            in_channels,
            image_size,
            patch: patch.max(1),
            dim,
            patches: None,
            batch: None,
        }
    }

    /// Returns the amount of patches per side of the image.
    fn grid(&self) -> usize {
        self.image_size / self.patch
    }

    pub fn num_patches(&self) -> usize {
        self.grid() * self.grid()
    }

    fn patch_len(&self) -> usize {
        self.in_channels * self.patch * self.patch
    }

    fn sizes(&self) -> [usize; 3] {
        [
            self.patch_len() * self.dim,
            self.dim,
            self.num_patches() * self.dim,
        ]
    }

    pub fn size(&self) -> usize {
        self.sizes().iter().sum()
    }

    pub fn param_blocks(&self) -> Vec<(&'static str, Vec<usize>)> {
        vec![
            ("weight", vec![self.patch_len(), self.dim]),
            ("bias", vec![self.dim]),
            ("position", vec![self.num_patches(), self.dim]),
        ]
    }

    pub fn init_params<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        check_len(Self::NAME, params.len(), self.size())?;
        let [w, b, pos] = split_mut(params, self.sizes());
        xavier(w, self.patch_len(), self.dim, rng)?;
        constant(b, 0.);
        normal(pos, 0., 0.02, rng)
    }

    pub fn forward(&mut self, params: &[f32], x: Array4<f32>) -> Result<Array3<f32>> {
        let patches = self.unfold(x.view())?;
        let out = self.embed(params, &patches, x.dim().0)?;
        self.patches = Some(patches);
        self.batch = Some(x.dim().0);
        Ok(out)
    }

    pub fn infer(&self, params: &[f32], x: Array4<f32>) -> Result<Array3<f32>> {
        let patches = self.unfold(x.view())?;
        self.embed(params, &patches, x.dim().0)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array3<f32>,
    ) -> Result<Array4<f32>> {
        let patches = self
            .patches
            .take()
            .ok_or(MlErr::NotForwarded { layer: Self::NAME })?;
        let n = self
            .batch
            .take()
            .ok_or(MlErr::NotForwarded { layer: Self::NAME })?;

        if d.dim() != (n, self.num_patches(), self.dim) {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, patches, dim)",
                got: d.shape().to_vec(),
            });
        }

        check_len(Self::NAME, grad.len(), self.size())?;
        let [dw, db, dpos] = split_mut(grad, self.sizes());
        let mut dw = ArrayViewMut2::from_shape((self.patch_len(), self.dim), dw)?;
        let mut db = ArrayViewMut1::from_shape(self.dim, db)?;
        let mut dpos = ArrayViewMut2::from_shape((self.num_patches(), self.dim), dpos)?;

        dpos += &d.sum_axis(Axis(0));
        let d = d.to_shape((n * self.num_patches(), self.dim))?;
        linalg::general_mat_mul(1.0, &patches.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _, _) = self.view_params(params)?;
        let dpatches = d.dot(&w.t());
        Ok(self.fold(dpatches.view(), n))
    }

    fn embed(&self, params: &[f32], patches: &Array2<f32>, n: usize) -> Result<Array3<f32>> {
        let (w, b, pos) = self.view_params(params)?;
        let y = patches.dot(&w) + &b;
        let mut y = y
            .to_shape((n, self.num_patches(), self.dim))?
            .into_owned();
        y += &pos;
        Ok(y)
    }

    /// Lays every patch of every image as a row: `(batch * patches, channels * patch * patch)`.
    fn unfold(&self, x: ArrayView4<f32>) -> Result<Array2<f32>> {
        let (n, c, h, w) = x.dim();

        if c != self.in_channels
            || h != self.image_size
            || w != self.image_size
            || self.image_size % self.patch != 0
        {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "(batch, channels, size, size) with size a multiple of the patch",
                got: x.shape().to_vec(),
            });
        }

        let (p, g) = (self.patch, self.grid());
        let mut patches = Array2::zeros((n * self.num_patches(), self.patch_len()));

        for ((ni, ci, y, xx), &v) in x.indexed_iter() {
            let row = ni * g * g + (y / p) * g + xx / p;
            let col = (ci * p + y % p) * p + xx % p;
            patches[[row, col]] = v;
        }

        Ok(patches)
    }

    /// Inverse of `unfold`.
    fn fold(&self, patches: ArrayView2<f32>, n: usize) -> Array4<f32> {
        let (p, g, s) = (self.patch, self.grid(), self.image_size);
        let mut x = Array4::zeros((n, self.in_channels, s, s));

        for ((ni, ci, y, xx), v) in x.indexed_iter_mut() {
            let row = ni * g * g + (y / p) * g + xx / p;
            let col = (ci * p + y % p) * p + xx % p;
            *v = patches[[row, col]];
        }

        x
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>, ArrayView2<'a, f32>)> {
        check_len(Self::NAME, params.len(), self.size())?;
        let [w, b, pos] = split(params, self.sizes());
        let w = ArrayView2::from_shape((self.patch_len(), self.dim), w)?;
        let b = ArrayView1::from_shape(self.dim, b)?;
        let pos = ArrayView2::from_shape((self.num_patches(), self.dim), pos)?;
        Ok((w, b, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::{Layer, gradcheck};

    #[test]
    fn unfold_and_fold_are_inverse() {
        let embed = PatchEmbed::new(2, 4, 2, 3);
        let x = Array4::from_shape_fn((2, 2, 4, 4), |(n, c, y, x)| {
            (n * 100 + c * 16 + y * 4 + x) as f32
        });

        let patches = embed.unfold(x.view()).unwrap();
        assert_eq!(patches.dim(), (8, 8));
        // Second patch of the first image starts at column 2 of the first channel.
        assert_eq!(patches[[1, 0]], 2.);

        assert_eq!(embed.fold(patches.view(), 2), x);
    }

    #[test]
    fn rejects_image_not_divisible_by_patch() {
        let embed = PatchEmbed::new(1, 5, 2, 3);
        let params = vec![0.; embed.size()];
        assert!(embed.infer(&params, Array4::zeros((1, 1, 5, 5))).is_err());
    }

    #[test]
    fn gradients() {
        let x = gradcheck::random_input(&[2, 2, 4, 4], 12);
        gradcheck::check(Layer::patch_embed(2, 4, 2, 3), x, 13);
    }
}
