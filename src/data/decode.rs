use std::path::Path;

use image::imageops::FilterType;
use ndarray::Array3;

use crate::{
    error::{Result, TrainErr},
    models::CHANNELS,
};

/// Decodes an image into a `(channels, size, size)` array of RGB values in `[0, 1]`.
///
/// # Arguments
/// * `path` - The path of the image.
/// * `size` - The side the image gets resized to, the aspect ratio isn't kept.
pub fn decode_image(path: &Path, size: usize) -> Result<Array3<f32>> {
    let side = u32::try_from(size)
        .map_err(|_| TrainErr::InvalidConfig(format!("image size {size} is too large")))?;

    let image = image::open(path).map_err(|source| TrainErr::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let rgb = image.resize_exact(side, side, FilterType::Triangle).to_rgb8();

    Ok(Array3::from_shape_fn((CHANNELS, size, size), |(c, y, x)| {
        f32::from(rgb.get_pixel(x as u32, y as u32)[c]) / 255.
    }))
}
