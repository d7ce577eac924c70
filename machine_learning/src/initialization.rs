//! Parameter initialization schemes.
//!
//! Every function writes directly into a region of the flat parameter buffer.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{MlErr, Result};

/// Fills `out` with samples of a normal distribution.
///
/// # Arguments
/// * `out` - The parameters to initialize.
/// * `mean` - The mean of the distribution.
/// * `std_dev` - The standard deviation of the distribution.
/// * `rng` - A random number generator.
///
/// # Returns
/// An error if `std_dev` is not finite (Nan or infinite).
pub fn normal<R: Rng + ?Sized>(out: &mut [f32], mean: f32, std_dev: f32, rng: &mut R) -> Result<()> {
    let distribution =
        Normal::new(mean, std_dev).map_err(|e| MlErr::InvalidDistribution(e.to_string()))?;

    for p in out.iter_mut() {
        *p = distribution.sample(rng);
    }

    Ok(())
}

/// Kaiming normal initialization, suited for weights followed by a rectifier.
///
/// # Arguments
/// * `out` - The parameters to initialize.
/// * `fan_in` - The number of input units in the weight tensor.
/// * `rng` - A random number generator.
pub fn kaiming<R: Rng + ?Sized>(out: &mut [f32], fan_in: usize, rng: &mut R) -> Result<()> {
    let std_dev = (2. / fan_in.max(1) as f32).sqrt();
    normal(out, 0., std_dev, rng)
}

/// Xavier normal initialization.
///
/// # Arguments
/// * `out` - The parameters to initialize.
/// * `fan_in` - The number of input units in the weight tensor.
/// * `fan_out` - The number of output units in the weight tensor.
/// * `rng` - A random number generator.
pub fn xavier<R: Rng + ?Sized>(
    out: &mut [f32],
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Result<()> {
    let std_dev = (2. / (fan_in + fan_out).max(1) as f32).sqrt();
    normal(out, 0., std_dev, rng)
}

/// Fills `out` with a constant value.
pub fn constant(out: &mut [f32], value: f32) {
    out.fill(value);
}
