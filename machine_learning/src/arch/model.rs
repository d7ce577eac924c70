use ndarray::ArrayD;
use rand::Rng;

use crate::{ParamBlock, Result};

/// A differentiable model that reads its parameters from a flat buffer it doesn't own.
pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Returns the named tensors the flat parameter buffer is made of, in order.
    fn param_blocks(&self) -> Vec<ParamBlock>;

    /// Initializes the model's parameters.
    ///
    /// # Arguments
    /// * `params` - The model's parameters, of length `size`.
    /// * `rng` - A random number generator.
    fn init_params<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()>;

    /// Computes the output of the model, caching what `backward` needs.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - A batch of inputs.
    ///
    /// # Returns
    /// The model's output or an error if the input has the wrong shape.
    fn forward(&mut self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>>;

    /// Computes the output of the model without touching its caches.
    fn infer(&self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>>;

    /// Backpropagates the gradient of the loss through the model.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `grad` - The buffer where the gradient of the parameters gets accumulated.
    /// * `d` - The gradient of the loss with respect to the output of the last `forward`.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the input.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: ArrayD<f32>)
    -> Result<ArrayD<f32>>;
}
