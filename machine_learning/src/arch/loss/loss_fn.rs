use ndarray::{Array2, ArrayView2};

use crate::Result;

/// A classification loss over a batch of raw scores and the index of the true class of each row.
pub trait LossFn {
    /// Computes the mean loss of the batch.
    fn loss(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<f32>;

    /// Computes the gradient of `loss` with respect to `logits`.
    fn loss_prime(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>>;
}
