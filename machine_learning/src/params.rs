use std::ops::Range;

use crate::{MlErr, Result, optimization::Optimizer};

/// A named, shaped region of a model's flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBlock {
    pub name: String,
    pub shape: Vec<usize>,
    pub range: Range<usize>,
}

impl ParamBlock {
    /// Returns the amount of parameters in this block.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Owns a model's parameters alongside the gradient buffer of the same length.
///
/// Layers never own their weights, they get handed the slice that corresponds
/// to them on every pass.
#[derive(Debug, Clone)]
pub struct ParamStore {
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl ParamStore {
    /// Creates a new `ParamStore` filled with zeros.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters to hold.
    pub fn zeros(len: usize) -> Self {
        Self {
            params: vec![0.; len],
            grad: vec![0.; len],
        }
    }

    /// Creates a new `ParamStore` from previously trained parameters.
    ///
    /// # Arguments
    /// * `params` - The parameters.
    /// * `expected` - The amount of parameters the model needs.
    ///
    /// # Returns
    /// An error if the amount of parameters doesn't match the expected one.
    pub fn from_vec(params: Vec<f32>, expected: usize) -> Result<Self> {
        if params.len() != expected {
            return Err(MlErr::SizeMismatch {
                a: "params",
                b: "model",
                got: params.len(),
                expected,
            });
        }

        let grad = vec![0.; params.len()];
        Ok(Self { params, grad })
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Borrows the parameters and the gradient at the same time, as needed by a backward pass.
    pub fn split_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.params, &mut self.grad)
    }

    /// Resets the accumulated gradient.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    /// Takes an optimization step with the currently accumulated gradient.
    ///
    /// # Arguments
    /// * `optimizer` - The optimizer that dictates how to update the parameters.
    pub fn optimize<O>(&mut self, optimizer: &mut O) -> Result<()>
    where
        O: Optimizer + ?Sized,
    {
        optimizer.update_params(&self.grad, &mut self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::GradientDescent;

    #[test]
    fn from_vec_rejects_wrong_length() {
        let err = ParamStore::from_vec(vec![1., 2.], 3).unwrap_err();
        assert!(matches!(
            err,
            MlErr::SizeMismatch {
                got: 2,
                expected: 3,
                ..
            }
        ));
    }

    #[test]
    fn optimize_uses_accumulated_grad() {
        let mut store = ParamStore::from_vec(vec![1., 1.], 2).unwrap();
        let (_, grad) = store.split_mut();
        grad.copy_from_slice(&[1., -1.]);

        let mut optimizer = GradientDescent::new(0.5);
        store.optimize(&mut optimizer).unwrap();
        assert_eq!(store.params(), &[0.5, 1.5]);

        store.zero_grad();
        assert_eq!(store.grad(), &[0., 0.]);
    }
}
