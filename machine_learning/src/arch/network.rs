use ndarray::ArrayD;
use rand::Rng;

use super::Model;
use crate::{ParamBlock, ParamStore, Result, optimization::Optimizer};

/// A model bundled with the parameters and gradient it trains.
#[derive(Debug, Clone)]
pub struct Network<M: Model> {
    model: M,
    store: ParamStore,
}

impl<M: Model> Network<M> {
    /// Creates a new `Network` with freshly initialized parameters.
    ///
    /// # Arguments
    /// * `model` - The model's architecture.
    /// * `rng` - The random number generator used to initialize the parameters.
    pub fn new<R: Rng + ?Sized>(model: M, rng: &mut R) -> Result<Self> {
        let mut store = ParamStore::zeros(model.size());
        model.init_params(store.params_mut(), rng)?;
        Ok(Self { model, store })
    }

    /// Creates a new `Network` with previously trained parameters.
    ///
    /// # Returns
    /// An error if the amount of parameters doesn't match the model.
    pub fn with_params(model: M, params: Vec<f32>) -> Result<Self> {
        let store = ParamStore::from_vec(params, model.size())?;
        Ok(Self { model, store })
    }

    pub fn params(&self) -> &[f32] {
        self.store.params()
    }

    pub fn size(&self) -> usize {
        self.store.len()
    }

    pub fn param_blocks(&self) -> Vec<ParamBlock> {
        self.model.param_blocks()
    }

    /// Computes the output for a batch, caching what `backward` needs.
    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.model.forward(self.store.params(), x)
    }

    /// Computes the output for a batch in evaluation mode.
    pub fn infer(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.model.infer(self.store.params(), x)
    }

    pub fn zero_grad(&mut self) {
        self.store.zero_grad();
    }

    /// Accumulates the gradient of the loss with respect to the parameters.
    ///
    /// # Arguments
    /// * `d` - The gradient of the loss with respect to the output of the last `forward`.
    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<()> {
        let (params, grad) = self.store.split_mut();
        self.model.backward(params, grad, d)?;
        Ok(())
    }

    /// Updates the parameters with the accumulated gradient.
    pub fn step<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> Result<()> {
        self.store.optimize(optimizer)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        MlErr,
        arch::{Sequential, layers::Layer},
    };

    #[test]
    fn same_seed_same_network() {
        let model = Sequential::new([Layer::dense((4, 3), None)]);
        let a = Network::new(model.clone(), &mut StdRng::seed_from_u64(7)).unwrap();
        let b = Network::new(model, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn with_params_checks_size() {
        let model = Sequential::new([Layer::dense((4, 3), None)]);
        assert!(matches!(
            Network::with_params(model, vec![0.; 4]),
            Err(MlErr::SizeMismatch { .. })
        ));
    }
}
