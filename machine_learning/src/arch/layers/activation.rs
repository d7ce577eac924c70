use ndarray::{ArrayD, Zip};

use crate::{MlErr, Result, arch::activations::ActFn};

/// Applies an activation function element-wise, whatever the shape of its input.
#[derive(Debug, Clone)]
pub struct Activation {
    act_fn: ActFn,
    z: Option<ArrayD<f32>>,
}

impl Activation {
    pub const NAME: &'static str = "activation";

    pub fn new(act_fn: ActFn) -> Self {
        Self { act_fn, z: None }
    }

    pub fn forward(&mut self, z: ArrayD<f32>) -> ArrayD<f32> {
        let a = self.infer(z.clone());
        self.z = Some(z);
        a
    }

    pub fn infer(&self, mut z: ArrayD<f32>) -> ArrayD<f32> {
        let act_fn = self.act_fn;
        z.par_mapv_inplace(|z| act_fn.f(z));
        z
    }

    pub fn backward(&mut self, mut d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let z = self.z.take().ok_or(MlErr::NotForwarded { layer: Self::NAME })?;

        if d.shape() != z.shape() {
            return Err(MlErr::InvalidShape {
                layer: Self::NAME,
                expected: "the shape of the forwarded input",
                got: d.shape().to_vec(),
            });
        }

        let act_fn = self.act_fn;
        Zip::from(&mut d)
            .and(&z)
            .par_for_each(|d, &z| *d *= act_fn.df(z));

        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{IxDyn, array};

    use super::*;
    use crate::arch::layers::{Layer, gradcheck};

    #[test]
    fn relu_masks_negative_inputs() {
        let mut relu = Activation::new(ActFn::relu());
        let y = relu.forward(array![[-1., 2.], [0.5, -3.]].into_dyn());
        assert_eq!(y, array![[0., 2.], [0.5, 0.]].into_dyn());

        let d = relu.backward(ArrayD::ones(IxDyn(&[2, 2]))).unwrap();
        assert_eq!(d, array![[0., 1.], [1., 0.]].into_dyn());
    }

    #[test]
    fn gelu_gradients() {
        let x = gradcheck::random_input(&[2, 3, 2], 9);
        gradcheck::check(Layer::activation(ActFn::gelu()), x, 2);
    }
}
