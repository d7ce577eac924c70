//! Finite difference checks for the hand written backward passes.

use ndarray::{ArrayD, IxDyn};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::Layer;

const H: f32 = 1e-2;

/// Samples an input of the given shape uniformly from `[-1, 1)`.
pub fn random_input(shape: &[usize], seed: u64) -> ArrayD<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    ArrayD::from_shape_fn(IxDyn(shape), |_| rng.random_range(-1.0..1.0))
}

/// Compares the gradients computed by `layer.backward` with central differences of
/// `sum(layer(x) * r)` for a random `r`, both for the parameters and for the input.
pub fn check(mut layer: Layer, x: ArrayD<f32>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut params = vec![0.; layer.size()];
    layer.init_params(&mut params, &mut rng).unwrap();
    for p in params.iter_mut() {
        *p += rng.random_range(-0.1..0.1);
    }

    let y = layer.forward(&params, x.clone()).unwrap();
    let r = random_input(y.shape(), seed + 1);
    let mut grad = vec![0.; params.len()];
    let dx = layer.backward(&params, &mut grad, r.clone()).unwrap();
    assert_eq!(dx.shape(), x.shape());

    let objective = |params: &[f32], x: &ArrayD<f32>| -> f32 {
        let y = layer.infer(params, x.clone()).unwrap();
        (&y * &r).sum()
    };

    let trained = (&y * &r).sum();
    assert!((objective(&params, &x) - trained).abs() < 1e-4);

    let mut perturbed = params.clone();
    for j in 0..params.len() {
        perturbed[j] = params[j] + H;
        let up = objective(&perturbed, &x);
        perturbed[j] = params[j] - H;
        let down = objective(&perturbed, &x);
        perturbed[j] = params[j];

        assert_close(grad[j], (up - down) / (2. * H), &format!("param {j}"));
    }

    let dx: Vec<f32> = dx.iter().copied().collect();
    let mut xp = x.as_standard_layout().into_owned();
    for (j, &analytic) in dx.iter().enumerate() {
        let orig = xp.as_slice().unwrap()[j];
        xp.as_slice_mut().unwrap()[j] = orig + H;
        let up = objective(&params, &xp);
        xp.as_slice_mut().unwrap()[j] = orig - H;
        let down = objective(&params, &xp);
        xp.as_slice_mut().unwrap()[j] = orig;

        assert_close(analytic, (up - down) / (2. * H), &format!("input {j}"));
    }
}

fn assert_close(analytic: f32, numeric: f32, what: &str) {
    let tol = 1e-2 * (1. + analytic.abs().max(numeric.abs()));
    assert!(
        (analytic - numeric).abs() <= tol,
        "{what}: analytic {analytic}, numeric {numeric}"
    );
}
