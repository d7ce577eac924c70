#![cfg(test)]

use ndarray::{Array2, Array4, ArrayD, Ix2};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    arch::{
        Network, Sequential,
        activations::ActFn,
        layers::Layer,
        loss::{CrossEntropy, LossFn},
        ops::argmax_rows,
    },
    optimization::{Adam, GradientDescent, Optimizer},
};

/// Trains on a single full batch and returns the loss before and after.
fn fit<O: Optimizer>(
    net: &mut Network<Sequential>,
    optimizer: &mut O,
    x: ArrayD<f32>,
    labels: &[usize],
    iters: usize,
) -> (f32, f32) {
    let loss_of = |net: &Network<Sequential>| {
        let logits = net.infer(x.clone()).unwrap().into_dimensionality::<Ix2>().unwrap();
        CrossEntropy.loss(logits.view(), labels).unwrap()
    };

    let before = loss_of(net);

    for _ in 0..iters {
        net.zero_grad();
        let logits = net.forward(x.clone()).unwrap().into_dimensionality::<Ix2>().unwrap();
        let d = CrossEntropy.loss_prime(logits.view(), labels).unwrap();
        net.backward(d.into_dyn()).unwrap();
        net.step(optimizer).unwrap();
    }

    (before, loss_of(net))
}

#[test]
fn test_ml_xor_convergence() {
    let x = ndarray::array![[0., 0.], [0., 1.], [1., 0.], [1., 1.]];
    let labels = [0, 1, 1, 0];

    let model = Sequential::new([
        Layer::dense((2, 8), Some(ActFn::gelu())),
        Layer::dense((8, 2), None),
    ]);
    let mut net = Network::new(model, &mut StdRng::seed_from_u64(1)).unwrap();
    let mut optimizer = Adam::with_defaults(net.size(), 0.05);

    let (before, after) = fit(&mut net, &mut optimizer, x.clone().into_dyn(), &labels, 500);
    assert!(after < before);
    assert!(after < 0.1, "xor loss {after}");

    let logits: Array2<f32> = net.infer(x.into_dyn()).unwrap().into_dimensionality().unwrap();
    assert_eq!(argmax_rows(&logits), labels);
}

/// Images whose class is given by which half of the image is lit.
fn halves(n: usize, size: usize) -> (Array4<f32>, Vec<usize>) {
    let labels: Vec<_> = (0..n).map(|i| i % 2).collect();
    let x = Array4::from_shape_fn((n, 3, size, size), |(i, _, _, col)| {
        let lit = if labels[i] == 0 { col < size / 2 } else { col >= size / 2 };
        if lit { 1. } else { 0. }
    });
    (x, labels)
}

#[test]
fn test_ml_cnn_learns_halves() {
    let (x, labels) = halves(6, 8);

    let model = Sequential::new([
        Layer::conv2d(3, 4, 3, 1),
        Layer::relu(),
        Layer::max_pool2d(2),
        Layer::flatten(),
        Layer::dense((4 * 4 * 4, 2), None),
    ]);
    let mut net = Network::new(model, &mut StdRng::seed_from_u64(2)).unwrap();
    let mut optimizer = GradientDescent::new(0.1);

    let (before, after) = fit(&mut net, &mut optimizer, x.into_dyn(), &labels, 30);
    assert!(after < before, "cnn loss went from {before} to {after}");
}

#[test]
fn test_ml_vit_learns_halves() {
    let (x, labels) = halves(6, 8);
    let dim = 8;

    let model = Sequential::new([
        Layer::patch_embed(3, 8, 4, dim),
        Layer::self_attention(dim),
        Layer::layer_norm(dim),
        Layer::feed_forward(dim, 2 * dim),
        Layer::layer_norm(dim),
        Layer::mean_pool(),
        Layer::dense((dim, 2), None),
    ]);
    let mut net = Network::new(model, &mut StdRng::seed_from_u64(3)).unwrap();
    let mut optimizer = Adam::with_defaults(net.size(), 1e-2);

    let (before, after) = fit(&mut net, &mut optimizer, x.into_dyn(), &labels, 40);
    assert!(after < before, "vit loss went from {before} to {after}");
}
