use ndarray::{Array2, ArrayView2, Axis};

use super::LossFn;
use crate::{
    MlErr, Result,
    arch::ops::{log_sum_exp, softmax_rows},
};

/// Softmax cross entropy averaged over the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl CrossEntropy {
    pub fn new() -> Self {
        Self
    }

    fn validate(logits: ArrayView2<f32>, labels: &[usize]) -> Result<()> {
        let (n, classes) = logits.dim();

        if n == 0 {
            return Err(MlErr::EmptyBatch);
        }

        if labels.len() != n {
            return Err(MlErr::SizeMismatch {
                a: "logits",
                b: "labels",
                got: labels.len(),
                expected: n,
            });
        }

        match labels.iter().find(|&&label| label >= classes) {
            Some(&label) => Err(MlErr::InvalidLabel { label, classes }),
            None => Ok(()),
        }
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<f32> {
        Self::validate(logits, labels)?;

        let total: f32 = logits
            .axis_iter(Axis(0))
            .zip(labels)
            .map(|(row, &label)| log_sum_exp(row) - row[label])
            .sum();

        Ok(total / labels.len() as f32)
    }

    fn loss_prime(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>> {
        Self::validate(logits, labels)?;

        let mut d = logits.to_owned();
        softmax_rows(&mut d);

        for (mut row, &label) in d.axis_iter_mut(Axis(0)).zip(labels) {
            row[label] -= 1.;
        }

        d /= labels.len() as f32;
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn uniform_logits() {
        let logits = array![[0., 0., 0., 0.], [1., 1., 1., 1.]];
        let loss = CrossEntropy.loss(logits.view(), &[0, 3]).unwrap();
        assert!((loss - 4f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn confident_prediction_has_small_loss() {
        let logits = array![[20., 0.], [0., 20.]];
        assert!(CrossEntropy.loss(logits.view(), &[0, 1]).unwrap() < 1e-6);
    }

    #[test]
    fn gradient_rows_sum_to_zero() {
        let logits = array![[1., 2., 3.], [-1., 0.5, 0.]];
        let d = CrossEntropy.loss_prime(logits.view(), &[2, 0]).unwrap();

        for row in d.rows() {
            assert!(row.sum().abs() < 1e-6);
        }
        assert!(d[[0, 2]] < 0.);
        assert!(d[[1, 0]] < 0.);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let logits = array![[0.3, -1.2, 0.8], [2., 0.1, -0.4]];
        let labels = [1, 0];
        let d = CrossEntropy.loss_prime(logits.view(), &labels).unwrap();

        let h = 1e-2;
        for ((i, j), &analytic) in d.indexed_iter() {
            let mut up = logits.clone();
            up[[i, j]] += h;
            let mut down = logits.clone();
            down[[i, j]] -= h;

            let numeric = (CrossEntropy.loss(up.view(), &labels).unwrap()
                - CrossEntropy.loss(down.view(), &labels).unwrap())
                / (2. * h);
            assert!((analytic - numeric).abs() < 1e-3);
        }
    }

    #[test]
    fn invalid_batches() {
        let logits = array![[0., 1.]];
        assert!(matches!(
            CrossEntropy.loss(logits.view(), &[2]),
            Err(MlErr::InvalidLabel {
                label: 2,
                classes: 2
            })
        ));
        assert!(matches!(
            CrossEntropy.loss(logits.view(), &[0, 1]),
            Err(MlErr::SizeMismatch { .. })
        ));
        assert!(matches!(
            CrossEntropy.loss(Array2::zeros((0, 2)).view(), &[]),
            Err(MlErr::EmptyBatch)
        ));
    }
}
