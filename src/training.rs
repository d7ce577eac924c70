use machine_learning::{
    MlErr,
    arch::{Model, Network, loss::LossFn, ops::argmax_rows},
    optimization::Optimizer,
};
use ndarray::{Array2, ArrayD, Ix2};

use crate::{data::Batch, error::Result};

/// What a pass over a loader produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochOutput {
    /// The sum of the mean loss of every batch.
    pub loss: f32,
    pub preds: Vec<usize>,
    pub labels: Vec<usize>,
    pub batches: usize,
}

impl EpochOutput {
    fn record(&mut self, loss: f32, logits: &Array2<f32>, labels: Vec<usize>) {
        self.loss += loss;
        self.preds.extend(argmax_rows(logits));
        self.labels.extend(labels);
        self.batches += 1;
    }
}

/// Trains the network for one pass over the batches, taking an optimizer step per batch.
///
/// # Arguments
/// * `net` - The network being trained.
/// * `loss_fn` - The loss function.
/// * `optimizer` - The optimizer that dictates how to update the parameters.
/// * `batches` - The batches of the pass, any failing batch aborts it.
///
/// # Returns
/// The cumulative loss with the predictions and labels of every sample, in order.
pub fn train_epoch<M, L, O, I>(
    net: &mut Network<M>,
    loss_fn: &L,
    optimizer: &mut O,
    batches: I,
) -> Result<EpochOutput>
where
    M: Model,
    L: LossFn,
    O: Optimizer + ?Sized,
    I: IntoIterator<Item = Result<Batch>>,
{
    let mut out = EpochOutput::default();

    for batch in batches {
        let Batch { images, labels } = batch?;

        let logits = as_logits(net.forward(images.into_dyn())?)?;
        let loss = loss_fn.loss(logits.view(), &labels)?;

        net.zero_grad();
        let d = loss_fn.loss_prime(logits.view(), &labels)?;
        net.backward(d.into_dyn())?;
        net.step(optimizer)?;

        log::debug!("train batch {}: loss {loss:.4}", out.batches + 1);
        out.record(loss, &logits, labels);
    }

    Ok(out)
}

/// Evaluates the network over the batches without touching its parameters.
///
/// # Returns
/// The cumulative loss with the predictions and labels of every sample, in order.
pub fn eval_epoch<M, L, I>(net: &Network<M>, loss_fn: &L, batches: I) -> Result<EpochOutput>
where
    M: Model,
    L: LossFn,
    I: IntoIterator<Item = Result<Batch>>,
{
    let mut out = EpochOutput::default();

    for batch in batches {
        let Batch { images, labels } = batch?;

        let logits = as_logits(net.infer(images.into_dyn())?)?;
        let loss = loss_fn.loss(logits.view(), &labels)?;

        log::debug!("eval batch {}: loss {loss:.4}", out.batches + 1);
        out.record(loss, &logits, labels);
    }

    Ok(out)
}

fn as_logits(y: ArrayD<f32>) -> Result<Array2<f32>> {
    Ok(y.into_dimensionality::<Ix2>().map_err(MlErr::from)?)
}
