// ============================================================
// Layer 5 — Gradient-accumulating Trainer
// ============================================================
// Splits every batch into `steps` micro-batches and takes a
// single optimizer step per batch:
//
//   for each micro-batch:
//       loss / n_micro → backward → split by group → accumulate
//   optimizer step with the summed per-group gradients
//
// Scaling each micro-batch loss by 1 / n_micro makes the summed
// gradient the mean over micro-batches, so the lr is unchanged.
// Peak memory drops to roughly one micro-batch of activations.
// NT-Xent negatives only come from inside a micro-batch.

use anyhow::Result;
use burn::{
    optim::{GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::pretrain_use_case::PretrainConfig;
use crate::data::{batcher::ContrastiveBatch, loader::BatchLoader};
use crate::domain::traits::ScalarSink;
use crate::ml::{loss::Criterion, model::ContrastiveModel, optimizer::GroupedOptimizer};

use super::{loss_value, pair_loss, EpochMeters};

#[allow(clippy::too_many_arguments)]
pub fn train<B, O>(
    loader:    &BatchLoader<ContrastiveBatch<B>>,
    mut model: ContrastiveModel<B>,
    criterion: &Criterion,
    optimizer: &mut GroupedOptimizer<O>,
    epoch:     usize,
    cfg:       &PretrainConfig,
    writer:    &mut dyn ScalarSink,
    steps:     usize,
) -> Result<ContrastiveModel<B>>
where
    B: AutodiffBackend,
    O: Optimizer<ContrastiveModel<B>, B>,
{
    let mut meters = EpochMeters::new(loader.num_batches(), epoch, cfg.print_freq);

    for (i, batch) in loader.iter_epoch(epoch).enumerate() {
        meters.data_ready();
        let size = batch.len();

        let (grads, batch_loss) =
            accumulate_batch(&model, criterion, optimizer, batch.view1, batch.view2, steps, epoch, i)?;
        model = optimizer.apply(model, grads)?;

        meters.batch_done(i, batch_loss, size, writer);
    }

    meters.finish(optimizer.lr(), writer);
    Ok(model)
}

/// Per-group gradients of one batch, averaged over its micro-batches,
/// and the batch loss (mean of the micro-batch losses)
#[allow(clippy::too_many_arguments)]
pub(crate) fn accumulate_batch<B, O>(
    model:     &ContrastiveModel<B>,
    criterion: &Criterion,
    optimizer: &GroupedOptimizer<O>,
    view1:     Tensor<B, 4>,
    view2:     Tensor<B, 4>,
    steps:     usize,
    epoch:     usize,
    batch:     usize,
) -> Result<(Vec<GradientsParams>, f64)>
where
    B: AutodiffBackend,
{
    let views1 = view1.chunk(steps, 0);
    let views2 = view2.chunk(steps, 0);
    let micro  = views1.len();

    let mut accumulators: Vec<GradientsAccumulator<ContrastiveModel<B>>> =
        (0..optimizer.groups().len()).map(|_| GradientsAccumulator::new()).collect();
    let mut batch_loss = 0.0;

    for (view1, view2) in views1.into_iter().zip(views2) {
        let loss  = pair_loss(model, criterion, view1, view2)?.div_scalar(micro as f64);
        batch_loss += loss_value(&loss, epoch, batch)?;

        let grads = optimizer.split(model, loss.backward());
        for (acc, group_grads) in accumulators.iter_mut().zip(grads) {
            acc.accumulate(model, group_grads);
        }
    }

    let grads = accumulators.iter_mut().map(|acc| acc.grads()).collect();
    Ok((grads, batch_loss))
}
