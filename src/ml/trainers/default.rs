// ============================================================
// Layer 5 — Default Trainer
// ============================================================
// One forward/backward pass and one optimizer step per batch:
//
//   view1, view2 → model → criterion → loss
//   loss.backward() → split by param group → optimizer step

use anyhow::Result;
use burn::{optim::Optimizer, tensor::backend::AutodiffBackend};

use crate::application::pretrain_use_case::PretrainConfig;
use crate::data::{batcher::ContrastiveBatch, loader::BatchLoader};
use crate::domain::traits::ScalarSink;
use crate::ml::{loss::Criterion, model::ContrastiveModel, optimizer::GroupedOptimizer};

use super::{loss_value, pair_loss, EpochMeters};

pub fn train<B, O>(
    loader:    &BatchLoader<ContrastiveBatch<B>>,
    mut model: ContrastiveModel<B>,
    criterion: &Criterion,
    optimizer: &mut GroupedOptimizer<O>,
    epoch:     usize,
    cfg:       &PretrainConfig,
    writer:    &mut dyn ScalarSink,
) -> Result<ContrastiveModel<B>>
where
    B: AutodiffBackend,
    O: Optimizer<ContrastiveModel<B>, B>,
{
    let mut meters = EpochMeters::new(loader.num_batches(), epoch, cfg.print_freq);

    for (i, batch) in loader.iter_epoch(epoch).enumerate() {
        meters.data_ready();
        let size = batch.len();

        let loss  = pair_loss(&model, criterion, batch.view1, batch.view2)?;
        let value = loss_value(&loss, epoch, i)?;

        let grads = loss.backward();
        model = optimizer.step(model, grads)?;

        meters.batch_done(i, value, size, writer);
    }

    meters.finish(optimizer.lr(), writer);
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::registry::build_dataset;
    use crate::domain::run::Arch;
    use crate::infra::tensorboard::RecordingSink;
    use crate::ml::{
        model::ContrastiveModelConfig,
        optimizer::{build_optimizer, OptimizerVisitor},
    };
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    struct OneEpoch<'a> {
        cfg:   &'a PretrainConfig,
        model: ContrastiveModel<TestBackend>,
    }

    impl OptimizerVisitor<TestBackend> for OneEpoch<'_> {
        type Output = (f64, RecordingSink);

        fn model(&self) -> &ContrastiveModel<TestBackend> {
            &self.model
        }

        fn visit<O>(self, mut optimizer: GroupedOptimizer<O>) -> Self::Output
        where
            O: Optimizer<ContrastiveModel<TestBackend>, TestBackend>,
        {
            let data = build_dataset::<TestBackend>(self.cfg, &Default::default()).unwrap();
            let criterion = Criterion::for_arch(self.cfg.arch, self.cfg.temperature);
            let before = self.model.conv1_weight_sum();
            let mut sink = RecordingSink::default();
            let model = train(&data.trn_loader, self.model, &criterion, &mut optimizer, 0, self.cfg, &mut sink)
                .unwrap();
            (before - model.conv1_weight_sum(), sink)
        }
    }

    #[test]
    fn one_epoch_updates_weights_and_logs_scalars() {
        for arch in [Arch::SimClr, Arch::SimSiam] {
            let cfg = PretrainConfig {
                arch,
                seed:              Some(1),
                batch_size:        8,
                image_size:        8,
                width:             2,
                proj_dim:          4,
                pred_hidden:       4,
                synthetic_samples: 20,
                synthetic_classes: 2,
                print_freq:        1,
                lr:                0.1,
                ..PretrainConfig::default()
            };
            let model = ContrastiveModelConfig::new(2, 4, 4, arch.uses_predictor())
                .init::<TestBackend>(&Default::default());
            let (delta, sink) = build_optimizer(&cfg, OneEpoch { cfg: &cfg, model });

            assert!(delta.abs() > 0.0, "{arch}: conv1 did not move");
            // 16 training images, batches of 8
            assert_eq!(sink.tagged("train/loss").len(), 2);
            assert_eq!(sink.tagged("train/lr"), vec![(0.1, 0)]);
        }
    }
}
