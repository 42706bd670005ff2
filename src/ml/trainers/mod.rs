// ============================================================
// Layer 5 — Trainer Registry
// ============================================================
// A trainer is a (train, validate) pair chosen by name:
//
//   default     one optimizer step per batch
//   accumulate  `accum_steps` micro-batches per optimizer step
//
// Both validate with the weighted KNN monitor. `train` consumes
// the model and returns the updated one, since Burn optimizers
// take modules by value.

use std::time::Instant;

use anyhow::{ensure, Result};
use burn::{module::AutodiffModule, optim::Optimizer, prelude::*, tensor::backend::AutodiffBackend};

use crate::application::pretrain_use_case::PretrainConfig;
use crate::data::{
    batcher::{ContrastiveBatch, EvalBatch},
    loader::BatchLoader,
};
use crate::domain::{errors::LookupError, traits::ScalarSink};
use crate::infra::metrics::{AverageMeter, ProgressMeter};
use crate::ml::{
    knn::{validate_knn, KnnParams},
    loss::Criterion,
    model::ContrastiveModel,
    optimizer::GroupedOptimizer,
};

pub mod accumulate;
pub mod default;

pub const KNOWN_TRAINERS: [&str; 2] = ["default", "accumulate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerKind {
    Default,
    Accumulate { steps: usize },
}

impl TrainerKind {
    /// Look up the trainer called `name`
    pub fn resolve(name: &str, accum_steps: usize) -> Result<Self, LookupError> {
        tracing::info!("=> Using trainer from trainers.{}", name);
        match name {
            "default"    => Ok(TrainerKind::Default),
            "accumulate" => Ok(TrainerKind::Accumulate { steps: accum_steps.max(1) }),
            other        => Err(LookupError::trainer(other, &KNOWN_TRAINERS)),
        }
    }

    /// One epoch over this rank's shard
    #[allow(clippy::too_many_arguments)]
    pub fn train<B, O>(
        &self,
        loader:    &BatchLoader<ContrastiveBatch<B>>,
        model:     ContrastiveModel<B>,
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
        match *self {
            TrainerKind::Default => {
                default::train(loader, model, criterion, optimizer, epoch, cfg, writer)
            }
            TrainerKind::Accumulate { steps } => {
                accumulate::train(loader, model, criterion, optimizer, epoch, cfg, writer, steps)
            }
        }
    }

    /// KNN top-1 accuracy (percent), also written as `test/knn_acc`
    #[allow(clippy::too_many_arguments)]
    pub fn validate<B: AutodiffBackend>(
        &self,
        memory_loader: &BatchLoader<EvalBatch<B::InnerBackend>>,
        val_loader:    &BatchLoader<EvalBatch<B::InnerBackend>>,
        model:         &ContrastiveModel<B>,
        cfg:           &PretrainConfig,
        writer:        &mut dyn ScalarSink,
        epoch:         usize,
        num_classes:   usize,
    ) -> Result<f64> {
        let params = KnnParams { k: cfg.knn_k, temperature: cfg.knn_temperature, num_classes };
        let acc = validate_knn(&model.valid(), memory_loader, val_loader, &params)?;
        tracing::info!("Epoch {} KNN accuracy {:.2}%", epoch, acc);
        writer.add_scalar("test/knn_acc", acc, epoch);
        Ok(acc)
    }
}

/// Forward both views and compute the criterion
pub(crate) fn pair_loss<B: Backend>(
    model:     &ContrastiveModel<B>,
    criterion: &Criterion,
    view1:     Tensor<B, 4>,
    view2:     Tensor<B, 4>,
) -> Result<Tensor<B, 1>> {
    criterion.loss(model.forward(view1), model.forward(view2))
}

/// Read a scalar loss and refuse to continue on NaN / inf
pub(crate) fn loss_value<B: Backend>(loss: &Tensor<B, 1>, epoch: usize, batch: usize) -> Result<f64> {
    let value = loss.clone().into_scalar().elem::<f64>();
    ensure!(value.is_finite(), "Loss is {value} at epoch {epoch}, batch {batch}");
    Ok(value)
}

/// Per-epoch meters shared by both trainers
pub(crate) struct EpochMeters {
    pub batch_time: AverageMeter,
    pub data_time:  AverageMeter,
    pub losses:     AverageMeter,
    progress:       ProgressMeter,
    num_batches:    usize,
    epoch:          usize,
    print_freq:     usize,
    end:            Instant,
}

impl EpochMeters {
    pub fn new(num_batches: usize, epoch: usize, print_freq: usize) -> Self {
        Self {
            batch_time: AverageMeter::new("Time", 3),
            data_time:  AverageMeter::new("Data", 3),
            losses:     AverageMeter::new("Loss", 4),
            progress:   ProgressMeter::new(num_batches, format!("Epoch: [{epoch}]")),
            num_batches,
            epoch,
            print_freq: print_freq.max(1),
            end:        Instant::now(),
        }
    }

    /// Call when a batch has been produced by the loader
    pub fn data_ready(&mut self) {
        self.data_time.update(self.end.elapsed().as_secs_f64(), 1);
    }

    /// Call after the batch's optimizer step
    pub fn batch_done(&mut self, batch: usize, loss: f64, size: usize, writer: &mut dyn ScalarSink) {
        self.losses.update(loss, size);
        self.batch_time.update(self.end.elapsed().as_secs_f64(), 1);
        self.end = Instant::now();

        if batch % self.print_freq == 0 {
            self.progress.display(batch, &[&self.batch_time, &self.data_time, &self.losses]);
            let step = self.epoch * self.num_batches + batch;
            writer.add_scalar("train/loss", self.losses.val(), step);
        }
    }

    /// Epoch-level scalars once the last batch is done
    pub fn finish(&self, lr: f64, writer: &mut dyn ScalarSink) {
        writer.add_scalar("train/lr", lr, self.epoch);
        tracing::debug!(
            "Epoch {} done: mean loss {:.4} over {} samples",
            self.epoch,
            self.losses.avg(),
            self.losses.count()
        );
    }
}
