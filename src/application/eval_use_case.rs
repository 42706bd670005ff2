// ============================================================
// Layer 2 — EvalUseCase
// ============================================================
// Re-measures the KNN accuracy of a finished (or interrupted)
// experiment without training:
//
//   Step 1: Load the saved PretrainConfig      (Layer 6 - infra)
//   Step 2: Rebuild model + optimizer          (Layer 5 - ml)
//   Step 3: Load rank 0's newest checkpoint    (Layer 6 - infra)
//   Step 4: Build the KNN loaders              (Layer 4 - data)
//   Step 5: Weighted KNN accuracy              (Layer 5 - ml)
//
// The optimizer is rebuilt only because its state is stored in
// the same record as the weights; nothing is stepped.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use burn::{module::AutodiffModule, optim::Optimizer, prelude::*, tensor::backend::AutodiffBackend};

use crate::application::pretrain_use_case::PretrainConfig;
use crate::data::registry::build_dataset;
use crate::domain::run::Arch;
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointRecord},
    layout::{ExperimentDir, RunLayout},
};
use crate::ml::{
    driver::model_config,
    knn::{validate_knn, KnnParams},
    model::ContrastiveModel,
    optimizer::{build_optimizer, GroupedOptimizer, OptimizerVisitor},
};

/// What `eval` prints.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub checkpoint:      PathBuf,
    pub arch:            Arch,
    /// Epoch a resumed run would start at
    pub epoch:           usize,
    /// Accuracy stored in the checkpoint when it was saved
    pub stored_accuracy: f64,
    /// Accuracy measured now
    pub knn_accuracy:    f64,
}

pub struct EvalUseCase {
    exp_dir: PathBuf,
    knn_k:   Option<usize>,
}

impl EvalUseCase {
    /// `knn_k` overrides the neighbour count saved with the experiment
    pub fn new(exp_dir: impl Into<PathBuf>, knn_k: Option<usize>) -> Self {
        Self { exp_dir: exp_dir.into(), knn_k }
    }

    pub fn execute<B: AutodiffBackend>(&self, device: B::Device) -> Result<EvalReport> {
        let experiment = ExperimentDir::open(&self.exp_dir)?;
        let mut cfg = experiment.load_config()?;
        // Saved paths may be relative to wherever training ran
        cfg.exp_dir = experiment.root().to_path_buf();
        if let Some(k) = self.knn_k {
            cfg.knn_k = k;
        }
        // The memory bank is the full training set on a single rank
        cfg.gpu = None;
        cfg.world_size = 1;

        let ckpt = CheckpointManager::new(RunLayout::for_rank(&cfg.exp_dir, 0).ckpt_dir);
        let path = ckpt
            .latest()
            .ok_or_else(|| anyhow!("=> No checkpoint found at '{}'", ckpt.dir().display()))?;

        let model: ContrastiveModel<B> = model_config(&cfg).init(&device);
        build_optimizer(&cfg, Evaluate { cfg: &cfg, device, ckpt, path, model })
    }
}

struct Evaluate<'a, B: AutodiffBackend> {
    cfg:    &'a PretrainConfig,
    device: B::Device,
    ckpt:   CheckpointManager,
    path:   PathBuf,
    model:  ContrastiveModel<B>,
}

impl<B: AutodiffBackend> OptimizerVisitor<B> for Evaluate<'_, B> {
    type Output = Result<EvalReport>;

    fn model(&self) -> &ContrastiveModel<B> {
        &self.model
    }

    fn visit<O>(self, _optimizer: GroupedOptimizer<O>) -> Self::Output
    where
        O: Optimizer<ContrastiveModel<B>, B>,
    {
        let Evaluate { cfg, device, ckpt, path, model } = self;

        tracing::info!("=> Loading checkpoint '{}'", path.display());
        let record: CheckpointRecord<
            B,
            <ContrastiveModel<B> as Module<B>>::Record,
            <O as Optimizer<ContrastiveModel<B>, B>>::Record,
        > = ckpt.load(&path, &device)?;
        anyhow::ensure!(
            record.arch == cfg.arch,
            "Checkpoint '{}' holds a {} model, but the experiment config says {}",
            path.display(),
            record.arch,
            cfg.arch
        );
        let model = model.load_record(record.model);

        let data   = build_dataset::<B>(cfg, &device)?;
        let params = KnnParams { k: cfg.knn_k, temperature: cfg.knn_temperature, num_classes: data.num_classes };
        let knn_accuracy = validate_knn(&model.valid(), &data.memory_loader, &data.val_loader, &params)?;

        tracing::info!(
            "{} epoch {}: KNN accuracy {:.2}% (saved {:.2}%)",
            record.arch,
            record.epoch,
            knn_accuracy,
            record.accuracy
        );

        Ok(EvalReport {
            checkpoint: path,
            arch: record.arch,
            epoch: record.epoch,
            stored_accuracy: record.accuracy,
            knn_accuracy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pretrain_use_case::PretrainUseCase;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn tiny_cfg(exp_dir: PathBuf) -> PretrainConfig {
        PretrainConfig {
            seed:              Some(11),
            exp_dir,
            epochs:            1,
            batch_size:        8,
            image_size:        8,
            width:             2,
            proj_dim:          4,
            pred_hidden:       4,
            synthetic_samples: 20,
            synthetic_classes: 2,
            knn_k:             3,
            ..PretrainConfig::default()
        }
    }

    #[test]
    fn evaluates_the_latest_checkpoint_of_a_run() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = tmp.path().join("eval_run");

        let summaries = PretrainUseCase::new(tiny_cfg(exp.clone()))
            .execute::<TestBackend, _>(|_| Default::default())
            .unwrap();
        let trained_acc = summaries[0].last_accuracy.unwrap();

        let report = EvalUseCase::new(&exp, None).execute::<TestBackend>(Default::default()).unwrap();
        assert_eq!(report.arch, Arch::SimClr);
        assert_eq!(report.epoch, 1);
        assert!(report.checkpoint.ends_with("epoch_0000.mpk.gz"));
        assert_eq!(report.stored_accuracy, trained_acc);
        // Same weights, same data, same k: same accuracy
        assert!((report.knn_accuracy - trained_acc).abs() < 1e-9);
    }

    #[test]
    fn missing_experiment_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = EvalUseCase::new(tmp.path().join("nothing"), None)
            .execute::<TestBackend>(Default::default());
        assert!(result.is_err());
    }

    #[test]
    fn experiment_without_checkpoints_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = ExperimentDir::create(tmp.path().join("fresh")).unwrap();
        exp.save_config(&tiny_cfg(exp.root().to_path_buf())).unwrap();

        let err = EvalUseCase::new(exp.root(), None)
            .execute::<TestBackend>(Default::default())
            .unwrap_err();
        assert!(err.to_string().contains("No checkpoint found"));
    }
}
