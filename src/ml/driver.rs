// ============================================================
// Layer 5 — Pretraining Epoch Loop
// ============================================================
// Sequence of one worker's run:
//
//   log config → seed → resolve trainer → log device
//   → build model + optimizer → build dataset → lr policy
//   → criterion → run / checkpoint / log directories
//   → resume from rank 0's newest checkpoint (if any)
//   → copy rank 0's weights to every rank  (world_size > 1)
//   → per epoch:
//        1. step the lr policy
//        2. train one epoch (the loader reshuffles the shard
//           for the epoch; gradients are averaged over ranks)
//        3. every `test_interval` epochs:
//             base rank: KNN validate, CSV row, maybe save
//                        + ETA / timing / diagnostics
//             all ranks: barrier        (world_size > 1)
//
// The optimizer's concrete type is only known inside
// `build_optimizer`, so everything after it runs in
// `EpochLoop::visit`.
//
// Reference: Burn Book §5 (Custom Training Loop)

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, Result};
use burn::{optim::Optimizer, prelude::*, tensor::backend::AutodiffBackend};

use crate::application::pretrain_use_case::PretrainConfig;
use crate::data::registry::build_dataset;
use crate::domain::traits::ScalarSink;
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointRecord},
    distributed::GroupMember,
    gpu_stats::GpuStats,
    layout::RunLayout,
    metrics::{format_eta, AverageMeter, ProgressMeter, ResultsCsv},
    tensorboard::TensorboardWriter,
};
use crate::ml::{
    loss::Criterion,
    lr_policy,
    model::{ContrastiveModel, ContrastiveModelConfig},
    optimizer::{build_optimizer, GroupedOptimizer, OptimizerVisitor},
    sync::broadcast_module,
    trainers::TrainerKind,
};

/// What one worker did, returned to the launcher.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub rank:             usize,
    pub start_epoch:      usize,
    pub epochs:           usize,
    /// KNN accuracy of the last validation on this rank, if it validated
    pub last_accuracy:    Option<f64>,
    pub final_lr:         f64,
    /// Checkpoint written last by this rank
    pub last_checkpoint:  Option<PathBuf>,
    pub conv1_weight_sum: f64,
}

/// Build the model for `cfg`
pub fn model_config(cfg: &PretrainConfig) -> ContrastiveModelConfig {
    ContrastiveModelConfig::new(cfg.width, cfg.proj_dim, cfg.pred_hidden, cfg.arch.uses_predictor())
}

/// Run pretraining for one rank. `cfg.start_epoch` is filled in on resume.
pub fn run_pretraining<B: AutodiffBackend>(
    cfg:    &mut PretrainConfig,
    device: B::Device,
    member: Option<Arc<GroupMember>>,
) -> Result<RunSummary> {
    tracing::info!("{:?}", cfg);

    if let Some(seed) = cfg.seed {
        B::seed(seed);
    }

    let trainer = TrainerKind::resolve(&cfg.trainer, cfg.accum_steps)?;

    if let Some(gpu) = cfg.gpu {
        tracing::info!("Use GPU: {} for training", gpu);
    }
    tracing::info!("Using device: {:?}", device);

    let model: ContrastiveModel<B> = model_config(cfg).init(&device);
    let cfg_snapshot = cfg.clone();
    build_optimizer(&cfg_snapshot, EpochLoop { cfg, device, member, model, trainer })
}

struct EpochLoop<'a, B: AutodiffBackend> {
    cfg:     &'a mut PretrainConfig,
    device:  B::Device,
    member:  Option<Arc<GroupMember>>,
    model:   ContrastiveModel<B>,
    trainer: TrainerKind,
}

impl<B: AutodiffBackend> OptimizerVisitor<B> for EpochLoop<'_, B> {
    type Output = Result<RunSummary>;

    fn model(&self) -> &ContrastiveModel<B> {
        &self.model
    }

    fn visit<O>(self, mut optimizer: GroupedOptimizer<O>) -> Self::Output
    where
        O: Optimizer<ContrastiveModel<B>, B>,
    {
        let EpochLoop { cfg, device, member, model, trainer } = self;
        // A single rank has nobody to average with
        let member = member.filter(|_| cfg.world_size > 1);
        if let Some(member) = &member {
            optimizer.sync_with(Arc::clone(member));
        }
        epoch_loop(cfg, &device, member.as_deref(), model, optimizer, trainer)
    }
}

type ResumeRecord<B, O> = CheckpointRecord<
    B,
    <ContrastiveModel<B> as Module<B>>::Record,
    <O as Optimizer<ContrastiveModel<B>, B>>::Record,
>;

/// Restore model, optimizer and (unless set explicitly) start_epoch from `path`
pub fn resume<B, O>(
    cfg:       &mut PretrainConfig,
    ckpt:      &CheckpointManager,
    path:      &Path,
    model:     ContrastiveModel<B>,
    optimizer: GroupedOptimizer<O>,
    device:    &B::Device,
) -> Result<(ContrastiveModel<B>, GroupedOptimizer<O>)>
where
    B: AutodiffBackend,
    O: Optimizer<ContrastiveModel<B>, B>,
{
    tracing::info!("=> Loading checkpoint '{}'", path.display());
    let record: ResumeRecord<B, O> = ckpt.load(path, device)?;

    anyhow::ensure!(
        record.arch == cfg.arch,
        "Checkpoint '{}' was trained as {}, but this run is {}",
        path.display(),
        record.arch,
        cfg.arch
    );
    if cfg.start_epoch.is_none() {
        tracing::info!("=> Setting new start epoch at {}", record.epoch);
        cfg.start_epoch = Some(record.epoch);
    }

    let model     = model.load_record(record.model);
    let optimizer = optimizer.load_record::<B>(record.optimizer);
    tracing::info!("=> Loaded checkpoint '{}' (epoch {})", path.display(), record.epoch);
    Ok((model, optimizer))
}

fn epoch_loop<B, O>(
    cfg:           &mut PretrainConfig,
    device:        &B::Device,
    member:        Option<&GroupMember>,
    mut model:     ContrastiveModel<B>,
    mut optimizer: GroupedOptimizer<O>,
    trainer:       TrainerKind,
) -> Result<RunSummary>
where
    B: AutodiffBackend,
    O: Optimizer<ContrastiveModel<B>, B>,
{
    let data      = build_dataset::<B>(cfg, device)?;
    let schedule  = lr_policy::resolve(&cfg.lr_policy, cfg)?;
    let criterion = Criterion::for_arch(cfg.arch, cfg.temperature);

    // ── Directories: this rank's, and rank 0's for resuming ──────────────────
    let rank        = cfg.rank();
    let layout      = RunLayout::create(&cfg.exp_dir, rank)?;
    let zero_layout = RunLayout::for_rank(&cfg.exp_dir, 0);
    let ckpt        = CheckpointManager::new(&layout.ckpt_dir);
    let zero_ckpt   = CheckpointManager::new(&zero_layout.ckpt_dir);

    match zero_ckpt.latest() {
        Some(path) => {
            (model, optimizer) = resume(cfg, &zero_ckpt, &path, model, optimizer, device)?;
        }
        None => tracing::info!("=> No checkpoint found at '{}'", zero_ckpt.dir().display()),
    }
    if let Some(member) = member {
        // Every rank resumed (or not) from the same checkpoint; start from identical weights
        model = broadcast_module(member, model)?;
    }

    let mut writer = TensorboardWriter::new(&layout.log_dir);
    let mut epoch_time      = AverageMeter::last_value("epoch_time", 4);
    let mut validation_time = AverageMeter::last_value("validation_time", 4);
    let mut train_time      = AverageMeter::last_value("train_time", 4);
    let progress_overall    = ProgressMeter::new(1, "Overall Timing");

    let results = if cfg.is_base_rank() {
        Some(ResultsCsv::new(&cfg.exp_dir, cfg.experiment_name())?)
    } else {
        None
    };
    let gpu_info = GpuStats::new(cfg.gpu);

    let start_epoch = cfg.start_epoch.unwrap_or(0);
    cfg.start_epoch = Some(start_epoch);

    let mut end_epoch  = Instant::now();
    let mut start_time = Instant::now();

    let conv1_sum = model.conv1_weight_sum();
    tracing::info!("Start Training: Model conv 1 initialization {}", conv1_sum);
    for line in model.module_summary() {
        tracing::info!("{}", line);
    }
    tracing::info!("Using Vanilla Criterion");

    let mut last_accuracy   = None;
    let mut last_checkpoint = None;
    let mut cur_lr          = optimizer.lr();

    for epoch in start_epoch..cfg.epochs {
        cur_lr = lr_policy::step(schedule.as_ref(), &mut optimizer, epoch);

        let start_train = Instant::now();
        model = trainer.train(&data.trn_loader, model, &criterion, &mut optimizer, epoch, cfg, &mut writer)?;
        train_time.update(start_train.elapsed().as_secs_f64() / 60.0, 1);

        if (epoch + 1) % cfg.test_interval != 0 {
            continue;
        }

        if let Some(results) = &results {
            let start_validation = Instant::now();
            let acc = trainer.validate(
                &data.memory_loader,
                &data.val_loader,
                &model,
                cfg,
                &mut writer,
                epoch,
                data.num_classes,
            )?;
            validation_time.update(start_validation.elapsed().as_secs_f64() / 60.0, 1);
            results.append(epoch, acc)?;
            last_accuracy = Some(acc);

            let save = cfg.save_every > 0 && (epoch + 1) % cfg.save_every == 0;
            if save || epoch == cfg.epochs - 1 {
                let record = CheckpointRecord::<B, _, _>::new(
                    epoch + 1,
                    cfg.arch,
                    acc,
                    model.clone().into_record(),
                    optimizer.to_record::<B>(),
                );
                let path = ckpt
                    .save(record, epoch)
                    .with_context(|| format!("Saving epoch {epoch} on rank {rank}"))?;
                tracing::info!("=> Saved checkpoint '{}'", path.display());
                last_checkpoint = Some(path);

                let elapsed      = start_time.elapsed();
                let seconds_todo = elapsed.mul_f64((cfg.epochs - epoch) as f64 / cfg.test_interval as f64);
                start_time = Instant::now();
                let (gpu_memory, gpu_util) = gpu_info.report();
                tracing::info!(
                    "==> ETA: {}\tGPU-M: {}\tGPU-U: {}",
                    format_eta(seconds_todo),
                    gpu_memory,
                    gpu_util
                );

                epoch_time.update(end_epoch.elapsed().as_secs_f64() / 60.0, 1);
                let timing = [&epoch_time, &validation_time, &train_time];
                progress_overall.display(epoch, &timing);
                progress_overall.write_to_tensorboard(&mut writer, "diagnostics", epoch, &timing);

                writer.add_scalar("test/lr", cur_lr, epoch);
                end_epoch = Instant::now();
            }
        }

        if let Some(member) = member {
            member.barrier()?;
        }
    }

    writer.flush();

    Ok(RunSummary {
        rank,
        start_epoch,
        epochs: cfg.epochs,
        last_accuracy,
        final_lr: cur_lr,
        last_checkpoint,
        conv1_weight_sum: model.conv1_weight_sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::Arch;
    use burn::backend::{Autodiff, NdArray};
    use std::fs;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_cfg(exp_dir: &Path, arch: Arch) -> PretrainConfig {
        PretrainConfig {
            arch,
            seed:              Some(5),
            exp_dir:           exp_dir.to_path_buf(),
            epochs:            2,
            batch_size:        8,
            image_size:        8,
            width:             2,
            proj_dim:          4,
            pred_hidden:       4,
            synthetic_samples: 24,
            synthetic_classes: 3,
            knn_k:             5,
            save_every:        0,
            print_freq:        100,
            lr:                0.05,
            ..PretrainConfig::default()
        }
    }

    #[test]
    fn two_epochs_then_resume_from_the_last_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = tmp.path().join("e2e");

        // ── First run: 2 epochs, saves only after the last one ──────────────
        let mut cfg = tiny_cfg(&exp, Arch::SimClr);
        let first = run_pretraining::<TestBackend>(&mut cfg, Default::default(), None).unwrap();
        assert_eq!(first.start_epoch, 0);
        let acc = first.last_accuracy.unwrap();
        assert!((0.0..=100.0).contains(&acc));

        let saved = first.last_checkpoint.clone().unwrap();
        assert!(saved.ends_with("rank_0/checkpoints/epoch_0001.mpk.gz"));

        let csv = fs::read_to_string(exp.join("e2e.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3, "header + one row per epoch:\n{csv}");
        assert!(csv.lines().nth(2).unwrap().starts_with("e2e,1,"));

        // ── Second run: 3 epochs, picks up at epoch 2 ───────────────────────
        let mut cfg = PretrainConfig { epochs: 3, ..tiny_cfg(&exp, Arch::SimClr) };
        let second = run_pretraining::<TestBackend>(&mut cfg, Default::default(), None).unwrap();
        assert_eq!(second.start_epoch, 2);
        assert_eq!(cfg.start_epoch, Some(2));
        assert!(second.last_checkpoint.unwrap().ends_with("epoch_0002.mpk.gz"));
    }

    #[test]
    fn save_every_epoch_keeps_a_checkpoint_per_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = tmp.path().join("periodic");

        let mut cfg = PretrainConfig { epochs: 3, save_every: 1, ..tiny_cfg(&exp, Arch::SimClr) };
        let summary = run_pretraining::<TestBackend>(&mut cfg, Default::default(), None).unwrap();

        let ckpt_dir = exp.join("rank_0").join("checkpoints");
        for epoch in 0..3 {
            let path = ckpt_dir.join(format!("epoch_{epoch:04}.mpk.gz"));
            assert!(path.exists(), "missing {}", path.display());
        }
        assert!(summary.last_checkpoint.unwrap().ends_with("epoch_0002.mpk.gz"));
    }

    #[test]
    fn explicit_start_epoch_wins_over_the_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = tmp.path().join("explicit");

        let mut cfg = tiny_cfg(&exp, Arch::SimSiam);
        run_pretraining::<TestBackend>(&mut cfg, Default::default(), None).unwrap();

        let mut cfg = PretrainConfig { epochs: 4, start_epoch: Some(3), ..tiny_cfg(&exp, Arch::SimSiam) };
        let summary = run_pretraining::<TestBackend>(&mut cfg, Default::default(), None).unwrap();
        assert_eq!(summary.start_epoch, 3);
    }

    #[test]
    fn resuming_with_another_arch_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = tmp.path().join("mismatch");

        let mut cfg = tiny_cfg(&exp, Arch::SimClr);
        run_pretraining::<TestBackend>(&mut cfg, Default::default(), None).unwrap();

        let mut cfg = PretrainConfig { epochs: 3, ..tiny_cfg(&exp, Arch::SimSiam) };
        assert!(run_pretraining::<TestBackend>(&mut cfg, Default::default(), None).is_err());
    }

    #[test]
    fn test_interval_skips_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = tmp.path().join("interval");

        let mut cfg = PretrainConfig { epochs: 3, test_interval: 2, ..tiny_cfg(&exp, Arch::SimClr) };
        let summary = run_pretraining::<TestBackend>(&mut cfg, Default::default(), None).unwrap();
        // Only epoch index 1 validates; the last epoch (2) is not on the interval
        assert!(summary.last_checkpoint.is_none());
        let csv = fs::read_to_string(exp.join("interval.csv")).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }
}
