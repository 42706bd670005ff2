// ============================================================
// Layer 2 — PretrainUseCase
// ============================================================
// Owns the run configuration and launches the workers:
//
//   Step 1: Validate the configuration
//   Step 2: Create the experiment directory     (Layer 6 - infra)
//   Step 3: Save config for later evaluation    (Layer 6 - infra)
//   Step 4: Launch one worker per rank          (Layer 5 - ml)
//
// With world_size == 1 the single worker runs on the calling
// thread, on device `gpu` (or the default device). Otherwise
// rank r runs on device r in its own scoped thread, and the
// ranks share a WorkerGroup for barriers, the initial weights
// and gradient averaging.
//
// Reference: Rust Book §16 (Fearless Concurrency)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::run::{Arch, OptimizerKind};
use crate::infra::distributed::WorkerGroup;
use crate::infra::layout::ExperimentDir;
use crate::ml::driver::{run_pretraining, RunSummary};

// ─── Pretraining Configuration ───────────────────────────────────────────────
// Every knob of a run. Serialisable so `eval` can rebuild the
// exact model and optimizer that produced a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PretrainConfig {
    pub seed:              Option<u64>,
    pub gpu:               Option<usize>,
    pub base_gpu:          usize,
    pub world_size:        usize,

    pub arch:              Arch,
    pub trainer:           String,
    pub accum_steps:       usize,

    pub set:               String,
    pub data_dir:          PathBuf,
    pub exp_dir:           PathBuf,

    pub epochs:            usize,
    pub start_epoch:       Option<usize>,
    pub batch_size:        usize,

    pub optimizer:         OptimizerKind,
    pub lr:                f64,
    pub momentum:          f64,
    pub weight_decay:      f64,
    pub fine_tune:         bool,
    pub head_lr_scale:     f64,

    pub lr_policy:         String,
    pub warmup_length:     usize,
    pub lr_gamma:          f64,
    pub lr_adjust:         usize,

    pub test_interval:     usize,
    pub save_every:        usize,
    pub print_freq:        usize,

    pub knn_k:             usize,
    pub knn_temperature:   f64,
    pub temperature:       f64,

    pub width:             usize,
    pub proj_dim:          usize,
    pub pred_hidden:       usize,

    pub image_size:        usize,
    pub synthetic_samples: usize,
    pub synthetic_classes: usize,
}

impl Default for PretrainConfig {
    fn default() -> Self {
        Self {
            seed:              None,
            gpu:               None,
            base_gpu:          0,
            world_size:        1,
            arch:              Arch::SimClr,
            trainer:           "default".to_string(),
            accum_steps:       2,
            set:               "Synthetic".to_string(),
            data_dir:          PathBuf::from("data"),
            exp_dir:           PathBuf::from("runs/pretrain"),
            epochs:            100,
            start_epoch:       None,
            batch_size:        256,
            optimizer:         OptimizerKind::Sgd,
            lr:                0.05,
            momentum:          0.9,
            weight_decay:      5e-4,
            fine_tune:         false,
            head_lr_scale:     1.0,
            lr_policy:         "cosine_lr".to_string(),
            warmup_length:     0,
            lr_gamma:          0.1,
            lr_adjust:         30,
            test_interval:     1,
            save_every:        10,
            print_freq:        10,
            knn_k:             200,
            knn_temperature:   0.1,
            temperature:       0.5,
            width:             32,
            proj_dim:          128,
            pred_hidden:       64,
            image_size:        32,
            synthetic_samples: 1024,
            synthetic_classes: 10,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("batch_size must be at least 2 for contrastive pairs, got {0}")]
    BatchTooSmall(usize),

    #[error("gpu {gpu} is out of range for world_size {world_size}")]
    GpuOutOfRange { gpu: usize, world_size: usize },

    #[error("base_gpu {base_gpu} is out of range for world_size {world_size}")]
    BaseGpuOutOfRange { base_gpu: usize, world_size: usize },

    #[error("start_epoch {start} is not below epochs {epochs}")]
    StartAfterEnd { start: usize, epochs: usize },

    #[error("{name} must be a positive finite number, got {value}")]
    NotPositive { name: &'static str, value: f64 },
}

impl PretrainConfig {
    /// Reject combinations that would only fail deep inside the run
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("epochs",        self.epochs),
            ("world_size",    self.world_size),
            ("test_interval", self.test_interval),
            ("print_freq",    self.print_freq),
            ("knn_k",         self.knn_k),
            ("accum_steps",   self.accum_steps),
            ("width",         self.width),
            ("proj_dim",      self.proj_dim),
            ("pred_hidden",   self.pred_hidden),
            ("image_size",    self.image_size),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*name));
        }
        if self.batch_size < 2 {
            return Err(ConfigError::BatchTooSmall(self.batch_size));
        }
        if let Some(gpu) = self.gpu.filter(|_| self.world_size > 1) {
            if gpu >= self.world_size {
                return Err(ConfigError::GpuOutOfRange { gpu, world_size: self.world_size });
            }
        }
        if self.base_gpu >= self.world_size {
            return Err(ConfigError::BaseGpuOutOfRange {
                base_gpu:   self.base_gpu,
                world_size: self.world_size,
            });
        }
        if let Some(start) = self.start_epoch {
            if start >= self.epochs {
                return Err(ConfigError::StartAfterEnd { start, epochs: self.epochs });
            }
        }
        for (name, value) in [
            ("lr",              self.lr),
            ("temperature",     self.temperature),
            ("knn_temperature", self.knn_temperature),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        Ok(())
    }

    /// Rank of this worker. In a multi-rank run the device index is
    /// the rank; a single worker is rank 0 whatever device it uses.
    pub fn rank(&self) -> usize {
        if self.world_size > 1 { self.gpu.unwrap_or(0) } else { 0 }
    }

    /// Only the base rank validates, writes results and saves checkpoints
    pub fn is_base_rank(&self) -> bool {
        self.rank() == self.base_gpu
    }

    /// Name used for the results CSV: the last component of exp_dir
    pub fn experiment_name(&self) -> String {
        experiment_name(&self.exp_dir)
    }
}

fn experiment_name(exp_dir: &Path) -> String {
    exp_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "experiment".to_string())
}

// ─── PretrainUseCase ──────────────────────────────────────────────────────────
pub struct PretrainUseCase {
    config: PretrainConfig,
}

impl PretrainUseCase {
    pub fn new(config: PretrainConfig) -> Self {
        Self { config }
    }

    /// Run pretraining on backend `B`. `device_for` maps a rank's
    /// device index to a Burn device.
    pub fn execute<B, F>(&self, device_for: F) -> Result<Vec<RunSummary>>
    where
        B: AutodiffBackend,
        F: Fn(Option<usize>) -> B::Device + Sync,
    {
        let cfg = &self.config;
        cfg.validate()?;

        // ── Experiment directory + config snapshot ───────────────────────────
        let experiment = ExperimentDir::create(&cfg.exp_dir)?;
        experiment.save_config(cfg)?;

        if cfg.world_size == 1 {
            let mut worker_cfg = cfg.clone();
            let device = device_for(worker_cfg.gpu);
            let summary = run_pretraining::<B>(&mut worker_cfg, device, None)?;
            return Ok(vec![summary]);
        }

        // ── One scoped thread per rank ───────────────────────────────────────
        let group = WorkerGroup::new(cfg.world_size)?;
        tracing::info!("Launching {} workers", group.world_size());

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..cfg.world_size)
                .map(|rank| {
                    let device_for = &device_for;
                    let group      = &group;
                    scope.spawn(move || run_rank::<B, F>(cfg, rank, group, device_for))
                })
                .collect();

            let mut summaries = Vec::with_capacity(handles.len());
            for (rank, handle) in handles.into_iter().enumerate() {
                let summary = handle
                    .join()
                    .map_err(|_| anyhow!("worker for rank {rank} panicked"))??;
                summaries.push(summary);
            }
            Ok(summaries)
        })
    }
}

fn run_rank<B, F>(
    base_cfg:   &PretrainConfig,
    rank:       usize,
    group:      &Arc<WorkerGroup>,
    device_for: &F,
) -> Result<RunSummary>
where
    B: AutodiffBackend,
    F: Fn(Option<usize>) -> B::Device + Sync,
{
    let _span = tracing::info_span!("rank", rank).entered();

    let mut cfg = base_cfg.clone();
    cfg.gpu = Some(rank);

    let member = group.join(rank)?;
    let device = device_for(cfg.gpu);

    let result = run_pretraining::<B>(&mut cfg, device, Some(member.clone()));
    if let Err(err) = &result {
        // Wake peers blocked on a collective this rank will never reach
        member.abort(&format!("rank {rank} failed: {err}"));
    }
    result
}
