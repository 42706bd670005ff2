// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `eval`, and all
// their flags.
//
// clap's derive macros generate --help text, error messages
// for bad values and the string → number / enum conversions.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::application::pretrain_use_case::PretrainConfig;
use crate::domain::run::{Arch, OptimizerKind};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pretrain a SimCLR / SimSiam model, resuming from the newest checkpoint
    Train(PretrainArgs),

    /// Report the KNN accuracy of an experiment's newest checkpoint
    Eval(EvalArgs),
}

/// Tensor backend the run executes on
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// GPU through wgpu (Vulkan / Metal / DX12)
    #[default]
    Wgpu,
    /// CPU
    Ndarray,
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct PretrainArgs {
    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu)]
    pub backend: BackendKind,

    /// Seed for the backend and every data RNG
    #[arg(long)]
    pub seed: Option<u64>,

    /// Device index of a single worker. Ignored when --world-size > 1
    #[arg(long)]
    pub gpu: Option<usize>,

    /// Rank that validates, writes results and saves checkpoints
    #[arg(long, default_value_t = 0)]
    pub base_gpu: usize,

    /// Number of workers, one per device
    #[arg(long, default_value_t = 1)]
    pub world_size: usize,

    /// SimCLR or SimSiam
    #[arg(long, default_value = "SimCLR")]
    pub arch: Arch,

    /// Trainer: default | accumulate
    #[arg(long, default_value = "default")]
    pub trainer: String,

    /// Micro-batches per optimizer step for the accumulate trainer
    #[arg(long, default_value_t = 2)]
    pub accum_steps: usize,

    /// Dataset: Cifar10 | Synthetic
    #[arg(long, default_value = "Synthetic")]
    pub set: String,

    /// Directory holding the dataset files
    #[arg(long, default_value = "data")]
    pub data: PathBuf,

    /// Experiment directory; its last component names the results CSV
    #[arg(long, default_value = "runs/pretrain")]
    pub exp_dir: PathBuf,

    #[arg(long, default_value_t = 100)]
    pub epochs: usize,

    /// Overrides the epoch stored in a resumed checkpoint
    #[arg(long)]
    pub start_epoch: Option<usize>,

    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,

    /// sgd | adam | rmsprop | adamw
    #[arg(long, default_value = "sgd")]
    pub optimizer: OptimizerKind,

    #[arg(long, default_value_t = 0.05)]
    pub lr: f64,

    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    #[arg(long, default_value_t = 5e-4)]
    pub weight_decay: f64,

    /// Train the projector in its own param group at lr * head_lr_scale
    #[arg(long)]
    pub fine_tune: bool,

    #[arg(long, default_value_t = 1.0)]
    pub head_lr_scale: f64,

    /// constant_lr | cosine_lr | multistep_lr | exp_lr
    #[arg(long, default_value = "cosine_lr")]
    pub lr_policy: String,

    #[arg(long, default_value_t = 0)]
    pub warmup_length: usize,

    #[arg(long, default_value_t = 0.1)]
    pub lr_gamma: f64,

    /// Epochs between multistep_lr decays
    #[arg(long, default_value_t = 30)]
    pub lr_adjust: usize,

    /// Validate every N epochs
    #[arg(long, default_value_t = 1)]
    pub test_interval: usize,

    /// Save every N epochs (0 = only after the last epoch)
    #[arg(long, default_value_t = 10)]
    pub save_every: usize,

    /// Log a progress line every N batches
    #[arg(long, default_value_t = 10)]
    pub print_freq: usize,

    #[arg(long, default_value_t = 200)]
    pub knn_k: usize,

    #[arg(long, default_value_t = 0.1)]
    pub knn_t: f64,

    /// NT-Xent temperature
    #[arg(long, default_value_t = 0.5)]
    pub temperature: f64,

    /// conv1 channels; the embedding has 4x as many features
    #[arg(long, default_value_t = 32)]
    pub width: usize,

    #[arg(long, default_value_t = 128)]
    pub proj_dim: usize,

    #[arg(long, default_value_t = 64)]
    pub pred_hidden: usize,

    /// Image side for the Synthetic set (Cifar10 is always 32)
    #[arg(long, default_value_t = 32)]
    pub image_size: usize,

    #[arg(long, default_value_t = 1024)]
    pub synthetic_samples: usize,

    #[arg(long, default_value_t = 10)]
    pub synthetic_classes: usize,
}

/// Convert CLI args into the application-layer PretrainConfig.
/// The backend choice stays behind in the CLI layer.
impl From<PretrainArgs> for PretrainConfig {
    fn from(a: PretrainArgs) -> Self {
        PretrainConfig {
            seed:              a.seed,
            gpu:               a.gpu,
            base_gpu:          a.base_gpu,
            world_size:        a.world_size,
            arch:              a.arch,
            trainer:           a.trainer,
            accum_steps:       a.accum_steps,
            set:               a.set,
            data_dir:          a.data,
            exp_dir:           a.exp_dir,
            epochs:            a.epochs,
            start_epoch:       a.start_epoch,
            batch_size:        a.batch_size,
            optimizer:         a.optimizer,
            lr:                a.lr,
            momentum:          a.momentum,
            weight_decay:      a.weight_decay,
            fine_tune:         a.fine_tune,
            head_lr_scale:     a.head_lr_scale,
            lr_policy:         a.lr_policy,
            warmup_length:     a.warmup_length,
            lr_gamma:          a.lr_gamma,
            lr_adjust:         a.lr_adjust,
            test_interval:     a.test_interval,
            save_every:        a.save_every,
            print_freq:        a.print_freq,
            knn_k:             a.knn_k,
            knn_temperature:   a.knn_t,
            temperature:       a.temperature,
            width:             a.width,
            proj_dim:          a.proj_dim,
            pred_hidden:       a.pred_hidden,
            image_size:        a.image_size,
            synthetic_samples: a.synthetic_samples,
            synthetic_classes: a.synthetic_classes,
        }
    }
}

/// All arguments for the `eval` command
#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Experiment directory written by `train`
    #[arg(long)]
    pub exp_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu)]
    pub backend: BackendKind,

    /// Device index to evaluate on
    #[arg(long)]
    pub gpu: Option<usize>,

    /// Override the neighbour count saved with the experiment
    #[arg(long)]
    pub knn_k: Option<usize>,
}
