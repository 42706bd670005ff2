// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// Business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train` — pretrain (or resume) an experiment
//   2. `eval`  — KNN accuracy of an experiment's newest checkpoint
//
// The backend is picked here and nowhere else: the layers below
// are generic over Burn's `AutodiffBackend`.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use burn::backend::{
    ndarray::NdArrayDevice,
    wgpu::WgpuDevice,
    Autodiff, NdArray, Wgpu,
};
use clap::Parser;
use commands::{BackendKind, Commands, EvalArgs, PretrainArgs};

use crate::application::{
    eval_use_case::EvalUseCase,
    pretrain_use_case::{PretrainConfig, PretrainUseCase},
};

type GpuBackend = Autodiff<Wgpu>;
type CpuBackend = Autodiff<NdArray>;

#[derive(Parser, Debug)]
#[command(
    name = "selfsup-pretrain",
    version,
    about = "Self-supervised (SimCLR / SimSiam) pretraining with KNN monitoring."
)]
pub struct Cli {
    /// The subcommand to run (train or eval)
    #[command(subcommand)]
    pub command: Commands,
}

/// One wgpu device per rank; no index means the default adapter
fn wgpu_device(gpu: Option<usize>) -> WgpuDevice {
    gpu.map(WgpuDevice::DiscreteGpu).unwrap_or_default()
}

impl Cli {
    /// Route to the use case; this layer never computes anything itself.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Eval(args)  => run_eval(args),
        }
    }
}

fn run_train(args: PretrainArgs) -> Result<()> {
    let backend = args.backend;
    let config: PretrainConfig = args.into();
    tracing::info!("Starting pretraining in '{}' on {:?}", config.exp_dir.display(), backend);

    let use_case  = PretrainUseCase::new(config);
    let summaries = match backend {
        BackendKind::Wgpu    => use_case.execute::<GpuBackend, _>(wgpu_device)?,
        BackendKind::Ndarray => use_case.execute::<CpuBackend, _>(|_| NdArrayDevice::Cpu)?,
    };

    for summary in &summaries {
        match summary.last_accuracy {
            Some(acc) => println!(
                "rank {}: epochs {}..{} done, KNN accuracy {:.2}%, final lr {:.6}",
                summary.rank, summary.start_epoch, summary.epochs, acc, summary.final_lr
            ),
            None => println!(
                "rank {}: epochs {}..{} done, final lr {:.6}",
                summary.rank, summary.start_epoch, summary.epochs, summary.final_lr
            ),
        }
        if let Some(path) = &summary.last_checkpoint {
            println!("rank {}: last checkpoint '{}'", summary.rank, path.display());
        }
    }
    Ok(())
}

fn run_eval(args: EvalArgs) -> Result<()> {
    let use_case = EvalUseCase::new(args.exp_dir, args.knn_k);
    let report = match args.backend {
        BackendKind::Wgpu    => use_case.execute::<GpuBackend>(wgpu_device(args.gpu))?,
        BackendKind::Ndarray => use_case.execute::<CpuBackend>(NdArrayDevice::Cpu)?,
    };

    println!("Checkpoint: {}", report.checkpoint.display());
    println!("{} at epoch {}", report.arch, report.epoch);
    println!("KNN accuracy: {:.2}% (saved {:.2}%)", report.knn_accuracy, report.stored_accuracy);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::{Arch, OptimizerKind};

    #[test]
    fn train_flags_map_onto_the_config() {
        let cli = Cli::try_parse_from([
            "selfsup-pretrain",
            "train",
            "--backend", "ndarray",
            "--arch", "simsiam",
            "--optimizer", "adamw",
            "--epochs", "3",
            "--knn-t", "0.07",
            "--fine-tune",
            "--exp-dir", "runs/demo",
        ])
        .unwrap();

        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(args.backend, BackendKind::Ndarray);

        let cfg: PretrainConfig = args.into();
        assert_eq!(cfg.arch, Arch::SimSiam);
        assert_eq!(cfg.optimizer, OptimizerKind::AdamW);
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.knn_temperature, 0.07);
        assert!(cfg.fine_tune);
        assert_eq!(cfg.experiment_name(), "demo");
        assert_eq!(cfg.start_epoch, None);
    }

    #[test]
    fn cli_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["selfsup-pretrain", "train"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: PretrainConfig = args.into();
        let default = PretrainConfig::default();
        assert_eq!(cfg.lr, default.lr);
        assert_eq!(cfg.lr_policy, default.lr_policy);
        assert_eq!(cfg.save_every, default.save_every);
        assert_eq!(cfg.knn_k, default.knn_k);
        assert_eq!(cfg.data_dir, default.data_dir);
    }

    #[test]
    fn unknown_arch_is_rejected_by_clap() {
        assert!(Cli::try_parse_from(["selfsup-pretrain", "train", "--arch", "byol"]).is_err());
    }

    #[test]
    fn eval_requires_an_experiment() {
        assert!(Cli::try_parse_from(["selfsup-pretrain", "eval"]).is_err());
        let cli = Cli::try_parse_from(["selfsup-pretrain", "eval", "--exp-dir", "runs/x", "--knn-k", "20"]).unwrap();
        let Commands::Eval(args) = cli.command else { panic!("expected eval") };
        assert_eq!(args.knn_k, Some(20));
    }
}
