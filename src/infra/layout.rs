// ============================================================
// Layer 6 — Experiment Directory Layout
// ============================================================
// Everything a run writes lives under its experiment directory:
//
//   <exp_dir>/
//     pretrain_config.json      ← full PretrainConfig
//     <name>.csv                ← KNN accuracy per validation
//     rank_0/
//       checkpoints/epoch_0009.mpk.gz
//       logs/                   ← TensorBoard event files
//     rank_1/
//       ...
//
// Every rank writes into its own run directory. Resume always
// reads rank 0's checkpoints so all ranks restart from the same
// state.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::pretrain_use_case::PretrainConfig;

const CONFIG_FILE: &str = "pretrain_config.json";

/// The root directory of one experiment.
#[derive(Debug, Clone)]
pub struct ExperimentDir {
    root: PathBuf,
}

impl ExperimentDir {
    /// Create the directory (and parents) if needed
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Cannot create experiment dir '{}'", root.display()))?;
        Ok(Self { root })
    }

    /// Open an existing experiment without creating anything
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        anyhow::ensure!(
            root.is_dir(),
            "Experiment dir '{}' does not exist. Have you run 'train' first?",
            root.display()
        );
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn save_config(&self, cfg: &PretrainConfig) -> Result<()> {
        let path = self.root.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved pretraining config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<PretrainConfig> {
        let path = self.root.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))
    }
}

/// Directories owned by a single rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub run_dir:  PathBuf,
    pub ckpt_dir: PathBuf,
    pub log_dir:  PathBuf,
}

impl RunLayout {
    pub fn for_rank(exp_dir: &Path, rank: usize) -> Self {
        let run_dir = exp_dir.join(format!("rank_{rank}"));
        Self {
            ckpt_dir: run_dir.join("checkpoints"),
            log_dir:  run_dir.join("logs"),
            run_dir,
        }
    }

    /// Same as `for_rank`, but also creates the directories
    pub fn create(exp_dir: &Path, rank: usize) -> Result<Self> {
        let layout = Self::for_rank(exp_dir, rank);
        for dir in [&layout.ckpt_dir, &layout.log_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        }
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_dirs_are_nested_under_the_experiment() {
        let layout = RunLayout::for_rank(Path::new("runs/exp"), 3);
        assert_eq!(layout.run_dir, PathBuf::from("runs/exp/rank_3"));
        assert_eq!(layout.ckpt_dir, PathBuf::from("runs/exp/rank_3/checkpoints"));
        assert_eq!(layout.log_dir, PathBuf::from("runs/exp/rank_3/logs"));
    }

    #[test]
    fn create_makes_checkpoint_and_log_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RunLayout::create(tmp.path(), 0).unwrap();
        assert!(layout.ckpt_dir.is_dir());
        assert!(layout.log_dir.is_dir());
    }

    #[test]
    fn config_round_trips_through_the_experiment_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = ExperimentDir::create(tmp.path().join("exp")).unwrap();
        let cfg = PretrainConfig { epochs: 7, ..PretrainConfig::default() };
        exp.save_config(&cfg).unwrap();

        let reopened = ExperimentDir::open(exp.root()).unwrap();
        assert_eq!(reopened.load_config().unwrap().epochs, 7);
    }

    #[test]
    fn opening_a_missing_experiment_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ExperimentDir::open(tmp.path().join("nope")).is_err());
    }
}
