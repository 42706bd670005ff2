// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores the full training state with Burn's
// NamedMpkGzFileRecorder (full precision, so resumed runs
// continue bit-for-bit from the saved weights).
//
// What gets saved per checkpoint (one file per save event):
//   epoch      — the epoch to resume from (last finished + 1)
//   arch       — SimCLR / SimSiam
//   accuracy   — KNN top-1 at save time
//   model      — all learned parameters
//   optimizer  — momentum / moment buffers
//
// File naming convention:
//   rank_0/checkpoints/
//     epoch_0009.mpk.gz   ← saved after the 10th epoch
//     epoch_0019.mpk.gz
//     ...
//
// The newest file (by modification time) is the one resumed.
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, PrecisionSettings, Record, Recorder},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    marker::PhantomData,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::domain::run::Arch;

const EXTENSION: &str = ".mpk.gz";
const PREFIX: &str = "epoch_";

// ─── CheckpointRecord ─────────────────────────────────────────────────────────
/// Everything needed to resume a run. `M` is the model record and
/// `O` the optimizer record.
pub struct CheckpointRecord<B: Backend, M, O> {
    pub epoch:     usize,
    pub arch:      Arch,
    pub accuracy:  f64,
    pub model:     M,
    pub optimizer: O,
    _backend:      PhantomData<B>,
}

impl<B: Backend, M, O> CheckpointRecord<B, M, O> {
    pub fn new(epoch: usize, arch: Arch, accuracy: f64, model: M, optimizer: O) -> Self {
        Self { epoch, arch, accuracy, model, optimizer, _backend: PhantomData }
    }
}

/// Serialisable form of `CheckpointRecord`
#[derive(Serialize, Deserialize)]
pub struct CheckpointItem<M, O> {
    epoch:     usize,
    arch:      Arch,
    accuracy:  f64,
    model:     M,
    optimizer: O,
}

impl<B, M, O> Record<B> for CheckpointRecord<B, M, O>
where
    B: Backend,
    M: Record<B>,
    O: Record<B>,
{
    type Item<S: PrecisionSettings> = CheckpointItem<M::Item<S>, O::Item<S>>;

    fn into_item<S: PrecisionSettings>(self) -> Self::Item<S> {
        CheckpointItem {
            epoch:     self.epoch,
            arch:      self.arch,
            accuracy:  self.accuracy,
            model:     self.model.into_item(),
            optimizer: self.optimizer.into_item(),
        }
    }

    fn from_item<S: PrecisionSettings>(item: Self::Item<S>, device: &B::Device) -> Self {
        Self::new(
            item.epoch,
            item.arch,
            item.accuracy,
            M::from_item(item.model, device),
            O::from_item(item.optimizer, device),
        )
    }
}

// ─── CheckpointManager ────────────────────────────────────────────────────────
/// Owns one checkpoint directory.
pub struct CheckpointManager {
    dir:      PathBuf,
    recorder: NamedMpkGzFileRecorder<FullPrecisionSettings>,
}

impl CheckpointManager {
    /// Does not touch the filesystem; `save` creates the directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf(), recorder: NamedMpkGzFileRecorder::new() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name stem for the checkpoint written after `epoch_index`
    pub fn stem(epoch_index: usize) -> String {
        format!("{PREFIX}{epoch_index:04}")
    }

    /// Write `record` as `epoch_{epoch_index:04}.mpk.gz` and return its path
    pub fn save<B, M, O>(
        &self,
        record:      CheckpointRecord<B, M, O>,
        epoch_index: usize,
    ) -> Result<PathBuf>
    where
        B: Backend,
        M: Record<B>,
        O: Record<B>,
    {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create checkpoint dir '{}'", self.dir.display()))?;

        // The recorder appends the extension itself
        let stem = self.dir.join(Self::stem(epoch_index));
        self.recorder
            .record(record, stem.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", stem.display()))?;

        let path = with_extension(&stem);
        tracing::debug!("Saved checkpoint '{}'", path.display());
        Ok(path)
    }

    /// Most recently modified `epoch_*.mpk.gz` in the directory, if any
    pub fn latest(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_checkpoint_file(path))
            .filter_map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((modified, path))
            })
            .max_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pa.cmp(pb)))
            .map(|(_, path): (SystemTime, PathBuf)| path)
    }

    /// Load a checkpoint written by `save`. `path` may carry the
    /// `.mpk.gz` extension or not.
    pub fn load<B, M, O>(&self, path: &Path, device: &B::Device) -> Result<CheckpointRecord<B, M, O>>
    where
        B: Backend,
        M: Record<B>,
        O: Record<B>,
    {
        self.recorder
            .load(strip_extension(path), device)
            .with_context(|| {
                format!(
                    "Cannot load checkpoint '{}'. Was it written with the same model and optimizer?",
                    path.display()
                )
            })
    }
}

fn is_checkpoint_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(PREFIX) && n.ends_with(EXTENSION))
            .unwrap_or(false)
}

fn with_extension(stem: &Path) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(EXTENSION);
    PathBuf::from(name)
}

fn strip_extension(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_suffix(EXTENSION) {
        Some(stem) => PathBuf::from(stem),
        None       => path.to_path_buf(),
    }
}
