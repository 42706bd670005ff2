// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything a run needs from the outside world that is not
// tensor math:
//
//   layout.rs       — experiment / per-rank directory layout and
//                     the persisted PretrainConfig JSON
//   checkpoint.rs   — full training state (model + optimizer)
//                     saved with Burn's NamedMpkGzFileRecorder
//   metrics.rs      — AverageMeter, ProgressMeter, results CSV
//   tensorboard.rs  — ScalarSink implementations
//   gpu_stats.rs    — nvidia-smi memory / utilisation report
//   distributed.rs  — in-process worker group (barrier,
//                     all-reduce, broadcast)
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Experiment and per-rank directories
pub mod layout;

/// Checkpoint saving, discovery and loading
pub mod checkpoint;

/// Meters and the KNN results CSV
pub mod metrics;

/// TensorBoard scalar sink
pub mod tensorboard;

/// GPU memory / utilisation report
pub mod gpu_stats;

/// Barrier, all-reduce and broadcast across worker threads
pub mod distributed;
