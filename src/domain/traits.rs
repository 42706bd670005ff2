// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The pretraining driver is written against these seams so the
// pieces that change between experiments can be swapped by name:
//
//   LrSchedule — the injected learning-rate policy
//   ScalarSink — where per-epoch scalars go (TensorBoard, tests)
//
// Neither trait mentions Burn; implementations live in the
// ml and infra layers.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)
//            Rust Book §17 (Trait Objects)

// ─── LrSchedule ───────────────────────────────────────────────────────────────
/// A learning-rate policy: a pure function of the epoch (and,
/// optionally, the iteration inside the epoch).
///
/// Implementations:
///   - ConstantLr, CosineLr, MultiStepLr, ExponentialLr (ml::lr_policy)
pub trait LrSchedule: Send + Sync {
    /// Registry name, e.g. "cosine_lr"
    fn name(&self) -> &'static str;

    /// Learning rate to use for `epoch`. `iteration` is `None` when the
    /// policy is stepped once per epoch.
    fn lr_at(&self, epoch: usize, iteration: Option<usize>) -> f64;
}

// ─── ScalarSink ───────────────────────────────────────────────────────────────
/// Anything that can record a tagged scalar at a global step.
///
/// Implementations:
///   - TensorboardWriter → event files under the rank's log dir
///   - RecordingSink     → keeps everything in memory (tests)
pub trait ScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize);

    /// Push buffered values to their destination
    fn flush(&mut self) {}
}
