// ============================================================
// Layer 6 — TensorBoard Writer
// ============================================================
// Scalars written during a run (train/loss, train/lr,
// test/knn_acc, test/lr, diagnostics/*) end up as TensorBoard
// event files under the rank's log directory:
//
//   tensorboard --logdir runs/<experiment>/rank_0/logs
//
// The epoch loop only sees `dyn ScalarSink`, so tests can swap
// in a sink that keeps the scalars in memory.

use std::path::Path;

use tensorboard_rs::summary_writer::SummaryWriter;

use crate::domain::traits::ScalarSink;

/// `ScalarSink` backed by a tensorboard-rs `SummaryWriter`.
pub struct TensorboardWriter {
    writer: SummaryWriter,
}

impl TensorboardWriter {
    pub fn new(log_dir: &Path) -> Self {
        tracing::debug!("TensorBoard logs go to '{}'", log_dir.display());
        Self { writer: SummaryWriter::new(log_dir) }
    }
}

impl ScalarSink for TensorboardWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        self.writer.add_scalar(tag, value as f32, step);
    }

    fn flush(&mut self) {
        self.writer.flush();
    }
}

/// Keeps every scalar in memory so tests can assert on them.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub scalars: Vec<(String, f64, usize)>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn tagged(&self, tag: &str) -> Vec<(f64, usize)> {
        self.scalars
            .iter()
            .filter(|(t, _, _)| t == tag)
            .map(|(_, v, s)| (*v, *s))
            .collect()
    }
}

#[cfg(test)]
impl ScalarSink for RecordingSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        self.scalars.push((tag.to_string(), value, step));
    }
}
