// ============================================================
// Layer 6 — Meters and Results Log
// ============================================================
// Three bookkeeping helpers used by the epoch loop:
//
//   AverageMeter  — last value + running average of a quantity
//                   (batch time, loss, epoch time in minutes ...)
//   ProgressMeter — prints a row of meters with a "[  3/120]"
//                   counter and mirrors them to TensorBoard
//   ResultsCsv    — appends one row per KNN validation to
//                   <exp_dir>/<name>.csv
//
// Example CSV output:
//   name,epoch,knn_acc
//   simclr_cifar,0,31.420000
//   simclr_cifar,1,38.050000
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::domain::traits::ScalarSink;

// ─── AverageMeter ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct AverageMeter {
    name:      String,
    precision: usize,
    /// Show only the last value (no running average) when false
    write_avg: bool,
    val:       f64,
    sum:       f64,
    count:     usize,
}

impl AverageMeter {
    pub fn new(name: impl Into<String>, precision: usize) -> Self {
        Self { name: name.into(), precision, write_avg: true, val: 0.0, sum: 0.0, count: 0 }
    }

    /// A meter whose display and TensorBoard value is the last update only
    pub fn last_value(name: impl Into<String>, precision: usize) -> Self {
        Self { write_avg: false, ..Self::new(name, precision) }
    }

    /// Record `val`, weighted as `n` observations
    pub fn update(&mut self, val: f64, n: usize) {
        self.val    = val;
        self.sum   += val * n as f64;
        self.count += n;
    }

    fn name(&self) -> &str {
        &self.name
    }

    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// The value this meter reports to TensorBoard
    pub fn reported(&self) -> f64 {
        if self.write_avg { self.avg() } else { self.val }
    }
}

impl fmt::Display for AverageMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.precision;
        if self.write_avg {
            write!(f, "{} {:.p$} ({:.p$})", self.name, self.val, self.avg())
        } else {
            write!(f, "{} {:.p$}", self.name, self.val)
        }
    }
}

// ─── ProgressMeter ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    num_batches: usize,
    prefix:      String,
}

impl ProgressMeter {
    pub fn new(num_batches: usize, prefix: impl Into<String>) -> Self {
        Self { num_batches, prefix: prefix.into() }
    }

    /// Format a progress row, e.g. "Epoch: [3][ 10/120]\tloss 1.2 (1.4)"
    pub fn line(&self, batch: usize, meters: &[&AverageMeter]) -> String {
        let width = self.num_batches.to_string().len();
        let mut line = format!("{}[{:>width$}/{}]", self.prefix, batch, self.num_batches);
        for meter in meters {
            line.push('\t');
            line.push_str(&meter.to_string());
        }
        line
    }

    pub fn display(&self, batch: usize, meters: &[&AverageMeter]) {
        tracing::info!("{}", self.line(batch, meters));
    }

    /// Mirror every meter to `writer` under `<prefix>/<meter name>`
    pub fn write_to_tensorboard(
        &self,
        writer:      &mut dyn ScalarSink,
        prefix:      &str,
        global_step: usize,
        meters:      &[&AverageMeter],
    ) {
        for meter in meters {
            writer.add_scalar(&format!("{prefix}/{}", meter.name()), meter.reported(), global_step);
        }
    }
}

/// Render a duration like Python's timedelta: "1 day, 2:03:04" / "0:05:00"
pub fn format_eta(eta: Duration) -> String {
    let total = eta.as_secs();
    let days  = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let mins  = (total % 3_600) / 60;
    let secs  = total % 60;
    match days {
        0 => format!("{hours}:{mins:02}:{secs:02}"),
        1 => format!("1 day, {hours}:{mins:02}:{secs:02}"),
        d => format!("{d} days, {hours}:{mins:02}:{secs:02}"),
    }
}

// ─── ResultsCsv ───────────────────────────────────────────────────────────────
/// Appends KNN validation results to `<dir>/<name>.csv`.
pub struct ResultsCsv {
    name:     String,
    csv_path: PathBuf,
}

impl ResultsCsv {
    /// Writes the CSV header if the file doesn't exist yet, so
    /// resumed runs keep appending to the same log.
    pub fn new(dir: &Path, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        fs::create_dir_all(dir)?;
        let csv_path = dir.join(format!("{name}.csv"));

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "name,epoch,knn_acc")?;
            tracing::debug!("Created results CSV: '{}'", csv_path.display());
        }

        Ok(Self { name, csv_path })
    }

    pub fn append(&self, epoch: usize, knn_acc: f64) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(f, "{},{},{:.6}", self.name, epoch, knn_acc)?;
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tensorboard::RecordingSink;

    #[test]
    fn meter_tracks_weighted_average() {
        let mut m = AverageMeter::new("loss", 3);
        m.update(2.0, 1);
        m.update(4.0, 3);
        assert_eq!(m.val(), 4.0);
        assert!((m.avg() - 3.5).abs() < 1e-12);
        assert_eq!(m.to_string(), "loss 4.000 (3.500)");
    }

    #[test]
    fn last_value_meter_reports_latest() {
        let mut m = AverageMeter::last_value("epoch_time", 2);
        m.update(1.0, 1);
        m.update(3.0, 1);
        assert_eq!(m.reported(), 3.0);
        assert_eq!(m.to_string(), "epoch_time 3.00");
    }

    #[test]
    fn empty_meter_average_is_zero() {
        let m = AverageMeter::new("x", 1);
        assert_eq!(m.avg(), 0.0);
        assert_eq!(m.count(), 0);
    }

    #[test]
    fn progress_line_pads_the_counter() {
        let mut loss = AverageMeter::new("loss", 1);
        loss.update(1.5, 1);
        let progress = ProgressMeter::new(120, "Epoch: [3]");
        assert_eq!(progress.line(7, &[&loss]), "Epoch: [3][  7/120]\tloss 1.5 (1.5)");
    }

    #[test]
    fn progress_meter_exports_scalars() {
        let mut t = AverageMeter::last_value("train_time", 4);
        t.update(0.25, 1);
        let mut sink = RecordingSink::default();
        ProgressMeter::new(1, "Overall Timing")
            .write_to_tensorboard(&mut sink, "diagnostics", 4, &[&t]);
        assert_eq!(sink.scalars, vec![("diagnostics/train_time".to_string(), 0.25, 4)]);
    }

    #[test]
    fn eta_formats_like_timedelta() {
        assert_eq!(format_eta(Duration::from_secs(65)), "0:01:05");
        assert_eq!(format_eta(Duration::from_secs(90_061)), "1 day, 1:01:01");
        assert_eq!(format_eta(Duration::from_secs(3 * 86_400)), "3 days, 0:00:00");
    }

    #[test]
    fn results_csv_appends_rows_under_one_header() {
        let tmp = tempfile::tempdir().unwrap();
        let csv = ResultsCsv::new(tmp.path(), "exp").unwrap();
        csv.append(0, 12.5).unwrap();

        // Re-opening must not write a second header
        let csv = ResultsCsv::new(tmp.path(), "exp").unwrap();
        csv.append(1, 20.0).unwrap();

        let text = fs::read_to_string(tmp.path().join("exp.csv")).unwrap();
        assert_eq!(text, "name,epoch,knn_acc\nexp,0,12.500000\nexp,1,20.000000\n");
    }
}
