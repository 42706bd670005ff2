// ============================================================
// Layer 6 — GPU Usage Report
// ============================================================
// Reports memory use and utilisation of this rank's GPU for the
// ETA log line. Values come from:
//
//   nvidia-smi --query-gpu=memory.used,memory.total,utilization.gpu
//              --format=csv,noheader,nounits --id=<index>
//
// One query yields both values. Machines without an NVIDIA
// driver (CI, CPU-only runs) get "n/a" instead of an error, so
// a missing GPU never fails a run.

use std::process::Command;

const UNAVAILABLE: &str = "n/a";

#[derive(Debug, Clone, PartialEq)]
pub struct GpuSample {
    pub memory_used_mib:  u64,
    pub memory_total_mib: u64,
    pub utilization_pct:  u64,
}

/// Usage of one device index (`None` means device 0).
#[derive(Debug, Clone)]
pub struct GpuStats {
    index: usize,
}

impl GpuStats {
    pub fn new(gpu: Option<usize>) -> Self {
        Self { index: gpu.unwrap_or(0) }
    }

    /// Query nvidia-smi; `None` when it is missing or its output is unreadable
    pub fn sample(&self) -> Option<GpuSample> {
        let output = Command::new("nvidia-smi")
            .arg("--query-gpu=memory.used,memory.total,utilization.gpu")
            .arg("--format=csv,noheader,nounits")
            .arg(format!("--id={}", self.index))
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_query_line(&String::from_utf8_lossy(&output.stdout))
    }

    /// (memory, utilisation) from a single query, e.g. ("1234/8192 MiB", "87%")
    pub fn report(&self) -> (String, String) {
        format_report(self.sample().as_ref())
    }
}

fn format_report(sample: Option<&GpuSample>) -> (String, String) {
    match sample {
        Some(s) => (format_memory(s), format!("{}%", s.utilization_pct)),
        None    => (UNAVAILABLE.to_string(), UNAVAILABLE.to_string()),
    }
}

fn format_memory(sample: &GpuSample) -> String {
    format!("{}/{} MiB", sample.memory_used_mib, sample.memory_total_mib)
}

/// Parse the first line of "used, total, util" output
fn parse_query_line(text: &str) -> Option<GpuSample> {
    let line = text.lines().next()?;
    let mut fields = line.split(',').map(|f| f.trim().parse::<u64>());
    let memory_used_mib  = fields.next()?.ok()?;
    let memory_total_mib = fields.next()?.ok()?;
    let utilization_pct  = fields.next()?.ok()?;
    Some(GpuSample { memory_used_mib, memory_total_mib, utilization_pct })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nvidia_smi_csv() {
        let sample = parse_query_line("1234, 8192, 87\n").unwrap();
        assert_eq!(
            sample,
            GpuSample { memory_used_mib: 1234, memory_total_mib: 8192, utilization_pct: 87 }
        );
        assert_eq!(
            format_report(Some(&sample)),
            ("1234/8192 MiB".to_string(), "87%".to_string())
        );
    }

    #[test]
    fn missing_sample_reports_unavailable() {
        assert_eq!(format_report(None), ("n/a".to_string(), "n/a".to_string()));
    }

    #[test]
    fn garbage_output_is_rejected() {
        assert!(parse_query_line("").is_none());
        assert!(parse_query_line("[N/A], 8192, 3").is_none());
        assert!(parse_query_line("12, 34").is_none());
    }
}
