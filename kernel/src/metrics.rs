// Metrics Collection
//
// Accumulates backend-call time per batch and turns it into one
// throughput line per batch plus a run summary.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::version::Version;

/// Measurement of one sealed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub mode: &'static str,
    pub cumulative_ops: u64,
    pub elapsed_secs: f64,
    pub throughput: f64,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.6} {:.3}",
            self.mode, self.cumulative_ops, self.elapsed_secs, self.throughput
        )
    }
}

/// Totals for a whole benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub backend: String,
    pub mode: String,
    pub total_ops: u64,
    pub batches: u64,
    pub commits: u64,
    pub elapsed_secs: f64,
    pub throughput: f64,
    pub final_version: Version,
}

fn throughput(ops: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        ops as f64 / secs
    } else {
        0.0
    }
}

#[derive(Debug)]
pub struct MetricsCollector {
    mode: &'static str,
    batch_elapsed: Duration,
    total_elapsed: Duration,
    total_ops: u64,
    batches: u64,
    commits: u64,
}

impl MetricsCollector {
    pub fn new(mode: &'static str) -> Self {
        Self {
            mode,
            batch_elapsed: Duration::ZERO,
            total_elapsed: Duration::ZERO,
            total_ops: 0,
            batches: 0,
            commits: 0,
        }
    }

    /// Add time spent inside a backend call to the open batch.
    pub fn observe(&mut self, elapsed: Duration) {
        self.batch_elapsed += elapsed;
    }

    pub fn count_commit(&mut self) {
        self.commits += 1;
    }

    /// Close the open batch of `ops` operations.
    pub fn finish_batch(&mut self, ops: usize) -> BatchReport {
        let ops = ops as u64;
        let elapsed = std::mem::take(&mut self.batch_elapsed);
        self.total_elapsed += elapsed;
        self.total_ops += ops;
        self.batches += 1;

        BatchReport {
            mode: self.mode,
            cumulative_ops: self.total_ops,
            elapsed_secs: elapsed.as_secs_f64(),
            throughput: throughput(ops, elapsed),
        }
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn summary(&self, backend: &str, final_version: Version) -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            backend: backend.to_string(),
            mode: self.mode.to_string(),
            total_ops: self.total_ops,
            batches: self.batches,
            commits: self.commits,
            elapsed_secs: self.total_elapsed.as_secs_f64(),
            throughput: throughput(self.total_ops, self.total_elapsed),
            final_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::GENESIS;

    #[test]
    fn batch_report_uses_observed_time() {
        let mut m = MetricsCollector::new("put");
        m.observe(Duration::from_millis(250));
        m.observe(Duration::from_millis(250));

        let report = m.finish_batch(100);
        assert_eq!(report.cumulative_ops, 100);
        assert!((report.elapsed_secs - 0.5).abs() < 1e-9);
        assert!((report.throughput - 200.0).abs() < 1e-6);
        assert_eq!(report.to_string(), "put 100 0.500000 200.000");
    }

    #[test]
    fn batches_reset_elapsed_and_accumulate_ops() {
        let mut m = MetricsCollector::new("get");
        m.observe(Duration::from_secs(1));
        m.finish_batch(10);

        m.observe(Duration::from_secs(2));
        let second = m.finish_batch(4);
        assert_eq!(second.cumulative_ops, 14);
        assert!((second.elapsed_secs - 2.0).abs() < 1e-9);

        let summary = m.summary("memory", GENESIS);
        assert_eq!(summary.total_ops, 14);
        assert_eq!(summary.batches, 2);
        assert!((summary.throughput - 14.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_reports_zero_throughput() {
        let mut m = MetricsCollector::new("init");
        assert_eq!(m.finish_batch(5).throughput, 0.0);
    }

    #[test]
    fn summary_serializes_to_json() {
        let mut m = MetricsCollector::new("init");
        m.count_commit();
        let json = serde_json::to_value(m.summary("journal", GENESIS)).unwrap();
        assert_eq!(json["mode"], "init");
        assert_eq!(json["commits"], 1);
        assert!(json["final_version"].as_str().unwrap().starts_with("0x00"));
    }
}
