//! Report module: per-case statistics and the human-readable comparison.

use std::time::Duration;

use crate::audit::AuditReport;

/// Results from one benchmark case.
#[derive(Debug, Clone)]
pub struct CaseResult {
    /// Variant name, e.g. `sqlite3OnDisk1e4`.
    pub name: String,
    /// Benchmark group the case belongs to (`Reading1`, `InsertComparative`).
    pub group: String,
    pub backend_id: String,
    pub row_count: u64,
    /// Measured time of each recorded iteration.
    pub samples: Vec<Duration>,
    pub measured: Duration,
    /// Setup work kept out of `measured`.
    pub excluded: Duration,
    /// Throughput in bytes per iteration, when records are reported as bytes.
    pub bytes_per_iteration: Option<u64>,
    /// Allocation accounting, for audited backends.
    pub audit: Option<AuditReport>,
}

impl CaseResult {
    pub fn iterations(&self) -> usize {
        self.samples.len()
    }

    pub fn mean_us(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|d| d.as_secs_f64() * 1e6).sum();
        sum / self.samples.len() as f64
    }

    pub fn percentile_us(&self, pct: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self
            .samples
            .iter()
            .map(|d| d.as_secs_f64() * 1e6)
            .collect();
        sorted.sort_by(f64::total_cmp);
        let idx = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn rows_per_sec(&self) -> f64 {
        let mean = self.mean_us();
        if mean <= 0.0 {
            return 0.0;
        }
        self.row_count as f64 * 1_000_000.0 / mean
    }

    pub fn bytes_per_sec(&self) -> Option<f64> {
        let bytes = self.bytes_per_iteration?;
        let mean = self.mean_us();
        if mean <= 0.0 {
            return Some(0.0);
        }
        Some(bytes as f64 * 1_000_000.0 / mean)
    }

    /// Excluded time as a share of the whole iteration.
    pub fn excluded_pct(&self) -> f64 {
        let total = self.measured + self.excluded;
        if total.is_zero() {
            return 0.0;
        }
        self.excluded.as_secs_f64() / total.as_secs_f64() * 100.0
    }
}

fn human_rate(per_sec: f64) -> String {
    if per_sec >= 1e9 {
        format!("{:.2}G", per_sec / 1e9)
    } else if per_sec >= 1e6 {
        format!("{:.2}M", per_sec / 1e6)
    } else if per_sec >= 1e3 {
        format!("{:.2}K", per_sec / 1e3)
    } else {
        format!("{per_sec:.1}")
    }
}

/// Print a formatted report comparing case results.
pub fn print_report(results: &[CaseResult]) {
    println!("\n{}", "=".repeat(80));
    println!("  SQL Driver Comparison Report");
    println!("{}", "=".repeat(80));

    for result in results {
        let mean = result.mean_us();

        println!(
            "\n  Case: {} | Group: {} | Rows: {}",
            result.name, result.group, result.row_count
        );
        println!("  {}", "-".repeat(60));
        println!("  Iterations:      {:>10}", result.iterations());
        println!(
            "  Mean:            {:>10.0}µs  ({:.2}ms)",
            mean,
            mean / 1000.0
        );
        println!("  p50:             {:>10.0}µs", result.percentile_us(50.0));
        println!("  p95:             {:>10.0}µs", result.percentile_us(95.0));
        println!("  p99:             {:>10.0}µs", result.percentile_us(99.0));
        println!(
            "  Rows/sec:        {:>10}",
            human_rate(result.rows_per_sec())
        );
        if let Some(bps) = result.bytes_per_sec() {
            println!("  Bytes/sec:       {:>10}", human_rate(bps));
        }
        println!("  Excluded setup:  {:>9.1}%", result.excluded_pct());
        match &result.audit {
            Some(audit) => println!(
                "  Allocations:     {:>10}  ({} freed, {} bytes, {} leaked)",
                audit.allocations,
                audit.frees,
                audit.bytes_allocated,
                audit.leaked_bytes()
            ),
            None => println!("  Allocations:     {:>10}", "n/a"),
        }
    }

    println!("\n{}", "=".repeat(80));

    // Comparison table
    if results.len() >= 2 {
        println!("\n  Comparison Summary:");
        println!(
            "  {:24} {:18} {:>12} {:>12} {:>10}",
            "Case", "Group", "Mean (µs)", "p95 (µs)", "Rows/sec"
        );
        println!("  {}", "-".repeat(80));
        for r in results {
            println!(
                "  {:24} {:18} {:>12.0} {:>12.0} {:>10}",
                r.name,
                r.group,
                r.mean_us(),
                r.percentile_us(95.0),
                human_rate(r.rows_per_sec())
            );
        }
    }

    println!();
}
