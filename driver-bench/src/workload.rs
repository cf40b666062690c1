//! Workload generation: row counts, statements and row values.
//!
//! Every backend sees the same statements and the same values so result
//! sets are identical in size across the comparison.

use std::fmt;
use std::ops::Range;

/// Scale ladder: 1e1 ..= 1e6 rows.
pub const SCALE_EXPONENTS: [u32; 6] = [1, 2, 3, 4, 5, 6];

/// Largest supported scale exponent.
pub const MAX_SCALE_EXPONENT: u32 = 6;

/// Multiplier used when throughput is reported as bytes: one "byte" per
/// record would be too small for the report to show, so each record counts
/// as a megabyte and bytes/sec reads as records/sec.
pub const BYTES_PER_RECORD: u64 = 1_000_000;

/// Row count for a scale exponent: exactly `10^exponent`.
pub fn row_count(scale_exponent: u32) -> u64 {
    10u64.pow(scale_exponent)
}

/// Statements and values for one table of `row_count` integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    row_count: u64,
}

impl Workload {
    pub fn new(row_count: u64) -> Self {
        Self { row_count }
    }

    pub fn for_exponent(scale_exponent: u32) -> Self {
        Self::new(row_count(scale_exponent))
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn schema(&self) -> &'static str {
        "create table t(i int)"
    }

    pub fn insert_statement(&self) -> &'static str {
        "insert into t values(?)"
    }

    pub fn scan_query(&self) -> &'static str {
        "select * from t"
    }

    pub fn count_query(&self) -> &'static str {
        "select count(*) from t"
    }

    pub fn clear_statement(&self) -> &'static str {
        "delete from t"
    }

    pub fn begin(&self) -> &'static str {
        "begin"
    }

    pub fn commit(&self) -> &'static str {
        "commit"
    }

    /// Values to insert: `0..row_count`.
    pub fn values(&self) -> Range<i64> {
        0..self.row_count as i64
    }
}

/// Which benchmark a case runs.
///
/// The `Native` kinds run the same workloads written directly against each
/// engine's own API instead of through the [`Connection`] layer, which shows
/// what that layer costs.
///
/// [`Connection`]: crate::backend::Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum BenchKind {
    /// Pre-populated table; scanning every row is timed.
    Read,
    /// Delete-then-reinsert inside a transaction; the inserts and commit are
    /// timed.
    Insert,
    ReadNative,
    InsertNative,
}

impl BenchKind {
    pub const ALL: [BenchKind; 4] = [
        BenchKind::Read,
        BenchKind::Insert,
        BenchKind::ReadNative,
        BenchKind::InsertNative,
    ];
    /// Kinds that run through the [`Connection`](crate::backend::Connection) layer.
    pub const DRIVER: [BenchKind; 2] = [BenchKind::Read, BenchKind::Insert];
    pub const NATIVE: [BenchKind; 2] = [BenchKind::ReadNative, BenchKind::InsertNative];

    /// Benchmark group name used in reports.
    pub fn group_name(self) -> &'static str {
        match self {
            BenchKind::Read => "Reading1",
            BenchKind::Insert => "InsertComparative",
            BenchKind::ReadNative => "Reading1Native",
            BenchKind::InsertNative => "InsertComparativeNative",
        }
    }

    pub fn is_native(self) -> bool {
        matches!(self, BenchKind::ReadNative | BenchKind::InsertNative)
    }

    /// Scans a pre-populated table, as opposed to reinserting it.
    pub fn is_read(self) -> bool {
        matches!(self, BenchKind::Read | BenchKind::ReadNative)
    }
}

impl fmt::Display for BenchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_count_is_an_exact_power_of_ten() {
        let expected = [10, 100, 1_000, 10_000, 100_000, 1_000_000];
        for (e, n) in SCALE_EXPONENTS.iter().zip(expected) {
            assert_eq!(row_count(*e), n);
            assert_eq!(Workload::for_exponent(*e).row_count(), n);
        }
        assert_eq!(SCALE_EXPONENTS.last(), Some(&MAX_SCALE_EXPONENT));
    }

    #[test]
    fn values_are_sequential_from_zero() {
        let w = Workload::for_exponent(1);
        assert_eq!(w.values().collect::<Vec<_>>(), (0..10).collect::<Vec<i64>>());
        assert_eq!(w.values(), Workload::new(10).values());
    }

    #[test]
    fn statements_are_backend_agnostic_sql() {
        let w = Workload::new(1);
        assert_eq!(w.schema(), "create table t(i int)");
        assert_eq!(w.insert_statement(), "insert into t values(?)");
        assert_eq!(w.scan_query(), "select * from t");
        assert_eq!(w.clear_statement(), "delete from t");
    }

    #[test]
    fn native_kinds_pair_with_driver_kinds() {
        let groups: Vec<&str> = BenchKind::ALL.iter().map(|k| k.group_name()).collect();
        assert_eq!(
            groups,
            [
                "Reading1",
                "InsertComparative",
                "Reading1Native",
                "InsertComparativeNative"
            ]
        );
        assert!(BenchKind::ReadNative.is_read() && BenchKind::ReadNative.is_native());
        assert!(!BenchKind::Insert.is_read() && !BenchKind::Insert.is_native());
    }
}
