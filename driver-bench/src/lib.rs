//! SQL Driver Comparison Benchmark
//!
//! Measures read and write throughput of interchangeable SQL backends
//! (`sqlite3`: the bundled C library through rusqlite, `turso`: the pure-Rust
//! SQLite rewrite) running the same single-column integer workload, across row
//! counts from 1e1 to 1e6 and both in-memory and on-disk storage. The native
//! workloads run the same engines through their own APIs, without the
//! [`backend::Connection`] layer.
//!
//! Each benchmark case is one (storage mode, backend, scale exponent) cell of
//! the scenario matrix. A case opens a fresh connection, builds the schema,
//! then lets a host loop drive timed iterations. Only the per-row work is
//! timed; query issuance, transaction begin and table clearing are excluded.
//! The pure-Rust engine's heap use is counted by a global allocator
//! ([`heap`]) and audited around the whole case; any leak fails it.
//!
//! Run benchmarks: `cargo bench`
//! Run the standalone report: `cargo run --release -- --help`
//! Run tests: `cargo test`

pub mod audit;
pub mod backend;
pub mod case;
pub mod config;
pub mod error;
pub mod heap;
pub mod logging;
pub mod matrix;
pub mod naming;
pub mod native;
pub mod report;
pub mod runner;
pub mod timing;
pub mod workload;

pub use error::{BenchError, DriverError, Result};
