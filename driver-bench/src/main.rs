//! Standalone benchmark runner that prints the formatted report.
//!
//! Runs the scenario matrix with a fixed number of warmup and sample
//! iterations per case instead of criterion's adaptive sampling, which keeps
//! the full 1e6-row ladder affordable.
//!
//! Usage:
//!   cargo run --release -- --workload read --max-exponent 4
//!   cargo run --release -- --backend turso --mode on-disk --recs-per-sec
//!   cargo run --release -- --workload native --max-exponent 5

use anyhow::{Context, Result};
use clap::Parser;
use driver_bench::backend::BackendRegistry;
use driver_bench::config::Cli;
use driver_bench::logging::initialize_logger;
use driver_bench::matrix::{FixedIterations, MatrixDriver, ScratchSpace};
use driver_bench::report::print_report;

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_logger(cli.log_level.into(), cli.log_file.as_deref())
        .context("initializing logging")?;

    let config = cli.config()?;
    let registry = BackendRegistry::with_defaults();
    let scratch = match &cli.scratch_dir {
        Some(dir) => ScratchSpace::in_dir(dir),
        None => ScratchSpace::new(),
    }
    .context("creating the scratch directory")?;

    println!("Running SQL driver comparison...");
    println!("  Scratch dir:   {}", scratch.path().display());
    println!("  Workloads:     {}", config.kinds.len());
    println!("  Warmup iters:  {}", config.warmup);
    println!("  Sample iters:  {}", config.samples);

    let driver = MatrixDriver::new(&registry, scratch, config.recs_per_sec);
    let mut host = FixedIterations {
        warmup: config.warmup,
        samples: config.samples,
    };

    // Built up front so a bad backend id fails before anything runs.
    let matrices = config
        .kinds
        .iter()
        .map(|&kind| Ok((kind, config.matrix(&registry, kind)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut results = Vec::new();
    for (kind, matrix) in matrices {
        println!("\n── {kind}: {} case(s) ─────────────────────────────", matrix.len());
        let group = driver
            .run(&matrix, kind, &mut host)
            .with_context(|| format!("{kind} benchmark failed"))?;
        results.extend(group);
    }

    print_report(&results);
    Ok(())
}
