//! Run configuration.
//!
//! The standalone runner takes its options from the command line ([`Cli`]);
//! the criterion bench, whose arguments belong to criterion, reads the
//! environment ([`BenchConfig::from_env`]). Both resolve to a
//! [`BenchConfig`].

use std::env;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::backend::BackendRegistry;
use crate::case::StorageMode;
use crate::error::{BenchError, Result};
use crate::matrix::ScenarioMatrix;
use crate::native::NativeEngine;
use crate::workload::{BenchKind, MAX_SCALE_EXPONENT};

/// Report records as bytes (`1_000_000` per record) as well as rows.
pub const RECS_PER_SEC_VAR: &str = "DRIVER_BENCH_RECS_PER_SEC";
/// Largest scale exponent to run, `1..=6`.
pub const MAX_EXPONENT_VAR: &str = "DRIVER_BENCH_MAX_EXPONENT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    pub recs_per_sec: bool,
    pub max_exponent: u32,
    pub modes: Vec<StorageMode>,
    /// Backend ids to run; empty means every registered backend. Native
    /// kinds always run every native engine.
    pub backends: Vec<String>,
    pub kinds: Vec<BenchKind>,
    pub warmup: u64,
    pub samples: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            recs_per_sec: false,
            max_exponent: MAX_SCALE_EXPONENT,
            modes: StorageMode::ALL.to_vec(),
            backends: Vec::new(),
            kinds: BenchKind::ALL.to_vec(),
            warmup: 2,
            samples: 10,
        }
    }
}

fn parse_flag(var: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BenchError::Config(format!(
            "{var}={other:?} is not a boolean"
        ))),
    }
}

impl BenchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` finds.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup(RECS_PER_SEC_VAR) {
            config.recs_per_sec = parse_flag(RECS_PER_SEC_VAR, &value)?;
        }
        if let Some(value) = lookup(MAX_EXPONENT_VAR) {
            config.max_exponent = value.trim().parse().map_err(|_| {
                BenchError::Config(format!("{MAX_EXPONENT_VAR}={value:?} is not a number"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SCALE_EXPONENT).contains(&self.max_exponent) {
            return Err(BenchError::Config(format!(
                "max exponent {} is outside 1..={MAX_SCALE_EXPONENT}",
                self.max_exponent
            )));
        }
        if self.samples == 0 {
            return Err(BenchError::Config("at least one sample is needed".into()));
        }
        Ok(())
    }

    pub fn exponents(&self) -> Vec<u32> {
        (1..=self.max_exponent).collect()
    }

    /// The matrix these options select for `kind`. Unknown backend ids are
    /// rejected here, before any case runs.
    pub fn matrix(&self, registry: &BackendRegistry, kind: BenchKind) -> Result<ScenarioMatrix> {
        let backends = if kind.is_native() {
            NativeEngine::ALL.iter().map(|e| e.id().to_string()).collect()
        } else if self.backends.is_empty() {
            registry.ids().map(str::to_string).collect()
        } else {
            for id in &self.backends {
                registry.get(id)?;
            }
            self.backends.clone()
        };
        Ok(ScenarioMatrix::new(
            self.modes.clone(),
            backends,
            self.exponents(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkloadArg {
    Read,
    Insert,
    ReadNative,
    InsertNative,
    /// Both native workloads
    Native,
    All,
}

impl WorkloadArg {
    pub fn kinds(self) -> Vec<BenchKind> {
        match self {
            WorkloadArg::Read => vec![BenchKind::Read],
            WorkloadArg::Insert => vec![BenchKind::Insert],
            WorkloadArg::ReadNative => vec![BenchKind::ReadNative],
            WorkloadArg::InsertNative => vec![BenchKind::InsertNative],
            WorkloadArg::Native => BenchKind::NATIVE.to_vec(),
            WorkloadArg::All => BenchKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "driver-bench")]
#[command(about = "Compare SQL backends on identical read and insert workloads")]
#[command(version)]
pub struct Cli {
    /// Workload to run
    #[arg(short, long, value_enum, default_value_t = WorkloadArg::All)]
    pub workload: WorkloadArg,

    /// Backend to run (repeatable, default: all registered)
    #[arg(short, long = "backend")]
    pub backends: Vec<String>,

    /// Storage mode to run (repeatable, default: both)
    #[arg(short, long = "mode", value_enum)]
    pub modes: Vec<StorageMode>,

    /// Largest scale exponent: cases run 1e1 up to 1e<N> rows
    #[arg(long, default_value_t = MAX_SCALE_EXPONENT,
          value_parser = clap::value_parser!(u32).range(1..=MAX_SCALE_EXPONENT as i64))]
    pub max_exponent: u32,

    /// Unreported iterations before sampling
    #[arg(long, default_value_t = 2)]
    pub warmup: u64,

    /// Reported iterations per case
    #[arg(long, default_value_t = 10)]
    pub samples: u64,

    /// Also report throughput as bytes, counting each record as 1MB
    #[arg(long)]
    pub recs_per_sec: bool,

    /// Log level on stderr
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Also log everything to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Keep on-disk databases here instead of a temporary directory
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
}

impl Cli {
    pub fn config(&self) -> Result<BenchConfig> {
        let config = BenchConfig {
            recs_per_sec: self.recs_per_sec,
            max_exponent: self.max_exponent,
            modes: if self.modes.is_empty() {
                StorageMode::ALL.to_vec()
            } else {
                self.modes.clone()
            },
            backends: self.backends.clone(),
            kinds: self.workload.kinds(),
            warmup: self.warmup,
            samples: self.samples,
        };
        config.validate()?;
        Ok(config)
    }
}
