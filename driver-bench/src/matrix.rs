//! Scenario matrix: storage modes x backends x scale exponents.
//!
//! Cases run one after another in a fixed order (mode, then backend, then
//! exponent). Every on-disk case gets a fresh database path in the scratch
//! directory, and the file is removed before the next case starts.
//!
//! A cell is handed to the [`HostLoop`] as a [`PendingCase`]: the database is
//! only opened and filled when the host first asks for the runner, so a host
//! that filters cells by name never pays for the ones it skips.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::backend::{BackendRegistry, Target};
use crate::case::{BenchmarkCase, StorageMode};
use crate::error::{BenchError, Result};
use crate::native::NativeEngine;
use crate::report::CaseResult;
use crate::runner::{CaseRunner, Driver};
use crate::workload::{BenchKind, BYTES_PER_RECORD, SCALE_EXPONENTS};

const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

/// The cells to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioMatrix {
    modes: Vec<StorageMode>,
    backends: Vec<String>,
    exponents: Vec<u32>,
}

impl ScenarioMatrix {
    pub fn new(modes: Vec<StorageMode>, backends: Vec<String>, exponents: Vec<u32>) -> Self {
        Self {
            modes,
            backends,
            exponents,
        }
    }

    /// Both storage modes, every registered backend, 1e1 ..= 1e6.
    pub fn full(registry: &BackendRegistry) -> Self {
        Self::new(
            StorageMode::ALL.to_vec(),
            registry.ids().map(str::to_string).collect(),
            SCALE_EXPONENTS.to_vec(),
        )
    }

    /// Both storage modes, the native engines (`rust` then `c`), 1e1 ..= 1e6.
    pub fn native() -> Self {
        Self::new(
            StorageMode::ALL.to_vec(),
            NativeEngine::ALL.iter().map(|e| e.id().to_string()).collect(),
            SCALE_EXPONENTS.to_vec(),
        )
    }

    /// Every cell, in run order.
    pub fn cases(&self) -> Result<Vec<BenchmarkCase>> {
        let mut cases = Vec::with_capacity(self.len());
        let mut names = HashSet::new();
        for &mode in &self.modes {
            for backend in &self.backends {
                for &exponent in &self.exponents {
                    let case = BenchmarkCase::new(mode, backend.as_str(), exponent)?;
                    if !names.insert(case.name()) {
                        return Err(BenchError::NameCollision(case.name()));
                    }
                    cases.push(case);
                }
            }
        }
        Ok(cases)
    }

    pub fn len(&self) -> usize {
        self.modes.len() * self.backends.len() * self.exponents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A matrix cell that is set up on first use.
pub struct PendingCase<'b> {
    name: String,
    row_count: u64,
    kind: BenchKind,
    launch: Option<(Driver<'b>, BenchmarkCase, Target)>,
    runner: Option<CaseRunner<'b>>,
}

impl<'b> PendingCase<'b> {
    pub fn new(driver: Driver<'b>, case: BenchmarkCase, kind: BenchKind, target: Target) -> Self {
        Self {
            name: case.name(),
            row_count: case.row_count(),
            kind,
            launch: Some((driver, case, target)),
            runner: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn kind(&self) -> BenchKind {
        self.kind
    }

    pub fn is_set_up(&self) -> bool {
        self.runner.is_some()
    }

    /// The case's runner, running setup on the first call. Setup is only
    /// attempted once.
    pub fn runner(&mut self) -> Result<&mut CaseRunner<'b>> {
        if let Some((driver, case, target)) = self.launch.take() {
            self.runner = Some(CaseRunner::launch(driver, case, self.kind, target)?);
        }
        self.runner
            .as_mut()
            .ok_or_else(|| BenchError::InvalidCase(format!("{}: setup already failed", self.name)))
    }

    fn into_runner(self) -> Option<CaseRunner<'b>> {
        self.runner
    }
}

/// Drives the timed iterations of one case.
pub trait HostLoop {
    /// `bytes_per_iteration` is set when throughput should be reported as
    /// bytes. A host that never calls [`PendingCase::runner`] skips the case.
    fn drive(
        &mut self,
        case: &mut PendingCase<'_>,
        bytes_per_iteration: Option<u64>,
    ) -> Result<()>;
}

/// Unreported warmup iterations followed by a fixed number of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedIterations {
    pub warmup: u64,
    pub samples: u64,
}

impl HostLoop for FixedIterations {
    fn drive(&mut self, case: &mut PendingCase<'_>, _: Option<u64>) -> Result<()> {
        let runner = case.runner()?;
        runner.warm_up(self.warmup)?;
        runner.run_iterations(self.samples)?;
        Ok(())
    }
}

/// Directory that holds on-disk databases. A temporary directory is removed
/// when dropped; a caller-provided one is left in place.
#[derive(Debug)]
pub struct ScratchSpace {
    _temp: Option<TempDir>,
    path: PathBuf,
}

impl ScratchSpace {
    pub fn new() -> io::Result<Self> {
        let temp = tempfile::Builder::new().prefix("driver-bench").tempdir()?;
        let path = temp.path().to_path_buf();
        log::debug!("scratch directory {}", path.display());
        Ok(Self {
            _temp: Some(temp),
            path,
        })
    }

    pub fn in_dir(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(Self { _temp: None, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// First `<i>bench.db` in `dir` that does not exist yet.
pub fn prepare_database_path(dir: &Path) -> io::Result<PathBuf> {
    let mut i = 0u64;
    loop {
        let path = dir.join(format!("{i}bench.db"));
        if !path.try_exists()? {
            log::debug!("database path {}", path.display());
            return Ok(path);
        }
        log::debug!("{} exists, trying the next name", path.display());
        i += 1;
    }
}

pub(crate) fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Remove the journal, WAL and shared-memory files next to `path`. Missing
/// ones are skipped. Returns how many were removed.
pub(crate) fn remove_sidecars(path: &Path) -> Result<usize> {
    let mut removed = 0;
    for suffix in SIDECAR_SUFFIXES {
        let extra = sidecar(path, suffix);
        match fs::remove_file(&extra) {
            Ok(()) => {
                log::debug!("removed {}", extra.display());
                removed += 1;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(BenchError::Cleanup {
                    path: extra,
                    source,
                })
            }
        }
    }
    Ok(removed)
}

/// Remove a case's database file and its sidecars, then check it is gone.
///
/// The database file itself must exist.
pub fn remove_database_file(path: &Path) -> Result<()> {
    let cleanup = |source| BenchError::Cleanup {
        path: path.to_path_buf(),
        source,
    };
    fs::remove_file(path).map_err(cleanup)?;
    remove_sidecars(path)?;
    match path.try_exists() {
        Ok(false) => Ok(()),
        Ok(true) => Err(cleanup(io::Error::other("still present after removal"))),
        Err(source) => Err(cleanup(source)),
    }
}

/// Runs matrix cells against the registered backends.
pub struct MatrixDriver<'r> {
    registry: &'r BackendRegistry,
    scratch: ScratchSpace,
    recs_per_sec: bool,
}

impl<'r> MatrixDriver<'r> {
    pub fn new(registry: &'r BackendRegistry, scratch: ScratchSpace, recs_per_sec: bool) -> Self {
        Self {
            registry,
            scratch,
            recs_per_sec,
        }
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.scratch
    }

    fn bytes_per_iteration(&self, row_count: u64) -> Option<u64> {
        self.recs_per_sec.then(|| BYTES_PER_RECORD * row_count)
    }

    /// Run every case of `matrix`. The first failure halts the run; cases
    /// the host skipped have no result.
    pub fn run(
        &self,
        matrix: &ScenarioMatrix,
        kind: BenchKind,
        host: &mut dyn HostLoop,
    ) -> Result<Vec<CaseResult>> {
        let cases = matrix.cases()?;
        log::info!("{kind}: {} case(s)", cases.len());
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            if let Some(result) = self.run_case(case, kind, host)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Native kinds run on the engine named by the case's backend id, the
    /// others on the registered backend.
    fn driver(&self, case: &BenchmarkCase, kind: BenchKind) -> Result<Driver<'r>> {
        if kind.is_native() {
            NativeEngine::from_id(case.backend_id()).map(Driver::Native)
        } else {
            self.registry.get(case.backend_id()).map(Driver::Backend)
        }
    }

    pub fn run_case(
        &self,
        case: BenchmarkCase,
        kind: BenchKind,
        host: &mut dyn HostLoop,
    ) -> Result<Option<CaseResult>> {
        let driver = self.driver(&case, kind)?;
        let target = match case.storage_mode() {
            StorageMode::InMemory => Target::InMemory,
            StorageMode::OnDisk => Target::File(prepare_database_path(self.scratch.path())?),
        };
        let name = case.name();
        let bytes = self.bytes_per_iteration(case.row_count());

        let outcome = run_pending(
            PendingCase::new(driver, case, kind, target.clone()),
            host,
            bytes,
        );

        if let Target::File(path) = &target {
            match &outcome {
                Ok(Some(_)) => remove_database_file(path)?,
                Ok(None) => {}
                Err(_) if path.exists() => {
                    if let Err(err) = remove_database_file(path) {
                        log::error!("{name}: {err}");
                    }
                }
                Err(_) => {}
            }
        }

        let Some(mut result) = outcome? else {
            log::debug!("{name}: skipped by the host");
            return Ok(None);
        };
        result.bytes_per_iteration = bytes;
        log::info!("{name}: {:.0}µs mean", result.mean_us());
        Ok(Some(result))
    }
}

fn run_pending(
    mut pending: PendingCase<'_>,
    host: &mut dyn HostLoop,
    bytes_per_iteration: Option<u64>,
) -> Result<Option<CaseResult>> {
    if let Err(err) = host.drive(&mut pending, bytes_per_iteration) {
        return Err(match pending.into_runner() {
            Some(runner) => runner.abort(err),
            None => err,
        });
    }
    pending.into_runner().map(CaseRunner::teardown).transpose()
}
