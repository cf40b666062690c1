//! Timer-disciplined runner: `setup -> run_iterations* -> teardown` for one
//! benchmark case.
//!
//! Setup opens a fresh database, creates the schema and, for the read
//! workloads, fills the table once. Each iteration then keeps its fixed costs
//! (opening the cursor, `begin` and `delete`) out of the timing window, so
//! the measured time is the per-row work only. Teardown closes the prepared
//! statement, the database and the audit session, in that order.
//!
//! Driver workloads reach the database through the [`Connection`] layer.
//! Native workloads drive each engine's own API (see [`crate::native`]).
//! Both sit behind [`Workbench`], so the timing discipline is shared.
//!
//! Only one runner exists at a time in the process: it holds the case lock
//! from setup until teardown, which keeps timings and audit attribution
//! isolated even when several threads try to run cases.

use std::fs;
use std::hint::black_box;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::audit::{AuditReport, AuditSession, MemoryAuditor};
use crate::backend::{Backend, Connection, PreparedStatement, RowCursor, Target};
use crate::case::BenchmarkCase;
use crate::error::{BenchError, DriverError, Result};
use crate::matrix::remove_sidecars;
use crate::native::NativeEngine;
use crate::report::CaseResult;
use crate::timing::TimingWindow;
use crate::workload::{BenchKind, Workload};

static CASE_LOCK: Mutex<()> = Mutex::new(());

/// Serialize with every other case in the process.
pub(crate) fn case_lock() -> MutexGuard<'static, ()> {
    CASE_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn setup_failed<'a>(
    case: &'a str,
    stage: &'static str,
) -> impl FnOnce(DriverError) -> BenchError + 'a {
    move |source| BenchError::Setup {
        case: case.to_string(),
        stage,
        source,
    }
}

pub(crate) fn execution_failed<'a>(
    case: &'a str,
    stage: &'static str,
) -> impl FnOnce(DriverError) -> BenchError + 'a {
    move |source| BenchError::Execution {
        case: case.to_string(),
        stage,
        source,
    }
}

pub(crate) fn teardown_failed<'a>(
    case: &'a str,
    stage: &'static str,
) -> impl FnOnce(DriverError) -> BenchError + 'a {
    move |source| BenchError::Teardown {
        case: case.to_string(),
        stage,
        source,
    }
}

/// Remove whatever an earlier run left at `path`, journal and WAL files
/// included. Nothing being there is fine.
fn remove_stale_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("removed stale database {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(BenchError::Cleanup {
                path: path.to_path_buf(),
                source,
            })
        }
    }
    let sidecars = remove_sidecars(path)?;
    if sidecars > 0 {
        log::debug!("removed {sidecars} stale sidecar(s) of {}", path.display());
    }
    Ok(())
}

/// The database side of one case.
pub(crate) trait Workbench {
    /// Create the schema, prepare the insert and, for the read kinds, fill
    /// the table.
    fn prepare(&mut self, name: &str, kind: BenchKind, w: Workload) -> Result<()>;

    /// Scan the table with the cursor lifecycle excluded from `window`.
    /// Returns the rows seen, at most `w.row_count()`.
    fn scan(&mut self, name: &str, w: Workload, window: &mut TimingWindow) -> Result<u64>;

    /// Clear the table (excluded) and insert every value (measured).
    fn reinsert(&mut self, name: &str, w: Workload, window: &mut TimingWindow) -> Result<()>;

    fn count_rows(&mut self, w: Workload) -> Result<Option<i64>, DriverError>;

    /// Release the statement and the database, passing every failure to
    /// `record`.
    fn close(self: Box<Self>, name: &str, record: &mut dyn FnMut(BenchError));
}

/// What a case runs on: a registered backend or an engine's own API.
#[derive(Clone, Copy)]
pub enum Driver<'b> {
    Backend(&'b dyn Backend),
    Native(NativeEngine),
}

impl<'b> Driver<'b> {
    pub fn id(&self) -> &str {
        match self {
            Driver::Backend(backend) => backend.id(),
            Driver::Native(engine) => engine.id(),
        }
    }

    fn runs(&self, kind: BenchKind) -> bool {
        kind.is_native() == matches!(self, Driver::Native(_))
    }

    fn auditor(&self) -> Option<&'b dyn MemoryAuditor> {
        match *self {
            Driver::Backend(backend) => backend.auditor(),
            Driver::Native(engine) => engine.auditor(),
        }
    }

    fn target_string(&self, target: &Target) -> String {
        match self {
            Driver::Backend(backend) => backend.target_string(target),
            Driver::Native(engine) => engine.target_string(target),
        }
    }

    fn open(&self, target: &str) -> Result<Box<dyn Workbench>, DriverError> {
        match self {
            Driver::Backend(backend) => Ok(Box::new(DriverBench {
                conn: backend.open(target)?,
                insert: None,
            })),
            Driver::Native(engine) => engine.open(target),
        }
    }
}

/// One benchmark case between setup and teardown.
pub struct CaseRunner<'b> {
    case: BenchmarkCase,
    name: String,
    kind: BenchKind,
    workload: Workload,
    target: Target,
    bench: Box<dyn Workbench>,
    audit: Option<AuditSession<'b>>,
    samples: Vec<Duration>,
    measured: Duration,
    excluded: Duration,
    _serial: MutexGuard<'static, ()>,
}

impl<'b> CaseRunner<'b> {
    /// Open `backend` against `target` and prepare `case` for a driver
    /// workload.
    pub fn setup(
        backend: &'b dyn Backend,
        case: BenchmarkCase,
        kind: BenchKind,
        target: Target,
    ) -> Result<Self> {
        Self::launch(Driver::Backend(backend), case, kind, target)
    }

    /// Open `engine` directly and prepare `case` for a native workload.
    pub fn setup_native(
        engine: NativeEngine,
        case: BenchmarkCase,
        kind: BenchKind,
        target: Target,
    ) -> Result<Self> {
        Self::launch(Driver::Native(engine), case, kind, target)
    }

    /// A file target is cleared first. If the driver can audit memory, the
    /// session starts before the database is opened.
    pub fn launch(
        driver: Driver<'b>,
        case: BenchmarkCase,
        kind: BenchKind,
        target: Target,
    ) -> Result<Self> {
        let serial = case_lock();
        let name = case.name();
        if case.backend_id() != driver.id() {
            return Err(BenchError::InvalidCase(format!(
                "{name} cannot run on {:?}",
                driver.id()
            )));
        }
        if !driver.runs(kind) {
            return Err(BenchError::InvalidCase(format!(
                "{name}: {kind} does not run on {:?}",
                driver.id()
            )));
        }
        log::info!("{name}: {kind} setup, {} rows", case.row_count());

        if let Target::File(path) = &target {
            remove_stale_file(path)?;
        }

        let audit = match driver.auditor() {
            Some(auditor) => Some(AuditSession::begin(auditor, &name)?),
            None => {
                log::debug!("{name}: {} is exempt from auditing", driver.id());
                None
            }
        };

        let target_string = driver.target_string(&target);
        let bench = match driver.open(&target_string) {
            Ok(bench) => bench,
            Err(source) => {
                let err = setup_failed(&name, "opening the backend")(source);
                if let Some(Err(audit_err)) = audit.map(AuditSession::report) {
                    log::error!("{name}: {audit_err}");
                }
                return Err(err);
            }
        };
        log::debug!("{name}: opened {target_string}");

        let mut runner = Self {
            workload: Workload::new(case.row_count()),
            case,
            name,
            kind,
            target,
            bench,
            audit,
            samples: Vec::new(),
            measured: Duration::ZERO,
            excluded: Duration::ZERO,
            _serial: serial,
        };
        match runner.bench.prepare(&runner.name, kind, runner.workload) {
            Ok(()) => {
                if kind.is_read() {
                    log::debug!("{}: populated {} rows", runner.name, runner.row_count());
                }
                Ok(runner)
            }
            Err(err) => Err(runner.abort(err)),
        }
    }

    /// Run `iterations` timed iterations and return their measured time.
    pub fn run_iterations(&mut self, iterations: u64) -> Result<Duration> {
        let mut total = Duration::ZERO;
        for _ in 0..iterations {
            let window = self.iterate()?;
            self.samples.push(window.measured());
            self.measured += window.measured();
            self.excluded += window.excluded();
            total += window.measured();
        }
        Ok(total)
    }

    /// Iterations that are run but never reported.
    pub fn warm_up(&mut self, iterations: u64) -> Result<()> {
        for _ in 0..iterations {
            self.iterate()?;
        }
        Ok(())
    }

    fn iterate(&mut self) -> Result<TimingWindow> {
        let mut window = TimingWindow::new();
        if self.kind.is_read() {
            let expected = self.workload.row_count();
            let scanned = self.bench.scan(&self.name, self.workload, &mut window)?;
            if scanned < expected {
                return Err(BenchError::ShortScan {
                    case: self.name.clone(),
                    scanned,
                    expected,
                });
            }
        } else {
            self.bench.reinsert(&self.name, self.workload, &mut window)?;
        }
        Ok(window)
    }

    /// Rows currently in the table. Not timed.
    pub fn count_rows(&mut self) -> Result<u64> {
        let count = self
            .bench
            .count_rows(self.workload)
            .map_err(execution_failed(&self.name, "counting rows"))?;

        count
            .and_then(|c| u64::try_from(c).ok())
            .ok_or_else(|| {
                execution_failed(&self.name, "counting rows")(DriverError::Other(format!(
                    "count query returned {count:?}"
                )))
            })
    }

    pub fn case(&self) -> &BenchmarkCase {
        &self.case
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BenchKind {
        self.kind
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn row_count(&self) -> u64 {
        self.workload.row_count()
    }

    /// Recorded iterations so far.
    pub fn iterations(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn measured(&self) -> Duration {
        self.measured
    }

    pub fn excluded(&self) -> Duration {
        self.excluded
    }

    /// Close everything and return the case result. The first failure wins;
    /// later ones are logged.
    pub fn teardown(self) -> Result<CaseResult> {
        let Self {
            case,
            name,
            kind,
            bench,
            audit,
            samples,
            measured,
            excluded,
            _serial,
            ..
        } = self;

        let (failure, audit_report) = release(&name, bench, audit);
        if let Some(err) = failure {
            return Err(err);
        }

        log::info!(
            "{name}: {} iteration(s), {:?} measured, {:?} excluded",
            samples.len(),
            measured,
            excluded
        );
        Ok(CaseResult {
            name,
            group: kind.group_name().to_string(),
            backend_id: case.backend_id().to_string(),
            row_count: case.row_count(),
            samples,
            measured,
            excluded,
            bytes_per_iteration: None,
            audit: audit_report,
        })
    }

    /// Release everything after `err` and hand `err` back. Any failure while
    /// cleaning up is only logged.
    pub fn abort(self, err: BenchError) -> BenchError {
        log::error!("{}: aborting: {err}", self.name);
        let (failure, _) = release(&self.name, self.bench, self.audit);
        if let Some(cleanup) = failure {
            log::error!("{}: while aborting: {cleanup}", self.name);
        }
        err
    }
}

fn release(
    name: &str,
    bench: Box<dyn Workbench>,
    audit: Option<AuditSession<'_>>,
) -> (Option<BenchError>, Option<AuditReport>) {
    let mut first: Option<BenchError> = None;
    let mut record = |err: BenchError| {
        if first.is_none() {
            first = Some(err);
        } else {
            log::error!("{name}: {err}");
        }
    };

    bench.close(name, &mut record);
    let report = match audit.map(AuditSession::report) {
        Some(Ok(report)) => Some(report),
        Some(Err(err)) => {
            record(err);
            None
        }
        None => None,
    };

    (first, report)
}

/// A registered backend driven through [`Connection`].
struct DriverBench {
    conn: Box<dyn Connection>,
    insert: Option<PreparedStatement>,
}

impl Workbench for DriverBench {
    fn prepare(&mut self, name: &str, kind: BenchKind, w: Workload) -> Result<()> {
        self.conn
            .execute(w.schema())
            .map_err(setup_failed(name, "creating the schema"))?;
        let insert = self
            .conn
            .prepare(w.insert_statement())
            .map_err(setup_failed(name, "preparing the insert"))?;
        let insert = self.insert.insert(insert);

        if kind.is_read() {
            let conn = &mut self.conn;
            let mut populate = || -> Result<(), DriverError> {
                conn.execute(w.begin())?;
                for v in w.values() {
                    conn.exec_prepared(insert, &[v])?;
                }
                conn.execute(w.commit())
            };
            populate().map_err(setup_failed(name, "populating the table"))?;
        }
        Ok(())
    }

    fn scan(&mut self, name: &str, w: Workload, window: &mut TimingWindow) -> Result<u64> {
        let expected = w.row_count();
        let conn = &mut self.conn;
        let mut scanned = 0u64;

        window
            .exclude_during(|window| {
                conn.query(w.scan_query(), &mut |rows: &mut dyn RowCursor| {
                    window.measure_during(|| -> Result<(), DriverError> {
                        while scanned < expected {
                            match rows.next_value()? {
                                Some(value) => {
                                    black_box(value);
                                    scanned += 1;
                                }
                                None => break,
                            }
                        }
                        Ok(())
                    })
                })
            })
            .map_err(execution_failed(name, "scanning the table"))?;
        Ok(scanned)
    }

    fn reinsert(&mut self, name: &str, w: Workload, window: &mut TimingWindow) -> Result<()> {
        let conn = &mut self.conn;
        let insert = self
            .insert
            .as_ref()
            .ok_or_else(|| BenchError::InvalidCase(format!("{name}: no prepared insert")))?;

        window
            .exclude_during(|_| -> Result<(), DriverError> {
                conn.execute(w.begin())?;
                conn.execute(w.clear_statement())
            })
            .map_err(execution_failed(name, "clearing the table"))?;

        window
            .measure_during(|| -> Result<(), DriverError> {
                for v in w.values() {
                    conn.exec_prepared(insert, &[v])?;
                }
                conn.execute(w.commit())
            })
            .map_err(execution_failed(name, "inserting rows"))
    }

    fn count_rows(&mut self, w: Workload) -> Result<Option<i64>, DriverError> {
        let mut count = None;
        self.conn
            .query(w.count_query(), &mut |rows: &mut dyn RowCursor| {
                count = rows.next_value()?;
                Ok(())
            })?;
        Ok(count)
    }

    fn close(self: Box<Self>, name: &str, record: &mut dyn FnMut(BenchError)) {
        let Self { mut conn, insert } = *self;
        if let Some(statement) = insert {
            if let Err(source) = conn.close_statement(statement) {
                record(teardown_failed(name, "closing the prepared statement")(source));
            }
        }
        if let Err(source) = conn.close() {
            record(teardown_failed(name, "closing the connection")(source));
        }
    }
}
