//! Integration tests: run whole cases and matrices against the real backends
//! and against wrappers that misbehave on purpose.

use std::fs;
use std::thread::sleep;
use std::time::Duration;

use driver_bench::audit::MemoryAuditor;
use driver_bench::backend::{
    Backend, BackendRegistry, Connection, PreparedStatement, RowCursor, SqliteBackend, Target,
    TursoBackend,
};
use driver_bench::case::{BenchmarkCase, StorageMode};
use driver_bench::matrix::{FixedIterations, MatrixDriver, ScenarioMatrix, ScratchSpace};
use driver_bench::native::NativeEngine;
use driver_bench::runner::CaseRunner;
use driver_bench::workload::BenchKind;
use driver_bench::{BenchError, DriverError};

const SETUP_DELAY: Duration = Duration::from_millis(25);

/// Wraps another backend under a new id; `wrap` decides how its connections
/// misbehave.
struct Wrapped<B> {
    id: &'static str,
    inner: B,
    wrap: fn(Box<dyn Connection>) -> Box<dyn Connection>,
    audited: bool,
}

impl<B: Backend> Backend for Wrapped<B> {
    fn id(&self) -> &str {
        self.id
    }

    fn memory_target(&self) -> &str {
        self.inner.memory_target()
    }

    fn open(&self, target: &str) -> Result<Box<dyn Connection>, DriverError> {
        Ok((self.wrap)(self.inner.open(target)?))
    }

    fn auditor(&self) -> Option<&dyn MemoryAuditor> {
        if self.audited {
            self.inner.auditor()
        } else {
            None
        }
    }
}

/// Connection whose cursors stop after `cap` rows.
struct Truncating {
    inner: Box<dyn Connection>,
    cap: u64,
}

struct Capped<'a> {
    inner: &'a mut dyn RowCursor,
    left: u64,
}

impl RowCursor for Capped<'_> {
    fn next_value(&mut self) -> Result<Option<i64>, DriverError> {
        if self.left == 0 {
            return Ok(None);
        }
        self.left -= 1;
        self.inner.next_value()
    }
}

/// Connection that sleeps in every phase the runner is meant to exclude.
struct SlowSetup {
    inner: Box<dyn Connection>,
}

/// Connection that never releases anything.
struct Forgetful {
    inner: Box<dyn Connection>,
}

macro_rules! delegate_connection {
    ($ty:ty) => {
        impl $ty {
            fn inner(&mut self) -> &mut dyn Connection {
                self.inner.as_mut()
            }
        }
    };
}

delegate_connection!(Truncating);
delegate_connection!(SlowSetup);
delegate_connection!(Forgetful);

impl Connection for Truncating {
    fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        self.inner().execute(sql)
    }

    fn prepare(&mut self, sql: &str) -> Result<PreparedStatement, DriverError> {
        self.inner().prepare(sql)
    }

    fn exec_prepared(
        &mut self,
        s: &PreparedStatement,
        args: &[i64],
    ) -> Result<usize, DriverError> {
        self.inner().exec_prepared(s, args)
    }

    fn query(
        &mut self,
        sql: &str,
        consume: &mut dyn FnMut(&mut dyn RowCursor) -> Result<(), DriverError>,
    ) -> Result<(), DriverError> {
        let cap = self.cap;
        self.inner().query(sql, &mut |rows: &mut dyn RowCursor| {
            consume(&mut Capped {
                inner: rows,
                left: cap,
            })
        })
    }

    fn close_statement(&mut self, s: PreparedStatement) -> Result<(), DriverError> {
        self.inner().close_statement(s)
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.inner.close()
    }
}

impl Connection for SlowSetup {
    fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        if sql == "begin" || sql == "delete from t" {
            sleep(SETUP_DELAY);
        }
        self.inner().execute(sql)
    }

    fn prepare(&mut self, sql: &str) -> Result<PreparedStatement, DriverError> {
        self.inner().prepare(sql)
    }

    fn exec_prepared(
        &mut self,
        s: &PreparedStatement,
        args: &[i64],
    ) -> Result<usize, DriverError> {
        self.inner().exec_prepared(s, args)
    }

    fn query(
        &mut self,
        sql: &str,
        consume: &mut dyn FnMut(&mut dyn RowCursor) -> Result<(), DriverError>,
    ) -> Result<(), DriverError> {
        sleep(SETUP_DELAY);
        self.inner().query(sql, consume)
    }

    fn close_statement(&mut self, s: PreparedStatement) -> Result<(), DriverError> {
        self.inner().close_statement(s)
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.inner.close()
    }
}

impl Connection for Forgetful {
    fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        self.inner().execute(sql)
    }

    fn prepare(&mut self, sql: &str) -> Result<PreparedStatement, DriverError> {
        self.inner().prepare(sql)
    }

    fn exec_prepared(
        &mut self,
        s: &PreparedStatement,
        args: &[i64],
    ) -> Result<usize, DriverError> {
        self.inner().exec_prepared(s, args)
    }

    fn query(
        &mut self,
        sql: &str,
        consume: &mut dyn FnMut(&mut dyn RowCursor) -> Result<(), DriverError>,
    ) -> Result<(), DriverError> {
        self.inner().query(sql, consume)
    }

    fn close_statement(&mut self, _: PreparedStatement) -> Result<(), DriverError> {
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        std::mem::forget(self);
        Ok(())
    }
}

fn truncating(inner: Box<dyn Connection>) -> Box<dyn Connection> {
    Box::new(Truncating { inner, cap: 50 })
}

fn slow_setup(inner: Box<dyn Connection>) -> Box<dyn Connection> {
    Box::new(SlowSetup { inner })
}

fn forgetful(inner: Box<dyn Connection>) -> Box<dyn Connection> {
    Box::new(Forgetful { inner })
}

fn case(mode: StorageMode, backend: &dyn Backend, exponent: u32) -> BenchmarkCase {
    BenchmarkCase::new(mode, backend.id(), exponent).unwrap()
}

#[test]
fn reference_backend_insert_end_to_end() {
    let mut registry = BackendRegistry::with_defaults();
    registry
        .register(Box::new(TursoBackend::with_id("refA")))
        .unwrap();
    let backend = registry.get("refA").unwrap();

    let case = case(StorageMode::InMemory, backend, 2);
    assert_eq!(case.name(), "refAInMemory1e2");

    let mut runner = CaseRunner::setup(backend, case, BenchKind::Insert, Target::InMemory).unwrap();
    runner.run_iterations(1).unwrap();
    assert_eq!(runner.count_rows().unwrap(), 100);

    let result = runner.teardown().unwrap();
    assert_eq!(result.name, "refAInMemory1e2");
    assert_eq!(result.group, "InsertComparative");
    let audit = result.audit.expect("turso is audited");
    assert!(audit.is_clean(), "{audit}");
    assert_eq!(audit.allocations, audit.frees);
}

#[test]
fn read_scans_every_row_on_both_backends() {
    let registry = BackendRegistry::with_defaults();
    for id in ["sqlite3", "turso"] {
        let backend = registry.get(id).unwrap();
        let mut runner = CaseRunner::setup(
            backend,
            case(StorageMode::InMemory, backend, 3),
            BenchKind::Read,
            Target::InMemory,
        )
        .unwrap();
        runner.run_iterations(3).unwrap();
        assert_eq!(runner.count_rows().unwrap(), 1000, "{id}");

        let result = runner.teardown().unwrap();
        assert_eq!(result.samples.len(), 3);
        assert!(result.samples.iter().all(|d| !d.is_zero()), "{id}");
    }
}

#[test]
fn repeated_inserts_keep_n_rows_on_disk() {
    let registry = BackendRegistry::with_defaults();
    let dir = tempfile::tempdir().unwrap();
    for id in ["sqlite3", "turso"] {
        let backend = registry.get(id).unwrap();
        let path = dir.path().join(format!("{id}.db"));
        let mut runner = CaseRunner::setup(
            backend,
            case(StorageMode::OnDisk, backend, 2),
            BenchKind::Insert,
            Target::File(path.clone()),
        )
        .unwrap();
        for _ in 0..3 {
            runner.run_iterations(1).unwrap();
            assert_eq!(runner.count_rows().unwrap(), 100, "{id}");
        }
        runner.teardown().unwrap();
        assert!(path.exists(), "{id}");
    }
}

#[test]
fn on_disk_matrix_leaves_no_files() {
    let registry = BackendRegistry::with_defaults();
    let dir = tempfile::tempdir().unwrap();
    let scratch = ScratchSpace::in_dir(dir.path().join("scratch")).unwrap();
    let driver = MatrixDriver::new(&registry, scratch, false);
    let matrix = ScenarioMatrix::new(
        vec![StorageMode::OnDisk],
        vec!["sqlite3".into(), "turso".into()],
        vec![1, 2],
    );
    let mut host = FixedIterations {
        warmup: 1,
        samples: 2,
    };

    for kind in BenchKind::DRIVER {
        let results = driver.run(&matrix, kind, &mut host).unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "sqlite3OnDisk1e1",
                "sqlite3OnDisk1e2",
                "tursoOnDisk1e1",
                "tursoOnDisk1e2"
            ]
        );
        assert!(results.iter().all(|r| r.samples.len() == 2));
    }
    assert_eq!(fs::read_dir(driver.scratch().path()).unwrap().count(), 0);
}

#[test]
fn short_scan_fails_the_case() {
    let backend = Wrapped {
        id: "short",
        inner: TursoBackend::new(),
        wrap: truncating,
        audited: false,
    };
    let mut runner = CaseRunner::setup(
        &backend,
        case(StorageMode::InMemory, &backend, 2),
        BenchKind::Read,
        Target::InMemory,
    )
    .unwrap();

    match runner.run_iterations(1) {
        Err(BenchError::ShortScan {
            case,
            scanned,
            expected,
        }) => {
            assert_eq!(case, "shortInMemory1e2");
            assert_eq!(scanned, 50);
            assert_eq!(expected, 100);
        }
        other => panic!("expected a short scan, got {other:?}"),
    }
    runner.teardown().unwrap();
}

#[test]
fn short_scan_halts_the_matrix() {
    let mut registry = BackendRegistry::new();
    registry
        .register(Box::new(Wrapped {
            id: "short",
            inner: SqliteBackend::new(),
            wrap: truncating,
            audited: false,
        }))
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let driver = MatrixDriver::new(&registry, ScratchSpace::in_dir(dir.path()).unwrap(), false);
    let mut host = FixedIterations {
        warmup: 0,
        samples: 1,
    };

    // 1e1 fits under the cap, 1e2 does not.
    let matrix = ScenarioMatrix::new(StorageMode::ALL.to_vec(), vec!["short".into()], vec![1, 2]);
    let err = driver.run(&matrix, BenchKind::Read, &mut host).unwrap_err();
    assert!(matches!(err, BenchError::ShortScan { ref case, .. } if case == "shortInMemory1e2"));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn leaked_connection_is_an_audit_anomaly() {
    let backend = Wrapped {
        id: "leaky",
        inner: TursoBackend::new(),
        wrap: forgetful,
        audited: true,
    };
    let mut runner = CaseRunner::setup(
        &backend,
        case(StorageMode::InMemory, &backend, 1),
        BenchKind::Insert,
        Target::InMemory,
    )
    .unwrap();
    runner.run_iterations(1).unwrap();

    match runner.teardown() {
        Err(BenchError::AuditAnomaly { case, detail }) => {
            assert_eq!(case, "leakyInMemory1e1");
            assert!(detail.contains("never released"), "{detail}");
        }
        other => panic!("expected an audit anomaly, got {:?}", other.map(|r| r.name)),
    }

    // The leak did not poison the next case.
    let clean = TursoBackend::new();
    let runner = CaseRunner::setup(
        &clean,
        case(StorageMode::InMemory, &clean, 1),
        BenchKind::Insert,
        Target::InMemory,
    )
    .unwrap();
    assert!(runner.teardown().unwrap().audit.unwrap().is_clean());
}

#[test]
fn excluded_phases_never_reach_the_measurement() {
    for kind in BenchKind::DRIVER {
        let backend = Wrapped {
            id: "slow",
            inner: SqliteBackend::new(),
            wrap: slow_setup,
            audited: false,
        };
        let mut runner = CaseRunner::setup(
            &backend,
            case(StorageMode::InMemory, &backend, 1),
            kind,
            Target::InMemory,
        )
        .unwrap();
        let measured = runner.run_iterations(2).unwrap();

        assert!(measured < SETUP_DELAY, "{kind}: {measured:?}");
        assert!(runner.excluded() >= SETUP_DELAY * 2, "{kind}");
        runner.teardown().unwrap();
    }
}

#[test]
fn setup_failures_are_fatal() {
    let registry = BackendRegistry::with_defaults();
    let dir = tempfile::tempdir().unwrap();

    // Opened through a runner so the failed open happens under the case lock.
    let turso = registry.get("turso").unwrap();
    let missing = Target::File(dir.path().join("missing").join("0bench.db"));
    assert!(matches!(
        CaseRunner::setup(
            turso,
            case(StorageMode::OnDisk, turso, 1),
            BenchKind::Insert,
            missing
        ),
        Err(BenchError::Setup { stage: "opening the backend", .. })
    ));

    let driver = MatrixDriver::new(&registry, ScratchSpace::in_dir(dir.path()).unwrap(), false);
    let mut host = FixedIterations {
        warmup: 0,
        samples: 1,
    };
    let unknown = BenchmarkCase::new(StorageMode::InMemory, "postgres", 1).unwrap();
    assert!(matches!(
        driver.run_case(unknown, BenchKind::Read, &mut host),
        Err(BenchError::UnknownBackend(id)) if id == "postgres"
    ));
}

#[test]
fn native_matrix_end_to_end() {
    let registry = BackendRegistry::with_defaults();
    let dir = tempfile::tempdir().unwrap();
    let driver = MatrixDriver::new(&registry, ScratchSpace::in_dir(dir.path()).unwrap(), true);
    let matrix = ScenarioMatrix::new(
        StorageMode::ALL.to_vec(),
        NativeEngine::ALL.iter().map(|e| e.id().to_string()).collect(),
        vec![1, 2],
    );
    let mut host = FixedIterations {
        warmup: 1,
        samples: 2,
    };

    for kind in BenchKind::NATIVE {
        let results = driver.run(&matrix, kind, &mut host).unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "rustInMemory1e1",
                "rustInMemory1e2",
                "cInMemory1e1",
                "cInMemory1e2",
                "rustOnDisk1e1",
                "rustOnDisk1e2",
                "cOnDisk1e1",
                "cOnDisk1e2",
            ],
            "{kind}"
        );
        let rows: Vec<u64> = results.iter().map(|r| r.row_count).collect();
        assert_eq!(rows, [10, 100, 10, 100, 10, 100, 10, 100]);
        for result in &results {
            assert_eq!(result.group, kind.group_name());
            assert_eq!(result.samples.len(), 2);
            assert_eq!(
                result.bytes_per_iteration,
                Some(1_000_000 * result.row_count)
            );
            match result.audit {
                Some(audit) => {
                    assert_eq!(result.backend_id, "rust");
                    assert!(audit.is_clean(), "{}: {audit}", result.name);
                }
                None => assert_eq!(result.backend_id, "c"),
            }
        }
    }
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn native_and_driver_groups_measure_the_same_engine() {
    let registry = BackendRegistry::with_defaults();
    let sqlite = registry.get("sqlite3").unwrap();
    let mut through_driver = CaseRunner::setup(
        sqlite,
        case(StorageMode::InMemory, sqlite, 2),
        BenchKind::Read,
        Target::InMemory,
    )
    .unwrap();
    through_driver.run_iterations(1).unwrap();
    let driver_rows = through_driver.count_rows().unwrap();
    through_driver.teardown().unwrap();

    let mut native = CaseRunner::setup_native(
        NativeEngine::C,
        BenchmarkCase::new(StorageMode::InMemory, "c", 2).unwrap(),
        BenchKind::ReadNative,
        Target::InMemory,
    )
    .unwrap();
    native.run_iterations(1).unwrap();
    assert_eq!(native.count_rows().unwrap(), driver_rows);
    native.teardown().unwrap();
}
