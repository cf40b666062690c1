//! Native workloads: each engine driven through its own API.
//!
//! The driver workloads measure an engine plus the [`Connection`] layer in
//! front of it. These measure the engine alone, so the difference between
//! `Reading1` and `Reading1Native` is the cost of the abstraction.
//!
//! - `rust`: turso's async API, each loop under a single `block_on`
//! - `c`: rusqlite's statement cache over the bundled C library
//!
//! [`Connection`]: crate::backend::Connection

use std::fmt;
use std::hint::black_box;

use crate::audit::MemoryAuditor;
use crate::backend::sqlite::SQLITE_MEMORY_TARGET;
use crate::backend::turso::{integer, positional, prime_thread, TursoHandle, TURSO_MEMORY_TARGET};
use crate::backend::Target;
use crate::error::{BenchError, DriverError, Result};
use crate::heap::{attribute, HEAP_AUDITOR};
use crate::runner::{execution_failed, setup_failed, teardown_failed, Workbench};
use crate::timing::TimingWindow;
use crate::workload::{BenchKind, Workload};

/// An engine benchmarked without the driver layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeEngine {
    /// turso, the pure-Rust engine.
    Rust,
    /// The bundled SQLite C library.
    C,
}

impl NativeEngine {
    /// Run order within a native group.
    pub const ALL: [NativeEngine; 2] = [NativeEngine::Rust, NativeEngine::C];

    /// Prefix of every case name on this engine.
    pub fn id(self) -> &'static str {
        match self {
            NativeEngine::Rust => "rust",
            NativeEngine::C => "c",
        }
    }

    pub fn from_id(id: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|engine| engine.id() == id)
            .ok_or_else(|| BenchError::UnknownBackend(id.to_string()))
    }

    pub fn memory_target(self) -> &'static str {
        match self {
            NativeEngine::Rust => TURSO_MEMORY_TARGET,
            NativeEngine::C => SQLITE_MEMORY_TARGET,
        }
    }

    pub fn target_string(self, target: &Target) -> String {
        match target {
            Target::InMemory => self.memory_target().to_string(),
            Target::File(path) => path.to_string_lossy().into_owned(),
        }
    }

    /// Only the Rust engine allocates through the Rust heap.
    pub fn auditor(self) -> Option<&'static dyn MemoryAuditor> {
        match self {
            NativeEngine::Rust => Some(&HEAP_AUDITOR),
            NativeEngine::C => None,
        }
    }

    pub(crate) fn open(self, target: &str) -> Result<Box<dyn Workbench>, DriverError> {
        match self {
            NativeEngine::Rust => {
                prime_thread();
                let bench = {
                    let _heap = attribute();
                    TursoNative {
                        handle: TursoHandle::open(target)?,
                        insert: None,
                    }
                };
                Ok(Box::new(bench))
            }
            NativeEngine::C => Ok(Box::new(SqliteNative {
                conn: rusqlite::Connection::open(target)?,
            })),
        }
    }
}

impl fmt::Display for NativeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// turso without the driver layer. Every call runs under a heap attribution.
struct TursoNative {
    handle: TursoHandle,
    insert: Option<turso::Statement>,
}

impl Workbench for TursoNative {
    fn prepare(&mut self, name: &str, kind: BenchKind, w: Workload) -> Result<()> {
        let _heap = attribute();
        let h = &self.handle;
        let conn = h.connection();
        h.run(conn.execute(w.schema(), ()))
            .map_err(setup_failed(name, "creating the schema"))?;
        let insert = h
            .run(conn.prepare(w.insert_statement()))
            .map_err(setup_failed(name, "preparing the insert"))?;
        let insert = self.insert.insert(insert);

        if kind.is_read() {
            h.block_on(async {
                conn.execute(w.begin(), ()).await?;
                for v in w.values() {
                    insert.execute(positional(&[v])).await?;
                }
                conn.execute(w.commit(), ()).await?;
                Ok::<(), DriverError>(())
            })
            .map_err(setup_failed(name, "populating the table"))?;
        }
        Ok(())
    }

    fn scan(&mut self, name: &str, w: Workload, window: &mut TimingWindow) -> Result<u64> {
        let _heap = attribute();
        let h = &self.handle;
        let conn = h.connection();
        let expected = w.row_count();

        window
            .exclude_during(|window| -> Result<u64, DriverError> {
                let mut rows = h.run(conn.query(w.scan_query(), ()))?;
                let scanned = window.measure_during(|| {
                    h.block_on(async {
                        let mut scanned = 0u64;
                        while scanned < expected {
                            match rows.next().await? {
                                Some(row) => {
                                    black_box(integer(row.get_value(0)?)?);
                                    scanned += 1;
                                }
                                None => break,
                            }
                        }
                        Ok::<u64, DriverError>(scanned)
                    })
                });
                drop(rows);
                scanned
            })
            .map_err(execution_failed(name, "scanning the table"))
    }

    fn reinsert(&mut self, name: &str, w: Workload, window: &mut TimingWindow) -> Result<()> {
        let _heap = attribute();
        let Self { handle: h, insert } = self;
        let conn = h.connection();
        let insert = insert
            .as_mut()
            .ok_or_else(|| BenchError::InvalidCase(format!("{name}: no prepared insert")))?;

        window
            .exclude_during(|_| {
                h.block_on(async {
                    conn.execute(w.begin(), ()).await?;
                    conn.execute(w.clear_statement(), ()).await?;
                    Ok::<(), DriverError>(())
                })
            })
            .map_err(execution_failed(name, "clearing the table"))?;

        window
            .measure_during(|| {
                h.block_on(async {
                    for v in w.values() {
                        insert.execute(positional(&[v])).await?;
                    }
                    conn.execute(w.commit(), ()).await?;
                    Ok::<(), DriverError>(())
                })
            })
            .map_err(execution_failed(name, "inserting rows"))
    }

    fn count_rows(&mut self, w: Workload) -> Result<Option<i64>, DriverError> {
        let _heap = attribute();
        let h = &self.handle;
        let conn = h.connection();
        h.block_on(async {
            let mut rows = conn.query(w.count_query(), ()).await?;
            let first = rows.next().await?;
            match first {
                Some(row) => integer(row.get_value(0)?).map(Some),
                None => Ok::<_, DriverError>(None),
            }
        })
    }

    fn close(self: Box<Self>, _: &str, _: &mut dyn FnMut(BenchError)) {
        let heap = attribute();
        let Self { handle, insert } = *self;
        drop(insert);
        drop(handle);
        drop(heap);
    }
}

/// rusqlite without the driver layer. Statements come from the
/// connection's statement cache.
struct SqliteNative {
    conn: rusqlite::Connection,
}

impl Workbench for SqliteNative {
    fn prepare(&mut self, name: &str, kind: BenchKind, w: Workload) -> Result<()> {
        let conn = &self.conn;
        conn.execute(w.schema(), [])
            .map_err(|e| setup_failed(name, "creating the schema")(e.into()))?;
        conn.prepare_cached(w.insert_statement())
            .map_err(|e| setup_failed(name, "preparing the insert")(e.into()))?;

        if kind.is_read() {
            let populate = || -> Result<(), DriverError> {
                conn.execute_batch(w.begin())?;
                let mut insert = conn.prepare_cached(w.insert_statement())?;
                for v in w.values() {
                    insert.execute([v])?;
                }
                drop(insert);
                conn.execute_batch(w.commit())?;
                Ok(())
            };
            populate().map_err(setup_failed(name, "populating the table"))?;
        }
        Ok(())
    }

    fn scan(&mut self, name: &str, w: Workload, window: &mut TimingWindow) -> Result<u64> {
        let conn = &self.conn;
        let expected = w.row_count();

        window
            .exclude_during(|window| -> Result<u64, DriverError> {
                let mut stmt = conn.prepare_cached(w.scan_query())?;
                let mut rows = stmt.query([])?;
                let scanned = window.measure_during(|| -> Result<u64, DriverError> {
                    let mut scanned = 0u64;
                    while scanned < expected {
                        match rows.next()? {
                            Some(row) => {
                                black_box(row.get::<_, i64>(0)?);
                                scanned += 1;
                            }
                            None => break,
                        }
                    }
                    Ok(scanned)
                });
                scanned
            })
            .map_err(execution_failed(name, "scanning the table"))
    }

    fn reinsert(&mut self, name: &str, w: Workload, window: &mut TimingWindow) -> Result<()> {
        let conn = &self.conn;
        let mut insert = window
            .exclude_during(move |_| -> Result<_, DriverError> {
                conn.execute_batch(w.begin())?;
                conn.execute(w.clear_statement(), [])?;
                Ok(conn.prepare_cached(w.insert_statement())?)
            })
            .map_err(execution_failed(name, "clearing the table"))?;

        window
            .measure_during(|| -> Result<(), DriverError> {
                for v in w.values() {
                    insert.execute([v])?;
                }
                conn.execute_batch(w.commit())?;
                Ok(())
            })
            .map_err(execution_failed(name, "inserting rows"))
    }

    fn count_rows(&mut self, w: Workload) -> Result<Option<i64>, DriverError> {
        let count = self
            .conn
            .query_row(w.count_query(), [], |row| row.get::<_, i64>(0))?;
        Ok(Some(count))
    }

    fn close(self: Box<Self>, name: &str, record: &mut dyn FnMut(BenchError)) {
        if let Err((_, err)) = self.conn.close() {
            record(teardown_failed(name, "closing the connection")(err.into()));
        }
    }
}
