//! Backend abstraction and registry.
//!
//! Every database under test implements [`Backend`] (how to open it) and
//! [`Connection`] (what can be done with an open handle). The harness only
//! ever talks to these traits, so native and pure-Rust drivers run exactly
//! the same code path.
//!
//! - [`sqlite::SqliteBackend`]: `sqlite3`, the bundled C library via rusqlite
//! - [`turso::TursoBackend`]: `turso`, the pure-Rust SQLite rewrite

pub mod sqlite;
pub mod turso;

pub use self::sqlite::SqliteBackend;
pub use self::turso::TursoBackend;

use std::path::PathBuf;

use crate::audit::MemoryAuditor;
use crate::error::{BenchError, DriverError, Result};

/// Where a connection keeps its data, before backend-specific spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    InMemory,
    File(PathBuf),
}

/// A database driver that can be opened by target string.
pub trait Backend {
    /// Registration identifier, also the prefix of every case name.
    fn id(&self) -> &str;

    /// Target string that selects a private in-memory database.
    fn memory_target(&self) -> &str;

    /// Spell `target` the way this backend expects it.
    fn target_string(&self, target: &Target) -> String {
        match target {
            Target::InMemory => self.memory_target().to_string(),
            Target::File(path) => path.to_string_lossy().into_owned(),
        }
    }

    fn open(&self, target: &str) -> Result<Box<dyn Connection>, DriverError>;

    /// Allocation accounting, for backends that can provide it.
    fn auditor(&self) -> Option<&dyn MemoryAuditor> {
        None
    }
}

/// Handle to a statement prepared on one [`Connection`].
///
/// The connection owns the underlying statement; this is only a ticket for
/// it. Hand it back with [`Connection::close_statement`].
#[derive(Debug, PartialEq, Eq)]
pub struct PreparedStatement {
    slot: usize,
    sql: String,
    parameters: usize,
}

impl PreparedStatement {
    pub fn new(slot: usize, sql: &str, parameters: usize) -> Self {
        Self {
            slot,
            sql: sql.to_string(),
            parameters,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters
    }
}

/// Forward-only cursor over a single-column integer result.
pub trait RowCursor {
    /// First column of the next row, `None` once exhausted.
    fn next_value(&mut self) -> Result<Option<i64>, DriverError>;
}

/// An open database handle.
pub trait Connection {
    /// Run a statement that returns no rows.
    fn execute(&mut self, sql: &str) -> Result<(), DriverError>;

    fn prepare(&mut self, sql: &str) -> Result<PreparedStatement, DriverError>;

    /// Execute a prepared statement, returning the number of changed rows.
    fn exec_prepared(
        &mut self,
        statement: &PreparedStatement,
        args: &[i64],
    ) -> Result<usize, DriverError>;

    /// Open a cursor over `sql` and hand it to `consume`. The cursor is
    /// closed when `consume` returns.
    fn query(
        &mut self,
        sql: &str,
        consume: &mut dyn FnMut(&mut dyn RowCursor) -> Result<(), DriverError>,
    ) -> Result<(), DriverError>;

    fn close_statement(&mut self, statement: PreparedStatement) -> Result<(), DriverError>;

    fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Backends by identifier, in registration order.
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// `sqlite3` followed by `turso`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.backends.push(Box::new(SqliteBackend::new()));
        registry.backends.push(Box::new(TursoBackend::new()));
        registry
    }

    pub fn register(&mut self, backend: Box<dyn Backend>) -> Result<()> {
        if self.backends.iter().any(|b| b.id() == backend.id()) {
            return Err(BenchError::DuplicateBackend(backend.id().to_string()));
        }
        log::debug!("registered backend {}", backend.id());
        self.backends.push(backend);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.id() == id)
            .map(|b| b.as_ref())
            .ok_or_else(|| BenchError::UnknownBackend(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(|b| b.id())
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Open backend `id` against a target string in its own convention.
    pub fn open(&self, id: &str, target: &str) -> Result<Box<dyn Connection>> {
        let backend = self.get(id)?;
        backend.open(target).map_err(|source| BenchError::Setup {
            case: id.to_string(),
            stage: "opening the backend",
            source,
        })
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
