//! `sqlite3` backend: the bundled C library through rusqlite.
//!
//! No pragmas are applied; the library runs with its defaults. Its
//! allocations go through the C allocator, so it has no auditor.

use rusqlite::params_from_iter;

use super::{Backend, Connection, PreparedStatement, RowCursor};
use crate::error::DriverError;

/// A private in-memory database; rusqlite opens with URI filenames enabled.
pub const SQLITE_MEMORY_TARGET: &str = "file::memory:";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBackend;

impl SqliteBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for SqliteBackend {
    fn id(&self) -> &str {
        "sqlite3"
    }

    fn memory_target(&self) -> &str {
        SQLITE_MEMORY_TARGET
    }

    fn open(&self, target: &str) -> Result<Box<dyn Connection>, DriverError> {
        let conn = rusqlite::Connection::open(target)?;
        log::debug!("sqlite3: opened {target}");
        Ok(Box::new(SqliteConnection {
            conn,
            statements: Vec::new(),
        }))
    }
}

/// Prepared statements live in rusqlite's per-connection statement cache;
/// `statements` records which slots are still open.
struct SqliteConnection {
    conn: rusqlite::Connection,
    statements: Vec<Option<String>>,
}

impl SqliteConnection {
    fn open_sql(&self, statement: &PreparedStatement) -> Result<&str, DriverError> {
        self.statements
            .get(statement.slot())
            .and_then(Option::as_deref)
            .filter(|sql| *sql == statement.sql())
            .ok_or(DriverError::StaleStatement {
                slot: statement.slot(),
            })
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> Result<PreparedStatement, DriverError> {
        let parameters = self.conn.prepare_cached(sql)?.parameter_count();
        let slot = self.statements.len();
        self.statements.push(Some(sql.to_string()));
        Ok(PreparedStatement::new(slot, sql, parameters))
    }

    fn exec_prepared(
        &mut self,
        statement: &PreparedStatement,
        args: &[i64],
    ) -> Result<usize, DriverError> {
        let sql = self.open_sql(statement)?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(args))?)
    }

    fn query(
        &mut self,
        sql: &str,
        consume: &mut dyn FnMut(&mut dyn RowCursor) -> Result<(), DriverError>,
    ) -> Result<(), DriverError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query([])?;
        consume(&mut rows)
    }

    fn close_statement(&mut self, statement: PreparedStatement) -> Result<(), DriverError> {
        self.open_sql(&statement)?;
        self.statements[statement.slot()] = None;
        self.conn.flush_prepared_statement_cache();
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        let open = self.statements.iter().flatten().count();
        if open > 0 {
            log::warn!("sqlite3: closing with {open} prepared statement(s) still open");
        }
        self.conn.close().map_err(|(_, err)| err)?;
        Ok(())
    }
}

impl RowCursor for rusqlite::Rows<'_> {
    fn next_value(&mut self) -> Result<Option<i64>, DriverError> {
        match self.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}
