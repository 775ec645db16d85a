//! Relational driver seam.
//!
//! The engine issues every statement through [`Driver`]. It is implemented
//! for rusqlite connections and transactions; [`SqliteStorage`] adds the
//! transaction protocol around a save, and [`RecordingDriver`] keeps a log
//! of what was executed.

pub mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::Result;
use crate::model::Value;
use crate::sql::SqlCommand;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, Transaction};
use std::cell::RefCell;
use tracing::trace;

/// Executes parameterized statements.
pub trait Driver {
    /// Run a statement and return the affected-row count.
    ///
    /// # Errors
    ///
    /// Returns the driver's error unchanged.
    fn execute(&self, command: &SqlCommand) -> Result<usize>;

    /// Run a statement returning one integer column per row.
    ///
    /// # Errors
    ///
    /// Returns the driver's error unchanged.
    fn query_ids(&self, command: &SqlCommand) -> Result<Vec<i64>>;

    /// Run a statement returning exactly one value.
    ///
    /// # Errors
    ///
    /// Returns the driver's error unchanged, including "no rows".
    fn query_scalar(&self, command: &SqlCommand) -> Result<Value>;
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Self::Integer(v) => ToSqlOutput::from(*v),
            Self::Real(v) => ToSqlOutput::from(*v),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Self::Bool(b) => ToSqlOutput::from(*b),
        })
    }
}

impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => Self::Null,
            rusqlite::types::Value::Integer(v) => Self::Integer(v),
            rusqlite::types::Value::Real(v) => Self::Real(v),
            rusqlite::types::Value::Text(s) => Self::Text(s),
            rusqlite::types::Value::Blob(b) => Self::Blob(b),
        }
    }
}

fn named_params(command: &SqlCommand) -> Vec<(&str, &dyn ToSql)> {
    command
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), &p.value as &dyn ToSql))
        .collect()
}

impl Driver for Connection {
    fn execute(&self, command: &SqlCommand) -> Result<usize> {
        trace!(sql = %command.sql, params = command.parameters.len(), "execute");
        let mut stmt = self.prepare_cached(&command.sql)?;
        Ok(stmt.execute(named_params(command).as_slice())?)
    }

    fn query_ids(&self, command: &SqlCommand) -> Result<Vec<i64>> {
        trace!(sql = %command.sql, params = command.parameters.len(), "query ids");
        let mut stmt = self.prepare_cached(&command.sql)?;
        let ids = stmt
            .query_map(named_params(command).as_slice(), |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn query_scalar(&self, command: &SqlCommand) -> Result<Value> {
        trace!(sql = %command.sql, params = command.parameters.len(), "query scalar");
        let mut stmt = self.prepare_cached(&command.sql)?;
        let value = stmt.query_row(named_params(command).as_slice(), |row| {
            row.get::<_, rusqlite::types::Value>(0)
        })?;
        Ok(value.into())
    }
}

impl Driver for Transaction<'_> {
    fn execute(&self, command: &SqlCommand) -> Result<usize> {
        Driver::execute(&**self, command)
    }

    fn query_ids(&self, command: &SqlCommand) -> Result<Vec<i64>> {
        Driver::query_ids(&**self, command)
    }

    fn query_scalar(&self, command: &SqlCommand) -> Result<Value> {
        Driver::query_scalar(&**self, command)
    }
}

/// Wraps a driver and keeps every command it runs.
pub struct RecordingDriver<'d> {
    inner: &'d dyn Driver,
    log: RefCell<Vec<SqlCommand>>,
}

impl<'d> RecordingDriver<'d> {
    #[must_use]
    pub fn new(inner: &'d dyn Driver) -> Self {
        Self {
            inner,
            log: RefCell::new(Vec::new()),
        }
    }

    /// Commands executed so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<SqlCommand> {
        self.log.borrow().clone()
    }

    /// Number of commands whose SQL mentions `table`.
    #[must_use]
    pub fn count_touching(&self, table: &str) -> usize {
        let quoted = format!("\"{table}\"");
        self.log
            .borrow()
            .iter()
            .filter(|c| c.sql.contains(&quoted))
            .count()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

impl Driver for RecordingDriver<'_> {
    fn execute(&self, command: &SqlCommand) -> Result<usize> {
        self.log.borrow_mut().push(command.clone());
        self.inner.execute(command)
    }

    fn query_ids(&self, command: &SqlCommand) -> Result<Vec<i64>> {
        self.log.borrow_mut().push(command.clone());
        self.inner.query_ids(command)
    }

    fn query_scalar(&self, command: &SqlCommand) -> Result<Value> {
        self.log.borrow_mut().push(command.clone());
        self.inner.query_scalar(command)
    }
}
