//! SQLite storage.
//!
//! Owns the connection and the transaction protocol: every save runs inside
//! one IMMEDIATE transaction that commits only if the whole graph was
//! written. A save issued while a transaction is already open on the
//! connection joins it instead.

use crate::error::Result;
use crate::model::{EntityArena, Handle};
use crate::saver::{self, SaveContext};
use crate::schema::Schema;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Prepared statements kept per connection; executors are keyed by batch
/// size, so this bounds tables x sizes in use.
const STATEMENT_CACHE_CAPACITY: usize = 256;

/// SQLite-backed storage for entity graphs.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::configure(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access, e.g. to open a transaction that several saves join.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Create the tables of every registered type.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub fn create_tables(&self, schema: &Schema) -> Result<()> {
        for sql in schema.create_table_sql() {
            self.conn.execute_batch(&sql)?;
        }
        Ok(())
    }

    /// Run `f` inside an IMMEDIATE transaction.
    ///
    /// Commits when `f` succeeds; the transaction rolls back when it is
    /// dropped after an error.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` or of the commit.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let result = f(&tx)?;

        tx.commit()?;
        debug!(op, "Committed");
        Ok(result)
    }

    /// Save everything reachable from `roots` atomically.
    ///
    /// # Errors
    ///
    /// See [`saver::save`]. On error nothing is committed and the
    /// in-memory graph is restored.
    pub fn save(&mut self, ctx: &SaveContext<'_>, arena: &mut EntityArena, roots: &[Handle]) -> Result<()> {
        if self.conn.is_autocommit() {
            self.mutate("save", |tx| saver::save(ctx, tx, arena, roots))
        } else {
            // ambient transaction owned by the caller
            saver::save(ctx, &self.conn, arena, roots)
        }
    }

    /// Row count of a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", crate::sql::quote(table));
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::Entity;
    use crate::schema::{FieldDef, SqlType, TableDef};

    fn schema() -> Schema {
        Schema::new().with(TableDef::new("Tag", "tags").field("name", FieldDef::value("name", SqlType::Text)))
    }

    #[test]
    fn test_open_memory() {
        let storage = SqliteStorage::open_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(&dir.path().join("graph.db")).unwrap();
        storage.create_tables(&schema()).unwrap();
        assert_eq!(storage.count("tags").unwrap(), 0);
    }

    #[test]
    fn test_mutate_rolls_back_on_error() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_tables(&schema()).unwrap();

        let result: Result<()> = storage.mutate("failing", |tx| {
            tx.execute("INSERT INTO tags (name) VALUES ('x')", [])?;
            Err(Error::Other("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(storage.count("tags").unwrap(), 0);
    }

    #[test]
    fn test_save_joins_ambient_transaction() {
        let schema = schema();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_tables(&schema).unwrap();

        let mut arena = EntityArena::new();
        let tag = arena.add(Entity::new("Tag").with("name", "jazz"));

        storage.conn().execute_batch("BEGIN").unwrap();
        storage.save(&SaveContext::new(&schema), &mut arena, &[tag]).unwrap();
        storage.conn().execute_batch("ROLLBACK").unwrap();

        // the caller's rollback undid the save
        assert_eq!(storage.count("tags").unwrap(), 0);
    }
}
