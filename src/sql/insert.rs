//! INSERT statements, one executor per batch size.

use super::Writer;
use super::binder::{BindEnv, RowBinder, compile_row};
use super::command::{Parameter, SqlCommand, quote, suffix, values_rows};
use crate::error::{Error, Result};
use crate::model::{EntityArena, Handle, Value};
use crate::schema::{Table, TableDef, TypeName};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// How an executor reads back the outcome of its statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertMode {
    /// One row; the generated id comes back as a scalar.
    ScalarId,
    /// Several rows; generated ids come back as a list.
    IdList,
    /// Caller-assigned ids; only the affected count is checked.
    RowCount,
}

/// A compiled INSERT for a fixed number of rows.
#[derive(Debug)]
pub(crate) struct InsertExecutor {
    sql: Arc<str>,
    rows: usize,
    mode: InsertMode,
}

impl InsertExecutor {
    pub(crate) fn sql(&self) -> Arc<str> {
        Arc::clone(&self.sql)
    }

    /// Run the statement and return one id per row, in input order.
    fn run(&self, w: &Writer<'_>, parameters: Vec<Parameter>, assigned: &[i64]) -> Result<Vec<i64>> {
        let command = SqlCommand::new(Arc::clone(&self.sql), parameters);
        match self.mode {
            InsertMode::ScalarId => match w.driver.query_scalar(&command)? {
                Value::Integer(id) => Ok(vec![id]),
                other => Err(Error::Other(format!("insert returned a non-integer id: {other}"))),
            },
            InsertMode::IdList => {
                let mut ids = w.driver.query_ids(&command)?;
                if ids.len() != self.rows {
                    return Err(Error::BatchMismatch {
                        expected: self.rows,
                        actual: ids.len(),
                    });
                }
                // rowids of one multi-row insert are allocated in VALUES order
                ids.sort_unstable();
                Ok(ids)
            }
            InsertMode::RowCount => {
                let affected = w.driver.execute(&command)?;
                if affected != self.rows {
                    return Err(Error::BatchMismatch {
                        expected: self.rows,
                        actual: affected,
                    });
                }
                Ok(assigned.to_vec())
            }
        }
    }
}

/// Insert statements of one table.
pub(crate) struct InsertCache {
    table: String,
    type_name: TypeName,
    identity: bool,
    columns: Vec<String>,
    binder: RowBinder,
    executors: DashMap<usize, Arc<InsertExecutor>>,
}

impl InsertCache {
    pub(crate) fn compile(def: &TableDef) -> Self {
        let mut columns = Vec::new();
        let binder = compile_row(def, !def.identity, &mut columns);
        info!(type_name = %def.type_name, columns = columns.len(), "Compiled insert binder");
        Self {
            table: def.table.clone(),
            type_name: def.type_name.clone(),
            identity: def.identity,
            columns,
            binder,
            executors: DashMap::new(),
        }
    }

    /// Largest batch this table supports under `limit`.
    fn max_rows(&self, limit: usize) -> usize {
        if self.columns.is_empty() { 1 } else { limit.max(1) }
    }

    pub(crate) fn executor(&self, rows: usize) -> Arc<InsertExecutor> {
        let rows = if self.columns.is_empty() { 1 } else { rows.max(1) };
        let entry = self
            .executors
            .entry(rows)
            .or_insert_with(|| Arc::new(self.build(rows)));
        Arc::clone(entry.value())
    }

    pub(crate) fn compiled_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.executors.iter().map(|e| *e.key()).collect();
        sizes.sort_unstable();
        sizes
    }

    fn build(&self, rows: usize) -> InsertExecutor {
        let table = quote(&self.table);
        let sql = if self.columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING \"id\"")
        } else {
            let names: Vec<&str> = self.columns.iter().map(String::as_str).collect();
            let column_list = names.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
            let values = values_rows(&names, rows);
            if self.identity {
                format!("INSERT INTO {table} ({column_list}) VALUES {values} RETURNING \"id\"")
            } else {
                format!("INSERT INTO {table} ({column_list}) VALUES {values}")
            }
        };
        let mode = match (self.identity, rows) {
            (false, _) => InsertMode::RowCount,
            (true, 1) => InsertMode::ScalarId,
            (true, _) => InsertMode::IdList,
        };
        debug!(table = %self.table, rows, "Compiled insert statement");
        InsertExecutor {
            sql: sql.into(),
            rows,
            mode,
        }
    }

    fn check_identity(&self, arena: &EntityArena, units: &[Handle]) -> Result<()> {
        for &unit in units {
            let entity = &arena[unit];
            match (self.identity, entity.id()) {
                (true, Some(id)) => {
                    return Err(Error::InvalidIdentity {
                        type_name: self.type_name.clone(),
                        message: format!("new entity {} already has id {id}", arena.describe(unit)),
                    });
                }
                (false, None) => {
                    return Err(Error::InvalidIdentity {
                        type_name: self.type_name.clone(),
                        message: format!("new entity {} has no caller-assigned id", arena.describe(unit)),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Insert a group of new units of one type.
///
/// Ids are written back and the units stop being new as each physical
/// batch completes. Returns the units that wrote at least one reference as
/// NULL and must be repaired once their targets exist.
pub(crate) fn insert_many(
    w: &Writer<'_>,
    arena: &mut EntityArena,
    table: &Table,
    units: &[Handle],
) -> Result<Vec<Handle>> {
    let def = table.def();
    let cache = table.caches.insert(def);
    cache.check_identity(arena, units)?;

    if def.version.is_some() {
        for &unit in units {
            arena[unit].version = Some(w.settings.version_policy.next(None));
        }
    }

    let batch = cache.max_rows(w.settings.rows_per_statement());
    let mut deferred = Vec::new();

    for chunk in units.chunks(batch) {
        let executor = cache.executor(chunk.len());
        let mut parameters = Vec::with_capacity(chunk.len() * cache.columns.len());
        for (index, &unit) in chunk.iter().enumerate() {
            let forbidden = w.feedback.forbidden_for(arena, unit);
            if forbidden.nulls_row_of(&arena[unit]) {
                deferred.push(unit);
            }
            let env = BindEnv {
                arena: &*arena,
                schema: w.schema,
                forbidden: &forbidden,
            };
            (cache.binder)(&arena[unit], &env, &suffix(index, chunk.len()), &mut parameters)?;
        }

        let assigned: Vec<i64> = chunk.iter().filter_map(|&u| arena[u].id()).collect();
        let ids = executor.run(w, parameters, &assigned)?;
        for (&unit, id) in chunk.iter().zip(ids) {
            let entity = &mut arena[unit];
            entity.id = Some(id);
            entity.is_new = false;
        }
        debug!(type_name = %def.type_name, rows = chunk.len(), "Inserted batch");
    }

    Ok(deferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, SqlType};

    fn def() -> TableDef {
        TableDef::new("Tag", "tags").field("name", FieldDef::value("name", SqlType::Text))
    }

    #[test]
    fn test_identity_insert_sql() {
        let cache = InsertCache::compile(&def());
        assert_eq!(
            &*cache.executor(1).sql(),
            "INSERT INTO \"tags\" (\"name\") VALUES (:name) RETURNING \"id\""
        );
        assert_eq!(
            &*cache.executor(2).sql(),
            "INSERT INTO \"tags\" (\"name\") VALUES (:name_0), (:name_1) RETURNING \"id\""
        );
        assert_eq!(cache.compiled_sizes(), vec![1, 2]);
    }

    #[test]
    fn test_caller_assigned_insert_includes_key() {
        let cache = InsertCache::compile(&def().caller_assigned_ids());
        let executor = cache.executor(1);
        assert_eq!(&*executor.sql(), "INSERT INTO \"tags\" (\"id\", \"name\") VALUES (:id, :name)");
        assert_eq!(executor.mode, InsertMode::RowCount);
    }

    #[test]
    fn test_table_without_columns_uses_default_values() {
        let cache = InsertCache::compile(&TableDef::new("Marker", "markers"));
        let executor = cache.executor(5);
        assert_eq!(executor.rows, 1);
        assert_eq!(&*executor.sql(), "INSERT INTO \"markers\" DEFAULT VALUES RETURNING \"id\"");
    }

    #[test]
    fn test_identity_checks() {
        use crate::model::Entity;

        let mut arena = EntityArena::new();
        let with_id = arena.add(Entity::new("Tag").with_id(3));
        let without = arena.add(Entity::new("Tag"));

        let identity = InsertCache::compile(&def());
        assert!(matches!(
            identity.check_identity(&arena, &[with_id]),
            Err(Error::InvalidIdentity { .. })
        ));
        assert!(identity.check_identity(&arena, &[without]).is_ok());

        let assigned = InsertCache::compile(&def().caller_assigned_ids());
        assert!(assigned.check_identity(&arena, &[without]).is_err());
        assert!(assigned.check_identity(&arena, &[with_id]).is_ok());
    }
}
