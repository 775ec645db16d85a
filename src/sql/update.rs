//! UPDATE statements guarded by the version column.
//!
//! A single row is updated with a plain `UPDATE ... WHERE id = :_id`. A
//! batch joins the table against a `VALUES` list and returns the ids it
//! reached; ids missing from that list were deleted or changed by another
//! writer.

use super::Writer;
use super::binder::{BindEnv, RowBinder, compile_row};
use super::command::{Parameter, SqlCommand, quote, suffix, values_rows};
use crate::error::Result;
use crate::model::{EntityArena, Handle};
use crate::saver::concurrency::{missing_rows, stamp};
use crate::schema::{Table, TableDef, TypeName};
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

const ID_PARAM: &str = "_id";
const OLD_VERSION_PARAM: &str = "_old_version";

/// A compiled UPDATE for a fixed number of rows.
#[derive(Debug)]
pub(crate) struct UpdateExecutor {
    sql: Arc<str>,
    rows: usize,
}

impl UpdateExecutor {
    pub(crate) fn sql(&self) -> Arc<str> {
        Arc::clone(&self.sql)
    }
}

/// Update statements of one table.
pub(crate) struct UpdateCache {
    table: String,
    type_name: TypeName,
    primary_key: String,
    version: Option<String>,
    columns: Vec<String>,
    binder: RowBinder,
    executors: DashMap<usize, Arc<UpdateExecutor>>,
}

impl UpdateCache {
    pub(crate) fn compile(def: &TableDef) -> Self {
        let mut columns = Vec::new();
        let binder = compile_row(def, false, &mut columns);
        info!(type_name = %def.type_name, columns = columns.len(), "Compiled update binder");
        Self {
            table: def.table.clone(),
            type_name: def.type_name.clone(),
            primary_key: def.primary_key.name.clone(),
            version: def.version.as_ref().map(|c| c.name.clone()),
            columns,
            binder,
            executors: DashMap::new(),
        }
    }

    /// Executor for `rows` rows, or `None` when the table has nothing to set.
    pub(crate) fn executor(&self, rows: usize) -> Option<Arc<UpdateExecutor>> {
        if self.columns.is_empty() {
            return None;
        }
        let rows = rows.max(1);
        let entry = self
            .executors
            .entry(rows)
            .or_insert_with(|| Arc::new(self.build(rows)));
        Some(Arc::clone(entry.value()))
    }

    pub(crate) fn compiled_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.executors.iter().map(|e| *e.key()).collect();
        sizes.sort_unstable();
        sizes
    }

    fn build(&self, rows: usize) -> UpdateExecutor {
        let table = quote(&self.table);
        let key = quote(&self.primary_key);
        let mut sql = format!("UPDATE {table} SET ");

        if rows == 1 {
            let assignments: Vec<String> = self
                .columns
                .iter()
                .map(|c| format!("{} = :{c}", quote(c)))
                .collect();
            sql.push_str(&assignments.join(", "));
            let _ = write!(sql, " WHERE {key} = :{ID_PARAM}");
            if let Some(version) = &self.version {
                let _ = write!(sql, " AND {} = :{OLD_VERSION_PARAM}", quote(version));
            }
        } else {
            // VALUES columns are named column1, column2, ... by SQLite
            let offset = if self.version.is_some() { 3 } else { 2 };
            let assignments: Vec<String> = self
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = v.column{}", quote(c), i + offset))
                .collect();
            sql.push_str(&assignments.join(", "));

            let mut names: Vec<&str> = vec![ID_PARAM];
            if self.version.is_some() {
                names.push(OLD_VERSION_PARAM);
            }
            names.extend(self.columns.iter().map(String::as_str));
            let _ = write!(
                sql,
                " FROM (VALUES {}) AS v WHERE {table}.{key} = v.column1",
                values_rows(&names, rows)
            );
            if let Some(version) = &self.version {
                let _ = write!(sql, " AND {table}.{} = v.column2", quote(version));
            }
            let _ = write!(sql, " RETURNING {key}");
        }

        debug!(table = %self.table, rows, "Compiled update statement");
        UpdateExecutor { sql: sql.into(), rows }
    }
}

/// Update a group of existing units of one type.
///
/// Versions are stamped before binding and the replaced values become the
/// WHERE predicate. Returns the units that wrote at least one reference as
/// NULL and need another pass.
///
/// # Errors
///
/// Rows the statement did not reach raise `ConcurrencyConflict` on
/// versioned tables and `EntityNotFound` otherwise.
pub(crate) fn update_many(
    w: &Writer<'_>,
    arena: &mut EntityArena,
    table: &Table,
    units: &[Handle],
) -> Result<Vec<Handle>> {
    let def = table.def();
    let cache = table.caches.update(def);
    let versioned = cache.version.is_some();

    if cache.executor(1).is_none() {
        debug!(type_name = %def.type_name, "No columns to update");
        return Ok(Vec::new());
    }

    let previous = if versioned {
        stamp(arena, units, w.settings.version_policy)
    } else {
        vec![None; units.len()]
    };

    let batch = w.settings.rows_per_statement();
    let mut deferred = Vec::new();

    for (chunk, old_versions) in units.chunks(batch).zip(previous.chunks(batch)) {
        let Some(executor) = cache.executor(chunk.len()) else {
            continue;
        };
        let rows = executor.rows;
        let mut parameters = Vec::with_capacity(chunk.len() * (cache.columns.len() + 2));
        let mut ids = Vec::with_capacity(chunk.len());

        for (index, (&unit, old_version)) in chunk.iter().zip(old_versions).enumerate() {
            let sfx = suffix(index, rows);
            let id = arena[unit].id();
            ids.extend(id);

            let forbidden = w.feedback.forbidden_for(arena, unit);
            if forbidden.nulls_row_of(&arena[unit]) {
                deferred.push(unit);
            }

            parameters.push(Parameter::new(format!(":{ID_PARAM}{sfx}"), id));
            if versioned {
                parameters.push(Parameter::new(format!(":{OLD_VERSION_PARAM}{sfx}"), *old_version));
            }
            let env = BindEnv {
                arena: &*arena,
                schema: w.schema,
                forbidden: &forbidden,
            };
            (cache.binder)(&arena[unit], &env, &sfx, &mut parameters)?;
        }

        let command = SqlCommand::new(executor.sql(), parameters);
        if rows == 1 {
            if w.driver.execute(&command)? != 1 {
                return Err(missing_rows(&cache.type_name, versioned, ids));
            }
        } else {
            let reached: HashSet<i64> = w.driver.query_ids(&command)?.into_iter().collect();
            let missing: Vec<i64> = ids.into_iter().filter(|id| !reached.contains(id)).collect();
            if !missing.is_empty() {
                return Err(missing_rows(&cache.type_name, versioned, missing));
            }
        }
        debug!(type_name = %def.type_name, rows, "Updated batch");
    }

    Ok(deferred)
}
