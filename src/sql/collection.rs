//! Child-collection synchronization.
//!
//! Collections are written after their owners, in three steps per
//! collection table: removed rows are deleted, kept rows whose position or
//! embedded value changed are updated, rows without an id are inserted.
//! Removed rows are the ids stored at the last sync that are gone now.
//! Every step is split by the row bound; updates and inserts are batched
//! across all owners of the group.

use super::Writer;
use super::binder::{BindEnv, FieldBinder, compile_field};
use super::command::{Parameter, SqlCommand, param, quote, suffix, values_rows};
use crate::error::{Error, Result};
use crate::graph::Forbidden;
use crate::model::{Collection, EntityArena, Handle};
use crate::schema::{CollectionDef, Table, TableDef, TypeName};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

const OWNER_PARAM: &str = "_owner";
const ORDER_PARAM: &str = "_order";
const ROW_PARAM: &str = "_row";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Statement {
    Insert,
    DeleteAll,
    DeleteRows,
    Update,
}

/// Statements of one collection table.
pub(crate) struct CollectionCache {
    field: String,
    owner_type: TypeName,
    table: String,
    primary_key: String,
    back_reference: String,
    order: Option<String>,
    element_columns: Vec<String>,
    updatable: bool,
    binder: FieldBinder,
    statements: DashMap<(Statement, usize), Arc<str>>,
}

/// Rows of one collection that need writing, gathered across owners.
#[derive(Default)]
struct Pending {
    delete_all: Vec<i64>,
    delete_rows: Vec<(i64, Vec<i64>)>,
    updates: Vec<(Handle, usize)>,
    inserts: Vec<(Handle, usize)>,
}

impl CollectionCache {
    pub(crate) fn compile(owner: &TableDef, def: &CollectionDef) -> Self {
        let mut element_columns = Vec::new();
        let path = format!("{}.{}", owner.type_name, def.field);
        let binder = compile_field(&path, &def.element, &mut element_columns);
        info!(type_name = %owner.type_name, field = %def.field, "Compiled collection binder");
        Self {
            field: def.field.clone(),
            owner_type: owner.type_name.clone(),
            table: def.table.clone(),
            primary_key: def.primary_key.name.clone(),
            back_reference: def.back_reference.name.clone(),
            order: def.order.as_ref().map(|c| c.name.clone()),
            element_columns,
            updatable: def.has_updatable_rows(),
            binder,
            statements: DashMap::new(),
        }
    }

    pub(crate) fn field(&self) -> &str {
        &self.field
    }

    /// Insert, delete-all, delete-rows and update text for `rows` rows.
    pub(crate) fn statements(&self, rows: usize) -> Vec<Arc<str>> {
        let mut out = vec![
            self.sql(Statement::Insert, rows),
            self.sql(Statement::DeleteAll, rows),
            self.sql(Statement::DeleteRows, rows),
        ];
        if self.updatable {
            out.push(self.sql(Statement::Update, rows));
        }
        out
    }

    fn sql(&self, statement: Statement, rows: usize) -> Arc<str> {
        let rows = rows.max(1);
        let entry = self
            .statements
            .entry((statement, rows))
            .or_insert_with(|| self.build(statement, rows).into());
        Arc::clone(entry.value())
    }

    /// Parameter names of one row, in VALUES order, for insert and update.
    fn row_names(&self, leading: &'static str) -> Vec<&str> {
        let mut names = vec![leading];
        if self.order.is_some() {
            names.push(ORDER_PARAM);
        }
        names.extend(self.element_columns.iter().map(String::as_str));
        names
    }

    fn build(&self, statement: Statement, rows: usize) -> String {
        let table = quote(&self.table);
        let key = quote(&self.primary_key);
        let back = quote(&self.back_reference);
        let list = |name: &str| {
            (0..rows)
                .map(|i| param(name, &suffix(i, rows)))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let sql = match statement {
            Statement::Insert => {
                let mut columns = vec![back.clone()];
                columns.extend(self.order.iter().map(|c| quote(c)));
                columns.extend(self.element_columns.iter().map(|c| quote(c)));
                format!(
                    "INSERT INTO {table} ({}) VALUES {} RETURNING {key}",
                    columns.join(", "),
                    values_rows(&self.row_names(OWNER_PARAM), rows)
                )
            }
            Statement::DeleteAll => {
                format!("DELETE FROM {table} WHERE {back} IN ({})", list(OWNER_PARAM))
            }
            Statement::DeleteRows => format!(
                "DELETE FROM {table} WHERE {back} = :{OWNER_PARAM} AND {key} IN ({})",
                list(ROW_PARAM)
            ),
            Statement::Update => {
                let mut targets: Vec<String> = self.order.iter().map(|c| quote(c)).collect();
                targets.extend(self.element_columns.iter().map(|c| quote(c)));
                if rows == 1 {
                    let names = self.row_names(ROW_PARAM);
                    let assignments: Vec<String> = targets
                        .iter()
                        .zip(&names[1..])
                        .map(|(c, n)| format!("{c} = :{n}"))
                        .collect();
                    format!("UPDATE {table} SET {} WHERE {key} = :{ROW_PARAM}", assignments.join(", "))
                } else {
                    let assignments: Vec<String> = targets
                        .iter()
                        .enumerate()
                        .map(|(i, c)| format!("{c} = v.column{}", i + 2))
                        .collect();
                    format!(
                        "UPDATE {table} SET {} FROM (VALUES {}) AS v WHERE {table}.{key} = v.column1",
                        assignments.join(", "),
                        values_rows(&self.row_names(ROW_PARAM), rows)
                    )
                }
            }
        };
        debug!(table = %self.table, ?statement, rows, "Compiled collection statement");
        sql
    }

    /// Decide what each owner's collection needs.
    ///
    /// Owners inserted in this call get every row inserted. Existing owners
    /// are diffed against the row ids stored at the last sync; a collection
    /// that was never synced replaces whatever the owner had.
    fn plan(&self, arena: &EntityArena, owners: &[Handle], fresh: bool) -> Result<Pending> {
        let mut pending = Pending::default();
        for &owner in owners {
            let entity = &arena[owner];
            let owner_id = entity
                .id()
                .ok_or_else(|| Error::Other(format!("{} has no id after being saved", arena.describe(owner))))?;

            let Some(collection) = entity.collection(&self.field) else {
                if !fresh && entity.is_collection_nulled(&self.field) {
                    pending.delete_all.push(owner_id);
                }
                continue;
            };

            if fresh {
                pending.inserts.extend((0..collection.len()).map(|i| (owner, i)));
                continue;
            }
            if !collection.is_modified() {
                continue;
            }

            let Some(removed) = collection.removed_row_ids() else {
                pending.delete_all.push(owner_id);
                pending.inserts.extend((0..collection.len()).map(|i| (owner, i)));
                continue;
            };
            if !removed.is_empty() {
                pending.delete_rows.push((owner_id, removed));
            }
            for (index, row) in collection.rows().iter().enumerate() {
                if row.row_id.is_none() {
                    pending.inserts.push((owner, index));
                } else if self.row_changed(collection, index) {
                    pending.updates.push((owner, index));
                }
            }
        }
        Ok(pending)
    }

    fn row_changed(&self, collection: &Collection, index: usize) -> bool {
        let row = &collection.rows()[index];
        (self.order.is_some() && row.old_index != Some(index)) || (self.updatable && row.value.is_modified())
    }

    /// Bind the order and element parameters of one row.
    fn bind_row(
        &self,
        env: &BindEnv<'_>,
        collection: &Collection,
        index: usize,
        sfx: &str,
        out: &mut Vec<Parameter>,
    ) -> Result<()> {
        if self.order.is_some() {
            out.push(Parameter::new(param(ORDER_PARAM, sfx), i64::try_from(index).unwrap_or(i64::MAX)));
        }
        (self.binder)(collection.get(index), env, sfx, out)
    }

    fn execute(&self, w: &Writer<'_>, arena: &mut EntityArena, pending: Pending) -> Result<()> {
        let batch = w.settings.rows_per_statement();
        let none = Forbidden::default();

        for owners in pending.delete_all.chunks(batch) {
            let parameters = owners
                .iter()
                .enumerate()
                .map(|(i, &id)| Parameter::new(param(OWNER_PARAM, &suffix(i, owners.len())), id))
                .collect();
            let command = SqlCommand::new(self.sql(Statement::DeleteAll, owners.len()), parameters);
            w.driver.execute(&command)?;
        }

        for (owner_id, removed) in &pending.delete_rows {
            for rows in removed.chunks(batch) {
                let mut parameters = vec![Parameter::new(param(OWNER_PARAM, ""), *owner_id)];
                parameters.extend(
                    rows.iter()
                        .enumerate()
                        .map(|(i, &id)| Parameter::new(param(ROW_PARAM, &suffix(i, rows.len())), id)),
                );
                let command = SqlCommand::new(self.sql(Statement::DeleteRows, rows.len()), parameters);
                w.driver.execute(&command)?;
            }
        }

        for rows in pending.updates.chunks(batch) {
            let env = BindEnv {
                arena: &*arena,
                schema: w.schema,
                forbidden: &none,
            };
            let mut parameters = Vec::new();
            for (i, &(owner, index)) in rows.iter().enumerate() {
                let sfx = suffix(i, rows.len());
                let collection = self.collection(arena, owner)?;
                parameters.push(Parameter::new(param(ROW_PARAM, &sfx), collection.rows()[index].row_id));
                self.bind_row(&env, collection, index, &sfx, &mut parameters)?;
            }
            let command = SqlCommand::new(self.sql(Statement::Update, rows.len()), parameters);
            let affected = w.driver.execute(&command)?;
            if affected != rows.len() {
                return Err(Error::BatchMismatch {
                    expected: rows.len(),
                    actual: affected,
                });
            }
        }

        for rows in pending.inserts.chunks(batch) {
            let mut parameters = Vec::new();
            {
                let env = BindEnv {
                    arena: &*arena,
                    schema: w.schema,
                    forbidden: &none,
                };
                for (i, &(owner, index)) in rows.iter().enumerate() {
                    let sfx = suffix(i, rows.len());
                    parameters.push(Parameter::new(param(OWNER_PARAM, &sfx), arena[owner].id()));
                    self.bind_row(&env, self.collection(arena, owner)?, index, &sfx, &mut parameters)?;
                }
            }
            let command = SqlCommand::new(self.sql(Statement::Insert, rows.len()), parameters);
            let mut ids = w.driver.query_ids(&command)?;
            if ids.len() != rows.len() {
                return Err(Error::BatchMismatch {
                    expected: rows.len(),
                    actual: ids.len(),
                });
            }
            ids.sort_unstable();
            for (&(owner, index), id) in rows.iter().zip(ids) {
                if let Some(collection) = arena[owner].collection_mut(&self.field) {
                    collection.set_row_id(index, Some(id));
                }
            }
        }

        Ok(())
    }

    fn collection<'a>(&self, arena: &'a EntityArena, owner: Handle) -> Result<&'a Collection> {
        arena[owner]
            .collection(&self.field)
            .ok_or_else(|| Error::Other(format!("{}.{} disappeared during save", self.owner_type, self.field)))
    }
}

/// Synchronize every collection of `owners`, all of one table.
///
/// `fresh` owners were inserted during this call and have no rows yet.
pub(crate) fn sync_collections(
    w: &Writer<'_>,
    arena: &mut EntityArena,
    table: &Table,
    owners: &[Handle],
    fresh: bool,
) -> Result<()> {
    if owners.is_empty() {
        return Ok(());
    }
    let def = table.def();
    for cache in table.caches.collections(def) {
        let pending = cache.plan(arena, owners, fresh)?;
        if pending.delete_all.is_empty()
            && pending.delete_rows.is_empty()
            && pending.updates.is_empty()
            && pending.inserts.is_empty()
        {
            continue;
        }
        debug!(
            type_name = %def.type_name,
            field = %cache.field,
            deletes = pending.delete_all.len() + pending.delete_rows.len(),
            updates = pending.updates.len(),
            inserts = pending.inserts.len(),
            "Syncing collection"
        );
        cache.execute(w, arena, pending)?;
    }
    Ok(())
}
