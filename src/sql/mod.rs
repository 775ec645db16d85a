//! Statement caches and batched execution.
//!
//! Every registered table lazily compiles, on first use:
//! - an insert cache (server-generated or caller-assigned ids)
//! - an update cache guarded by the version column, if any
//! - one sync cache per child collection
//!
//! Each cache holds one compiled binder and a map from batch size to the
//! SQL text for that many rows, built once per size.

mod binder;
mod collection;
mod command;
mod insert;
mod update;

pub use command::{Parameter, SqlCommand};

pub(crate) use collection::sync_collections;
pub(crate) use command::quote;
pub(crate) use insert::insert_many;
pub(crate) use update::update_many;

use crate::config::SaveSettings;
use crate::driver::Driver;
use crate::graph::FeedbackEdges;
use crate::schema::{Schema, Table, TableDef};
use collection::CollectionCache;
use insert::InsertCache;
use std::fmt;
use std::sync::{Arc, OnceLock};
use update::UpdateCache;

/// Per-table compiled caches.
#[derive(Default)]
pub(crate) struct TableCaches {
    insert: OnceLock<InsertCache>,
    update: OnceLock<UpdateCache>,
    collections: OnceLock<Vec<CollectionCache>>,
}

impl fmt::Debug for TableCaches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCaches")
            .field("insert", &self.insert.get().is_some())
            .field("update", &self.update.get().is_some())
            .field("collections", &self.collections.get().map(Vec::len))
            .finish()
    }
}

impl TableCaches {
    pub(crate) fn insert(&self, def: &TableDef) -> &InsertCache {
        self.insert.get_or_init(|| InsertCache::compile(def))
    }

    pub(crate) fn update(&self, def: &TableDef) -> &UpdateCache {
        self.update.get_or_init(|| UpdateCache::compile(def))
    }

    pub(crate) fn collections(&self, def: &TableDef) -> &[CollectionCache] {
        self.collections
            .get_or_init(|| def.collections.iter().map(|c| CollectionCache::compile(def, c)).collect())
    }
}

/// Everything the batch writers share during one save call.
pub(crate) struct Writer<'a> {
    pub driver: &'a dyn Driver,
    pub schema: &'a Schema,
    pub settings: &'a SaveSettings,
    pub feedback: &'a FeedbackEdges,
}

/// Inspection of compiled statements, for tooling and tests.
impl Table {
    /// INSERT text for a batch of `rows` rows.
    #[must_use]
    pub fn insert_sql(&self, rows: usize) -> Arc<str> {
        self.caches.insert(self.def()).executor(rows).sql()
    }

    /// UPDATE text for a batch of `rows` rows, if the table has columns to set.
    #[must_use]
    pub fn update_sql(&self, rows: usize) -> Option<Arc<str>> {
        self.caches.update(self.def()).executor(rows).map(|e| e.sql())
    }

    /// Statements of collection `field` for batches of `rows` rows:
    /// insert, delete-all, delete of removed rows and (if rows can change in place)
    /// update.
    #[must_use]
    pub fn collection_sql(&self, field: &str, rows: usize) -> Option<Vec<Arc<str>>> {
        self.caches
            .collections(self.def())
            .iter()
            .find(|c| c.field() == field)
            .map(|c| c.statements(rows))
    }

    /// Batch sizes with a compiled insert statement, sorted.
    #[must_use]
    pub fn compiled_insert_sizes(&self) -> Vec<usize> {
        self.caches.insert(self.def()).compiled_sizes()
    }

    /// Batch sizes with a compiled update statement, sorted.
    #[must_use]
    pub fn compiled_update_sizes(&self) -> Vec<usize> {
        self.caches.update(self.def()).compiled_sizes()
    }
}
