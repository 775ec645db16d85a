//! Schema registry.
//!
//! Maps each entity type to its [`TableDef`] and owns the per-table
//! statement caches. Caches are built lazily on first use and live as long
//! as the registered layout: re-registering an identical layout keeps them,
//! registering a changed layout (or calling [`Schema::invalidate`]) drops
//! them.
//!
//! Layouts are identified by a SHA256 fingerprint of their canonical text,
//! in the same way synced records are fingerprinted for change detection.

pub mod column;
pub mod table;

pub use column::{Column, SqlType};
pub use table::{CollectionDef, FieldDef, MixinDef, TableDef};

use crate::error::{Error, Result};
use crate::sql::TableCaches;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Name of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(Cow<'static, str>);

impl TypeName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for TypeName {
    fn from(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

impl From<&TypeName> for TypeName {
    fn from(t: &TypeName) -> Self {
        t.clone()
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered table: its layout plus compiled statement caches.
#[derive(Debug)]
pub struct Table {
    def: TableDef,
    type_id: i64,
    fingerprint: String,
    pub(crate) caches: TableCaches,
}

impl Table {
    fn new(def: TableDef, type_id: i64, fingerprint: String) -> Self {
        Self {
            def,
            type_id,
            fingerprint,
            caches: TableCaches::default(),
        }
    }

    #[must_use]
    pub fn def(&self) -> &TableDef {
        &self.def
    }

    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.def.type_name
    }

    /// Discriminator stored in polymorphic type columns.
    #[must_use]
    pub const fn type_id(&self) -> i64 {
        self.type_id
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[derive(Debug, Default)]
struct Registry {
    tables: HashMap<TypeName, Arc<Table>>,
    order: Vec<TypeName>,
}

/// Registry of table layouts, shared by every save.
#[derive(Debug, Default)]
pub struct Schema {
    registry: RwLock<Registry>,
}

/// SHA256 of a layout's canonical text.
#[must_use]
pub fn fingerprint(def: &TableDef) -> String {
    let mut hasher = Sha256::new();
    hasher.update(def.canonical().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(self, def: TableDef) -> Self {
        self.register(def);
        self
    }

    /// Register (or re-register) a table layout.
    ///
    /// Type ids are assigned in registration order starting at 1 and never
    /// change for a type.
    pub fn register(&self, def: TableDef) -> Arc<Table> {
        let fingerprint = fingerprint(&def);
        let mut registry = self.registry.write();

        if let Some(existing) = registry.tables.get(&def.type_name) {
            if existing.fingerprint == fingerprint {
                return Arc::clone(existing);
            }
            info!(
                type_name = %def.type_name,
                "Table layout changed, dropping compiled statements"
            );
            let type_id = existing.type_id;
            let table = Arc::new(Table::new(def, type_id, fingerprint));
            registry
                .tables
                .insert(table.type_name().clone(), Arc::clone(&table));
            return table;
        }

        let type_id = i64::try_from(registry.order.len()).unwrap_or(i64::MAX - 1) + 1;
        let table = Arc::new(Table::new(def, type_id, fingerprint));
        registry.order.push(table.type_name().clone());
        registry
            .tables
            .insert(table.type_name().clone(), Arc::clone(&table));
        table
    }

    /// Look up a registered table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeNotRegistered`] for unknown types.
    pub fn table(&self, type_name: &TypeName) -> Result<Arc<Table>> {
        self.try_table(type_name)
            .ok_or_else(|| Error::TypeNotRegistered(type_name.clone()))
    }

    #[must_use]
    pub fn try_table(&self, type_name: &TypeName) -> Option<Arc<Table>> {
        self.registry.read().tables.get(type_name).cloned()
    }

    #[must_use]
    pub fn contains(&self, type_name: &TypeName) -> bool {
        self.registry.read().tables.contains_key(type_name)
    }

    #[must_use]
    pub fn type_id(&self, type_name: &TypeName) -> Option<i64> {
        self.registry.read().tables.get(type_name).map(|t| t.type_id)
    }

    /// Drop the compiled statements of one table.
    pub fn invalidate(&self, type_name: &TypeName) {
        let mut registry = self.registry.write();
        let Some(existing) = registry.tables.get(type_name) else {
            return;
        };
        let table = Arc::new(Table::new(
            existing.def.clone(),
            existing.type_id,
            existing.fingerprint.clone(),
        ));
        registry.tables.insert(type_name.clone(), table);
        info!(%type_name, "Invalidated compiled statements");
    }

    /// Registered tables in registration order.
    #[must_use]
    pub fn tables(&self) -> Vec<Arc<Table>> {
        let registry = self.registry.read();
        registry
            .order
            .iter()
            .filter_map(|name| registry.tables.get(name).cloned())
            .collect()
    }

    /// `CREATE TABLE` statements for every registered table.
    #[must_use]
    pub fn create_table_sql(&self) -> Vec<String> {
        let tables = self.tables();
        let table_names: HashMap<TypeName, String> = tables
            .iter()
            .map(|t| (t.type_name().clone(), t.def().table.clone()))
            .collect();
        tables
            .iter()
            .flat_map(|t| t.def().create_table_sql(|target| table_names.get(target).cloned()))
            .collect()
    }
}
