//! Column metadata.

use super::TypeName;
use serde::{Deserialize, Serialize};

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
}

impl SqlType {
    /// SQL type name used in DDL.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

/// One physical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub size: Option<usize>,
    pub foreign_key: Option<TypeName>,
    pub is_version: bool,
    pub is_primary_key: bool,
}

impl Column {
    /// A non-nullable column.
    #[must_use]
    pub fn new(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            nullable: false,
            size: None,
            foreign_key: None,
            is_version: false,
            is_primary_key: false,
        }
    }

    /// A non-nullable integer column holding the id of `target`.
    #[must_use]
    pub fn reference(name: &str, target: impl Into<TypeName>) -> Self {
        Self {
            foreign_key: Some(target.into()),
            ..Self::new(name, SqlType::Integer)
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) fn primary_key(name: &str) -> Self {
        Self {
            is_primary_key: true,
            ..Self::new(name, SqlType::Integer)
        }
    }

    pub(crate) fn version(name: &str) -> Self {
        Self {
            is_version: true,
            ..Self::new(name, SqlType::Integer)
        }
    }

    /// Column definition for `CREATE TABLE`; `relaxed` drops `NOT NULL`.
    #[must_use]
    pub fn ddl(&self, relaxed: bool) -> String {
        let mut sql = format!("\"{}\" {}", self.name, self.sql_type.as_sql());
        if self.is_primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable && !relaxed {
            sql.push_str(" NOT NULL");
        }
        sql
    }

    /// Canonical text used for schema fingerprints.
    pub(crate) fn canonical(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.name,
            self.sql_type.as_sql(),
            self.nullable,
            self.size.map_or_else(String::new, |s| s.to_string()),
            self.foreign_key.as_ref().map_or("", |t| t.as_str()),
            self.is_version,
            self.is_primary_key
        )
    }
}
