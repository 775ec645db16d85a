//! Table layout: fields, mixins and child collections.

use super::TypeName;
use super::column::{Column, SqlType};

/// How one entity field maps onto columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldDef {
    /// A scalar column.
    Value(Column),
    /// A foreign key to one entity type.
    Reference(Column),
    /// A polymorphic reference over a closed set of types: one column per
    /// type, at most one of them non-null.
    ImplementedBy(Vec<Column>),
    /// A polymorphic reference over any registered type: an id column plus
    /// a type-id discriminator.
    ImplementedByAll { id: Column, type_column: Column },
    /// A value object flattened into the owner's row. A `has_value`
    /// column makes the embedded value nullable.
    Embedded {
        has_value: Option<Column>,
        fields: Vec<(String, FieldDef)>,
    },
}

impl FieldDef {
    #[must_use]
    pub fn value(name: &str, sql_type: SqlType) -> Self {
        Self::Value(Column::new(name, sql_type))
    }

    #[must_use]
    pub fn reference(name: &str, target: impl Into<TypeName>) -> Self {
        Self::Reference(Column::reference(name, target))
    }

    /// A non-nullable embedded value.
    #[must_use]
    pub fn embedded(fields: Vec<(&str, FieldDef)>) -> Self {
        Self::Embedded {
            has_value: None,
            fields: fields
                .into_iter()
                .map(|(name, def)| (name.to_string(), def))
                .collect(),
        }
    }

    /// Mark every column of this field nullable. On an embedded value this
    /// adds a `has_value` column named `<name>_has_value`.
    #[must_use]
    pub fn nullable(self) -> Self {
        match self {
            Self::Value(c) => Self::Value(c.nullable()),
            Self::Reference(c) => Self::Reference(c.nullable()),
            Self::ImplementedBy(cols) => {
                Self::ImplementedBy(cols.into_iter().map(Column::nullable).collect())
            }
            Self::ImplementedByAll { id, type_column } => Self::ImplementedByAll {
                id: id.nullable(),
                type_column: type_column.nullable(),
            },
            Self::Embedded { has_value, fields } => Self::Embedded {
                has_value: has_value.or_else(|| Some(Column::new("has_value", SqlType::Boolean))),
                fields,
            },
        }
    }

    /// Size limit for a text value column.
    #[must_use]
    pub fn size(self, size: usize) -> Self {
        match self {
            Self::Value(c) => Self::Value(c.size(size)),
            other => other,
        }
    }

    /// Physical columns in binding order.
    #[must_use]
    pub fn columns(&self) -> Vec<&Column> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a Column>) {
        match self {
            Self::Value(c) | Self::Reference(c) => out.push(c),
            Self::ImplementedBy(cols) => out.extend(cols),
            Self::ImplementedByAll { id, type_column } => {
                out.push(id);
                out.push(type_column);
            }
            Self::Embedded { has_value, fields } => {
                out.extend(has_value);
                for (_, def) in fields {
                    def.collect_columns(out);
                }
            }
        }
    }

    /// Columns with the nullability used in DDL: everything inside a
    /// nullable embedded value must accept NULL.
    fn ddl_columns<'a>(&'a self, relaxed: bool, out: &mut Vec<(&'a Column, bool)>) {
        match self {
            Self::Embedded { has_value, fields } => {
                out.extend(has_value.iter().map(|c| (c, relaxed)));
                let relaxed = relaxed || has_value.is_some();
                for (_, def) in fields {
                    def.ddl_columns(relaxed, out);
                }
            }
            other => out.extend(other.columns().into_iter().map(|c| (c, relaxed))),
        }
    }

    /// Give embedded `has_value` columns their final, prefixed name.
    fn qualify(self, field: &str) -> Self {
        match self {
            Self::Embedded { has_value, fields } => Self::Embedded {
                has_value: has_value.map(|mut c| {
                    if c.name == "has_value" {
                        c.name = format!("{field}_has_value");
                    }
                    c
                }),
                fields: fields
                    .into_iter()
                    .map(|(name, def)| {
                        let def = def.qualify(&format!("{field}_{name}"));
                        (name, def)
                    })
                    .collect(),
            },
            other => other,
        }
    }
}

/// Columns contributed by a mixin, stored in the main row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixinDef {
    pub name: String,
    pub fields: Vec<(String, FieldDef)>,
}

impl MixinDef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, name: &str, def: FieldDef) -> Self {
        let def = def.qualify(name);
        self.fields.push((name.to_string(), def));
        self
    }
}

/// A child collection stored in its own table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDef {
    /// Entity field holding the collection.
    pub field: String,
    pub table: String,
    pub primary_key: Column,
    /// Column pointing back at the owner row.
    pub back_reference: Column,
    /// Position column, when element order is persisted.
    pub order: Option<Column>,
    pub element: FieldDef,
}

impl CollectionDef {
    #[must_use]
    pub fn new(field: &str, table: &str, back_reference: &str, element: FieldDef) -> Self {
        Self {
            field: field.to_string(),
            table: table.to_string(),
            primary_key: Column::primary_key("id"),
            back_reference: Column::new(back_reference, SqlType::Integer),
            order: None,
            element: element.qualify(field),
        }
    }

    /// Persist element positions in `column`.
    #[must_use]
    pub fn ordered(mut self, column: &str) -> Self {
        self.order = Some(Column::new(column, SqlType::Integer));
        self
    }

    /// Whether existing rows can need an UPDATE (reordering or an embedded
    /// element changed in place).
    #[must_use]
    pub fn has_updatable_rows(&self) -> bool {
        self.order.is_some() || matches!(self.element, FieldDef::Embedded { .. })
    }

    #[must_use]
    pub fn columns(&self) -> Vec<&Column> {
        let mut out = vec![&self.primary_key, &self.back_reference];
        out.extend(&self.order);
        out.extend(self.element.columns());
        out
    }

    /// `CREATE TABLE` statement; `owner_table` receives the back reference.
    #[must_use]
    pub fn create_table_sql(&self, owner_table: &str, owner_key: &str) -> String {
        let mut columns = vec![(&self.primary_key, false), (&self.back_reference, false)];
        columns.extend(self.order.iter().map(|c| (c, false)));
        self.element.ddl_columns(false, &mut columns);
        let mut lines: Vec<String> = columns.iter().map(|(c, relaxed)| c.ddl(*relaxed)).collect();
        lines.push(format!(
            "FOREIGN KEY (\"{}\") REFERENCES \"{owner_table}\"(\"{owner_key}\") ON DELETE CASCADE",
            self.back_reference.name
        ));
        format!("CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)", self.table, lines.join(",\n    "))
    }
}

/// Layout of one entity type's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub type_name: TypeName,
    pub table: String,
    pub primary_key: Column,
    /// Ids are generated by the database on insert.
    pub identity: bool,
    pub version: Option<Column>,
    pub to_str: Option<Column>,
    pub fields: Vec<(String, FieldDef)>,
    pub mixins: Vec<MixinDef>,
    pub collections: Vec<CollectionDef>,
}

impl TableDef {
    /// A table with a database-generated `id` primary key.
    #[must_use]
    pub fn new(type_name: impl Into<TypeName>, table: &str) -> Self {
        Self {
            type_name: type_name.into(),
            table: table.to_string(),
            primary_key: Column::primary_key("id"),
            identity: true,
            version: None,
            to_str: None,
            fields: Vec::new(),
            mixins: Vec::new(),
            collections: Vec::new(),
        }
    }

    /// Ids are supplied by the caller instead of the database.
    #[must_use]
    pub fn caller_assigned_ids(mut self) -> Self {
        self.identity = false;
        self
    }

    /// Add an optimistic-concurrency version column named `version`.
    #[must_use]
    pub fn versioned(self) -> Self {
        self.version_column("version")
    }

    #[must_use]
    pub fn version_column(mut self, name: &str) -> Self {
        self.version = Some(Column::version(name));
        self
    }

    /// Store the entity's display text in a `to_str` column of at most `size` chars.
    #[must_use]
    pub fn to_str(mut self, size: usize) -> Self {
        self.to_str = Some(Column::new("to_str", SqlType::Text).nullable().size(size));
        self
    }

    #[must_use]
    pub fn field(mut self, name: &str, def: FieldDef) -> Self {
        let def = def.qualify(name);
        self.fields.push((name.to_string(), def));
        self
    }

    #[must_use]
    pub fn mixin(mut self, mixin: MixinDef) -> Self {
        self.mixins.push(mixin);
        self
    }

    #[must_use]
    pub fn collection(mut self, collection: CollectionDef) -> Self {
        self.collections.push(collection);
        self
    }

    #[must_use]
    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    #[must_use]
    pub fn mixin_def(&self, name: &str) -> Option<&MixinDef> {
        self.mixins.iter().find(|m| m.name == name)
    }

    #[must_use]
    pub fn collection_def(&self, field: &str) -> Option<&CollectionDef> {
        self.collections.iter().find(|c| c.field == field)
    }

    /// Main-table columns: primary key, display text, fields, mixins, version.
    #[must_use]
    pub fn columns(&self) -> Vec<&Column> {
        let mut out = vec![&self.primary_key];
        out.extend(&self.to_str);
        for (_, def) in &self.fields {
            out.extend(def.columns());
        }
        for mixin in &self.mixins {
            for (_, def) in &mixin.fields {
                out.extend(def.columns());
            }
        }
        out.extend(&self.version);
        out
    }

    /// `CREATE TABLE` statements for the main table and its collections.
    ///
    /// Foreign keys point at `id` of the referenced type's table, resolved
    /// through `table_of`.
    pub fn create_table_sql(&self, table_of: impl Fn(&TypeName) -> Option<String>) -> Vec<String> {
        let mut columns = vec![(&self.primary_key, false)];
        columns.extend(self.to_str.iter().map(|c| (c, false)));
        for (_, def) in &self.fields {
            def.ddl_columns(false, &mut columns);
        }
        for mixin in &self.mixins {
            for (_, def) in &mixin.fields {
                def.ddl_columns(false, &mut columns);
            }
        }
        columns.extend(self.version.iter().map(|c| (c, false)));

        let mut lines: Vec<String> = Vec::new();
        let mut keys: Vec<String> = Vec::new();
        for (column, relaxed) in columns {
            lines.push(column.ddl(relaxed));
            if let Some(target) = column.foreign_key.as_ref().and_then(&table_of) {
                keys.push(format!(
                    "FOREIGN KEY (\"{}\") REFERENCES \"{target}\"(\"id\")",
                    column.name
                ));
            }
        }
        lines.extend(keys);
        let mut out = vec![format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
            self.table,
            lines.join(",\n    ")
        )];
        for collection in &self.collections {
            out.push(collection.create_table_sql(&self.table, &self.primary_key.name));
        }
        out
    }

    /// Canonical text of the whole layout, hashed into the schema fingerprint.
    pub(crate) fn canonical(&self) -> String {
        let mut text = format!("{}|{}|{}\n", self.type_name, self.table, self.identity);
        for column in self.columns() {
            text.push_str(&column.canonical());
            text.push('\n');
        }
        for collection in &self.collections {
            text.push_str(&format!("[{}:{}]\n", collection.field, collection.table));
            for column in collection.columns() {
                text.push_str(&column.canonical());
                text.push('\n');
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album() -> TableDef {
        TableDef::new("Album", "albums")
            .versioned()
            .to_str(40)
            .field("title", FieldDef::value("title", SqlType::Text).size(100))
            .field("artist", FieldDef::reference("artist_id", "Artist"))
            .field(
                "cover",
                FieldDef::embedded(vec![
                    ("url", FieldDef::value("cover_url", SqlType::Text)),
                    ("width", FieldDef::value("cover_width", SqlType::Integer)),
                ])
                .nullable(),
            )
            .collection(
                CollectionDef::new("songs", "album_songs", "album_id", FieldDef::value("name", SqlType::Text))
                    .ordered("position"),
            )
    }

    #[test]
    fn test_columns_in_binding_order() {
        let album = album();
        let names: Vec<&str> = album.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "id",
                "to_str",
                "title",
                "artist_id",
                "cover_has_value",
                "cover_url",
                "cover_width",
                "version"
            ]
        );
    }

    #[test]
    fn test_create_table_sql_has_foreign_keys() {
        let sql = album().create_table_sql(|t| (t.as_str() == "Artist").then(|| "artists".to_string()));
        assert_eq!(sql.len(), 2);
        assert!(sql[0].contains("FOREIGN KEY (\"artist_id\") REFERENCES \"artists\"(\"id\")"));
        assert!(sql[1].contains("\"position\" INTEGER NOT NULL"));
        assert!(sql[1].contains("REFERENCES \"albums\"(\"id\") ON DELETE CASCADE"));
        // inner columns of a nullable embedded value accept NULL
        assert!(sql[0].contains("\"cover_url\" TEXT,"));
    }

    #[test]
    fn test_collection_updatable_rows() {
        let def = album();
        assert!(def.collection_def("songs").unwrap().has_updatable_rows());
        let plain = CollectionDef::new("tags", "tags", "owner_id", FieldDef::value("tag", SqlType::Text));
        assert!(!plain.has_updatable_rows());
    }
}
