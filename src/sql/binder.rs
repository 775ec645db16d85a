//! Compiled parameter binders.
//!
//! A table's layout is compiled once into a chain of closures, one per
//! field, each pushing the parameters for its columns. Binding a row is
//! then a walk over that chain with no layout lookups.

use super::command::{Parameter, param};
use crate::error::{Error, Result};
use crate::graph::Forbidden;
use crate::model::{Entity, EntityArena, FieldValue, Reference, Value};
use crate::schema::{Column, FieldDef, Schema, TableDef, TypeName};

/// What a binder needs besides the value being bound.
pub(crate) struct BindEnv<'a> {
    pub arena: &'a EntityArena,
    pub schema: &'a Schema,
    /// Entities whose references must be written as NULL for now.
    pub forbidden: &'a Forbidden,
}

impl BindEnv<'_> {
    /// Resolve a reference to the `(type, id)` pair stored in the row.
    ///
    /// Returns `None` when the target is forbidden; the column is written
    /// as NULL and repaired later.
    fn resolve(&self, reference: &Reference, path: &str) -> Result<Option<(TypeName, i64)>> {
        let handle = reference.target();
        if let Some(h) = handle {
            if self.forbidden.contains(h) {
                return Ok(None);
            }
            let target = self
                .arena
                .get(h)
                .ok_or_else(|| Error::Other(format!("{path}: dangling reference {h}")))?;
            return match target.id() {
                Some(id) if !target.is_new() => Ok(Some((target.type_name().clone(), id))),
                _ => Err(Error::UnsavedReference {
                    from: path.to_string(),
                    to: self.arena.describe(h),
                }),
            };
        }
        match reference {
            Reference::Lite(lite) => match lite.id {
                Some(id) => Ok(Some((lite.type_name.clone(), id))),
                None => Err(Error::UnsavedReference {
                    from: path.to_string(),
                    to: lite.type_name.to_string(),
                }),
            },
            Reference::Entity(_) => Ok(None),
        }
    }

    fn resolve_field(
        &self,
        value: Option<&FieldValue>,
        path: &str,
    ) -> Result<Option<(TypeName, i64)>> {
        match value {
            None | Some(FieldValue::Reference(None)) => Ok(None),
            Some(FieldValue::Reference(Some(r))) => self.resolve(r, path),
            Some(_) => Err(mismatch(path, "a reference")),
        }
    }
}

/// Binds one field value (possibly absent) into parameters.
pub(crate) type FieldBinder =
    Box<dyn Fn(Option<&FieldValue>, &BindEnv<'_>, &str, &mut Vec<Parameter>) -> Result<()> + Send + Sync>;

/// Binds one entity row into parameters.
pub(crate) type RowBinder =
    Box<dyn Fn(&Entity, &BindEnv<'_>, &str, &mut Vec<Parameter>) -> Result<()> + Send + Sync>;

fn field_binder<F>(f: F) -> FieldBinder
where
    F: Fn(Option<&FieldValue>, &BindEnv<'_>, &str, &mut Vec<Parameter>) -> Result<()> + Send + Sync + 'static,
{
    Box::new(f)
}

fn row_binder<F>(f: F) -> RowBinder
where
    F: Fn(&Entity, &BindEnv<'_>, &str, &mut Vec<Parameter>) -> Result<()> + Send + Sync + 'static,
{
    Box::new(f)
}

fn mismatch(path: &str, expected: &str) -> Error {
    Error::Other(format!("{path}: expected {expected}"))
}

/// Compile a field definition, appending its column names to `columns` in
/// the order the binder pushes parameters.
pub(crate) fn compile_field(path: &str, def: &FieldDef, columns: &mut Vec<String>) -> FieldBinder {
    let path = path.to_string();
    match def {
        FieldDef::Value(column) => {
            let name = column.name.clone();
            columns.push(name.clone());
            field_binder(move |value, _env, sfx, out| {
                let v = match value {
                    None => Value::Null,
                    Some(FieldValue::Value(v)) => v.clone(),
                    Some(_) => return Err(mismatch(&path, "a scalar value")),
                };
                out.push(Parameter::new(param(&name, sfx), v));
                Ok(())
            })
        }
        FieldDef::Reference(column) => {
            let name = column.name.clone();
            columns.push(name.clone());
            field_binder(move |value, env, sfx, out| {
                let target = env.resolve_field(value, &path)?;
                out.push(Parameter::new(param(&name, sfx), target.map(|(_, id)| id)));
                Ok(())
            })
        }
        FieldDef::ImplementedBy(options) => {
            let options: Vec<(Option<TypeName>, String)> = options
                .iter()
                .map(|c: &Column| (c.foreign_key.clone(), c.name.clone()))
                .collect();
            columns.extend(options.iter().map(|(_, name)| name.clone()));
            field_binder(move |value, env, sfx, out| {
                let target = env.resolve_field(value, &path)?;
                if let Some((type_name, _)) = &target {
                    if !options.iter().any(|(t, _)| t.as_ref() == Some(type_name)) {
                        return Err(Error::Validation(format!(
                            "{path}: type {type_name} is not one of the implementations"
                        )));
                    }
                }
                for (type_name, name) in &options {
                    let id = target
                        .as_ref()
                        .filter(|(t, _)| Some(t) == type_name.as_ref())
                        .map(|(_, id)| *id);
                    out.push(Parameter::new(param(name, sfx), id));
                }
                Ok(())
            })
        }
        FieldDef::ImplementedByAll { id, type_column } => {
            let id_name = id.name.clone();
            let type_name_column = type_column.name.clone();
            columns.push(id_name.clone());
            columns.push(type_name_column.clone());
            field_binder(move |value, env, sfx, out| {
                let target = env.resolve_field(value, &path)?;
                let (id, type_id) = match target {
                    Some((t, id)) => {
                        let type_id = env
                            .schema
                            .type_id(&t)
                            .ok_or(Error::TypeNotRegistered(t))?;
                        (Some(id), Some(type_id))
                    }
                    None => (None, None),
                };
                out.push(Parameter::new(param(&id_name, sfx), id));
                out.push(Parameter::new(param(&type_name_column, sfx), type_id));
                Ok(())
            })
        }
        FieldDef::Embedded { has_value, fields } => {
            let has_value = has_value.as_ref().map(|c| c.name.clone());
            columns.extend(has_value.clone());
            let children: Vec<(String, FieldBinder)> = fields
                .iter()
                .map(|(name, def)| {
                    let binder = compile_field(&format!("{path}.{name}"), def, columns);
                    (name.clone(), binder)
                })
                .collect();
            field_binder(move |value, env, sfx, out| {
                let embedded = match value {
                    None | Some(FieldValue::Embedded(None)) => None,
                    Some(FieldValue::Embedded(Some(e))) => Some(e),
                    Some(_) => return Err(mismatch(&path, "an embedded value")),
                };
                match &has_value {
                    Some(name) => out.push(Parameter::new(param(name, sfx), embedded.is_some())),
                    None if embedded.is_none() => {
                        return Err(Error::Validation(format!(
                            "{path} is a non-nullable embedded value and cannot be null"
                        )));
                    }
                    None => {}
                }
                for (name, binder) in &children {
                    binder(embedded.and_then(|e| e.get(name)), env, sfx, out)?;
                }
                Ok(())
            })
        }
    }
}

/// Compile the main-table row of `def`.
///
/// Column order is primary key (when `with_primary_key`), display text,
/// fields, mixins and finally the version column.
pub(crate) fn compile_row(def: &TableDef, with_primary_key: bool, columns: &mut Vec<String>) -> RowBinder {
    let mut parts: Vec<RowBinder> = Vec::new();

    if with_primary_key {
        let name = def.primary_key.name.clone();
        columns.push(name.clone());
        parts.push(row_binder(move |entity, _env, sfx, out| {
            out.push(Parameter::new(param(&name, sfx), entity.id()));
            Ok(())
        }));
    }

    if let Some(column) = &def.to_str {
        let name = column.name.clone();
        let size = column.size;
        columns.push(name.clone());
        parts.push(row_binder(move |entity, _env, sfx, out| {
            let text = entity.to_str().map(|s| match size {
                Some(size) => s.chars().take(size).collect::<String>(),
                None => s.to_string(),
            });
            out.push(Parameter::new(param(&name, sfx), text));
            Ok(())
        }));
    }

    for (field, field_def) in &def.fields {
        let binder = compile_field(&format!("{}.{field}", def.type_name), field_def, columns);
        let field = field.clone();
        parts.push(row_binder(move |entity, env, sfx, out| {
            binder(entity.get(&field), env, sfx, out)
        }));
    }

    for mixin in &def.mixins {
        for (field, field_def) in &mixin.fields {
            let path = format!("{}[{}].{field}", def.type_name, mixin.name);
            let binder = compile_field(&path, field_def, columns);
            let mixin = mixin.name.clone();
            let field = field.clone();
            parts.push(row_binder(move |entity, env, sfx, out| {
                binder(entity.mixin(&mixin).and_then(|m| m.get(&field)), env, sfx, out)
            }));
        }
    }

    if let Some(column) = &def.version {
        let name = column.name.clone();
        columns.push(name.clone());
        parts.push(row_binder(move |entity, _env, sfx, out| {
            out.push(Parameter::new(param(&name, sfx), entity.version()));
            Ok(())
        }));
    }

    row_binder(move |entity, env, sfx, out| {
        for part in &parts {
            part(entity, env, sfx, out)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Embedded, Lite};
    use crate::schema::SqlType;

    fn bind(def: &TableDef, arena: &EntityArena, entity: &Entity, forbidden: &Forbidden) -> Result<Vec<Parameter>> {
        let schema = Schema::new().with(def.clone());
        let mut columns = Vec::new();
        let binder = compile_row(def, false, &mut columns);
        let env = BindEnv {
            arena,
            schema: &schema,
            forbidden,
        };
        let mut out = Vec::new();
        binder(entity, &env, "_0", &mut out)?;
        assert_eq!(out.len(), columns.len());
        Ok(out)
    }

    #[test]
    fn test_row_binding_order_and_truncation() {
        let def = TableDef::new("Note", "notes")
            .to_str(3)
            .versioned()
            .field("body", FieldDef::value("body", SqlType::Text));
        let mut entity = Entity::new("Note").with("body", "hello");
        entity.set_to_str("abcdef");
        entity.version = Some(1);

        let params = bind(&def, &EntityArena::new(), &entity, &Forbidden::default()).unwrap();
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec![":to_str_0", ":body_0", ":version_0"]);
        assert_eq!(params[0].value, Value::from("abc"));
        assert_eq!(params[2].value, Value::Integer(1));
    }

    #[test]
    fn test_forbidden_reference_binds_null() {
        let def = TableDef::new("Node", "nodes").field("next", FieldDef::reference("next_id", "Node").nullable());
        let mut arena = EntityArena::new();
        let target = arena.add(Entity::new("Node"));
        let entity = Entity::new("Node").with("next", target);

        let forbidden = Forbidden::from_iter([target]);
        let params = bind(&def, &arena, &entity, &forbidden).unwrap();
        assert_eq!(params[0].value, Value::Null);

        let err = bind(&def, &arena, &entity, &Forbidden::default()).unwrap_err();
        assert!(matches!(err, Error::UnsavedReference { .. }));
    }

    #[test]
    fn test_implemented_by_fills_one_column() {
        let def = TableDef::new("Payment", "payments").field(
            "payer",
            FieldDef::ImplementedBy(vec![
                Column::reference("payer_person_id", "Person").nullable(),
                Column::reference("payer_company_id", "Company").nullable(),
            ]),
        );
        let entity = Entity::new("Payment").with("payer", Lite::new("Company", 7));

        let params = bind(&def, &EntityArena::new(), &entity, &Forbidden::default()).unwrap();
        assert_eq!(params[0].value, Value::Null);
        assert_eq!(params[1].value, Value::Integer(7));
    }

    #[test]
    fn test_nullable_embedded_writes_has_value() {
        let def = TableDef::new("Person", "people").field(
            "address",
            FieldDef::embedded(vec![("city", FieldDef::value("city", SqlType::Text))]).nullable(),
        );
        let empty = Entity::new("Person");
        let params = bind(&def, &EntityArena::new(), &empty, &Forbidden::default()).unwrap();
        assert_eq!(params[0].name, ":address_has_value_0");
        assert_eq!(params[0].value, Value::Bool(false));
        assert_eq!(params[1].value, Value::Null);

        let full = Entity::new("Person").with("address", Embedded::new().with("city", "Oslo"));
        let params = bind(&def, &EntityArena::new(), &full, &Forbidden::default()).unwrap();
        assert_eq!(params[0].value, Value::Bool(true));
        assert_eq!(params[1].value, Value::from("Oslo"));
    }

    #[test]
    fn test_non_nullable_embedded_rejects_null() {
        let def = TableDef::new("Person", "people").field(
            "address",
            FieldDef::embedded(vec![("city", FieldDef::value("city", SqlType::Text))]),
        );
        let err = bind(&def, &EntityArena::new(), &Entity::new("Person"), &Forbidden::default()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
