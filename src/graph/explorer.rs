//! Graph exploration and integrity checks.
//!
//! [`GraphExplorer`] is the seam between the save loop and whatever knows
//! the entity model. [`SchemaExplorer`] implements it on top of the
//! [`Schema`] registry.

use super::dependency::DependencyGraph;
use crate::error::{Error, Result};
use crate::model::{EntityArena, FieldValue, Handle, ModifiedState, Reference, Value};
use crate::schema::{FieldDef, Schema, TableDef, TypeName};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Every entity reachable from the roots of one save call.
#[derive(Debug, Clone, Default)]
pub struct ModifiableGraph {
    nodes: Vec<Handle>,
    roots: BTreeSet<Handle>,
}

impl ModifiableGraph {
    /// Reachable entities in handle order.
    #[must_use]
    pub fn nodes(&self) -> &[Handle] {
        &self.nodes
    }

    #[must_use]
    pub fn is_root(&self, handle: Handle) -> bool {
        self.roots.contains(&handle)
    }
}

/// Builds and maintains the graph a save call works on.
pub trait GraphExplorer {
    /// Collect everything reachable from `roots`.
    ///
    /// # Errors
    ///
    /// Returns an error if a root or a reference points outside the arena.
    fn extract_modified_graph(&self, arena: &EntityArena, roots: &[Handle]) -> Result<ModifiableGraph>;

    /// Integrity text for the graph, or `None` when everything is valid.
    fn validate(&self, arena: &EntityArena, graph: &ModifiableGraph) -> Option<String>;

    /// Mark entities whose owned values changed as `GraphModified`.
    fn propagate_modifications(&self, arena: &mut EntityArena, graph: &ModifiableGraph);

    /// Units that need writing, with an edge to every new unit they reference.
    fn collapse_to_persistent_units(&self, arena: &EntityArena, graph: &ModifiableGraph) -> DependencyGraph;

    /// Reset change tracking after a successful save.
    fn mark_clean(&self, arena: &mut EntityArena, graph: &ModifiableGraph);
}

/// Explorer driven by table layouts.
pub struct SchemaExplorer<'s> {
    schema: &'s Schema,
}

impl<'s> SchemaExplorer<'s> {
    #[must_use]
    pub const fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    fn needs_check(arena: &EntityArena, handle: Handle) -> bool {
        let e = &arena[handle];
        e.is_new() || e.modified().is_modified() || e.seal_violation() || e.has_modified_children()
    }

    fn reference_type(arena: &EntityArena, reference: &Reference) -> Option<TypeName> {
        match reference {
            Reference::Entity(h) => arena.get(*h).map(|e| e.type_name().clone()),
            Reference::Lite(lite) => Some(lite.type_name.clone()),
        }
    }

    fn check_entity(&self, arena: &EntityArena, handle: Handle, def: &TableDef, out: &mut Vec<String>) {
        let entity = &arena[handle];
        let who = arena.describe(handle);

        if entity.seal_violation() {
            out.push(format!("{who} is sealed and cannot be modified"));
        }
        if def.version.is_some() && !entity.is_new() && entity.version().is_none() {
            out.push(format!("{who} has no version to check against"));
        }

        for name in entity.fields.keys() {
            if def.field_def(name).is_none() {
                out.push(format!("{who}.{name} is not a field of {}", def.type_name));
            }
        }
        for (name, field_def) in &def.fields {
            self.check_field(arena, &format!("{who}.{name}"), field_def, entity.get(name), out);
        }

        for name in entity.mixins.keys() {
            if def.mixin_def(name).is_none() {
                out.push(format!("{who}[{name}] is not a mixin of {}", def.type_name));
            }
        }
        for mixin in &def.mixins {
            let values = entity.mixin(&mixin.name);
            for (name, field_def) in &mixin.fields {
                let path = format!("{who}[{}].{name}", mixin.name);
                self.check_field(arena, &path, field_def, values.and_then(|m| m.get(name)), out);
            }
        }

        for (name, collection) in &entity.collections {
            let Some(collection_def) = def.collection_def(name) else {
                out.push(format!("{who}.{name} is not a collection of {}", def.type_name));
                continue;
            };
            for (i, row) in collection.rows().iter().enumerate() {
                let path = format!("{who}.{name}[{i}]");
                self.check_field(arena, &path, &collection_def.element, Some(&row.value), out);
            }
        }
    }

    fn check_field(
        &self,
        arena: &EntityArena,
        path: &str,
        def: &FieldDef,
        value: Option<&FieldValue>,
        out: &mut Vec<String>,
    ) {
        match def {
            FieldDef::Value(column) => match value {
                None | Some(FieldValue::Value(Value::Null)) => {
                    if !column.nullable {
                        out.push(format!("{path} cannot be null"));
                    }
                }
                Some(FieldValue::Value(v)) => {
                    if !v.conforms_to(column.sql_type) {
                        out.push(format!("{path}: {} is not a valid {}", v.to_sql_literal(), column.sql_type.as_sql()));
                    }
                    if let (Some(size), Some(text)) = (column.size, v.as_str()) {
                        if text.chars().count() > size {
                            out.push(format!("{path} is longer than {size} characters"));
                        }
                    }
                }
                Some(_) => out.push(format!("{path} expects a scalar value")),
            },
            FieldDef::Reference(_) | FieldDef::ImplementedBy(_) | FieldDef::ImplementedByAll { .. } => {
                let reference = match value {
                    None | Some(FieldValue::Reference(None)) => None,
                    Some(FieldValue::Reference(Some(r))) => Some(r),
                    Some(_) => {
                        out.push(format!("{path} expects a reference"));
                        return;
                    }
                };
                self.check_reference(arena, path, def, reference, out);
            }
            FieldDef::Embedded { has_value, fields } => match value {
                None | Some(FieldValue::Embedded(None)) => {
                    if has_value.is_none() {
                        out.push(format!("{path} cannot be null"));
                    }
                }
                Some(FieldValue::Embedded(Some(embedded))) => {
                    for (name, field_def) in fields {
                        self.check_field(arena, &format!("{path}.{name}"), field_def, embedded.get(name), out);
                    }
                }
                Some(_) => out.push(format!("{path} expects an embedded value")),
            },
        }
    }

    fn check_reference(
        &self,
        arena: &EntityArena,
        path: &str,
        def: &FieldDef,
        reference: Option<&Reference>,
        out: &mut Vec<String>,
    ) {
        let Some(reference) = reference else {
            let nullable = match def {
                FieldDef::Reference(column) | FieldDef::ImplementedByAll { id: column, .. } => column.nullable,
                FieldDef::ImplementedBy(columns) => columns.iter().all(|c| c.nullable),
                _ => true,
            };
            if !nullable {
                out.push(format!("{path} cannot be null"));
            }
            return;
        };

        let Some(target) = Self::reference_type(arena, reference) else {
            out.push(format!("{path} points outside the graph"));
            return;
        };
        if !self.schema.contains(&target) {
            out.push(format!("{path} references {target}, which is not registered"));
            return;
        }
        match def {
            FieldDef::Reference(column) => {
                if column.foreign_key.as_ref() != Some(&target) {
                    let expected = column.foreign_key.as_ref().map_or("?", TypeName::as_str);
                    out.push(format!("{path} references {target}, expected {expected}"));
                }
            }
            FieldDef::ImplementedBy(columns) => {
                if !columns.iter().any(|c| c.foreign_key.as_ref() == Some(&target)) {
                    out.push(format!("{path}: {target} is not one of the allowed implementations"));
                }
            }
            _ => {}
        }
    }

    /// References held by `def`/`value` as `(target, nullable)`.
    fn field_references(
        arena: &EntityArena,
        def: &FieldDef,
        value: Option<&FieldValue>,
        deferrable: bool,
        out: &mut Vec<(Handle, bool)>,
    ) {
        let target = value.and_then(FieldValue::as_reference).and_then(Reference::target);
        match def {
            FieldDef::Value(_) => {}
            FieldDef::Reference(column) | FieldDef::ImplementedByAll { id: column, .. } => {
                out.extend(target.map(|h| (h, deferrable || column.nullable)));
            }
            FieldDef::ImplementedBy(columns) => {
                if let Some(h) = target {
                    let target_type = arena.get(h).map(|e| e.type_name().clone());
                    let nullable = columns
                        .iter()
                        .find(|c| c.foreign_key == target_type)
                        .is_none_or(|c| c.nullable);
                    out.push((h, deferrable || nullable));
                }
            }
            FieldDef::Embedded { fields, .. } => {
                if let Some(embedded) = value.and_then(FieldValue::as_embedded) {
                    for (name, field_def) in fields {
                        Self::field_references(arena, field_def, embedded.get(name), deferrable, out);
                    }
                }
            }
        }
    }

    /// Every in-memory reference of a unit, with the nullability of the
    /// column holding it. Collection rows are always deferrable.
    fn unit_references(arena: &EntityArena, handle: Handle, def: &TableDef) -> Vec<(Handle, bool)> {
        let entity = &arena[handle];
        let mut out = Vec::new();
        for (name, field_def) in &def.fields {
            Self::field_references(arena, field_def, entity.get(name), false, &mut out);
        }
        for mixin in &def.mixins {
            let values = entity.mixin(&mixin.name);
            for (name, field_def) in &mixin.fields {
                Self::field_references(arena, field_def, values.and_then(|m| m.get(name)), false, &mut out);
            }
        }
        for collection_def in &def.collections {
            if let Some(collection) = entity.collection(&collection_def.field) {
                for row in collection.rows() {
                    Self::field_references(arena, &collection_def.element, Some(&row.value), true, &mut out);
                }
            }
        }
        out
    }
}

impl GraphExplorer for SchemaExplorer<'_> {
    fn extract_modified_graph(&self, arena: &EntityArena, roots: &[Handle]) -> Result<ModifiableGraph> {
        let mut seen: BTreeSet<Handle> = BTreeSet::new();
        let mut queue: VecDeque<Handle> = VecDeque::new();
        for &root in roots {
            if arena.get(root).is_none() {
                return Err(Error::Other(format!("root {root} is not in the arena")));
            }
            if seen.insert(root) {
                queue.push_back(root);
            }
        }

        while let Some(handle) = queue.pop_front() {
            let mut targets = Vec::new();
            arena[handle].visit_references(&mut |r| targets.extend(r.target()));
            for target in targets {
                if arena.get(target).is_none() {
                    return Err(Error::Other(format!(
                        "{} references {target}, which is not in the arena",
                        arena.describe(handle)
                    )));
                }
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        Ok(ModifiableGraph {
            nodes: seen.into_iter().collect(),
            roots: roots.iter().copied().collect(),
        })
    }

    fn validate(&self, arena: &EntityArena, graph: &ModifiableGraph) -> Option<String> {
        let mut errors = Vec::new();
        for &handle in graph.nodes() {
            if !Self::needs_check(arena, handle) {
                continue;
            }
            let entity = &arena[handle];
            match self.schema.try_table(entity.type_name()) {
                Some(table) => self.check_entity(arena, handle, table.def(), &mut errors),
                None => errors.push(format!(
                    "{}: type {} is not registered",
                    arena.describe(handle),
                    entity.type_name()
                )),
            }
        }
        (!errors.is_empty()).then(|| errors.join("\n"))
    }

    fn propagate_modifications(&self, arena: &mut EntityArena, graph: &ModifiableGraph) {
        for &handle in graph.nodes() {
            let entity = &mut arena[handle];
            if entity.modified == ModifiedState::Clean && entity.has_modified_children() {
                entity.modified = ModifiedState::GraphModified;
            }
        }
    }

    fn collapse_to_persistent_units(&self, arena: &EntityArena, graph: &ModifiableGraph) -> DependencyGraph {
        let writes = |h: Handle| {
            let e = &arena[h];
            e.modified() != ModifiedState::Sealed && (e.is_new() || e.modified().is_modified())
        };

        let mut units = DependencyGraph::new();
        for &handle in graph.nodes().iter().filter(|&&h| writes(h)) {
            units.add_node(handle);
            let Some(table) = self.schema.try_table(arena[handle].type_name()) else {
                continue;
            };
            for (target, nullable) in Self::unit_references(arena, handle, table.def()) {
                // only new targets impose an order
                if arena[target].is_new() && writes(target) {
                    units.add_edge(handle, target, nullable);
                }
            }
        }
        units
    }

    fn mark_clean(&self, arena: &mut EntityArena, graph: &ModifiableGraph) {
        let ids: HashMap<Handle, i64> = graph
            .nodes()
            .iter()
            .filter_map(|&h| arena[h].id().map(|id| (h, id)))
            .collect();

        for &handle in graph.nodes() {
            let entity = &mut arena[handle];
            entity.mark_clean();
            entity.visit_references_mut(&mut |reference| {
                if let Reference::Lite(lite) = reference {
                    if let Some(id) = lite.entity.and_then(|h| ids.get(&h)) {
                        lite.id = Some(*id);
                    }
                }
            });
        }
    }
}
