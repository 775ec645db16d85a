//! Entities, references and embedded values.
//!
//! An [`Entity`] is one persistent unit: a row of its type's table plus
//! the rows of its child collections. Entities never point at each other
//! directly; references hold a [`Handle`] into the owning
//! [`EntityArena`](super::EntityArena), so cyclic graphs are plain data.

use super::arena::Handle;
use super::collection::Collection;
use super::value::Value;
use crate::schema::TypeName;
use std::collections::{BTreeMap, BTreeSet};

/// Change-tracking state of an entity, embedded value or collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModifiedState {
    /// Matches the database.
    #[default]
    Clean,
    /// The object's own fields changed.
    SelfModified,
    /// Something the object owns (embedded value, collection) changed.
    GraphModified,
    /// Read-only; never written.
    Sealed,
}

impl ModifiedState {
    /// True when the object needs to be written.
    #[must_use]
    pub const fn is_modified(self) -> bool {
        matches!(self, Self::SelfModified | Self::GraphModified)
    }
}

/// Lightweight reference: type, id and display text, optionally with the
/// full entity loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Lite {
    pub type_name: TypeName,
    pub id: Option<i64>,
    pub entity: Option<Handle>,
    pub to_str: Option<String>,
}

impl Lite {
    /// A lite pointing at an already persisted row.
    #[must_use]
    pub fn new(type_name: impl Into<TypeName>, id: i64) -> Self {
        Self {
            type_name: type_name.into(),
            id: Some(id),
            entity: None,
            to_str: None,
        }
    }

    /// A lite carrying a loaded (possibly new) entity.
    #[must_use]
    pub fn loaded(type_name: impl Into<TypeName>, entity: Handle) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            entity: Some(entity),
            to_str: None,
        }
    }

    #[must_use]
    pub fn with_to_str(mut self, to_str: impl Into<String>) -> Self {
        self.to_str = Some(to_str.into());
        self
    }
}

/// A reference stored in an entity field.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Entity(Handle),
    Lite(Lite),
}

impl Reference {
    /// The in-memory entity behind this reference, if any.
    #[must_use]
    pub fn target(&self) -> Option<Handle> {
        match self {
            Self::Entity(h) => Some(*h),
            Self::Lite(lite) => lite.entity,
        }
    }
}

/// A value object stored inline in its owner's row.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    fields: BTreeMap<String, FieldValue>,
    modified: bool,
}

impl Default for Embedded {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedded {
    /// A freshly created embedded value (counts as modified).
    #[must_use]
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
            modified: true,
        }
    }

    /// An embedded value as read from the database.
    #[must_use]
    pub fn loaded(fields: impl IntoIterator<Item = (String, FieldValue)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            modified: false,
        }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_string(), value.into());
        self.modified = true;
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether this value or anything nested in it changed.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified || self.fields.values().any(FieldValue::is_modified)
    }

    pub(crate) fn mark_clean(&mut self) {
        self.modified = false;
        for value in self.fields.values_mut() {
            value.mark_clean();
        }
    }
}

/// The content of one entity field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    Reference(Option<Reference>),
    Embedded(Option<Embedded>),
}

impl FieldValue {
    #[must_use]
    pub fn entity(handle: Handle) -> Self {
        Self::Reference(Some(Reference::Entity(handle)))
    }

    #[must_use]
    pub fn lite(lite: Lite) -> Self {
        Self::Reference(Some(Reference::Lite(lite)))
    }

    #[must_use]
    pub const fn null_reference() -> Self {
        Self::Reference(None)
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Self::Reference(r) => r.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_embedded(&self) -> Option<&Embedded> {
        match self {
            Self::Embedded(e) => e.as_ref(),
            _ => None,
        }
    }

    pub fn as_embedded_mut(&mut self) -> Option<&mut Embedded> {
        match self {
            Self::Embedded(e) => e.as_mut(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.as_embedded().is_some_and(Embedded::is_modified)
    }

    /// Visit every reference held by this value, including nested ones.
    pub fn visit_references<'a>(&'a self, f: &mut impl FnMut(&'a Reference)) {
        match self {
            Self::Value(_) | Self::Reference(None) | Self::Embedded(None) => {}
            Self::Reference(Some(r)) => f(r),
            Self::Embedded(Some(e)) => {
                for value in e.fields.values() {
                    value.visit_references(f);
                }
            }
        }
    }

    pub(crate) fn visit_references_mut(&mut self, f: &mut impl FnMut(&mut Reference)) {
        match self {
            Self::Value(_) | Self::Reference(None) | Self::Embedded(None) => {}
            Self::Reference(Some(r)) => f(r),
            Self::Embedded(Some(e)) => {
                for value in e.fields.values_mut() {
                    value.visit_references_mut(f);
                }
            }
        }
    }

    pub(crate) fn mark_clean(&mut self) {
        if let Self::Embedded(Some(e)) = self {
            e.mark_clean();
        }
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<Reference> for FieldValue {
    fn from(r: Reference) -> Self {
        Self::Reference(Some(r))
    }
}

impl From<Embedded> for FieldValue {
    fn from(e: Embedded) -> Self {
        Self::Embedded(Some(e))
    }
}

impl From<Handle> for FieldValue {
    fn from(h: Handle) -> Self {
        Self::entity(h)
    }
}

impl From<Lite> for FieldValue {
    fn from(lite: Lite) -> Self {
        Self::lite(lite)
    }
}

macro_rules! field_value_from_scalar {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                Self::Value(Value::from(v))
            }
        })*
    };
}

field_value_from_scalar!(i64, i32, f64, bool, &str, String, Vec<u8>);

/// One persistent unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub(crate) type_name: TypeName,
    pub(crate) id: Option<i64>,
    pub(crate) is_new: bool,
    pub(crate) modified: ModifiedState,
    pub(crate) version: Option<i64>,
    pub(crate) to_str: Option<String>,
    pub(crate) fields: BTreeMap<String, FieldValue>,
    pub(crate) mixins: BTreeMap<String, Embedded>,
    pub(crate) collections: BTreeMap<String, Collection>,
    /// Collections explicitly set to null since the last save.
    pub(crate) nulled_collections: BTreeSet<String>,
    seal_violation: bool,
}

impl Entity {
    /// A new entity, to be inserted on the next save.
    #[must_use]
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            is_new: true,
            modified: ModifiedState::SelfModified,
            version: None,
            to_str: None,
            fields: BTreeMap::new(),
            mixins: BTreeMap::new(),
            collections: BTreeMap::new(),
            nulled_collections: BTreeSet::new(),
            seal_violation: false,
        }
    }

    /// An entity as loaded from the database.
    #[must_use]
    pub fn existing(type_name: impl Into<TypeName>, id: i64, version: Option<i64>) -> Self {
        Self {
            id: Some(id),
            is_new: false,
            modified: ModifiedState::Clean,
            version,
            ..Self::new(type_name)
        }
    }

    /// Builder-style field assignment that keeps the current state.
    ///
    /// Used to populate loaded entities and new ones alike.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Builder-style collection assignment.
    #[must_use]
    pub fn with_collection(mut self, name: &str, collection: Collection) -> Self {
        self.collections.insert(name.to_string(), collection);
        self
    }

    /// Builder-style mixin assignment.
    #[must_use]
    pub fn with_mixin(mut self, name: &str, mixin: Embedded) -> Self {
        self.mixins.insert(name.to_string(), mixin);
        self
    }

    /// Caller-assigned id, for tables without server-generated ids.
    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.modified = ModifiedState::Sealed;
        self
    }

    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    #[must_use]
    pub const fn id(&self) -> Option<i64> {
        self.id
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.is_new
    }

    #[must_use]
    pub const fn modified(&self) -> ModifiedState {
        self.modified
    }

    #[must_use]
    pub const fn version(&self) -> Option<i64> {
        self.version
    }

    #[must_use]
    pub fn to_str(&self) -> Option<&str> {
        self.to_str.as_deref()
    }

    pub fn set_to_str(&mut self, to_str: impl Into<String>) {
        self.to_str = Some(to_str.into());
        self.touch();
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Assign a field, marking the entity modified.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_string(), value.into());
        self.touch();
    }

    /// Mutable access to an embedded field; changes through it are picked
    /// up by [`Embedded::set`].
    pub fn embedded_mut(&mut self, name: &str) -> Option<&mut Embedded> {
        self.fields.get_mut(name).and_then(FieldValue::as_embedded_mut)
    }

    #[must_use]
    pub fn mixin(&self, name: &str) -> Option<&Embedded> {
        self.mixins.get(name)
    }

    pub fn mixin_mut(&mut self, name: &str) -> &mut Embedded {
        self.mixins.entry(name.to_string()).or_default()
    }

    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    pub fn collection_mut(&mut self, name: &str) -> Option<&mut Collection> {
        self.collections.get_mut(name)
    }

    /// Replace a collection; `None` nulls it, which deletes every row on save.
    ///
    /// A collection that was never set is not loaded and is left alone.
    pub fn set_collection(&mut self, name: &str, collection: Option<Collection>) {
        match collection {
            Some(mut c) => {
                self.nulled_collections.remove(name);
                if let Some(previous) = self.collections.get(name) {
                    c.inherit_synced(previous);
                }
                self.collections.insert(name.to_string(), c);
            }
            None => {
                self.collections.remove(name);
                self.nulled_collections.insert(name.to_string());
            }
        }
        self.touch();
    }

    /// Whether `name` was set to null since the last save.
    #[must_use]
    pub fn is_collection_nulled(&self, name: &str) -> bool {
        self.nulled_collections.contains(name)
    }

    /// Whether a modification was attempted on a sealed entity.
    #[must_use]
    pub const fn seal_violation(&self) -> bool {
        self.seal_violation
    }

    /// True if any owned embedded value, mixin or collection changed.
    #[must_use]
    pub fn has_modified_children(&self) -> bool {
        self.fields.values().any(FieldValue::is_modified)
            || self.mixins.values().any(Embedded::is_modified)
            || self.collections.values().any(Collection::is_modified)
            || !self.nulled_collections.is_empty()
    }

    /// Visit every reference reachable from this entity's row and collections.
    pub fn visit_references<'a>(&'a self, f: &mut impl FnMut(&'a Reference)) {
        self.visit_row_references(f);
        for collection in self.collections.values() {
            for row in collection.rows() {
                row.value.visit_references(f);
            }
        }
    }

    /// Visit the references stored in the entity's own row: fields and
    /// mixins, not collections.
    pub fn visit_row_references<'a>(&'a self, f: &mut impl FnMut(&'a Reference)) {
        for value in self.fields.values() {
            value.visit_references(f);
        }
        for mixin in self.mixins.values() {
            for (_, value) in mixin.fields() {
                value.visit_references(f);
            }
        }
    }

    pub(crate) fn visit_references_mut(&mut self, f: &mut impl FnMut(&mut Reference)) {
        for value in self.fields.values_mut() {
            value.visit_references_mut(f);
        }
        for mixin in self.mixins.values_mut() {
            for value in mixin.fields.values_mut() {
                value.visit_references_mut(f);
            }
        }
        for collection in self.collections.values_mut() {
            collection.visit_references_mut(f);
        }
    }

    fn touch(&mut self) {
        match self.modified {
            ModifiedState::Sealed => self.seal_violation = true,
            _ => self.modified = ModifiedState::SelfModified,
        }
    }

    pub(crate) fn mark_clean(&mut self) {
        if self.modified != ModifiedState::Sealed {
            self.modified = ModifiedState::Clean;
        }
        for value in self.fields.values_mut() {
            value.mark_clean();
        }
        for mixin in self.mixins.values_mut() {
            mixin.mark_clean();
        }
        for collection in self.collections.values_mut() {
            collection.mark_clean();
        }
        self.nulled_collections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_is_self_modified() {
        let e = Entity::new("Artist").with("name", "Nina");
        assert!(e.is_new());
        assert_eq!(e.modified(), ModifiedState::SelfModified);
        assert_eq!(e.id(), None);
    }

    #[test]
    fn test_existing_entity_becomes_modified_on_set() {
        let mut e = Entity::existing("Artist", 4, Some(2)).with("name", "Nina");
        assert_eq!(e.modified(), ModifiedState::Clean);

        e.set("name", "Nina Simone");
        assert_eq!(e.modified(), ModifiedState::SelfModified);
        assert_eq!(e.get("name").and_then(FieldValue::as_value), Some(&Value::from("Nina Simone")));
    }

    #[test]
    fn test_sealed_entity_records_violation() {
        let mut e = Entity::existing("Country", 1, None).sealed();
        e.set("name", "Atlantis");
        assert_eq!(e.modified(), ModifiedState::Sealed);
        assert!(e.seal_violation());
    }

    #[test]
    fn test_embedded_change_marks_children_modified() {
        let address = Embedded::loaded([("city".to_string(), FieldValue::from("Oslo"))]);
        let mut e = Entity::existing("Person", 1, None).with("address", address);
        assert!(!e.has_modified_children());

        e.embedded_mut("address").unwrap().set("city", "Bergen");
        assert!(e.has_modified_children());
        assert_eq!(e.modified(), ModifiedState::Clean);

        e.mark_clean();
        assert!(!e.has_modified_children());
    }

    #[test]
    fn test_nulled_collection_until_clean() {
        let mut e = Entity::existing("Album", 1, None).with_collection("songs", Collection::new());
        e.set_collection("songs", None);
        assert!(e.is_collection_nulled("songs"));
        assert!(e.collection("songs").is_none());

        e.mark_clean();
        assert!(!e.is_collection_nulled("songs"));
    }

    #[test]
    fn test_row_references_skip_collections() {
        let tracks = Collection::new().with(FieldValue::entity(Handle::new(4)));
        let e = Entity::new("Playlist")
            .with("curator", FieldValue::entity(Handle::new(1)))
            .with_collection("tracks", tracks);

        let mut row = Vec::new();
        e.visit_row_references(&mut |r| row.extend(r.target()));
        assert_eq!(row, vec![Handle::new(1)]);

        let mut all = Vec::new();
        e.visit_references(&mut |r| all.extend(r.target()));
        assert_eq!(all, vec![Handle::new(1), Handle::new(4)]);
    }

    #[test]
    fn test_replaced_collection_keeps_synced_rows() {
        let loaded = Collection::loaded([(7, FieldValue::from("a")), (8, FieldValue::from("b"))]);
        let mut e = Entity::existing("Album", 1, None).with_collection("songs", loaded);

        e.set_collection("songs", Some(Collection::new().with("c")));
        assert_eq!(e.collection("songs").unwrap().removed_row_ids(), Some(vec![7, 8]));
    }

    #[test]
    fn test_visit_references_includes_nested() {
        let inner = Embedded::new().with("owner", FieldValue::entity(Handle::new(3)));
        let e = Entity::new("Label")
            .with("parent", FieldValue::entity(Handle::new(1)))
            .with("lite", Lite::loaded("Band", Handle::new(2)))
            .with("meta", inner);

        let mut targets = Vec::new();
        e.visit_references(&mut |r| targets.extend(r.target()));
        targets.sort();
        assert_eq!(targets, vec![Handle::new(1), Handle::new(2), Handle::new(3)]);
    }
}
