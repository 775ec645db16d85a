//! Arena owning every entity of an object graph.

use super::entity::Entity;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Stable index of an entity inside an [`EntityArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(usize);

impl Handle {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns the entities of one object graph.
///
/// Handles are assigned in insertion order and never reused, so the
/// order in which entities are added is the order in which same-type
/// new entities receive their ids.
#[derive(Debug, Default, Clone)]
pub struct EntityArena {
    entities: Vec<Entity>,
}

impl EntityArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity and return its handle.
    pub fn add(&mut self, entity: Entity) -> Handle {
        self.entities.push(entity);
        Handle::new(self.entities.len() - 1)
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&Entity> {
        self.entities.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Entity> {
        self.entities.get_mut(handle.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        (0..self.entities.len()).map(Handle::new)
    }

    /// Display name of an entity for messages: `Type(id)` or `Type(new #n)`.
    #[must_use]
    pub fn describe(&self, handle: Handle) -> String {
        match self.get(handle) {
            Some(e) => match e.id() {
                Some(id) => format!("{}({id})", e.type_name()),
                None => format!("{}(new {handle})", e.type_name()),
            },
            None => format!("<invalid {handle}>"),
        }
    }
}

impl Index<Handle> for EntityArena {
    type Output = Entity;

    fn index(&self, handle: Handle) -> &Entity {
        &self.entities[handle.0]
    }
}

impl IndexMut<Handle> for EntityArena {
    fn index_mut(&mut self, handle: Handle) -> &mut Entity {
        &mut self.entities[handle.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_follow_insertion_order() {
        let mut arena = EntityArena::new();
        let a = arena.add(Entity::new("A"));
        let b = arena.add(Entity::existing("B", 9, None));

        assert!(a < b);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.describe(a), "A(new #0)");
        assert_eq!(arena.describe(b), "B(9)");
        assert!(arena.get(Handle::new(7)).is_none());
    }
}
