//! Object-graph analysis for a save call.
//!
//! - [`GraphExplorer`] / [`SchemaExplorer`] - reachability, integrity checks,
//!   modification propagation, collapsing to persistent units
//! - [`DependencyGraph`] - "must be saved before" edges and the feedback
//!   edges that break reference cycles
//! - [`Forbidden`] - references a unit must write as NULL for now

pub mod dependency;
pub mod explorer;

pub use dependency::{Dependency, DependencyGraph};
pub use explorer::{GraphExplorer, ModifiableGraph, SchemaExplorer};

use crate::model::{Entity, EntityArena, Handle};
use std::collections::{BTreeSet, HashMap};

/// Targets a unit may not reference yet because they are still unsaved at
/// the moment its row is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forbidden(BTreeSet<Handle>);

impl Forbidden {
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.0.contains(&handle)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Handle> + '_ {
        self.0.iter().copied()
    }

    /// Whether `entity`'s own row references a forbidden target, i.e. one
    /// of its columns is written as NULL. References held only by its
    /// collections do not count.
    #[must_use]
    pub fn nulls_row_of(&self, entity: &Entity) -> bool {
        let mut hit = false;
        entity.visit_row_references(&mut |r| hit |= r.target().is_some_and(|t| self.contains(t)));
        hit
    }
}

impl FromIterator<Handle> for Forbidden {
    fn from_iter<I: IntoIterator<Item = Handle>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Feedback edges of one save call, indexed by source.
#[derive(Debug, Clone, Default)]
pub struct FeedbackEdges {
    targets: HashMap<Handle, Vec<Handle>>,
}

impl FeedbackEdges {
    #[must_use]
    pub fn new(edges: &[(Handle, Handle)]) -> Self {
        let mut targets: HashMap<Handle, Vec<Handle>> = HashMap::new();
        for &(from, to) in edges {
            targets.entry(from).or_default().push(to);
        }
        Self { targets }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Distinct sources, in handle order.
    #[must_use]
    pub fn sources(&self) -> Vec<Handle> {
        let mut sources: Vec<Handle> = self.targets.keys().copied().collect();
        sources.sort_unstable();
        sources
    }

    /// The forbidden set of `unit` right now: its feedback targets that
    /// have not been inserted yet.
    #[must_use]
    pub fn forbidden_for(&self, arena: &EntityArena, unit: Handle) -> Forbidden {
        self.targets
            .get(&unit)
            .map(|targets| {
                targets
                    .iter()
                    .copied()
                    .filter(|&t| arena.get(t).is_some_and(|e| e.is_new()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Collection;

    #[test]
    fn test_forbidden_only_unsaved_targets() {
        let mut arena = EntityArena::new();
        let a = arena.add(Entity::new("A"));
        let b = arena.add(Entity::new("B"));
        let c = arena.add(Entity::existing("C", 1, None));
        let edges = FeedbackEdges::new(&[(a, b), (a, c)]);

        assert_eq!(edges.forbidden_for(&arena, a), Forbidden::from_iter([b]));
        assert!(edges.forbidden_for(&arena, b).is_empty());

        arena[b].is_new = false;
        assert!(edges.forbidden_for(&arena, a).is_empty());
        assert_eq!(edges.sources(), vec![a]);
    }

    #[test]
    fn test_collection_references_do_not_null_the_row() {
        let mut arena = EntityArena::new();
        let artist = arena.add(Entity::new("Artist"));
        let label = arena.add(Entity::new("Label").with_collection("roster", Collection::new().with(artist)));
        let forbidden = Forbidden::from_iter([artist]);
        assert!(!forbidden.nulls_row_of(&arena[label]));

        arena[label].set("star", artist);
        assert!(forbidden.nulls_row_of(&arena[label]));
    }
}
