//! Batch planner.
//!
//! Peels the dependency graph one group at a time: every round takes the
//! current sinks, groups them by `(type, is_new)`, flushes one group and
//! removes it. Units that had to write a reference column as NULL are
//! repaired with plain UPDATEs once the graph is empty. Collections that
//! reference a unit not inserted yet are synced after the repair.

use super::SaveContext;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, FeedbackEdges};
use crate::model::{EntityArena, Handle};
use crate::schema::TypeName;
use crate::sql::{Writer, insert_many, sync_collections, update_many};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Units flushed together: same type, same insert/update path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub type_name: TypeName,
    pub is_new: bool,
}

/// Chooses which ready group to flush next.
pub trait GroupSelection {
    /// Pick a key of `ready`. `remaining` counts every unit still in the
    /// graph per key, the ready ones included.
    fn select<'k>(
        &self,
        ready: &'k BTreeMap<GroupKey, Vec<Handle>>,
        remaining: &BTreeMap<GroupKey, usize>,
    ) -> Option<&'k GroupKey>;
}

/// Flush the group that leaves the fewest units of its key behind, so each
/// key is executed in as few rounds as possible. Ties go to the smallest key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosestToExhaustion;

impl GroupSelection for ClosestToExhaustion {
    fn select<'k>(
        &self,
        ready: &'k BTreeMap<GroupKey, Vec<Handle>>,
        remaining: &BTreeMap<GroupKey, usize>,
    ) -> Option<&'k GroupKey> {
        ready
            .iter()
            .min_by_key(|(key, units)| remaining.get(*key).copied().unwrap_or(0).saturating_sub(units.len()))
            .map(|(key, _)| key)
    }
}

/// Counters of one executed plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanReport {
    pub groups: usize,
    pub inserted: usize,
    pub updated: usize,
    pub repaired: usize,
}

/// Break cycles in `graph`, then write every unit in it.
pub(crate) fn execute(
    ctx: &SaveContext<'_>,
    driver: &dyn Driver,
    arena: &mut EntityArena,
    mut graph: DependencyGraph,
) -> Result<PlanReport> {
    let edges = graph.feedback_edge_set(arena)?;
    for &(from, to) in &edges {
        graph.remove_edge(from, to);
    }
    if !edges.is_empty() {
        warn!(edges = edges.len(), "Deferring references to break cycles");
    }
    let feedback = FeedbackEdges::new(&edges);

    let planner = BatchPlanner {
        writer: Writer {
            driver,
            schema: ctx.schema,
            settings: &ctx.settings,
            feedback: &feedback,
        },
        selection: ctx.selection,
    };
    planner.run(arena, graph)
}

/// Work postponed to the repair pass; the flag tells whether the unit was
/// inserted in this call.
#[derive(Default)]
struct Deferred {
    /// Wrote a reference column as NULL; needs an UPDATE.
    rows: Vec<(Handle, bool)>,
    /// Row complete, but a collection references a unit not inserted yet.
    collections: Vec<(Handle, bool)>,
}

struct BatchPlanner<'a> {
    writer: Writer<'a>,
    selection: &'a dyn GroupSelection,
}

impl BatchPlanner<'_> {
    fn run(&self, arena: &mut EntityArena, mut graph: DependencyGraph) -> Result<PlanReport> {
        let mut report = PlanReport::default();
        let mut remaining: BTreeMap<GroupKey, usize> = BTreeMap::new();
        for handle in graph.nodes() {
            *remaining.entry(Self::key(arena, handle)).or_default() += 1;
        }

        let mut deferred = Deferred::default();

        while !graph.is_empty() {
            let mut ready: BTreeMap<GroupKey, Vec<Handle>> = BTreeMap::new();
            for handle in graph.sinks() {
                ready.entry(Self::key(arena, handle)).or_default().push(handle);
            }

            let key = match self.selection.select(&ready, &remaining) {
                Some(key) if ready.contains_key(key) => key.clone(),
                _ => ready
                    .keys()
                    .next()
                    .cloned()
                    .ok_or_else(|| Error::Other("dependency graph has no sink left".into()))?,
            };
            let units = ready.remove(&key).unwrap_or_default();
            for &unit in &units {
                graph.remove_node(unit);
            }
            if let Some(count) = remaining.get_mut(&key) {
                *count = count.saturating_sub(units.len());
            }

            self.flush(arena, &key, &units, &mut deferred)?;
            report.groups += 1;
            if key.is_new {
                report.inserted += units.len();
            } else {
                report.updated += units.len();
            }
        }

        if !deferred.rows.is_empty() || !deferred.collections.is_empty() {
            report.repaired = deferred.rows.len();
            self.repair(arena, &deferred)?;
        }
        Ok(report)
    }

    fn key(arena: &EntityArena, handle: Handle) -> GroupKey {
        let entity = &arena[handle];
        GroupKey {
            type_name: entity.type_name().clone(),
            is_new: entity.is_new(),
        }
    }

    /// Write one group and the collections of its units whose references
    /// all have ids by now.
    fn flush(&self, arena: &mut EntityArena, key: &GroupKey, units: &[Handle], deferred: &mut Deferred) -> Result<()> {
        let w = &self.writer;
        let table = w.schema.table(&key.type_name)?;
        debug!(type_name = %key.type_name, is_new = key.is_new, rows = units.len(), "Flushing group");

        let nulled = if key.is_new {
            insert_many(w, arena, &table, units)?
        } else {
            update_many(w, arena, &table, units)?
        };

        let mut complete = Vec::with_capacity(units.len());
        for &unit in units {
            if nulled.contains(&unit) {
                deferred.rows.push((unit, key.is_new));
            } else if w.feedback.forbidden_for(arena, unit).is_empty() {
                complete.push(unit);
            } else {
                deferred.collections.push((unit, key.is_new));
            }
        }
        sync_collections(w, arena, &table, &complete, key.is_new)?;
        Ok(())
    }

    /// Rewrite the rows that wrote NULL for a not-yet-inserted target, now
    /// that every target has an id, then sync the postponed collections.
    fn repair(&self, arena: &mut EntityArena, deferred: &Deferred) -> Result<()> {
        let w = &self.writer;
        debug!(
            rows = deferred.rows.len(),
            collections = deferred.collections.len(),
            "Repairing deferred references"
        );

        for (type_name, units) in Self::by_type(arena, &deferred.rows) {
            let table = w.schema.table(&type_name)?;
            let handles: Vec<Handle> = units.iter().map(|&(h, _)| h).collect();
            let still = update_many(w, arena, &table, &handles)?;
            if let Some(&unit) = still.first() {
                return Err(Error::UnsavedReference {
                    from: arena.describe(unit),
                    to: "a target that was never inserted".into(),
                });
            }
            debug!(type_name = %type_name, rows = handles.len(), "Repaired group");
        }

        let postponed: Vec<(Handle, bool)> = deferred.rows.iter().chain(&deferred.collections).copied().collect();
        for (type_name, units) in Self::by_type(arena, &postponed) {
            let table = w.schema.table(&type_name)?;
            let (fresh, existing): (Vec<_>, Vec<_>) = units.iter().partition(|&&(_, inserted)| inserted);
            let fresh: Vec<Handle> = fresh.into_iter().map(|&(h, _)| h).collect();
            let existing: Vec<Handle> = existing.into_iter().map(|&(h, _)| h).collect();
            sync_collections(w, arena, &table, &fresh, true)?;
            sync_collections(w, arena, &table, &existing, false)?;
        }
        Ok(())
    }

    fn by_type(arena: &EntityArena, units: &[(Handle, bool)]) -> BTreeMap<TypeName, Vec<(Handle, bool)>> {
        let mut by_type: BTreeMap<TypeName, Vec<(Handle, bool)>> = BTreeMap::new();
        for &(unit, inserted) in units {
            by_type
                .entry(arena[unit].type_name().clone())
                .or_default()
                .push((unit, inserted));
        }
        by_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(type_name: &'static str, is_new: bool) -> GroupKey {
        GroupKey {
            type_name: TypeName::from(type_name),
            is_new,
        }
    }

    #[test]
    fn test_closest_to_exhaustion_prefers_finishing_a_key() {
        let mut ready = BTreeMap::new();
        ready.insert(key("A", true), vec![Handle::new(0), Handle::new(1)]);
        ready.insert(key("B", true), vec![Handle::new(2)]);

        let mut remaining = BTreeMap::new();
        remaining.insert(key("A", true), 5);
        remaining.insert(key("B", true), 1);

        let chosen = ClosestToExhaustion.select(&ready, &remaining);
        assert_eq!(chosen, Some(&key("B", true)));
    }

    #[test]
    fn test_ties_go_to_smallest_key() {
        let mut ready = BTreeMap::new();
        ready.insert(key("B", false), vec![Handle::new(0)]);
        ready.insert(key("A", true), vec![Handle::new(1)]);

        let remaining: BTreeMap<GroupKey, usize> = ready.iter().map(|(k, v)| (k.clone(), v.len())).collect();
        assert_eq!(ClosestToExhaustion.select(&ready, &remaining), Some(&key("A", true)));
    }

    #[test]
    fn test_empty_ready_set() {
        let ready = BTreeMap::new();
        assert_eq!(ClosestToExhaustion.select(&ready, &BTreeMap::new()), None);
    }
}
