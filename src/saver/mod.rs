//! The save control loop.
//!
//! [`save`] takes an arena and the roots to persist and runs, in order:
//! graph extraction, `saving` hooks, modification propagation, integrity
//! validation, collapse to persistent units, the batch planner (cycle
//! breaking, grouped inserts and updates, collection sync, repair pass),
//! `saved` hooks and finally marks everything clean.
//!
//! Statements are issued through the [`Driver`] inside whatever
//! transaction the caller holds. If anything fails, the ids, new flags,
//! versions and collection row ids assigned during the call are put back,
//! so the arena matches the rolled-back database.

pub(crate) mod concurrency;
pub mod planner;

pub use concurrency::VersionPolicy;
pub use planner::{ClosestToExhaustion, GroupKey, GroupSelection, PlanReport};

use crate::config::SaveSettings;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::graph::{GraphExplorer, SchemaExplorer};
use crate::model::{Entity, EntityArena, Handle, ModifiedState};
use crate::schema::Schema;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// What happened to an entity during a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedEvent {
    /// The entity was one of the roots passed to [`save`].
    pub is_root: bool,
    pub was_new: bool,
    /// Its own fields changed, not only owned values.
    pub was_self_modified: bool,
}

/// Hooks around a save call.
pub trait SaveObserver {
    /// Called before validation on every entity that will be written. May
    /// change the entity; references added here are picked up.
    fn saving(&self, _entity: &mut Entity) {}

    /// Called once the whole graph was written.
    fn saved(&self, _entity: &Entity, _event: SavedEvent) {}
}

/// Everything a save call needs besides the graph and the driver.
pub struct SaveContext<'a> {
    pub settings: SaveSettings,
    pub schema: &'a Schema,
    pub observer: Option<&'a dyn SaveObserver>,
    pub selection: &'a dyn GroupSelection,
}

impl<'a> SaveContext<'a> {
    #[must_use]
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            settings: SaveSettings::default(),
            schema,
            observer: None,
            selection: &ClosestToExhaustion,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: SaveSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: &'a dyn SaveObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn with_selection(mut self, selection: &'a dyn GroupSelection) -> Self {
        self.selection = selection;
        self
    }
}

/// Persisted state of one unit before the call, for rollback.
struct UnitState {
    handle: Handle,
    id: Option<i64>,
    is_new: bool,
    version: Option<i64>,
    row_ids: Vec<(String, Vec<Option<i64>>)>,
}

struct Snapshot(Vec<UnitState>);

impl Snapshot {
    fn take(arena: &EntityArena, units: &[Handle]) -> Self {
        Self(
            units
                .iter()
                .map(|&handle| {
                    let e = &arena[handle];
                    UnitState {
                        handle,
                        id: e.id,
                        is_new: e.is_new,
                        version: e.version,
                        row_ids: e
                            .collections
                            .iter()
                            .map(|(name, c)| (name.clone(), c.rows().iter().map(|r| r.row_id).collect()))
                            .collect(),
                    }
                })
                .collect(),
        )
    }

    fn restore(self, arena: &mut EntityArena) {
        for state in self.0 {
            let e = &mut arena[state.handle];
            e.id = state.id;
            e.is_new = state.is_new;
            e.version = state.version;
            for (name, row_ids) in state.row_ids {
                if let Some(collection) = e.collections.get_mut(&name) {
                    for (index, row_id) in row_ids.into_iter().enumerate() {
                        collection.set_row_id(index, row_id);
                    }
                }
            }
        }
    }
}

fn will_write(entity: &Entity) -> bool {
    entity.modified() != ModifiedState::Sealed
        && (entity.is_new() || entity.modified().is_modified() || entity.has_modified_children())
}

/// Save everything reachable from `roots`.
///
/// Runs on the caller's transaction: nothing here commits or rolls back.
///
/// # Errors
///
/// - [`Error::Validation`] when the graph fails integrity checks; no
///   statement has been issued.
/// - [`Error::ConcurrencyConflict`] / [`Error::EntityNotFound`] when an
///   update missed its row.
/// - [`Error::UnsupportedCycle`] when a reference cycle has no nullable
///   column to defer.
/// - Driver errors unchanged.
pub fn save(ctx: &SaveContext<'_>, driver: &dyn Driver, arena: &mut EntityArena, roots: &[Handle]) -> Result<()> {
    let span = info_span!("save", save_id = %Uuid::new_v4(), roots = roots.len());
    let _enter = span.enter();

    let explorer = SchemaExplorer::new(ctx.schema);
    let mut graph = explorer.extract_modified_graph(arena, roots)?;

    if let Some(observer) = ctx.observer {
        for &handle in graph.nodes() {
            if will_write(&arena[handle]) {
                observer.saving(&mut arena[handle]);
            }
        }
        graph = explorer.extract_modified_graph(arena, roots)?;
    }

    explorer.propagate_modifications(arena, &graph);
    if let Some(text) = explorer.validate(arena, &graph) {
        debug!(%text, "Integrity check failed");
        return Err(Error::Validation(text));
    }

    let units = explorer.collapse_to_persistent_units(arena, &graph);
    let written = units.nodes();
    let events: Vec<(Handle, SavedEvent)> = written
        .iter()
        .map(|&h| {
            let e = &arena[h];
            let event = SavedEvent {
                is_root: graph.is_root(h),
                was_new: e.is_new(),
                was_self_modified: e.modified() == ModifiedState::SelfModified,
            };
            (h, event)
        })
        .collect();

    if !units.is_empty() {
        let snapshot = Snapshot::take(arena, &written);
        match planner::execute(ctx, driver, arena, units) {
            Ok(report) => info!(
                units = written.len(),
                groups = report.groups,
                inserted = report.inserted,
                updated = report.updated,
                repaired = report.repaired,
                "Saved graph"
            ),
            Err(err) => {
                warn!(error = %err, "Save failed, restoring in-memory state");
                snapshot.restore(arena);
                return Err(err);
            }
        }
    } else {
        debug!("Nothing to save");
    }

    if let Some(observer) = ctx.observer {
        for (handle, event) in events {
            observer.saved(&arena[handle], event);
        }
    }
    explorer.mark_clean(arena, &graph);
    Ok(())
}
