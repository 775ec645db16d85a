//! Child collections stored in their own table.

use super::entity::{FieldValue, ModifiedState, Reference};
use std::collections::BTreeSet;

/// One element of a child collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRow {
    /// Primary key of the row; `None` until first inserted.
    pub row_id: Option<i64>,
    pub value: FieldValue,
    /// Position at the last sync, for ordered collections.
    pub old_index: Option<usize>,
}

/// An ordered collection of child rows owned by one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    rows: Vec<CollectionRow>,
    state: ModifiedState,
    /// Row ids stored in the database as of the last load or save; `None`
    /// for a collection built in memory that was never written.
    synced: Option<BTreeSet<i64>>,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    /// An empty collection created in memory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            state: ModifiedState::SelfModified,
            synced: None,
        }
    }

    /// A collection as read from the database: `(row_id, value)` pairs in order.
    #[must_use]
    pub fn loaded(rows: impl IntoIterator<Item = (i64, FieldValue)>) -> Self {
        let rows: Vec<CollectionRow> = rows
            .into_iter()
            .enumerate()
            .map(|(index, (row_id, value))| CollectionRow {
                row_id: Some(row_id),
                value,
                old_index: Some(index),
            })
            .collect();
        let synced = rows.iter().filter_map(|row| row.row_id).collect();
        Self {
            rows,
            state: ModifiedState::Clean,
            synced: Some(synced),
        }
    }

    /// Builder-style push.
    #[must_use]
    pub fn with(mut self, value: impl Into<FieldValue>) -> Self {
        self.push(value);
        self
    }

    pub fn push(&mut self, value: impl Into<FieldValue>) {
        self.rows.push(CollectionRow {
            row_id: None,
            value: value.into(),
            old_index: None,
        });
        self.state = ModifiedState::SelfModified;
    }

    pub fn insert(&mut self, index: usize, value: impl Into<FieldValue>) {
        self.rows.insert(
            index,
            CollectionRow {
                row_id: None,
                value: value.into(),
                old_index: None,
            },
        );
        self.state = ModifiedState::SelfModified;
    }

    pub fn remove(&mut self, index: usize) -> FieldValue {
        self.state = ModifiedState::SelfModified;
        self.rows.remove(index).value
    }

    /// Replace an element; the old row is deleted and a new one inserted.
    pub fn set(&mut self, index: usize, value: impl Into<FieldValue>) {
        self.rows[index] = CollectionRow {
            row_id: None,
            value: value.into(),
            old_index: None,
        };
        self.state = ModifiedState::SelfModified;
    }

    /// Move an element, keeping its row.
    pub fn move_row(&mut self, from: usize, to: usize) {
        let row = self.rows.remove(from);
        self.rows.insert(to, row);
        self.state = ModifiedState::SelfModified;
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.state = ModifiedState::SelfModified;
    }

    /// Mutable access to an element value (for embedded elements).
    pub fn get_mut(&mut self, index: usize) -> Option<&mut FieldValue> {
        self.rows.get_mut(index).map(|row| &mut row.value)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.rows.get(index).map(|row| &row.value)
    }

    #[must_use]
    pub fn rows(&self) -> &[CollectionRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub const fn state(&self) -> ModifiedState {
        self.state
    }

    /// True if rows were added, removed, moved or an element changed in place.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.state.is_modified() || self.rows.iter().any(|row| row.value.is_modified())
    }

    /// Row ids currently present, in order.
    #[must_use]
    pub fn row_ids(&self) -> Vec<i64> {
        self.rows.iter().filter_map(|row| row.row_id).collect()
    }

    /// Row ids stored at the last sync that are no longer present, in id
    /// order. `None` if the collection was never synced, so what the
    /// database holds is unknown.
    #[must_use]
    pub fn removed_row_ids(&self) -> Option<Vec<i64>> {
        let synced = self.synced.as_ref()?;
        let current: BTreeSet<i64> = self.rows.iter().filter_map(|row| row.row_id).collect();
        Some(synced.difference(&current).copied().collect())
    }

    /// Take over the stored row ids of the collection this one replaces.
    pub(crate) fn inherit_synced(&mut self, previous: &Self) {
        if self.synced.is_none() {
            self.synced.clone_from(&previous.synced);
        }
    }

    pub(crate) fn set_row_id(&mut self, index: usize, row_id: Option<i64>) {
        self.rows[index].row_id = row_id;
    }

    pub(crate) fn visit_references_mut(&mut self, f: &mut impl FnMut(&mut Reference)) {
        for row in &mut self.rows {
            row.value.visit_references_mut(f);
        }
    }

    pub(crate) fn mark_clean(&mut self) {
        self.state = ModifiedState::Clean;
        self.synced = Some(self.row_ids().into_iter().collect());
        for (index, row) in self.rows.iter_mut().enumerate() {
            row.old_index = Some(index);
            row.value.mark_clean();
        }
    }
}
