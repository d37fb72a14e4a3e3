//! Pending change ledger
//!
//! A row has at most one change at a time. Mutations follow these rules:
//! - an insert on a row that already has an insert replaces its values
//! - an update on an inserted row merges into the insert
//! - an update on an updated row merges, and drops the change when every
//!   edited value matches the snapshot again
//! - inserts and updates on a deleted row are rejected
//! - deleting an inserted row removes the insert
//! - deleting any other row replaces its update with a delete

use serde::Serialize;
use uuid::Uuid;

use super::change::{ChangeType, PendingChange};
use crate::engine::{Row, Value};
use crate::error::{AionError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Ledger of uncommitted edits for one query result
///
/// Owned by its edit session and mutated through `&mut self` only.
#[derive(Debug, Clone, Default)]
pub struct EditState {
    changes: Vec<PendingChange>,
}

impl EditState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes in the order they were first made
    #[must_use]
    pub fn changes(&self) -> &[PendingChange] {
        &self.changes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    #[must_use]
    pub fn change_for_row(&self, row_index: usize) -> Option<&PendingChange> {
        self.changes.iter().find(|c| c.row_index == row_index)
    }

    fn position(&self, row_index: usize) -> Option<usize> {
        self.changes.iter().position(|c| c.row_index == row_index)
    }

    fn reject_deleted(&self, row_index: usize) -> Result<()> {
        if self.is_row_deleted(row_index) {
            return Err(AionError::edit_validation(format!(
                "Row {row_index} is marked for deletion; undelete it before editing"
            )));
        }
        Ok(())
    }

    /// Stage a new row
    pub fn insert_row(&mut self, row_index: usize, values: Row) -> Result<Uuid> {
        self.reject_deleted(row_index)?;
        match self.position(row_index) {
            Some(i) if self.changes[i].change_type == ChangeType::Insert => {
                self.changes[i].new_values = values;
                Ok(self.changes[i].id)
            }
            Some(_) => Err(AionError::edit_validation(format!(
                "Row {row_index} already exists and cannot be inserted"
            ))),
            None => {
                let change = PendingChange::new(ChangeType::Insert, row_index, Row::new(), values);
                let id = change.id;
                self.changes.push(change);
                Ok(id)
            }
        }
    }

    /// Stage edits to an existing or inserted row
    ///
    /// `original` is the row as loaded and is only read when the row has no
    /// change yet.
    pub fn update_row(&mut self, row_index: usize, original: &Row, values: Row) -> Result<()> {
        self.reject_deleted(row_index)?;
        match self.position(row_index) {
            Some(i) => {
                self.changes[i].new_values.extend(values);
                if self.changes[i].is_reverted() {
                    self.changes.remove(i);
                }
            }
            None => {
                let change = PendingChange::new(ChangeType::Update, row_index, original.clone(), values);
                if !change.is_reverted() {
                    self.changes.push(change);
                }
            }
        }
        Ok(())
    }

    /// Stage a single cell edit
    pub fn update_cell(
        &mut self,
        row_index: usize,
        original: &Row,
        column: impl Into<String>,
        value: Value,
    ) -> Result<()> {
        let mut values = Row::new();
        values.insert(column.into(), value);
        self.update_row(row_index, original, values)
    }

    /// Stage a delete; deleting an unsaved insert just drops it
    pub fn delete_row(&mut self, row_index: usize, original: &Row) {
        match self.position(row_index) {
            Some(i) => match self.changes[i].change_type {
                ChangeType::Insert => {
                    self.changes.remove(i);
                }
                ChangeType::Update => {
                    let snapshot = std::mem::take(&mut self.changes[i].original_values);
                    self.changes[i] = PendingChange::new(ChangeType::Delete, row_index, snapshot, Row::new());
                }
                ChangeType::Delete => {}
            },
            None => {
                self.changes.push(PendingChange::new(ChangeType::Delete, row_index, original.clone(), Row::new()));
            }
        }
    }

    /// Drop a pending delete; `false` when the row was not deleted
    pub fn undelete_row(&mut self, row_index: usize) -> bool {
        match self.position(row_index) {
            Some(i) if self.changes[i].change_type == ChangeType::Delete => {
                self.changes.remove(i);
                true
            }
            _ => false,
        }
    }

    pub fn remove_change(&mut self, change_id: Uuid) -> Option<PendingChange> {
        let index = self.changes.iter().position(|c| c.id == change_id)?;
        Some(self.changes.remove(index))
    }

    pub fn discard_all(&mut self) {
        self.changes.clear();
    }

    #[must_use]
    pub fn counts(&self) -> ChangeCounts {
        self.changes.iter().fold(ChangeCounts::default(), |mut counts, change| {
            match change.change_type {
                ChangeType::Insert => counts.inserted += 1,
                ChangeType::Update => counts.updated += 1,
                ChangeType::Delete => counts.deleted += 1,
            }
            counts
        })
    }

    fn is_row(&self, row_index: usize, change_type: ChangeType) -> bool {
        self.change_for_row(row_index).is_some_and(|c| c.change_type == change_type)
    }

    #[must_use]
    pub fn is_row_inserted(&self, row_index: usize) -> bool {
        self.is_row(row_index, ChangeType::Insert)
    }

    #[must_use]
    pub fn is_row_updated(&self, row_index: usize) -> bool {
        self.is_row(row_index, ChangeType::Update)
    }

    #[must_use]
    pub fn is_row_deleted(&self, row_index: usize) -> bool {
        self.is_row(row_index, ChangeType::Delete)
    }

    #[must_use]
    pub fn is_cell_modified(&self, row_index: usize, column: &str) -> bool {
        self.change_for_row(row_index)
            .is_some_and(|c| c.modified_columns().contains(&column))
    }

    /// Value a cell shows with pending edits applied
    #[must_use]
    pub fn effective_value(&self, row_index: usize, original: &Row, column: &str) -> Option<Value> {
        self.effective_row(row_index, original).and_then(|mut row| row.remove(column))
    }

    /// Row with pending edits applied; `None` when it is staged for deletion
    #[must_use]
    pub fn effective_row(&self, row_index: usize, original: &Row) -> Option<Row> {
        match self.change_for_row(row_index) {
            None => Some(original.clone()),
            Some(change) => match change.change_type {
                ChangeType::Delete => None,
                ChangeType::Insert => Some(change.new_values.clone()),
                ChangeType::Update => {
                    let mut row = original.clone();
                    row.extend(change.new_values.clone());
                    Some(row)
                }
            },
        }
    }
}
