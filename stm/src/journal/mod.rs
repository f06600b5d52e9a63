// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The transaction log. A [`Journal`] records one [`Entry`] per cell a transaction touched.
//! It decides whether the transaction may commit and publishes the writes.

mod cell;
mod entry;
mod versioned;

pub use cell::{AtomicCell, Todo};
pub use entry::Entry;
pub use versioned::Versioned;

pub(crate) use versioned::Stored;

use crate::{
    clock::{CellId, FiberId},
    error::TxError,
    sync::{lock, Mutex, MutexGuard},
};
use lazy_static::lazy_static;
use std::{collections::HashMap, sync::Arc};

lazy_static! {
    static ref COMMIT_LOCK: Mutex<()> = Mutex::new(());
}

/// Proof that the global commit lock is held. Validation and publication of a journal
/// happen under it, so no two commits interleave.
pub struct CommitGuard(MutexGuard<'static, ()>);

pub fn commit_lock() -> CommitGuard {
    CommitGuard(lock(&COMMIT_LOCK))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analysis {
    /// At least one entry was read from a version that is no longer current.
    Invalid,

    /// Every entry is valid and none carries a write.
    ReadOnly,

    /// Every entry is valid and at least one carries a write.
    ReadWrite,
}

/// Pending writes of a journal at some point of a run.
pub struct Checkpoint {
    pending: HashMap<CellId, Option<Box<dyn Stored>>>,
}

#[derive(Default)]
pub struct Journal {
    entries: HashMap<CellId, Entry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry for `cell`, creating it from the cell's current version on first access.
    pub(crate) fn entry(&mut self, cell: &Arc<AtomicCell>) -> &mut Entry {
        self.entries
            .entry(cell.id())
            .or_insert_with(|| Entry::new(cell.clone(), false))
    }

    /// Records a cell created by the running transaction.
    pub(crate) fn insert_new(&mut self, cell: Arc<AtomicCell>) {
        self.entries.insert(cell.id(), Entry::new(cell, true));
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pending: self
                .entries
                .iter()
                .map(|(id, entry)| (*id, entry.pending()))
                .collect(),
        }
    }

    /// Drops every write made since `checkpoint`. Entries created since then are kept
    /// unchanged, so their reads still count for validation and wakeups.
    pub(crate) fn rollback(&mut self, checkpoint: &Checkpoint) {
        for (id, entry) in self.entries.iter_mut() {
            let pending = checkpoint
                .pending
                .get(id)
                .and_then(|pending| pending.as_ref().map(|value| value.clone_boxed()));
            entry.restore(pending);
        }
    }

    pub fn analyze(&self) -> Analysis {
        let mut analysis = Analysis::ReadOnly;
        for entry in self.entries.values() {
            if entry.is_invalid() {
                return Analysis::Invalid;
            }
            if entry.is_changed() {
                analysis = Analysis::ReadWrite;
            }
        }
        analysis
    }

    pub fn is_valid(&self) -> bool {
        self.entries.values().all(Entry::is_valid)
    }

    pub fn is_invalid(&self) -> bool {
        !self.is_valid()
    }

    /// Publishes every changed entry and hands back the wake registrations of the cells
    /// that received a new version, one callback per fiber. Unchanged cells keep their
    /// version and their registrations.
    pub fn commit(&mut self, _guard: &CommitGuard) -> Result<HashMap<FiberId, Todo>, TxError> {
        if self.is_invalid() {
            return Err(TxError::InvalidJournal);
        }
        let published: Vec<Arc<AtomicCell>> = self
            .entries
            .values_mut()
            .filter_map(|entry| entry.commit().then(|| entry.cell().clone()))
            .collect();
        Ok(collect_todos(&published))
    }

    /// Registers `todo` on every pre-existing cell of this journal the fiber is not yet
    /// registered on. Returns the number of new registrations.
    pub(crate) fn add_todo(&self, fiber_id: FiberId, todo: &Todo) -> usize {
        self.entries
            .values()
            .filter(|entry| !entry.is_new())
            .filter(|entry| entry.cell().add_todo(fiber_id, todo))
            .count()
    }

    pub(crate) fn remove_todo(&self, fiber_id: FiberId) {
        for entry in self.entries.values() {
            entry.cell().remove_todo(fiber_id);
        }
    }

    /// Cells present in `self` but not in `other`.
    pub(crate) fn untracked_todo_targets(&self, other: &Journal) -> Vec<Arc<AtomicCell>> {
        self.entries
            .iter()
            .filter(|(id, entry)| !entry.is_new() && !other.entries.contains_key(id))
            .map(|(_, entry)| entry.cell().clone())
            .collect()
    }
}

/// Drains the wake registrations of `cells`. Must run after the new versions are visible,
/// so that a transaction registering concurrently either gets drained here or sees its
/// journal invalid.
fn collect_todos(cells: &[Arc<AtomicCell>]) -> HashMap<FiberId, Todo> {
    let mut all = HashMap::new();
    for cell in cells {
        all.extend(cell.drain_todos());
    }
    all
}
