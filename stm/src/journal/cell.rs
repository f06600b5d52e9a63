// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::versioned::Versioned;
use crate::{
    clock::{CellId, FiberId},
    sync::{lock, Mutex},
};
use std::{collections::HashMap, fmt, mem, sync::Arc};

/// Wake callback of a suspended transaction.
pub type Todo = Arc<dyn Fn() + Send + Sync>;

/// The shared cell behind every transactional reference: the current snapshot plus the
/// wake registrations of transactions waiting for it to change.
pub struct AtomicCell {
    id: CellId,
    versioned: Mutex<Versioned>,
    todos: Mutex<HashMap<FiberId, Todo>>,
}

impl AtomicCell {
    pub(crate) fn new(versioned: Versioned) -> Arc<Self> {
        Arc::new(Self {
            id: CellId::next(),
            versioned: Mutex::new(versioned),
            todos: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub(crate) fn versioned(&self) -> Versioned {
        lock(&self.versioned).clone()
    }

    pub(crate) fn replace(&self, versioned: Versioned) {
        *lock(&self.versioned) = versioned;
    }

    /// Registers `todo` for `fiber_id` unless the fiber is already registered.
    pub(crate) fn add_todo(&self, fiber_id: FiberId, todo: &Todo) -> bool {
        let mut todos = lock(&self.todos);
        if todos.contains_key(&fiber_id) {
            return false;
        }
        todos.insert(fiber_id, todo.clone());
        true
    }

    pub(crate) fn remove_todo(&self, fiber_id: FiberId) -> bool {
        lock(&self.todos).remove(&fiber_id).is_some()
    }

    pub(crate) fn drain_todos(&self) -> HashMap<FiberId, Todo> {
        mem::take(&mut *lock(&self.todos))
    }

    /// Number of transactions currently waiting on this cell.
    pub fn pending_todos(&self) -> usize {
        lock(&self.todos).len()
    }
}

impl fmt::Debug for AtomicCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicCell")
            .field("id", &self.id)
            .field("versioned", &self.versioned())
            .field("todos", &self.pending_todos())
            .finish()
    }
}
