// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Monotonic identifiers for fibers and transactional cells.

use lazy_static::lazy_static;
use std::{
    fmt::{self, Display},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

lazy_static! {
    static ref FIBER_IDS: IdClock = IdClock::new(0);
    static ref CELL_IDS: IdClock = IdClock::new(0);
}

/// A shareable counter handing out strictly increasing ids.
#[derive(Clone, Debug, Default)]
pub struct IdClock {
    atomic: Arc<AtomicUsize>,
}

impl IdClock {
    pub fn new(start: usize) -> Self {
        Self {
            atomic: Arc::new(AtomicUsize::new(start)),
        }
    }

    /// Increments the clock and returns the new value.
    pub fn next(&self) -> usize {
        self.atomic.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> usize {
        self.atomic.load(Ordering::SeqCst)
    }
}

/// Identity of the logical task executing a transaction.
///
/// Wake registrations on cells are keyed by this id, so a transaction owns at most one
/// registration per cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(usize);

impl FiberId {
    pub fn new() -> Self {
        FiberId(FIBER_IDS.next())
    }

    pub fn id(&self) -> usize {
        self.0
    }
}

impl Default for FiberId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a transactional cell, stable for the lifetime of the cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(usize);

impl CellId {
    pub(crate) fn next() -> Self {
        CellId(CELL_IDS.next())
    }
}

impl Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell-{}", self.0)
    }
}
