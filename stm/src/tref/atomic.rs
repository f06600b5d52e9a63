// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{Derived, DerivedAll, TRefOps};
use crate::{
    clock::CellId,
    commit::Commit,
    error::Defect,
    journal::{AtomicCell, Entry, Versioned},
    stm::{Signal, Stm},
};
use std::{
    convert::Infallible,
    fmt::{self, Debug},
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::Arc,
};

/// A transactional reference to a single cell holding an `A`.
///
/// Two references are equal if they point to the same cell.
pub struct Atomic<A> {
    cell: Arc<AtomicCell>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for Atomic<A> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A> PartialEq for Atomic<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<A> Eq for Atomic<A> {}

impl<A> Hash for Atomic<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cell.id().hash(state);
    }
}

impl<A> Debug for Atomic<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Atomic").field(&self.cell.id()).finish()
    }
}

impl<A> Atomic<A>
where
    A: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a reference outside of any transaction.
    pub fn new(value: A) -> Self {
        Self::from_cell(AtomicCell::new(Versioned::new(value)))
    }

    fn from_cell(cell: Arc<AtomicCell>) -> Self {
        Self {
            cell,
            _marker: PhantomData,
        }
    }

    /// Creates a reference inside a transaction.
    pub fn make<R, E>(value: A) -> Stm<R, E, Atomic<A>>
    where
        R: 'static,
        E: Send + 'static,
    {
        Stm::with_journal(move |journal, _| {
            let cell = AtomicCell::new(Versioned::new(value.clone()));
            journal.insert_new(cell.clone());
            Ok(Self::from_cell(cell))
        })
    }

    /// Creates a reference in its own transaction.
    pub fn make_commit(value: A) -> Commit<Infallible, Atomic<A>> {
        Self::make::<(), Infallible>(value).commit()
    }

    pub fn id(&self) -> CellId {
        self.cell.id()
    }

    #[cfg(test)]
    pub(crate) fn cell(&self) -> &Arc<AtomicCell> {
        &self.cell
    }

    /// Reads the committed value without a transaction.
    pub fn snapshot(&self) -> Result<A, Defect> {
        self.cell
            .versioned()
            .downcast::<A>()
            .cloned()
            .ok_or_else(Defect::type_mismatch::<A>)
    }

    /// Runs `f` on this reference's entry in the journal of the running attempt.
    pub(crate) fn with_entry<R, E, B, F>(&self, f: F) -> Stm<R, E, B>
    where
        R: 'static,
        E: Send + 'static,
        B: Send + 'static,
        F: Fn(&mut Entry) -> Result<B, Signal> + Send + Sync + 'static,
    {
        let cell = self.cell.clone();
        Stm::with_journal(move |journal, _| f(journal.entry(&cell)))
    }

    pub fn get<R, E>(&self) -> Stm<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
    {
        self.with_entry(|entry| entry.get::<A>().map_err(Signal::Halt))
    }

    pub fn set<R, E>(&self, value: A) -> Stm<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
    {
        self.with_entry(move |entry| entry.set(value.clone()).map_err(Signal::Halt))
    }

    /// Replaces the value with the second component of `f`'s result and returns the first.
    pub fn modify<R, E, B, F>(&self, f: F) -> Stm<R, E, B>
    where
        R: 'static,
        E: Send + 'static,
        B: Send + 'static,
        F: Fn(A) -> (B, A) + Send + Sync + 'static,
    {
        self.with_entry(move |entry| {
            let (result, value) = f(entry.get::<A>()?);
            entry.set(value)?;
            Ok(result)
        })
    }

    pub fn update<R, E, F>(&self, f: F) -> Stm<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |value| ((), f(value)))
    }

    pub fn get_and_set<R, E>(&self, value: A) -> Stm<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
    {
        self.modify(move |old| (old, value.clone()))
    }

    pub fn get_and_update<R, E, F>(&self, f: F) -> Stm<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |old| (old.clone(), f(old)))
    }

    pub fn update_and_get<R, E, F>(&self, f: F) -> Stm<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |old| {
            let new = f(old);
            (new.clone(), new)
        })
    }

    /// Like [`Atomic::modify`], leaving the value untouched and returning `default` where `f`
    /// is undefined.
    pub fn modify_some<R, E, B, F>(&self, default: B, f: F) -> Stm<R, E, B>
    where
        R: 'static,
        E: Send + 'static,
        B: Clone + Send + Sync + 'static,
        F: Fn(&A) -> Option<(B, A)> + Send + Sync + 'static,
    {
        self.modify(move |old| f(&old).unwrap_or_else(|| (default.clone(), old)))
    }

    pub fn update_some<R, E, F>(&self, f: F) -> Stm<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
        F: Fn(&A) -> Option<A> + Send + Sync + 'static,
    {
        self.modify_some((), move |old| f(old).map(|new| ((), new)))
    }

    pub fn get_and_update_some<R, E, F>(&self, f: F) -> Stm<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        F: Fn(&A) -> Option<A> + Send + Sync + 'static,
    {
        self.modify(move |old| {
            let new = f(&old).unwrap_or_else(|| old.clone());
            (old, new)
        })
    }

    pub fn update_some_and_get<R, E, F>(&self, f: F) -> Stm<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        F: Fn(&A) -> Option<A> + Send + Sync + 'static,
    {
        self.modify(move |old| {
            let new = f(&old).unwrap_or(old);
            (new.clone(), new)
        })
    }

    /// A view with fallible conversions on both sides.
    pub fn fold<EC, ED, C, D, CA, BD>(&self, ca: CA, bd: BD) -> Derived<A, EC, ED, C, D>
    where
        EC: Send + 'static,
        ED: Send + 'static,
        C: 'static,
        D: Send + 'static,
        CA: Fn(C) -> Result<A, EC> + Send + Sync + 'static,
        BD: Fn(A) -> Result<D, ED> + Send + Sync + 'static,
    {
        Derived::new(self.clone(), Arc::new(bd), Arc::new(ca))
    }

    /// A view whose writes see the current value.
    pub fn fold_all<EC, ED, C, D, CA, BD>(&self, ca: CA, bd: BD) -> DerivedAll<A, EC, ED, C, D>
    where
        EC: Send + 'static,
        ED: Send + 'static,
        C: 'static,
        D: Send + 'static,
        CA: Fn(C, A) -> Result<A, EC> + Send + Sync + 'static,
        BD: Fn(A) -> Result<D, ED> + Send + Sync + 'static,
    {
        DerivedAll::new(self.clone(), Arc::new(bd), Arc::new(ca))
    }

    pub fn map<D, F>(&self, f: F) -> Derived<A, Infallible, Infallible, A, D>
    where
        D: Send + 'static,
        F: Fn(A) -> D + Send + Sync + 'static,
    {
        self.fold(Ok, move |a| Ok(f(a)))
    }

    pub fn contramap<C, F>(&self, f: F) -> Derived<A, Infallible, Infallible, C, A>
    where
        C: 'static,
        F: Fn(C) -> A + Send + Sync + 'static,
    {
        self.fold(move |c| Ok(f(c)), Ok)
    }

    pub fn dimap<C, D, F, G>(&self, f: F, g: G) -> Derived<A, Infallible, Infallible, C, D>
    where
        C: 'static,
        D: Send + 'static,
        F: Fn(C) -> A + Send + Sync + 'static,
        G: Fn(A) -> D + Send + Sync + 'static,
    {
        self.fold(move |c| Ok(f(c)), move |a| Ok(g(a)))
    }
}

impl<A> TRefOps<Infallible, Infallible, A, A> for Atomic<A>
where
    A: Clone + PartialEq + Send + Sync + 'static,
{
    fn get<R: 'static>(&self) -> Stm<R, Infallible, A> {
        Atomic::get(self)
    }

    fn set<R: 'static>(&self, value: A) -> Stm<R, Infallible, ()> {
        Atomic::set(self, value)
    }

    fn id(&self) -> CellId {
        self.cell.id()
    }
}
