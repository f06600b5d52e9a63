// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{getter, setter, setter_all, Atomic, DerivedAll, Getter, Setter, TRefOps};
use crate::{
    clock::CellId,
    stm::{Signal, Stm},
};

/// A view of an [`Atomic<S>`] that reads `B` (failing with `EB`) and writes `A`
/// (failing with `EA`). A write replaces the whole underlying value.
pub struct Derived<S, EA, EB, A, B> {
    pub(super) atomic: Atomic<S>,
    pub(super) getter: Getter<S, EB, B>,
    pub(super) setter: Setter<S, EA, A>,
}

impl<S, EA, EB, A, B> Clone for Derived<S, EA, EB, A, B> {
    fn clone(&self) -> Self {
        Self {
            atomic: self.atomic.clone(),
            getter: self.getter.clone(),
            setter: self.setter.clone(),
        }
    }
}

impl<S, EA, EB, A, B> Derived<S, EA, EB, A, B>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    EA: Send + 'static,
    EB: Send + 'static,
    A: 'static,
    B: Send + 'static,
{
    pub(crate) fn new(atomic: Atomic<S>, getter: Getter<S, EB, B>, setter: Setter<S, EA, A>) -> Self {
        Self { atomic, getter, setter }
    }

    pub fn atomic(&self) -> &Atomic<S> {
        &self.atomic
    }

    pub fn get<R: 'static>(&self) -> Stm<R, EB, B> {
        let getter = self.getter.clone();
        self.atomic
            .with_entry(move |entry| getter(entry.get::<S>()?).map_err(Signal::fail))
    }

    pub fn set<R: 'static>(&self, value: A) -> Stm<R, EA, ()>
    where
        A: Clone + Send + Sync,
    {
        let setter = self.setter.clone();
        self.atomic.with_entry(move |entry| {
            let s = setter(value.clone()).map_err(Signal::fail)?;
            Ok(entry.set(s)?)
        })
    }

    pub fn fold<EC, ED, C, D, FA, FB, CA, BD>(&self, ea: FA, eb: FB, ca: CA, bd: BD) -> Derived<S, EC, ED, C, D>
    where
        EC: Send + 'static,
        ED: Send + 'static,
        C: 'static,
        D: Send + 'static,
        FA: Fn(EA) -> EC + Send + Sync + 'static,
        FB: Fn(EB) -> ED + Send + Sync + 'static,
        CA: Fn(C) -> Result<A, EC> + Send + Sync + 'static,
        BD: Fn(B) -> Result<D, ED> + Send + Sync + 'static,
    {
        let (get, set) = (self.getter.clone(), self.setter.clone());
        Derived::new(
            self.atomic.clone(),
            getter(move |s| get(s).map_err(|e| eb(e)).and_then(|b| bd(b))),
            setter(move |c| ca(c).and_then(|a| set(a).map_err(|e| ea(e)))),
        )
    }

    /// Like [`Derived::fold`], but the write conversion sees the current view value.
    pub fn fold_all<EC, ED, C, D, FA, FB, FC, CA, BD>(
        &self,
        ea: FA,
        eb: FB,
        ec: FC,
        ca: CA,
        bd: BD,
    ) -> DerivedAll<S, EC, ED, C, D>
    where
        EC: Send + 'static,
        ED: Send + 'static,
        C: 'static,
        D: Send + 'static,
        FA: Fn(EA) -> EC + Send + Sync + 'static,
        FB: Fn(EB) -> ED + Send + Sync + 'static,
        FC: Fn(EB) -> EC + Send + Sync + 'static,
        CA: Fn(C, B) -> Result<A, EC> + Send + Sync + 'static,
        BD: Fn(B) -> Result<D, ED> + Send + Sync + 'static,
    {
        let (get, read, set) = (self.getter.clone(), self.getter.clone(), self.setter.clone());
        DerivedAll::new(
            self.atomic.clone(),
            getter(move |s| get(s).map_err(|e| eb(e)).and_then(|b| bd(b))),
            setter_all(move |c, s| {
                let b = read(s).map_err(|e| ec(e))?;
                let a = ca(c, b)?;
                set(a).map_err(|e| ea(e))
            }),
        )
    }
}

impl<S, E, A> Derived<S, E, E, A, A>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    pub fn modify<R, B, F>(&self, f: F) -> Stm<R, E, B>
    where
        R: 'static,
        B: Send + 'static,
        F: Fn(A) -> (B, A) + Send + Sync + 'static,
    {
        let (get, set) = (self.getter.clone(), self.setter.clone());
        self.atomic.with_entry(move |entry| {
            let current = get(entry.get::<S>()?).map_err(Signal::fail)?;
            let (result, value) = f(current);
            entry.set(set(value).map_err(Signal::fail)?)?;
            Ok(result)
        })
    }

    pub fn update<R, F>(&self, f: F) -> Stm<R, E, ()>
    where
        R: 'static,
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |value| ((), f(value)))
    }
}

impl<S, EA, EB, A, B> TRefOps<EA, EB, A, B> for Derived<S, EA, EB, A, B>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    EA: Send + 'static,
    EB: Send + 'static,
    A: Clone + Send + Sync + 'static,
    B: Send + 'static,
{
    fn get<R: 'static>(&self) -> Stm<R, EB, B> {
        Derived::get(self)
    }

    fn set<R: 'static>(&self, value: A) -> Stm<R, EA, ()> {
        Derived::set(self, value)
    }

    fn id(&self) -> CellId {
        self.atomic.id()
    }
}

view_combinators!(Derived);
