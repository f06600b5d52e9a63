// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::{stm::Stm, tref::TRef};

/// A write-once transactional result. Waiting on an unfinished future retries until it
/// has been completed.
#[derive(Debug, PartialEq, Eq)]
pub struct TFuture<E, A> {
    state: TRef<Option<Result<A, E>>>,
}

impl<E, A> Clone for TFuture<E, A> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<E, A> Default for TFuture<E, A>
where
    E: Clone + PartialEq + Send + Sync + 'static,
    A: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, A> TFuture<E, A>
where
    E: Clone + PartialEq + Send + Sync + 'static,
    A: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { state: TRef::new(None) }
    }

    pub fn make<R, E2>() -> Stm<R, E2, TFuture<E, A>>
    where
        R: 'static,
        E2: Send + 'static,
    {
        TRef::make(None).map(|state| TFuture { state })
    }

    /// Waits for the result, retrying while the future is unfinished.
    pub fn await_value<R: 'static>(&self) -> Stm<R, E, A> {
        self.state.get().chain(|state| match state {
            None => Stm::retry(),
            Some(Ok(value)) => Stm::succeed(value),
            Some(Err(error)) => Stm::fail(error),
        })
    }

    /// Completes the future. Returns `false` if it was already completed.
    pub fn done<R, E2>(&self, result: Result<A, E>) -> Stm<R, E2, bool>
    where
        R: 'static,
        E2: Send + 'static,
    {
        self.state.modify(move |state| match state {
            None => (true, Some(result.clone())),
            done => (false, done),
        })
    }

    pub fn succeed<R, E2>(&self, value: A) -> Stm<R, E2, bool>
    where
        R: 'static,
        E2: Send + 'static,
    {
        self.done(Ok(value))
    }

    pub fn fail<R, E2>(&self, error: E) -> Stm<R, E2, bool>
    where
        R: 'static,
        E2: Send + 'static,
    {
        self.done(Err(error))
    }

    /// The result, if the future has been completed.
    pub fn poll<R, E2>(&self) -> Stm<R, E2, Option<Result<A, E>>>
    where
        R: 'static,
        E2: Send + 'static,
    {
        self.state.get()
    }
}
