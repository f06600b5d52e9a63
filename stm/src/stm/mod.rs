// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Transactions as values.
//!
//! An [`Stm<R, E, A>`] describes a transaction that needs an environment `R`, may fail
//! with `E` and succeeds with `A`. Building one has no effect; it runs only when committed,
//! and may run many times before it commits, so closures passed to combinators should be
//! free of side effects outside the transaction.

mod driver;
mod exit;
mod node;

pub use exit::TExit;

pub(crate) use driver::Driver;
pub(crate) use node::{AnyValue, Env, Node, Signal};

use crate::{clock::FiberId, error::Defect, journal::Journal};
use node::{Next, Once};
use std::{convert::Infallible, fmt::Debug, marker::PhantomData, sync::Arc};

/// A transaction that needs environment `R`, fails with `E` and succeeds with `A`.
pub struct Stm<R, E, A> {
    node: Node,
    _marker: PhantomData<fn(R) -> (E, A)>,
}

/// A transaction with no environment that cannot fail.
pub type Ustm<A> = Stm<(), Infallible, A>;

/// The branch of [`Stm::or_else_either`] that produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

impl<R, E, A> Clone for Stm<R, E, A> {
    fn clone(&self) -> Self {
        Self::from_node(self.node.clone())
    }
}

impl<R, E, A> Stm<R, E, A> {
    pub(crate) fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }
}

impl<R, E, A> Stm<R, E, A>
where
    R: 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// A step operating on the journal of the running attempt.
    pub(crate) fn with_journal<F>(f: F) -> Self
    where
        F: Fn(&mut Journal, FiberId) -> Result<A, Signal> + Send + Sync + 'static,
    {
        Self::from_node(Node::effect(move |journal, fiber_id, _| {
            f(journal, fiber_id).map(|value| Box::new(value) as AnyValue)
        }))
    }

    /// Runs the tree once against `journal`.
    pub(crate) fn run(&self, journal: &mut Journal, fiber_id: FiberId, env: Env) -> TExit<E, A> {
        Driver::new(journal, fiber_id, env).run(&self.node).downcast()
    }

    pub fn succeed(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Self::from_node(Node::succeed_now(value))
    }

    /// Succeeds with the result of `f`, evaluated on every attempt.
    pub fn succeed_with<F>(f: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::from_node(Node::succeed(move || Box::new(f()) as AnyValue))
    }

    /// Yields `value` exactly once. Only valid inside trees built by a continuation.
    fn succeed_once(value: A) -> Self {
        let value = Once::new(value);
        Self::from_node(Node::effect(move |_, _, _| {
            value
                .take()
                .map(|value| Box::new(value) as AnyValue)
                .map_err(Signal::Halt)
        }))
    }

    pub fn fail(error: E) -> Self
    where
        E: Clone + Sync,
    {
        Self::from_node(Node::signal(move |_| Signal::fail(error.clone())))
    }

    pub fn fail_with<F>(f: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
    {
        Self::from_node(Node::signal(move |_| Signal::fail(f())))
    }

    pub fn halt(defect: Defect) -> Self {
        Self::from_node(Node::halt(defect))
    }

    pub fn halt_message(message: impl Into<String>) -> Self {
        Self::halt(Defect::message(message))
    }

    /// Abandons the attempt. The transaction runs again once one of the cells it read changes.
    pub fn retry() -> Self {
        Self::from_node(Node::signal(|_| Signal::Retry))
    }

    /// Interrupts the running fiber.
    pub fn interrupt() -> Self {
        Self::from_node(Node::signal(Signal::Interrupt))
    }

    /// Defers building the transaction until it runs.
    pub fn suspend<F>(f: F) -> Self
    where
        F: Fn() -> Stm<R, E, A> + Send + Sync + 'static,
    {
        Self::from_node(Node::unit().on_success(move |_| Next::Node(f().node)))
    }

    /// Reads the environment through `f`.
    pub fn access<F>(f: F) -> Self
    where
        R: Send + Sync,
        F: Fn(&R) -> A + Send + Sync + 'static,
    {
        Self::from_node(Node::effect(move |_, _, env| {
            env.downcast_ref::<R>()
                .map(|env| Box::new(f(env)) as AnyValue)
                .ok_or_else(|| Signal::Halt(Defect::type_mismatch::<R>()))
        }))
    }

    pub fn access_stm<F>(f: F) -> Self
    where
        R: Send + Sync,
        F: Fn(&R) -> Stm<R, E, A> + Send + Sync + 'static,
    {
        Stm::<R, E, Stm<R, E, A>>::access(f).chain(|stm| stm)
    }

    pub fn chain<B, F>(self, f: F) -> Stm<R, E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> Stm<R, E, B> + Send + Sync + 'static,
    {
        Stm::from_node(self.node.on_success(move |value| match value.downcast::<A>() {
            Ok(value) => Next::Node(f(*value).node),
            Err(_) => mismatch::<A>(),
        }))
    }

    /// Like [`Stm::chain`], for a continuation that owns state and runs once per attempt.
    fn chain_once<B, F>(self, f: F) -> Stm<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Stm<R, E, B> + Send + 'static,
    {
        let f = Once::new(f);
        Stm::from_node(self.node.on_success(move |value| {
            let f = match f.take() {
                Ok(f) => f,
                Err(defect) => return Next::Done(Err(Signal::Halt(defect))),
            };
            match value.downcast::<A>() {
                Ok(value) => Next::Node(f(*value).node),
                Err(_) => mismatch::<A>(),
            }
        }))
    }

    pub fn map<B, F>(self, f: F) -> Stm<R, E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        Stm::from_node(self.node.on_success(move |value| match value.downcast::<A>() {
            Ok(value) => Next::Done(Ok(Box::new(f(*value)) as AnyValue)),
            Err(_) => mismatch::<A>(),
        }))
    }

    pub fn as_value<B>(self, value: B) -> Stm<R, E, B>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.map(move |_| value.clone())
    }

    pub fn unit(self) -> Stm<R, E, ()> {
        self.map(|_| ())
    }

    pub fn map_err<E2, F>(self, f: F) -> Stm<R, E2, A>
    where
        E2: Send + 'static,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        Stm::from_node(self.node.on_failure(move |error| match error.downcast::<E>() {
            Ok(error) => Next::Done(Err(Signal::fail(f(*error)))),
            Err(_) => mismatch::<E>(),
        }))
    }

    /// Recovers from a typed failure. Retries, halts and interruptions pass through.
    pub fn catch_all<E2, F>(self, f: F) -> Stm<R, E2, A>
    where
        E2: Send + 'static,
        F: Fn(E) -> Stm<R, E2, A> + Send + Sync + 'static,
    {
        Stm::from_node(self.node.on_failure(move |error| match error.downcast::<E>() {
            Ok(error) => Next::Node(f(*error).node),
            Err(_) => mismatch::<E>(),
        }))
    }

    /// Runs `that` if this transaction retries. Writes made by the retried branch are
    /// discarded; its reads still count. Failures pass through.
    pub fn or_else(self, that: Stm<R, E, A>) -> Self {
        Stm::from_node(self.node.or_else(that.node))
    }

    /// Like [`Stm::or_else`], tagging which branch produced the value.
    pub fn or_else_either<B>(self, that: Stm<R, E, B>) -> Stm<R, E, Either<A, B>>
    where
        B: Send + 'static,
    {
        self.map(Either::Left).or_else(that.map(Either::Right))
    }

    /// Runs `that` if this transaction fails or retries.
    pub fn or_try(self, that: Stm<R, E, A>) -> Self {
        let fallback = that.clone();
        self.either::<E>()
            .or_else(that.map(Ok))
            .chain(move |result| match result {
                Ok(value) => Stm::succeed_once(value),
                Err(_) => fallback.clone(),
            })
    }

    /// Runs the transaction again until `predicate` holds for its value.
    pub fn repeat_until<F>(self, predicate: F) -> Self
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        repeat_until(self, Arc::new(predicate))
    }

    /// Succeeds with `None` instead of retrying.
    pub fn optionally(self) -> Stm<R, E, Option<A>> {
        let some = self.map(Some).node;
        Stm::from_node(some.on_retry(|| Node::succeed(|| Box::new(None::<A>) as AnyValue)))
    }

    /// Moves a failure into the success channel.
    pub fn either<E2>(self) -> Stm<R, E2, Result<A, E>>
    where
        E2: Send + 'static,
    {
        self.fold(Err, Ok)
    }

    pub fn fold<E2, B, F, G>(self, on_failure: F, on_success: G) -> Stm<R, E2, B>
    where
        E2: Send + 'static,
        B: Send + 'static,
        F: Fn(E) -> B + Send + Sync + 'static,
        G: Fn(A) -> B + Send + Sync + 'static,
    {
        let mapped = self.map(on_success).node;
        Stm::from_node(mapped.on_failure(move |error| match error.downcast::<E>() {
            Ok(error) => Next::Done(Ok(Box::new(on_failure(*error)) as AnyValue)),
            Err(_) => mismatch::<E>(),
        }))
    }

    /// Continues with `on_failure` or `on_success`. Failures of the continuations themselves
    /// are not caught.
    pub fn fold_stm<E2, B, F, G>(self, on_failure: F, on_success: G) -> Stm<R, E2, B>
    where
        E2: Send + 'static,
        B: Send + 'static,
        F: Fn(E) -> Stm<R, E2, B> + Send + Sync + 'static,
        G: Fn(A) -> Stm<R, E2, B> + Send + Sync + 'static,
    {
        self.either::<E2>().chain(move |result| match result {
            Ok(value) => on_success(value),
            Err(error) => on_failure(error),
        })
    }

    /// Turns a typed failure into a defect.
    pub fn or_die<E2>(self) -> Stm<R, E2, A>
    where
        E: Debug,
        E2: Send + 'static,
    {
        self.or_die_with(|error| Defect::message(format!("{:?}", error)))
    }

    pub fn or_die_with<E2, F>(self, f: F) -> Stm<R, E2, A>
    where
        E2: Send + 'static,
        F: Fn(E) -> Defect + Send + Sync + 'static,
    {
        Stm::from_node(self.node.on_failure(move |error| match error.downcast::<E>() {
            Ok(error) => Next::Done(Err(Signal::Halt(f(*error)))),
            Err(_) => mismatch::<E>(),
        }))
    }

    pub fn zip_with<B, C, F>(self, that: Stm<R, E, B>, f: F) -> Stm<R, E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.chain(move |a| {
            let f = f.clone();
            that.clone().chain_once(move |b| Stm::succeed_once(f(a, b)))
        })
    }

    pub fn zip<B>(self, that: Stm<R, E, B>) -> Stm<R, E, (A, B)>
    where
        B: Send + 'static,
    {
        self.zip_with(that, |a, b| (a, b))
    }

    pub fn zip_left<B>(self, that: Stm<R, E, B>) -> Self
    where
        B: Send + 'static,
    {
        self.zip_with(that, |a, _| a)
    }

    pub fn zip_right<B>(self, that: Stm<R, E, B>) -> Stm<R, E, B>
    where
        B: Send + 'static,
    {
        self.chain(move |_| that.clone())
    }

    /// Runs the transaction only if `condition` holds.
    pub fn when(self, condition: bool) -> Stm<R, E, ()> {
        if condition {
            self.unit()
        } else {
            Stm::from_node(Node::unit())
        }
    }

    /// Runs `f` for every item in order and collects the results.
    pub fn for_each<T, F>(items: Vec<T>, f: F) -> Stm<R, E, Vec<A>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(T) -> Stm<R, E, A> + Send + Sync + 'static,
    {
        let items: Arc<[T]> = items.into();
        let f = Arc::new(f);
        Stm::suspend(move || for_each_from(items.clone(), f.clone(), 0, Vec::new()))
    }

    pub fn collect_all(stms: Vec<Stm<R, E, A>>) -> Stm<R, E, Vec<A>> {
        Self::for_each(stms, |stm| stm)
    }

    /// Provides the environment, eliminating the dependency on `R`.
    pub fn provide<R0>(self, env: R) -> Stm<R0, E, A>
    where
        R: Clone + Send + Sync,
    {
        Stm::from_node(self.node.gives(move |_| Ok(Arc::new(env.clone()) as Env)))
    }

    /// Runs the transaction with an environment derived from the outer one.
    pub fn provide_some<R0, F>(self, f: F) -> Stm<R0, E, A>
    where
        R: Send + Sync,
        R0: 'static,
        F: Fn(&R0) -> R + Send + Sync + 'static,
    {
        Stm::from_node(self.node.gives(move |env| {
            env.downcast_ref::<R0>()
                .map(|env| Arc::new(f(env)) as Env)
                .ok_or_else(Defect::type_mismatch::<R0>)
        }))
    }
}

fn mismatch<T>() -> Next {
    Next::Done(Err(Signal::Halt(Defect::type_mismatch::<T>())))
}

fn repeat_until<R, E, A>(stm: Stm<R, E, A>, predicate: Arc<dyn Fn(&A) -> bool + Send + Sync>) -> Stm<R, E, A>
where
    R: 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    let again = stm.clone();
    stm.chain(move |value| {
        if predicate(&value) {
            Stm::succeed_once(value)
        } else {
            repeat_until(again.clone(), predicate.clone())
        }
    })
}

fn for_each_from<R, E, A, T, F>(items: Arc<[T]>, f: Arc<F>, index: usize, mut acc: Vec<A>) -> Stm<R, E, Vec<A>>
where
    R: 'static,
    E: Send + 'static,
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Stm<R, E, A> + Send + Sync + 'static,
{
    match items.get(index).cloned() {
        None => Stm::succeed_once(acc),
        Some(item) => f(item).chain_once(move |value| {
            acc.push(value);
            for_each_from(items, f, index + 1, acc)
        }),
    }
}

impl<R, E> Stm<R, E, ()>
where
    R: 'static,
    E: Send + 'static,
{
    /// Retries unless `condition` holds.
    pub fn check(condition: bool) -> Self {
        if condition {
            Self::from_node(Node::unit())
        } else {
            Self::retry()
        }
    }

    /// Evaluates `predicate` on every attempt and retries unless it holds.
    pub fn check_with<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::suspend(move || Self::check(predicate()))
    }
}

impl<R, E, A> Stm<R, E, Option<A>>
where
    R: 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// Unwraps the value, retrying on `None`.
    pub fn some_or_retry(self) -> Stm<R, E, A> {
        Stm::from_node(self.node.on_success(|value| match value.downcast::<Option<A>>() {
            Ok(value) => match *value {
                Some(value) => Next::Done(Ok(Box::new(value) as AnyValue)),
                None => Next::Done(Err(Signal::Retry)),
            },
            Err(_) => mismatch::<Option<A>>(),
        }))
    }
}

impl<R, E, A> Stm<R, E, A>
where
    R: 'static,
    E: Send + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Succeeds with the value or retries on `None`.
    pub fn unwrap_or_retry(value: Option<A>) -> Self {
        match value {
            Some(value) => Self::succeed(value),
            None => Self::retry(),
        }
    }
}

impl<R, E> Stm<R, E, FiberId>
where
    R: 'static,
    E: Send + 'static,
{
    /// The id of the fiber running the transaction.
    pub fn fiber_id() -> Self {
        Self::from_node(Node::effect(|_, fiber_id, _| Ok(Box::new(fiber_id) as AnyValue)))
    }
}

impl<R, E> Stm<R, E, R>
where
    R: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn environment() -> Self {
        Self::access(R::clone)
    }
}
