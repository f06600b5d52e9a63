// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::{
    clock::FiberId,
    error::Defect,
    journal::Journal,
    sync::{lock, Mutex},
};
use lazy_static::lazy_static;
use std::{any::Any, mem, sync::Arc};

lazy_static! {
    static ref LEAF: Arc<Node> = Arc::new(Node::unit());
}

pub(crate) type AnyValue = Box<dyn Any + Send>;
pub(crate) type Env = Arc<dyn Any + Send + Sync>;

/// Non-success outcome of a single step.
pub(crate) enum Signal {
    Fail(AnyValue),
    Halt(Defect),
    Interrupt(FiberId),
    Retry,
}

impl Signal {
    pub(crate) fn fail<E: Send + 'static>(error: E) -> Self {
        Signal::Fail(Box::new(error))
    }
}

impl From<Defect> for Signal {
    fn from(defect: Defect) -> Self {
        Signal::Halt(defect)
    }
}

/// What a continuation hands back to the driver: either more work, or an outcome.
pub(crate) enum Next {
    Node(Node),
    Done(Result<AnyValue, Signal>),
}

pub(crate) type Step = Arc<dyn Fn(&mut Journal, FiberId, &Env) -> Result<AnyValue, Signal> + Send + Sync>;
pub(crate) type Thunk = Arc<dyn Fn() -> AnyValue + Send + Sync>;
pub(crate) type Cont = Arc<dyn Fn(AnyValue) -> Next + Send + Sync>;
pub(crate) type RetryCont = Arc<dyn Fn() -> Node + Send + Sync>;
pub(crate) type Provide = Arc<dyn Fn(&Env) -> Result<Env, Defect> + Send + Sync>;

/// A node of the transaction tree. Trees are immutable and re-run from the root on every
/// attempt, so every node must be evaluable any number of times.
#[derive(Clone)]
pub(crate) enum Node {
    /// Runs against the journal, fiber id and environment.
    Effect(Step),

    /// Lazily computes a value. May panic.
    Succeed(Thunk),

    /// Yields a value that is already known.
    SucceedNow(Thunk),

    OnSuccess(Arc<Node>, Cont),
    OnFailure(Arc<Node>, Cont),
    OnRetry(Arc<Node>, RetryCont),

    /// Runs the left node. If it retries, its writes are rolled back and the right node runs.
    OrElse(Arc<Node>, Arc<Node>),

    /// Runs the inner node with an environment derived from the current one.
    Gives(Arc<Node>, Provide),
}

impl Node {
    pub(crate) fn effect<F>(f: F) -> Node
    where
        F: Fn(&mut Journal, FiberId, &Env) -> Result<AnyValue, Signal> + Send + Sync + 'static,
    {
        Node::Effect(Arc::new(f))
    }

    pub(crate) fn succeed<F>(f: F) -> Node
    where
        F: Fn() -> AnyValue + Send + Sync + 'static,
    {
        Node::Succeed(Arc::new(f))
    }

    pub(crate) fn succeed_now<A>(value: A) -> Node
    where
        A: Clone + Send + Sync + 'static,
    {
        Node::SucceedNow(thunk(move || Box::new(value.clone())))
    }

    pub(crate) fn on_success<F>(self, k: F) -> Node
    where
        F: Fn(AnyValue) -> Next + Send + Sync + 'static,
    {
        Node::OnSuccess(Arc::new(self), Arc::new(k))
    }

    pub(crate) fn on_failure<F>(self, k: F) -> Node
    where
        F: Fn(AnyValue) -> Next + Send + Sync + 'static,
    {
        Node::OnFailure(Arc::new(self), Arc::new(k))
    }

    pub(crate) fn on_retry<F>(self, k: F) -> Node
    where
        F: Fn() -> Node + Send + Sync + 'static,
    {
        Node::OnRetry(Arc::new(self), Arc::new(k))
    }

    pub(crate) fn or_else(self, that: Node) -> Node {
        Node::OrElse(Arc::new(self), Arc::new(that))
    }

    pub(crate) fn gives<F>(self, provide: F) -> Node
    where
        F: Fn(&Env) -> Result<Env, Defect> + Send + Sync + 'static,
    {
        Node::Gives(Arc::new(self), Arc::new(provide))
    }

    pub(crate) fn signal<F>(signal: F) -> Node
    where
        F: Fn(FiberId) -> Signal + Send + Sync + 'static,
    {
        Node::effect(move |_, fiber_id, _| Err(signal(fiber_id)))
    }

    pub(crate) fn halt(defect: Defect) -> Node {
        Node::signal(move |_| Signal::Halt(defect.clone()))
    }

    pub(crate) fn unit() -> Node {
        Node::succeed_now(())
    }
}

impl Node {
    fn take_children(&mut self, children: &mut Vec<Arc<Node>>) {
        match self {
            Node::OnSuccess(inner, _) | Node::OnFailure(inner, _) | Node::Gives(inner, _) => {
                children.push(mem::replace(inner, LEAF.clone()));
            }
            Node::OnRetry(inner, _) => children.push(mem::replace(inner, LEAF.clone())),
            Node::OrElse(left, right) => {
                children.push(mem::replace(left, LEAF.clone()));
                children.push(mem::replace(right, LEAF.clone()));
            }
            Node::Effect(_) | Node::Succeed(_) | Node::SucceedNow(_) => {}
        }
    }
}

// Trees can be arbitrarily deep on either side of an `OrElse`, so they are unlinked
// through a worklist instead of being dropped recursively.
impl Drop for Node {
    fn drop(&mut self) {
        let mut children = Vec::new();
        self.take_children(&mut children);
        while let Some(child) = children.pop() {
            if let Ok(mut node) = Arc::try_unwrap(child) {
                node.take_children(&mut children);
            }
        }
    }
}

fn thunk<F>(f: F) -> Thunk
where
    F: Fn() -> AnyValue + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A value that can be taken exactly once. Continuations build fresh nodes on every run,
/// so state moved into such a node is consumed once per attempt.
pub(crate) struct Once<T>(Mutex<Option<T>>);

impl<T> Once<T> {
    pub(crate) fn new(value: T) -> Self {
        Once(Mutex::new(Some(value)))
    }

    pub(crate) fn take(&self) -> Result<T, Defect> {
        lock(&self.0)
            .take()
            .ok_or_else(|| Defect::message("one-shot transaction state resumed twice"))
    }
}
