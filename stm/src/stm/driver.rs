// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Trampolined interpreter for transaction trees. Composition depth lives on an explicit
//! frame stack, never on the native call stack.

use super::{
    exit::ErasedExit,
    node::{AnyValue, Cont, Env, Next, Node, RetryCont, Signal},
    TExit,
};
use crate::{
    clock::FiberId,
    error::Defect,
    journal::{Checkpoint, Journal},
};
use std::{
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

enum Frame {
    OnSuccess(Cont),
    OnFailure(Cont),
    OnRetry(RetryCont),
    OrElse(Checkpoint, Arc<Node>),
    RestoreEnv,
}

pub(crate) struct Driver<'a> {
    journal: &'a mut Journal,
    fiber_id: FiberId,
    env: Env,
    saved_envs: Vec<Env>,
    frames: Vec<Frame>,
}

/// Runs user code, turning a panic into a halt.
fn guarded<T, F>(f: F) -> Result<T, Signal>
where
    F: FnOnce() -> Result<T, Signal>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Signal::Halt(Defect::from_panic(payload))),
    }
}

impl<'a> Driver<'a> {
    pub(crate) fn new(journal: &'a mut Journal, fiber_id: FiberId, env: Env) -> Self {
        Self {
            journal,
            fiber_id,
            env,
            saved_envs: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub(crate) fn run(mut self, root: &Node) -> ErasedExit {
        let mut current = Arc::new(root.clone());
        loop {
            let mut outcome = match &*current {
                Node::Effect(step) => {
                    let (journal, fiber_id, env) = (&mut *self.journal, self.fiber_id, &self.env);
                    guarded(|| step(journal, fiber_id, env))
                }
                Node::Succeed(thunk) => guarded(|| Ok(thunk())),
                Node::SucceedNow(thunk) => Ok(thunk()),
                Node::OnSuccess(inner, k) => {
                    self.frames.push(Frame::OnSuccess(k.clone()));
                    current = inner.clone();
                    continue;
                }
                Node::OnFailure(inner, k) => {
                    self.frames.push(Frame::OnFailure(k.clone()));
                    current = inner.clone();
                    continue;
                }
                Node::OnRetry(inner, k) => {
                    self.frames.push(Frame::OnRetry(k.clone()));
                    current = inner.clone();
                    continue;
                }
                Node::OrElse(left, right) => {
                    self.frames.push(Frame::OrElse(self.journal.checkpoint(), right.clone()));
                    current = left.clone();
                    continue;
                }
                Node::Gives(inner, provide) => {
                    let env = &self.env;
                    match guarded(|| provide(env).map_err(Signal::Halt)) {
                        Ok(env) => {
                            self.saved_envs.push(mem::replace(&mut self.env, env));
                            self.frames.push(Frame::RestoreEnv);
                            current = inner.clone();
                            continue;
                        }
                        Err(signal) => Err(signal),
                    }
                }
            };

            // Feed the outcome through the frame stack until a frame yields a new node.
            current = loop {
                let next = match outcome {
                    Ok(value) => match self.unwind_success() {
                        Some(k) => apply(&k, value),
                        None => return TExit::Succeed(value),
                    },
                    Err(Signal::Fail(error)) => match self.unwind_failure() {
                        Some(k) => apply(&k, error),
                        None => return TExit::Fail(error),
                    },
                    Err(Signal::Retry) => match self.unwind_retry() {
                        Some(Frame::OnRetry(k)) => match guarded(|| Ok(k())) {
                            Ok(node) => Next::Node(node),
                            Err(signal) => Next::Done(Err(signal)),
                        },
                        Some(Frame::OrElse(checkpoint, right)) => {
                            self.journal.rollback(&checkpoint);
                            break right;
                        }
                        _ => return TExit::Retry,
                    },
                    Err(Signal::Halt(defect)) => return TExit::Halt(defect),
                    Err(Signal::Interrupt(fiber_id)) => return TExit::Interrupt(fiber_id),
                };
                match next {
                    Next::Node(node) => break Arc::new(node),
                    Next::Done(done) => outcome = done,
                }
            };
        }
    }

    fn restore_env(&mut self) {
        if let Some(env) = self.saved_envs.pop() {
            self.env = env;
        }
    }

    fn unwind_success(&mut self) -> Option<Cont> {
        while let Some(frame) = self.frames.pop() {
            match frame {
                Frame::OnSuccess(k) => return Some(k),
                Frame::RestoreEnv => self.restore_env(),
                Frame::OnFailure(_) | Frame::OnRetry(_) | Frame::OrElse(..) => {}
            }
        }
        None
    }

    fn unwind_failure(&mut self) -> Option<Cont> {
        while let Some(frame) = self.frames.pop() {
            match frame {
                Frame::OnFailure(k) => return Some(k),
                Frame::RestoreEnv => self.restore_env(),
                Frame::OnSuccess(_) | Frame::OnRetry(_) | Frame::OrElse(..) => {}
            }
        }
        None
    }

    /// Pops frames up to the nearest `OnRetry` or `OrElse` frame and returns it.
    fn unwind_retry(&mut self) -> Option<Frame> {
        while let Some(frame) = self.frames.pop() {
            match frame {
                Frame::OnRetry(_) | Frame::OrElse(..) => return Some(frame),
                Frame::RestoreEnv => self.restore_env(),
                Frame::OnSuccess(_) | Frame::OnFailure(_) => {}
            }
        }
        None
    }
}

fn apply(k: &Cont, value: AnyValue) -> Next {
    match panic::catch_unwind(AssertUnwindSafe(|| k(value))) {
        Ok(next) => next,
        Err(payload) => Next::Done(Err(Signal::Halt(Defect::from_panic(payload)))),
    }
}
