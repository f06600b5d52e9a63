// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::node::AnyValue;
use crate::{
    clock::FiberId,
    error::{Cause, Defect},
};

/// Outcome of running a transaction tree once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TExit<E, A> {
    Succeed(A),
    Fail(E),
    Halt(Defect),
    Interrupt(FiberId),
    Retry,
}

impl<E, A> TExit<E, A> {
    pub fn is_retry(&self) -> bool {
        matches!(self, TExit::Retry)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TExit::Succeed(_))
    }

    pub fn map<B, F: FnOnce(A) -> B>(self, f: F) -> TExit<E, B> {
        match self {
            TExit::Succeed(value) => TExit::Succeed(f(value)),
            TExit::Fail(error) => TExit::Fail(error),
            TExit::Halt(defect) => TExit::Halt(defect),
            TExit::Interrupt(fiber_id) => TExit::Interrupt(fiber_id),
            TExit::Retry => TExit::Retry,
        }
    }

    /// Converts a terminal exit into the committer's result. `None` for [`TExit::Retry`].
    pub fn into_result(self) -> Option<Result<A, Cause<E>>> {
        match self {
            TExit::Succeed(value) => Some(Ok(value)),
            TExit::Fail(error) => Some(Err(Cause::Fail(error))),
            TExit::Halt(defect) => Some(Err(Cause::Halt(defect))),
            TExit::Interrupt(fiber_id) => Some(Err(Cause::Interrupt(fiber_id))),
            TExit::Retry => None,
        }
    }
}

pub(crate) type ErasedExit = TExit<AnyValue, AnyValue>;

impl ErasedExit {
    pub(crate) fn downcast<E: 'static, A: 'static>(self) -> TExit<E, A> {
        match self {
            TExit::Succeed(value) => match value.downcast::<A>() {
                Ok(value) => TExit::Succeed(*value),
                Err(_) => TExit::Halt(Defect::type_mismatch::<A>()),
            },
            TExit::Fail(error) => match error.downcast::<E>() {
                Ok(error) => TExit::Fail(*error),
                Err(_) => TExit::Halt(Defect::type_mismatch::<E>()),
            },
            TExit::Halt(defect) => TExit::Halt(defect),
            TExit::Interrupt(fiber_id) => TExit::Interrupt(fiber_id),
            TExit::Retry => TExit::Retry,
        }
    }
}
