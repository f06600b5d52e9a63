// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::clock::FiberId;
use std::{
    any::Any,
    fmt::{self, Debug, Display},
};
use thiserror::Error as DeriveError;

/// Errors of the commit machinery itself, as opposed to the outcome of a transaction.
#[derive(Debug, DeriveError, PartialEq, Eq)]
pub enum TxError {
    #[error("journal is invalid and cannot be committed")]
    InvalidJournal,

    #[error("transaction retried and would have to suspend")]
    WouldSuspend,
}

/// An unrecoverable error terminating a transaction. Defects are never caught by
/// `catch_all` and propagate straight to the committer.
#[derive(Debug, Clone, DeriveError, PartialEq, Eq)]
pub enum Defect {
    #[error("transaction panicked: {0}")]
    Panic(String),

    #[error("value has been casted as the wrong type, expected `{0}`")]
    TypeMismatch(&'static str),

    #[error("{0}")]
    Message(String),
}

impl Defect {
    pub fn message(message: impl Into<String>) -> Self {
        Defect::Message(message.into())
    }

    pub(crate) fn type_mismatch<T>() -> Self {
        Defect::TypeMismatch(std::any::type_name::<T>())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => message.to_string(),
                Err(_) => "non-string panic payload".to_string(),
            },
        };
        Defect::Panic(message)
    }
}

/// Why a committed transaction did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// The transaction failed with a typed, recoverable error.
    Fail(E),

    /// The transaction halted with a defect.
    Halt(Defect),

    /// The transaction was interrupted.
    Interrupt(FiberId),
}

impl<E> Cause<E> {
    pub fn failure(self) -> Option<E> {
        match self {
            Cause::Fail(error) => Some(error),
            _ => None,
        }
    }

    pub fn defect(&self) -> Option<&Defect> {
        match self {
            Cause::Halt(defect) => Some(defect),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Cause::Interrupt(_))
    }

    pub fn map<E2, F>(self, f: F) -> Cause<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Cause::Fail(error) => Cause::Fail(f(error)),
            Cause::Halt(defect) => Cause::Halt(defect),
            Cause::Interrupt(fiber_id) => Cause::Interrupt(fiber_id),
        }
    }
}

impl<E: Display> Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Fail(error) => write!(f, "transaction failed: {}", error),
            Cause::Halt(defect) => write!(f, "transaction halted: {}", defect),
            Cause::Interrupt(fiber_id) => write!(f, "transaction of fiber {} was interrupted", fiber_id),
        }
    }
}

impl<E: Debug + Display> std::error::Error for Cause<E> {}
