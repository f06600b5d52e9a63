// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{any::Any, fmt, sync::Arc};

/// A value that can live inside a transactional cell.
pub(crate) trait Stored: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Returns `true` if `other` has the same type and compares equal.
    fn same_value(&self, other: &dyn Any) -> bool;

    fn clone_boxed(&self) -> Box<dyn Stored>;
}

impl<T> Stored for T
where
    T: Any + Clone + PartialEq + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_value(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().map_or(false, |other| self == other)
    }

    fn clone_boxed(&self) -> Box<dyn Stored> {
        Box::new(self.clone())
    }
}

/// An immutable snapshot of a cell's value. Two snapshots denote the same version
/// only if they are the very same allocation; equal contents are not enough.
#[derive(Clone)]
pub struct Versioned {
    value: Arc<dyn Stored>,
}

impl Versioned {
    pub(crate) fn new<A: Stored>(value: A) -> Self {
        Self { value: Arc::new(value) }
    }

    pub(crate) fn from_boxed(value: Box<dyn Stored>) -> Self {
        Self {
            value: Arc::from(value),
        }
    }

    pub(crate) fn stored(&self) -> &dyn Stored {
        &*self.value
    }

    pub(crate) fn downcast<A: Any>(&self) -> Option<&A> {
        self.value.as_any().downcast_ref::<A>()
    }

    pub fn is_same_version(&self, other: &Versioned) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.value) as *const (),
            Arc::as_ptr(&other.value) as *const (),
        )
    }
}

impl fmt::Debug for Versioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Versioned({:p})", Arc::as_ptr(&self.value) as *const ())
    }
}
