// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{
    cell::AtomicCell,
    versioned::{Stored, Versioned},
};
use crate::error::Defect;
use std::{any::Any, sync::Arc};

/// A transaction's private view of one cell.
pub struct Entry {
    cell: Arc<AtomicCell>,
    expected: Versioned,
    new_value: Option<Box<dyn Stored>>,
    is_new: bool,
}

impl Entry {
    /// Snapshots the cell's current version as the expected one.
    pub(crate) fn new(cell: Arc<AtomicCell>, is_new: bool) -> Self {
        let expected = cell.versioned();
        Self {
            cell,
            expected,
            new_value: None,
            is_new,
        }
    }

    fn current(&self) -> &dyn Stored {
        match &self.new_value {
            Some(value) => &**value,
            None => self.expected.stored(),
        }
    }

    pub(crate) fn get<A: Any + Clone>(&self) -> Result<A, Defect> {
        self.current()
            .as_any()
            .downcast_ref::<A>()
            .cloned()
            .ok_or_else(Defect::type_mismatch::<A>)
    }

    /// Writes `value` into the entry. Writing a value equal to the current one is a no-op,
    /// and writing back the value the entry was read with clears the pending write.
    pub(crate) fn set<A: Stored>(&mut self, value: A) -> Result<(), Defect> {
        let current = self.current();
        if !current.as_any().is::<A>() {
            return Err(Defect::type_mismatch::<A>());
        }
        if current.same_value(&value) {
            return Ok(());
        }
        if self.expected.stored().same_value(&value) {
            self.new_value = None;
            return Ok(());
        }
        self.new_value = Some(Box::new(value));
        Ok(())
    }

    pub(crate) fn pending(&self) -> Option<Box<dyn Stored>> {
        self.new_value.as_ref().map(|value| value.clone_boxed())
    }

    pub(crate) fn restore(&mut self, pending: Option<Box<dyn Stored>>) {
        self.new_value = pending;
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_changed(&self) -> bool {
        self.new_value.is_some()
    }

    /// `true` while the cell still holds the version this entry was created from.
    pub fn is_valid(&self) -> bool {
        self.cell.versioned().is_same_version(&self.expected)
    }

    pub fn is_invalid(&self) -> bool {
        !self.is_valid()
    }

    pub(crate) fn cell(&self) -> &Arc<AtomicCell> {
        &self.cell
    }

    /// Publishes the pending value, if any, as a fresh version of the cell. Returns `true`
    /// if the cell was written.
    pub(crate) fn commit(&mut self) -> bool {
        match self.new_value.take() {
            Some(value) => {
                self.cell.replace(Versioned::from_boxed(value));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_equal_value_is_noop() {
        let cell = AtomicCell::new(Versioned::new(String::from("a")));
        let mut entry = Entry::new(cell, false);

        entry.set(String::from("a")).expect("same type");
        assert!(!entry.is_changed());

        entry.set(String::from("b")).expect("same type");
        assert!(entry.is_changed());
        assert_eq!(entry.get::<String>(), Ok("b".to_string()));

        entry.set(String::from("a")).expect("same type");
        assert_eq!(entry.get::<String>(), Ok("a".to_string()));
        assert!(!entry.is_changed());
    }

    #[test]
    fn test_writing_back_the_read_value_publishes_nothing() {
        let cell = AtomicCell::new(Versioned::new(5u32));
        let mut entry = Entry::new(cell.clone(), false);
        let observer = Entry::new(cell.clone(), false);

        entry.set(6u32).expect("same type");
        entry.set(7u32).expect("same type");
        entry.set(5u32).expect("same type");

        assert!(!entry.commit());
        assert!(observer.is_valid());
        assert_eq!(cell.versioned().downcast::<u32>(), Some(&5));
    }

    #[test]
    fn test_wrong_type_is_a_defect() {
        let cell = AtomicCell::new(Versioned::new(1u8));
        let mut entry = Entry::new(cell, false);

        assert!(matches!(entry.get::<u16>(), Err(Defect::TypeMismatch(_))));
        assert!(matches!(entry.set(1u16), Err(Defect::TypeMismatch(_))));
        assert!(!entry.is_changed());
    }

    #[test]
    fn test_commit_replaces_version() {
        let cell = AtomicCell::new(Versioned::new(1u64));
        let mut entry = Entry::new(cell.clone(), false);
        let observer = Entry::new(cell.clone(), false);

        assert!(!entry.commit());
        assert!(observer.is_valid());

        entry.set(2u64).expect("same type");
        assert!(entry.commit());
        assert!(observer.is_invalid());
        assert!(!entry.is_changed());
        assert_eq!(cell.versioned().downcast::<u64>(), Some(&2));
    }
}
