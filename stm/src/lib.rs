// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # Composable Software Transactional Memory
//!
//! Transactions are built as values of type [`Stm<R, E, A>`] and run optimistically
//! against a private [`journal::Journal`]. When an attempt finishes, the journal is
//! validated under a global commit lock. If every cell it read still holds the version
//! it saw, the writes are published at once. Otherwise the attempt is thrown away and
//! the transaction runs again. A transaction that calls [`Stm::retry`] suspends until one
//! of the cells it read is changed by another commit.
//!
//! ```
//! use effect_stm::{Stm, TRef};
//! use std::convert::Infallible;
//!
//! let alice = TRef::new(100u64);
//! let bob = TRef::new(0u64);
//!
//! let (from, to) = (alice.clone(), bob.clone());
//! let transfer: Stm<(), &str, ()> = from.get().chain(move |balance| {
//!     if balance < 30 {
//!         return Stm::fail("insufficient funds");
//!     }
//!     from.set(balance - 30).zip_right(to.update(|b| b + 30))
//! });
//!
//! assert_eq!(transfer.commit_blocking(), Ok(()));
//! assert_eq!(alice.snapshot(), Ok(70));
//! assert_eq!(bob.get::<(), Infallible>().commit_blocking(), Ok(30));
//! ```

pub mod clock;
pub mod commit;
pub mod error;
pub mod journal;
pub mod scheduler;
pub mod stm;
pub mod sync;
pub mod tfuture;
pub mod tref;
pub mod tsemaphore;

pub use clock::FiberId;
pub use commit::{Commit, CommitState, Interrupter, Runtime};
pub use error::{Cause, Defect, TxError};
pub use scheduler::{Immediate, Scheduler};
pub use stm::{Either, Stm, TExit, Ustm};
pub use tfuture::TFuture;
pub use tref::{Atomic, Derived, DerivedAll, TRef, TRefOps};
pub use tsemaphore::TSemaphore;

#[cfg(feature = "tokio")]
pub use scheduler::TokioScheduler;

/// Commits `stm` on the global [`Runtime`].
pub fn atomically<E, A>(stm: Stm<(), E, A>) -> Commit<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    stm.commit()
}
