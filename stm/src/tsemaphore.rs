// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::{error::Cause, stm::Stm, tref::TRef};
use log::*;
use std::{convert::Infallible, future::Future};

/// A counting semaphore whose permits live in a transactional reference. Acquiring more
/// permits than available retries until enough are released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TSemaphore {
    permits: TRef<usize>,
}

impl TSemaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: TRef::new(permits),
        }
    }

    pub fn make<R, E>(permits: usize) -> Stm<R, E, TSemaphore>
    where
        R: 'static,
        E: Send + 'static,
    {
        TRef::make(permits).map(|permits| TSemaphore { permits })
    }

    pub fn available<R, E>(&self) -> Stm<R, E, usize>
    where
        R: 'static,
        E: Send + 'static,
    {
        self.permits.get()
    }

    pub fn acquire<R, E>(&self) -> Stm<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
    {
        self.acquire_n(1)
    }

    pub fn acquire_n<R, E>(&self, n: usize) -> Stm<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
    {
        let permits = self.permits.clone();
        self.permits.get().chain(move |available| {
            if available >= n {
                permits.set(available - n)
            } else {
                Stm::retry()
            }
        })
    }

    pub fn release<R, E>(&self) -> Stm<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
    {
        self.release_n(1)
    }

    pub fn release_n<R, E>(&self, n: usize) -> Stm<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
    {
        let permits = self.permits.clone();
        self.permits.get().chain(move |available: usize| match available.checked_add(n) {
            Some(total) => permits.set(total),
            None => Stm::halt_message("semaphore permit count overflowed"),
        })
    }

    /// Runs `future` while holding one permit.
    pub async fn with_permit<F: Future>(&self, future: F) -> Result<F::Output, Cause<Infallible>> {
        self.with_permits(1, future).await
    }

    /// Runs `future` while holding `n` permits. The permits are returned when the future
    /// completes or is dropped.
    pub async fn with_permits<F: Future>(&self, n: usize, future: F) -> Result<F::Output, Cause<Infallible>> {
        self.acquire_n::<(), Infallible>(n).commit().await?;
        let _permit = Permit {
            semaphore: self.clone(),
            n,
        };
        Ok(future.await)
    }
}

struct Permit {
    semaphore: TSemaphore,
    n: usize,
}

impl Drop for Permit {
    fn drop(&mut self) {
        match self.semaphore.release_n::<(), Infallible>(self.n).commit().run_sync() {
            Ok(Ok(())) => {}
            Ok(Err(cause)) => error!("releasing {} permit(s) failed: {:?}", self.n, cause),
            Err(err) => error!("releasing {} permit(s) failed: {}", self.n, err),
        }
    }
}
