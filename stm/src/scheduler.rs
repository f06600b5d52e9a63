// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Where wake callbacks of suspended transactions run after a commit.

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs the wake callbacks collected by a commit. The commit lock is released before
/// scheduling, so tasks may commit transactions themselves.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task);
}

impl<F> Scheduler for F
where
    F: Fn(Task) + Send + Sync,
{
    fn schedule(&self, task: Task) {
        self(task)
    }
}

/// Runs tasks on the committing thread, right after the commit completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn schedule(&self, task: Task) {
        task()
    }
}

/// Spawns tasks on a tokio runtime.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(feature = "tokio")]
impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn test_immediate_and_closure_schedulers() {
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        Immediate.schedule(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let scheduled = Arc::new(AtomicUsize::new(0));
        let seen = scheduled.clone();
        let scheduler = move |task: Task| {
            seen.fetch_add(1, Ordering::SeqCst);
            task()
        };
        let counter = runs.clone();
        scheduler.schedule(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
