// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Commit orchestration.
//!
//! A [`Commit`] runs a transaction tree against fresh journals until one attempt can be
//! published. An attempt that retries suspends the commit: it registers a wake callback on
//! every cell it read and yields until one of those cells is written by another commit.

use crate::{
    clock::FiberId,
    error::{Cause, Defect, TxError},
    journal::{self, Analysis, Journal, Todo},
    scheduler::{Immediate, Scheduler},
    stm::Stm,
    sync::{lock, Mutex},
};
use lazy_static::lazy_static;
use log::*;
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

lazy_static! {
    static ref GLOBAL: Runtime = Runtime::default();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Running,
    Interrupted,
    Done,
}

struct Signals {
    state: CommitState,
    waker: Option<Waker>,
    notified: bool,
}

/// State shared by a commit, its interrupter and the wake callbacks it registered.
struct Shared {
    signals: Mutex<Signals>,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            signals: Mutex::new(Signals {
                state: CommitState::Running,
                waker: None,
                notified: false,
            }),
        })
    }

    fn state(&self) -> CommitState {
        lock(&self.signals).state
    }

    fn finish(&self) -> bool {
        let mut signals = lock(&self.signals);
        if signals.state != CommitState::Running {
            return false;
        }
        signals.state = CommitState::Done;
        signals.waker = None;
        true
    }

    /// Called by a wake callback. Has no effect once the commit left `Running`.
    fn notify(&self) {
        let waker = {
            let mut signals = lock(&self.signals);
            if signals.state != CommitState::Running {
                return;
            }
            signals.notified = true;
            signals.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn interrupt(&self) -> bool {
        let waker = {
            let mut signals = lock(&self.signals);
            if signals.state != CommitState::Running {
                return false;
            }
            signals.state = CommitState::Interrupted;
            signals.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Stores the waker of the polling task and returns the state seen under the same lock.
    /// An interrupt that landed before the waker was stored woke nobody, so the caller must
    /// not park on anything but `Running`.
    fn register(&self, waker: &Waker) -> CommitState {
        let mut signals = lock(&self.signals);
        match &signals.waker {
            Some(current) if current.will_wake(waker) => {}
            _ => signals.waker = Some(waker.clone()),
        }
        signals.state
    }

    fn take_notified(&self) -> bool {
        mem::take(&mut lock(&self.signals).notified)
    }
}

/// Interrupts a running [`Commit`] from the outside.
#[derive(Clone)]
pub struct Interrupter {
    shared: Arc<Shared>,
    fiber_id: FiberId,
}

impl Interrupter {
    /// Moves the commit from `Running` to `Interrupted`. Returns `false` if the commit
    /// already completed or was interrupted before.
    pub fn interrupt(&self) -> bool {
        let interrupted = self.shared.interrupt();
        if interrupted {
            info!("TX({}): INTERRUPT REQUESTED", self.fiber_id);
        }
        interrupted
    }

    pub fn fiber_id(&self) -> FiberId {
        self.fiber_id
    }

    pub fn state(&self) -> CommitState {
        self.shared.state()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("fiber_id", &self.fiber_id)
            .field("state", &self.state())
            .finish()
    }
}

enum Attempt<E, A> {
    Done(Result<A, Cause<E>>),
    Suspend(Journal),
}

/// A pending commit of a transaction. Resolves once an attempt could be published, or the
/// commit was interrupted.
pub struct Commit<E, A> {
    stm: Stm<(), E, A>,
    fiber_id: FiberId,
    scheduler: Arc<dyn Scheduler>,
    shared: Arc<Shared>,
    todo: Todo,
    suspended: Option<Journal>,
    rerun: bool,
    completed: bool,
}

impl<E, A> Commit<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    pub(crate) fn new(stm: Stm<(), E, A>, scheduler: Arc<dyn Scheduler>) -> Self {
        let shared = Shared::new();
        let weak = Arc::downgrade(&shared);
        let todo: Todo = Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.notify();
            }
        });

        Self {
            stm,
            fiber_id: FiberId::new(),
            scheduler,
            shared,
            todo,
            suspended: None,
            rerun: false,
            completed: false,
        }
    }

    pub fn with_fiber_id(mut self, fiber_id: FiberId) -> Self {
        self.fiber_id = fiber_id;
        self
    }

    pub fn with_scheduler<S: Scheduler + 'static>(mut self, scheduler: S) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    pub fn fiber_id(&self) -> FiberId {
        self.fiber_id
    }

    pub fn state(&self) -> CommitState {
        self.shared.state()
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            shared: self.shared.clone(),
            fiber_id: self.fiber_id,
        }
    }

    /// Blocks the current thread until the commit completes.
    pub fn wait(self) -> Result<A, Cause<E>> {
        futures::executor::block_on(self)
    }

    /// Commits without ever suspending. Fails with [`TxError::WouldSuspend`] if the
    /// transaction retries.
    pub fn run_sync(mut self) -> Result<Result<A, Cause<E>>, TxError> {
        match self.attempt() {
            Attempt::Done(result) => {
                self.completed = true;
                Ok(result)
            }
            Attempt::Suspend(_) => Err(TxError::WouldSuspend),
        }
    }

    /// Runs attempts until one completes or retries on a consistent journal.
    fn attempt(&mut self) -> Attempt<E, A> {
        loop {
            if self.shared.state() == CommitState::Interrupted {
                return Attempt::Done(Err(Cause::Interrupt(self.fiber_id)));
            }

            debug!("TX({}): START ATTEMPT", self.fiber_id);
            let mut journal = Journal::new();
            let exit = self.stm.run(&mut journal, self.fiber_id, Arc::new(()));

            if exit.is_retry() {
                if journal.is_invalid() {
                    debug!("TX({}): RETRIED ON STALE READS. RUNNING AGAIN", self.fiber_id);
                    continue;
                }
                return Attempt::Suspend(journal);
            }

            let guard = journal::commit_lock();
            let analysis = journal.analyze();
            if analysis == Analysis::Invalid {
                drop(guard);
                info!("TX({}): VALIDATING JOURNAL FAILED. RUNNING AGAIN", self.fiber_id);
                continue;
            }

            if !self.shared.finish() {
                return Attempt::Done(Err(Cause::Interrupt(self.fiber_id)));
            }

            let mut todos = HashMap::new();
            if analysis == Analysis::ReadWrite {
                todos = match journal.commit(&guard) {
                    Ok(todos) => todos,
                    Err(err) => {
                        error!("TX({}): COMMITTING JOURNAL FAILED: {}", self.fiber_id, err);
                        return Attempt::Done(Err(Cause::Halt(Defect::message(err.to_string()))));
                    }
                };
            }
            drop(guard);
            info!("TX({}): COMMITTED {:?} JOURNAL OF {} CELL(S)", self.fiber_id, analysis, journal.len());

            self.schedule(todos);
            let result = exit
                .into_result()
                .unwrap_or_else(|| Err(Cause::Halt(Defect::message("retry reached the committer"))));
            return Attempt::Done(result);
        }
    }

    fn schedule(&self, todos: HashMap<FiberId, Todo>) {
        if todos.is_empty() {
            return;
        }
        debug!("TX({}): WAKING {} SUSPENDED TRANSACTION(S)", self.fiber_id, todos.len());
        let todos: Vec<Todo> = todos.into_values().collect();
        self.scheduler.schedule(Box::new(move || todos.iter().for_each(|todo| todo())));
    }

    /// Moves the wake registrations to the cells `journal` read. Returns `true` if the
    /// journal went stale meanwhile and the transaction must run again right away.
    fn suspend(&mut self, journal: Journal) -> bool {
        if let Some(previous) = self.suspended.take() {
            for cell in previous.untracked_todo_targets(&journal) {
                cell.remove_todo(self.fiber_id);
            }
        }
        let added = journal.add_todo(self.fiber_id, &self.todo);
        info!(
            "TX({}): SUSPENDED ON {} CELL(S), {} NEW REGISTRATION(S)",
            self.fiber_id,
            journal.len(),
            added
        );

        let stale = journal.is_invalid();
        self.suspended = Some(journal);
        stale
    }

    fn release(&mut self) {
        if let Some(journal) = self.suspended.take() {
            journal.remove_todo(self.fiber_id);
        }
    }
}

impl<E, A> Future for Commit<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    type Output = Result<A, Cause<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.completed {
            return Poll::Ready(Err(Cause::Halt(Defect::message("commit polled after completion"))));
        }

        loop {
            if this.shared.state() == CommitState::Interrupted {
                info!("TX({}): INTERRUPTED", this.fiber_id);
                this.release();
                this.completed = true;
                return Poll::Ready(Err(Cause::Interrupt(this.fiber_id)));
            }

            if this.suspended.is_some() && !this.rerun {
                if this.shared.register(cx.waker()) != CommitState::Running {
                    continue;
                }
                if !this.shared.take_notified() {
                    return Poll::Pending;
                }
                debug!("TX({}): WOKEN UP", this.fiber_id);
            }
            this.rerun = false;

            match this.attempt() {
                Attempt::Done(result) => {
                    this.release();
                    this.completed = true;
                    return Poll::Ready(result);
                }
                Attempt::Suspend(journal) => {
                    this.shared.take_notified();
                    let state = this.shared.register(cx.waker());
                    this.rerun = this.suspend(journal);
                    if !this.rerun && state == CommitState::Running {
                        return Poll::Pending;
                    }
                }
            }
        }
    }
}

impl<E, A> Drop for Commit<E, A> {
    fn drop(&mut self) {
        if let Some(journal) = self.suspended.take() {
            journal.remove_todo(self.fiber_id);
        }
    }
}

impl<E, A> fmt::Debug for Commit<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commit")
            .field("fiber_id", &self.fiber_id)
            .field("state", &self.shared.state())
            .field("suspended", &self.suspended.is_some())
            .finish()
    }
}

/// Commit configuration shared by every transaction committed through it.
#[derive(Clone)]
pub struct Runtime {
    scheduler: Arc<dyn Scheduler>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::with_scheduler(Immediate)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheduler<S: Scheduler + 'static>(scheduler: S) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
        }
    }

    /// The runtime used by [`Stm::commit`].
    ///
    /// It schedules wake callbacks through [`Immediate`], so they run on the committing
    /// thread right after the commit lock is released. A callback only calls
    /// [`Waker::wake`] of the suspended commit, and the woken transaction itself runs later
    /// on its own executor, never inside the committing one. Build a runtime with
    /// [`Runtime::with_scheduler`] to hand the callbacks to an executor instead.
    pub fn global() -> &'static Runtime {
        &GLOBAL
    }

    pub fn commit<E, A>(&self, stm: Stm<(), E, A>) -> Commit<E, A>
    where
        E: Send + 'static,
        A: Send + 'static,
    {
        Commit::new(stm, self.scheduler.clone())
    }
}

impl<E, A> Stm<(), E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    /// Commits the transaction on the global [`Runtime`].
    pub fn commit(self) -> Commit<E, A> {
        Runtime::global().commit(self)
    }

    /// Commits the transaction, blocking the current thread until it completes.
    pub fn commit_blocking(self) -> Result<A, Cause<E>> {
        self.commit().wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tref::TRef;
    use futures::{executor::block_on, FutureExt};
    use std::{
        convert::Infallible,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn test_interrupt_while_suspended() {
        let flag = TRef::new(false);
        let waiting: Stm<(), Infallible, ()> = flag.get().chain(Stm::check);
        let mut commit = waiting.commit();
        let interrupter = commit.interrupter();

        assert!((&mut commit).now_or_never().is_none());
        assert_eq!(flag.cell().pending_todos(), 1);
        assert_eq!(commit.state(), CommitState::Running);

        assert!(interrupter.interrupt());
        assert!(!interrupter.interrupt());
        let fiber_id = commit.fiber_id();
        assert_eq!(block_on(&mut commit), Err(Cause::Interrupt(fiber_id)));
        assert_eq!(flag.cell().pending_todos(), 0);

        // a late write finds no registration and the state stays final
        flag.set::<(), Infallible>(true).commit_blocking().expect("commit");
        assert_eq!(interrupter.state(), CommitState::Interrupted);
    }

    #[test]
    fn test_interrupt_during_first_attempt() {
        let flag = TRef::new(false);
        let slot: Arc<std::sync::Mutex<Option<Interrupter>>> = Arc::new(std::sync::Mutex::new(None));

        let interrupting = slot.clone();
        let waiting: Stm<(), Infallible, ()> = Stm::succeed_with(move || {
            if let Some(interrupter) = interrupting.lock().expect("slot").as_ref() {
                interrupter.interrupt();
            }
        })
        .zip_right(flag.get())
        .chain(Stm::check);

        let mut commit = waiting.commit();
        let fiber_id = commit.fiber_id();
        *slot.lock().expect("slot") = Some(commit.interrupter());

        // no waker is stored yet when the interrupt lands, so the first poll must see it
        assert_eq!((&mut commit).now_or_never(), Some(Err(Cause::Interrupt(fiber_id))));
        assert_eq!(commit.state(), CommitState::Interrupted);
        assert_eq!(flag.cell().pending_todos(), 0);
    }

    #[test]
    fn test_interrupt_racing_the_first_attempt() {
        use std::sync::Barrier;

        let flag = TRef::new(false);
        let barrier = Arc::new(Barrier::new(2));
        let first = Arc::new(std::sync::atomic::AtomicBool::new(true));

        let (entered, first_run) = (barrier.clone(), first.clone());
        let waiting: Stm<(), Infallible, ()> = Stm::succeed_with(move || {
            if first_run.swap(false, Ordering::SeqCst) {
                entered.wait();
                entered.wait();
            }
        })
        .zip_right(flag.get())
        .chain(Stm::check);

        let commit = waiting.commit();
        let fiber_id = commit.fiber_id();
        let interrupter = commit.interrupter();
        let handle = std::thread::spawn(move || block_on(commit));

        barrier.wait();
        assert!(interrupter.interrupt());
        barrier.wait();

        assert_eq!(handle.join().expect("join"), Err(Cause::Interrupt(fiber_id)));
        assert_eq!(flag.cell().pending_todos(), 0);
    }

    #[test]
    fn test_restoring_a_value_does_not_wake_waiters() {
        let flag = TRef::new(0u8);
        let waiting: Stm<(), Infallible, ()> = flag.get().map(|n| n > 0).chain(Stm::check);
        let mut commit = waiting.commit();
        assert!((&mut commit).now_or_never().is_none());

        flag.set::<(), Infallible>(1)
            .zip_right(flag.set(0))
            .commit_blocking()
            .expect("commit");
        assert_eq!(flag.cell().pending_todos(), 1);
        assert!((&mut commit).now_or_never().is_none());

        flag.set::<(), Infallible>(1).commit_blocking().expect("commit");
        assert_eq!((&mut commit).now_or_never(), Some(Ok(())));
    }

    #[test]
    fn test_dropping_a_suspended_commit_deregisters() {
        let flag = TRef::new(0u8);
        let waiting: Stm<(), Infallible, ()> = flag.get().map(|n| n > 0).chain(Stm::check);
        let mut commit = waiting.commit();
        assert!((&mut commit).now_or_never().is_none());
        assert_eq!(flag.cell().pending_todos(), 1);

        drop(commit);
        assert_eq!(flag.cell().pending_todos(), 0);
    }

    #[test]
    fn test_wake_registrations_follow_the_latest_attempt() {
        let selector = TRef::new(0usize);
        let cells: Vec<TRef<bool>> = (0..3).map(|_| TRef::new(false)).collect();

        let (s, c) = (selector.clone(), cells.clone());
        let waiting: Stm<(), Infallible, ()> = s
            .get()
            .chain(move |index| c[index].get())
            .chain(Stm::check);

        let mut commit = waiting.commit();
        assert!((&mut commit).now_or_never().is_none());
        assert_eq!(cells[0].cell().pending_todos(), 1);

        selector.set::<(), Infallible>(2).commit_blocking().expect("commit");
        assert!((&mut commit).now_or_never().is_none());

        assert_eq!(selector.cell().pending_todos(), 1);
        assert_eq!(cells[0].cell().pending_todos(), 0);
        assert_eq!(cells[1].cell().pending_todos(), 0);
        assert_eq!(cells[2].cell().pending_todos(), 1);

        cells[2].set::<(), Infallible>(true).commit_blocking().expect("commit");
        assert_eq!((&mut commit).now_or_never(), Some(Ok(())));
        assert_eq!(selector.cell().pending_todos(), 0);
        assert_eq!(cells[2].cell().pending_todos(), 0);
    }

    #[test]
    fn test_scheduler_receives_wakeups() {
        let scheduled = Arc::new(AtomicUsize::new(0));
        let seen = scheduled.clone();
        let runtime = Runtime::with_scheduler(move |task: crate::scheduler::Task| {
            seen.fetch_add(1, Ordering::SeqCst);
            task()
        });

        let flag = TRef::new(false);
        let waiting: Stm<(), Infallible, ()> = flag.get().chain(Stm::check);
        let mut commit = runtime.commit(waiting);
        assert!((&mut commit).now_or_never().is_none());

        runtime.commit(flag.set::<(), Infallible>(true)).wait().expect("commit");
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(block_on(commit), Ok(()));
    }

    #[test]
    fn test_run_sync() {
        let counter = TRef::new(1u32);
        let result = counter.update_and_get::<(), Infallible, _>(|n| n + 1).commit().run_sync();
        assert_eq!(result, Ok(Ok(2)));

        let retrying: Stm<(), Infallible, ()> = Stm::retry();
        assert_eq!(retrying.commit().run_sync(), Err(TxError::WouldSuspend));
    }

    #[test]
    fn test_fiber_id_reaches_the_transaction() {
        let fiber_id = FiberId::new();
        let stm: Stm<(), Infallible, FiberId> = Stm::fiber_id();
        assert_eq!(stm.commit().with_fiber_id(fiber_id).wait(), Ok(fiber_id));
    }
}
