// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use effect_stm::{Cause, Stm, TRef, Ustm};
use rand::{distributions::Bernoulli, prelude::Distribution, Rng};
use std::{
    collections::HashSet,
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
};
use threadpool::ThreadPool;

#[allow(unused_imports)]
use log::*;

#[cfg(test)]
#[ctor::ctor]
/// This function will be run before any of the tests
fn init_logger() {
    let level = if cfg!(feature = "verbose") {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    let _ = env_logger::builder().is_test(true).filter_level(level).try_init();
}

#[test]
fn test_stm_basic() {
    let bank_alice = TRef::new(10usize);
    let bank_bob = TRef::new(100usize);
    let bank_charly = TRef::new(0usize);

    let (ba, bb, bc) = (bank_alice.clone(), bank_bob.clone(), bank_charly.clone());

    let transfer_bob_charly = 30;
    let alice_bonus = 40;
    let transaction: Ustm<()> = ba
        .update(move |amt| amt + alice_bonus)
        .zip_right(bb.update(move |amt| amt - transfer_bob_charly))
        .zip_right(bc.update(move |amt| amt + transfer_bob_charly));

    assert!(transaction.commit_blocking().is_ok(), "Transaction failed");

    assert_eq!(bank_alice.snapshot(), Ok(50));
    assert_eq!(bank_bob.snapshot(), Ok(70));
    assert_eq!(bank_charly.snapshot(), Ok(30));
}

#[test]
fn test_stm_threaded_increments() {
    let runs = 1000;
    let counter = TRef::new(0usize);
    let pool = ThreadPool::new(8);

    for _ in 0..runs {
        let counter = counter.clone();
        pool.execute(move || {
            let result = counter.update::<(), Infallible, _>(|n| n + 1).commit_blocking();
            assert!(result.is_ok(), "Failed to run transaction");
        });
    }
    pool.join();

    assert_eq!(pool.panic_count(), 0);
    assert_eq!(counter.snapshot(), Ok(runs));
}

#[test]
fn test_stm_threaded_set() {
    let entries: usize = 1000;

    // bernoulli distribution over reads vs read/write transactions
    let distribution = Bernoulli::new(0.7).expect("valid probability");

    let mut expected: HashSet<String> = (0..entries).map(|e: usize| format!("{:04}", e)).collect();

    let set: TRef<HashSet<String>> = TRef::new(HashSet::new());
    let pool = ThreadPool::new(8);

    let mut removal = HashSet::new();

    for value in expected.iter() {
        let set = set.clone();
        let value = value.clone();
        let read_only = distribution.sample(&mut rand::thread_rng());

        // We store the value that won't be written
        if read_only {
            removal.insert(value.clone());
        }

        pool.execute(move || {
            let result = if read_only {
                set.get::<(), Infallible>().map(|inner| inner.len()).commit_blocking()
            } else {
                set.update_and_get::<(), Infallible, _>(move |mut inner| {
                    inner.insert(value.clone());
                    inner
                })
                .map(|inner| inner.len())
                .commit_blocking()
            };
            assert!(result.is_ok(), "Failed to run transaction");
        });
    }

    // synchronized all running worker threads
    pool.join();
    assert_eq!(pool.panic_count(), 0);

    for value in removal.iter() {
        expected.remove(value);
    }

    let actual = set.snapshot().expect("typed snapshot");
    assert!(
        expected == actual,
        "Actual collection is not equal to expected collection: missing {:?}",
        expected.symmetric_difference(&actual)
    );
}

#[test]
fn test_transfers_preserve_total() {
    const TOTAL: i64 = 1000;
    let accounts: Vec<TRef<i64>> = vec![TRef::new(TOTAL), TRef::new(0), TRef::new(0)];
    let pool = ThreadPool::new(8);
    let torn_reads = Arc::new(AtomicUsize::new(0));

    for round in 0..400 {
        let accounts = accounts.clone();
        let torn_reads = torn_reads.clone();

        pool.execute(move || {
            let mut rng = rand::thread_rng();
            if round % 3 == 0 {
                let sum: Ustm<i64> = Stm::for_each(accounts.clone(), |account: TRef<i64>| account.get())
                    .map(|balances| balances.iter().sum());
                if sum.commit_blocking() != Ok(TOTAL) {
                    torn_reads.fetch_add(1, Ordering::SeqCst);
                }
            } else {
                let from = accounts[rng.gen_range(0..accounts.len())].clone();
                let to = accounts[rng.gen_range(0..accounts.len())].clone();
                let amount = rng.gen_range(1..50);

                let transfer: Stm<(), &str, ()> = from.get().chain(move |balance| {
                    if balance < amount {
                        return Stm::fail("insufficient funds");
                    }
                    from.set(balance - amount).zip_right(to.update(move |b| b + amount))
                });
                match transfer.commit_blocking() {
                    Ok(()) | Err(Cause::Fail("insufficient funds")) => {}
                    Err(cause) => panic!("unexpected outcome {:?}", cause),
                }
            }
        });
    }
    pool.join();

    assert_eq!(pool.panic_count(), 0);
    assert_eq!(torn_reads.load(Ordering::SeqCst), 0);
    let total: i64 = accounts.iter().map(|a| a.snapshot().expect("typed snapshot")).sum();
    assert_eq!(total, TOTAL);
}

#[test]
fn test_failed_validation_discards_writes() {
    let x = TRef::new(0u32);
    let y = TRef::new(0u32);
    let attempts = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(2));

    let writer = {
        let (x, y, barrier) = (x.clone(), y.clone(), barrier.clone());
        std::thread::spawn(move || {
            barrier.wait();
            x.set::<(), Infallible>(1).commit_blocking().expect("commit");
            // the stale attempt has not published anything
            assert_eq!(y.snapshot(), Ok(0));
            barrier.wait();
        })
    };

    let (y1, counter) = (y.clone(), attempts.clone());
    let transaction: Ustm<u32> = x.get().zip(y.get()).chain(move |(x_value, y_value)| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            barrier.wait();
            barrier.wait();
        }
        y1.set(x_value + y_value + 1).as_value(x_value)
    });

    assert_eq!(transaction.commit_blocking(), Ok(1));
    writer.join().expect("Failed to join writer thread");

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(y.snapshot(), Ok(2));
}

#[test]
fn test_multiple_readers_single_writer_single_thread() {
    const EXPECTED: usize = 15usize;

    let tvar = TRef::new(6usize);
    tvar.update::<(), Infallible, _>(|data| data + 9)
        .commit_blocking()
        .expect("commit");

    for _ in 0..10000 {
        let read: Stm<(), usize, ()> = tvar.get().chain(|data| {
            if data == EXPECTED {
                Stm::succeed(())
            } else {
                Stm::fail(data)
            }
        });
        assert!(read.commit_blocking().is_ok());
    }

    assert_eq!(tvar.snapshot(), Ok(EXPECTED));
}

#[test]
fn test_deep_transaction_commits() {
    let counter = TRef::new(0u64);
    let mut transaction: Ustm<()> = Stm::succeed(());
    for _ in 0..50_000 {
        transaction = transaction.zip_right(counter.update(|n| n + 1));
    }

    assert_eq!(transaction.commit_blocking(), Ok(()));
    assert_eq!(counter.snapshot(), Ok(50_000));
}
