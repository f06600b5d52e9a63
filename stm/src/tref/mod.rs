// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Transactional references.
//!
//! [`Atomic`] owns a cell. [`Derived`] and [`DerivedAll`] are views over an atomic
//! reference that convert values and errors on the way in and out.

/// Conversions every view supports, expressed through the view's `fold`.
macro_rules! view_combinators {
    ($view:ident) => {
        impl<S, EA, EB, A, B> $view<S, EA, EB, A, B>
        where
            S: Clone + PartialEq + Send + Sync + 'static,
            EA: Send + 'static,
            EB: Send + 'static,
            A: 'static,
            B: Send + 'static,
        {
            pub fn map<D, F>(&self, f: F) -> $view<S, EA, EB, A, D>
            where
                D: Send + 'static,
                F: Fn(B) -> D + Send + Sync + 'static,
            {
                self.fold(|e| e, |e| e, Ok, move |b| Ok(f(b)))
            }

            pub fn map_either<D, F>(&self, f: F) -> $view<S, EA, EB, A, D>
            where
                D: Send + 'static,
                F: Fn(B) -> Result<D, EB> + Send + Sync + 'static,
            {
                self.fold(|e| e, |e| e, Ok, f)
            }

            pub fn contramap<C, F>(&self, f: F) -> $view<S, EA, EB, C, B>
            where
                C: 'static,
                F: Fn(C) -> A + Send + Sync + 'static,
            {
                self.fold(|e| e, |e| e, move |c| Ok(f(c)), Ok)
            }

            pub fn contramap_either<C, F>(&self, f: F) -> $view<S, EA, EB, C, B>
            where
                C: 'static,
                F: Fn(C) -> Result<A, EA> + Send + Sync + 'static,
            {
                self.fold(|e| e, |e| e, f, Ok)
            }

            pub fn dimap<C, D, F, G>(&self, f: F, g: G) -> $view<S, EA, EB, C, D>
            where
                C: 'static,
                D: Send + 'static,
                F: Fn(C) -> A + Send + Sync + 'static,
                G: Fn(B) -> D + Send + Sync + 'static,
            {
                self.fold(|e| e, |e| e, move |c| Ok(f(c)), move |b| Ok(g(b)))
            }

            pub fn dimap_err<EC, ED, F, G>(&self, f: F, g: G) -> $view<S, EC, ED, A, B>
            where
                EC: Send + 'static,
                ED: Send + 'static,
                F: Fn(EA) -> EC + Send + Sync + 'static,
                G: Fn(EB) -> ED + Send + Sync + 'static,
            {
                self.fold(f, g, Ok, Ok)
            }
        }
    };
}

mod atomic;
mod derived;
mod derived_all;

pub use atomic::Atomic;
pub use derived::Derived;
pub use derived_all::DerivedAll;

use crate::{clock::CellId, stm::Stm};
use std::sync::Arc;

/// The common name of a plain transactional reference.
pub type TRef<A> = Atomic<A>;

pub(crate) type Getter<S, EB, B> = Arc<dyn Fn(S) -> Result<B, EB> + Send + Sync>;
pub(crate) type Setter<S, EA, A> = Arc<dyn Fn(A) -> Result<S, EA> + Send + Sync>;
pub(crate) type SetterAll<S, EA, A> = Arc<dyn Fn(A, S) -> Result<S, EA> + Send + Sync>;

fn getter<S, EB, B, F>(f: F) -> Getter<S, EB, B>
where
    F: Fn(S) -> Result<B, EB> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn setter<S, EA, A, F>(f: F) -> Setter<S, EA, A>
where
    F: Fn(A) -> Result<S, EA> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn setter_all<S, EA, A, F>(f: F) -> SetterAll<S, EA, A>
where
    F: Fn(A, S) -> Result<S, EA> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Operations shared by every kind of transactional reference.
pub trait TRefOps<EA, EB, A, B>: Clone + Send + Sync + 'static {
    /// Reads the reference, failing with `EB`.
    fn get<R: 'static>(&self) -> Stm<R, EB, B>;

    /// Writes the reference, failing with `EA`.
    fn set<R: 'static>(&self, value: A) -> Stm<R, EA, ()>;

    /// The underlying cell.
    fn id(&self) -> CellId;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Cause, stm::Ustm};
    use std::convert::Infallible;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Account {
        owner: String,
        balance: u64,
    }

    #[test]
    fn test_atomic_operations() {
        let counter = TRef::new(10u64);

        assert_eq!(counter.get_and_set::<(), Infallible>(5).commit_blocking(), Ok(10));
        assert_eq!(counter.get_and_update::<(), Infallible, _>(|n| n * 2).commit_blocking(), Ok(5));
        assert_eq!(counter.update_and_get::<(), Infallible, _>(|n| n + 1).commit_blocking(), Ok(11));
        assert_eq!(
            counter
                .modify::<(), Infallible, _, _>(|n| (format!("was {}", n), n - 1))
                .commit_blocking(),
            Ok("was 11".to_string())
        );
        assert_eq!(counter.snapshot(), Ok(10));

        let odd_only = |n: &u64| if n % 2 == 1 { Some(n + 1) } else { None };
        assert_eq!(counter.update_some_and_get::<(), Infallible, _>(odd_only).commit_blocking(), Ok(10));
        assert_eq!(counter.get_and_update_some::<(), Infallible, _>(|n| Some(n * 3)).commit_blocking(), Ok(10));
        assert_eq!(
            counter
                .modify_some::<(), Infallible, _, _>("even", |n| (*n > 100).then(|| ("big", 0)))
                .commit_blocking(),
            Ok("even")
        );
        counter.update_some::<(), Infallible, _>(|_| None).commit_blocking().expect("commit");
        assert_eq!(counter.snapshot(), Ok(30));
    }

    #[test]
    fn test_make_inside_transaction() {
        let tref = TRef::make_commit(vec![1, 2, 3]).wait().expect("commit");
        assert_eq!(tref.snapshot(), Ok(vec![1, 2, 3]));

        let stm: Ustm<usize> = TRef::make(String::from("abc"))
            .chain(|tref| tref.update(|s: String| s.repeat(2)).zip_right(tref.get()))
            .map(|s| s.len());
        assert_eq!(stm.commit_blocking(), Ok(6));
    }

    #[test]
    fn test_derived_round_trip() {
        let number = TRef::new(7i64);
        let text = number.fold(
            |s: String| s.parse::<i64>().map_err(|_| format!("not a number: {}", s)),
            |n| Ok::<_, String>(n.to_string()),
        );

        assert_eq!(text.get::<()>().commit_blocking(), Ok("7".to_string()));
        text.set::<()>("42".to_string()).commit_blocking().expect("commit");
        assert_eq!(number.snapshot(), Ok(42));

        let failed = text.set::<()>("x".to_string()).commit_blocking();
        assert_eq!(failed, Err(Cause::Fail("not a number: x".to_string())));
        assert_eq!(number.snapshot(), Ok(42));

        let doubled = number.dimap(|n: i64| n / 2, |n| n * 2);
        doubled.set::<()>(10).commit_blocking().expect("commit");
        assert_eq!(number.snapshot(), Ok(5));
        assert_eq!(doubled.get::<()>().commit_blocking(), Ok(10));
    }

    #[test]
    fn test_derived_all_updates_part_of_the_value() {
        let account = TRef::new(Account {
            owner: "alice".into(),
            balance: 10,
        });
        let balance = account.fold_all(
            |balance: u64, account: Account| Ok::<_, Infallible>(Account { balance, ..account }),
            |account| Ok::<_, Infallible>(account.balance),
        );

        balance.set::<()>(99).commit_blocking().expect("commit");
        assert_eq!(
            account.snapshot(),
            Ok(Account {
                owner: "alice".into(),
                balance: 99
            })
        );

        balance.update::<(), _>(|b| b + 1).commit_blocking().expect("commit");
        assert_eq!(balance.get::<()>().commit_blocking(), Ok(100));

        let label = balance.map(|b| format!("{} units", b));
        assert_eq!(label.get::<()>().commit_blocking(), Ok("100 units".to_string()));
    }

    #[test]
    fn test_derived_fold_all_reads_current_view() {
        let pair = TRef::new((1u8, 2u8));
        let first = pair.map(|(a, _)| a);
        let bumped = first.fold_all(
            |e| e,
            |e| e,
            |e| e,
            |delta: u8, current: u8| Ok((current + delta, 0)),
            Ok,
        );

        bumped.set::<()>(4).commit_blocking().expect("commit");
        assert_eq!(pair.snapshot(), Ok((5, 0)));
    }

    #[test]
    fn test_derived_modify_and_error_mapping() {
        let cents = TRef::new(250u32);
        let euros = cents.dimap(|e: u32| e * 100, |c| c / 100);
        assert_eq!(
            euros.modify::<(), _, _>(|e| (e, e + 1)).commit_blocking(),
            Ok(2)
        );
        assert_eq!(cents.snapshot(), Ok(300));

        let checked = cents
            .fold(
                |v: u32| if v > 0 { Ok(v) } else { Err("zero") },
                Ok::<_, &str>,
            )
            .dimap_err(|e| e.len(), |e| e.len());
        assert_eq!(checked.set::<()>(0).commit_blocking(), Err(Cause::Fail(4)));
    }

    #[test]
    fn test_atomic_contramap_writes_through() {
        let celsius = TRef::new(0i32);
        let fahrenheit = celsius.contramap(|f: i32| (f - 32) * 5 / 9);

        fahrenheit.set::<()>(212).commit_blocking().expect("commit");
        assert_eq!(celsius.snapshot(), Ok(100));
        assert_eq!(fahrenheit.get::<()>().commit_blocking(), Ok(100));

        let labelled = celsius.fold_all(
            |delta: i32, current: i32| Ok::<_, String>(current + delta),
            |c| Ok::<_, String>(format!("{}C", c)),
        );
        labelled.set::<()>(-5).commit_blocking().expect("commit");
        assert_eq!(labelled.get::<()>().commit_blocking(), Ok("95C".to_string()));
    }

    #[test]
    fn test_tref_ops_are_generic() {
        fn read_both<T, U>(a: &T, b: &U) -> Ustm<(u32, u32)>
        where
            T: TRefOps<Infallible, Infallible, u32, u32>,
            U: TRefOps<Infallible, Infallible, u32, u32>,
        {
            a.get().zip(b.get())
        }

        let atomic = TRef::new(3u32);
        let view = atomic.map(|n| n + 1).dimap_err(|e| e, |e| e);
        assert_eq!(TRefOps::id(&view), atomic.id());
        assert_eq!(read_both(&atomic, &view).commit_blocking(), Ok((3, 4)));
    }

    #[test]
    fn test_identity_and_hash() {
        use std::collections::HashSet;

        let a = TRef::new(1u8);
        let b = TRef::new(1u8);
        let set: HashSet<_> = vec![a.clone(), a.clone(), b.clone()].into_iter().collect();

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(set.len(), 2);
    }
}
