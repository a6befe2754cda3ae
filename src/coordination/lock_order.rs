//! Debug-mode lock-order tracker.
//!
//! The system-wide acquisition order is: metrics (1) before scheduler (2)
//! before banker (3) before intersection (4) before lane (5). A thread may
//! hold any prefix of that chain but must never take a lower-ranked lock
//! while holding a higher-ranked one. In debug builds every component locks
//! through [`lock`]/[`try_lock`], and a violation panics with the offending
//! pair so tests catch ordering bugs at the call site. Release builds
//! compile the bookkeeping away.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Rank of each lock in the global acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockRank {
    Metrics = 1,
    Scheduler = 2,
    Banker = 3,
    Intersection = 4,
    Lane = 5,
}

/// Marker for a rank held by this thread; released on drop.
#[must_use]
pub struct HeldRank {
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    rank: LockRank,
}

/// Records the rank as held for the lifetime of the returned marker. Must be
/// taken *before* blocking on the corresponding mutex.
pub fn check(rank: LockRank) -> HeldRank {
    #[cfg(debug_assertions)]
    tracker::push(rank);
    HeldRank { rank }
}

impl Drop for HeldRank {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        tracker::pop(self.rank);
    }
}

/// A `MutexGuard` paired with its rank marker, so the rank stays registered
/// exactly as long as the lock is held.
pub struct TrackedGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    rank: HeldRank,
}

impl<'a, T> TrackedGuard<'a, T> {
    /// Condition-variable wait that keeps the rank registered across the
    /// park/reacquire cycle.
    pub fn wait(self, cond: &Condvar) -> TrackedGuard<'a, T> {
        let TrackedGuard { guard, rank } = self;
        let guard = cond.wait(guard).unwrap();
        TrackedGuard { guard, rank }
    }
}

impl<T> Deref for TrackedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for TrackedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Locks the mutex under the given rank.
pub fn lock<'a, T>(mutex: &'a Mutex<T>, rank: LockRank) -> TrackedGuard<'a, T> {
    let rank = check(rank);
    TrackedGuard {
        guard: mutex.lock().unwrap(),
        rank,
    }
}

/// Non-blocking variant for best-effort readers.
pub fn try_lock<'a, T>(mutex: &'a Mutex<T>, rank: LockRank) -> Option<TrackedGuard<'a, T>> {
    let rank = check(rank);
    mutex
        .try_lock()
        .ok()
        .map(|guard| TrackedGuard { guard, rank })
}

#[cfg(debug_assertions)]
mod tracker {
    use super::LockRank;
    use std::cell::RefCell;

    thread_local! {
        static HELD: RefCell<Vec<LockRank>> = const { RefCell::new(Vec::new()) };
    }

    pub(super) fn push(rank: LockRank) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(&highest) = held.iter().max() {
                // Equal ranks stay legal: lane locks are taken one after
                // another, never nested out of order.
                assert!(
                    rank >= highest,
                    "lock order violation: acquiring {rank:?} while holding {highest:?}"
                );
            }
            held.push(rank);
        });
    }

    pub(super) fn pop(rank: LockRank) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&r| r == rank) {
                held.remove(pos);
            }
        });
    }
}
