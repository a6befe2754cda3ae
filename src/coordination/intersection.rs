use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::coordination::error::AccessError;
use crate::coordination::lock_order::{self, LockRank};
use crate::global_variables::NUM_LANES;
use crate::simulation_engine::lane::LaneId;

/// Occupancy of the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntersectionState {
    pub holder: Option<LaneId>,
    pub active_quadrants: u8,
    pub acquisition_time: u64,
}

impl IntersectionState {
    fn vacant() -> Self {
        Self {
            holder: None,
            active_quadrants: 0,
            acquisition_time: 0,
        }
    }
}

/// Exclusive occupancy lock over the intersection.
///
/// One mutex guards the holder; each lane waits on its own condition
/// variable so a release or an eviction can wake exactly the lanes that care.
/// Every wait re-checks the shutdown flag, which is broadcast on teardown.
pub struct IntersectionLock {
    state: Mutex<IntersectionState>,
    lane_conds: [Condvar; NUM_LANES],
    shutdown: Arc<AtomicBool>,
}

impl IntersectionLock {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            state: Mutex::new(IntersectionState::vacant()),
            lane_conds: [const { Condvar::new() }; NUM_LANES],
            shutdown,
        }
    }

    fn lock(&self) -> lock_order::TrackedGuard<'_, IntersectionState> {
        lock_order::lock(&self.state, LockRank::Intersection)
    }

    /// Blocks until the lane holds the intersection. Fails only when the
    /// simulation shuts down while waiting.
    pub fn acquire(&self, lane: LaneId, quadrants: u8, now: u64) -> Result<(), AccessError> {
        let mut state = self.lock();
        while state.holder.is_some() && state.holder != Some(lane) {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(AccessError::Shutdown);
            }
            state = state.wait(&self.lane_conds[lane.index()]);
        }
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(AccessError::Shutdown);
        }
        state.holder = Some(lane);
        state.active_quadrants = quadrants;
        state.acquisition_time = now;
        Ok(())
    }

    /// Non-blocking acquisition; fails with `Busy` when another lane holds
    /// the intersection.
    pub fn try_acquire(&self, lane: LaneId, quadrants: u8, now: u64) -> Result<(), AccessError> {
        let mut state = self.lock();
        if state.holder.is_some() && state.holder != Some(lane) {
            return Err(AccessError::Busy);
        }
        state.holder = Some(lane);
        state.active_quadrants = quadrants;
        state.acquisition_time = now;
        Ok(())
    }

    /// Vacates the intersection if the lane holds it, waking all waiters.
    pub fn release(&self, lane: LaneId) {
        let mut state = self.lock();
        if state.holder == Some(lane) {
            *state = IntersectionState::vacant();
            self.broadcast();
        } else {
            log::warn!("lane {lane} released an intersection it does not hold");
        }
    }

    /// Forcibly clears the holder regardless of who it is and wakes every
    /// lane. Used by emergency preemption, reset, and shutdown.
    pub fn evict(&self) -> Option<LaneId> {
        let mut state = self.lock();
        let evicted = state.holder.take();
        state.active_quadrants = 0;
        state.acquisition_time = 0;
        self.broadcast();
        evicted
    }

    /// Wakes every lane waiting on the intersection.
    pub fn broadcast(&self) {
        for cond in &self.lane_conds {
            cond.notify_all();
        }
    }

    pub fn holder(&self) -> Option<LaneId> {
        self.lock().holder
    }

    pub fn state(&self) -> IntersectionState {
        *self.lock()
    }

    /// Best-effort view for display threads: skips rather than blocks when
    /// the lock is contended.
    pub fn try_state(&self) -> Option<IntersectionState> {
        lock_order::try_lock(&self.state, LockRank::Intersection).map(|state| *state)
    }
}
