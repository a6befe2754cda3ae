use std::fmt;
use std::sync::{Condvar, Mutex};

use crate::coordination::lock_order::{self, LockRank};
use crate::global_variables::NUM_LANES;
use crate::simulation_engine::queue::VehicleQueue;

/// Compass identity of a lane approaching the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LaneId {
    North = 0,
    South = 1,
    East = 2,
    West = 3,
}

impl LaneId {
    pub const ALL: [LaneId; NUM_LANES] = [LaneId::North, LaneId::South, LaneId::East, LaneId::West];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<LaneId> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaneId::North => "North",
            LaneId::South => "South",
            LaneId::East => "East",
            LaneId::West => "West",
        };
        f.write_str(name)
    }
}

/// Scheduling state of a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    /// Queue empty, nothing to do.
    Waiting,
    /// Vehicles queued, eligible for scheduling.
    Ready,
    /// Currently holds the intersection.
    Running,
    /// Last safety check failed; parked until the next resolution signal.
    Blocked,
}

/// Priority value reserved for emergency service.
pub const EMERGENCY_PRIORITY: u8 = 1;

/// Default priority of a normal lane (lower is more urgent).
pub const NORMAL_PRIORITY: u8 = 5;

#[derive(Debug)]
struct LaneInner {
    state: LaneState,
    queue: VehicleQueue,
    priority: u8,
    last_arrival_time: u64,
    last_service_time: u64,
    total_vehicles_served: u64,
    total_waiting_time: u64,
    requested_quadrants: u8,
    allocated_quadrants: u8,
}

/// One vehicle removed from a lane during a time slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServedVehicle {
    pub vehicle_id: u64,
    /// Seconds between the lane's last arrival and this service.
    pub wait_secs: u64,
}

/// Point-in-time copy of a lane's scheduling-relevant fields. Policies run
/// over snapshots so a scheduling decision never holds more than one lane
/// lock at a time.
#[derive(Debug, Clone, Copy)]
pub struct LaneSnapshot {
    pub id: LaneId,
    pub state: LaneState,
    pub queue_len: usize,
    pub priority: u8,
    pub waiting_time: u64,
    pub last_arrival_time: u64,
    pub last_service_time: u64,
}

/// Per-lane state: one bounded vehicle queue plus the scheduling fields,
/// guarded by a single lock with a condition variable for wakeups.
pub struct Lane {
    id: LaneId,
    inner: Mutex<LaneInner>,
    cond: Condvar,
}

impl Lane {
    pub fn new(id: LaneId, queue_capacity: usize) -> Self {
        Self {
            id,
            inner: Mutex::new(LaneInner {
                state: LaneState::Waiting,
                queue: VehicleQueue::new(queue_capacity),
                priority: NORMAL_PRIORITY,
                last_arrival_time: 0,
                last_service_time: 0,
                total_vehicles_served: 0,
                total_waiting_time: 0,
                requested_quadrants: 0,
                allocated_quadrants: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn id(&self) -> LaneId {
        self.id
    }

    fn lock(&self) -> lock_order::TrackedGuard<'_, LaneInner> {
        lock_order::lock(&self.inner, LockRank::Lane)
    }

    /// Adds a vehicle to the queue. A non-empty queue moves a Waiting lane to
    /// Ready. Returns `false` when the queue is full (overflow counted).
    pub fn enqueue_vehicle(&self, vehicle_id: u64, now: u64) -> bool {
        let mut inner = self.lock();
        let accepted = inner.queue.enqueue(vehicle_id);
        if accepted {
            inner.last_arrival_time = now;
            if inner.state == LaneState::Waiting {
                inner.state = LaneState::Ready;
            }
            self.cond.notify_all();
        }
        accepted
    }

    /// Dequeues one vehicle and credits its wait to the lane counters.
    pub fn serve_one(&self, now: u64) -> Option<ServedVehicle> {
        let mut inner = self.lock();
        let vehicle_id = inner.queue.dequeue()?;
        let wait_secs = now.saturating_sub(inner.last_arrival_time);
        inner.total_vehicles_served += 1;
        inner.total_waiting_time += wait_secs;
        inner.last_service_time = now;
        Some(ServedVehicle {
            vehicle_id,
            wait_secs,
        })
    }

    pub fn state(&self) -> LaneState {
        self.lock().state
    }

    pub fn set_state(&self, state: LaneState) {
        let mut inner = self.lock();
        inner.state = state;
        self.cond.notify_all();
    }

    /// Running lane leaves its slice: Ready when vehicles remain, Waiting
    /// when the queue drained.
    pub fn finish_slice(&self) {
        let mut inner = self.lock();
        if inner.state == LaneState::Running {
            inner.state = if inner.queue.is_empty() {
                LaneState::Waiting
            } else {
                LaneState::Ready
            };
            self.cond.notify_all();
        }
    }

    /// Parks the lane after a failed safety check.
    pub fn mark_blocked(&self) {
        self.set_state(LaneState::Blocked);
    }

    /// Deadlock-resolution signal: a Blocked lane becomes Ready again.
    pub fn resolve_block(&self) {
        let mut inner = self.lock();
        if inner.state == LaneState::Blocked {
            inner.state = LaneState::Ready;
            self.cond.notify_all();
        }
    }

    pub fn priority(&self) -> u8 {
        self.lock().priority
    }

    /// Raises the lane to emergency priority, returning the previous value so
    /// the caller can restore it on clearance.
    pub fn set_emergency_priority(&self) -> u8 {
        let mut inner = self.lock();
        let previous = inner.priority;
        inner.priority = EMERGENCY_PRIORITY;
        self.cond.notify_all();
        previous
    }

    pub fn restore_priority(&self, priority: u8) {
        let mut inner = self.lock();
        inner.priority = priority;
        self.cond.notify_all();
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn set_requested_quadrants(&self, mask: u8) {
        self.lock().requested_quadrants = mask;
    }

    pub fn set_allocated_quadrants(&self, mask: u8) {
        self.lock().allocated_quadrants = mask;
    }

    pub fn requested_quadrants(&self) -> u8 {
        self.lock().requested_quadrants
    }

    pub fn allocated_quadrants(&self) -> u8 {
        self.lock().allocated_quadrants
    }

    /// Seconds since the lane was last serviced; zero while Running.
    pub fn waiting_time(&self, now: u64) -> u64 {
        let inner = self.lock();
        if inner.state == LaneState::Running {
            0
        } else {
            now.saturating_sub(inner.last_service_time)
        }
    }

    /// Mean wait per served vehicle, in seconds.
    pub fn average_wait_time(&self) -> f64 {
        let inner = self.lock();
        if inner.total_vehicles_served == 0 {
            0.0
        } else {
            inner.total_waiting_time as f64 / inner.total_vehicles_served as f64
        }
    }

    pub fn total_vehicles_served(&self) -> u64 {
        self.lock().total_vehicles_served
    }

    /// Cumulative (enqueued, dequeued, overflowed) counts of the queue.
    pub fn queue_counters(&self) -> (u64, u64, u64) {
        let inner = self.lock();
        (
            inner.queue.enqueue_count(),
            inner.queue.dequeue_count(),
            inner.queue.overflow_count(),
        )
    }

    /// Restores the lane to its initial state; used by the reset control.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.queue.clear();
        inner.state = LaneState::Waiting;
        inner.priority = NORMAL_PRIORITY;
        inner.last_arrival_time = 0;
        inner.last_service_time = 0;
        inner.total_vehicles_served = 0;
        inner.total_waiting_time = 0;
        inner.requested_quadrants = 0;
        inner.allocated_quadrants = 0;
        self.cond.notify_all();
    }

    pub fn snapshot(&self, now: u64) -> LaneSnapshot {
        let inner = self.lock();
        let waiting_time = if inner.state == LaneState::Running {
            0
        } else {
            now.saturating_sub(inner.last_service_time)
        };
        LaneSnapshot {
            id: self.id,
            state: inner.state,
            queue_len: inner.queue.len(),
            priority: inner.priority,
            waiting_time,
            last_arrival_time: inner.last_arrival_time,
            last_service_time: inner.last_service_time,
        }
    }
}

impl fmt::Debug for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lane").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_moves_waiting_lane_to_ready() {
        let lane = Lane::new(LaneId::North, 4);
        assert_eq!(lane.state(), LaneState::Waiting);
        assert!(lane.enqueue_vehicle(1, 5));
        assert_eq!(lane.state(), LaneState::Ready);
    }

    #[test]
    fn serve_one_credits_wait_against_last_arrival() {
        let lane = Lane::new(LaneId::East, 4);
        lane.enqueue_vehicle(7, 10);
        let served = lane.serve_one(16).unwrap();
        assert_eq!(served.vehicle_id, 7);
        assert_eq!(served.wait_secs, 6);
        assert_eq!(lane.total_vehicles_served(), 1);
        assert!((lane.average_wait_time() - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn finish_slice_falls_back_by_queue_occupancy() {
        let lane = Lane::new(LaneId::South, 4);
        lane.enqueue_vehicle(1, 0);
        lane.enqueue_vehicle(2, 0);
        lane.set_state(LaneState::Running);
        lane.serve_one(3);
        lane.finish_slice();
        assert_eq!(lane.state(), LaneState::Ready);

        lane.set_state(LaneState::Running);
        lane.serve_one(6);
        lane.finish_slice();
        assert_eq!(lane.state(), LaneState::Waiting);
    }

    #[test]
    fn blocked_lane_resolves_to_ready() {
        let lane = Lane::new(LaneId::West, 4);
        lane.enqueue_vehicle(1, 0);
        lane.mark_blocked();
        assert_eq!(lane.state(), LaneState::Blocked);
        lane.resolve_block();
        assert_eq!(lane.state(), LaneState::Ready);
        // Signalling a lane that is not blocked is a no-op.
        lane.resolve_block();
        assert_eq!(lane.state(), LaneState::Ready);
    }

    #[test]
    fn emergency_priority_round_trip() {
        let lane = Lane::new(LaneId::North, 4);
        let previous = lane.set_emergency_priority();
        assert_eq!(previous, NORMAL_PRIORITY);
        assert_eq!(lane.priority(), EMERGENCY_PRIORITY);
        lane.restore_priority(previous);
        assert_eq!(lane.priority(), NORMAL_PRIORITY);
    }

    #[test]
    fn waiting_time_is_zero_while_running() {
        let lane = Lane::new(LaneId::North, 4);
        lane.enqueue_vehicle(1, 0);
        assert_eq!(lane.waiting_time(12), 12);
        lane.set_state(LaneState::Running);
        assert_eq!(lane.waiting_time(12), 0);
    }

    #[test]
    fn snapshot_reflects_queue_and_state() {
        let lane = Lane::new(LaneId::East, 4);
        lane.enqueue_vehicle(1, 2);
        lane.enqueue_vehicle(2, 3);
        let snap = lane.snapshot(10);
        assert_eq!(snap.id, LaneId::East);
        assert_eq!(snap.state, LaneState::Ready);
        assert_eq!(snap.queue_len, 2);
        assert_eq!(snap.last_arrival_time, 3);
        assert_eq!(snap.waiting_time, 10);
    }
}
