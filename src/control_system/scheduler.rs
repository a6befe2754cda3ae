use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::control_system::multilevel::MlfqState;
use crate::control_system::priority_rr::RoundRobinState;
use crate::control_system::{multilevel, priority_rr, sjf};
use crate::coordination::lock_order::{self, LockRank};
use crate::global_variables::{
    DEFAULT_TIME_QUANTUM_SECS, EXECUTION_HISTORY_CAPACITY, NUM_LANES, VEHICLE_CROSS_TIME_SECS,
};
use crate::simulation_engine::lane::{Lane, LaneId, LaneSnapshot, LaneState, ServedVehicle};

/// Lane-selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Algorithm {
    /// Shortest Job First.
    #[default]
    Sjf,
    /// Multilevel Feedback Queue.
    Mlfq,
    /// Priority Round Robin.
    Prr,
}

impl Algorithm {
    pub fn display_name(self) -> &'static str {
        match self {
            Algorithm::Sjf => "Shortest Job First",
            Algorithm::Mlfq => "Multilevel Feedback Queue",
            Algorithm::Prr => "Priority Round Robin",
        }
    }

    /// Maps the interactive `switch-algorithm(1..3)` control.
    pub fn from_control_digit(digit: u8) -> Option<Algorithm> {
        match digit {
            1 => Some(Algorithm::Sjf),
            2 => Some(Algorithm::Mlfq),
            3 => Some(Algorithm::Prr),
            _ => None,
        }
    }
}

/// One completed time slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub lane_id: LaneId,
    pub start: u64,
    pub end: u64,
    pub duration: u64,
    pub vehicles_processed: u32,
}

/// Result of running one time slice: the record for the history ring plus
/// the vehicles served, so the caller can credit metrics without holding any
/// scheduler state.
#[derive(Debug)]
pub struct SliceOutcome {
    pub record: ExecutionRecord,
    pub served: Vec<ServedVehicle>,
}

struct SchedulerInner {
    algorithm: Algorithm,
    time_quantum_secs: u64,
    context_switch_time: Duration,
    current_lane: Option<LaneId>,
    history: VecDeque<ExecutionRecord>,
    total_context_switches: u64,
    last_schedule_time: u64,
    mlfq: MlfqState,
    rr: RoundRobinState,
}

/// Policy dispatch, context-switch accounting, and the execution-history
/// ring, all under one lock.
pub struct Scheduler {
    inner: Mutex<SchedulerInner>,
}

impl Scheduler {
    pub fn new(algorithm: Algorithm, context_switch_time: Duration) -> Self {
        Self {
            inner: Mutex::new(SchedulerInner {
                algorithm,
                time_quantum_secs: DEFAULT_TIME_QUANTUM_SECS,
                context_switch_time,
                current_lane: None,
                history: VecDeque::with_capacity(EXECUTION_HISTORY_CAPACITY),
                total_context_switches: 0,
                last_schedule_time: 0,
                mlfq: MlfqState::new(),
                rr: RoundRobinState::new(),
            }),
        }
    }

    fn lock(&self) -> lock_order::TrackedGuard<'_, SchedulerInner> {
        lock_order::lock(&self.inner, LockRank::Scheduler)
    }

    /// Picks the next lane to serve and performs context-switch accounting
    /// when the decision moves away from the current lane.
    ///
    /// The incoming lane is *not* transitioned to Running here; it only
    /// starts running once the access manager has granted the intersection,
    /// so occupancy and the Running state never disagree.
    pub fn schedule_next_lane(&self, lanes: &[Arc<Lane>; NUM_LANES], now: u64) -> Option<LaneId> {
        let mut inner = self.lock();

        let snapshots: [LaneSnapshot; NUM_LANES] =
            [0, 1, 2, 3].map(|i| lanes[i].snapshot(now));

        let next = match inner.algorithm {
            Algorithm::Sjf => sjf::pick(&snapshots),
            Algorithm::Mlfq => {
                let (pick, quantum) = multilevel::pick(&mut inner.mlfq, &snapshots, now);
                inner.time_quantum_secs = quantum;
                pick
            }
            Algorithm::Prr => priority_rr::pick(&mut inner.rr, &snapshots, now),
        };

        if let Some(next_lane) = next {
            if inner.current_lane != Some(next_lane) {
                if let Some(outgoing) = inner.current_lane {
                    lanes[outgoing.index()].finish_slice();
                }
                inner.current_lane = Some(next_lane);
                inner.total_context_switches += 1;
                // Modelled switch overhead; decisions serialize behind it.
                if !inner.context_switch_time.is_zero() {
                    thread::sleep(inner.context_switch_time);
                }
            }
        }

        inner.last_schedule_time = now;
        next
    }

    /// Runs one time slice on a lane that already holds the intersection:
    /// one vehicle per crossing time until the quantum is spent or the queue
    /// drains. Returns the record and the served vehicles; the caller files
    /// the record with [`record_execution`](Self::record_execution) after
    /// crediting metrics.
    pub fn execute_time_slice(
        &self,
        lane: &Lane,
        quantum_secs: u64,
        start: u64,
        pace: Duration,
    ) -> SliceOutcome {
        lane.set_state(LaneState::Running);

        let capacity = (quantum_secs / VEHICLE_CROSS_TIME_SECS).max(1);
        let mut served = Vec::new();
        let mut elapsed = 0u64;

        while (served.len() as u64) < capacity {
            match lane.serve_one(start + elapsed) {
                Some(vehicle) => {
                    served.push(vehicle);
                    elapsed += VEHICLE_CROSS_TIME_SECS;
                    if !pace.is_zero() {
                        thread::sleep(pace);
                    }
                }
                None => break,
            }
        }

        let end = start + elapsed.min(quantum_secs);
        let record = ExecutionRecord {
            lane_id: lane.id(),
            start,
            end,
            duration: end - start,
            vehicles_processed: served.len() as u32,
        };

        lane.finish_slice();
        SliceOutcome { record, served }
    }

    /// Appends a record to the history ring, evicting the oldest entry once
    /// the ring is full.
    pub fn record_execution(&self, record: ExecutionRecord) {
        let mut inner = self.lock();
        if inner.history.len() == EXECUTION_HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(record);
    }

    /// Copies the history under the lock; callers iterate the copy.
    pub fn history_snapshot(&self) -> Vec<ExecutionRecord> {
        let inner = self.lock();
        inner.history.iter().copied().collect()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.lock().algorithm
    }

    /// Switches policy; the current lane is forgotten so the next decision
    /// starts fresh.
    pub fn set_algorithm(&self, algorithm: Algorithm) {
        let mut inner = self.lock();
        if inner.algorithm != algorithm {
            log::info!("scheduling algorithm -> {}", algorithm.display_name());
            inner.algorithm = algorithm;
            inner.current_lane = None;
        }
    }

    pub fn time_quantum_secs(&self) -> u64 {
        self.lock().time_quantum_secs
    }

    pub fn set_time_quantum_secs(&self, quantum: u64) {
        self.lock().time_quantum_secs = quantum;
    }

    pub fn current_lane(&self) -> Option<LaneId> {
        self.lock().current_lane
    }

    /// Forgets the current lane, e.g. after a failed acquisition or an
    /// emergency eviction.
    pub fn clear_current_lane(&self) {
        self.lock().current_lane = None;
    }

    pub fn total_context_switches(&self) -> u64 {
        self.lock().total_context_switches
    }

    /// Total modelled switch overhead so far, in milliseconds.
    pub fn context_switch_overhead_ms(&self) -> u128 {
        let inner = self.lock();
        inner.total_context_switches as u128 * inner.context_switch_time.as_millis()
    }

    /// Derived analysis over the history ring: vehicles per minute across
    /// the given period.
    pub fn throughput_per_minute(&self, period_secs: u64) -> f64 {
        if period_secs == 0 {
            return 0.0;
        }
        let total: u64 = self
            .history_snapshot()
            .iter()
            .map(|record| record.vehicles_processed as u64)
            .sum();
        total as f64 / (period_secs as f64 / 60.0)
    }

    /// Restores initial scheduling state, keeping the configured policy.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.time_quantum_secs = DEFAULT_TIME_QUANTUM_SECS;
        inner.current_lane = None;
        inner.history.clear();
        inner.total_context_switches = 0;
        inner.last_schedule_time = 0;
        inner.mlfq = MlfqState::new();
        inner.rr = RoundRobinState::new();
    }
}
