use crate::global_variables::NUM_LANES;
use crate::simulation_engine::lane::{LaneId, LaneSnapshot, LaneState, EMERGENCY_PRIORITY};

/// Queue length above which a lane counts as normal-priority traffic.
const NORMAL_QUEUE_THRESHOLD: usize = 3;

/// A low-priority lane unserved for longer than this is promoted to normal
/// for the decision, in seconds.
const FAIRNESS_WINDOW_SECS: u64 = 30;

/// Priority class of a lane for round-robin purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrafficClass {
    Emergency,
    Normal,
    Low,
}

/// Rotating-cursor bookkeeping for Priority Round Robin. Lives inside the
/// scheduler so it is covered by the scheduler lock.
#[derive(Debug)]
pub struct RoundRobinState {
    cursor: usize,
    last_service: [u64; NUM_LANES],
    service_count: [u64; NUM_LANES],
}

impl RoundRobinState {
    pub fn new() -> Self {
        Self {
            cursor: 0,
            last_service: [0; NUM_LANES],
            service_count: [0; NUM_LANES],
        }
    }

    pub fn last_service(&self, lane: LaneId) -> u64 {
        self.last_service[lane.index()]
    }

    pub fn service_count(&self, lane: LaneId) -> u64 {
        self.service_count[lane.index()]
    }

    fn note_service(&mut self, lane: LaneId, now: u64) {
        self.last_service[lane.index()] = now;
        self.service_count[lane.index()] += 1;
        self.cursor = (lane.index() + 1) % NUM_LANES;
    }
}

impl Default for RoundRobinState {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(state: &RoundRobinState, snap: &LaneSnapshot, now: u64) -> TrafficClass {
    if snap.priority == EMERGENCY_PRIORITY {
        return TrafficClass::Emergency;
    }
    if snap.queue_len > NORMAL_QUEUE_THRESHOLD {
        return TrafficClass::Normal;
    }
    // Fairness override: a starved low lane competes as normal this round.
    let unserved_for = now.saturating_sub(state.last_service[snap.id.index()]);
    if unserved_for > FAIRNESS_WINDOW_SECS {
        return TrafficClass::Normal;
    }
    TrafficClass::Low
}

/// Priority Round Robin decision: classes are consulted Emergency, then
/// Normal, then Low; within a class the rotating cursor picks the next ready
/// lane and advances past it.
pub fn pick(state: &mut RoundRobinState, snapshots: &[LaneSnapshot], now: u64) -> Option<LaneId> {
    let mut classes = [TrafficClass::Low; NUM_LANES];
    let mut eligible = [false; NUM_LANES];
    for snap in snapshots {
        let idx = snap.id.index();
        classes[idx] = classify(state, snap, now);
        eligible[idx] = matches!(snap.state, LaneState::Ready | LaneState::Running);
    }

    for class in [TrafficClass::Emergency, TrafficClass::Normal, TrafficClass::Low] {
        for offset in 0..NUM_LANES {
            let idx = (state.cursor + offset) % NUM_LANES;
            if eligible[idx] && classes[idx] == class {
                let lane = LaneId::from_index(idx).expect("cursor stays within lane range");
                state.note_service(lane, now);
                return Some(lane);
            }
        }
    }

    None
}
