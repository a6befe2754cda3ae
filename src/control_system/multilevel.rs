use crate::global_variables::NUM_LANES;
use crate::simulation_engine::lane::{LaneId, LaneSnapshot, LaneState};

/// Waiting time that earns a one-level promotion, in seconds.
const PROMOTION_THRESHOLD_SECS: u64 = 10;

/// Time stuck in one level before a lane is forced to High, in seconds.
const AGING_THRESHOLD_SECS: u64 = 15;

/// Consecutive quanta at one level before a running lane is demoted.
const DEMOTION_THRESHOLD_RUNS: u32 = 5;

/// Time quantum per level, High to Low, in seconds.
const LEVEL_QUANTA_SECS: [u64; 3] = [2, 4, 6];

/// Feedback-queue level; lower index is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    High = 0,
    Medium = 1,
    Low = 2,
}

impl Level {
    fn promoted(self) -> Level {
        match self {
            Level::High | Level::Medium => Level::High,
            Level::Low => Level::Medium,
        }
    }

    fn demoted(self) -> Level {
        match self {
            Level::High => Level::Medium,
            Level::Medium | Level::Low => Level::Low,
        }
    }

    pub fn quantum_secs(self) -> u64 {
        LEVEL_QUANTA_SECS[self as usize]
    }
}

#[derive(Debug, Clone, Copy)]
struct LaneLevel {
    level: Level,
    consecutive_runs: u32,
    last_level_change: u64,
}

/// Multilevel-feedback bookkeeping for all four lanes. Lives inside the
/// scheduler so every field is covered by the scheduler lock.
#[derive(Debug)]
pub struct MlfqState {
    lanes: [LaneLevel; NUM_LANES],
}

impl MlfqState {
    pub fn new() -> Self {
        Self {
            lanes: [LaneLevel {
                level: Level::Medium,
                consecutive_runs: 0,
                last_level_change: 0,
            }; NUM_LANES],
        }
    }

    pub fn level(&self, lane: LaneId) -> Level {
        self.lanes[lane.index()].level
    }

    fn move_to(&mut self, lane: usize, level: Level, now: u64) {
        let entry = &mut self.lanes[lane];
        entry.level = level;
        entry.last_level_change = now;
        entry.consecutive_runs = 0;
    }

    /// Applies promotion, aging, and demotion rules from the current lane
    /// snapshots.
    fn refresh(&mut self, snapshots: &[LaneSnapshot], now: u64) {
        for snap in snapshots {
            let idx = snap.id.index();

            // Long waits buy one level of promotion.
            if snap.waiting_time > PROMOTION_THRESHOLD_SECS
                && self.lanes[idx].level > Level::High
            {
                let level = self.lanes[idx].level.promoted();
                self.move_to(idx, level, now);
            }

            // Starvation floor: too long at any level forces High.
            let time_in_level = now.saturating_sub(self.lanes[idx].last_level_change);
            if time_in_level > AGING_THRESHOLD_SECS && self.lanes[idx].level > Level::High {
                self.move_to(idx, Level::High, now);
            }

            if snap.state == LaneState::Running {
                self.lanes[idx].consecutive_runs += 1;
                if self.lanes[idx].consecutive_runs > DEMOTION_THRESHOLD_RUNS
                    && self.lanes[idx].level < Level::Low
                {
                    let level = self.lanes[idx].level.demoted();
                    self.move_to(idx, level, now);
                }
            } else {
                self.lanes[idx].consecutive_runs = 0;
            }
        }
    }
}

impl Default for MlfqState {
    fn default() -> Self {
        Self::new()
    }
}

/// Multilevel Feedback Queue decision: refresh levels, then serve the
/// lowest-numbered non-empty level; within a level the longest-waiting lane
/// wins. Also returns the quantum of the winning level.
pub fn pick(state: &mut MlfqState, snapshots: &[LaneSnapshot], now: u64) -> (Option<LaneId>, u64) {
    state.refresh(snapshots, now);

    for level in [Level::High, Level::Medium, Level::Low] {
        let mut best: Option<&LaneSnapshot> = None;
        for snap in snapshots {
            if !matches!(snap.state, LaneState::Ready | LaneState::Running) {
                continue;
            }
            if state.level(snap.id) != level {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => snap.waiting_time > current.waiting_time,
            };
            if better {
                best = Some(snap);
            }
        }
        if let Some(snap) = best {
            return (Some(snap.id), level.quantum_secs());
        }
    }

    (None, Level::Medium.quantum_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: LaneId, state: LaneState, queue_len: usize, waiting: u64) -> LaneSnapshot {
        LaneSnapshot {
            id,
            state,
            queue_len,
            priority: 5,
            waiting_time: waiting,
            last_arrival_time: 0,
            last_service_time: 0,
        }
    }

    #[test]
    fn lanes_start_at_medium_with_four_second_quantum() {
        let mut state = MlfqState::new();
        let snaps = [snap(LaneId::North, LaneState::Ready, 2, 0)];
        let (lane, quantum) = pick(&mut state, &snaps, 0);
        assert_eq!(lane, Some(LaneId::North));
        assert_eq!(quantum, 4);
    }

    #[test]
    fn long_wait_promotes_one_level() {
        let mut state = MlfqState::new();
        let snaps = [
            snap(LaneId::North, LaneState::Ready, 2, 11),
            snap(LaneId::South, LaneState::Ready, 2, 3),
        ];
        let (lane, quantum) = pick(&mut state, &snaps, 11);
        assert_eq!(lane, Some(LaneId::North));
        assert_eq!(state.level(LaneId::North), Level::High);
        assert_eq!(state.level(LaneId::South), Level::Medium);
        assert_eq!(quantum, 2);
    }

    #[test]
    fn aging_forces_low_lane_to_high() {
        let mut state = MlfqState::new();
        // Park East at Low, then let it sit past the aging threshold.
        state.move_to(LaneId::East.index(), Level::Low, 0);
        let snaps = [
            snap(LaneId::North, LaneState::Ready, 4, 2),
            snap(LaneId::East, LaneState::Ready, 1, 9),
        ];
        let (lane, _) = pick(&mut state, &snaps, 16);
        assert_eq!(state.level(LaneId::East), Level::High);
        assert_eq!(lane, Some(LaneId::East));
    }

    #[test]
    fn sustained_running_demotes_after_threshold() {
        let mut state = MlfqState::new();
        let running = [snap(LaneId::South, LaneState::Running, 6, 0)];
        for tick in 0..=DEMOTION_THRESHOLD_RUNS as u64 {
            pick(&mut state, &running, tick);
        }
        assert_eq!(state.level(LaneId::South), Level::Low);
    }

    #[test]
    fn consecutive_runs_reset_when_not_running() {
        let mut state = MlfqState::new();
        let running = [snap(LaneId::West, LaneState::Running, 3, 0)];
        for tick in 0..3 {
            pick(&mut state, &running, tick);
        }
        let idle = [snap(LaneId::West, LaneState::Ready, 3, 0)];
        pick(&mut state, &idle, 4);
        assert_eq!(state.lanes[LaneId::West.index()].consecutive_runs, 0);
        assert_eq!(state.level(LaneId::West), Level::Medium);
    }

    #[test]
    fn within_level_longest_wait_wins() {
        let mut state = MlfqState::new();
        let snaps = [
            snap(LaneId::North, LaneState::Ready, 2, 4),
            snap(LaneId::South, LaneState::Ready, 8, 7),
            snap(LaneId::East, LaneState::Blocked, 8, 9),
        ];
        let (lane, _) = pick(&mut state, &snaps, 7);
        assert_eq!(lane, Some(LaneId::South));
    }
}
