use crate::global_variables::VEHICLE_CROSS_TIME_SECS;
use crate::simulation_engine::lane::{LaneId, LaneSnapshot, LaneState};

/// Shortest Job First over lane snapshots: the eligible lane with the least
/// estimated drain time wins. Ties go to the lane whose last arrival is
/// oldest, then to the lowest id, so decisions are reproducible.
pub fn pick(snapshots: &[LaneSnapshot]) -> Option<LaneId> {
    let mut best: Option<&LaneSnapshot> = None;

    for snap in snapshots {
        if !is_candidate(snap) {
            continue;
        }
        match best {
            None => best = Some(snap),
            Some(current) => {
                let snap_cost = estimated_time(snap);
                let best_cost = estimated_time(current);
                if snap_cost < best_cost
                    || (snap_cost == best_cost
                        && snap.last_arrival_time < current.last_arrival_time)
                {
                    best = Some(snap);
                }
            }
        }
    }

    best.map(|snap| snap.id)
}

fn is_candidate(snap: &LaneSnapshot) -> bool {
    matches!(snap.state, LaneState::Ready | LaneState::Running)
}

fn estimated_time(snap: &LaneSnapshot) -> u64 {
    snap.queue_len as u64 * VEHICLE_CROSS_TIME_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: LaneId, state: LaneState, queue_len: usize, last_arrival: u64) -> LaneSnapshot {
        LaneSnapshot {
            id,
            state,
            queue_len,
            priority: 5,
            waiting_time: 0,
            last_arrival_time: last_arrival,
            last_service_time: 0,
        }
    }

    #[test]
    fn shortest_queue_wins() {
        let snaps = [
            snap(LaneId::North, LaneState::Ready, 5, 0),
            snap(LaneId::South, LaneState::Ready, 2, 0),
            snap(LaneId::East, LaneState::Ready, 9, 0),
            snap(LaneId::West, LaneState::Waiting, 0, 0),
        ];
        assert_eq!(pick(&snaps), Some(LaneId::South));
    }

    #[test]
    fn tie_breaks_by_oldest_arrival_then_lowest_id() {
        let snaps = [
            snap(LaneId::North, LaneState::Ready, 3, 20),
            snap(LaneId::South, LaneState::Ready, 3, 10),
            snap(LaneId::East, LaneState::Ready, 3, 10),
        ];
        // South and East tie on both cost and arrival; South has the lower id.
        assert_eq!(pick(&snaps), Some(LaneId::South));
    }

    #[test]
    fn equal_arrivals_resolve_to_lowest_id() {
        let snaps = [
            snap(LaneId::North, LaneState::Ready, 1, 0),
            snap(LaneId::South, LaneState::Ready, 1, 0),
            snap(LaneId::East, LaneState::Ready, 1, 0),
            snap(LaneId::West, LaneState::Ready, 1, 0),
        ];
        assert_eq!(pick(&snaps), Some(LaneId::North));
    }

    #[test]
    fn blocked_and_waiting_lanes_are_skipped() {
        let snaps = [
            snap(LaneId::North, LaneState::Blocked, 1, 0),
            snap(LaneId::South, LaneState::Waiting, 0, 0),
        ];
        assert_eq!(pick(&snaps), None);
    }

    #[test]
    fn running_lane_remains_eligible() {
        let snaps = [
            snap(LaneId::North, LaneState::Running, 1, 0),
            snap(LaneId::South, LaneState::Ready, 4, 0),
        ];
        assert_eq!(pick(&snaps), Some(LaneId::North));
    }
}
