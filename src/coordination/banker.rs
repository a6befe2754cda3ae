use std::fmt;
use std::sync::Mutex;

use crate::coordination::error::AccessError;
use crate::coordination::lock_order::{self, LockRank};
use crate::global_variables::{NUM_LANES, NUM_QUADRANTS};
use crate::simulation_engine::lane::LaneId;

/// One of the four mutually exclusive intersection quadrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrant {
    NorthEast = 0,
    NorthWest = 1,
    SouthWest = 2,
    SouthEast = 3,
}

impl Quadrant {
    pub const ALL: [Quadrant; NUM_QUADRANTS] = [
        Quadrant::NorthEast,
        Quadrant::NorthWest,
        Quadrant::SouthWest,
        Quadrant::SouthEast,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bit(self) -> u8 {
        1 << self.index()
    }
}

impl fmt::Display for Quadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quadrant::NorthEast => "NE",
            Quadrant::NorthWest => "NW",
            Quadrant::SouthWest => "SW",
            Quadrant::SouthEast => "SE",
        };
        f.write_str(name)
    }
}

/// Unit vector of quadrant demand, one 0/1 cell per quadrant.
pub type QuadrantVec = [u8; NUM_QUADRANTS];

/// Turn movement a lane performs while crossing. Each movement consumes a
/// fixed subset of quadrants depending on the approach lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Straight,
    Left,
    Right,
    UTurn,
}

impl Movement {
    /// The quadrants this movement consumes from the given approach lane.
    pub fn claim(self, lane: LaneId) -> QuadrantVec {
        use LaneId::*;
        use Quadrant::*;
        let quads: &[Quadrant] = match (self, lane) {
            (Movement::Straight, North) => &[SouthEast],
            (Movement::Straight, South) => &[NorthWest],
            (Movement::Straight, East) => &[NorthWest],
            (Movement::Straight, West) => &[SouthEast],
            (Movement::Left, North) => &[SouthWest, SouthEast],
            (Movement::Left, South) => &[NorthEast, NorthWest],
            (Movement::Left, East) => &[NorthEast, SouthEast],
            (Movement::Left, West) => &[NorthWest, SouthWest],
            (Movement::Right, North) => &[NorthEast],
            (Movement::Right, South) => &[SouthWest],
            (Movement::Right, East) => &[SouthEast],
            (Movement::Right, West) => &[NorthWest],
            (Movement::UTurn, _) => &Quadrant::ALL,
        };
        let mut vec = [0u8; NUM_QUADRANTS];
        for quad in quads {
            vec[quad.index()] = 1;
        }
        vec
    }
}

/// Worst-case claim a lane declares up front, short of a U-turn.
pub fn max_claim(lane: LaneId) -> QuadrantVec {
    Movement::Left.claim(lane)
}

/// Collapses a quadrant vector into a bitmask for display and lane state.
pub fn claim_mask(claim: &QuadrantVec) -> u8 {
    claim
        .iter()
        .enumerate()
        .filter(|(_, &cell)| cell > 0)
        .fold(0, |mask, (index, _)| mask | (1 << index))
}

/// Snapshot of the banker matrices for inspection and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankerSnapshot {
    pub available: QuadrantVec,
    pub max: [QuadrantVec; NUM_LANES],
    pub allocation: [QuadrantVec; NUM_LANES],
    pub need: [QuadrantVec; NUM_LANES],
    pub deadlock_preventions: u64,
}

#[derive(Debug)]
struct BankerState {
    available: QuadrantVec,
    max: [QuadrantVec; NUM_LANES],
    allocation: [QuadrantVec; NUM_LANES],
    need: [QuadrantVec; NUM_LANES],
    deadlock_preventions: u64,
}

impl BankerState {
    fn initial() -> Self {
        Self::with_max([
            max_claim(LaneId::North),
            max_claim(LaneId::South),
            max_claim(LaneId::East),
            max_claim(LaneId::West),
        ])
    }

    fn with_max(max: [QuadrantVec; NUM_LANES]) -> Self {
        Self {
            available: [1; NUM_QUADRANTS],
            max,
            allocation: [[0; NUM_QUADRANTS]; NUM_LANES],
            need: max,
            deadlock_preventions: 0,
        }
    }

    fn apply(&mut self, lane: usize, request: &QuadrantVec) {
        for quad in 0..NUM_QUADRANTS {
            self.available[quad] -= request[quad];
            self.allocation[lane][quad] += request[quad];
            self.need[lane][quad] -= request[quad];
        }
    }

    fn rollback(&mut self, lane: usize, request: &QuadrantVec) {
        for quad in 0..NUM_QUADRANTS {
            self.available[quad] += request[quad];
            self.allocation[lane][quad] -= request[quad];
            self.need[lane][quad] += request[quad];
        }
    }

    /// Dijkstra–Habermann safety test. Must only be called with the banker
    /// lock already held; the locking entry points are `request` and
    /// `is_safe_state`.
    fn is_safe(&self) -> bool {
        let mut work = self.available;
        let mut finish = [false; NUM_LANES];

        loop {
            // Lowest lane id first keeps the walk deterministic.
            let candidate = (0..NUM_LANES).find(|&lane| {
                !finish[lane]
                    && (0..NUM_QUADRANTS).all(|quad| self.need[lane][quad] <= work[quad])
            });
            match candidate {
                Some(lane) => {
                    for quad in 0..NUM_QUADRANTS {
                        work[quad] += self.allocation[lane][quad];
                    }
                    finish[lane] = true;
                }
                None => break,
            }
        }

        finish.iter().all(|&done| done)
    }
}

/// Deadlock-avoidance engine over the four intersection quadrants.
///
/// Every quadrant is a binary resource. A lane declares its worst-case claim
/// at startup (`max`), and each crossing request is granted only if the
/// resulting state is safe: some ordering of lanes can still satisfy every
/// outstanding need and run to completion.
pub struct BankerEngine {
    state: Mutex<BankerState>,
}

impl Default for BankerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BankerEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BankerState::initial()),
        }
    }

    /// Engine with explicit per-lane maximum claims, for lanes that declare
    /// more than the default left-turn worst case (a U-turn claims all four
    /// quadrants).
    pub fn with_max_claims(max: [QuadrantVec; NUM_LANES]) -> Self {
        Self {
            state: Mutex::new(BankerState::with_max(max)),
        }
    }

    fn lock(&self) -> lock_order::TrackedGuard<'_, BankerState> {
        lock_order::lock(&self.state, LockRank::Banker)
    }

    /// Requests the given quadrants for a lane.
    ///
    /// Checks the claim bound, then availability, then tentatively applies
    /// the allocation and runs the safety test. An unsafe outcome rolls the
    /// allocation back, counts a prevented deadlock, and fails.
    pub fn request(&self, lane: LaneId, request: QuadrantVec) -> Result<(), AccessError> {
        let mut state = self.lock();
        let l = lane.index();

        for quad in 0..NUM_QUADRANTS {
            if request[quad] > state.need[l][quad] {
                return Err(AccessError::ClaimExceeded(lane));
            }
        }
        for quad in 0..NUM_QUADRANTS {
            if request[quad] > state.available[quad] {
                return Err(AccessError::Insufficient(lane));
            }
        }

        state.apply(l, &request);
        if state.is_safe() {
            Ok(())
        } else {
            state.rollback(l, &request);
            state.deadlock_preventions += 1;
            log::debug!("unsafe allocation for lane {lane} rolled back");
            Err(AccessError::Unsafe(lane))
        }
    }

    /// Returns a lane's entire allocation to the available pool.
    pub fn release(&self, lane: LaneId) {
        let mut state = self.lock();
        let l = lane.index();
        for quad in 0..NUM_QUADRANTS {
            state.available[quad] += state.allocation[l][quad];
            state.need[l][quad] += state.allocation[l][quad];
            state.allocation[l][quad] = 0;
        }
    }

    /// Public safety probe for inspection callers. Never call this while a
    /// code path already holds the banker lock.
    pub fn is_safe_state(&self) -> bool {
        self.lock().is_safe()
    }

    pub fn deadlock_preventions(&self) -> u64 {
        self.lock().deadlock_preventions
    }

    pub fn available_total(&self) -> u8 {
        self.lock().available.iter().sum()
    }

    pub fn allocated_total(&self) -> u8 {
        let state = self.lock();
        state
            .allocation
            .iter()
            .flat_map(|row| row.iter())
            .sum()
    }

    /// Bitmask of the quadrants currently allocated to a lane.
    pub fn allocation_mask(&self, lane: LaneId) -> u8 {
        claim_mask(&self.lock().allocation[lane.index()])
    }

    pub fn snapshot(&self) -> BankerSnapshot {
        let state = self.lock();
        BankerSnapshot {
            available: state.available,
            max: state.max,
            allocation: state.allocation,
            need: state.need,
            deadlock_preventions: state.deadlock_preventions,
        }
    }

    /// Reinitializes every matrix; preventions counter restarts as well.
    pub fn reset(&self) {
        *self.lock() = BankerState::initial();
    }

    /// Test-only hook: force an allocation without the safety test, so unsafe
    /// configurations can be staged deliberately.
    #[cfg(test)]
    pub(crate) fn force_allocation(&self, lane: LaneId, allocation: QuadrantVec) {
        let mut state = self.lock();
        state.apply(lane.index(), &allocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(snap: &BankerSnapshot) {
        for lane in 0..NUM_LANES {
            for quad in 0..NUM_QUADRANTS {
                assert!(snap.allocation[lane][quad] <= snap.max[lane][quad]);
                assert_eq!(
                    snap.need[lane][quad],
                    snap.max[lane][quad] - snap.allocation[lane][quad]
                );
            }
        }
        for quad in 0..NUM_QUADRANTS {
            let allocated: u8 = (0..NUM_LANES).map(|lane| snap.allocation[lane][quad]).sum();
            assert_eq!(snap.available[quad] + allocated, 1);
        }
    }

    #[test]
    fn claim_table_matches_movement_patterns() {
        assert_eq!(
            Movement::Straight.claim(LaneId::North),
            [0, 0, 0, 1],
            "north straight claims SE"
        );
        assert_eq!(Movement::Left.claim(LaneId::South), [1, 1, 0, 0]);
        assert_eq!(Movement::Right.claim(LaneId::West), [0, 1, 0, 0]);
        assert_eq!(Movement::UTurn.claim(LaneId::East), [1, 1, 1, 1]);
        assert_eq!(claim_mask(&Movement::Left.claim(LaneId::North)), 0b1100);
    }

    #[test]
    fn initial_state_is_safe_with_full_availability() {
        let banker = BankerEngine::new();
        assert!(banker.is_safe_state());
        assert_eq!(banker.available_total(), 4);
        assert_eq!(banker.allocated_total(), 0);
        assert_invariants(&banker.snapshot());
    }

    #[test]
    fn request_then_release_restores_matrices() {
        let banker = BankerEngine::new();
        let before = banker.snapshot();

        let request = Movement::Straight.claim(LaneId::North);
        banker.request(LaneId::North, request).unwrap();
        assert_invariants(&banker.snapshot());
        banker.release(LaneId::North);

        let after = banker.snapshot();
        assert_eq!(before.available, after.available);
        assert_eq!(before.allocation, after.allocation);
        assert_eq!(before.need, after.need);
    }

    #[test]
    fn request_beyond_claim_is_rejected() {
        let banker = BankerEngine::new();
        // North's maximum claim is SW+SE; NE is outside it.
        let mut request = [0u8; NUM_QUADRANTS];
        request[Quadrant::NorthEast.index()] = 1;
        assert_eq!(
            banker.request(LaneId::North, request),
            Err(AccessError::ClaimExceeded(LaneId::North))
        );
        assert_eq!(banker.deadlock_preventions(), 0);
    }

    #[test]
    fn request_for_held_quadrant_is_insufficient() {
        let banker = BankerEngine::new();
        banker
            .request(LaneId::North, Movement::Straight.claim(LaneId::North))
            .unwrap();
        // West straight also needs SE, which North now holds.
        assert_eq!(
            banker.request(LaneId::West, Movement::Straight.claim(LaneId::West)),
            Err(AccessError::Insufficient(LaneId::West))
        );
    }

    #[test]
    fn circular_need_is_detected_as_unsafe() {
        let banker = BankerEngine::new();
        // Give every lane one quadrant of its left-turn claim so each still
        // needs one more that a neighbour holds.
        banker.force_allocation(LaneId::North, {
            let mut v = [0u8; NUM_QUADRANTS];
            v[Quadrant::SouthWest.index()] = 1;
            v
        });
        banker.force_allocation(LaneId::South, {
            let mut v = [0u8; NUM_QUADRANTS];
            v[Quadrant::NorthEast.index()] = 1;
            v
        });
        banker.force_allocation(LaneId::East, {
            let mut v = [0u8; NUM_QUADRANTS];
            v[Quadrant::SouthEast.index()] = 1;
            v
        });
        banker.force_allocation(LaneId::West, {
            let mut v = [0u8; NUM_QUADRANTS];
            v[Quadrant::NorthWest.index()] = 1;
            v
        });
        assert!(!banker.is_safe_state());

        // No quadrant is free, so the remaining need is not grantable.
        let mut request = [0u8; NUM_QUADRANTS];
        request[Quadrant::SouthEast.index()] = 1;
        assert_eq!(
            banker.request(LaneId::North, request),
            Err(AccessError::Insufficient(LaneId::North))
        );
    }

    fn single(quad: Quadrant) -> QuadrantVec {
        let mut v = [0u8; NUM_QUADRANTS];
        v[quad.index()] = 1;
        v
    }

    /// Three lanes each hold one quadrant of their claim; granting the last
    /// free quadrant to West would leave every lane one short of a quadrant
    /// another lane holds, a circular wait the safety test must refuse.
    fn stage_three_holders(banker: &BankerEngine) {
        banker
            .request(LaneId::North, single(Quadrant::SouthWest))
            .unwrap();
        banker
            .request(LaneId::East, single(Quadrant::SouthEast))
            .unwrap();
        banker
            .request(LaneId::South, single(Quadrant::NorthEast))
            .unwrap();
        assert!(banker.is_safe_state());
    }

    #[test]
    fn unsafe_request_rolls_back_and_counts_prevention() {
        let banker = BankerEngine::new();
        stage_three_holders(&banker);

        let before = banker.snapshot();
        assert_eq!(
            banker.request(LaneId::West, single(Quadrant::NorthWest)),
            Err(AccessError::Unsafe(LaneId::West))
        );

        let after = banker.snapshot();
        assert_eq!(before.available, after.available);
        assert_eq!(before.allocation, after.allocation);
        assert_eq!(before.need, after.need);
        assert_eq!(after.deadlock_preventions, 1);
        assert_invariants(&after);
    }

    #[test]
    fn preventions_counter_is_monotonic() {
        let banker = BankerEngine::new();
        stage_three_holders(&banker);

        let mut last = 0;
        for _ in 0..3 {
            let _ = banker.request(LaneId::West, single(Quadrant::NorthWest));
            let count = banker.deadlock_preventions();
            assert!(count >= last);
            last = count;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn uturn_storm_admits_exactly_one_lane() {
        // Every lane declares the full U-turn claim, then grabs its first
        // quadrant. Only the first grab is safe; committing any second one
        // would strand all four lanes short of their remaining need.
        let banker = BankerEngine::with_max_claims([[1; NUM_QUADRANTS]; NUM_LANES]);

        let grabs = [
            (LaneId::North, Quadrant::NorthEast),
            (LaneId::South, Quadrant::NorthWest),
            (LaneId::East, Quadrant::SouthWest),
            (LaneId::West, Quadrant::SouthEast),
        ];
        let mut granted = 0;
        let mut unsafe_rejections = 0;
        for (lane, quad) in grabs {
            match banker.request(lane, single(quad)) {
                Ok(()) => granted += 1,
                Err(AccessError::Unsafe(_)) => unsafe_rejections += 1,
                Err(other) => panic!("unexpected rejection: {other}"),
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(unsafe_rejections, 3);
        // The sole holder can still run to completion: the state stays safe.
        assert!(banker.is_safe_state());
        assert_eq!(banker.deadlock_preventions(), 3);
    }
}
