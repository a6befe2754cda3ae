use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::coordination::banker::{claim_mask, BankerEngine, Movement};
use crate::coordination::error::AccessError;
use crate::coordination::intersection::IntersectionLock;
use crate::global_variables::ACQUIRE_RETRY_BACKOFF_MS;
use crate::simulation_engine::lane::{LaneId, EMERGENCY_PRIORITY};

/// Acquisition strategy for combining the banker with the intersection lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LockStrategy {
    /// Plain exclusive occupancy, no safety engine.
    Fifo,
    /// Banker's algorithm gates every acquisition.
    Banker,
    /// Banker first, with an emergency bypass and a traditional fallback
    /// when the overall state is still safe.
    #[default]
    Hybrid,
}

/// Proof of a granted crossing. Records whether the banker committed an
/// allocation so release can undo exactly what acquisition did.
#[derive(Debug)]
#[must_use = "a grant must be released"]
pub struct AccessGrant {
    pub lane: LaneId,
    pub quadrant_mask: u8,
    banker_committed: bool,
}

/// Front door for lanes entering the intersection: pairs the banker's safety
/// veto with the exclusive occupancy lock under one of three strategies.
pub struct AccessManager {
    strategy: LockStrategy,
    banker: Arc<BankerEngine>,
    intersection: Arc<IntersectionLock>,
}

impl AccessManager {
    pub fn new(
        strategy: LockStrategy,
        banker: Arc<BankerEngine>,
        intersection: Arc<IntersectionLock>,
    ) -> Self {
        Self {
            strategy,
            banker,
            intersection,
        }
    }

    pub fn strategy(&self) -> LockStrategy {
        self.strategy
    }

    /// Attempts to admit `lane` for `movement` at simulated time `now`.
    /// `priority` is the lane's current scheduling priority; emergency
    /// priority unlocks the hybrid bypass.
    pub fn acquire(
        &self,
        lane: LaneId,
        movement: Movement,
        priority: u8,
        now: u64,
    ) -> Result<AccessGrant, AccessError> {
        let request = movement.claim(lane);
        let mask = claim_mask(&request);

        match self.strategy {
            LockStrategy::Fifo => {
                self.intersection.try_acquire(lane, mask, now)?;
                Ok(AccessGrant {
                    lane,
                    quadrant_mask: mask,
                    banker_committed: false,
                })
            }
            LockStrategy::Banker => {
                self.banker.request(lane, request)?;
                match self.intersection.try_acquire(lane, mask, now) {
                    Ok(()) => Ok(AccessGrant {
                        lane,
                        quadrant_mask: mask,
                        banker_committed: true,
                    }),
                    Err(err) => {
                        // Undo the banker commitment so the claim is not
                        // stranded on a lane that never entered.
                        self.banker.release(lane);
                        Err(err)
                    }
                }
            }
            LockStrategy::Hybrid => self.acquire_hybrid(lane, request, mask, priority, now),
        }
    }

    fn acquire_hybrid(
        &self,
        lane: LaneId,
        request: crate::coordination::banker::QuadrantVec,
        mask: u8,
        priority: u8,
        now: u64,
    ) -> Result<AccessGrant, AccessError> {
        match self.banker.request(lane, request) {
            Ok(()) => match self.intersection.try_acquire(lane, mask, now) {
                Ok(()) => Ok(AccessGrant {
                    lane,
                    quadrant_mask: mask,
                    banker_committed: true,
                }),
                Err(err) => {
                    self.banker.release(lane);
                    Err(err)
                }
            },
            Err(reject @ AccessError::Unsafe(_)) => {
                if priority == EMERGENCY_PRIORITY {
                    log::warn!("emergency override: admitting lane {lane} past the safety veto");
                    self.intersection.try_acquire(lane, mask, now)?;
                    return Ok(AccessGrant {
                        lane,
                        quadrant_mask: mask,
                        banker_committed: false,
                    });
                }
                if self.banker.is_safe_state() {
                    // The request itself was refused but the system as a
                    // whole can still make progress; fall back to plain
                    // occupancy without a banker commitment.
                    log::debug!("state still safe, admitting lane {lane} without commitment");
                    self.intersection.try_acquire(lane, mask, now)?;
                    return Ok(AccessGrant {
                        lane,
                        quadrant_mask: mask,
                        banker_committed: false,
                    });
                }
                Err(reject)
            }
            Err(other) => Err(other),
        }
    }

    /// Retries acquisition on a fixed backoff until the deadline passes.
    pub fn acquire_with_timeout(
        &self,
        lane: LaneId,
        movement: Movement,
        priority: u8,
        now: u64,
        timeout: Duration,
    ) -> Result<AccessGrant, AccessError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.acquire(lane, movement, priority, now) {
                Ok(grant) => return Ok(grant),
                Err(AccessError::Shutdown) => return Err(AccessError::Shutdown),
                Err(_) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(ACQUIRE_RETRY_BACKOFF_MS));
                }
                Err(_) => return Err(AccessError::Timeout(timeout)),
            }
        }
    }

    /// Releases a grant: intersection first, then the banker allocation, so
    /// no observer ever sees the banker free while the intersection is still
    /// held.
    pub fn release(&self, grant: AccessGrant) {
        self.intersection.release(grant.lane);
        if grant.banker_committed {
            self.banker.release(grant.lane);
        }
    }
}
