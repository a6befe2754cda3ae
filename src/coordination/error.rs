use std::time::Duration;

use thiserror::Error;

use crate::simulation_engine::lane::LaneId;

/// Failures of an intersection-access attempt. All variants are expected
/// operational outcomes; none of them terminates the simulation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    #[error("lane {0} request exceeds its declared maximum claim")]
    ClaimExceeded(LaneId),

    #[error("insufficient free quadrants for lane {0}")]
    Insufficient(LaneId),

    #[error("allocation for lane {0} would leave the intersection unsafe")]
    Unsafe(LaneId),

    #[error("intersection busy")]
    Busy,

    #[error("gave up acquiring the intersection after {0:?}")]
    Timeout(Duration),

    #[error("shutting down")]
    Shutdown,
}
