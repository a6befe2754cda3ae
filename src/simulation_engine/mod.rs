//! The simulation core: lanes with bounded vehicle queues, the discrete
//! clock, the vehicle generator, and the driver loop that ties scheduling,
//! safety, and metrics together.

pub mod clock;
pub mod lane;
pub mod queue;
pub mod simulation;
pub mod vehicles;
