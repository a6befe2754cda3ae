// System-wide constants shared by every subsystem.

/// Number of traffic lanes feeding the intersection (N, S, E, W).
pub const NUM_LANES: usize = 4;

/// Number of mutually exclusive intersection quadrants (NE, NW, SW, SE).
pub const NUM_QUADRANTS: usize = 4;

/// Default bounded capacity of each lane's vehicle queue.
pub const MAX_QUEUE_CAPACITY: usize = 20;

/// Default scheduler time quantum in seconds.
pub const DEFAULT_TIME_QUANTUM_SECS: u64 = 3;

/// Simulated context-switch overhead in milliseconds.
pub const CONTEXT_SWITCH_TIME_MS: u64 = 500;

/// Seconds a single vehicle needs to clear the intersection.
pub const VEHICLE_CROSS_TIME_SECS: u64 = 3;

/// Driver tick interval in milliseconds.
pub const SIMULATION_UPDATE_INTERVAL_MS: u64 = 300;

/// Default total simulation duration in seconds.
pub const DEFAULT_SIMULATION_DURATION_SECS: u64 = 200;

/// Default bounds of the random vehicle inter-arrival interval, in seconds.
pub const DEFAULT_ARRIVAL_MIN_SECS: u64 = 1;
pub const DEFAULT_ARRIVAL_MAX_SECS: u64 = 3;

/// One in this many arrival checks spawns a random emergency vehicle.
pub const EMERGENCY_PROBABILITY: u32 = 200;

/// Capacity of the scheduler's execution-history ring.
pub const EXECUTION_HISTORY_CAPACITY: usize = 1000;

/// Backoff between retries when acquiring the intersection with a deadline.
pub const ACQUIRE_RETRY_BACKOFF_MS: u64 = 100;

/// Real milliseconds spent per simulated vehicle crossing; compresses the
/// quantum so a slice does not stall the driver for whole wall-clock seconds.
pub const CROSSING_PACE_MS: u64 = 100;

/// Path of the metrics snapshot export.
pub const METRICS_CSV_PATH: &str = "metrics.csv";
