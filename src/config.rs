use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::control_system::scheduler::Algorithm;
use crate::coordination::access::LockStrategy;
use crate::global_variables::{
    CONTEXT_SWITCH_TIME_MS, DEFAULT_ARRIVAL_MAX_SECS, DEFAULT_ARRIVAL_MIN_SECS,
    DEFAULT_SIMULATION_DURATION_SECS, DEFAULT_TIME_QUANTUM_SECS,
};

/// Initialization failures; the only fatal error class in the system.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("simulation duration must be greater than zero")]
    ZeroDuration,

    #[error("time quantum must be greater than zero")]
    ZeroQuantum,

    #[error("arrival interval is inverted: min {min}s > max {max}s")]
    InvertedArrivalRange { min: u64, max: u64 },

    #[error("arrival interval must be at least one second")]
    ZeroArrivalRate,
}

/// Command-line surface of the simulator binary.
#[derive(Debug, Parser)]
#[command(
    name = "crossguard",
    about = "Concurrent four-way traffic intersection simulator"
)]
pub struct Args {
    /// Simulation duration in seconds.
    #[arg(long, default_value_t = DEFAULT_SIMULATION_DURATION_SECS)]
    pub duration: u64,

    /// Minimum vehicle inter-arrival interval in seconds.
    #[arg(long = "arrival-min", default_value_t = DEFAULT_ARRIVAL_MIN_SECS)]
    pub arrival_min: u64,

    /// Maximum vehicle inter-arrival interval in seconds.
    #[arg(long = "arrival-max", default_value_t = DEFAULT_ARRIVAL_MAX_SECS)]
    pub arrival_max: u64,

    /// Scheduler time quantum in seconds.
    #[arg(long, default_value_t = DEFAULT_TIME_QUANTUM_SECS)]
    pub quantum: u64,

    /// Lane-selection policy.
    #[arg(long, value_enum, default_value_t = Algorithm::Sjf)]
    pub algorithm: Algorithm,

    /// Intersection acquisition strategy.
    #[arg(long, value_enum, default_value_t = LockStrategy::Hybrid)]
    pub strategy: LockStrategy,

    /// Disable colored log output.
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,
}

/// Validated runtime configuration consumed by the core.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub duration_secs: u64,
    pub arrival_min_secs: u64,
    pub arrival_max_secs: u64,
    pub quantum_secs: u64,
    pub algorithm: Algorithm,
    pub strategy: LockStrategy,
    pub context_switch_time: Duration,
    pub no_color: bool,
    pub debug: bool,
}

impl SimulationConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let config = Self {
            duration_secs: args.duration,
            arrival_min_secs: args.arrival_min,
            arrival_max_secs: args.arrival_max,
            quantum_secs: args.quantum,
            algorithm: args.algorithm,
            strategy: args.strategy,
            context_switch_time: Duration::from_millis(CONTEXT_SWITCH_TIME_MS),
            no_color: args.no_color,
            debug: args.debug,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_secs == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if self.quantum_secs == 0 {
            return Err(ConfigError::ZeroQuantum);
        }
        if self.arrival_min_secs == 0 {
            return Err(ConfigError::ZeroArrivalRate);
        }
        if self.arrival_min_secs > self.arrival_max_secs {
            return Err(ConfigError::InvertedArrivalRange {
                min: self.arrival_min_secs,
                max: self.arrival_max_secs,
            });
        }
        Ok(())
    }

    /// Expected vehicle arrivals per second given the configured interval;
    /// bounds the utilization metric.
    pub fn expected_arrivals_per_sec(&self) -> f64 {
        2.0 / (self.arrival_min_secs + self.arrival_max_secs) as f64
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_SIMULATION_DURATION_SECS,
            arrival_min_secs: DEFAULT_ARRIVAL_MIN_SECS,
            arrival_max_secs: DEFAULT_ARRIVAL_MAX_SECS,
            quantum_secs: DEFAULT_TIME_QUANTUM_SECS,
            algorithm: Algorithm::Sjf,
            strategy: LockStrategy::Hybrid,
            context_switch_time: Duration::from_millis(CONTEXT_SWITCH_TIME_MS),
            no_color: false,
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_pass_validation() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        // Mean of a 1..3 s interval is one arrival every 2 s.
        assert!((config.expected_arrivals_per_sec() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn parsed_flags_reach_the_config() {
        let args = Args::parse_from([
            "crossguard",
            "--duration",
            "60",
            "--arrival-min",
            "2",
            "--arrival-max",
            "5",
            "--quantum",
            "4",
            "--algorithm",
            "mlfq",
            "--strategy",
            "banker",
            "--debug",
        ]);
        let config = SimulationConfig::from_args(&args).unwrap();
        assert_eq!(config.duration_secs, 60);
        assert_eq!(config.arrival_min_secs, 2);
        assert_eq!(config.arrival_max_secs, 5);
        assert_eq!(config.quantum_secs, 4);
        assert_eq!(config.algorithm, Algorithm::Mlfq);
        assert_eq!(config.strategy, LockStrategy::Banker);
        assert!(config.debug);
    }

    #[test]
    fn invalid_ranges_are_fatal() {
        let mut config = SimulationConfig::default();
        config.arrival_min_secs = 5;
        config.arrival_max_secs = 2;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvertedArrivalRange { min: 5, max: 2 })
        );

        let mut config = SimulationConfig::default();
        config.duration_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroDuration));

        let mut config = SimulationConfig::default();
        config.quantum_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroQuantum));
    }
}
