use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;

use crate::coordination::lock_order::{self, LockRank};
use crate::global_variables::NUM_LANES;
use crate::simulation_engine::lane::LaneId;

/// Inconsistencies a metrics validation pass can detect. These are logged
/// and clamped away, never fatal.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum MetricsError {
    #[error("derived metric {0} is negative")]
    Negative(&'static str),

    #[error("metric {name} out of range: {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("last update precedes measurement start")]
    ClockSkew,
}

/// Aggregated performance state. Counters are monotonic; the derived rates
/// are recomputed from counters plus elapsed time on every refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceMetrics {
    pub vehicles_per_minute: f64,
    pub avg_wait_time: f64,
    pub utilization: f64,
    pub fairness_index: f64,
    pub deadlocks_prevented: u64,
    pub context_switches: u64,
    pub emergency_response_time: f64,
    pub total_vehicles_processed: u64,
    pub queue_overflow_count: u64,
    pub lane_wait_totals: [f64; NUM_LANES],
    pub lane_throughput: [u64; NUM_LANES],
    pub measurement_start: u64,
    pub last_update: u64,
    pub total_simulation_time: u64,
}

impl PerformanceMetrics {
    fn initial() -> Self {
        Self {
            vehicles_per_minute: 0.0,
            avg_wait_time: 0.0,
            utilization: 0.0,
            fairness_index: 1.0,
            deadlocks_prevented: 0,
            context_switches: 0,
            emergency_response_time: 0.0,
            total_vehicles_processed: 0,
            queue_overflow_count: 0,
            lane_wait_totals: [0.0; NUM_LANES],
            lane_throughput: [0; NUM_LANES],
            measurement_start: 0,
            last_update: 0,
            total_simulation_time: 0,
        }
    }
}

/// One exportable row of metrics; field order matches the CSV header.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: i64,
    pub vehicles_per_minute: f64,
    pub avg_wait_time: f64,
    pub utilization: f64,
    pub fairness_index: f64,
    pub total_vehicles: u64,
    pub context_switches: u64,
    pub emergency_response_time: f64,
    pub deadlocks_prevented: u64,
    pub queue_overflows: u64,
    pub simulation_time: u64,
}

/// Jain's fairness index over a set of per-lane averages: `(Σx)² / (N·Σx²)`,
/// 1.0 when no lane has waited at all.
pub fn jain_fairness(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut active = 0usize;
    for &value in values {
        if value > 0.0 {
            sum += value;
            sum_sq += value * value;
            active += 1;
        }
    }
    if active == 0 || sum <= 0.0 {
        return 1.0;
    }
    ((sum * sum) / (active as f64 * sum_sq)).min(1.0)
}

/// Thread-safe metrics aggregation for the whole system.
pub struct MetricsEngine {
    inner: Mutex<PerformanceMetrics>,
}

impl MetricsEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PerformanceMetrics::initial()),
        }
    }

    fn lock(&self) -> lock_order::TrackedGuard<'_, PerformanceMetrics> {
        lock_order::lock(&self.inner, LockRank::Metrics)
    }

    /// Credits one served vehicle and its wait to a lane.
    pub fn record_vehicle(&self, lane: LaneId, wait_secs: u64, now: u64) {
        let mut metrics = self.lock();
        metrics.total_vehicles_processed += 1;
        metrics.lane_throughput[lane.index()] += 1;
        metrics.lane_wait_totals[lane.index()] += wait_secs as f64;
        metrics.last_update = now;
    }

    pub fn record_context_switches(&self, total: u64, now: u64) {
        let mut metrics = self.lock();
        metrics.context_switches = total.max(metrics.context_switches);
        metrics.last_update = now;
    }

    pub fn record_overflow(&self, now: u64) {
        let mut metrics = self.lock();
        metrics.queue_overflow_count += 1;
        metrics.last_update = now;
    }

    /// Accumulates one emergency response time into a running average.
    pub fn record_emergency_response(&self, response_secs: f64, now: u64) {
        let mut metrics = self.lock();
        if metrics.emergency_response_time == 0.0 {
            metrics.emergency_response_time = response_secs;
        } else {
            metrics.emergency_response_time =
                (metrics.emergency_response_time + response_secs) / 2.0;
        }
        metrics.last_update = now;
    }

    /// Mirrors the banker's prevention counter; the count never decreases.
    pub fn record_deadlocks_prevented(&self, total: u64, now: u64) {
        let mut metrics = self.lock();
        metrics.deadlocks_prevented = total.max(metrics.deadlocks_prevented);
        metrics.last_update = now;
    }

    /// Recomputes the derived rates. `expected_arrivals_per_sec` comes from
    /// the configured arrival interval and bounds utilization.
    pub fn refresh(&self, now: u64, expected_arrivals_per_sec: f64) {
        let mut metrics = self.lock();
        metrics.total_simulation_time = now.saturating_sub(metrics.measurement_start);

        let elapsed_minutes = metrics.total_simulation_time as f64 / 60.0;
        if elapsed_minutes > 0.0 {
            metrics.vehicles_per_minute =
                metrics.total_vehicles_processed as f64 / elapsed_minutes;
        }

        let lane_averages = Self::lane_averages(&metrics);
        let active: Vec<f64> = lane_averages.iter().copied().filter(|&avg| avg > 0.0).collect();
        metrics.avg_wait_time = if active.is_empty() {
            0.0
        } else {
            active.iter().sum::<f64>() / active.len() as f64
        };

        if metrics.total_simulation_time > 0 && expected_arrivals_per_sec > 0.0 {
            let expected = expected_arrivals_per_sec * metrics.total_simulation_time as f64;
            metrics.utilization =
                (metrics.total_vehicles_processed as f64 / expected).min(1.0);
        }

        metrics.fairness_index = jain_fairness(&lane_averages);
        metrics.last_update = now;
    }

    fn lane_averages(metrics: &PerformanceMetrics) -> [f64; NUM_LANES] {
        let mut averages = [0.0; NUM_LANES];
        for lane in 0..NUM_LANES {
            if metrics.lane_throughput[lane] > 0 {
                averages[lane] =
                    metrics.lane_wait_totals[lane] / metrics.lane_throughput[lane] as f64;
            }
        }
        averages
    }

    /// Checks the invariants a consistent metrics block must satisfy.
    pub fn validate(&self) -> Result<(), MetricsError> {
        let metrics = self.lock();
        for (name, value) in [
            ("vehicles_per_minute", metrics.vehicles_per_minute),
            ("avg_wait_time", metrics.avg_wait_time),
            ("utilization", metrics.utilization),
            ("fairness_index", metrics.fairness_index),
            ("emergency_response_time", metrics.emergency_response_time),
        ] {
            if value < 0.0 {
                return Err(MetricsError::Negative(name));
            }
        }
        if metrics.utilization > 1.0 {
            return Err(MetricsError::OutOfRange {
                name: "utilization",
                value: metrics.utilization,
            });
        }
        if metrics.fairness_index > 1.0 {
            return Err(MetricsError::OutOfRange {
                name: "fairness_index",
                value: metrics.fairness_index,
            });
        }
        if metrics.last_update < metrics.measurement_start {
            return Err(MetricsError::ClockSkew);
        }
        Ok(())
    }

    /// Clamps every derived value back into its valid range.
    pub fn sanitize(&self) {
        let mut metrics = self.lock();
        metrics.vehicles_per_minute = metrics.vehicles_per_minute.max(0.0);
        metrics.avg_wait_time = metrics.avg_wait_time.max(0.0);
        metrics.utilization = metrics.utilization.clamp(0.0, 1.0);
        metrics.fairness_index = metrics.fairness_index.clamp(0.0, 1.0);
        metrics.emergency_response_time = metrics.emergency_response_time.max(0.0);
        if metrics.last_update < metrics.measurement_start {
            metrics.last_update = metrics.measurement_start;
        }
    }

    pub fn current(&self) -> PerformanceMetrics {
        self.lock().clone()
    }

    /// Best-effort read for display threads; skips on contention.
    pub fn try_current(&self) -> Option<PerformanceMetrics> {
        lock_order::try_lock(&self.inner, LockRank::Metrics).map(|metrics| metrics.clone())
    }

    /// Exportable row stamped with the given wall-clock timestamp.
    pub fn snapshot(&self, wall_clock: i64) -> MetricsSnapshot {
        let metrics = self.lock();
        MetricsSnapshot {
            timestamp: wall_clock,
            vehicles_per_minute: metrics.vehicles_per_minute,
            avg_wait_time: metrics.avg_wait_time,
            utilization: metrics.utilization,
            fairness_index: metrics.fairness_index,
            total_vehicles: metrics.total_vehicles_processed,
            context_switches: metrics.context_switches,
            emergency_response_time: metrics.emergency_response_time,
            deadlocks_prevented: metrics.deadlocks_prevented,
            queue_overflows: metrics.queue_overflow_count,
            simulation_time: metrics.total_simulation_time,
        }
    }

    pub fn reset(&self, now: u64) {
        let mut metrics = self.lock();
        *metrics = PerformanceMetrics::initial();
        metrics.measurement_start = now;
        metrics.last_update = now;
    }
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fairness_is_perfect_with_no_waits() {
        assert_eq!(jain_fairness(&[0.0, 0.0, 0.0, 0.0]), 1.0);
    }

    #[test]
    fn fairness_is_one_for_equal_waits() {
        let index = jain_fairness(&[4.0, 4.0, 4.0, 4.0]);
        assert!((index - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fairness_drops_under_imbalance() {
        let balanced = jain_fairness(&[5.0, 5.0, 5.0, 5.0]);
        let skewed = jain_fairness(&[20.0, 1.0, 1.0, 1.0]);
        assert!(skewed < balanced);
        assert!(skewed > 0.0 && skewed <= 1.0);
        // Single active lane is trivially fair.
        assert!((jain_fairness(&[9.0, 0.0, 0.0, 0.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn throughput_and_wait_derive_from_counters() {
        let engine = MetricsEngine::new();
        engine.record_vehicle(LaneId::North, 4, 10);
        engine.record_vehicle(LaneId::North, 6, 20);
        engine.record_vehicle(LaneId::East, 10, 30);
        engine.refresh(120, 0.5);

        let metrics = engine.current();
        // 3 vehicles over 2 minutes.
        assert!((metrics.vehicles_per_minute - 1.5).abs() < 1e-9);
        // North averages 5, East averages 10.
        assert!((metrics.avg_wait_time - 7.5).abs() < 1e-9);
        assert_eq!(metrics.total_vehicles_processed, 3);
        // 3 processed of 60 expected.
        assert!((metrics.utilization - 0.05).abs() < 1e-9);
    }

    #[test]
    fn utilization_is_capped_at_one() {
        let engine = MetricsEngine::new();
        for i in 0..50 {
            engine.record_vehicle(LaneId::South, 1, i);
        }
        engine.refresh(10, 0.5);
        assert!((engine.current().utilization - 1.0).abs() < 1e-9);
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn mirrored_counters_never_regress() {
        let engine = MetricsEngine::new();
        engine.record_deadlocks_prevented(3, 5);
        engine.record_deadlocks_prevented(1, 6);
        engine.record_context_switches(10, 7);
        engine.record_context_switches(4, 8);
        let metrics = engine.current();
        assert_eq!(metrics.deadlocks_prevented, 3);
        assert_eq!(metrics.context_switches, 10);
    }

    #[test]
    fn emergency_response_time_runs_as_average() {
        let engine = MetricsEngine::new();
        engine.record_emergency_response(8.0, 1);
        assert!((engine.current().emergency_response_time - 8.0).abs() < 1e-9);
        engine.record_emergency_response(4.0, 2);
        assert!((engine.current().emergency_response_time - 6.0).abs() < 1e-9);
    }

    #[test]
    fn validation_flags_skew_and_sanitize_clamps() {
        let engine = MetricsEngine::new();
        engine.reset(100);
        {
            let mut metrics = engine.inner.lock().unwrap();
            metrics.last_update = 50;
        }
        assert!(matches!(engine.validate(), Err(MetricsError::ClockSkew)));

        {
            let mut metrics = engine.inner.lock().unwrap();
            metrics.utilization = 1.7;
        }
        assert!(matches!(
            engine.validate(),
            Err(MetricsError::OutOfRange { name: "utilization", .. })
        ));

        engine.sanitize();
        let metrics = engine.current();
        assert_eq!(metrics.last_update, 100);
        assert!((metrics.utilization - 1.0).abs() < 1e-9);
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn try_current_reads_when_uncontended() {
        let engine = MetricsEngine::new();
        engine.record_vehicle(LaneId::North, 3, 1);
        let metrics = engine.try_current().expect("uncontended read succeeds");
        assert_eq!(metrics.total_vehicles_processed, 1);
    }

    #[test]
    fn snapshot_carries_counter_values() {
        let engine = MetricsEngine::new();
        engine.record_vehicle(LaneId::West, 2, 4);
        engine.record_overflow(5);
        engine.record_deadlocks_prevented(2, 6);
        engine.refresh(60, 0.5);

        let snapshot = engine.snapshot(1_700_000_000);
        assert_eq!(snapshot.total_vehicles, 1);
        assert_eq!(snapshot.queue_overflows, 1);
        assert_eq!(snapshot.deadlocks_prevented, 2);
        assert_eq!(snapshot.simulation_time, 60);
        assert_eq!(snapshot.timestamp, 1_700_000_000);
    }
}
