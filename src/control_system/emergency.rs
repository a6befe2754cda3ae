use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;

use crate::coordination::intersection::IntersectionLock;
use crate::global_variables::NUM_LANES;
use crate::simulation_engine::lane::{Lane, LaneId};

/// Kind of emergency vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyKind {
    Ambulance,
    FireTruck,
    Police,
}

impl EmergencyKind {
    /// Every emergency kind carries the highest priority level.
    pub fn priority_level(self) -> u8 {
        1
    }
}

impl fmt::Display for EmergencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmergencyKind::Ambulance => "Ambulance",
            EmergencyKind::FireTruck => "Fire Truck",
            EmergencyKind::Police => "Police",
        };
        f.write_str(name)
    }
}

/// An emergency vehicle approaching the intersection.
#[derive(Debug, Clone, Copy)]
pub struct EmergencyVehicle {
    pub kind: EmergencyKind,
    pub lane: LaneId,
    /// Seconds from detection until the vehicle reaches the intersection.
    pub approach_time: f64,
    pub priority_level: u8,
    /// Seconds the vehicle needs to clear the intersection.
    pub crossing_duration: u64,
    pub vehicle_id: u64,
    /// Simulated second the vehicle was detected.
    pub timestamp: u64,
}

impl EmergencyVehicle {
    pub fn new(kind: EmergencyKind, lane: LaneId, vehicle_id: u64, now: u64) -> Self {
        Self {
            kind,
            lane,
            approach_time: 5.0,
            priority_level: kind.priority_level(),
            crossing_duration: 4,
            vehicle_id,
            timestamp: now,
        }
    }

    pub fn ambulance(lane: LaneId, vehicle_id: u64, now: u64) -> Self {
        Self::new(EmergencyKind::Ambulance, lane, vehicle_id, now)
    }

    pub fn fire_truck(lane: LaneId, vehicle_id: u64, now: u64) -> Self {
        Self::new(EmergencyKind::FireTruck, lane, vehicle_id, now)
    }

    pub fn police(lane: LaneId, vehicle_id: u64, now: u64) -> Self {
        Self::new(EmergencyKind::Police, lane, vehicle_id, now)
    }

    /// Randomized vehicle for the generator thread's occasional detections.
    pub fn random<R: Rng>(lane: LaneId, vehicle_id: u64, now: u64, rng: &mut R) -> Self {
        let kind = match rng.random_range(0..3) {
            0 => EmergencyKind::Ambulance,
            1 => EmergencyKind::FireTruck,
            _ => EmergencyKind::Police,
        };
        let mut vehicle = Self::new(kind, lane, vehicle_id, now);
        vehicle.approach_time = rng.random_range(5.0..15.0);
        vehicle.crossing_duration = rng.random_range(3..=6);
        vehicle
    }
}

/// An emergency that finished crossing, for response-time accounting.
#[derive(Debug, Clone, Copy)]
pub struct ClearedEmergency {
    pub vehicle: EmergencyVehicle,
    pub response_time: f64,
}

struct EmergencyInner {
    current: Option<EmergencyVehicle>,
    emergency_mode: bool,
    start_time: u64,
    saved_priority: u8,
    total_handled: u64,
    total_response_time: f64,
    preempt_enabled: bool,
}

/// Emergency preemption: evicts the intersection holder, pins the target
/// lane at emergency priority, and restores normal scheduling once the
/// vehicle has cleared. At most one emergency is active at a time; further
/// detections while one is in flight are dropped.
pub struct EmergencySystem {
    inner: Mutex<EmergencyInner>,
}

impl EmergencySystem {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EmergencyInner {
                current: None,
                emergency_mode: false,
                start_time: 0,
                saved_priority: 0,
                total_handled: 0,
                total_response_time: 0.0,
                preempt_enabled: true,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EmergencyInner> {
        // The emergency lock nests outside the coordination chain; it is
        // released before the intersection or any lane lock is touched.
        self.inner.lock().unwrap()
    }

    /// Starts handling an emergency. Returns `false` when preemption is
    /// disabled or another emergency is already active (the new one is
    /// dropped).
    pub fn trigger(
        &self,
        vehicle: EmergencyVehicle,
        lanes: &[Arc<Lane>; NUM_LANES],
        intersection: &IntersectionLock,
        now: u64,
    ) -> bool {
        {
            let mut inner = self.lock();
            if !inner.preempt_enabled {
                log::warn!("preemption disabled, {} must wait", vehicle.kind);
                return false;
            }
            if inner.current.is_some() {
                log::warn!(
                    "emergency already active, dropping {} on lane {}",
                    vehicle.kind,
                    vehicle.lane
                );
                return false;
            }
            inner.current = Some(vehicle);
            inner.emergency_mode = true;
            inner.start_time = now;
        }

        log::warn!(
            "EMERGENCY: {} approaching on lane {} (vehicle {})",
            vehicle.kind,
            vehicle.lane,
            vehicle.vehicle_id
        );

        // Clear the intersection and wake everyone, then pin the target lane
        // at emergency priority so any policy picks it next.
        if let Some(evicted) = intersection.evict() {
            log::info!("evicted lane {evicted} for emergency preemption");
        }
        let saved = lanes[vehicle.lane.index()].set_emergency_priority();
        self.lock().saved_priority = saved;
        true
    }

    /// Clearance check, called once per tick. After `crossing_duration`
    /// elapses the emergency is retired, the lane priority restored, and
    /// waiting lanes signalled.
    pub fn tick(
        &self,
        lanes: &[Arc<Lane>; NUM_LANES],
        intersection: &IntersectionLock,
        now: u64,
    ) -> Option<ClearedEmergency> {
        let (vehicle, saved_priority) = {
            let mut inner = self.lock();
            let vehicle = inner.current?;
            if now.saturating_sub(inner.start_time) < vehicle.crossing_duration {
                return None;
            }
            inner.current = None;
            inner.emergency_mode = false;
            inner.total_handled += 1;
            inner.total_response_time += vehicle.approach_time;
            (vehicle, inner.saved_priority)
        };

        lanes[vehicle.lane.index()].restore_priority(saved_priority);
        intersection.broadcast();
        log::info!("{} cleared lane {}", vehicle.kind, vehicle.lane);

        Some(ClearedEmergency {
            vehicle,
            response_time: vehicle.approach_time,
        })
    }

    pub fn is_active(&self) -> bool {
        self.lock().current.is_some()
    }

    pub fn emergency_mode(&self) -> bool {
        self.lock().emergency_mode
    }

    pub fn active_lane(&self) -> Option<LaneId> {
        self.lock().current.map(|vehicle| vehicle.lane)
    }

    pub fn total_handled(&self) -> u64 {
        self.lock().total_handled
    }

    pub fn average_response_time(&self) -> f64 {
        let inner = self.lock();
        if inner.total_handled == 0 {
            0.0
        } else {
            inner.total_response_time / inner.total_handled as f64
        }
    }

    pub fn set_preempt_enabled(&self, enabled: bool) {
        self.lock().preempt_enabled = enabled;
    }

    /// Drops any active emergency and zeroes the statistics.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.current = None;
        inner.emergency_mode = false;
        inner.start_time = 0;
        inner.saved_priority = 0;
        inner.total_handled = 0;
        inner.total_response_time = 0.0;
    }
}

impl Default for EmergencySystem {
    fn default() -> Self {
        Self::new()
    }
}
