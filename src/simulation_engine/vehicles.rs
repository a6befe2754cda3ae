use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;

use crate::control_system::emergency::EmergencyVehicle;
use crate::global_variables::{EMERGENCY_PROBABILITY, NUM_LANES};
use crate::simulation_engine::lane::LaneId;
use crate::simulation_engine::simulation::System;

/// Spawns the vehicle-generator thread: every `arrival_min..=arrival_max`
/// seconds a new vehicle id is enqueued on a uniformly random lane. Each
/// arrival also rolls a small chance of a random emergency detection.
pub fn spawn_generator(system: Arc<System>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("vehicle-generator".into())
        .spawn(move || generator_loop(&system))
        .expect("spawning the vehicle generator thread")
}

fn generator_loop(system: &System) {
    let mut rng = rand::rng();

    while !system.is_shutdown() {
        let interval =
            rng.random_range(system.config.arrival_min_secs..=system.config.arrival_max_secs);
        if !sleep_interruptibly(system, Duration::from_secs(interval)) {
            break;
        }
        if system.is_paused() {
            continue;
        }

        let lane_index = rng.random_range(0..NUM_LANES);
        let lane = LaneId::from_index(lane_index).expect("lane index is in range");
        let vehicle_id = system.next_vehicle_id();
        let now = system.clock.now();

        if system.lanes[lane.index()].enqueue_vehicle(vehicle_id, now) {
            log::debug!("vehicle {vehicle_id} arrived on lane {lane}");
        } else {
            system.metrics.record_overflow(now);
            log::debug!("lane {lane} full, vehicle {vehicle_id} dropped");
        }

        // Occasional emergency detection alongside normal arrivals.
        if rng.random_ratio(1, EMERGENCY_PROBABILITY) {
            let vehicle = EmergencyVehicle::random(lane, system.next_vehicle_id(), now, &mut rng);
            system
                .emergency
                .trigger(vehicle, &system.lanes, &system.intersection, now);
        }
    }
}

/// Sleeps in small steps so shutdown is noticed promptly; returns `false`
/// when the simulation shut down mid-sleep.
fn sleep_interruptibly(system: &System, total: Duration) -> bool {
    const STEP: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if system.is_shutdown() {
            return false;
        }
        let step = remaining.min(STEP);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !system.is_shutdown()
}

impl System {
    pub(crate) fn next_vehicle_id(&self) -> u64 {
        self.vehicle_id_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
