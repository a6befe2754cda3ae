use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use rand::Rng;

use crate::communication::messages::ControlEvent;
use crate::config::SimulationConfig;
use crate::control_system::emergency::{EmergencySystem, EmergencyVehicle};
use crate::control_system::scheduler::Scheduler;
use crate::coordination::access::AccessManager;
use crate::coordination::banker::{claim_mask, BankerEngine, Movement};
use crate::coordination::error::AccessError;
use crate::coordination::intersection::IntersectionLock;
use crate::global_variables::{
    CROSSING_PACE_MS, MAX_QUEUE_CAPACITY, METRICS_CSV_PATH, NUM_LANES,
    SIMULATION_UPDATE_INTERVAL_MS,
};
use crate::monitoring::export;
use crate::monitoring::metrics::{MetricsEngine, MetricsSnapshot};
use crate::simulation_engine::clock::SimClock;
use crate::simulation_engine::lane::{Lane, LaneId};
use crate::simulation_engine::vehicles;

/// Ticks between CSV snapshot rows.
const SNAPSHOT_EVERY_TICKS: u64 = 10;

/// The whole simulator: one authoritative copy of every subsystem, shared
/// with worker threads through `Arc` handles.
pub struct System {
    pub config: SimulationConfig,
    pub lanes: [Arc<Lane>; NUM_LANES],
    pub banker: Arc<BankerEngine>,
    pub intersection: Arc<IntersectionLock>,
    pub scheduler: Arc<Scheduler>,
    pub emergency: Arc<EmergencySystem>,
    pub metrics: Arc<MetricsEngine>,
    pub access: AccessManager,
    pub clock: SimClock,
    shutdown: Arc<AtomicBool>,
    paused: AtomicBool,
    pub(crate) vehicle_id_counter: AtomicU64,
}

impl System {
    pub fn new(config: SimulationConfig) -> Arc<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let lanes = LaneId::ALL.map(|id| Arc::new(Lane::new(id, MAX_QUEUE_CAPACITY)));
        let banker = Arc::new(BankerEngine::new());
        let intersection = Arc::new(IntersectionLock::new(Arc::clone(&shutdown)));
        let scheduler = Arc::new(Scheduler::new(config.algorithm, config.context_switch_time));
        scheduler.set_time_quantum_secs(config.quantum_secs);
        let access = AccessManager::new(
            config.strategy,
            Arc::clone(&banker),
            Arc::clone(&intersection),
        );

        Arc::new(Self {
            config,
            lanes,
            banker,
            intersection,
            scheduler,
            emergency: Arc::new(EmergencySystem::new()),
            metrics: Arc::new(MetricsEngine::new()),
            access,
            clock: SimClock::start(),
            shutdown,
            paused: AtomicBool::new(false),
            vehicle_id_counter: AtomicU64::new(0),
        })
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Unpark anything waiting on the intersection.
        self.intersection.broadcast();
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn toggle_pause(&self) {
        let paused = !self.paused.load(Ordering::Relaxed);
        self.paused.store(paused, Ordering::Relaxed);
        log::info!("simulation {}", if paused { "paused" } else { "resumed" });
    }

    /// Returns every subsystem to its initial state without stopping the
    /// simulation threads.
    fn reset(&self) {
        let now = self.clock.now();
        self.intersection.evict();
        for lane in &self.lanes {
            lane.reset();
        }
        self.banker.reset();
        self.scheduler.reset();
        self.emergency.reset();
        self.metrics.reset(now);
        log::info!("simulation state reset");
    }
}

/// Runs the simulation to completion on the calling thread: spawns the
/// vehicle generator, drives scheduler ticks, and consumes control events
/// until the configured duration elapses or shutdown is requested.
pub fn run_simulation(
    system: Arc<System>,
    events: Receiver<ControlEvent>,
    snapshots: Option<Sender<MetricsSnapshot>>,
) {
    log::info!(
        "starting simulation: {}s, algorithm {}, strategy {:?}",
        system.config.duration_secs,
        system.config.algorithm.display_name(),
        system.config.strategy
    );
    system.metrics.reset(system.clock.now());

    let generator = vehicles::spawn_generator(Arc::clone(&system));
    let mut rng = rand::rng();
    let mut tick: u64 = 0;
    let tick_interval = Duration::from_millis(SIMULATION_UPDATE_INTERVAL_MS);

    while !system.is_shutdown() {
        drain_control_events(&system, &events, &mut rng);
        if system.is_shutdown() {
            break;
        }

        let now = system.clock.now();
        if now >= system.config.duration_secs {
            log::info!("simulation duration reached");
            system.request_shutdown();
            break;
        }

        if system.is_paused() {
            thread::sleep(tick_interval);
            continue;
        }

        // Retire any emergency whose crossing has completed.
        if let Some(cleared) = system
            .emergency
            .tick(&system.lanes, &system.intersection, now)
        {
            system
                .metrics
                .record_emergency_response(cleared.response_time, now);
        }

        run_one_dispatch(&system, &mut rng, now);

        system
            .metrics
            .record_deadlocks_prevented(system.banker.deadlock_preventions(), now);
        system
            .metrics
            .record_context_switches(system.scheduler.total_context_switches(), now);
        system
            .metrics
            .refresh(now, system.config.expected_arrivals_per_sec());
        if let Err(err) = system.metrics.validate() {
            log::warn!("metrics inconsistency: {err}; clamping");
            system.metrics.sanitize();
        }

        tick += 1;
        if tick % SNAPSHOT_EVERY_TICKS == 0 {
            publish_snapshot(&system, snapshots.as_ref());
        }

        thread::sleep(tick_interval);
    }

    system.request_shutdown();
    if let Err(err) = generator.join() {
        log::error!("vehicle generator panicked: {err:?}");
    }
    publish_snapshot(&system, snapshots.as_ref());
    log::info!("simulation stopped");
}

/// One scheduling decision plus, when admission succeeds, one executed time
/// slice.
fn run_one_dispatch(system: &System, rng: &mut impl Rng, now: u64) {
    let Some(lane_id) = system.scheduler.schedule_next_lane(&system.lanes, now) else {
        return;
    };
    let lane = &system.lanes[lane_id.index()];
    let movement = random_movement(lane_id, rng);
    let request_mask = claim_mask(&movement.claim(lane_id));
    lane.set_requested_quadrants(request_mask);

    match system
        .access
        .acquire(lane_id, movement, lane.priority(), now)
    {
        Ok(grant) => {
            lane.set_allocated_quadrants(grant.quadrant_mask);
            let quantum = system.scheduler.time_quantum_secs();
            let outcome = system.scheduler.execute_time_slice(
                lane,
                quantum,
                now,
                Duration::from_millis(CROSSING_PACE_MS),
            );
            for served in &outcome.served {
                system
                    .metrics
                    .record_vehicle(lane_id, served.wait_secs, now);
            }
            system.scheduler.record_execution(outcome.record);
            log::debug!(
                "lane {lane_id} crossed {} vehicle(s) {:?}",
                outcome.record.vehicles_processed,
                movement
            );

            lane.set_allocated_quadrants(0);
            lane.set_requested_quadrants(0);
            system.access.release(grant);

            // Release may have made a previously unsafe allocation viable.
            for other in &system.lanes {
                other.resolve_block();
            }
        }
        Err(AccessError::Unsafe(_)) => {
            // Deferred retry: parked until the next release signals.
            lane.mark_blocked();
            lane.set_requested_quadrants(0);
            system.scheduler.clear_current_lane();
            log::debug!("lane {lane_id} blocked by safety veto");
        }
        Err(AccessError::Shutdown) => {}
        Err(err) => {
            lane.set_requested_quadrants(0);
            system.scheduler.clear_current_lane();
            log::debug!("lane {lane_id} admission failed: {err}");
        }
    }
}

/// Picks a crossing movement that stays within the lane's declared maximum
/// claim: the single-quadrant pattern most of the time, the full left-turn
/// claim otherwise. North/South cross straight; East/West hook right, since
/// their straight path runs outside the left-turn claim they declared.
fn random_movement(lane: LaneId, rng: &mut impl Rng) -> Movement {
    if rng.random_bool(0.25) {
        return Movement::Left;
    }
    match lane {
        LaneId::North | LaneId::South => Movement::Straight,
        LaneId::East | LaneId::West => Movement::Right,
    }
}

fn drain_control_events(system: &System, events: &Receiver<ControlEvent>, rng: &mut impl Rng) {
    loop {
        match events.try_recv() {
            Ok(event) => handle_control_event(system, event, rng),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                system.request_shutdown();
                break;
            }
        }
    }
}

fn handle_control_event(system: &System, event: ControlEvent, rng: &mut impl Rng) {
    match event {
        ControlEvent::SwitchAlgorithm(algorithm) => {
            system.scheduler.set_algorithm(algorithm);
        }
        ControlEvent::TogglePause => system.toggle_pause(),
        ControlEvent::TriggerEmergency(lane) => {
            let now = system.clock.now();
            let vehicle = EmergencyVehicle::random(lane, system.next_vehicle_id(), now, rng);
            system
                .emergency
                .trigger(vehicle, &system.lanes, &system.intersection, now);
        }
        ControlEvent::Reset => system.reset(),
        ControlEvent::Quit => {
            log::info!("quit requested");
            system.request_shutdown();
        }
    }
}

fn publish_snapshot(system: &System, snapshots: Option<&Sender<MetricsSnapshot>>) {
    let snapshot = system.metrics.snapshot(chrono::Utc::now().timestamp());
    if let Err(err) = export::append_snapshot(&PathBuf::from(METRICS_CSV_PATH), &snapshot) {
        log::warn!("metrics export failed: {err}");
    }
    if let Some(sender) = snapshots {
        let _ = sender.send(snapshot);
    }
}
