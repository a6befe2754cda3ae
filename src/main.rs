use std::io::BufRead;
use std::thread;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{unbounded, Sender};

use crossguard::communication::messages::ControlEvent;
use crossguard::config::{Args, SimulationConfig};
use crossguard::control_system::scheduler::Algorithm;
use crossguard::monitoring::metrics::MetricsSnapshot;
use crossguard::simulation_engine::lane::LaneId;
use crossguard::simulation_engine::simulation::{run_simulation, System};

fn main() {
    let args = Args::parse();
    init_logging(&args);

    if let Err(err) = run(args) {
        log::error!("initialization failed: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(if args.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    if args.no_color {
        builder.write_style(env_logger::WriteStyle::Never);
    }
    builder.init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = SimulationConfig::from_args(&args).context("invalid configuration")?;
    let system = System::new(config);

    // Control events flow into the core over a channel; metric snapshots
    // flow back out for display.
    let (event_tx, event_rx) = unbounded::<ControlEvent>();
    let (snapshot_tx, snapshot_rx) = unbounded::<MetricsSnapshot>();

    {
        let event_tx = event_tx.clone();
        ctrlc::set_handler(move || {
            let _ = event_tx.send(ControlEvent::Quit);
        })
        .context("setting the interrupt handler")?;
    }

    spawn_control_reader(event_tx);

    // Snapshot consumer; keeps display concerns out of the core.
    thread::spawn(move || {
        for snapshot in snapshot_rx.iter() {
            log::info!(
                "t={}s | {:.1} veh/min | wait {:.1}s | util {:.0}% | fairness {:.2} | switches {} | prevented {}",
                snapshot.simulation_time,
                snapshot.vehicles_per_minute,
                snapshot.avg_wait_time,
                snapshot.utilization * 100.0,
                snapshot.fairness_index,
                snapshot.context_switches,
                snapshot.deadlocks_prevented,
            );
        }
    });

    run_simulation(system.clone(), event_rx, Some(snapshot_tx));
    log_summary(&system);
    Ok(())
}

/// Reads interactive controls from stdin: `1`/`2`/`3` switch the algorithm,
/// `p` pauses, `e <lane>` injects an emergency, `r` resets, `q` quits.
fn spawn_control_reader(events: Sender<ControlEvent>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let mut parts = line.split_whitespace();
            let event = match parts.next() {
                Some("1") => Some(ControlEvent::SwitchAlgorithm(Algorithm::Sjf)),
                Some("2") => Some(ControlEvent::SwitchAlgorithm(Algorithm::Mlfq)),
                Some("3") => Some(ControlEvent::SwitchAlgorithm(Algorithm::Prr)),
                Some("p") => Some(ControlEvent::TogglePause),
                Some("r") => Some(ControlEvent::Reset),
                Some("q") => Some(ControlEvent::Quit),
                Some("e") => parse_lane(parts.next()).map(ControlEvent::TriggerEmergency),
                _ => None,
            };
            match event {
                Some(event) => {
                    let quitting = event == ControlEvent::Quit;
                    if events.send(event).is_err() || quitting {
                        break;
                    }
                }
                None => log::warn!("unrecognized control input: {line:?}"),
            }
        }
    });
}

fn parse_lane(token: Option<&str>) -> Option<LaneId> {
    match token? {
        "n" | "north" | "0" => Some(LaneId::North),
        "s" | "south" | "1" => Some(LaneId::South),
        "e" | "east" | "2" => Some(LaneId::East),
        "w" | "west" | "3" => Some(LaneId::West),
        _ => None,
    }
}

fn log_summary(system: &System) {
    let metrics = system.metrics.current();
    log::info!("=== simulation summary ===");
    log::info!(
        "vehicles processed: {} ({:.1}/min)",
        metrics.total_vehicles_processed,
        metrics.vehicles_per_minute
    );
    log::info!("average wait: {:.1}s", metrics.avg_wait_time);
    log::info!(
        "utilization {:.0}%, fairness {:.2}",
        metrics.utilization * 100.0,
        metrics.fairness_index
    );
    log::info!(
        "context switches: {}, deadlocks prevented: {}, overflows: {}",
        metrics.context_switches,
        metrics.deadlocks_prevented,
        metrics.queue_overflow_count
    );
    log::info!(
        "emergencies handled: {} (avg response {:.1}s)",
        system.emergency.total_handled(),
        system.emergency.average_response_time()
    );
    for lane in &system.lanes {
        log::info!(
            "lane {}: served {}, avg wait {:.1}s",
            lane.id(),
            lane.total_vehicles_served(),
            lane.average_wait_time()
        );
    }
}
