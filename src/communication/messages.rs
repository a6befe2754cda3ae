use crate::control_system::scheduler::Algorithm;
use crate::simulation_engine::lane::LaneId;

/// Abstract interactive controls consumed by the simulation core. The outer
/// binary translates keyboard input and signals into these events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    SwitchAlgorithm(Algorithm),
    TogglePause,
    TriggerEmergency(LaneId),
    Reset,
    Quit,
}
