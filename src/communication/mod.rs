//! Event types exchanged between the outer binary and the simulation core.

pub mod messages;
