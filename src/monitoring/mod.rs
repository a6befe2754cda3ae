//! Performance metrics aggregation, validation, and CSV export.

pub mod export;
pub mod metrics;
