//! Grade aggregation and policy engine.
//!
//! Turns raw per-item scores into a single, auditable final grade through the
//! Item -> Constituent -> Module -> Final hierarchy, with rule-set policies,
//! manual adjustments at every level, and idempotent recomputation.

pub mod config;
pub mod error;
pub mod grading;
pub mod telemetry;
