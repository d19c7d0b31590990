//! Runtime bootstrap for the fragcache binary.

pub mod error;
pub mod telemetry;
