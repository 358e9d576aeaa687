//! Shared data structures for cellular telemetry
//!
//! - Measurements: serving cell, neighbor cells, quality classes
//! - Location: fingerprints, training points, location estimates
//! - Handover: signal snapshots, recommendations
//! - Modem: identity, registration, carrier, band records

mod measurement;
mod location;
mod handover;
mod modem;
pub(crate) mod unknown_f64;

pub use measurement::*;
pub use location::*;
pub use handover::*;
pub use modem::*;
