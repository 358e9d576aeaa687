//! cellsense: Cellular Signal Tracking
//!
//! Polls an LTE modem over its AT command port, estimates position from
//! radio fingerprints and predicts handovers before they happen.
//!
//! ## Architecture
//!
//! - **Acquisition**: Exclusive AT command channel with unsolicited-line routing
//! - **Decoder**: Stateless parsers for modem responses
//! - **Geolocation**: KNN fingerprint matching with uncertainty radius
//! - **Handover**: Trend rules plus an optional learned sequence model
//! - **Pipeline**: Cancellable polling loop and event fan-out
//! - **Simulation**: Path-loss driven fake modem for drives without hardware

pub mod acquisition;
pub mod config;
pub mod decoder;
pub mod geolocation;
pub mod handover;
pub mod pipeline;
pub mod simulation;
pub mod types;

// Re-export configuration
pub use config::TrackerConfig;

// Re-export commonly used types
pub use types::{
    CellReport, CellTowerMeasurement, HandoverPrediction, HandoverReason, LocationPrediction,
    NeighborCell, RadioTechnology, SignalQuality,
};

// Re-export the modem channel
pub use acquisition::{ModemChannel, ModemError, SerialLink};

// Re-export engines
pub use geolocation::{FingerprintEngine, GeolocationError};
pub use handover::HandoverEngine;

// Re-export the orchestrator
pub use pipeline::{CellSource, EventBus, ModemCellSource, PollingLoop, TrackerEvent, TrackerState};

pub use simulation::SimulatedLink;
