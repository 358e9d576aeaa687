//! Tracker State and Status
//!
//! Latest outputs of the polling loop, shared behind `Arc<RwLock<>>` with
//! whatever consumes them (event loggers, external controllers).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CellTowerMeasurement, HandoverPrediction, LocationPrediction, NeighborCell, SignalQuality,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerState {
    pub status: TrackerStatus,

    /// Name of the cell source being polled
    pub source: String,

    pub last_measurement: Option<CellTowerMeasurement>,

    pub neighbors: Vec<NeighborCell>,

    /// Latest published location fix
    pub last_location: Option<LocationPrediction>,

    /// Latest handover evaluation, imminent or not
    pub last_handover: Option<HandoverPrediction>,

    pub quality: SignalQuality,

    /// Device speed fed to the handover engine; set by external consumers
    pub velocity_kmh: f64,

    /// Poll cycles attempted
    pub cycles: u64,

    /// Poll cycles that failed
    pub errors: u64,

    pub last_cycle_time: Option<DateTime<Utc>>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            status: TrackerStatus::Idle,
            source: String::new(),
            last_measurement: None,
            neighbors: Vec::new(),
            last_location: None,
            last_handover: None,
            quality: SignalQuality::Unknown,
            velocity_kmh: 0.0,
            cycles: 0,
            errors: 0,
            last_cycle_time: None,
        }
    }
}

impl TrackerState {
    /// Share of attempted cycles that produced a measurement.
    pub fn success_rate(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        (self.cycles - self.errors) as f64 / self.cycles as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerStatus {
    /// Not started yet
    Idle,
    /// Polling loop active
    Running,
    /// Loop exited after cancellation
    Stopped,
}

impl std::fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerStatus::Idle => write!(f, "Idle"),
            TrackerStatus::Running => write!(f, "Running"),
            TrackerStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_state_default() {
        let state = TrackerState::default();
        assert_eq!(state.status, TrackerStatus::Idle);
        assert_eq!(state.quality, SignalQuality::Unknown);
        assert_eq!(state.success_rate(), 0.0);
    }

    #[test]
    fn test_success_rate() {
        let state = TrackerState {
            cycles: 4,
            errors: 1,
            ..TrackerState::default()
        };
        assert_eq!(state.success_rate(), 0.75);
    }

    #[test]
    fn test_tracker_status_display() {
        assert_eq!(format!("{}", TrackerStatus::Idle), "Idle");
        assert_eq!(format!("{}", TrackerStatus::Running), "Running");
        assert_eq!(format!("{}", TrackerStatus::Stopped), "Stopped");
    }
}
