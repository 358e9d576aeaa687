//! Handover decision types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One time-series sample held by the handover engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    #[serde(with = "super::unknown_f64")]
    pub serving_rsrp: f64,
    #[serde(with = "super::unknown_f64")]
    pub serving_rsrq: f64,
    #[serde(with = "super::unknown_f64")]
    pub serving_sinr: f64,
    pub serving_cell_id: u64,
    /// `(cell_id, rsrp)`, strongest first
    pub neighbors: Vec<(u64, f64)>,
    pub velocity_kmh: f64,
    pub timestamp: DateTime<Utc>,
}

impl SignalSnapshot {
    pub fn neighbor_rsrp(&self, cell_id: u64) -> Option<f64> {
        self.neighbors
            .iter()
            .find(|(id, _)| *id == cell_id)
            .map(|(_, rsrp)| *rsrp)
    }
}

/// Why a handover was (or was not) recommended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HandoverReason {
    #[default]
    None,
    SignalDegrading,
    NeighborStronger,
    LoadBalancing,
    CoverageHole,
    VelocityBased,
}

impl std::fmt::Display for HandoverReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoverReason::None => write!(f, "none"),
            HandoverReason::SignalDegrading => write!(f, "signal-degrading"),
            HandoverReason::NeighborStronger => write!(f, "neighbor-stronger"),
            HandoverReason::LoadBalancing => write!(f, "load-balancing"),
            HandoverReason::CoverageHole => write!(f, "coverage-hole"),
            HandoverReason::VelocityBased => write!(f, "velocity-based"),
        }
    }
}

/// Which path produced a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DecisionSource {
    #[default]
    Rules,
    Model,
}

/// Per-cycle handover recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverPrediction {
    pub imminent: bool,
    pub time_to_handover_ms: Option<u64>,
    pub target_cell_id: Option<u64>,
    /// NaN when there is no target
    #[serde(with = "super::unknown_f64")]
    pub target_rsrp: f64,
    #[serde(with = "super::unknown_f64")]
    pub current_rsrp: f64,
    pub reason: HandoverReason,
    pub source: DecisionSource,
}

impl HandoverPrediction {
    /// "No handover needed" at the given serving level.
    pub fn none(current_rsrp: f64) -> Self {
        Self {
            imminent: false,
            time_to_handover_ms: None,
            target_cell_id: None,
            target_rsrp: f64::NAN,
            current_rsrp,
            reason: HandoverReason::None,
            source: DecisionSource::Rules,
        }
    }

    /// Recommend `target` after `delay_ms`.
    pub fn recommend(
        current_rsrp: f64,
        target: (u64, f64),
        delay_ms: u64,
        reason: HandoverReason,
    ) -> Self {
        Self {
            imminent: true,
            time_to_handover_ms: Some(delay_ms),
            target_cell_id: Some(target.0),
            target_rsrp: target.1,
            current_rsrp,
            reason,
            source: DecisionSource::Rules,
        }
    }

    /// Serving link is failing and nothing usable is in range.
    pub fn coverage_hole(current_rsrp: f64) -> Self {
        Self {
            reason: HandoverReason::CoverageHole,
            ..Self::none(current_rsrp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_without_target_survives_json() {
        let json = serde_json::to_string(&HandoverPrediction::none(-92.0)).unwrap();
        assert!(json.contains("\"target_rsrp\":null"));

        let back: HandoverPrediction = serde_json::from_str(&json).unwrap();
        assert!(back.target_rsrp.is_nan());
        assert_eq!(back.current_rsrp, -92.0);
        assert_eq!(back.reason, HandoverReason::None);
    }
}
