//! Geolocation types

use serde::{Deserialize, Serialize};

use super::CellTowerMeasurement;

/// Width of the normalized fingerprint feature vector.
pub const FEATURE_DIM: usize = 9;

/// Stored (feature vector, known location) pair.
///
/// Built by training or by loading a fingerprint table; never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub features: [f64; FEATURE_DIM],
    pub latitude: f64,
    pub longitude: f64,
    pub cell_id: u64,
}

/// A measurement labelled with where it was taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingPoint {
    pub measurement: CellTowerMeasurement,
    pub latitude: f64,
    pub longitude: f64,
}

/// How a location estimate was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionMethod {
    /// Single-tower K-nearest-neighbor lookup
    Knn,
    /// Power-weighted fusion of several single-tower lookups
    MultiTower,
    /// No fingerprints loaded
    NoModel,
}

impl PredictionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionMethod::Knn => "knn",
            PredictionMethod::MultiTower => "multi-tower",
            PredictionMethod::NoModel => "no model",
        }
    }
}

impl std::fmt::Display for PredictionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location estimate with an explicit uncertainty radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPrediction {
    pub latitude: f64,
    pub longitude: f64,
    /// [0, 1]
    pub confidence: f64,
    /// Meters
    pub uncertainty_m: f64,
    pub method: PredictionMethod,
    /// Fingerprints that contributed to the estimate
    pub neighbors_used: usize,
}

impl LocationPrediction {
    /// Answer given when there is nothing to match against.
    pub fn no_model(uncertainty_m: f64) -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            confidence: 0.0,
            uncertainty_m,
            method: PredictionMethod::NoModel,
            neighbors_used: 0,
        }
    }
}
