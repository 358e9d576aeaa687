//! RF Fingerprint Geolocation
//!
//! Estimates device position by matching a live cell measurement against a
//! table of fingerprints with known coordinates.
//!
//! ## Lifecycle
//!
//! ```text
//! Empty ──add_training_point──▶ Accumulating ──train()──▶ Trained
//!   └────────────────── load_fingerprints() ──────────────▶ Trained
//! ```
//!
//! Queries against an untrained engine are answered with a zero-confidence
//! `NoModel` prediction rather than an error.
//!
//! ## Estimation
//!
//! 1. Rank fingerprints by Euclidean distance in feature space
//! 2. Take the K nearest and weight each by `1 / (d + 1e-4)`
//! 3. Weighted centroid of their coordinates is the estimate
//! 4. Confidence blends signal quality with match closeness
//! 5. Uncertainty is the RMS spread of the K neighbors around the estimate

pub mod features;
pub mod storage;

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::GeolocationConfig;
use crate::types::{
    CellTowerMeasurement, Fingerprint, LocationPrediction, PredictionMethod, TrainingPoint,
};

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Keeps inverse-distance weights finite on an exact match.
const DISTANCE_EPSILON: f64 = 1e-4;

#[derive(Debug, Error)]
pub enum GeolocationError {
    #[error("Insufficient training data: have {have} points, need {need}")]
    InsufficientTrainingData { have: usize, need: usize },

    #[error("Fingerprint table I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid fingerprint table: {0}")]
    Format(String),
}

/// K-nearest-neighbor fingerprint matcher.
pub struct FingerprintEngine {
    config: GeolocationConfig,
    training: Vec<TrainingPoint>,
    fingerprints: Vec<Fingerprint>,
    trained: bool,
}

impl FingerprintEngine {
    pub fn new(config: GeolocationConfig) -> Self {
        Self {
            config,
            training: Vec::new(),
            fingerprints: Vec::new(),
            trained: false,
        }
    }

    /// Queue a labelled measurement for the next `train()`.
    pub fn add_training_point(&mut self, measurement: CellTowerMeasurement, latitude: f64, longitude: f64) {
        self.training.push(TrainingPoint {
            measurement,
            latitude,
            longitude,
        });
    }

    pub fn training_len(&self) -> usize {
        self.training.len()
    }

    /// Build the fingerprint set from every accumulated point.
    ///
    /// Leaves the engine (and any previous fingerprint set) untouched when
    /// too few points have been collected.
    pub fn train(&mut self) -> Result<usize, GeolocationError> {
        let need = self.config.min_training_points;
        if self.training.len() < need {
            return Err(GeolocationError::InsufficientTrainingData {
                have: self.training.len(),
                need,
            });
        }

        self.fingerprints = self
            .training
            .iter()
            .map(|p| Fingerprint {
                features: features::extract(&p.measurement),
                latitude: p.latitude,
                longitude: p.longitude,
                cell_id: p.measurement.cell_id,
            })
            .collect();
        self.trained = true;

        info!(fingerprints = self.fingerprints.len(), "Fingerprint model trained");
        Ok(self.fingerprints.len())
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Fingerprints available for matching.
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Single-measurement estimate.
    pub fn predict(&self, measurement: &CellTowerMeasurement) -> LocationPrediction {
        if !self.trained || self.fingerprints.is_empty() {
            return LocationPrediction::no_model(self.config.max_uncertainty_m);
        }

        let query = features::extract(measurement);
        let mut ranked: Vec<(f64, &Fingerprint)> = self
            .fingerprints
            .iter()
            .map(|fp| (features::distance(&query, &fp.features), fp))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        ranked.truncate(self.config.k.max(1));

        let weights: Vec<f64> = ranked
            .iter()
            .map(|(d, _)| 1.0 / (d + DISTANCE_EPSILON))
            .collect();
        let total: f64 = weights.iter().sum();

        let (latitude, longitude) = ranked.iter().zip(&weights).fold(
            (0.0, 0.0),
            |(lat, lon), ((_, fp), w)| (lat + fp.latitude * w / total, lon + fp.longitude * w / total),
        );

        let avg_distance = ranked.iter().map(|(d, _)| d).sum::<f64>() / ranked.len() as f64;
        let closeness = 1.0 / (1.0 + 10.0 * avg_distance);
        let confidence = (0.5 * measurement.quality().score() + 0.5 * closeness).clamp(0.0, 1.0);

        let spread = rms_spread_m(latitude, longitude, ranked.iter().map(|(_, fp)| *fp));
        let uncertainty_m = spread.clamp(self.config.min_uncertainty_m, self.config.max_uncertainty_m);

        debug!(
            latitude,
            longitude,
            confidence,
            uncertainty_m,
            neighbors = ranked.len(),
            "KNN location estimate"
        );

        LocationPrediction {
            latitude,
            longitude,
            confidence,
            uncertainty_m,
            method: PredictionMethod::Knn,
            neighbors_used: ranked.len(),
        }
    }

    /// Fuse per-tower estimates, weighting each by the tower's linear power.
    pub fn predict_multi(&self, measurements: &[CellTowerMeasurement]) -> LocationPrediction {
        if !self.trained || self.fingerprints.is_empty() || measurements.is_empty() {
            return LocationPrediction::no_model(self.config.max_uncertainty_m);
        }

        let estimates: Vec<LocationPrediction> = measurements.iter().map(|m| self.predict(m)).collect();
        let mut weights: Vec<f64> = measurements
            .iter()
            .map(|m| {
                let w = 10f64.powf(m.rsrp / 10.0);
                if w.is_finite() { w } else { 0.0 }
            })
            .collect();
        let mut total: f64 = weights.iter().sum();
        if total <= 0.0 {
            weights = vec![1.0; estimates.len()];
            total = estimates.len() as f64;
        }

        let mut fused = LocationPrediction {
            latitude: 0.0,
            longitude: 0.0,
            confidence: 0.0,
            uncertainty_m: 0.0,
            method: PredictionMethod::MultiTower,
            neighbors_used: 0,
        };
        for (estimate, w) in estimates.iter().zip(&weights) {
            let share = w / total;
            fused.latitude += estimate.latitude * share;
            fused.longitude += estimate.longitude * share;
            fused.confidence += estimate.confidence * share;
            fused.uncertainty_m += estimate.uncertainty_m * share;
            fused.neighbors_used += estimate.neighbors_used;
        }
        fused.confidence = fused.confidence.clamp(0.0, 1.0);
        fused.uncertainty_m = fused
            .uncertainty_m
            .clamp(self.config.min_uncertainty_m, self.config.max_uncertainty_m);
        fused
    }

    /// Replace the fingerprint set with a saved table.
    pub fn load_fingerprints(&mut self, path: &Path) -> Result<usize, GeolocationError> {
        let fingerprints = storage::load_table(path)?;
        self.trained = !fingerprints.is_empty();
        self.fingerprints = fingerprints;
        info!(path = %path.display(), fingerprints = self.fingerprints.len(), "Fingerprint table loaded");
        Ok(self.fingerprints.len())
    }

    pub fn save_fingerprints(&self, path: &Path) -> Result<(), GeolocationError> {
        storage::save_table(&self.fingerprints, path)?;
        info!(path = %path.display(), fingerprints = self.fingerprints.len(), "Fingerprint table saved");
        Ok(())
    }
}

/// Root-mean-square ground distance of `points` from `(lat, lon)`.
fn rms_spread_m<'a>(lat: f64, lon: f64, points: impl Iterator<Item = &'a Fingerprint>) -> f64 {
    let lon_scale = lat.to_radians().cos();
    let (sum_sq, n) = points.fold((0.0, 0usize), |(acc, n), fp| {
        let dy = (fp.latitude - lat) * METERS_PER_DEGREE;
        let dx = (fp.longitude - lon) * METERS_PER_DEGREE * lon_scale;
        (acc + dx * dx + dy * dy, n + 1)
    });
    if n == 0 {
        return 0.0;
    }
    (sum_sq / n as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RadioTechnology;

    fn measurement(cell_id: u64, rsrp: f64) -> CellTowerMeasurement {
        let mut m = CellTowerMeasurement::unknown(RadioTechnology::Lte);
        m.mcc = 310;
        m.mnc = 260;
        m.cell_id = cell_id;
        m.rsrp = rsrp;
        m.rsrq = -10.0;
        m.rssi = -70.0;
        m.sinr = 10.0;
        m
    }

    /// Ten points along a line: rsrp falls 2 dB per 0.001 deg of latitude.
    fn trained_engine() -> FingerprintEngine {
        let mut engine = FingerprintEngine::new(GeolocationConfig::default());
        for i in 0..10 {
            let rsrp = -70.0 - 2.0 * f64::from(i);
            engine.add_training_point(measurement(0x1A2B30C, rsrp), 47.0 + 0.001 * f64::from(i), -122.0);
        }
        engine.train().unwrap();
        engine
    }

    #[test]
    fn test_train_requires_minimum_points() {
        let mut engine = FingerprintEngine::new(GeolocationConfig::default());
        for i in 0..9 {
            engine.add_training_point(measurement(1, -80.0 - f64::from(i)), 47.0, -122.0);
        }
        match engine.train() {
            Err(GeolocationError::InsufficientTrainingData { have, need }) => {
                assert_eq!((have, need), (9, 10));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!engine.is_trained());
        assert!(engine.is_empty());

        engine.add_training_point(measurement(1, -95.0), 47.0, -122.0);
        assert_eq!(engine.train().unwrap(), 10);
        assert!(engine.is_trained());
        assert_eq!(engine.len(), 10);
    }

    #[test]
    fn test_untrained_prediction_is_no_model() {
        let engine = FingerprintEngine::new(GeolocationConfig::default());
        let p = engine.predict(&measurement(1, -80.0));
        assert_eq!(p.method, PredictionMethod::NoModel);
        assert_eq!(p.confidence, 0.0);
        assert_eq!(p.neighbors_used, 0);
    }

    #[test]
    fn test_exact_match_lands_near_its_fingerprint() {
        let engine = trained_engine();
        let p = engine.predict(&measurement(0x1A2B30C, -78.0));
        assert_eq!(p.method, PredictionMethod::Knn);
        assert_eq!(p.neighbors_used, 5);
        // the exact match dominates the inverse-distance weights
        assert!((p.latitude - 47.004).abs() < 0.0005, "lat {}", p.latitude);
        assert!((p.longitude + 122.0).abs() < 1e-9);
        assert!(p.confidence > 0.3 && p.confidence <= 1.0);
        assert!((50.0..=2000.0).contains(&p.uncertainty_m));
    }

    #[test]
    fn test_confidence_tracks_signal_quality() {
        let engine = trained_engine();
        let strong = engine.predict(&measurement(0x1A2B30C, -70.0));
        let weak = engine.predict(&measurement(0x1A2B30C, -88.0));
        assert!(strong.confidence > weak.confidence);
    }

    #[test]
    fn test_small_table_uses_every_fingerprint() {
        let mut config = GeolocationConfig::default();
        config.min_training_points = 2;
        let mut engine = FingerprintEngine::new(config);
        engine.add_training_point(measurement(9, -80.0), 10.0, 20.0);
        engine.add_training_point(measurement(9, -80.0), 10.0, 20.0);
        engine.train().unwrap();

        let p = engine.predict(&measurement(9, -80.0));
        assert_eq!(p.neighbors_used, 2);
        assert!((p.latitude - 10.0).abs() < 1e-9);
        // zero spread is clamped to the floor
        assert_eq!(p.uncertainty_m, 50.0);
    }

    #[test]
    fn test_multi_tower_prefers_stronger_tower() {
        let engine = trained_engine();
        let near = measurement(0x1A2B30C, -70.0);
        let far = measurement(0x1A2B30C, -88.0);

        let fused = engine.predict_multi(&[near.clone(), far.clone()]);
        assert_eq!(fused.method, PredictionMethod::MultiTower);
        let near_only = engine.predict(&near);
        let far_only = engine.predict(&far);
        assert!((fused.latitude - near_only.latitude).abs() < (fused.latitude - far_only.latitude).abs());
    }

    #[test]
    fn test_multi_tower_without_power_uses_equal_weights() {
        let engine = trained_engine();
        let a = measurement(0x1A2B30C, f64::NAN);
        let b = measurement(0x1A2B30C, f64::NAN);
        let fused = engine.predict_multi(&[a.clone(), b]);
        let single = engine.predict(&a);
        assert!((fused.latitude - single.latitude).abs() < 1e-12);
        assert_eq!(fused.neighbors_used, 10);
    }

    #[test]
    fn test_table_round_trip_restores_predictions() {
        let engine = trained_engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprints.json");
        engine.save_fingerprints(&path).unwrap();

        let mut restored = FingerprintEngine::new(GeolocationConfig::default());
        assert_eq!(restored.load_fingerprints(&path).unwrap(), 10);
        assert!(restored.is_trained());

        let query = measurement(0x1A2B30C, -83.0);
        assert_eq!(restored.predict(&query), engine.predict(&query));
    }
}
