//! Handover Decision Engine
//!
//! Keeps a bounded history of signal snapshots and decides each cycle
//! whether the device is about to (or should) move to another cell.
//!
//! ## Decision path
//!
//! ```text
//! ingest() ──▶ ring buffer (≤ 2 × sequence_length, oldest evicted)
//!                   │
//! evaluate() ──▶ model loaded AND history ≥ sequence_length?
//!                   ├─ yes ─▶ model inference ──(error)──┐
//!                   └─ no ──────────────────────────────▶ rules
//! ```
//!
//! The rules are always available; a model only ever adds to them.

pub mod model;
pub mod rules;

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::config::HandoverConfig;
use crate::types::{
    CellTowerMeasurement, DecisionSource, HandoverPrediction, HandoverReason, NeighborCell,
    SignalSnapshot,
};
pub use model::{load_model, DenseSequenceModel, ModelError, ModelLoadError, SequenceModel};

pub struct HandoverEngine {
    config: HandoverConfig,
    history: VecDeque<SignalSnapshot>,
    model: Option<Box<dyn SequenceModel>>,
}

impl HandoverEngine {
    pub fn new(config: HandoverConfig) -> Self {
        let capacity = config.sequence_length.saturating_mul(2) + 1;
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
            model: None,
        }
    }

    pub fn with_model(mut self, model: Box<dyn SequenceModel>) -> Self {
        self.set_model(Some(model));
        self
    }

    /// Install or remove the learned model.
    pub fn set_model(&mut self, model: Option<Box<dyn SequenceModel>>) {
        if let Some(m) = &model {
            let expected = model::input_width(self.config.max_neighbors);
            if m.feature_width() != expected {
                warn!(
                    model_width = m.feature_width(),
                    expected,
                    "Model feature width does not match neighbor count, inference will fall back to rules"
                );
            }
        }
        self.model = model;
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> impl Iterator<Item = &SignalSnapshot> {
        self.history.iter()
    }

    /// Record one cycle's serving cell and neighbors.
    pub fn ingest(&mut self, serving: &CellTowerMeasurement, neighbors: &[NeighborCell], velocity_kmh: f64) {
        let mut ranked: Vec<(u64, f64)> = neighbors.iter().map(|n| (n.cell_id, n.rsrp)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(self.config.max_neighbors);

        self.history.push_back(SignalSnapshot {
            serving_rsrp: serving.rsrp,
            serving_rsrq: serving.rsrq,
            serving_sinr: serving.sinr,
            serving_cell_id: serving.cell_id,
            neighbors: ranked,
            velocity_kmh,
            timestamp: serving.timestamp,
        });

        let limit = self.config.sequence_length.saturating_mul(2);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    /// Decide for the most recent snapshot.
    pub fn evaluate(&self) -> HandoverPrediction {
        if let Some(model) = &self.model {
            let window = model.sequence_length().max(self.config.sequence_length);
            if window > 0 && self.history.len() >= window {
                match self.model_decision(model.as_ref()) {
                    Ok(prediction) => return prediction,
                    Err(e) => warn!(error = %e, "Handover model inference failed, using rules"),
                }
            }
        }
        rules::evaluate(&self.config, &self.history)
    }

    fn model_decision(&self, model: &dyn SequenceModel) -> Result<HandoverPrediction, ModelError> {
        let n = model.sequence_length();
        let recent = self.history.iter().skip(self.history.len().saturating_sub(n));
        let sequence = model::build_sequence(recent, self.config.max_neighbors);
        let [probability, fraction, index] = model.infer(&sequence)?;

        let Some(latest) = self.history.back() else {
            return Ok(HandoverPrediction::none(f64::NAN));
        };
        let current = latest.serving_rsrp;
        debug!(probability, fraction, index, "Handover model output");

        if probability <= self.config.model_probability_threshold {
            return Ok(HandoverPrediction {
                source: DecisionSource::Model,
                ..HandoverPrediction::none(current)
            });
        }
        if latest.neighbors.is_empty() {
            return Ok(HandoverPrediction {
                source: DecisionSource::Model,
                ..HandoverPrediction::coverage_hole(current)
            });
        }

        let slot = (index.round().max(0.0) as usize).min(latest.neighbors.len() - 1);
        let target = latest.neighbors[slot];
        let delay_ms = (fraction.clamp(0.0, 1.0) * self.config.prediction_horizon_ms as f64).round() as u64;

        Ok(HandoverPrediction {
            source: DecisionSource::Model,
            ..HandoverPrediction::recommend(current, target, delay_ms, self.model_reason(current, target.1))
        })
    }

    fn model_reason(&self, current: f64, target_rsrp: f64) -> HandoverReason {
        let fading = rules::serving_slope(&self.config, &self.history)
            .is_some_and(|slope| slope < self.config.fade_rate_db_per_s);
        if current < self.config.serving_threshold_dbm || fading {
            HandoverReason::SignalDegrading
        } else if target_rsrp > current + self.config.hysteresis_db {
            HandoverReason::NeighborStronger
        } else {
            HandoverReason::LoadBalancing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RadioTechnology;
    use chrono::{Duration, TimeZone, Utc};
    use model::{Activation, DenseLayer};

    fn at(second: i64, serving_rsrp: f64) -> CellTowerMeasurement {
        let mut m = CellTowerMeasurement::unknown(RadioTechnology::Lte);
        m.cell_id = 100;
        m.rsrp = serving_rsrp;
        m.rsrq = -10.0;
        m.sinr = 8.0;
        m.timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(second);
        m
    }

    fn neighbor(cell_id: u64, rsrp: f64) -> NeighborCell {
        NeighborCell {
            cell_id,
            pci: 0,
            rsrp,
            rsrq: -11.0,
            earfcn: 5110,
        }
    }

    fn engine() -> HandoverEngine {
        HandoverEngine::new(HandoverConfig::default())
    }

    fn constant_model(outputs: [f64; 3]) -> Box<dyn SequenceModel> {
        let config = HandoverConfig::default();
        let width = model::input_width(config.max_neighbors);
        Box::new(DenseSequenceModel {
            sequence_length: config.sequence_length,
            feature_width: width,
            layers: vec![DenseLayer {
                weights: vec![vec![0.0; config.sequence_length * width]; 3],
                biases: outputs.to_vec(),
                activation: Activation::Linear,
            }],
        })
    }

    /// Always fails inference: expects a window nobody builds.
    struct BrokenModel;

    impl SequenceModel for BrokenModel {
        fn sequence_length(&self) -> usize {
            2
        }
        fn feature_width(&self) -> usize {
            1
        }
        fn infer(&self, _: &[Vec<f64>]) -> Result<[f64; 3], ModelError> {
            Err(ModelError::NonFinite)
        }
    }

    #[test]
    fn test_empty_history_is_not_imminent() {
        let p = engine().evaluate();
        assert!(!p.imminent);
        assert_eq!(p.reason, HandoverReason::None);
    }

    #[test]
    fn test_ingest_sorts_and_truncates_neighbors() {
        let mut e = engine();
        let neighbors: Vec<NeighborCell> = (0..9).map(|i| neighbor(i, -120.0 + f64::from(i as u8) * 2.0)).collect();
        e.ingest(&at(0, -90.0), &neighbors, 0.0);

        let snap = e.history().next().unwrap();
        assert_eq!(snap.neighbors.len(), 6);
        assert_eq!(snap.neighbors[0], (8, -104.0));
        assert!(snap.neighbors.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_ring_evicts_oldest_beyond_twice_sequence_length() {
        let mut e = engine();
        for i in 0..25 {
            e.ingest(&at(i, -80.0 - i as f64 * 0.1), &[], 0.0);
        }
        assert_eq!(e.history_len(), 20);
        let first = e.history().next().unwrap();
        assert_eq!(first.timestamp, at(5, 0.0).timestamp);
    }

    #[test]
    fn test_weak_serving_switches_to_usable_neighbor_now() {
        let mut e = engine();
        e.ingest(&at(0, -112.0), &[neighbor(7, -100.0), neighbor(8, -118.0)], 0.0);
        let p = e.evaluate();
        assert!(p.imminent);
        assert_eq!(p.time_to_handover_ms, Some(0));
        assert_eq!(p.target_cell_id, Some(7));
        assert_eq!(p.reason, HandoverReason::SignalDegrading);
        assert_eq!(p.source, DecisionSource::Rules);
    }

    #[test]
    fn test_weak_serving_without_neighbors_is_coverage_hole() {
        let mut e = engine();
        e.ingest(&at(0, -115.0), &[neighbor(8, -118.0)], 0.0);
        let p = e.evaluate();
        assert!(!p.imminent);
        assert_eq!(p.reason, HandoverReason::CoverageHole);
        assert_eq!(p.target_cell_id, None);
    }

    #[test]
    fn test_fast_fade_extrapolates_time_to_threshold() {
        let mut e = engine();
        for i in 0..10 {
            e.ingest(&at(i, -80.0 - 3.0 * i as f64), &[neighbor(7, -112.0)], 0.0);
        }
        let p = e.evaluate();
        assert!(p.imminent);
        assert_eq!(p.reason, HandoverReason::SignalDegrading);
        assert_eq!(p.target_cell_id, Some(7));
        // latest -107, falling 3 dB/s, crosses -110 in 1 s
        assert_eq!(p.time_to_handover_ms, Some(1_000));
    }

    #[test]
    fn test_fade_uses_elapsed_time_not_sample_index() {
        let mut e = engine();
        // 3 dB per sample but samples are 2 s apart: 1.5 dB/s is not a fast fade
        for i in 0..10 {
            e.ingest(&at(2 * i, -80.0 - 3.0 * i as f64), &[], 0.0);
        }
        let p = e.evaluate();
        assert!(!p.imminent);
        assert_eq!(p.reason, HandoverReason::None);
    }

    #[test]
    fn test_distant_fade_is_beyond_horizon() {
        let mut e = engine();
        for i in 0..5 {
            e.ingest(&at(i, -60.0 - 3.0 * i as f64), &[neighbor(7, -100.0)], 0.0);
        }
        // -72 dBm falling 3 dB/s needs ~12.7 s to reach -110
        assert!(!e.evaluate().imminent);
    }

    #[test]
    fn test_fade_skips_unknown_samples() {
        let mut e = engine();
        e.ingest(&at(0, -95.0), &[], 0.0);
        e.ingest(&at(1, f64::NAN), &[], 0.0);
        e.ingest(&at(2, -101.0), &[], 0.0);
        e.ingest(&at(3, -104.0), &[neighbor(3, -108.0)], 0.0);
        let p = e.evaluate();
        assert!(p.imminent);
        assert_eq!(p.reason, HandoverReason::SignalDegrading);
    }

    #[test]
    fn test_stronger_neighbor_waits_grace_period() {
        let mut e = engine();
        e.ingest(&at(0, -95.0), &[neighbor(9, -91.0)], 0.0);
        let p = e.evaluate();
        assert!(p.imminent);
        assert_eq!(p.reason, HandoverReason::NeighborStronger);
        assert_eq!(p.time_to_handover_ms, Some(1_000));
        assert_eq!(p.target_cell_id, Some(9));
        assert_eq!(p.target_rsrp, -91.0);

        let mut e = engine();
        e.ingest(&at(0, -95.0), &[neighbor(9, -92.0)], 0.0);
        assert!(!e.evaluate().imminent);
    }

    #[test]
    fn test_velocity_rule_extrapolates_rising_neighbor() {
        let mut e = engine();
        for i in 0..5 {
            e.ingest(&at(i, -95.0), &[neighbor(4, -99.0 + i as f64)], 80.0);
        }
        let p = e.evaluate();
        assert!(p.imminent);
        assert_eq!(p.reason, HandoverReason::VelocityBased);
        assert_eq!(p.target_cell_id, Some(4));
        // neighbor at -95 rising 1 dB/s needs 3 dB more
        assert_eq!(p.time_to_handover_ms, Some(3_000));

        let mut slow = engine();
        for i in 0..5 {
            slow.ingest(&at(i, -95.0), &[neighbor(4, -99.0 + i as f64)], 30.0);
        }
        assert!(!slow.evaluate().imminent);
    }

    #[test]
    fn test_model_decides_with_enough_history() {
        let mut e = engine().with_model(constant_model([0.9, 0.4, 0.0]));
        for i in 0..9 {
            e.ingest(&at(i, -90.0), &[neighbor(5, -89.0)], 0.0);
        }
        // not enough history yet: rules say nothing
        let p = e.evaluate();
        assert_eq!(p.source, DecisionSource::Rules);
        assert!(!p.imminent);

        e.ingest(&at(9, -90.0), &[neighbor(5, -89.0)], 0.0);
        let p = e.evaluate();
        assert_eq!(p.source, DecisionSource::Model);
        assert!(p.imminent);
        assert_eq!(p.target_cell_id, Some(5));
        assert_eq!(p.time_to_handover_ms, Some(2_000));
        assert_eq!(p.reason, HandoverReason::LoadBalancing);
    }

    #[test]
    fn test_model_below_threshold_is_not_imminent() {
        let mut e = engine().with_model(constant_model([0.6, 0.4, 0.0]));
        for i in 0..10 {
            e.ingest(&at(i, -95.0), &[neighbor(5, -80.0)], 0.0);
        }
        let p = e.evaluate();
        assert_eq!(p.source, DecisionSource::Model);
        assert!(!p.imminent);
    }

    #[test]
    fn test_model_reason_follows_signal_state() {
        let mut e = engine().with_model(constant_model([0.95, 0.0, 3.0]));
        for i in 0..10 {
            e.ingest(&at(i, -95.0), &[neighbor(5, -85.0)], 0.0);
        }
        let p = e.evaluate();
        // index clamps to the only neighbor
        assert_eq!(p.target_cell_id, Some(5));
        assert_eq!(p.reason, HandoverReason::NeighborStronger);
    }

    #[test]
    fn test_model_failure_falls_back_to_rules() {
        let mut e = engine();
        e.set_model(Some(Box::new(BrokenModel)));
        assert!(e.has_model());
        for i in 0..10 {
            e.ingest(&at(i, -95.0), &[neighbor(9, -90.0)], 0.0);
        }
        let p = e.evaluate();
        assert_eq!(p.source, DecisionSource::Rules);
        assert_eq!(p.reason, HandoverReason::NeighborStronger);
    }
}
