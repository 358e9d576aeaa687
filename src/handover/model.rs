//! Learned handover model
//!
//! A sequence model looks at the last N snapshots and returns
//! `[probability, fractional time, neighbor index]`. The engine only needs
//! the [`SequenceModel`] trait; [`DenseSequenceModel`] is the bundled
//! implementation, a small multilayer perceptron loaded from JSON.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::types::SignalSnapshot;

/// Velocity normalization ceiling (km/h).
const MAX_VELOCITY_KMH: f64 = 200.0;

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Model file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model file is not valid JSON: {0}")]
    Format(String),

    #[error("Model layers are inconsistent: {0}")]
    Shape(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Input shape mismatch: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    #[error("Model produced a non-finite output")]
    NonFinite,
}

/// Anything that can score a window of snapshots.
pub trait SequenceModel: Send + Sync {
    /// Timesteps consumed per inference.
    fn sequence_length(&self) -> usize;

    /// Values per timestep.
    fn feature_width(&self) -> usize;

    /// `[probability, fractional time to handover, neighbor index]`
    fn infer(&self, sequence: &[Vec<f64>]) -> Result<[f64; 3], ModelError>;
}

// ============================================================================
// Input tensor
// ============================================================================

/// Values per timestep for a model that sees `max_neighbors` neighbors.
pub fn input_width(max_neighbors: usize) -> usize {
    3 + max_neighbors + 1
}

fn unit(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        return 0.5;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// One row per snapshot: serving rsrp/rsrq/sinr, `max_neighbors` neighbor
/// rsrps (0 when absent), velocity.
pub fn build_sequence<'a>(
    snapshots: impl Iterator<Item = &'a SignalSnapshot>,
    max_neighbors: usize,
) -> Vec<Vec<f64>> {
    snapshots
        .map(|s| {
            let mut row = Vec::with_capacity(input_width(max_neighbors));
            row.push(unit(s.serving_rsrp, -140.0, -44.0));
            row.push(unit(s.serving_rsrq, -20.0, -3.0));
            row.push(unit(s.serving_sinr, -20.0, 30.0));
            row.extend((0..max_neighbors).map(|i| {
                s.neighbors
                    .get(i)
                    .map_or(0.0, |(_, rsrp)| unit(*rsrp, -140.0, -44.0))
            }));
            row.push(unit(s.velocity_kmh, 0.0, MAX_VELOCITY_KMH));
            row
        })
        .collect()
}

// ============================================================================
// Dense model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    Linear,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Linear => x,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DenseLayer {
    /// `[outputs][inputs]`
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.biases)
            .map(|(row, bias)| {
                let z = row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + bias;
                self.activation.apply(z)
            })
            .collect()
    }
}

/// Multilayer perceptron over the flattened input window.
#[derive(Debug, Clone, Deserialize)]
pub struct DenseSequenceModel {
    pub sequence_length: usize,
    pub feature_width: usize,
    pub layers: Vec<DenseLayer>,
}

impl DenseSequenceModel {
    /// Check that the layer stack maps the flattened window onto 3 outputs.
    pub fn validate(&self) -> Result<(), ModelLoadError> {
        if self.layers.is_empty() {
            return Err(ModelLoadError::Shape("no layers".to_string()));
        }
        let mut width = self.sequence_length * self.feature_width;
        if width == 0 {
            return Err(ModelLoadError::Shape("empty input window".to_string()));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.len() != layer.biases.len() || layer.weights.is_empty() {
                return Err(ModelLoadError::Shape(format!(
                    "layer {i}: {} weight rows, {} biases",
                    layer.weights.len(),
                    layer.biases.len()
                )));
            }
            if let Some(row) = layer.weights.iter().find(|r| r.len() != width) {
                return Err(ModelLoadError::Shape(format!(
                    "layer {i}: row of {} inputs, expected {width}",
                    row.len()
                )));
            }
            width = layer.biases.len();
        }
        if width != 3 {
            return Err(ModelLoadError::Shape(format!("final layer has {width} outputs, expected 3")));
        }
        Ok(())
    }
}

impl SequenceModel for DenseSequenceModel {
    fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn feature_width(&self) -> usize {
        self.feature_width
    }

    fn infer(&self, sequence: &[Vec<f64>]) -> Result<[f64; 3], ModelError> {
        if sequence.len() != self.sequence_length
            || sequence.iter().any(|row| row.len() != self.feature_width)
        {
            return Err(ModelError::Shape {
                expected: format!("{}x{}", self.sequence_length, self.feature_width),
                actual: format!(
                    "{}x{}",
                    sequence.len(),
                    sequence.first().map_or(0, Vec::len)
                ),
            });
        }

        let mut activations: Vec<f64> = sequence.iter().flatten().copied().collect();
        for layer in &self.layers {
            activations = layer.forward(&activations);
        }

        match activations.as_slice() {
            [p, t, idx] if p.is_finite() && t.is_finite() && idx.is_finite() => Ok([*p, *t, *idx]),
            [_, _, _] => Err(ModelError::NonFinite),
            other => Err(ModelError::Shape {
                expected: "3 outputs".to_string(),
                actual: format!("{} outputs", other.len()),
            }),
        }
    }
}

/// Load and validate a dense model from a JSON file.
pub fn load_model(path: &Path) -> Result<DenseSequenceModel, ModelLoadError> {
    let data = std::fs::read(path)?;
    let model: DenseSequenceModel =
        serde_json::from_slice(&data).map_err(|e| ModelLoadError::Format(e.to_string()))?;
    model.validate()?;
    Ok(model)
}
