//! Rule-based handover decisions
//!
//! Four rules are tried in order and the first that fires decides:
//!
//! 1. Serving below threshold: switch now, or report a coverage hole
//! 2. Fast fade: serving slope extrapolated to cross the threshold soon
//! 3. Stronger neighbor: a neighbor beats serving by the hysteresis margin
//! 4. Velocity: at speed, a rising neighbor reaches parity within the horizon

use std::collections::VecDeque;

use crate::config::HandoverConfig;
use crate::types::{HandoverPrediction, HandoverReason, SignalSnapshot};

/// Minimum valid samples for the fade regression.
const MIN_REGRESSION_SAMPLES: usize = 3;

pub fn evaluate(config: &HandoverConfig, history: &VecDeque<SignalSnapshot>) -> HandoverPrediction {
    let Some(latest) = history.back() else {
        return HandoverPrediction::none(f64::NAN);
    };
    let current = latest.serving_rsrp;

    if current < config.serving_threshold_dbm {
        return match best_usable_neighbor(config, latest) {
            Some(target) => {
                HandoverPrediction::recommend(current, target, 0, HandoverReason::SignalDegrading)
            }
            None => HandoverPrediction::coverage_hole(current),
        };
    }

    if let Some(prediction) = fade_rule(config, history) {
        return prediction;
    }

    if let Some(&(id, rsrp)) = latest.neighbors.first() {
        if rsrp > current + config.hysteresis_db {
            return HandoverPrediction::recommend(
                current,
                (id, rsrp),
                config.neighbor_grace_ms,
                HandoverReason::NeighborStronger,
            );
        }
    }

    if let Some(prediction) = velocity_rule(config, history) {
        return prediction;
    }

    HandoverPrediction::none(current)
}

/// Strongest neighbor above the usable floor. Neighbors are stored
/// strongest first.
pub(crate) fn best_usable_neighbor(config: &HandoverConfig, snapshot: &SignalSnapshot) -> Option<(u64, f64)> {
    snapshot
        .neighbors
        .iter()
        .copied()
        .find(|(_, rsrp)| *rsrp > config.usable_neighbor_dbm)
}

/// Snapshots inside the regression window, oldest first.
fn window<'a>(config: &HandoverConfig, history: &'a VecDeque<SignalSnapshot>) -> impl Iterator<Item = &'a SignalSnapshot> {
    let len = config.regression_window.max(2);
    history.iter().skip(history.len().saturating_sub(len))
}

/// Serving RSRP slope in dB/s over the regression window.
///
/// Samples are placed on their real elapsed time, so irregular polling does
/// not distort the rate. `None` without enough valid samples or when every
/// sample shares one timestamp.
pub(crate) fn serving_slope(config: &HandoverConfig, history: &VecDeque<SignalSnapshot>) -> Option<f64> {
    let mut samples = window(config, history).filter(|s| s.serving_rsrp.is_finite()).peekable();
    let origin = samples.peek()?.timestamp;
    let points: Vec<(f64, f64)> = samples
        .map(|s| (seconds_between(origin, s.timestamp), s.serving_rsrp))
        .collect();
    least_squares_slope(&points)
}

fn least_squares_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < MIN_REGRESSION_SAMPLES {
        return None;
    }
    let n = points.len() as f64;
    let x_mean = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let y_mean = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (x, y) in points {
        sum_xy += (x - x_mean) * (y - y_mean);
        sum_xx += (x - x_mean) * (x - x_mean);
    }

    if sum_xx.abs() < 1e-10 {
        return None;
    }
    Some(sum_xy / sum_xx)
}

fn fade_rule(config: &HandoverConfig, history: &VecDeque<SignalSnapshot>) -> Option<HandoverPrediction> {
    let latest = history.back()?;
    let current = latest.serving_rsrp;
    if !current.is_finite() {
        return None;
    }
    let slope = serving_slope(config, history)?;
    if slope >= config.fade_rate_db_per_s {
        return None;
    }

    let seconds_to_threshold = (config.serving_threshold_dbm - current) / slope;
    let delay_ms = (seconds_to_threshold.max(0.0) * 1000.0).round() as u64;
    if delay_ms > config.prediction_horizon_ms {
        return None;
    }

    Some(match best_usable_neighbor(config, latest) {
        Some(target) => {
            HandoverPrediction::recommend(current, target, delay_ms, HandoverReason::SignalDegrading)
        }
        None => HandoverPrediction::coverage_hole(current),
    })
}

fn velocity_rule(config: &HandoverConfig, history: &VecDeque<SignalSnapshot>) -> Option<HandoverPrediction> {
    let latest = history.back()?;
    let current = latest.serving_rsrp;
    if !(latest.velocity_kmh > config.velocity_threshold_kmh) || !current.is_finite() {
        return None;
    }

    let mut best: Option<(u64, f64, u64)> = None;
    for &(id, rsrp) in &latest.neighbors {
        if current - rsrp > config.velocity_parity_window_db {
            continue;
        }
        let Some(first) = window(config, history).find(|s| s.neighbor_rsrp(id).is_some()) else {
            continue;
        };
        let Some(first_rsrp) = first.neighbor_rsrp(id) else {
            continue;
        };
        let rise = rsrp - first_rsrp;
        let elapsed = seconds_between(first.timestamp, latest.timestamp);
        if rise <= config.velocity_min_trend_db || elapsed <= 0.0 {
            continue;
        }

        let rate = rise / elapsed;
        let seconds_to_parity = ((current + config.hysteresis_db - rsrp) / rate).max(0.0);
        let delay_ms = (seconds_to_parity * 1000.0).round() as u64;
        if delay_ms > config.prediction_horizon_ms {
            continue;
        }
        if best.map_or(true, |(_, _, t)| delay_ms < t) {
            best = Some((id, rsrp, delay_ms));
        }
    }

    best.map(|(id, rsrp, delay_ms)| {
        HandoverPrediction::recommend(current, (id, rsrp), delay_ms, HandoverReason::VelocityBased)
    })
}

fn seconds_between(from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_squares_slope() {
        let points = [(0.0, -90.0), (1.0, -93.0), (2.0, -96.0), (3.0, -99.0)];
        assert!((least_squares_slope(&points).unwrap() + 3.0).abs() < 1e-9);

        assert!(least_squares_slope(&points[..2]).is_none());
        let same_time = [(1.0, -90.0), (1.0, -95.0), (1.0, -99.0)];
        assert!(least_squares_slope(&same_time).is_none());
    }
}
