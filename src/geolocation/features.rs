//! Fingerprint feature extraction
//!
//! Maps a measurement onto a fixed 9-dimensional vector in `[0, 1]`. The
//! same derivation is used for training and for queries, so stored
//! fingerprints and live readings are directly comparable.

use crate::types::{CellTowerMeasurement, FEATURE_DIM};

/// Value used for a reading the modem reported as unknown.
pub const NEUTRAL: f64 = 0.5;

const RSRP_SPAN: (f64, f64) = (-140.0, -44.0);
const RSRQ_SPAN: (f64, f64) = (-20.0, -3.0);
const RSSI_SPAN: (f64, f64) = (-120.0, -25.0);
const SINR_SPAN: (f64, f64) = (-20.0, 30.0);
/// Largest LTE timing advance value
const TA_MAX: f64 = 1282.0;

/// Position of `value` within `(lo, hi)`, clamped to `[0, 1]`.
fn scale(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if value.is_nan() {
        return NEUTRAL;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Feature vector of one measurement.
///
/// Layout: rsrp, rsrq, rssi, sinr, timing advance, cell sector, site
/// bucket, mcc, mnc.
pub fn extract(m: &CellTowerMeasurement) -> [f64; FEATURE_DIM] {
    [
        scale(m.rsrp, RSRP_SPAN),
        scale(m.rsrq, RSRQ_SPAN),
        scale(m.rssi, RSSI_SPAN),
        scale(m.sinr, SINR_SPAN),
        scale(f64::from(m.timing_advance), (0.0, TA_MAX)),
        (m.cell_id % 256) as f64 / 255.0,
        ((m.cell_id >> 8) % 1000) as f64 / 999.0,
        (f64::from(m.mcc) / 999.0).min(1.0),
        (f64::from(m.mnc) / 999.0).min(1.0),
    ]
}

/// Euclidean distance between two feature vectors.
pub fn distance(a: &[f64; FEATURE_DIM], b: &[f64; FEATURE_DIM]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RadioTechnology;

    #[test]
    fn test_features_are_bounded() {
        let mut m = CellTowerMeasurement::unknown(RadioTechnology::Lte);
        m.rsrp = -30.0;
        m.rsrq = -25.0;
        m.timing_advance = 5_000;
        m.cell_id = u64::MAX;
        m.mcc = 310;
        m.mnc = 260;

        let f = extract(&m);
        assert!(f.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(f[0], 1.0);
        assert_eq!(f[1], 0.0);
        assert_eq!(f[4], 1.0);
        assert_eq!(f[5], 1.0);
    }

    #[test]
    fn test_unknown_readings_are_neutral() {
        let m = CellTowerMeasurement::unknown(RadioTechnology::Lte);
        let f = extract(&m);
        assert_eq!(&f[..4], &[NEUTRAL; 4]);
        assert_eq!(f[4], 0.0);
    }

    #[test]
    fn test_cell_id_split() {
        let mut m = CellTowerMeasurement::unknown(RadioTechnology::Lte);
        m.cell_id = (42 << 8) | 0x7F;
        let f = extract(&m);
        assert!((f[5] - 127.0 / 255.0).abs() < 1e-12);
        assert!((f[6] - 42.0 / 999.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance() {
        let a = [0.0; FEATURE_DIM];
        let mut b = [0.0; FEATURE_DIM];
        b[0] = 0.3;
        b[1] = 0.4;
        assert!((distance(&a, &b) - 0.5).abs() < 1e-12);
        assert_eq!(distance(&b, &b), 0.0);
    }
}
