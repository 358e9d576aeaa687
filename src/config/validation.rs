//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use super::TrackerConfig;
use crate::types::RSRP_RANGE_DBM;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `TrackerConfig`.
///
/// Maintained by hand to match tracker_config.rs; a new field needs a new
/// entry here.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [modem]
        "modem",
        "modem.device",
        "modem.baud_rate",
        "modem.command_timeout_ms",
        "modem.connect_timeout_ms",
        "modem.engineering_timeout_ms",
        "modem.rescan_timeout_ms",
        "modem.read_poll_ms",
        "modem.reconnect_attempts",
        // [polling]
        "polling",
        "polling.interval_ms",
        "polling.auto_handover",
        "polling.min_location_confidence",
        "polling.event_capacity",
        // [geolocation]
        "geolocation",
        "geolocation.k",
        "geolocation.min_training_points",
        "geolocation.fingerprint_path",
        "geolocation.min_uncertainty_m",
        "geolocation.max_uncertainty_m",
        // [handover]
        "handover",
        "handover.sequence_length",
        "handover.max_neighbors",
        "handover.serving_threshold_dbm",
        "handover.usable_neighbor_dbm",
        "handover.fade_rate_db_per_s",
        "handover.regression_window",
        "handover.prediction_horizon_ms",
        "handover.hysteresis_db",
        "handover.neighbor_grace_ms",
        "handover.velocity_threshold_kmh",
        "handover.velocity_min_trend_db",
        "handover.velocity_parity_window_db",
        "handover.model_probability_threshold",
        "handover.model_path",
        // [simulation]
        "simulation",
        "simulation.speed_kmh",
        "simulation.seed",
        "simulation.mcc",
        "simulation.mnc",
        "simulation.towers",
        // [simulation.propagation]
        "simulation.propagation",
        "simulation.propagation.tx_power_dbm",
        "simulation.propagation.antenna_gain_db",
        "simulation.propagation.frequency_mhz",
        "simulation.propagation.clutter_loss_db",
        "simulation.propagation.shadowing_sigma_db",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// Arrays of tables (`[[simulation.towers]]`) are reported by their own
/// path only.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Closest known key within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

/// Warnings for every key in `raw_toml` that `TrackerConfig` does not know.
///
/// Never fails; TOML syntax errors are reported by the serde pass.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

/// Check a parsed config for impossible and suspicious values.
///
/// Returns (errors, warnings). Errors prevent startup.
pub fn validate_ranges(config: &TrackerConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // --- modem ---
    let m = &config.modem;
    if m.device.trim().is_empty() {
        errors.push("modem.device must not be empty".to_string());
    }
    if m.baud_rate == 0 {
        errors.push("modem.baud_rate must be > 0".to_string());
    }
    for (name, value) in [
        ("modem.command_timeout_ms", m.command_timeout_ms),
        ("modem.connect_timeout_ms", m.connect_timeout_ms),
        ("modem.engineering_timeout_ms", m.engineering_timeout_ms),
        ("modem.rescan_timeout_ms", m.rescan_timeout_ms),
        ("modem.read_poll_ms", m.read_poll_ms),
    ] {
        if value == 0 {
            errors.push(format!("{name} must be > 0"));
        }
    }

    // --- polling ---
    let p = &config.polling;
    if p.interval_ms == 0 {
        errors.push("polling.interval_ms must be > 0".to_string());
    }
    if !(0.0..=1.0).contains(&p.min_location_confidence) {
        errors.push(format!(
            "polling.min_location_confidence = {:.3} must be within [0, 1]",
            p.min_location_confidence
        ));
    }
    if p.event_capacity == 0 {
        errors.push("polling.event_capacity must be > 0".to_string());
    }
    if p.interval_ms < 200 {
        warnings.push(ValidationWarning {
            field: "polling.interval_ms".to_string(),
            message: format!(
                "polling.interval_ms = {} is shorter than a typical engineering query",
                p.interval_ms
            ),
            suggestion: None,
        });
    }

    // --- geolocation ---
    let g = &config.geolocation;
    if g.k == 0 {
        errors.push("geolocation.k must be >= 1".to_string());
    }
    if g.min_training_points == 0 {
        errors.push("geolocation.min_training_points must be >= 1".to_string());
    }
    if !(g.min_uncertainty_m > 0.0 && g.min_uncertainty_m < g.max_uncertainty_m) {
        errors.push(format!(
            "geolocation uncertainty bounds must satisfy 0 < min ({:.1}) < max ({:.1})",
            g.min_uncertainty_m, g.max_uncertainty_m
        ));
    }

    // --- handover ---
    let h = &config.handover;
    if h.sequence_length == 0 {
        errors.push("handover.sequence_length must be >= 1".to_string());
    }
    if h.max_neighbors == 0 {
        errors.push("handover.max_neighbors must be >= 1".to_string());
    }
    if h.regression_window < 3 {
        errors.push(format!(
            "handover.regression_window = {} must be >= 3 to fit a slope",
            h.regression_window
        ));
    }
    for (name, value) in [
        ("handover.serving_threshold_dbm", h.serving_threshold_dbm),
        ("handover.usable_neighbor_dbm", h.usable_neighbor_dbm),
    ] {
        if !(RSRP_RANGE_DBM.0..=RSRP_RANGE_DBM.1).contains(&value) {
            errors.push(format!(
                "{name} = {value:.1} is outside the RSRP range ({:.0} to {:.0} dBm)",
                RSRP_RANGE_DBM.0, RSRP_RANGE_DBM.1
            ));
        }
    }
    if !(h.fade_rate_db_per_s < 0.0) {
        errors.push(format!(
            "handover.fade_rate_db_per_s = {:.2} must be negative",
            h.fade_rate_db_per_s
        ));
    }
    if h.prediction_horizon_ms == 0 {
        errors.push("handover.prediction_horizon_ms must be > 0".to_string());
    }
    for (name, value) in [
        ("handover.hysteresis_db", h.hysteresis_db),
        ("handover.velocity_threshold_kmh", h.velocity_threshold_kmh),
        ("handover.velocity_min_trend_db", h.velocity_min_trend_db),
        ("handover.velocity_parity_window_db", h.velocity_parity_window_db),
    ] {
        if !(value >= 0.0 && value.is_finite()) {
            errors.push(format!("{name} = {value} must be a finite value >= 0"));
        }
    }
    if !(h.model_probability_threshold > 0.0 && h.model_probability_threshold < 1.0) {
        errors.push(format!(
            "handover.model_probability_threshold = {:.3} must be within (0, 1)",
            h.model_probability_threshold
        ));
    }
    if h.usable_neighbor_dbm > h.serving_threshold_dbm {
        warnings.push(ValidationWarning {
            field: "handover.usable_neighbor_dbm".to_string(),
            message: format!(
                "handover.usable_neighbor_dbm ({:.1}) is above serving_threshold_dbm ({:.1}); \
                 failing links will rarely find a candidate",
                h.usable_neighbor_dbm, h.serving_threshold_dbm
            ),
            suggestion: None,
        });
    }
    if h.regression_window > 2 * h.sequence_length {
        warnings.push(ValidationWarning {
            field: "handover.regression_window".to_string(),
            message: format!(
                "handover.regression_window ({}) exceeds the retained history ({} snapshots)",
                h.regression_window,
                2 * h.sequence_length
            ),
            suggestion: None,
        });
    }

    // --- simulation ---
    let s = &config.simulation;
    if !(s.speed_kmh >= 0.0 && s.speed_kmh.is_finite()) {
        errors.push(format!("simulation.speed_kmh = {} must be >= 0", s.speed_kmh));
    }
    if s.propagation.frequency_mhz <= 0.0 {
        errors.push(format!(
            "simulation.propagation.frequency_mhz = {:.1} must be > 0",
            s.propagation.frequency_mhz
        ));
    }
    if s.propagation.shadowing_sigma_db < 0.0 {
        errors.push(format!(
            "simulation.propagation.shadowing_sigma_db = {:.2} cannot be negative",
            s.propagation.shadowing_sigma_db
        ));
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
