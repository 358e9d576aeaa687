//! Cell measurement types
//!
//! One serving-cell reading plus the lighter neighbor records that accompany
//! it in an engineering-mode report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Valid RSRP window reported by LTE/NR modems (dBm).
pub const RSRP_RANGE_DBM: (f64, f64) = (-140.0, -44.0);

/// Valid RSRQ window reported by LTE/NR modems (dB).
pub const RSRQ_RANGE_DB: (f64, f64) = (-20.0, -3.0);

/// Radio access technology of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RadioTechnology {
    Gsm,
    Wcdma,
    Lte,
    Nr5gSa,
    Nr5gNsa,
    #[default]
    Unknown,
}

impl RadioTechnology {
    /// Map a modem RAT label (`"LTE"`, `"NR5G-SA"`, `"WCDMA"`, ...) to a tag.
    pub fn from_label(label: &str) -> Self {
        match label.trim().trim_matches('"').to_ascii_uppercase().as_str() {
            "GSM" | "EDGE" | "GPRS" => RadioTechnology::Gsm,
            "WCDMA" | "UMTS" | "HSPA" | "HSDPA" | "HSUPA" | "HSPA+" => RadioTechnology::Wcdma,
            "LTE" | "CAT-M" | "CAT-NB" | "FDD LTE" | "TDD LTE" => RadioTechnology::Lte,
            "NR5G-SA" | "NR5G" | "NR" => RadioTechnology::Nr5gSa,
            "NR5G-NSA" => RadioTechnology::Nr5gNsa,
            _ => RadioTechnology::Unknown,
        }
    }
}

impl std::fmt::Display for RadioTechnology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioTechnology::Gsm => write!(f, "GSM"),
            RadioTechnology::Wcdma => write!(f, "WCDMA"),
            RadioTechnology::Lte => write!(f, "LTE"),
            RadioTechnology::Nr5gSa => write!(f, "NR5G-SA"),
            RadioTechnology::Nr5gNsa => write!(f, "NR5G-NSA"),
            RadioTechnology::Unknown => write!(f, "unknown"),
        }
    }
}

// ============================================================================
// Serving cell
// ============================================================================

/// A single cell reading captured from the modem.
///
/// Signal fields are NaN when the radio reports "unknown" for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellTowerMeasurement {
    /// Mobile country code
    pub mcc: u16,
    /// Mobile network code
    pub mnc: u16,
    /// Global cell identifier (ECI for LTE, NCI for NR)
    pub cell_id: u64,
    /// Tracking / location area code
    pub tac: u32,
    /// Physical cell id
    pub pci: u16,
    /// Reference signal received power (dBm), [-140, -44] or NaN
    #[serde(with = "super::unknown_f64")]
    pub rsrp: f64,
    /// Reference signal received quality (dB), [-20, -3] or NaN
    #[serde(with = "super::unknown_f64")]
    pub rsrq: f64,
    /// Received signal strength indicator (dBm)
    #[serde(with = "super::unknown_f64")]
    pub rssi: f64,
    /// Signal to interference plus noise ratio (dB)
    #[serde(with = "super::unknown_f64")]
    pub sinr: f64,
    /// Timing advance, a coarse distance proxy to the serving tower
    pub timing_advance: u32,
    /// Absolute radio channel number (EARFCN / NR-ARFCN)
    pub earfcn: u32,
    pub radio: RadioTechnology,
    pub is_serving: bool,
    pub timestamp: DateTime<Utc>,
}

impl CellTowerMeasurement {
    /// Empty serving measurement with every signal field unknown.
    pub fn unknown(radio: RadioTechnology) -> Self {
        Self {
            mcc: 0,
            mnc: 0,
            cell_id: 0,
            tac: 0,
            pci: 0,
            rsrp: f64::NAN,
            rsrq: f64::NAN,
            rssi: f64::NAN,
            sinr: f64::NAN,
            timing_advance: 0,
            earfcn: 0,
            radio,
            is_serving: true,
            timestamp: Utc::now(),
        }
    }

    /// Signal quality class derived from RSRP.
    pub fn quality(&self) -> SignalQuality {
        SignalQuality::from_rsrp(self.rsrp)
    }
}

/// Keep an RSRP reading only if it lies inside the reportable window.
pub fn bounded_rsrp(value: f64) -> f64 {
    bounded(value, RSRP_RANGE_DBM)
}

/// Keep an RSRQ reading only if it lies inside the reportable window.
pub fn bounded_rsrq(value: f64) -> f64 {
    bounded(value, RSRQ_RANGE_DB)
}

fn bounded(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if value.is_finite() && value >= lo && value <= hi {
        value
    } else {
        f64::NAN
    }
}

// ============================================================================
// Neighbor cell
// ============================================================================

/// Non-serving cell seen in the neighbor list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborCell {
    pub cell_id: u64,
    pub pci: u16,
    #[serde(with = "super::unknown_f64")]
    pub rsrp: f64,
    #[serde(with = "super::unknown_f64")]
    pub rsrq: f64,
    pub earfcn: u32,
}

impl NeighborCell {
    /// Build a neighbor whose global id is unknown; the id becomes the
    /// channel-scoped key `(earfcn << 16) | pci`.
    pub fn from_channel(earfcn: u32, pci: u16, rsrp: f64, rsrq: f64) -> Self {
        Self {
            cell_id: neighbor_key(earfcn, pci),
            pci,
            rsrp,
            rsrq,
            earfcn,
        }
    }
}

/// Channel-scoped identifier for a cell that has no reported global id.
pub fn neighbor_key(earfcn: u32, pci: u16) -> u64 {
    (u64::from(earfcn) << 16) | u64::from(pci)
}

/// Serving cell plus neighbors, as captured by one engineering-mode poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellReport {
    pub serving: CellTowerMeasurement,
    pub neighbors: Vec<NeighborCell>,
}

// ============================================================================
// Signal quality classification
// ============================================================================

/// Coarse RSRP-based link quality class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
    #[default]
    Unknown,
}

impl SignalQuality {
    pub fn from_rsrp(rsrp: f64) -> Self {
        if rsrp.is_nan() {
            SignalQuality::Unknown
        } else if rsrp >= -80.0 {
            SignalQuality::Excellent
        } else if rsrp >= -90.0 {
            SignalQuality::Good
        } else if rsrp >= -100.0 {
            SignalQuality::Fair
        } else if rsrp >= -110.0 {
            SignalQuality::Poor
        } else {
            SignalQuality::VeryPoor
        }
    }

    /// Normalized score in [0, 1] used when blending location confidence.
    pub fn score(self) -> f64 {
        match self {
            SignalQuality::Excellent => 1.0,
            SignalQuality::Good => 0.8,
            SignalQuality::Fair => 0.6,
            SignalQuality::Poor => 0.4,
            SignalQuality::VeryPoor => 0.2,
            SignalQuality::Unknown => 0.0,
        }
    }
}

impl std::fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalQuality::Excellent => write!(f, "Excellent"),
            SignalQuality::Good => write!(f, "Good"),
            SignalQuality::Fair => write!(f, "Fair"),
            SignalQuality::Poor => write!(f, "Poor"),
            SignalQuality::VeryPoor => write!(f, "Very Poor"),
            SignalQuality::Unknown => write!(f, "Unknown"),
        }
    }
}
