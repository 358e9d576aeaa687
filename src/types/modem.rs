//! Modem-level records returned by the typed channel operations

use serde::{Deserialize, Serialize};

use super::RadioTechnology;

/// Manufacturer / model / firmware read at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemIdentity {
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
}

impl Default for ModemIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "unknown".to_string(),
            model: "unknown".to_string(),
            firmware: "unknown".to_string(),
        }
    }
}

impl std::fmt::Display for ModemIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.manufacturer, self.model, self.firmware)
    }
}

/// 3GPP 27.007 network registration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    NotRegistered,
    RegisteredHome,
    Searching,
    Denied,
    Unknown,
    RegisteredRoaming,
}

impl RegistrationStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => RegistrationStatus::NotRegistered,
            1 => RegistrationStatus::RegisteredHome,
            2 => RegistrationStatus::Searching,
            3 => RegistrationStatus::Denied,
            5 => RegistrationStatus::RegisteredRoaming,
            _ => RegistrationStatus::Unknown,
        }
    }

    pub fn is_registered(self) -> bool {
        matches!(
            self,
            RegistrationStatus::RegisteredHome | RegistrationStatus::RegisteredRoaming
        )
    }
}

/// Registration state plus the location fields present with extended reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub status: RegistrationStatus,
    pub tac: Option<u32>,
    pub cell_id: Option<u64>,
    pub access_technology: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierInfo {
    pub name: String,
    pub apn: String,
    pub access_technology: Option<u8>,
}

/// A frequency band with its downlink center frequency and width.
///
/// Bands missing from the lookup table carry `center_mhz == 0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandInfo {
    pub band: u16,
    pub center_mhz: f64,
    pub bandwidth_mhz: f64,
}

impl BandInfo {
    pub fn unknown(band: u16) -> Self {
        Self {
            band,
            center_mhz: 0.0,
            bandwidth_mhz: 0.0,
        }
    }

    pub fn is_known(&self) -> bool {
        self.center_mhz > 0.0
    }
}

/// Detailed system information (`+QNWINFO`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub radio: RadioTechnology,
    pub operator_code: String,
    pub band_label: String,
    pub channel: u32,
}

/// Basic signal quality (`+CSQ`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasicSignal {
    /// dBm, NaN when unknown
    pub rssi: f64,
    pub ber: Option<u8>,
}

/// Extended signal quality (`+CESQ`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtendedSignal {
    pub rsrp: f64,
    pub rsrq: f64,
}
