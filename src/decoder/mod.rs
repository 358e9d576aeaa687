//! Modem response decoder
//!
//! Stateless parsing of AT command responses into typed records. Every
//! function takes the raw response text exactly as the channel returned it
//! (echo, blank lines and the final `OK` included) and either produces a
//! populated structure or `DecodeError::MalformedResponse`.
//!
//! Response families:
//! - `+CSQ` basic signal quality, `+CESQ` extended signal quality
//! - `+QNWINFO` detailed system information
//! - `+QENG` engineering mode serving cell and neighbor list
//! - `+CREG` / `+CGREG` / `+CEREG` / `+C5GREG` registration state
//! - `+COPS` carrier, `+CGPADDR` IP address
//! - `+QCFG="band"` / `+QNWPREFCFG` preferred bands

mod bands;
mod engineering;
mod network;
mod signal;

pub use bands::{band_info, parse_preferred_bands};
pub use engineering::parse_engineering;
pub use network::{apn_for_carrier, parse_carrier, parse_ip_address, parse_registration};
pub use signal::{parse_basic_signal, parse_extended_signal, parse_system_info};

use thiserror::Error;

/// Decoder errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed {family} response: {detail}")]
    MalformedResponse { family: &'static str, detail: String },
}

impl DecodeError {
    pub(crate) fn malformed(family: &'static str, detail: impl Into<String>) -> Self {
        DecodeError::MalformedResponse {
            family,
            detail: detail.into(),
        }
    }
}

/// Outcome of a command exchange as seen from its final line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    /// `ERROR`, `+CME ERROR: n`, `+CMS ERROR: n` or `NO CARRIER`
    Error(String),
    /// `> ` data prompt
    Prompt,
    /// No terminator seen (timed out mid-response)
    Incomplete,
}

/// Whether a single line ends a command response.
pub fn is_final_line(line: &str) -> bool {
    let line = line.trim_end();
    line == "OK"
        || line == "ERROR"
        || line == ">"
        || line == "NO CARRIER"
        || line.starts_with("+CME ERROR")
        || line.starts_with("+CMS ERROR")
}

/// Classify a raw response by its last non-empty line.
pub fn response_status(text: &str) -> ResponseStatus {
    let last = text.lines().map(str::trim).rev().find(|l| !l.is_empty());
    match last {
        Some("OK") => ResponseStatus::Ok,
        Some(">") => ResponseStatus::Prompt,
        Some(line) if is_final_line(line) => ResponseStatus::Error(line.to_string()),
        _ => ResponseStatus::Incomplete,
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Payloads of every line starting with `prefix`, prefix stripped.
pub(crate) fn payloads<'a>(text: &'a str, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    text.lines()
        .map(str::trim)
        .filter_map(move |line| line.strip_prefix(prefix))
        .map(str::trim)
}

/// First payload for `prefix`.
pub(crate) fn payload<'a>(text: &'a str, prefix: &'a str) -> Option<&'a str> {
    payloads(text, prefix).next()
}

/// Split a comma separated payload, keeping commas inside double quotes.
/// Surrounding quotes and whitespace are stripped from every field.
pub(crate) fn split_fields(payload: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in payload.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(clean_field(&payload[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(clean_field(&payload[start..]));
    fields
}

fn clean_field(field: &str) -> &str {
    field.trim().trim_matches('"').trim()
}

/// Decimal integer field; `-` and empty mean "not reported".
pub(crate) fn int_field(fields: &[&str], index: usize) -> Option<i64> {
    fields
        .get(index)
        .filter(|f| !f.is_empty() && **f != "-")
        .and_then(|f| f.parse::<i64>().ok())
}

/// Float field; missing or `-` become NaN.
pub(crate) fn float_field(fields: &[&str], index: usize) -> f64 {
    fields
        .get(index)
        .filter(|f| !f.is_empty() && **f != "-")
        .and_then(|f| f.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Hexadecimal field with or without a `0x` prefix.
pub(crate) fn hex_field(fields: &[&str], index: usize) -> Option<u64> {
    let raw = fields.get(index)?.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    if digits.is_empty() || digits == "-" {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
