//! Signal quality and system information responses.

use regex::Regex;
use std::sync::OnceLock;

use super::{payload, split_fields, DecodeError};
use crate::types::{bounded_rsrp, bounded_rsrq, BasicSignal, ExtendedSignal, RadioTechnology, SystemInfo};

/// `+CSQ` value meaning "not known or not detectable".
const CSQ_UNKNOWN: u8 = 99;

/// `+CESQ` value meaning "not known or not detectable" for rsrq/rsrp.
const CESQ_UNKNOWN: u8 = 255;

fn csq_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+CSQ:\s*(\d+)\s*,\s*(\d+)").expect("static regex"))
}

fn cesq_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\+CESQ:\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)")
            .expect("static regex")
    })
}

/// Decode `+CSQ: <rssi>,<ber>`.
///
/// RSSI index 0..=31 maps to -113..=-51 dBm in 2 dB steps; 99 is unknown
/// (NaN). Any other index is malformed rather than clamped.
pub fn parse_basic_signal(text: &str) -> Result<BasicSignal, DecodeError> {
    let caps = csq_regex()
        .captures(text)
        .ok_or_else(|| DecodeError::malformed("CSQ", "no +CSQ line"))?;

    let index: u8 = caps[1]
        .parse()
        .map_err(|_| DecodeError::malformed("CSQ", format!("rssi index '{}'", &caps[1])))?;
    let ber: u8 = caps[2]
        .parse()
        .map_err(|_| DecodeError::malformed("CSQ", format!("ber '{}'", &caps[2])))?;

    let rssi = match index {
        0..=31 => -113.0 + 2.0 * f64::from(index),
        CSQ_UNKNOWN => f64::NAN,
        other => {
            return Err(DecodeError::malformed(
                "CSQ",
                format!("rssi index {other} outside 0-31/99"),
            ))
        }
    };
    let ber = match ber {
        0..=7 => Some(ber),
        _ => None,
    };

    Ok(BasicSignal { rssi, ber })
}

/// Decode `+CESQ: <rxlev>,<ber>,<rscp>,<ecno>,<rsrq>,<rsrp>`.
///
/// rsrq 0..=34 maps to -20..=-3 dB in 0.5 dB steps, rsrp 0..=97 maps to
/// -141..=-44 dBm; 255 is unknown. Values off the reportable window are NaN.
pub fn parse_extended_signal(text: &str) -> Result<ExtendedSignal, DecodeError> {
    let caps = cesq_regex()
        .captures(text)
        .ok_or_else(|| DecodeError::malformed("CESQ", "no +CESQ line with six fields"))?;

    let rsrq_index: u8 = caps[5]
        .parse()
        .map_err(|_| DecodeError::malformed("CESQ", format!("rsrq '{}'", &caps[5])))?;
    let rsrp_index: u8 = caps[6]
        .parse()
        .map_err(|_| DecodeError::malformed("CESQ", format!("rsrp '{}'", &caps[6])))?;

    let rsrq = match rsrq_index {
        0..=34 => bounded_rsrq(-20.0 + 0.5 * f64::from(rsrq_index)),
        CESQ_UNKNOWN => f64::NAN,
        other => return Err(DecodeError::malformed("CESQ", format!("rsrq index {other}"))),
    };
    let rsrp = match rsrp_index {
        0..=97 => bounded_rsrp(-141.0 + f64::from(rsrp_index)),
        CESQ_UNKNOWN => f64::NAN,
        other => return Err(DecodeError::malformed("CESQ", format!("rsrp index {other}"))),
    };

    Ok(ExtendedSignal { rsrp, rsrq })
}

/// Decode `+QNWINFO: "<act>","<oper>","<band>",<channel>`.
pub fn parse_system_info(text: &str) -> Result<SystemInfo, DecodeError> {
    let body = payload(text, "+QNWINFO:")
        .ok_or_else(|| DecodeError::malformed("QNWINFO", "no +QNWINFO line"))?;
    let fields = split_fields(body);
    if fields.len() < 4 {
        return Err(DecodeError::malformed("QNWINFO", format!("'{body}'")));
    }
    let channel = fields[3]
        .parse::<u32>()
        .map_err(|_| DecodeError::malformed("QNWINFO", format!("channel '{}'", fields[3])))?;

    Ok(SystemInfo {
        radio: RadioTechnology::from_label(fields[0]),
        operator_code: fields[1].to_string(),
        band_label: fields[2].to_string(),
        channel,
    })
}
