//! E-UTRA band catalog and preferred-band responses.

use super::{payload, split_fields, DecodeError};
use crate::types::BandInfo;

/// `(band, downlink center MHz, downlink width MHz)`
const LTE_BANDS: &[(u16, f64, f64)] = &[
    (1, 2140.0, 60.0),
    (2, 1960.0, 60.0),
    (3, 1842.5, 75.0),
    (4, 2132.5, 45.0),
    (5, 881.5, 25.0),
    (7, 2655.0, 70.0),
    (8, 942.5, 35.0),
    (12, 737.5, 17.0),
    (13, 751.0, 10.0),
    (14, 763.0, 10.0),
    (17, 740.0, 12.0),
    (20, 806.0, 30.0),
    (25, 1962.5, 65.0),
    (26, 876.5, 35.0),
    (28, 780.5, 45.0),
    (29, 722.5, 11.0),
    (30, 2355.0, 10.0),
    (38, 2595.0, 50.0),
    (40, 2350.0, 100.0),
    (41, 2593.0, 194.0),
    (42, 3500.0, 200.0),
    (43, 3700.0, 200.0),
    (46, 5537.5, 775.0),
    (48, 3625.0, 150.0),
    (66, 2155.0, 90.0),
    (71, 634.5, 35.0),
];

/// Look up a band; unknown numbers get the zero-frequency sentinel.
pub fn band_info(band: u16) -> BandInfo {
    LTE_BANDS
        .iter()
        .find(|(n, _, _)| *n == band)
        .map_or_else(
            || BandInfo::unknown(band),
            |&(band, center_mhz, bandwidth_mhz)| BandInfo {
                band,
                center_mhz,
                bandwidth_mhz,
            },
        )
}

/// Decode the preferred LTE band list.
///
/// Two grammars are accepted:
/// - `+QCFG: "band",<gw_mask>,<lte_mask>,...` where bit `n-1` of the hex
///   LTE mask enables band `n`
/// - `+QNWPREFCFG: "lte_band",1:3:7`
pub fn parse_preferred_bands(text: &str) -> Result<Vec<BandInfo>, DecodeError> {
    if let Some(body) = payload(text, "+QCFG:") {
        let fields = split_fields(body);
        if fields.first() != Some(&"band") || fields.len() < 3 {
            return Err(DecodeError::malformed("QCFG", format!("'{body}'")));
        }
        let mask = parse_mask(fields[2])
            .ok_or_else(|| DecodeError::malformed("QCFG", format!("lte mask '{}'", fields[2])))?;
        return Ok((0u16..128)
            .filter(|bit| mask & (1u128 << bit) != 0)
            .map(|bit| band_info(bit + 1))
            .collect());
    }

    if let Some(body) = payload(text, "+QNWPREFCFG:") {
        let fields = split_fields(body);
        let list = fields
            .get(1)
            .ok_or_else(|| DecodeError::malformed("QNWPREFCFG", format!("'{body}'")))?;
        return list
            .split(':')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.trim()
                    .parse::<u16>()
                    .map(band_info)
                    .map_err(|_| DecodeError::malformed("QNWPREFCFG", format!("band '{s}'")))
            })
            .collect();
    }

    Err(DecodeError::malformed("BAND", "no band configuration line"))
}

fn parse_mask(raw: &str) -> Option<u128> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u128::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_lookup() {
        let b4 = band_info(4);
        assert_eq!(b4.center_mhz, 2132.5);
        assert!(b4.is_known());

        let unknown = band_info(99);
        assert_eq!(unknown.band, 99);
        assert_eq!(unknown.center_mhz, 0.0);
        assert!(!unknown.is_known());
    }

    #[test]
    fn test_qcfg_mask() {
        // bands 2, 4, 5, 12, 13, 66, 71
        let text = "+QCFG: \"band\",0x260,0x42000000000000181a,0x0\r\nOK";
        let bands: Vec<u16> = parse_preferred_bands(text)
            .unwrap()
            .iter()
            .map(|b| b.band)
            .collect();
        assert_eq!(bands, vec![2, 4, 5, 12, 13, 66, 71]);
    }

    #[test]
    fn test_qnwprefcfg_list() {
        let bands = parse_preferred_bands("+QNWPREFCFG: \"lte_band\",1:3:7:200\r\nOK").unwrap();
        assert_eq!(bands.len(), 4);
        assert_eq!(bands[1].center_mhz, 1842.5);
        assert!(!bands[3].is_known());
    }

    #[test]
    fn test_malformed_band_responses() {
        assert!(parse_preferred_bands("+QCFG: \"band\",0x260,zz").is_err());
        assert!(parse_preferred_bands("+QNWPREFCFG: \"lte_band\",1:x").is_err());
        assert!(parse_preferred_bands("OK").is_err());
    }
}
