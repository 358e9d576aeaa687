//! Engineering mode (`AT+QENG`) serving cell and neighbor list.
//!
//! Serving cell layouts (field 0 is `"servingcell"`):
//!
//! ```text
//! LTE:     state,"LTE",duplex,mcc,mnc,cellid,pcid,earfcn,band,ul_bw,dl_bw,tac,rsrp,rsrq,rssi,sinr,srxlev[,ta]
//! NR5G-SA: state,"NR5G-SA",duplex,mcc,mnc,cellid,pcid,tac,arfcn,band,dl_bw,rsrp,rsrq,sinr,scs,srxlev
//! WCDMA:   state,"WCDMA",mcc,mnc,lac,cellid,uarfcn,psc,rac,rscp,ecio,...
//! GSM:     state,"GSM",mcc,mnc,lac,cellid,bsic,arfcn,band,rxlev,...
//! ```
//!
//! Neighbor lines: `"neighbourcell intra"|"neighbourcell inter","LTE",earfcn,pcid,rsrq,rsrp,rssi,...`
//!
//! Cell ids, TACs and LACs are hexadecimal.

use chrono::{DateTime, Utc};

use super::{float_field, hex_field, int_field, payloads, split_fields, DecodeError};
use crate::types::{
    bounded_rsrp, bounded_rsrq, CellReport, CellTowerMeasurement, NeighborCell, RadioTechnology,
};

const FAMILY: &str = "QENG";

/// Decode an engineering report stamped with the current time.
pub fn parse_engineering(text: &str) -> Result<CellReport, DecodeError> {
    parse_engineering_at(text, Utc::now())
}

/// Decode an engineering report captured at `timestamp`.
///
/// Needs exactly one serving cell line (none or several is malformed);
/// neighbor lines are optional. A
/// serving line that only carries a search state (`SEARCH`, `LIMSRV`) has no
/// cell to report and is malformed.
pub fn parse_engineering_at(
    text: &str,
    timestamp: DateTime<Utc>,
) -> Result<CellReport, DecodeError> {
    let mut serving = None;
    let mut neighbors = Vec::new();

    for body in payloads(text, "+QENG:") {
        let fields = split_fields(body);
        match fields.first().copied() {
            Some("servingcell") => {
                if serving.is_some() {
                    return Err(DecodeError::malformed(FAMILY, "more than one servingcell line"));
                }
                serving = Some(parse_serving(&fields, timestamp)?);
            }
            Some(kind) if kind.starts_with("neighbourcell") => {
                if let Some(neighbor) = parse_neighbor(&fields) {
                    neighbors.push(neighbor);
                }
            }
            _ => {}
        }
    }

    let serving = serving.ok_or_else(|| DecodeError::malformed(FAMILY, "no servingcell line"))?;
    Ok(CellReport { serving, neighbors })
}

fn parse_serving(
    fields: &[&str],
    timestamp: DateTime<Utc>,
) -> Result<CellTowerMeasurement, DecodeError> {
    if fields.len() < 4 {
        let state = fields.get(1).copied().unwrap_or("");
        return Err(DecodeError::malformed(
            FAMILY,
            format!("no serving cell (state {state})"),
        ));
    }

    let radio = RadioTechnology::from_label(fields[2]);
    let mut m = CellTowerMeasurement::unknown(radio);
    m.timestamp = timestamp;

    match radio {
        RadioTechnology::Lte => {
            require(fields, 17, "LTE")?;
            m.mcc = code(fields, 4)?;
            m.mnc = code(fields, 5)?;
            m.cell_id = hex_field(fields, 6)
                .ok_or_else(|| DecodeError::malformed(FAMILY, format!("cellid '{}'", fields[6])))?;
            m.pci = int_field(fields, 7).and_then(|v| u16::try_from(v).ok()).unwrap_or(0);
            m.earfcn = int_field(fields, 8).and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
            m.tac = hex_field(fields, 12).and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
            m.rsrp = bounded_rsrp(float_field(fields, 13));
            m.rsrq = bounded_rsrq(float_field(fields, 14));
            m.rssi = float_field(fields, 15);
            m.sinr = float_field(fields, 16);
            m.timing_advance = int_field(fields, 18)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0);
        }
        RadioTechnology::Nr5gSa => {
            require(fields, 14, "NR5G-SA")?;
            m.mcc = code(fields, 4)?;
            m.mnc = code(fields, 5)?;
            m.cell_id = hex_field(fields, 6)
                .ok_or_else(|| DecodeError::malformed(FAMILY, format!("cellid '{}'", fields[6])))?;
            m.pci = int_field(fields, 7).and_then(|v| u16::try_from(v).ok()).unwrap_or(0);
            m.tac = hex_field(fields, 8).and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
            m.earfcn = int_field(fields, 9).and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
            m.rsrp = bounded_rsrp(float_field(fields, 12));
            m.rsrq = bounded_rsrq(float_field(fields, 13));
            m.sinr = float_field(fields, 14);
        }
        RadioTechnology::Wcdma | RadioTechnology::Gsm => {
            require(fields, 8, "2G/3G")?;
            m.mcc = code(fields, 3)?;
            m.mnc = code(fields, 4)?;
            m.tac = hex_field(fields, 5).and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
            m.cell_id = hex_field(fields, 6).unwrap_or(0);
            let (channel, code_index) = if radio == RadioTechnology::Wcdma { (7, 8) } else { (8, 7) };
            m.earfcn = int_field(fields, channel).and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
            m.pci = int_field(fields, code_index).and_then(|v| u16::try_from(v).ok()).unwrap_or(0);
        }
        _ => {
            return Err(DecodeError::malformed(
                FAMILY,
                format!("unsupported radio '{}'", fields[2]),
            ))
        }
    }

    Ok(m)
}

fn parse_neighbor(fields: &[&str]) -> Option<NeighborCell> {
    if RadioTechnology::from_label(fields.get(1)?) != RadioTechnology::Lte {
        return None;
    }
    let earfcn = u32::try_from(int_field(fields, 2)?).ok()?;
    let pci = u16::try_from(int_field(fields, 3)?).ok()?;
    let rsrq = bounded_rsrq(float_field(fields, 4));
    let rsrp = bounded_rsrp(float_field(fields, 5));
    // A neighbor without a power reading is no handover candidate.
    if rsrp.is_nan() {
        return None;
    }
    Some(NeighborCell::from_channel(earfcn, pci, rsrp, rsrq))
}

fn require(fields: &[&str], len: usize, layout: &str) -> Result<(), DecodeError> {
    if fields.len() < len {
        return Err(DecodeError::malformed(
            FAMILY,
            format!("{layout} serving line has {} fields, need {len}", fields.len()),
        ));
    }
    Ok(())
}

fn code(fields: &[&str], index: usize) -> Result<u16, DecodeError> {
    int_field(fields, index)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| {
            DecodeError::malformed(
                FAMILY,
                format!("network code '{}'", fields.get(index).copied().unwrap_or("")),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LTE_REPORT: &str = "AT+QENG=\"servingcell\"\r\n\
+QENG: \"servingcell\",\"NOCONN\",\"LTE\",\"FDD\",310,260,1A2B30C,123,2300,4,5,5,2F1,-95,-10,-65,15,40\r\n\
\r\nOK\r\n\
+QENG: \"neighbourcell intra\",\"LTE\",2300,124,-12,-99,-70,8,30,0,0\r\n\
+QENG: \"neighbourcell inter\",\"LTE\",5110,301,-9,-88,-60,12,36,0,0,0\r\n\
+QENG: \"neighbourcell inter\",\"LTE\",5110,302,-,-,-,-,-,0,0,0\r\n\
OK\r\n";

    #[test]
    fn test_lte_serving_and_neighbors() {
        let report = parse_engineering(LTE_REPORT).unwrap();
        let s = &report.serving;
        assert_eq!(s.radio, RadioTechnology::Lte);
        assert_eq!((s.mcc, s.mnc), (310, 260));
        assert_eq!(s.cell_id, 0x1A2B30C);
        assert_eq!(s.pci, 123);
        assert_eq!(s.earfcn, 2300);
        assert_eq!(s.tac, 0x2F1);
        assert_eq!(s.rsrp, -95.0);
        assert_eq!(s.rsrq, -10.0);
        assert_eq!(s.rssi, -65.0);
        assert_eq!(s.sinr, 15.0);
        assert_eq!(s.timing_advance, 0);
        assert!(s.is_serving);

        // third neighbor has no rsrp and is dropped
        assert_eq!(report.neighbors.len(), 2);
        assert_eq!(report.neighbors[0].pci, 124);
        assert_eq!(report.neighbors[1].earfcn, 5110);
        assert_eq!(report.neighbors[1].rsrp, -88.0);
    }

    #[test]
    fn test_lte_timing_advance_and_unknown_fields() {
        let text = "+QENG: \"servingcell\",\"CONNECT\",\"LTE\",\"FDD\",262,1,ABCDEF,7,1300,3,5,5,1,-,-150,-70,-,30,12\r\nOK";
        let s = parse_engineering(text).unwrap().serving;
        assert!(s.rsrp.is_nan());
        // out of range is NaN, not clamped
        assert!(s.rsrq.is_nan());
        assert!(s.sinr.is_nan());
        assert_eq!(s.timing_advance, 12);
    }

    #[test]
    fn test_nr5g_sa_serving() {
        let text = "+QENG: \"servingcell\",\"NOCONN\",\"NR5G-SA\",\"TDD\",310,260,1A2B3C4D5,321,1A2B,627264,78,12,-85,-11,20,1,-\r\nOK";
        let s = parse_engineering(text).unwrap().serving;
        assert_eq!(s.radio, RadioTechnology::Nr5gSa);
        assert_eq!(s.cell_id, 0x1A2B3C4D5);
        assert_eq!(s.tac, 0x1A2B);
        assert_eq!(s.earfcn, 627_264);
        assert_eq!(s.rsrp, -85.0);
        assert_eq!(s.sinr, 20.0);
        assert!(s.rssi.is_nan());
    }

    #[test]
    fn test_search_state_is_malformed() {
        let err = parse_engineering("+QENG: \"servingcell\",\"SEARCH\"\r\nOK").unwrap_err();
        assert!(err.to_string().contains("SEARCH"));
    }

    #[test]
    fn test_missing_serving_is_malformed() {
        assert!(parse_engineering("OK").is_err());
        assert!(parse_engineering("+QENG: \"neighbourcell intra\",\"LTE\",2300,1,-10,-90,-60,5,20").is_err());
    }

    #[test]
    fn test_second_serving_line_is_malformed() {
        let text = "+QENG: \"servingcell\",\"NOCONN\",\"LTE\",\"FDD\",310,260,1A2B30C,123,2300,4,5,5,2F1,-95,-10,-65,15,40\r\n\
+QENG: \"servingcell\",\"NOCONN\",\"LTE\",\"FDD\",310,260,1A2B30D,124,2300,4,5,5,2F1,-90,-9,-60,18,40\r\nOK";
        let err = parse_engineering(text).unwrap_err();
        assert!(err.to_string().contains("more than one servingcell"));
    }

    #[test]
    fn test_truncated_lte_line_is_malformed() {
        let text = "+QENG: \"servingcell\",\"NOCONN\",\"LTE\",\"FDD\",310,260,1A2B";
        assert!(parse_engineering(text).is_err());
    }

    #[test]
    fn test_wcdma_serving_has_unknown_lte_metrics() {
        let text = "+QENG: \"servingcell\",\"NOCONN\",\"WCDMA\",310,410,2B5C,12345,4385,300,1,-85,-7\r\nOK";
        let s = parse_engineering(text).unwrap().serving;
        assert_eq!(s.radio, RadioTechnology::Wcdma);
        assert_eq!(s.cell_id, 0x12345);
        assert_eq!(s.earfcn, 4385);
        assert_eq!(s.pci, 300);
        assert!(s.rsrp.is_nan());
    }
}
