//! Registration, carrier and IP address responses.

use std::net::{IpAddr, Ipv6Addr};

use super::{hex_field, int_field, payload, split_fields, DecodeError};
use crate::types::{CarrierInfo, RegistrationInfo, RegistrationStatus};

/// Carrier name fragment (lowercase) to default APN. Order matters: the
/// first fragment contained in the name wins.
const CARRIER_APNS: &[(&str, &str)] = &[
    ("t-mobile", "fast.t-mobile.com"),
    ("tmobile", "fast.t-mobile.com"),
    ("mint", "wholesale"),
    ("google fi", "h2g2"),
    ("at&t", "broadband"),
    ("firstnet", "firstnet-broadband"),
    ("verizon", "vzwinternet"),
    ("rogers", "ltemobile.apn"),
    ("telus", "isp.telus.com"),
    ("bell", "pda.bell.ca"),
    ("vodafone", "internet"),
    ("telstra", "telstra.internet"),
    ("optus", "connect"),
    ("orange", "orange"),
    ("telekom", "internet.telekom"),
];

/// APN used when no table entry matches.
pub const DEFAULT_APN: &str = "internet";

const REGISTRATION_PREFIXES: &[&str] = &["+CEREG:", "+C5GREG:", "+CGREG:", "+CREG:"];

/// Decode a registration response or URC.
///
/// Accepts the query form `n,stat[,tac,ci[,act]]` and the unsolicited form
/// `stat[,tac,ci[,act]]`. The query form is recognised by an unquoted
/// numeric second field.
pub fn parse_registration(text: &str) -> Result<RegistrationInfo, DecodeError> {
    let body = REGISTRATION_PREFIXES
        .iter()
        .find_map(|prefix| payload(text, prefix))
        .ok_or_else(|| DecodeError::malformed("REG", "no registration line"))?;

    let raw: Vec<&str> = body.split(',').map(str::trim).collect();
    let query_form = raw.len() >= 2 && !raw[1].starts_with('"') && raw[1].parse::<u8>().is_ok();
    let offset = usize::from(query_form);

    let fields = split_fields(body);
    let stat = int_field(&fields, offset)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| DecodeError::malformed("REG", format!("stat in '{body}'")))?;

    Ok(RegistrationInfo {
        status: RegistrationStatus::from_code(stat),
        tac: hex_field(&fields, offset + 1).and_then(|v| u32::try_from(v).ok()),
        cell_id: hex_field(&fields, offset + 2),
        access_technology: int_field(&fields, offset + 3).and_then(|v| u8::try_from(v).ok()),
    })
}

/// Decode `+COPS: <mode>[,<format>,"<oper>"[,<act>]]` and resolve its APN.
pub fn parse_carrier(text: &str) -> Result<CarrierInfo, DecodeError> {
    let body = payload(text, "+COPS:").ok_or_else(|| DecodeError::malformed("COPS", "no +COPS line"))?;
    let fields = split_fields(body);
    let name = fields
        .get(2)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| DecodeError::malformed("COPS", "no operator selected"))?;

    Ok(CarrierInfo {
        name: (*name).to_string(),
        apn: apn_for_carrier(name).to_string(),
        access_technology: int_field(&fields, 3).and_then(|v| u8::try_from(v).ok()),
    })
}

/// Case-insensitive substring lookup of a carrier's APN.
pub fn apn_for_carrier(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    CARRIER_APNS
        .iter()
        .find(|(fragment, _)| lower.contains(fragment))
        .map_or(DEFAULT_APN, |(_, apn)| *apn)
}

/// Decode `+CGPADDR: <cid>,"<addr>"`.
///
/// IPv6 is accepted in colon notation and in the 16-octet dotted form some
/// modems print. An all-zero address means none is assigned.
pub fn parse_ip_address(text: &str) -> Result<IpAddr, DecodeError> {
    let body = payload(text, "+CGPADDR:")
        .ok_or_else(|| DecodeError::malformed("CGPADDR", "no +CGPADDR line"))?;
    let fields = split_fields(body);
    let raw = fields
        .get(1)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| DecodeError::malformed("CGPADDR", "no address field"))?;

    let addr = raw
        .parse::<IpAddr>()
        .ok()
        .or_else(|| dotted_ipv6(raw))
        .ok_or_else(|| DecodeError::malformed("CGPADDR", format!("address '{raw}'")))?;

    if addr.is_unspecified() {
        return Err(DecodeError::malformed("CGPADDR", "no address assigned"));
    }
    Ok(addr)
}

fn dotted_ipv6(raw: &str) -> Option<IpAddr> {
    let octets: Vec<u8> = raw
        .split('.')
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    let octets: [u8; 16] = octets.try_into().ok()?;
    Some(IpAddr::V6(Ipv6Addr::from(octets)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_query_form() {
        let info = parse_registration("AT+CEREG?\r\n+CEREG: 2,1,\"2F1\",\"1A2B30C\",7\r\nOK").unwrap();
        assert_eq!(info.status, RegistrationStatus::RegisteredHome);
        assert_eq!(info.tac, Some(0x2F1));
        assert_eq!(info.cell_id, Some(0x1A2B30C));
        assert_eq!(info.access_technology, Some(7));

        let bare = parse_registration("+CREG: 0,5\r\nOK").unwrap();
        assert_eq!(bare.status, RegistrationStatus::RegisteredRoaming);
        assert_eq!(bare.tac, None);
    }

    #[test]
    fn test_registration_urc_form() {
        let info = parse_registration("+CEREG: 5,\"00C3\",\"0A1B2C3\",7").unwrap();
        assert_eq!(info.status, RegistrationStatus::RegisteredRoaming);
        assert_eq!(info.tac, Some(0xC3));

        let searching = parse_registration("+C5GREG: 2").unwrap();
        assert_eq!(searching.status, RegistrationStatus::Searching);
        assert!(!searching.status.is_registered());
    }

    #[test]
    fn test_registration_malformed() {
        assert!(parse_registration("+CEREG: x").is_err());
        assert!(parse_registration("OK").is_err());
    }

    #[test]
    fn test_carrier_and_apn() {
        let carrier = parse_carrier("+COPS: 0,0,\"T-Mobile USA\",7\r\nOK").unwrap();
        assert_eq!(carrier.name, "T-Mobile USA");
        assert_eq!(carrier.apn, "fast.t-mobile.com");
        assert_eq!(carrier.access_technology, Some(7));

        assert_eq!(apn_for_carrier("VERIZON WIRELESS"), "vzwinternet");
        assert_eq!(apn_for_carrier("Some Regional Telco"), DEFAULT_APN);
        assert!(parse_carrier("+COPS: 0\r\nOK").is_err());
    }

    #[test]
    fn test_ip_address() {
        let v4 = parse_ip_address("+CGPADDR: 1,\"10.45.0.2\"\r\nOK").unwrap();
        assert_eq!(v4.to_string(), "10.45.0.2");

        let v6 = parse_ip_address("+CGPADDR: 1,\"32.1.13.184.0.0.0.0.0.0.0.0.0.0.0.1\"").unwrap();
        assert_eq!(v6.to_string(), "2001:db8::1");

        assert!(parse_ip_address("+CGPADDR: 1,\"0.0.0.0\"").is_err());
        assert!(parse_ip_address("+CGPADDR: 1,\"bogus\"").is_err());
    }
}
