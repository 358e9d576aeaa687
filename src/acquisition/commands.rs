//! Typed modem operations
//!
//! Each operation is one or two `send_command` exchanges followed by a
//! decoder call. A response that ends in an error terminator becomes
//! `ModemError::CommandRejected`.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::channel::{ModemChannel, ModemError};
use crate::decoder::{
    parse_basic_signal, parse_carrier, parse_engineering, parse_extended_signal, parse_ip_address,
    parse_preferred_bands, parse_registration, parse_system_info, response_status, ResponseStatus,
};
use crate::types::{
    BandInfo, BasicSignal, CarrierInfo, CellReport, ExtendedSignal, RegistrationInfo, SystemInfo,
};

/// Command strings understood by Quectel LTE modules.
pub mod at {
    pub const PROBE: &str = "AT";
    pub const BASIC_SIGNAL: &str = "AT+CSQ";
    pub const EXTENDED_SIGNAL: &str = "AT+CESQ";
    pub const SYSTEM_INFO: &str = "AT+QNWINFO";
    pub const SERVING_CELL: &str = "AT+QENG=\"servingcell\"";
    pub const NEIGHBOUR_CELLS: &str = "AT+QENG=\"neighbourcell\"";
    pub const REGISTRATION: &str = "AT+CEREG?";
    pub const OPERATOR: &str = "AT+COPS?";
    pub const IP_ADDRESS: &str = "AT+CGPADDR=1";
    pub const PREFERRED_BANDS: &str = "AT+QCFG=\"band\"";
    pub const UNLOCK: &str = "AT+QNWLOCK=\"common/lte\",0";
    pub const DEREGISTER: &str = "AT+COPS=2";
    pub const AUTO_REGISTER: &str = "AT+COPS=0";

    pub fn lock_frequency(earfcn: u32) -> String {
        format!("AT+QNWLOCK=\"common/lte\",1,{earfcn},0")
    }

    pub fn lock_cell(earfcn: u32, pci: u16) -> String {
        format!("AT+QNWLOCK=\"common/lte\",2,{earfcn},{pci}")
    }
}

impl ModemChannel {
    /// Send `command` and require a non-error terminator.
    async fn query(&self, command: &str, timeout: Duration) -> Result<String, ModemError> {
        let text = self.send_command(command, timeout).await?;
        match response_status(&text) {
            ResponseStatus::Error(status) => Err(ModemError::CommandRejected {
                command: command.to_string(),
                status,
            }),
            _ => Ok(text),
        }
    }

    pub async fn basic_signal(&self) -> Result<BasicSignal, ModemError> {
        let text = self.query(at::BASIC_SIGNAL, self.command_timeout()).await?;
        Ok(parse_basic_signal(&text)?)
    }

    pub async fn extended_signal(&self) -> Result<ExtendedSignal, ModemError> {
        let text = self.query(at::EXTENDED_SIGNAL, self.command_timeout()).await?;
        Ok(parse_extended_signal(&text)?)
    }

    pub async fn system_info(&self) -> Result<SystemInfo, ModemError> {
        let text = self.query(at::SYSTEM_INFO, self.command_timeout()).await?;
        Ok(parse_system_info(&text)?)
    }

    /// Serving cell plus neighbors from engineering mode.
    ///
    /// Both queries share one engineering timeout. A rejected neighbor
    /// query yields a report without neighbors.
    pub async fn engineering_report(&self) -> Result<CellReport, ModemError> {
        let envelope = Duration::from_millis(self.config().engineering_timeout_ms);
        let started = Instant::now();

        let mut text = self.query(at::SERVING_CELL, envelope).await?;

        let remaining = envelope.saturating_sub(started.elapsed());
        match self.query(at::NEIGHBOUR_CELLS, remaining).await {
            Ok(neighbors) => text.push_str(&neighbors),
            Err(ModemError::CommandRejected { status, .. }) => {
                debug!(status = %status, "Neighbor cell query rejected");
            }
            Err(e) => return Err(e),
        }

        Ok(parse_engineering(&text)?)
    }

    pub async fn registration(&self) -> Result<RegistrationInfo, ModemError> {
        let text = self.query(at::REGISTRATION, self.command_timeout()).await?;
        Ok(parse_registration(&text)?)
    }

    pub async fn carrier(&self) -> Result<CarrierInfo, ModemError> {
        let text = self.query(at::OPERATOR, self.command_timeout()).await?;
        Ok(parse_carrier(&text)?)
    }

    pub async fn ip_address(&self) -> Result<IpAddr, ModemError> {
        let text = self.query(at::IP_ADDRESS, self.command_timeout()).await?;
        Ok(parse_ip_address(&text)?)
    }

    pub async fn preferred_bands(&self) -> Result<Vec<BandInfo>, ModemError> {
        let text = self.query(at::PREFERRED_BANDS, self.command_timeout()).await?;
        Ok(parse_preferred_bands(&text)?)
    }

    /// Pin the modem to one cell on one channel.
    pub async fn lock_cell(&self, earfcn: u32, pci: u16) -> Result<(), ModemError> {
        self.query(&at::lock_cell(earfcn, pci), self.command_timeout())
            .await?;
        info!(earfcn, pci, "Cell lock applied");
        Ok(())
    }

    pub async fn lock_frequency(&self, earfcn: u32) -> Result<(), ModemError> {
        self.query(&at::lock_frequency(earfcn), self.command_timeout())
            .await?;
        info!(earfcn, "Frequency lock applied");
        Ok(())
    }

    pub async fn unlock_cell(&self) -> Result<(), ModemError> {
        self.query(at::UNLOCK, self.command_timeout()).await?;
        info!("Cell lock cleared");
        Ok(())
    }

    /// Deregister, then return to automatic operator selection.
    pub async fn rescan(&self) -> Result<(), ModemError> {
        let timeout = Duration::from_millis(self.config().rescan_timeout_ms);
        info!("Forcing network rescan");
        self.query(at::DEREGISTER, timeout).await?;
        self.query(at::AUTO_REGISTER, timeout).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::acquisition::loopback::LoopbackLink;
    use crate::config::ModemConfig;
    use crate::types::{RadioTechnology, RegistrationStatus};

    const SERVING: &str = "+QENG: \"servingcell\",\"NOCONN\",\"LTE\",\"FDD\",310,260,1A2B30C,123,5110,12,3,3,2F1,-95,-10,-65,12,0,-,40";
    const NEIGHBOR: &str = "+QENG: \"neighbourcell intra\",\"LTE\",5110,124,-12,-101,-70,0,0,-,-,-,-";

    fn modem(
        neighbor_rejected: bool,
    ) -> (ModemChannel, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        let link = LoopbackLink::new("typed", move |cmd| {
            seen.lock().unwrap().push(cmd.to_string());
            let body = match cmd {
                "AT" | "AT+CEREG=2" => String::new(),
                "AT+CGMI" => "Quectel\r\n".to_string(),
                "AT+CGMM" => "EC25\r\n".to_string(),
                "AT+CGMR" => "EC25EFAR06A06M4G\r\n".to_string(),
                "AT+CSQ" => "+CSQ: 20,99\r\n".to_string(),
                "AT+CESQ" => "+CESQ: 99,99,255,255,20,50\r\n".to_string(),
                "AT+QNWINFO" => "+QNWINFO: \"FDD LTE\",\"310260\",\"LTE BAND 4\",5110\r\n".to_string(),
                "AT+QENG=\"servingcell\"" => format!("{SERVING}\r\n"),
                "AT+QENG=\"neighbourcell\"" if neighbor_rejected => {
                    return "\r\n+CME ERROR: 4\r\n".to_string()
                }
                "AT+QENG=\"neighbourcell\"" => format!("{NEIGHBOR}\r\n"),
                "AT+CEREG?" => "+CEREG: 2,1,\"2F1\",\"1A2B30C\",7\r\n".to_string(),
                "AT+COPS?" => "+COPS: 0,0,\"T-Mobile\",7\r\n".to_string(),
                "AT+CGPADDR=1" => "+CGPADDR: 1,\"10.42.7.9\"\r\n".to_string(),
                "AT+QCFG=\"band\"" => "+QCFG: \"band\",0x0,0x1a,0x0\r\n".to_string(),
                c if c.starts_with("AT+QNWLOCK=") || c.starts_with("AT+COPS=") => String::new(),
                _ => return "\r\nERROR\r\n".to_string(),
            };
            format!("\r\n{body}\r\nOK\r\n")
        });
        let config = ModemConfig {
            command_timeout_ms: 500,
            connect_timeout_ms: 500,
            engineering_timeout_ms: 1_000,
            rescan_timeout_ms: 500,
            ..ModemConfig::default()
        };
        (ModemChannel::new(Box::new(link), config), log)
    }

    #[tokio::test]
    async fn test_signal_and_system_queries() {
        let (channel, _) = modem(false);
        channel.connect().await.unwrap();

        let basic = channel.basic_signal().await.unwrap();
        assert_eq!(basic.rssi, -73.0);

        let extended = channel.extended_signal().await.unwrap();
        assert_eq!(extended.rsrq, -10.0);
        assert_eq!(extended.rsrp, -91.0);

        let info = channel.system_info().await.unwrap();
        assert_eq!(info.radio, RadioTechnology::Lte);
        assert_eq!(info.channel, 5110);
    }

    #[tokio::test]
    async fn test_engineering_report_merges_both_queries() {
        let (channel, log) = modem(false);
        channel.connect().await.unwrap();

        let report = channel.engineering_report().await.unwrap();
        assert_eq!(report.serving.cell_id, 0x1A2B30C);
        assert_eq!(report.serving.rsrp, -95.0);
        assert_eq!(report.neighbors.len(), 1);
        assert_eq!(report.neighbors[0].pci, 124);

        let sent = log.lock().unwrap().clone();
        let serving = sent.iter().position(|c| c == at::SERVING_CELL).unwrap();
        let neighbour = sent.iter().position(|c| c == at::NEIGHBOUR_CELLS).unwrap();
        assert!(serving < neighbour);
    }

    #[tokio::test]
    async fn test_engineering_report_without_neighbor_support() {
        let (channel, _) = modem(true);
        channel.connect().await.unwrap();
        let report = channel.engineering_report().await.unwrap();
        assert!(report.neighbors.is_empty());
        assert_eq!(report.serving.pci, 123);
    }

    #[tokio::test]
    async fn test_network_queries() {
        let (channel, _) = modem(false);
        channel.connect().await.unwrap();

        let reg = channel.registration().await.unwrap();
        assert_eq!(reg.status, RegistrationStatus::RegisteredHome);

        let carrier = channel.carrier().await.unwrap();
        assert_eq!(carrier.apn, "fast.t-mobile.com");

        let ip = channel.ip_address().await.unwrap();
        assert_eq!(ip.to_string(), "10.42.7.9");

        let bands: Vec<u16> = channel
            .preferred_bands()
            .await
            .unwrap()
            .iter()
            .map(|b| b.band)
            .collect();
        assert_eq!(bands, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn test_lock_and_rescan_commands() {
        let (channel, log) = modem(false);
        channel.connect().await.unwrap();

        channel.lock_cell(5110, 123).await.unwrap();
        channel.lock_frequency(5110).await.unwrap();
        channel.unlock_cell().await.unwrap();
        channel.rescan().await.unwrap();

        let sent = log.lock().unwrap().clone();
        let tail: Vec<&str> = sent.iter().rev().take(5).rev().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "AT+QNWLOCK=\"common/lte\",2,5110,123",
                "AT+QNWLOCK=\"common/lte\",1,5110,0",
                "AT+QNWLOCK=\"common/lte\",0",
                "AT+COPS=2",
                "AT+COPS=0",
            ]
        );
    }

    #[tokio::test]
    async fn test_error_response_is_rejected() {
        let (channel, _) = modem(false);
        channel.connect().await.unwrap();
        let err = channel.query("AT+BOGUS", Duration::from_millis(300)).await.unwrap_err();
        match err {
            ModemError::CommandRejected { command, status } => {
                assert_eq!(command, "AT+BOGUS");
                assert_eq!(status, "ERROR");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
