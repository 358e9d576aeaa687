//! Byte-stream links to a modem.
//!
//! A link only knows how to open a fresh read/write pair. Line framing,
//! routing and timeouts belong to the channel.

use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::config::ModemConfig;

/// Independent read and write halves of one open link.
pub struct LinkHalves {
    /// Must return `TimedOut`/`WouldBlock` periodically so the reader can stop.
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Anything that can produce a modem byte stream.
pub trait ModemLink: Send + Sync {
    /// Open the underlying device. Called on every (re)connect.
    fn open(&self) -> io::Result<LinkHalves>;

    /// Human-readable name for logging (e.g. "/dev/ttyUSB2 @ 115200").
    fn describe(&self) -> String;
}

// ============================================================================
// Serial port
// ============================================================================

/// 8N1 serial line without flow control.
pub struct SerialLink {
    device: String,
    baud_rate: u32,
    read_poll: Duration,
}

impl SerialLink {
    pub fn new(device: &str, baud_rate: u32) -> Self {
        Self {
            device: device.to_string(),
            baud_rate,
            read_poll: Duration::from_millis(crate::config::defaults::READ_POLL_MS),
        }
    }

    pub fn from_config(config: &ModemConfig) -> Self {
        Self::new(&config.device, config.baud_rate)
            .with_read_poll(Duration::from_millis(config.read_poll_ms))
    }

    /// Blocking read slice; also bounds how quickly the reader notices a stop.
    pub fn with_read_poll(mut self, read_poll: Duration) -> Self {
        self.read_poll = read_poll;
        self
    }
}

impl ModemLink for SerialLink {
    fn open(&self) -> io::Result<LinkHalves> {
        let port = serialport::new(&self.device, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_poll)
            .open()
            .map_err(io::Error::from)?;
        let writer = port.try_clone().map_err(io::Error::from)?;

        tracing::debug!(device = %self.device, baud = self.baud_rate, "Serial port opened");
        Ok(LinkHalves {
            reader: Box::new(port),
            writer: Box::new(writer),
        })
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.device, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_and_config() {
        let mut config = ModemConfig::default();
        config.device = "/dev/ttyACM3".to_string();
        config.baud_rate = 921_600;
        let link = SerialLink::from_config(&config);
        assert_eq!(link.describe(), "/dev/ttyACM3 @ 921600");
        assert_eq!(link.read_poll, Duration::from_millis(config.read_poll_ms));
    }

    #[test]
    fn test_open_missing_device_fails() {
        let link = SerialLink::new("/dev/cellsense-does-not-exist", 115_200);
        assert!(link.open().is_err());
    }
}
