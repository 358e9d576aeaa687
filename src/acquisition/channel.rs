//! AT command channel controller
//!
//! Owns the connection to the modem and enforces one outstanding command at
//! a time. A dedicated reader thread frames the incoming byte stream into
//! lines and routes each line to one of two places:
//!
//! - the command response queue, while a command is in flight
//! - the unsolicited notification broadcast, otherwise (and always for
//!   URC-only prefixes such as `RING` and `+CMTI:`)
//!
//! Registration lines (`+CEREG:` and friends) are both query answers and
//! URCs. They join the response only while a registration query is in
//! flight.
//!
//! `send_command` holds the command port lock for the whole
//! write / read-until-terminator exchange, so responses never interleave.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::link::ModemLink;
use crate::config::{defaults, ModemConfig};
use crate::decoder::{is_final_line, parse_registration, DecodeError};
use crate::types::{ModemIdentity, RegistrationInfo};

/// Modem channel errors
#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Command '{command}' timed out")]
    CommandTimeout { command: String, partial: String },

    #[error("Command '{command}' rejected: {status}")]
    CommandRejected { command: String, status: String },

    #[error("Modem not connected")]
    NotConnected,

    #[error("Modem stream closed")]
    Disconnected,

    #[error("Serial I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Lines that are never part of a command response.
const URC_ONLY_PREFIXES: &[&str] = &[
    "RING",
    "+CRING:",
    "+CMTI:",
    "+CMT:",
    "+CDS:",
    "+QIND:",
    "RDY",
    "POWERED DOWN",
];

const REGISTRATION_URC_PREFIXES: &[&str] = &["+CREG:", "+CGREG:", "+CEREG:", "+C5GREG:"];

/// A line the modem sent on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsolicitedMessage {
    RegistrationChanged(RegistrationInfo),
    Ring,
    Other(String),
}

impl UnsolicitedMessage {
    pub fn from_line(line: &str) -> Self {
        if REGISTRATION_URC_PREFIXES.iter().any(|p| line.starts_with(p)) {
            if let Ok(info) = parse_registration(line) {
                return UnsolicitedMessage::RegistrationChanged(info);
            }
        }
        if line == "RING" || line.starts_with("+CRING:") {
            return UnsolicitedMessage::Ring;
        }
        UnsolicitedMessage::Other(line.to_string())
    }
}

fn is_unsolicited_only(line: &str) -> bool {
    URC_ONLY_PREFIXES.iter().any(|p| line.starts_with(p))
}

fn is_registration_line(line: &str) -> bool {
    REGISTRATION_URC_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// `AT+CREG?`, `AT+CGREG?`, `AT+CEREG?`, `AT+C5GREG?`
fn is_registration_query(command: &str) -> bool {
    let command = command.trim().to_ascii_uppercase();
    command.starts_with("AT+C") && command.ends_with("REG?")
}

/// Counters since the channel was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub commands_sent: u64,
    pub timeouts: u64,
    pub reconnections: u64,
}

// ============================================================================
// Connection state
// ============================================================================

/// Everything that exists only while connected. Lives behind the command
/// lock, so holding the lock means owning the port.
struct Connection {
    writer: SharedWriter,
    responses: mpsc::UnboundedReceiver<String>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    identity: ModemIdentity,
}

impl Connection {
    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        // The reader exits within one read poll; it is not joined so a
        // wedged driver cannot stall the caller.
        self.reader.take();
    }
}

/// Writes run on the blocking pool, so the writer is shared with it.
type SharedWriter = Arc<std::sync::Mutex<Box<dyn Write + Send>>>;

/// Command awaiting its response, shared with the reader thread.
#[derive(Debug, Default)]
struct InFlightCommand(std::sync::Mutex<Option<String>>);

impl InFlightCommand {
    fn set(&self, command: Option<&str>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = command.map(str::to_string);
    }

    /// Whether `line` belongs to the command currently in flight.
    fn claims(&self, line: &str) -> bool {
        let current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_deref() {
            None => false,
            Some(_) if is_unsolicited_only(line) => false,
            Some(command) if is_registration_line(line) => is_registration_query(command),
            Some(_) => true,
        }
    }
}

/// Clears the in-flight command however the exchange ends.
struct InFlight<'a>(&'a InFlightCommand);

impl<'a> InFlight<'a> {
    fn begin(slot: &'a InFlightCommand, command: &str) -> Self {
        slot.set(Some(command));
        Self(slot)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(None);
    }
}

/// Write one command line and flush, off the async worker threads.
async fn write_command(writer: &SharedWriter, command: &str) -> Result<(), ModemError> {
    let writer = Arc::clone(writer);
    let line = format!("{command}\r\n");
    tokio::task::spawn_blocking(move || {
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.flush()
    })
    .await
    .map_err(io::Error::other)??;
    Ok(())
}

// ============================================================================
// Channel
// ============================================================================

/// Exclusive command channel to one modem.
pub struct ModemChannel {
    link: Box<dyn ModemLink>,
    config: ModemConfig,
    port: Mutex<Option<Connection>>,
    in_flight: Arc<InFlightCommand>,
    notifications: broadcast::Sender<UnsolicitedMessage>,
    commands_sent: AtomicU64,
    timeouts: AtomicU64,
    reconnections: AtomicU64,
}

impl ModemChannel {
    pub fn new(link: Box<dyn ModemLink>, config: ModemConfig) -> Self {
        let (notifications, _) = broadcast::channel(defaults::NOTIFICATION_CAPACITY);
        Self {
            link,
            config,
            port: Mutex::new(None),
            in_flight: Arc::new(InFlightCommand::default()),
            notifications,
            commands_sent: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub(crate) fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.config.command_timeout_ms)
    }

    /// Subscribe to unsolicited lines. Lagging subscribers lose the oldest.
    pub fn notifications(&self) -> broadcast::Receiver<UnsolicitedMessage> {
        self.notifications.subscribe()
    }

    pub async fn is_connected(&self) -> bool {
        self.port.lock().await.is_some()
    }

    /// Identity read at connect time.
    pub async fn identity(&self) -> Option<ModemIdentity> {
        self.port.lock().await.as_ref().map(|c| c.identity.clone())
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
        }
    }

    /// Open the link, probe it with `AT`, and read the modem identity.
    ///
    /// Fails with `ModemError::Connection` unless the probe is acknowledged
    /// with `OK` within the connect timeout. Connecting an already connected
    /// channel is a no-op.
    pub async fn connect(&self) -> Result<(), ModemError> {
        let mut guard = self.port.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let target = self.link.describe();
        info!(link = %target, "Connecting to modem");

        let halves = self
            .link
            .open()
            .map_err(|e| ModemError::Connection(format!("{target}: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(
            halves.reader,
            tx,
            self.notifications.clone(),
            Arc::clone(&self.in_flight),
            Arc::clone(&stop),
        )?;

        let mut conn = Connection {
            writer: Arc::new(std::sync::Mutex::new(halves.writer)),
            responses: rx,
            stop,
            reader: Some(reader),
            identity: ModemIdentity::default(),
        };

        let probe_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        match self.exchange(&mut conn, "AT", probe_timeout).await {
            Ok(text) if text.lines().any(|l| l.trim() == "OK") => {}
            Ok(text) => {
                conn.shutdown();
                return Err(ModemError::Connection(format!(
                    "{target}: probe answered '{}'",
                    text.trim()
                )));
            }
            Err(e) => {
                conn.shutdown();
                return Err(ModemError::Connection(format!("{target}: probe failed: {e}")));
            }
        }

        conn.identity = ModemIdentity {
            manufacturer: self.identify(&mut conn, "AT+CGMI").await,
            model: self.identify(&mut conn, "AT+CGMM").await,
            firmware: self.identify(&mut conn, "AT+CGMR").await,
        };

        // Extended registration reports carry TAC and cell id in URCs.
        if let Err(e) = self.exchange(&mut conn, "AT+CEREG=2", self.command_timeout()).await {
            debug!(error = %e, "Extended registration reporting unavailable");
        }

        info!(modem = %conn.identity, "Modem connected");
        *guard = Some(conn);
        Ok(())
    }

    /// Close the link. Safe to call repeatedly and from failure paths.
    pub async fn disconnect(&self) {
        let mut guard = self.port.lock().await;
        if let Some(mut conn) = guard.take() {
            conn.shutdown();
            info!("Modem connection closed");
        }
    }

    /// Reconnect with exponential backoff.
    pub async fn reconnect(&self) -> Result<(), ModemError> {
        self.disconnect().await;

        let attempts = self.config.reconnect_attempts.max(1);
        for attempt in 1..=attempts {
            let delay_ms = (defaults::INITIAL_RECONNECT_DELAY_MS
                .saturating_mul(2u64.saturating_pow(attempt - 1)))
            .min(defaults::MAX_RECONNECT_DELAY_MS);

            warn!(attempt, max_attempts = attempts, delay_ms, "Reconnecting to modem");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            match self.connect().await {
                Ok(()) => {
                    self.reconnections.fetch_add(1, Ordering::Relaxed);
                    info!(attempt, "Modem reconnected");
                    return Ok(());
                }
                Err(e) => warn!(attempt, error = %e, "Reconnect attempt failed"),
            }
        }

        Err(ModemError::Connection(format!(
            "gave up after {attempts} reconnect attempts"
        )))
    }

    /// Send one command and collect its response.
    ///
    /// Holds the command lock until a terminator line (`OK`, `ERROR`,
    /// `+CME ERROR`, `+CMS ERROR`, `NO CARRIER`, `>`) arrives or `timeout`
    /// elapses, then returns every collected line. A timeout yields
    /// `ModemError::CommandTimeout` with the partial text; retrying is the
    /// caller's decision.
    pub async fn send_command(&self, command: &str, timeout: Duration) -> Result<String, ModemError> {
        let mut guard = self.port.lock().await;
        let conn = guard.as_mut().ok_or(ModemError::NotConnected)?;

        let result = self.exchange(conn, command, timeout).await;
        if matches!(result, Err(ModemError::Disconnected | ModemError::Io(_))) {
            warn!(command, "Modem link lost");
            if let Some(mut conn) = guard.take() {
                conn.shutdown();
            }
        }
        result
    }

    async fn exchange(
        &self,
        conn: &mut Connection,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ModemError> {
        // Leftovers from an earlier timed-out command.
        while let Ok(stale) = conn.responses.try_recv() {
            debug!(line = %stale, "Discarding stale modem line");
        }

        let _in_flight = InFlight::begin(&self.in_flight, command);
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
        debug!(command, "AT >");

        write_command(&conn.writer, command).await?;

        let deadline = Instant::now() + timeout;
        let mut response = String::new();
        loop {
            match tokio::time::timeout_at(deadline, conn.responses.recv()).await {
                Ok(Some(line)) => {
                    let done = is_final_line(&line);
                    response.push_str(&line);
                    response.push('\n');
                    if done {
                        debug!(command, lines = response.lines().count(), "AT <");
                        return Ok(response);
                    }
                }
                Ok(None) => return Err(ModemError::Disconnected),
                Err(_) => {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(command, timeout_ms = timeout.as_millis() as u64, "Modem command timed out");
                    return Err(ModemError::CommandTimeout {
                        command: command.to_string(),
                        partial: response,
                    });
                }
            }
        }
    }

    /// Single-line identity query; anything unusable becomes "unknown".
    async fn identify(&self, conn: &mut Connection, command: &str) -> String {
        match self.exchange(conn, command, self.command_timeout()).await {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty() && *l != command && !is_final_line(l))
                .map(|l| l.trim_start_matches("+CGMR:").trim().to_string())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            Err(e) => {
                debug!(command, error = %e, "Identity query failed");
                "unknown".to_string()
            }
        }
    }
}

impl Drop for ModemChannel {
    fn drop(&mut self) {
        if let Some(conn) = self.port.get_mut().as_mut() {
            conn.shutdown();
        }
    }
}

// ============================================================================
// Reader thread
// ============================================================================

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    responses: mpsc::UnboundedSender<String>,
    notifications: broadcast::Sender<UnsolicitedMessage>,
    in_flight: Arc<InFlightCommand>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("modem-reader".to_string())
        .spawn(move || {
            let mut buf = [0u8; 512];
            let mut pending: Vec<u8> = Vec::with_capacity(1024);

            while !stop.load(Ordering::Acquire) {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("Modem stream reached EOF");
                        break;
                    }
                    Ok(n) => pending.extend_from_slice(&buf[..n]),
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut
                                | io::ErrorKind::WouldBlock
                                | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        warn!(error = %e, "Modem read failed");
                        break;
                    }
                }

                for line in drain_lines(&mut pending) {
                    route_line(line, &responses, &notifications, &in_flight);
                }
            }
            // Dropping `responses` wakes any waiting command with Disconnected.
        })
}

/// Split complete lines off `pending`. A bare `>` data prompt has no line
/// ending and is emitted as soon as it is all that remains.
fn drain_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
        let raw: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        if !line.is_empty() {
            lines.push(line);
        }
    }
    let rest = String::from_utf8_lossy(pending);
    if rest.trim() == ">" {
        lines.push(">".to_string());
        pending.clear();
    }
    lines
}

fn route_line(
    line: String,
    responses: &mpsc::UnboundedSender<String>,
    notifications: &broadcast::Sender<UnsolicitedMessage>,
    in_flight: &InFlightCommand,
) {
    if in_flight.claims(&line) {
        let _ = responses.send(line);
        return;
    }
    debug!(line = %line, "Unsolicited modem line");
    // No subscribers is fine; the line is simply dropped.
    let _ = notifications.send(UnsolicitedMessage::from_line(&line));
}
