//! Simulated LTE modem
//!
//! Answers the AT command vocabulary for a device driving along a straight
//! track past a handful of configured towers. Received power follows a
//! free-space path-loss model with log-normal shadowing:
//!
//! ```text
//! rsrp = tx_power + antenna_gain - FSPL(d, f) - clutter_loss + N(0, sigma)
//! FSPL = 20·log10(d_km) + 20·log10(f_MHz) + 32.44
//! ```
//!
//! Used by `--simulate` and by end-to-end tests; the full stack (channel,
//! decoder, engines) runs unchanged on top of it.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::acquisition::{at, LineInjector, LinkHalves, LoopbackLink, ModemLink};
use crate::config::{SimulationConfig, SimulatedTower};
use crate::types::{RSRP_RANGE_DBM, RSRQ_RANGE_DB};

/// Meters per LTE timing advance step.
const TA_STEP_M: f64 = 78.12;
const TA_MAX: f64 = 1282.0;
/// Closest distance used in the path-loss term (m).
const MIN_DISTANCE_M: f64 = 10.0;
/// Track continues this far past the last tower before wrapping (m).
const TRACK_OVERRUN_M: f64 = 1_000.0;

// ============================================================================
// Radio environment
// ============================================================================

/// Towers, propagation constants and the shadowing noise source.
pub struct RadioEnvironment {
    config: SimulationConfig,
    rng: StdRng,
    shadowing: Option<Normal<f64>>,
}

impl RadioEnvironment {
    pub fn new(config: SimulationConfig) -> Self {
        let sigma = config.propagation.shadowing_sigma_db;
        let shadowing = if sigma > 0.0 { Normal::new(0.0, sigma).ok() } else { None };
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            shadowing,
            config,
        }
    }

    pub fn towers(&self) -> &[SimulatedTower] {
        &self.config.towers
    }

    /// Free-space path loss (dB) at `distance_m`.
    pub fn path_loss_db(&self, distance_m: f64) -> f64 {
        let d_km = distance_m.max(MIN_DISTANCE_M) / 1000.0;
        20.0 * d_km.log10() + 20.0 * self.config.propagation.frequency_mhz.log10() + 32.44
    }

    /// Mean received power before shadowing (dBm).
    pub fn mean_rsrp(&self, distance_m: f64) -> f64 {
        let p = &self.config.propagation;
        p.tx_power_dbm + p.antenna_gain_db - self.path_loss_db(distance_m) - p.clutter_loss_db
    }

    /// One noisy RSRP reading, clamped to the reportable window.
    pub fn sample_rsrp(&mut self, distance_m: f64) -> f64 {
        let noise = self
            .shadowing
            .map_or(0.0, |dist| dist.sample(&mut self.rng));
        (self.mean_rsrp(distance_m) + noise).clamp(RSRP_RANGE_DBM.0, RSRP_RANGE_DBM.1)
    }

    /// Device position `elapsed` after the drive started. The track wraps
    /// around past the last tower.
    pub fn position_at(&self, elapsed: Duration) -> (f64, f64) {
        let track_len = self
            .config
            .towers
            .iter()
            .map(|t| t.x_m)
            .fold(0.0, f64::max)
            + TRACK_OVERRUN_M;
        let speed_m_s = self.config.speed_kmh / 3.6;
        ((speed_m_s * elapsed.as_secs_f64()) % track_len, 0.0)
    }
}

fn distance_m(tower: &SimulatedTower, (x, y): (f64, f64)) -> f64 {
    ((tower.x_m - x).powi(2) + (tower.y_m - y).powi(2)).sqrt()
}

/// LTE band of a downlink EARFCN, for the handful of bands used in drives.
fn band_for_earfcn(earfcn: u32) -> u16 {
    const RANGES: &[(u32, u32, u16)] = &[
        (0, 599, 1),
        (600, 1199, 2),
        (1200, 1949, 3),
        (1950, 2399, 4),
        (2400, 2649, 5),
        (2750, 3449, 7),
        (3450, 3799, 8),
        (5010, 5179, 12),
        (5180, 5279, 13),
        (6150, 6449, 20),
        (66_436, 67_335, 66),
        (68_586, 68_935, 71),
    ];
    RANGES
        .iter()
        .find(|(lo, hi, _)| (*lo..=*hi).contains(&earfcn))
        .map_or(0, |(_, _, band)| *band)
}

// ============================================================================
// Modem state machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellLock {
    None,
    Frequency(u32),
    Cell(u32, u16),
}

/// One tower as heard at one instant.
#[derive(Debug, Clone, Copy)]
struct Reading {
    tower: usize,
    rsrp: f64,
    distance_m: f64,
}

impl Reading {
    fn rsrq(&self) -> f64 {
        (-10.0 + (self.rsrp + 90.0) * 0.2).clamp(RSRQ_RANGE_DB.0, RSRQ_RANGE_DB.1)
    }

    fn sinr(&self) -> f64 {
        ((self.rsrp + 110.0) * 0.6).clamp(-20.0, 30.0)
    }

    fn rssi(&self) -> f64 {
        self.rsrp + 27.0
    }
}

/// Command interpreter behind [`SimulatedLink`].
pub struct SimulatedModem {
    env: RadioEnvironment,
    started: Instant,
    lock: CellLock,
    /// Latest sample, shared by the serving and neighbor queries of one poll
    readings: Vec<Reading>,
    rescans: u32,
}

impl SimulatedModem {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            env: RadioEnvironment::new(config),
            started: Instant::now(),
            lock: CellLock::None,
            readings: Vec::new(),
            rescans: 0,
        }
    }

    pub fn rescans(&self) -> u32 {
        self.rescans
    }

    /// Answer `command` at the current drive time.
    pub fn respond(&mut self, command: &str) -> String {
        let elapsed = self.started.elapsed();
        self.respond_at(command, elapsed)
    }

    /// Answer `command` as if `elapsed` had passed since the drive started.
    pub fn respond_at(&mut self, command: &str, elapsed: Duration) -> String {
        let command = command.trim();
        let body = match command {
            at::PROBE | "ATE0" | "AT+CEREG=2" => Some(String::new()),
            "AT+CGMI" => Some("Cellsense".to_string()),
            "AT+CGMM" => Some("SIM-LTE".to_string()),
            "AT+CGMR" => Some("SIMLTE01A01".to_string()),
            at::BASIC_SIGNAL => self.basic_signal(elapsed),
            at::EXTENDED_SIGNAL => self.extended_signal(elapsed),
            at::SYSTEM_INFO => self.system_info(elapsed),
            at::SERVING_CELL => self.serving_cell(elapsed),
            at::NEIGHBOUR_CELLS => self.neighbour_cells(),
            at::REGISTRATION => self.registration(elapsed),
            at::OPERATOR => Some("+COPS: 0,0,\"T-Mobile\",7".to_string()),
            at::IP_ADDRESS => Some("+CGPADDR: 1,\"10.64.0.2\"".to_string()),
            at::PREFERRED_BANDS => Some(self.band_config()),
            at::DEREGISTER => Some(String::new()),
            at::AUTO_REGISTER => {
                self.rescans += 1;
                Some(String::new())
            }
            c if c.starts_with("AT+QNWLOCK=") => self.apply_lock(c),
            _ => None,
        };

        match body {
            Some(body) if body.is_empty() => "\r\nOK\r\n".to_string(),
            Some(body) => format!("\r\n{body}\r\n\r\nOK\r\n"),
            None => {
                debug!(command, "Simulated modem rejected command");
                "\r\nERROR\r\n".to_string()
            }
        }
    }

    /// Sample every tower; strongest allowed tower first.
    fn sample(&mut self, elapsed: Duration) -> &[Reading] {
        let position = self.env.position_at(elapsed);
        let mut readings: Vec<Reading> = (0..self.env.towers().len())
            .map(|tower| {
                let distance_m = distance_m(&self.env.towers()[tower], position);
                Reading {
                    tower,
                    rsrp: self.env.sample_rsrp(distance_m),
                    distance_m,
                }
            })
            .collect();
        readings.sort_by(|a, b| b.rsrp.total_cmp(&a.rsrp));

        let towers = self.env.towers();
        let allowed = |r: &Reading| {
            let t = &towers[r.tower];
            match self.lock {
                CellLock::None => true,
                CellLock::Frequency(earfcn) => t.earfcn == earfcn,
                CellLock::Cell(earfcn, pci) => t.earfcn == earfcn && t.pci == pci,
            }
        };
        if let Some(pos) = readings.iter().position(|r| allowed(r)) {
            let serving = readings.remove(pos);
            readings.insert(0, serving);
        } else {
            readings.clear();
        }

        self.readings = readings;
        &self.readings
    }

    fn serving(&mut self, elapsed: Duration) -> Option<(Reading, SimulatedTower)> {
        let reading = *self.sample(elapsed).first()?;
        Some((reading, self.env.towers()[reading.tower].clone()))
    }

    fn basic_signal(&mut self, elapsed: Duration) -> Option<String> {
        let line = match self.serving(elapsed) {
            Some((r, _)) => {
                let index = ((r.rssi() + 113.0) / 2.0).round().clamp(0.0, 31.0) as u8;
                format!("+CSQ: {index},99")
            }
            None => "+CSQ: 99,99".to_string(),
        };
        Some(line)
    }

    fn extended_signal(&mut self, elapsed: Duration) -> Option<String> {
        let line = match self.serving(elapsed) {
            Some((r, _)) => {
                let rsrq = ((r.rsrq() + 20.0) * 2.0).round().clamp(0.0, 34.0) as u8;
                let rsrp = (r.rsrp + 141.0).round().clamp(0.0, 97.0) as u8;
                format!("+CESQ: 99,99,255,255,{rsrq},{rsrp}")
            }
            None => "+CESQ: 99,99,255,255,255,255".to_string(),
        };
        Some(line)
    }

    fn system_info(&mut self, elapsed: Duration) -> Option<String> {
        let (mcc, mnc) = (self.env.config.mcc, self.env.config.mnc);
        let line = match self.serving(elapsed) {
            Some((_, t)) => format!(
                "+QNWINFO: \"FDD LTE\",\"{mcc}{mnc:03}\",\"LTE BAND {}\",{}",
                band_for_earfcn(t.earfcn),
                t.earfcn
            ),
            None => "+QNWINFO: No Service".to_string(),
        };
        Some(line)
    }

    fn serving_cell(&mut self, elapsed: Duration) -> Option<String> {
        let (mcc, mnc) = (self.env.config.mcc, self.env.config.mnc);
        let line = match self.serving(elapsed) {
            Some((r, t)) => {
                let ta = (r.distance_m / TA_STEP_M).round().clamp(0.0, TA_MAX) as u32;
                format!(
                    "+QENG: \"servingcell\",\"NOCONN\",\"LTE\",\"FDD\",{mcc},{mnc},{:X},{},{},{},5,5,{:X},{:.0},{:.0},{:.0},{:.0},{:.0},{ta}",
                    t.cell_id,
                    t.pci,
                    t.earfcn,
                    band_for_earfcn(t.earfcn),
                    t.tac,
                    r.rsrp,
                    r.rsrq(),
                    r.rssi(),
                    r.sinr(),
                    r.rsrp + 140.0,
                )
            }
            None => "+QENG: \"servingcell\",\"SEARCH\"".to_string(),
        };
        Some(line)
    }

    /// Neighbors from the sample taken by the preceding serving cell query.
    fn neighbour_cells(&self) -> Option<String> {
        let Some(serving) = self.readings.first() else {
            return Some(String::new());
        };
        let serving_earfcn = self.env.towers()[serving.tower].earfcn;
        let lines: Vec<String> = self
            .readings
            .iter()
            .skip(1)
            .map(|r| {
                let t = &self.env.towers()[r.tower];
                let scope = if t.earfcn == serving_earfcn { "intra" } else { "inter" };
                format!(
                    "+QENG: \"neighbourcell {scope}\",\"LTE\",{},{},{:.0},{:.0},{:.0},{:.0},{:.0},0,0",
                    t.earfcn,
                    t.pci,
                    r.rsrq(),
                    r.rsrp,
                    r.rssi(),
                    r.sinr(),
                    r.rsrp + 140.0,
                )
            })
            .collect();
        Some(lines.join("\r\n"))
    }

    fn registration(&mut self, elapsed: Duration) -> Option<String> {
        let line = match self.serving(elapsed) {
            Some((_, t)) => format!("+CEREG: 2,1,\"{:X}\",\"{:X}\",7", t.tac, t.cell_id),
            None => "+CEREG: 2,2".to_string(),
        };
        Some(line)
    }

    fn band_config(&self) -> String {
        let mask = self
            .env
            .towers()
            .iter()
            .map(|t| band_for_earfcn(t.earfcn))
            .filter(|b| *b > 0)
            .fold(0u128, |mask, band| mask | (1u128 << (band - 1)));
        format!("+QCFG: \"band\",0x0,{mask:#x},0x0")
    }

    fn apply_lock(&mut self, command: &str) -> Option<String> {
        let args = command.strip_prefix("AT+QNWLOCK=\"common/lte\"")?;
        let values: Vec<u32> = args
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().parse().ok())
            .collect::<Option<_>>()?;
        self.lock = match values.as_slice() {
            [0] => CellLock::None,
            [1, earfcn, _] => CellLock::Frequency(*earfcn),
            [2, earfcn, pci] => CellLock::Cell(*earfcn, u16::try_from(*pci).ok()?),
            _ => return None,
        };
        debug!(lock = ?self.lock, "Simulated cell lock changed");
        Some(String::new())
    }
}

// ============================================================================
// Link
// ============================================================================

/// In-process modem link answered by a [`SimulatedModem`].
pub struct SimulatedLink {
    inner: LoopbackLink,
}

impl SimulatedLink {
    pub fn new(config: SimulationConfig) -> Self {
        let mut modem = SimulatedModem::new(config);
        Self {
            inner: LoopbackLink::new("simulated", move |cmd| modem.respond(cmd)),
        }
    }

    /// Push unsolicited lines into the simulated stream.
    pub fn injector(&self) -> LineInjector {
        self.inner.injector()
    }
}

impl ModemLink for SimulatedLink {
    fn open(&self) -> std::io::Result<LinkHalves> {
        self.inner.open()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{
        parse_basic_signal, parse_engineering, parse_extended_signal, parse_preferred_bands,
        parse_registration, parse_system_info,
    };
    use crate::types::RadioTechnology;

    fn quiet_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.propagation.shadowing_sigma_db = 0.0;
        config
    }

    #[test]
    fn test_free_space_path_loss() {
        let env = RadioEnvironment::new(quiet_config());
        // 1 km at 1900 MHz
        assert!((env.path_loss_db(1_000.0) - 98.0151).abs() < 1e-3);
        // loss grows 6 dB per doubling of distance
        let delta = env.path_loss_db(2_000.0) - env.path_loss_db(1_000.0);
        assert!((delta - 6.0206).abs() < 1e-3);
        assert_eq!(env.path_loss_db(0.0), env.path_loss_db(MIN_DISTANCE_M));
    }

    #[test]
    fn test_rsrp_is_clamped_and_noise_is_seeded() {
        let mut env = RadioEnvironment::new(quiet_config());
        assert_eq!(env.sample_rsrp(1.0), env.mean_rsrp(1.0).min(-44.0));
        assert_eq!(env.sample_rsrp(1e9), -140.0);

        let mut a = RadioEnvironment::new(SimulationConfig::default());
        let mut b = RadioEnvironment::new(SimulationConfig::default());
        let xs: Vec<f64> = (0..5).map(|_| a.sample_rsrp(2_000.0)).collect();
        let ys: Vec<f64> = (0..5).map(|_| b.sample_rsrp(2_000.0)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_position_wraps_along_track() {
        let env = RadioEnvironment::new(quiet_config());
        // 60 km/h for 60 s
        let (x, y) = env.position_at(Duration::from_secs(60));
        assert!((x - 1_000.0).abs() < 1e-6);
        assert_eq!(y, 0.0);
        // track is 7 km long
        let (x, _) = env.position_at(Duration::from_secs(480));
        assert!((x - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_engineering_report_decodes() {
        let mut modem = SimulatedModem::new(quiet_config());
        let at = Duration::ZERO;
        let mut text = modem.respond_at("AT+QENG=\"servingcell\"", at);
        text.push_str(&modem.respond_at("AT+QENG=\"neighbourcell\"", at));

        let report = parse_engineering(&text).unwrap();
        assert_eq!(report.serving.radio, RadioTechnology::Lte);
        assert_eq!(report.serving.cell_id, 0x01A2_B301);
        assert_eq!(report.serving.pci, 101);
        assert_eq!((report.serving.mcc, report.serving.mnc), (310, 260));
        assert_eq!(report.serving.timing_advance, 5);
        assert_eq!(report.neighbors.len(), 2);
        assert!(report.neighbors[0].rsrp >= report.neighbors[1].rsrp);
        assert!(report.neighbors.iter().all(|n| n.rsrp < report.serving.rsrp));
    }

    #[test]
    fn test_serving_changes_along_the_drive() {
        let mut modem = SimulatedModem::new(quiet_config());
        let pci_at = |modem: &mut SimulatedModem, secs: u64| {
            let text = modem.respond_at("AT+QENG=\"servingcell\"", Duration::from_secs(secs));
            parse_engineering(&text).unwrap().serving.pci
        };
        assert_eq!(pci_at(&mut modem, 0), 101);
        // x = 3000 m
        assert_eq!(pci_at(&mut modem, 180), 102);
        // x = 6000 m
        assert_eq!(pci_at(&mut modem, 360), 103);
    }

    #[test]
    fn test_cell_lock_pins_serving_cell() {
        let mut modem = SimulatedModem::new(quiet_config());
        let ok = modem.respond_at("AT+QNWLOCK=\"common/lte\",2,5110,103", Duration::ZERO);
        assert!(ok.trim_end().ends_with("OK"));

        let text = modem.respond_at("AT+QENG=\"servingcell\"", Duration::ZERO);
        assert_eq!(parse_engineering(&text).unwrap().serving.pci, 103);

        modem.respond_at("AT+QNWLOCK=\"common/lte\",0", Duration::ZERO);
        let text = modem.respond_at("AT+QENG=\"servingcell\"", Duration::ZERO);
        assert_eq!(parse_engineering(&text).unwrap().serving.pci, 101);

        let bad = modem.respond_at("AT+QNWLOCK=\"common/lte\",7", Duration::ZERO);
        assert!(bad.contains("ERROR"));
    }

    #[test]
    fn test_standard_queries_decode() {
        let mut modem = SimulatedModem::new(quiet_config());
        let at = Duration::ZERO;

        let basic = parse_basic_signal(&modem.respond_at("AT+CSQ", at)).unwrap();
        assert!(basic.rssi.is_finite());
        let extended = parse_extended_signal(&modem.respond_at("AT+CESQ", at)).unwrap();
        assert!(extended.rsrp.is_finite());
        let info = parse_system_info(&modem.respond_at("AT+QNWINFO", at)).unwrap();
        assert_eq!(info.channel, 2300);
        assert_eq!(info.band_label, "LTE BAND 4");
        let reg = parse_registration(&modem.respond_at("AT+CEREG?", at)).unwrap();
        assert_eq!(reg.cell_id, Some(0x01A2_B301));

        let bands: Vec<u16> = parse_preferred_bands(&modem.respond_at("AT+QCFG=\"band\"", at))
            .unwrap()
            .iter()
            .map(|b| b.band)
            .collect();
        assert_eq!(bands, vec![4, 12]);

        modem.respond_at("AT+COPS=2", at);
        modem.respond_at("AT+COPS=0", at);
        assert_eq!(modem.rescans(), 1);
        assert!(modem.respond_at("AT+UNKNOWN", at).contains("ERROR"));
    }
}
