//! Tracker Configuration - every tunable as an operator-editable TOML value
//!
//! Each struct implements `Default` from `config::defaults`, so a missing
//! file or a partial file behaves exactly like the built-in settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "CELLSENSE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "cellsense.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `TrackerConfig::load()` which searches:
/// 1. `$CELLSENSE_CONFIG` env var
/// 2. `./cellsense.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Serial line and command timing
    #[serde(default)]
    pub modem: ModemConfig,

    /// Poll loop cadence and publishing rules
    #[serde(default)]
    pub polling: PollingConfig,

    /// Fingerprint geolocation
    #[serde(default)]
    pub geolocation: GeolocationConfig,

    /// Handover rules and model
    #[serde(default)]
    pub handover: HandoverConfig,

    /// Simulated modem (used with `--simulate`)
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl TrackerConfig {
    /// Load configuration using the standard search order:
    /// 1. `$CELLSENSE_CONFIG` environment variable
    /// 2. `./cellsense.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    ///
    /// Unknown keys and suspicious values are logged as warnings; impossible
    /// values fail with `ConfigError::Validation`.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        // Two-pass: check for unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;

        let (_, warnings) = super::validation::validate_ranges(&config);
        for w in warnings {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Write the config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Validate every section for impossible or inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, _) = super::validation::validate_ranges(self);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Modem
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModemConfig {
    /// Serial device of the AT command port
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_engineering_timeout")]
    pub engineering_timeout_ms: u64,

    #[serde(default = "default_rescan_timeout")]
    pub rescan_timeout_ms: u64,

    #[serde(default = "default_read_poll")]
    pub read_poll_ms: u64,

    /// Reconnect attempts after the modem stops answering
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

fn default_device() -> String {
    defaults::DEFAULT_MODEM_DEVICE.to_string()
}
fn default_baud_rate() -> u32 { defaults::DEFAULT_BAUD_RATE }
fn default_command_timeout() -> u64 { defaults::COMMAND_TIMEOUT_MS }
fn default_connect_timeout() -> u64 { defaults::CONNECT_TIMEOUT_MS }
fn default_engineering_timeout() -> u64 { defaults::ENGINEERING_TIMEOUT_MS }
fn default_rescan_timeout() -> u64 { defaults::RESCAN_TIMEOUT_MS }
fn default_read_poll() -> u64 { defaults::READ_POLL_MS }
fn default_reconnect_attempts() -> u32 { defaults::MAX_RECONNECT_ATTEMPTS }

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            command_timeout_ms: default_command_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            engineering_timeout_ms: default_engineering_timeout(),
            rescan_timeout_ms: default_rescan_timeout(),
            read_poll_ms: default_read_poll(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

// ============================================================================
// Polling
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Rescan the network when a handover becomes imminent
    #[serde(default)]
    pub auto_handover: bool,

    /// Location fixes must exceed this confidence to be published
    #[serde(default = "default_min_location_confidence")]
    pub min_location_confidence: f64,

    /// Buffered events per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_interval() -> u64 { defaults::POLL_INTERVAL_MS }
fn default_min_location_confidence() -> f64 { defaults::MIN_LOCATION_CONFIDENCE }
fn default_event_capacity() -> usize { defaults::EVENT_SUBSCRIBER_CAPACITY }

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            auto_handover: false,
            min_location_confidence: default_min_location_confidence(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ============================================================================
// Geolocation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationConfig {
    /// Nearest fingerprints blended per query
    #[serde(default = "default_k")]
    pub k: usize,

    #[serde(default = "default_min_training_points")]
    pub min_training_points: usize,

    /// Fingerprint table loaded at startup
    #[serde(default)]
    pub fingerprint_path: Option<String>,

    #[serde(default = "default_min_uncertainty")]
    pub min_uncertainty_m: f64,

    #[serde(default = "default_max_uncertainty")]
    pub max_uncertainty_m: f64,
}

fn default_k() -> usize { defaults::KNN_K }
fn default_min_training_points() -> usize { defaults::MIN_TRAINING_POINTS }
fn default_min_uncertainty() -> f64 { defaults::MIN_UNCERTAINTY_M }
fn default_max_uncertainty() -> f64 { defaults::MAX_UNCERTAINTY_M }

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            min_training_points: default_min_training_points(),
            fingerprint_path: None,
            min_uncertainty_m: default_min_uncertainty(),
            max_uncertainty_m: default_max_uncertainty(),
        }
    }
}

// ============================================================================
// Handover
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoverConfig {
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,

    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,

    #[serde(default = "default_serving_threshold")]
    pub serving_threshold_dbm: f64,

    #[serde(default = "default_usable_neighbor")]
    pub usable_neighbor_dbm: f64,

    #[serde(default = "default_fade_rate")]
    pub fade_rate_db_per_s: f64,

    #[serde(default = "default_regression_window")]
    pub regression_window: usize,

    #[serde(default = "default_prediction_horizon")]
    pub prediction_horizon_ms: u64,

    #[serde(default = "default_hysteresis")]
    pub hysteresis_db: f64,

    #[serde(default = "default_neighbor_grace")]
    pub neighbor_grace_ms: u64,

    #[serde(default = "default_velocity_threshold")]
    pub velocity_threshold_kmh: f64,

    #[serde(default = "default_velocity_min_trend")]
    pub velocity_min_trend_db: f64,

    #[serde(default = "default_velocity_parity_window")]
    pub velocity_parity_window_db: f64,

    #[serde(default = "default_model_probability_threshold")]
    pub model_probability_threshold: f64,

    /// Optional dense sequence model (JSON)
    #[serde(default)]
    pub model_path: Option<String>,
}

fn default_sequence_length() -> usize { defaults::SEQUENCE_LENGTH }
fn default_max_neighbors() -> usize { defaults::MAX_NEIGHBORS }
fn default_serving_threshold() -> f64 { defaults::SERVING_THRESHOLD_DBM }
fn default_usable_neighbor() -> f64 { defaults::USABLE_NEIGHBOR_DBM }
fn default_fade_rate() -> f64 { defaults::FADE_RATE_DB_PER_S }
fn default_regression_window() -> usize { defaults::REGRESSION_WINDOW }
fn default_prediction_horizon() -> u64 { defaults::PREDICTION_HORIZON_MS }
fn default_hysteresis() -> f64 { defaults::HYSTERESIS_DB }
fn default_neighbor_grace() -> u64 { defaults::NEIGHBOR_GRACE_MS }
fn default_velocity_threshold() -> f64 { defaults::VELOCITY_THRESHOLD_KMH }
fn default_velocity_min_trend() -> f64 { defaults::VELOCITY_MIN_TREND_DB }
fn default_velocity_parity_window() -> f64 { defaults::VELOCITY_PARITY_WINDOW_DB }
fn default_model_probability_threshold() -> f64 { defaults::MODEL_PROBABILITY_THRESHOLD }

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            sequence_length: default_sequence_length(),
            max_neighbors: default_max_neighbors(),
            serving_threshold_dbm: default_serving_threshold(),
            usable_neighbor_dbm: default_usable_neighbor(),
            fade_rate_db_per_s: default_fade_rate(),
            regression_window: default_regression_window(),
            prediction_horizon_ms: default_prediction_horizon(),
            hysteresis_db: default_hysteresis(),
            neighbor_grace_ms: default_neighbor_grace(),
            velocity_threshold_kmh: default_velocity_threshold(),
            velocity_min_trend_db: default_velocity_min_trend(),
            velocity_parity_window_db: default_velocity_parity_window(),
            model_probability_threshold: default_model_probability_threshold(),
            model_path: None,
        }
    }
}

// ============================================================================
// Simulation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_sim_speed")]
    pub speed_kmh: f64,

    /// RNG seed for shadowing noise
    #[serde(default = "default_sim_seed")]
    pub seed: u64,

    #[serde(default = "default_sim_mcc")]
    pub mcc: u16,

    #[serde(default = "default_sim_mnc")]
    pub mnc: u16,

    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Towers along the drive track
    #[serde(default = "default_sim_towers")]
    pub towers: Vec<SimulatedTower>,
}

/// A simulated tower in local track coordinates (meters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedTower {
    pub cell_id: u64,
    pub pci: u16,
    pub earfcn: u32,
    pub tac: u32,
    pub x_m: f64,
    pub y_m: f64,
}

fn default_sim_speed() -> f64 { defaults::SIM_SPEED_KMH }
fn default_sim_seed() -> u64 { 7 }
fn default_sim_mcc() -> u16 { 310 }
fn default_sim_mnc() -> u16 { 260 }

fn default_sim_towers() -> Vec<SimulatedTower> {
    vec![
        SimulatedTower { cell_id: 0x01A2_B301, pci: 101, earfcn: 2300, tac: 0x2F1, x_m: 0.0, y_m: 400.0 },
        SimulatedTower { cell_id: 0x01A2_B402, pci: 102, earfcn: 2300, tac: 0x2F1, x_m: 3_000.0, y_m: -400.0 },
        SimulatedTower { cell_id: 0x01A2_B503, pci: 103, earfcn: 5110, tac: 0x2F2, x_m: 6_000.0, y_m: 400.0 },
    ]
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            speed_kmh: default_sim_speed(),
            seed: default_sim_seed(),
            mcc: default_sim_mcc(),
            mnc: default_sim_mnc(),
            propagation: PropagationConfig::default(),
            towers: default_sim_towers(),
        }
    }
}

/// Free-space path loss model constants.
///
/// `rsrp = tx_power + antenna_gain - FSPL(d, f) - clutter_loss + N(0, sigma)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: f64,

    #[serde(default = "default_antenna_gain")]
    pub antenna_gain_db: f64,

    #[serde(default = "default_frequency")]
    pub frequency_mhz: f64,

    #[serde(default = "default_clutter_loss")]
    pub clutter_loss_db: f64,

    #[serde(default = "default_shadowing_sigma")]
    pub shadowing_sigma_db: f64,
}

fn default_tx_power() -> f64 { defaults::SIM_TX_POWER_DBM }
fn default_antenna_gain() -> f64 { defaults::SIM_ANTENNA_GAIN_DB }
fn default_frequency() -> f64 { defaults::SIM_FREQUENCY_MHZ }
fn default_clutter_loss() -> f64 { defaults::SIM_CLUTTER_LOSS_DB }
fn default_shadowing_sigma() -> f64 { defaults::SIM_SHADOWING_SIGMA_DB }

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            tx_power_dbm: default_tx_power(),
            antenna_gain_db: default_antenna_gain(),
            frequency_mhz: default_frequency(),
            clutter_loss_db: default_clutter_loss(),
            shadowing_sigma_db: default_shadowing_sigma(),
        }
    }
}
