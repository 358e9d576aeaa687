//! System-wide default constants.
//!
//! Every operator-tunable value in `TrackerConfig` takes its default from
//! here. Grouped by subsystem.

// ============================================================================
// Modem channel
// ============================================================================

/// Common factory baud rate for USB-attached LTE modules.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default serial device of the AT command port.
pub const DEFAULT_MODEM_DEVICE: &str = "/dev/ttyUSB2";

/// Read/write timeout for an ordinary command exchange (ms).
pub const COMMAND_TIMEOUT_MS: u64 = 5_000;

/// Deadline for the liveness probe issued by `connect()` (ms).
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Engineering mode queries can take up to ~10 s on a busy modem (ms).
pub const ENGINEERING_TIMEOUT_MS: u64 = 10_000;

/// Deregister / reregister each take tens of seconds (ms).
pub const RESCAN_TIMEOUT_MS: u64 = 60_000;

/// Blocking read slice of the reader thread (ms).
///
/// Bounds how long a disconnect waits for the reader to notice.
pub const READ_POLL_MS: u64 = 100;

/// Reconnect attempts before the modem source gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Initial reconnect delay; doubles per attempt (ms).
pub const INITIAL_RECONNECT_DELAY_MS: u64 = 1_000;

/// Reconnect delay cap (ms).
pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Buffered unsolicited messages per notification subscriber.
pub const NOTIFICATION_CAPACITY: usize = 64;

// ============================================================================
// Polling loop
// ============================================================================

/// Poll cycle period (ms).
pub const POLL_INTERVAL_MS: u64 = 1_000;

/// Location fixes at or below this confidence are not published.
pub const MIN_LOCATION_CONFIDENCE: f64 = 0.3;

/// Buffered events per event bus subscriber.
pub const EVENT_SUBSCRIBER_CAPACITY: usize = 64;

// ============================================================================
// Geolocation
// ============================================================================

/// Fingerprints consulted per query.
pub const KNN_K: usize = 5;

/// Training points required before `train()` builds a fingerprint set.
pub const MIN_TRAINING_POINTS: usize = 10;

/// Uncertainty floor; fingerprinting is never better than this (m).
pub const MIN_UNCERTAINTY_M: f64 = 50.0;

/// Uncertainty ceiling; a wider spread carries no useful fix (m).
pub const MAX_UNCERTAINTY_M: f64 = 2_000.0;

// ============================================================================
// Handover
// ============================================================================

/// Snapshots fed to the sequence model; the ring keeps twice this.
pub const SEQUENCE_LENGTH: usize = 10;

/// Strongest neighbors retained per snapshot.
pub const MAX_NEIGHBORS: usize = 6;

/// Serving RSRP below which the link is failing (dBm).
pub const SERVING_THRESHOLD_DBM: f64 = -110.0;

/// Neighbors must be above this to be handover candidates (dBm).
pub const USABLE_NEIGHBOR_DBM: f64 = -115.0;

/// Serving RSRP slope that counts as a fast fade (dB/s).
pub const FADE_RATE_DB_PER_S: f64 = -2.0;

/// Samples in the fade regression and the velocity trend window.
pub const REGRESSION_WINDOW: usize = 10;

/// How far ahead an extrapolated handover may be and still count (ms).
pub const PREDICTION_HORIZON_MS: u64 = 5_000;

/// Margin a neighbor must beat serving by (dB).
pub const HYSTERESIS_DB: f64 = 3.0;

/// Delay before switching to a stronger neighbor (ms).
pub const NEIGHBOR_GRACE_MS: u64 = 1_000;

/// Speed above which neighbor trends are extrapolated (km/h).
pub const VELOCITY_THRESHOLD_KMH: f64 = 50.0;

/// Minimum neighbor rise over the window for the velocity rule (dB).
pub const VELOCITY_MIN_TREND_DB: f64 = 1.0;

/// A rising neighbor must be within this of serving (dB).
pub const VELOCITY_PARITY_WINDOW_DB: f64 = 5.0;

/// Model probability that triggers a recommendation.
pub const MODEL_PROBABILITY_THRESHOLD: f64 = 0.7;

// ============================================================================
// Simulation
// ============================================================================

/// Transmit power of simulated towers (dBm).
pub const SIM_TX_POWER_DBM: f64 = 46.0;

/// Tower antenna gain (dB).
pub const SIM_ANTENNA_GAIN_DB: f64 = 15.0;

/// Carrier frequency used in the free-space path loss term (MHz).
pub const SIM_FREQUENCY_MHZ: f64 = 1_900.0;

/// Fixed building / terrain loss on top of free space (dB).
pub const SIM_CLUTTER_LOSS_DB: f64 = 20.0;

/// Standard deviation of log-normal shadowing (dB).
pub const SIM_SHADOWING_SIGMA_DB: f64 = 3.0;

/// Speed of the simulated device (km/h).
pub const SIM_SPEED_KMH: f64 = 60.0;
