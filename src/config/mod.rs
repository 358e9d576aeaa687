//! Tracker Configuration Module
//!
//! Operator-tunable settings loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `CELLSENSE_CONFIG` environment variable (path to TOML file)
//! 2. `cellsense.toml` in the current working directory
//! 3. Built-in defaults (`config::defaults`)
//!
//! Each subsystem receives its own section by value:
//!
//! ```ignore
//! let config = TrackerConfig::load();
//! let engine = HandoverEngine::new(config.handover.clone());
//! ```

mod tracker_config;
pub mod defaults;
pub mod validation;

pub use tracker_config::*;
