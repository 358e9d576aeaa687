//! Tracking Pipeline Module
//!
//! ```text
//! CellSource ──poll──▶ PollingLoop ──▶ HandoverEngine ──▶ EventBus ──▶ subscribers
//!                          │                                  ▲
//!                          └──────▶ FingerprintEngine ────────┘
//!                          │
//!                          └──────▶ TrackerState (Arc<RwLock>)
//! ```

mod events;
mod state;
pub mod polling_loop;
pub mod source;

pub use events::{EventBus, TrackerEvent};
pub use polling_loop::{PollingLoop, PollingStats};
pub use source::{CellSource, ModemCellSource};
pub use state::*;
