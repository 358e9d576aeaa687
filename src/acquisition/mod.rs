//! Modem acquisition module
//!
//! Serial links, the exclusive AT command channel, and the typed operations
//! built on top of it.

mod channel;
mod commands;
pub mod link;
pub mod loopback;

pub use channel::{ChannelStats, ModemChannel, ModemError, UnsolicitedMessage};
pub use commands::at;
pub use link::{LinkHalves, ModemLink, SerialLink};
pub use loopback::{LineInjector, LoopbackLink};
