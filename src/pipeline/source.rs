//! Cell source abstraction for the polling loop.
//!
//! A source yields one serving-plus-neighbors report per poll and can be
//! asked to force a network rescan. The modem source is the production
//! implementation; tests substitute scripted ones.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::acquisition::{ModemChannel, ModemError};
use crate::types::CellReport;

#[async_trait]
pub trait CellSource: Send + 'static {
    /// Read the current serving cell and its neighbors.
    async fn poll(&mut self) -> Result<CellReport>;

    /// Ask the network to re-evaluate cell selection.
    async fn rescan(&mut self) -> Result<()>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

// ============================================================================
// Modem source
// ============================================================================

/// Polls engineering mode over a shared modem channel.
///
/// A lost link is reconnected (with backoff) and the poll retried once.
pub struct ModemCellSource {
    channel: Arc<ModemChannel>,
    name: String,
}

impl ModemCellSource {
    pub fn new(channel: Arc<ModemChannel>, name: &str) -> Self {
        Self {
            channel,
            name: name.to_string(),
        }
    }
}

fn link_lost(e: &ModemError) -> bool {
    matches!(e, ModemError::Disconnected | ModemError::NotConnected | ModemError::Io(_))
}

#[async_trait]
impl CellSource for ModemCellSource {
    async fn poll(&mut self) -> Result<CellReport> {
        match self.channel.engineering_report().await {
            Ok(report) => Ok(report),
            Err(e) if link_lost(&e) => {
                warn!(error = %e, "Modem link lost during poll, reconnecting");
                self.channel
                    .reconnect()
                    .await
                    .context("Modem reconnect failed")?;
                self.channel
                    .engineering_report()
                    .await
                    .context("Engineering report after reconnect")
            }
            Err(e) => Err(e).context("Engineering report"),
        }
    }

    async fn rescan(&mut self) -> Result<()> {
        self.channel.rescan().await.context("Network rescan")
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}
