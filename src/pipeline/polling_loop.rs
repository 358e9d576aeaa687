//! Periodic poll → decide → publish loop.
//!
//! Each cycle:
//!
//! 1. Poll the source for serving cell plus neighbors
//! 2. Classify signal quality
//! 3. Feed the handover engine and evaluate (edge-triggered notification,
//!    optional rescan on the rising edge)
//! 4. Estimate location when fingerprints are loaded
//! 5. Publish events and update shared state
//!
//! Cancellation is only observed between cycles; a command already on the
//! wire finishes or times out first. A failed cycle is logged and counted,
//! never fatal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EventBus, TrackerEvent};
use super::source::CellSource;
use super::state::{TrackerState, TrackerStatus};
use crate::config::PollingConfig;
use crate::geolocation::FingerprintEngine;
use crate::handover::HandoverEngine;
use crate::types::{CellReport, SignalQuality};

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollingStats {
    pub cycles: u64,
    pub measurements: u64,
    pub errors: u64,
    pub handovers_recommended: u64,
    pub locations_published: u64,
    pub rescans: u64,
}

pub struct PollingLoop {
    config: PollingConfig,
    geolocation: FingerprintEngine,
    handover: HandoverEngine,
    state: Arc<RwLock<TrackerState>>,
    events: Arc<EventBus>,
    cancel_token: CancellationToken,
    handover_active: bool,
    quality: SignalQuality,
    stats: PollingStats,
}

impl PollingLoop {
    pub fn new(
        config: PollingConfig,
        geolocation: FingerprintEngine,
        handover: HandoverEngine,
        state: Arc<RwLock<TrackerState>>,
        events: Arc<EventBus>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            geolocation,
            handover,
            state,
            events,
            cancel_token,
            handover_active: false,
            quality: SignalQuality::Unknown,
            stats: PollingStats::default(),
        }
    }

    /// Poll `source` every interval until cancelled.
    pub async fn run<S: CellSource>(mut self, source: &mut S) -> PollingStats {
        let name = source.source_name().to_string();
        info!(
            source = %name,
            interval_ms = self.config.interval_ms,
            auto_handover = self.config.auto_handover,
            fingerprints = self.geolocation.len(),
            model = self.handover.has_model(),
            "Polling loop started"
        );

        {
            let mut state = self.state.write().await;
            state.status = TrackerStatus::Running;
            state.source.clone_from(&name);
        }
        self.events.publish(&TrackerEvent::ConnectionChanged {
            connected: true,
            source: name.clone(),
        });

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = interval.tick() => {}
            }
            self.cycle(source).await;
        }

        self.state.write().await.status = TrackerStatus::Stopped;
        self.events.publish(&TrackerEvent::ConnectionChanged {
            connected: false,
            source: name,
        });

        let stats = self.stats;
        info!(
            cycles = stats.cycles,
            measurements = stats.measurements,
            errors = stats.errors,
            handovers = stats.handovers_recommended,
            locations = stats.locations_published,
            rescans = stats.rescans,
            "Polling loop stopped"
        );
        stats
    }

    async fn cycle<S: CellSource>(&mut self, source: &mut S) {
        self.stats.cycles += 1;
        let cycle = self.stats.cycles;

        let report = match source.poll().await {
            Ok(report) => report,
            Err(e) => {
                self.stats.errors += 1;
                warn!(cycle, error = %format!("{e:#}"), "Poll cycle failed");
                let mut state = self.state.write().await;
                state.cycles = cycle;
                state.errors += 1;
                state.last_cycle_time = Some(chrono::Utc::now());
                return;
            }
        };
        self.stats.measurements += 1;
        self.process(cycle, report, source).await;
    }

    async fn process<S: CellSource>(&mut self, cycle: u64, report: CellReport, source: &mut S) {
        let serving = &report.serving;
        let quality = serving.quality();
        let velocity_kmh = self.state.read().await.velocity_kmh;

        self.handover.ingest(serving, &report.neighbors, velocity_kmh);
        let handover = self.handover.evaluate();

        let rising_edge = handover.imminent && !self.handover_active;
        self.handover_active = handover.imminent;
        if rising_edge {
            self.stats.handovers_recommended += 1;
            info!(
                cycle,
                target = ?handover.target_cell_id,
                reason = %handover.reason,
                time_to_handover_ms = ?handover.time_to_handover_ms,
                "Handover recommended"
            );
            self.events.publish(&TrackerEvent::HandoverRecommended(handover.clone()));

            if self.config.auto_handover {
                match source.rescan().await {
                    Ok(()) => self.stats.rescans += 1,
                    Err(e) => warn!(cycle, error = %format!("{e:#}"), "Rescan failed"),
                }
            }
        }

        let location = if self.geolocation.is_trained() {
            let fix = self.geolocation.predict(serving);
            if fix.confidence > self.config.min_location_confidence {
                self.stats.locations_published += 1;
                self.events.publish(&TrackerEvent::LocationUpdated(fix.clone()));
                Some(fix)
            } else {
                debug!(cycle, confidence = fix.confidence, "Location fix below confidence floor");
                None
            }
        } else {
            None
        };

        if quality != self.quality {
            debug!(cycle, previous = %self.quality, current = %quality, "Signal quality changed");
            self.events.publish(&TrackerEvent::QualityChanged {
                previous: self.quality,
                current: quality,
            });
            self.quality = quality;
        }

        {
            let mut state = self.state.write().await;
            state.cycles = cycle;
            state.last_measurement = Some(serving.clone());
            state.neighbors.clone_from(&report.neighbors);
            state.quality = quality;
            state.last_handover = Some(handover);
            if location.is_some() {
                state.last_location = location;
            }
            state.last_cycle_time = Some(chrono::Utc::now());
        }

        self.events.publish(&TrackerEvent::MeasurementAvailable(report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeolocationConfig, HandoverConfig};
    use crate::types::{CellTowerMeasurement, NeighborCell, RadioTechnology};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays scripted serving/neighbor RSRP pairs, then fails.
    struct ScriptedSource {
        script: VecDeque<Option<(f64, f64)>>,
        rescans: u32,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<(f64, f64)>>) -> Self {
            Self {
                script: script.into(),
                rescans: 0,
            }
        }
    }

    #[async_trait]
    impl CellSource for ScriptedSource {
        async fn poll(&mut self) -> Result<CellReport> {
            match self.script.pop_front() {
                Some(Some((serving_rsrp, neighbor_rsrp))) => {
                    let mut serving = CellTowerMeasurement::unknown(RadioTechnology::Lte);
                    serving.cell_id = 1;
                    serving.rsrp = serving_rsrp;
                    Ok(CellReport {
                        serving,
                        neighbors: vec![NeighborCell::from_channel(5110, 2, neighbor_rsrp, -10.0)],
                    })
                }
                Some(None) => Err(anyhow!("scripted failure")),
                None => Err(anyhow!("script exhausted")),
            }
        }

        async fn rescan(&mut self) -> Result<()> {
            self.rescans += 1;
            Ok(())
        }

        fn source_name(&self) -> &str {
            "scripted"
        }
    }

    fn polling(auto_handover: bool) -> PollingConfig {
        PollingConfig {
            interval_ms: 5,
            auto_handover,
            ..PollingConfig::default()
        }
    }

    fn build(config: PollingConfig) -> (PollingLoop, Arc<EventBus>, Arc<RwLock<TrackerState>>) {
        let events = Arc::new(EventBus::new());
        let state = Arc::new(RwLock::new(TrackerState::default()));
        let polling_loop = PollingLoop::new(
            config,
            FingerprintEngine::new(GeolocationConfig::default()),
            HandoverEngine::new(HandoverConfig::default()),
            Arc::clone(&state),
            Arc::clone(&events),
            CancellationToken::new(),
        );
        (polling_loop, events, state)
    }

    #[tokio::test]
    async fn test_handover_notified_only_on_rising_edge() {
        let (mut polling_loop, events, _) = build(polling(true));
        let mut rx = events.subscribe(64);
        // stronger neighbor for three cycles, gone, then back
        let mut source = ScriptedSource::new(vec![
            Some((-95.0, -90.0)),
            Some((-95.0, -90.0)),
            Some((-95.0, -90.0)),
            Some((-95.0, -100.0)),
            Some((-95.0, -90.0)),
        ]);
        for _ in 0..5 {
            polling_loop.cycle(&mut source).await;
        }

        let mut handovers = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TrackerEvent::HandoverRecommended(_)) {
                handovers += 1;
            }
        }
        assert_eq!(handovers, 2);
        assert_eq!(polling_loop.stats.handovers_recommended, 2);
        assert_eq!(source.rescans, 2);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_counted_and_loop_continues() {
        let (mut polling_loop, events, state) = build(polling(false));
        let mut rx = events.subscribe(64);
        let mut source = ScriptedSource::new(vec![Some((-85.0, -120.0)), None, Some((-105.0, -120.0))]);
        for _ in 0..3 {
            polling_loop.cycle(&mut source).await;
        }

        let state = state.read().await;
        assert_eq!(state.cycles, 3);
        assert_eq!(state.errors, 1);
        assert_eq!(state.quality, SignalQuality::Poor);
        assert_eq!(polling_loop.stats.measurements, 2);

        let mut qualities = Vec::new();
        let mut measurements = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                TrackerEvent::QualityChanged { previous, current } => qualities.push((previous, current)),
                TrackerEvent::MeasurementAvailable(_) => measurements += 1,
                _ => {}
            }
        }
        assert_eq!(measurements, 2);
        assert_eq!(
            qualities,
            vec![
                (SignalQuality::Unknown, SignalQuality::Good),
                (SignalQuality::Good, SignalQuality::Poor)
            ]
        );
    }

    #[tokio::test]
    async fn test_no_location_without_fingerprints() {
        let (mut polling_loop, events, state) = build(polling(false));
        let mut rx = events.subscribe(8);
        let mut source = ScriptedSource::new(vec![Some((-80.0, -120.0))]);
        polling_loop.cycle(&mut source).await;

        assert!(state.read().await.last_location.is_none());
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, TrackerEvent::LocationUpdated(_)));
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (polling_loop, events, state) = build(polling(false));
        let mut rx = events.subscribe(256);
        let cancel = polling_loop.cancel_token.clone();
        let script = (0..1000).map(|_| Some((-90.0, -120.0))).collect();
        let mut source = ScriptedSource::new(script);

        let handle = tokio::spawn(async move { polling_loop.run(&mut source).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let stats = handle.await.unwrap();

        assert!(stats.cycles > 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(state.read().await.status, TrackerStatus::Stopped);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, TrackerEvent::ConnectionChanged { connected: true, .. }));
    }
}
