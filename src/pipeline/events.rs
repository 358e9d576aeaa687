//! Tracker event fan-out
//!
//! Every subscriber gets its own bounded queue. Publishing never waits: a
//! full queue loses that one event and a dropped receiver is unsubscribed,
//! so one slow consumer cannot stall the polling loop or the others.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::types::{CellReport, HandoverPrediction, LocationPrediction, SignalQuality};

/// Typed notifications published by the polling loop.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// Every successful poll
    MeasurementAvailable(CellReport),
    /// A fix above the confidence floor
    LocationUpdated(LocationPrediction),
    /// A handover just became imminent
    HandoverRecommended(HandoverPrediction),
    QualityChanged {
        previous: SignalQuality,
        current: SignalQuality,
    },
    /// The loop started (true) or stopped (false) polling its source
    ConnectionChanged { connected: bool, source: String },
}

impl TrackerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerEvent::MeasurementAvailable(_) => "measurement",
            TrackerEvent::LocationUpdated(_) => "location",
            TrackerEvent::HandoverRecommended(_) => "handover",
            TrackerEvent::QualityChanged { .. } => "quality",
            TrackerEvent::ConnectionChanged { .. } => "connection",
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::Sender<TrackerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new independent subscriber.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<TrackerEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `event` to every live subscriber. Returns how many got it.
    pub fn publish(&self, event: &TrackerEvent) -> usize {
        let mut delivered = 0;
        self.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(event = event.kind(), "Event subscriber is full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event subscriber closed, removing");
                false
            }
        });
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<TrackerEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality_event() -> TrackerEvent {
        TrackerEvent::QualityChanged {
            previous: SignalQuality::Good,
            current: SignalQuality::Poor,
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = EventBus::new();
        let mut a = bus.subscribe(4);
        let mut b = bus.subscribe(4);

        assert_eq!(bus.publish(&quality_event()), 2);
        assert!(matches!(a.recv().await, Some(TrackerEvent::QualityChanged { .. })));
        assert!(matches!(b.recv().await, Some(TrackerEvent::QualityChanged { .. })));
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let _stalled = bus.subscribe(1);
        let mut live = bus.subscribe(8);

        for _ in 0..5 {
            bus.publish(&quality_event());
        }
        let mut received = 0;
        while live.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
        // the stalled subscriber stays registered
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_closed_subscriber_is_removed() {
        let bus = EventBus::new();
        let dropped = bus.subscribe(2);
        let _kept = bus.subscribe(2);
        drop(dropped);

        assert_eq!(bus.publish(&quality_event()), 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_receiver_ends_when_bus_dropped() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(2);
        bus.publish(&quality_event());
        drop(bus);

        tokio_test::block_on(async {
            assert!(matches!(rx.recv().await, Some(TrackerEvent::QualityChanged { .. })));
            assert!(rx.recv().await.is_none());
        });
    }
}
