//! Event surface consumed by outer layers.
//!
//! The four externally visible events are delivered over per-subscriber
//! channels. Publish order equals subscription order, and a disconnected
//! subscriber is dropped silently. `clear` detaches every subscription;
//! shutdown uses it so no event can be delivered after stop.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::ErrorKind;
use crate::imu::CalibrationProfile;
use crate::pose::Pose;
use crate::state::TrackingState;

/// Externally visible events published by the tracking core. These are the
/// only integration surface consumed by UI/session layers.
#[derive(Debug, Clone)]
pub enum TrackingEvent {
    PoseUpdated(Pose),
    StateChanged(TrackingState),
    CalibrationComplete(CalibrationProfile),
    Error { kind: ErrorKind, message: String },
}

/// Multi-subscriber event fan-out.
pub struct EventBus {
    subscribers: Vec<Sender<TrackingEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Attach a new subscriber. Subscribers added earlier receive each event
    /// earlier.
    pub fn subscribe(&mut self) -> Receiver<TrackingEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, in subscription order.
    pub fn publish(&mut self, event: TrackingEvent) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.publish(TrackingEvent::Error {
            kind,
            message: message.into(),
        });
    }

    /// Detach all subscriptions.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
