//! Tracking system orchestration.
//!
//! This module contains the top-level `TrackingSystem` that wires the
//! inertial sampler, pose backends, fusion engine, and state machine onto a
//! cooperative tick scheduler, along with the event surface consumed by
//! outer layers.

pub mod clock;
pub mod events;
pub mod scheduler;
mod tracking_system;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use events::{EventBus, TrackingEvent};
pub use scheduler::{TaskId, TickScheduler};
pub use tracking_system::TrackingSystem;
