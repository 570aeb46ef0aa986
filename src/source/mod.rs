//! Pose sources: the backends that turn camera frames into poses.
//!
//! The two implementations genuinely differ in behavior (the native tracker
//! is synchronous with exclusive handle ownership, the remote tracker is an
//! asynchronous request/response exchange), so they are modeled as a tagged
//! variant behind one interface rather than shared implementation.

pub mod fallback;
pub mod native;
pub mod remote;

pub use fallback::{BackendProvider, FallbackController, Selection};
pub use native::NativeTracker;
pub use remote::{RemoteTracker, RemoteTransport, TrackingRequest, TrackingResponse};

use crate::bridge::TrackingStats;
use crate::error::Result;
use crate::imu::SensorSample;
use crate::pose::{Pose, SourceState};

/// Identity of a pose backend, published so fusion and state logic can
/// attribute incoming poses correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Native,
    Remote,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Remote => "remote",
        }
    }
}

/// One camera frame handed to a pose source.
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// RGB image data, 8 bits per channel.
    pub image: Vec<u8>,
    pub width: i32,
    pub height: i32,
    /// Frame timestamp in seconds.
    pub timestamp: f64,
}

/// What a frame (or remote response) produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// A usable pose estimate.
    Tracked(Pose),
    /// The backend reports tracking loss; drives the state machine.
    TrackingLost,
    /// The frame was consumed but produced nothing actionable (still
    /// initializing, insufficient features this frame, ...).
    NoPose,
}

/// A pose source: native in-process tracker or remote tracking service.
///
/// The capability set {process_frame, current_pose, stats, map save/load
/// (buffer and file), reset, request_relocalization} is uniform across
/// variants.
pub enum PoseSource {
    Native(NativeTracker),
    Remote(RemoteTracker),
}

impl std::fmt::Debug for PoseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseSource")
            .field("kind", &self.kind().as_str())
            .field("state", &self.source_state())
            .finish()
    }
}

impl PoseSource {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Native(_) => BackendKind::Native,
            Self::Remote(_) => BackendKind::Remote,
        }
    }

    /// Submit one frame. Native: processed synchronously, the outcome is
    /// final. Remote: transmitted with the inertial batch; the outcome is
    /// `NoPose` and poses arrive later through `poll`.
    pub fn process_frame(
        &mut self,
        frame: &FrameInput,
        imu_batch: &[SensorSample],
    ) -> Result<FrameOutcome> {
        match self {
            Self::Native(tracker) => tracker.process_frame(frame),
            Self::Remote(tracker) => {
                tracker.submit_frame(frame, imu_batch)?;
                Ok(FrameOutcome::NoPose)
            }
        }
    }

    /// Drain asynchronously arrived results. Native sources have none.
    pub fn poll(&mut self, now: f64) -> Vec<remote::RemoteOutcome> {
        match self {
            Self::Native(_) => Vec::new(),
            Self::Remote(tracker) => tracker.poll(now),
        }
    }

    pub fn current_pose(&self) -> Result<Option<Pose>> {
        match self {
            Self::Native(tracker) => tracker.current_pose(),
            Self::Remote(tracker) => Ok(tracker.last_pose()),
        }
    }

    pub fn stats(&self) -> TrackingStats {
        match self {
            Self::Native(tracker) => tracker.stats(),
            Self::Remote(tracker) => tracker.stats(),
        }
    }

    pub fn save_map(&mut self) -> Result<Vec<u8>> {
        match self {
            Self::Native(tracker) => tracker.save_map(),
            Self::Remote(tracker) => tracker.save_map(),
        }
    }

    pub fn load_map(&mut self, buffer: &[u8]) -> Result<()> {
        match self {
            Self::Native(tracker) => tracker.load_map(buffer),
            Self::Remote(tracker) => tracker.load_map(buffer),
        }
    }

    pub fn save_map_to_file(&mut self, path: &str) -> Result<()> {
        match self {
            Self::Native(tracker) => tracker.save_map_to_file(path),
            Self::Remote(tracker) => tracker.save_map_to_file(path),
        }
    }

    pub fn load_map_from_file(&mut self, path: &str) -> Result<()> {
        match self {
            Self::Native(tracker) => tracker.load_map_from_file(path),
            Self::Remote(tracker) => tracker.load_map_from_file(path),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        match self {
            Self::Native(tracker) => tracker.reset(),
            Self::Remote(tracker) => tracker.reset(),
        }
    }

    pub fn request_relocalization(&mut self) -> Result<()> {
        match self {
            Self::Native(tracker) => tracker.request_relocalization(),
            Self::Remote(tracker) => tracker.request_relocalization(),
        }
    }

    /// The stream state the source last reported.
    pub fn source_state(&self) -> SourceState {
        match self {
            Self::Native(tracker) => tracker.source_state(),
            Self::Remote(tracker) => tracker.source_state(),
        }
    }

    /// Stop the source: cancel in-flight work and release resources
    /// deterministically.
    pub fn stop(&mut self) {
        match self {
            Self::Native(tracker) => tracker.destroy(),
            Self::Remote(tracker) => tracker.cancel(),
        }
    }
}
