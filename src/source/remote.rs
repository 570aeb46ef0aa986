//! Remote tracking service backend.
//!
//! Frames and inertial batches are transmitted asynchronously over a
//! [`RemoteTransport`]; responses arrive later and are drained by `poll`.
//! Responses are applied in timestamp order; a response older than one
//! already applied is discarded to keep pose time monotonic. Network faults
//! are transmission errors, not tracking errors: they never change the
//! tracking state by themselves.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::bridge::{SlamQuality, TrackingStats};
use crate::error::{Result, TrackingError};
use crate::imu::SensorSample;
use crate::pose::{Pose, PoseSourceTag, SourceState};
use crate::source::FrameInput;

/// One IMU reading on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImuReadingMsg {
    pub timestamp: f64,
    pub acceleration: [f64; 3],
    pub gyroscope: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnetometer: Option<[f64; 3]>,
    #[serde(default)]
    pub is_valid: bool,
}

impl From<&SensorSample> for ImuReadingMsg {
    fn from(s: &SensorSample) -> Self {
        Self {
            timestamp: s.timestamp_s,
            acceleration: [s.accel.x, s.accel.y, s.accel.z],
            gyroscope: [s.gyro.x, s.gyro.y, s.gyro.z],
            magnetometer: s.mag.map(|m| [m.x, m.y, m.z]),
            is_valid: s.is_valid,
        }
    }
}

/// Frame payload on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramePayload {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
}

/// Request to the tracking service: a frame and/or an inertial batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingRequest {
    pub timestamp: f64,
    pub sequence_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<FramePayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imu_readings: Vec<ImuReadingMsg>,
}

impl TrackingRequest {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Pose estimate on the wire. Quaternion order is [qw, qx, qy, qz].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseEstimateMsg {
    pub position: [f64; 3],
    pub rotation: [f64; 4],
    pub confidence: f64,
    pub tracking_state: SourceState,
}

/// Response from the tracking service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingResponse {
    pub success: bool,
    pub timestamp: f64,
    pub sequence_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_estimate: Option<PoseEstimateMsg>,
    pub processing_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TrackingResponse {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Transport carrying requests to the remote service and responses back.
///
/// `send` must not block; `poll` returns at most one response without
/// blocking. Multiple requests may be in flight at once.
pub trait RemoteTransport: Send {
    fn send(&mut self, request: &TrackingRequest) -> Result<()>;
    fn poll(&mut self) -> Option<TrackingResponse>;
}

/// What draining the transport produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// A pose, applied in timestamp order.
    Pose(Pose, SourceState),
    /// The service reported failure; no pose update, state unchanged.
    Failure(String),
}

/// Running statistics mirroring the remote service's own bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteStats {
    pub packets_processed: u64,
    pub average_processing_time_ms: f64,
    pub last_confidence: f64,
    pub discarded_stale: u64,
}

/// Asynchronous pose source speaking the remote request/response contract.
pub struct RemoteTracker {
    transport: Box<dyn RemoteTransport>,
    sequence: u64,
    /// Timestamp of the newest applied response; older arrivals are stale.
    last_applied_timestamp: Option<f64>,
    last_pose: Option<Pose>,
    last_state: SourceState,
    remote_stats: RemoteStats,
    /// Set by `cancel`: late responses are swallowed, never surfaced.
    cancelled: bool,
    /// First successful response marks the backend Ready.
    initialized: bool,
}

impl RemoteTracker {
    pub fn new(transport: Box<dyn RemoteTransport>) -> Self {
        Self {
            transport,
            sequence: 0,
            last_applied_timestamp: None,
            last_pose: None,
            last_state: SourceState::Initializing,
            remote_stats: RemoteStats::default(),
            cancelled: false,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Transmit one frame together with the inertial batch collected since
    /// the previous transmission.
    pub fn submit_frame(&mut self, frame: &FrameInput, imu_batch: &[SensorSample]) -> Result<()> {
        if self.cancelled {
            return Err(TrackingError::Transmission("tracker stopped".into()));
        }
        let request = TrackingRequest {
            timestamp: frame.timestamp,
            sequence_number: self.next_sequence(),
            frame: Some(FramePayload {
                data: frame.image.clone(),
                width: frame.width,
                height: frame.height,
            }),
            imu_readings: imu_batch.iter().map(ImuReadingMsg::from).collect(),
        };
        self.transport.send(&request)
    }

    /// Transmit an inertial batch without a frame (IMU-rate path).
    pub fn submit_imu_batch(&mut self, timestamp: f64, imu_batch: &[SensorSample]) -> Result<()> {
        if self.cancelled || imu_batch.is_empty() {
            return Ok(());
        }
        let request = TrackingRequest {
            timestamp,
            sequence_number: self.next_sequence(),
            frame: None,
            imu_readings: imu_batch.iter().map(ImuReadingMsg::from).collect(),
        };
        self.transport.send(&request)
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Drain arrived responses, applying poses in timestamp order.
    ///
    /// `now` is unused for ordering (response timestamps rule) but kept for
    /// symmetry with the tick-driven callers.
    pub fn poll(&mut self, _now: f64) -> Vec<RemoteOutcome> {
        let mut outcomes = Vec::new();
        while let Some(response) = self.transport.poll() {
            if self.cancelled {
                // Cancellation swallows in-flight responses.
                continue;
            }
            if !response.success {
                let detail = response
                    .message
                    .unwrap_or_else(|| "remote tracking request failed".into());
                outcomes.push(RemoteOutcome::Failure(detail));
                continue;
            }
            if let Some(applied) = self.last_applied_timestamp {
                if response.timestamp <= applied {
                    self.remote_stats.discarded_stale += 1;
                    tracing::debug!(
                        response_ts = response.timestamp,
                        applied_ts = applied,
                        "discarding stale remote response"
                    );
                    continue;
                }
            }
            let Some(estimate) = response.pose_estimate else {
                continue;
            };
            let pose = pose_from_wire(&estimate, response.timestamp);
            self.last_applied_timestamp = Some(response.timestamp);
            self.last_pose = Some(pose);
            self.last_state = estimate.tracking_state;
            self.initialized = true;
            self.update_stats(response.processing_time_ms, pose.confidence());
            outcomes.push(RemoteOutcome::Pose(pose, estimate.tracking_state));
        }
        outcomes
    }

    fn update_stats(&mut self, processing_time_ms: f64, confidence: f64) {
        let count = self.remote_stats.packets_processed as f64;
        self.remote_stats.average_processing_time_ms =
            (self.remote_stats.average_processing_time_ms * count + processing_time_ms)
                / (count + 1.0);
        self.remote_stats.packets_processed += 1;
        self.remote_stats.last_confidence = confidence;
    }

    pub fn last_pose(&self) -> Option<Pose> {
        self.last_pose
    }

    pub fn source_state(&self) -> SourceState {
        self.last_state
    }

    pub fn remote_stats(&self) -> RemoteStats {
        self.remote_stats
    }

    /// Tracking statistics in the common snapshot shape. The remote service
    /// does not expose map internals, so map counts stay zero.
    pub fn stats(&self) -> TrackingStats {
        TrackingStats {
            processing_time_ms: self.remote_stats.average_processing_time_ms as f32,
            quality: quality_from_confidence(self.remote_stats.last_confidence),
            ..TrackingStats::default()
        }
    }

    /// Map persistence is owned by the service side of the wire; the local
    /// tracker has no map bytes to hand out.
    pub fn save_map(&mut self) -> Result<Vec<u8>> {
        Err(TrackingError::MapIo(
            "map persistence is not available on the remote backend".into(),
        ))
    }

    pub fn load_map(&mut self, _buffer: &[u8]) -> Result<()> {
        Err(TrackingError::MapIo(
            "map persistence is not available on the remote backend".into(),
        ))
    }

    pub fn save_map_to_file(&mut self, _path: &str) -> Result<()> {
        Err(TrackingError::MapIo(
            "map persistence is not available on the remote backend".into(),
        ))
    }

    pub fn load_map_from_file(&mut self, _path: &str) -> Result<()> {
        Err(TrackingError::MapIo(
            "map persistence is not available on the remote backend".into(),
        ))
    }

    pub fn reset(&mut self) -> Result<()> {
        self.last_applied_timestamp = None;
        self.last_pose = None;
        self.last_state = SourceState::Initializing;
        self.remote_stats = RemoteStats::default();
        self.initialized = false;
        Ok(())
    }

    /// Relocalization on the remote side happens implicitly on the next
    /// frame; nothing to transmit eagerly.
    pub fn request_relocalization(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stop the tracker: any response still in flight is dropped without
    /// ever being surfaced.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

fn pose_from_wire(estimate: &PoseEstimateMsg, timestamp: f64) -> Pose {
    let [qw, qx, qy, qz] = estimate.rotation;
    Pose::new(
        Vector3::new(
            estimate.position[0],
            estimate.position[1],
            estimate.position[2],
        ),
        UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz)),
        timestamp,
        estimate.confidence,
        PoseSourceTag::Inertial,
    )
}

fn quality_from_confidence(confidence: f64) -> SlamQuality {
    if confidence >= 0.9 {
        SlamQuality::Excellent
    } else if confidence >= 0.7 {
        SlamQuality::Good
    } else if confidence >= 0.4 {
        SlamQuality::Fair
    } else {
        SlamQuality::Poor
    }
}
