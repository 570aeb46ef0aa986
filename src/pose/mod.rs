//! Pose representation shared by all tracking backends.

pub mod fusion;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::bridge::NativePose;

pub use fusion::{FusionEngine, FusionState};

/// Which estimator produced a pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseSourceTag {
    Visual,
    Inertial,
    Fused,
}

/// Tracking condition attached to a backend's pose stream.
///
/// Serialized as the lowercase wire strings used by the remote service
/// ("tracking", "tracking_degraded", "lost", "initializing").
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Tracking,
    TrackingDegraded,
    Lost,
    Initializing,
}

impl SourceState {
    /// Whether a pose stream in this state may contribute to fusion.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Tracking | Self::TrackingDegraded)
    }
}

/// 6-DOF pose: world-frame position, unit-quaternion orientation, timestamp,
/// and estimator confidence.
///
/// Confidence is clamped into [0, 1] at every construction site; no `Pose`
/// with an out-of-range confidence can exist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub timestamp: f64,
    confidence: f64,
    pub source: PoseSourceTag,
}

impl Pose {
    pub fn new(
        position: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
        timestamp: f64,
        confidence: f64,
        source: PoseSourceTag,
    ) -> Self {
        Self {
            position,
            orientation,
            timestamp,
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }

    /// Identity pose at the world origin with zero confidence.
    pub fn identity(timestamp: f64, source: PoseSourceTag) -> Self {
        Self::new(
            Vector3::zeros(),
            UnitQuaternion::identity(),
            timestamp,
            0.0,
            source,
        )
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

impl From<NativePose> for Pose {
    /// Convert from the native layout. The bridge stores the quaternion in
    /// (x, y, z, w) order.
    fn from(raw: NativePose) -> Self {
        let [x, y, z, w] = raw.rotation;
        let orientation = UnitQuaternion::from_quaternion(Quaternion::new(
            w as f64, x as f64, y as f64, z as f64,
        ));
        Self::new(
            Vector3::new(
                raw.position[0] as f64,
                raw.position[1] as f64,
                raw.position[2] as f64,
            ),
            orientation,
            raw.timestamp,
            raw.confidence as f64,
            PoseSourceTag::Visual,
        )
    }
}
