//! Native SLAM bridge contract.
//!
//! This module is the Rust rendering of the C bridge header shipped with the
//! native tracker. The structs are `#[repr(C)]` and the enums carry the exact
//! discriminants of the C side, so values can cross the boundary bit-for-bit.
//! The operation surface is expressed as the [`NativeSlamApi`] trait; a
//! concrete implementation wraps the dynamic library, while tests provide
//! in-process fakes.
//!
//! Ownership rules:
//! - `create` hands back a live tracker instance or nothing (the C side
//!   returns NULL on failure).
//! - All calls on one instance are exclusive; the caller guarantees no
//!   concurrent invocation (single-owner discipline).
//! - [`MapHandle`] releases the instance exactly once, on every exit path.

use crate::error::{Result, TrackingError};

/// Bridge library version, checked against the loaded native library.
pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;
pub const VERSION_PATCH: u32 = 0;

/// Result codes returned by every native call.
///
/// Success is 0, errors are the negative codes -1..=-10. Consumers must
/// match exhaustively; the native side may return any of these from any
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SlamResult {
    Success = 0,
    InvalidParameter = -1,
    InitializationFailed = -2,
    SystemNotReady = -3,
    ProcessingFailed = -4,
    MapLoadFailed = -5,
    InsufficientFeatures = -6,
    TrackingLost = -7,
    OutOfMemory = -8,
    UnsupportedFormat = -9,
    FileNotFound = -10,
}

impl SlamResult {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Human-readable description, mirroring the native error-string helper.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidParameter => "invalid parameter",
            Self::InitializationFailed => "initialization failed",
            Self::SystemNotReady => "system not ready",
            Self::ProcessingFailed => "processing failed",
            Self::MapLoadFailed => "map load failed",
            Self::InsufficientFeatures => "insufficient features",
            Self::TrackingLost => "tracking lost",
            Self::OutOfMemory => "out of memory",
            Self::UnsupportedFormat => "unsupported format",
            Self::FileNotFound => "file not found",
        }
    }

    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            -1 => Some(Self::InvalidParameter),
            -2 => Some(Self::InitializationFailed),
            -3 => Some(Self::SystemNotReady),
            -4 => Some(Self::ProcessingFailed),
            -5 => Some(Self::MapLoadFailed),
            -6 => Some(Self::InsufficientFeatures),
            -7 => Some(Self::TrackingLost),
            -8 => Some(Self::OutOfMemory),
            -9 => Some(Self::UnsupportedFormat),
            -10 => Some(Self::FileNotFound),
            _ => None,
        }
    }
}

/// Tracker state reported by the native side.
///
/// Mirrors the core tracking states one-to-one; this is the primary state
/// input while the native backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SlamState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Tracking = 3,
    Lost = 4,
    Relocalization = 5,
    Failed = 6,
}

impl SlamState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Tracking => "tracking",
            Self::Lost => "lost",
            Self::Relocalization => "relocalization",
            Self::Failed => "failed",
        }
    }
}

/// Four-level tracking quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum SlamQuality {
    Poor = 0,
    Fair = 1,
    Good = 2,
    Excellent = 3,
}

/// Pinhole camera intrinsics plus distortion, as consumed by the native side.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct CameraCalibration {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub k1: f32,
    pub k2: f32,
    pub k3: f32,
    pub p1: f32,
    pub p2: f32,
    pub width: i32,
    pub height: i32,
}

impl CameraCalibration {
    /// Calibration with zero distortion.
    pub fn pinhole(fx: f32, fy: f32, cx: f32, cy: f32, width: i32, height: i32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
            p1: 0.0,
            p2: 0.0,
            width,
            height,
        }
    }
}

/// 6-DOF pose as laid out by the native side.
///
/// Rotation is a quaternion in (x, y, z, w) order. This differs from the
/// remote wire, which uses (w, x, y, z).
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct NativePose {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub timestamp: f64,
    pub confidence: f32,
}

/// Per-frame tracking statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct TrackingStats {
    pub total_keyframes: i32,
    pub total_landmarks: i32,
    pub tracking_keyframes: i32,
    pub average_reprojection_error: f32,
    pub processing_time_ms: f32,
    pub quality: SlamQuality,
    pub feature_count: i32,
    pub matched_features: i32,
}

impl Default for TrackingStats {
    fn default() -> Self {
        Self {
            total_keyframes: 0,
            total_landmarks: 0,
            tracking_keyframes: 0,
            average_reprojection_error: 0.0,
            processing_time_ms: 0.0,
            quality: SlamQuality::Poor,
            feature_count: 0,
            matched_features: 0,
        }
    }
}

/// Native tracker configuration (feature, tracking, mapping, performance,
/// and memory parameters).
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct SlamConfig {
    pub max_features: i32,
    pub feature_quality: f32,
    pub min_feature_distance: f32,

    pub max_reprojection_error: f32,
    pub min_tracking_features: i32,
    pub max_tracking_iterations: i32,

    pub keyframe_threshold: i32,
    pub keyframe_distance: f32,
    pub keyframe_angle: f32,

    pub enable_multithreading: bool,
    pub max_threads: i32,
    pub enable_loop_closure: bool,
    pub enable_relocalization: bool,

    pub max_keyframes: i32,
    pub max_landmarks: i32,
    pub memory_limit_mb: f32,
}

impl Default for SlamConfig {
    fn default() -> Self {
        Self {
            max_features: 1200,
            feature_quality: 0.01,
            min_feature_distance: 10.0,
            max_reprojection_error: 4.0,
            min_tracking_features: 30,
            max_tracking_iterations: 20,
            keyframe_threshold: 20,
            keyframe_distance: 0.5,
            keyframe_angle: 0.25,
            enable_multithreading: true,
            max_threads: 4,
            enable_loop_closure: true,
            enable_relocalization: true,
            max_keyframes: 500,
            max_landmarks: 50_000,
            memory_limit_mb: 512.0,
        }
    }
}

/// Summary of the map held by a tracker instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MapInfo {
    pub map_id: String,
    pub center_position: [f32; 3],
    pub bounding_box_min: [f32; 3],
    pub bounding_box_max: [f32; 3],
    pub landmark_count: i32,
    pub keyframe_count: i32,
    pub creation_timestamp: f64,
    pub version: i32,
}

/// Operation surface of one native tracker instance.
///
/// Every method maps 1:1 onto a C entry point taking the opaque handle. The
/// caller must guarantee exclusive access: one call at a time, one frame in
/// flight. `release` corresponds to `destroy` and is called exactly once,
/// by [`MapHandle`].
pub trait NativeSlamApi: Send {
    fn state(&self) -> SlamState;

    /// Submit one RGB frame (8-bit per channel). Returns the result code and,
    /// on success, the estimated pose.
    fn process_frame(
        &mut self,
        image: &[u8],
        width: i32,
        height: i32,
        timestamp: f64,
    ) -> (SlamResult, Option<NativePose>);

    fn current_pose(&self) -> (SlamResult, Option<NativePose>);

    fn tracking_stats(&self) -> (SlamResult, TrackingStats);

    fn save_map_to_buffer(&self) -> (SlamResult, Vec<u8>);

    fn load_map_from_buffer(&mut self, buffer: &[u8]) -> SlamResult;

    fn save_map_to_file(&self, path: &str) -> SlamResult;

    fn load_map_from_file(&mut self, path: &str) -> SlamResult;

    fn map_info(&self) -> (SlamResult, Option<MapInfo>);

    fn request_relocalization(&mut self) -> SlamResult;

    /// Last relocalization outcome: Success with the recovered pose, or
    /// TrackingLost while recovery is still pending.
    fn relocalization_result(&self) -> (SlamResult, Option<NativePose>);

    fn reset(&mut self) -> SlamResult;

    /// Free native resources. Called once, by the owning handle.
    fn release(&mut self);
}

/// Factory corresponding to the native `create` entry point.
///
/// Returns `None` where the C side would return NULL.
pub trait NativeSlamFactory: Send {
    fn create(
        &self,
        config: &SlamConfig,
        calibration: &CameraCalibration,
        vocabulary_path: Option<&str>,
    ) -> Option<Box<dyn NativeSlamApi>>;
}

/// Exclusive owner of one native tracker instance.
///
/// Guarantees the release-exactly-once contract: `destroy` is idempotent and
/// `Drop` covers every exit path, including failures.
pub struct MapHandle {
    inner: Option<Box<dyn NativeSlamApi>>,
}

// Derive cannot see through the trait object; report liveness instead.
impl std::fmt::Debug for MapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapHandle")
            .field("live", &self.is_live())
            .finish()
    }
}

impl MapHandle {
    pub fn new(api: Box<dyn NativeSlamApi>) -> Self {
        Self { inner: Some(api) }
    }

    /// Access the live instance, or fail if the handle was already destroyed.
    pub fn get(&self) -> Result<&dyn NativeSlamApi> {
        self.inner
            .as_deref()
            .ok_or_else(|| TrackingError::FrameProcessing("native handle destroyed".into()))
    }

    pub fn get_mut(&mut self) -> Result<&mut (dyn NativeSlamApi + 'static)> {
        self.inner
            .as_deref_mut()
            .map(|api| api as &mut (dyn NativeSlamApi + 'static))
            .ok_or_else(|| TrackingError::FrameProcessing("native handle destroyed".into()))
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_some()
    }

    /// Release the native instance. Safe to call more than once; only the
    /// first call reaches the native side.
    pub fn destroy(&mut self) {
        if let Some(mut api) = self.inner.take() {
            api.release();
        }
    }
}

impl Drop for MapHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn result_codes_match_the_abi() {
        assert_eq!(SlamResult::Success as i32, 0);
        assert_eq!(SlamResult::InvalidParameter as i32, -1);
        assert_eq!(SlamResult::TrackingLost as i32, -7);
        assert_eq!(SlamResult::FileNotFound as i32, -10);

        // Every raw code round-trips.
        for code in (-10..=0).rev() {
            let result = SlamResult::from_raw(code).unwrap();
            assert_eq!(result as i32, code);
            assert!(!result.as_str().is_empty());
        }
        assert!(SlamResult::from_raw(-11).is_none());
        assert!(SlamResult::from_raw(1).is_none());
    }

    #[test]
    fn state_discriminants_match_the_abi() {
        assert_eq!(SlamState::Uninitialized as i32, 0);
        assert_eq!(SlamState::Relocalization as i32, 5);
        assert_eq!(SlamState::Failed as i32, 6);
        assert_eq!(SlamQuality::Excellent as i32, 3);
    }

    struct CountingApi {
        releases: Arc<AtomicU32>,
    }

    impl NativeSlamApi for CountingApi {
        fn state(&self) -> SlamState {
            SlamState::Ready
        }
        fn process_frame(
            &mut self,
            _image: &[u8],
            _width: i32,
            _height: i32,
            _timestamp: f64,
        ) -> (SlamResult, Option<NativePose>) {
            (SlamResult::SystemNotReady, None)
        }
        fn current_pose(&self) -> (SlamResult, Option<NativePose>) {
            (SlamResult::SystemNotReady, None)
        }
        fn tracking_stats(&self) -> (SlamResult, TrackingStats) {
            (SlamResult::Success, TrackingStats::default())
        }
        fn save_map_to_buffer(&self) -> (SlamResult, Vec<u8>) {
            (SlamResult::Success, Vec::new())
        }
        fn load_map_from_buffer(&mut self, _buffer: &[u8]) -> SlamResult {
            SlamResult::Success
        }
        fn save_map_to_file(&self, _path: &str) -> SlamResult {
            SlamResult::Success
        }
        fn load_map_from_file(&mut self, _path: &str) -> SlamResult {
            SlamResult::Success
        }
        fn map_info(&self) -> (SlamResult, Option<MapInfo>) {
            (SlamResult::SystemNotReady, None)
        }
        fn request_relocalization(&mut self) -> SlamResult {
            SlamResult::Success
        }
        fn relocalization_result(&self) -> (SlamResult, Option<NativePose>) {
            (SlamResult::TrackingLost, None)
        }
        fn reset(&mut self) -> SlamResult {
            SlamResult::Success
        }
        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn handle_releases_exactly_once() {
        let releases = Arc::new(AtomicU32::new(0));
        let mut handle = MapHandle::new(Box::new(CountingApi {
            releases: releases.clone(),
        }));

        assert!(handle.is_live());
        handle.destroy();
        handle.destroy();
        drop(handle);

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_drop_releases_on_exit_path() {
        let releases = Arc::new(AtomicU32::new(0));
        {
            let _handle = MapHandle::new(Box::new(CountingApi {
                releases: releases.clone(),
            }));
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
