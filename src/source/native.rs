//! Native in-process tracker.
//!
//! Wraps one native tracker instance behind the bridge ABI with the
//! single-owner discipline the contract demands: calls are synchronous, one
//! frame is in flight at a time, and a submission while a previous call is
//! outstanding is rejected rather than queued. The handle is released
//! exactly once, on every exit path.

use crate::bridge::{
    CameraCalibration, MapHandle, NativeSlamFactory, SlamConfig, SlamResult, SlamState,
    TrackingStats,
};
use crate::error::{Result, TrackingError};
use crate::pose::{Pose, SourceState};
use crate::source::{FrameInput, FrameOutcome};

/// Synchronous pose source backed by the native SLAM library.
pub struct NativeTracker {
    handle: MapHandle,
    /// Exclusive-call guard: set for the duration of a native invocation.
    in_flight: bool,
    last_stats: TrackingStats,
}

impl std::fmt::Debug for NativeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTracker")
            .field("handle", &self.handle)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl NativeTracker {
    /// Create a tracker through the native factory.
    ///
    /// A NULL handle from the native side is an initialization failure; the
    /// fallback controller decides whether it is fatal.
    pub fn create(
        factory: &dyn NativeSlamFactory,
        config: &SlamConfig,
        calibration: &CameraCalibration,
        vocabulary_path: Option<&str>,
    ) -> Result<Self> {
        let api = factory
            .create(config, calibration, vocabulary_path)
            .ok_or_else(|| {
                TrackingError::NativeInitialization("native create returned null".into())
            })?;
        tracing::info!("native tracker created");
        Ok(Self {
            handle: MapHandle::new(api),
            in_flight: false,
            last_stats: TrackingStats::default(),
        })
    }

    /// Whether the native side has reached Ready (or beyond).
    pub fn is_ready(&self) -> bool {
        matches!(
            self.raw_state(),
            SlamState::Ready | SlamState::Tracking | SlamState::Lost | SlamState::Relocalization
        )
    }

    pub fn raw_state(&self) -> SlamState {
        match self.handle.get() {
            Ok(api) => api.state(),
            Err(_) => SlamState::Uninitialized,
        }
    }

    pub fn source_state(&self) -> SourceState {
        match self.raw_state() {
            SlamState::Tracking => SourceState::Tracking,
            SlamState::Lost | SlamState::Relocalization | SlamState::Failed => SourceState::Lost,
            SlamState::Uninitialized | SlamState::Initializing | SlamState::Ready => {
                SourceState::Initializing
            }
        }
    }

    /// Process one frame synchronously.
    ///
    /// Every result code of the ABI is handled; codes that merely describe a
    /// bad frame surface as `FrameProcessingFailed` errors for the caller to
    /// downgrade, while `TrackingLost` is an expected outcome.
    pub fn process_frame(&mut self, frame: &FrameInput) -> Result<FrameOutcome> {
        if self.in_flight {
            return Err(TrackingError::FrameProcessing(
                "frame already in flight on native handle".into(),
            ));
        }
        self.in_flight = true;
        let api = match self.handle.get_mut() {
            Ok(api) => api,
            Err(err) => {
                self.in_flight = false;
                return Err(err);
            }
        };
        let (result, pose) =
            api.process_frame(&frame.image, frame.width, frame.height, frame.timestamp);
        let (stats_result, stats) = api.tracking_stats();
        self.in_flight = false;

        if stats_result.is_success() {
            self.last_stats = stats;
        }

        match result {
            SlamResult::Success => Ok(pose
                .map(|p| FrameOutcome::Tracked(Pose::from(p)))
                .unwrap_or(FrameOutcome::NoPose)),
            SlamResult::TrackingLost => Ok(FrameOutcome::TrackingLost),
            // Not enough features in this frame; the state machine treats it
            // like a loss event rather than an error.
            SlamResult::InsufficientFeatures => Ok(FrameOutcome::TrackingLost),
            // Still initializing; nothing actionable.
            SlamResult::SystemNotReady => Ok(FrameOutcome::NoPose),
            SlamResult::OutOfMemory => Err(TrackingError::OutOfMemory),
            SlamResult::InvalidParameter
            | SlamResult::ProcessingFailed
            | SlamResult::UnsupportedFormat => Err(TrackingError::FrameProcessing(
                result.as_str().to_string(),
            )),
            SlamResult::InitializationFailed => Err(TrackingError::NativeInitialization(
                result.as_str().to_string(),
            )),
            SlamResult::MapLoadFailed | SlamResult::FileNotFound => {
                Err(TrackingError::MapIo(result.as_str().to_string()))
            }
        }
    }

    pub fn current_pose(&self) -> Result<Option<Pose>> {
        let api = self.handle.get()?;
        let (result, pose) = api.current_pose();
        match result {
            SlamResult::Success => Ok(pose.map(Pose::from)),
            SlamResult::SystemNotReady | SlamResult::TrackingLost => Ok(None),
            SlamResult::OutOfMemory => Err(TrackingError::OutOfMemory),
            other => Err(TrackingError::FrameProcessing(other.as_str().to_string())),
        }
    }

    pub fn stats(&self) -> TrackingStats {
        self.last_stats
    }

    /// Refresh statistics outside of frame processing.
    pub fn refresh_stats(&mut self) -> Result<TrackingStats> {
        let api = self.handle.get()?;
        let (result, stats) = api.tracking_stats();
        if result.is_success() {
            self.last_stats = stats;
            Ok(stats)
        } else {
            Err(TrackingError::FrameProcessing(result.as_str().to_string()))
        }
    }

    pub fn save_map(&mut self) -> Result<Vec<u8>> {
        let api = self.handle.get()?;
        let (result, buffer) = api.save_map_to_buffer();
        map_io_result(result)?;
        Ok(buffer)
    }

    pub fn load_map(&mut self, buffer: &[u8]) -> Result<()> {
        let api = self.handle.get_mut()?;
        map_io_result(api.load_map_from_buffer(buffer))
    }

    pub fn save_map_to_file(&mut self, path: &str) -> Result<()> {
        let api = self.handle.get()?;
        map_io_result(api.save_map_to_file(path))
    }

    pub fn load_map_from_file(&mut self, path: &str) -> Result<()> {
        let api = self.handle.get_mut()?;
        map_io_result(api.load_map_from_file(path))
    }

    pub fn request_relocalization(&mut self) -> Result<()> {
        let api = self.handle.get_mut()?;
        let result = api.request_relocalization();
        if result.is_success() {
            Ok(())
        } else {
            Err(TrackingError::RelocalizationFailed { attempts: 1 })
        }
    }

    /// Poll the last relocalization outcome: `Some(pose)` on success, `None`
    /// while recovery is still pending.
    pub fn relocalization_result(&self) -> Result<Option<Pose>> {
        let api = self.handle.get()?;
        let (result, pose) = api.relocalization_result();
        match result {
            SlamResult::Success => Ok(pose.map(Pose::from)),
            SlamResult::TrackingLost | SlamResult::SystemNotReady => Ok(None),
            other => Err(TrackingError::FrameProcessing(other.as_str().to_string())),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        self.in_flight = false;
        self.last_stats = TrackingStats::default();
        let api = self.handle.get_mut()?;
        let result = api.reset();
        if result.is_success() {
            Ok(())
        } else {
            Err(TrackingError::FrameProcessing(result.as_str().to_string()))
        }
    }

    /// Release the native handle. Idempotent; also runs on drop.
    pub fn destroy(&mut self) {
        self.handle.destroy();
    }
}

fn map_io_result(result: SlamResult) -> Result<()> {
    match result {
        SlamResult::Success => Ok(()),
        SlamResult::OutOfMemory => Err(TrackingError::OutOfMemory),
        other => Err(TrackingError::MapIo(other.as_str().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{MapInfo, NativePose, NativeSlamApi, SlamQuality};
    use crate::error::ErrorKind;

    /// In-memory stand-in for the native library: tracks a trivial map whose
    /// keyframe/landmark counts grow with processed frames and serialize
    /// through the buffer contract.
    pub(crate) struct FakeSlam {
        state: SlamState,
        keyframes: i32,
        landmarks: i32,
        script: Vec<SlamResult>,
        cursor: usize,
        released: bool,
    }

    impl FakeSlam {
        pub(crate) fn new(script: Vec<SlamResult>) -> Self {
            Self {
                state: SlamState::Ready,
                keyframes: 0,
                landmarks: 0,
                script,
                cursor: 0,
                released: false,
            }
        }
    }

    impl NativeSlamApi for FakeSlam {
        fn state(&self) -> SlamState {
            self.state
        }

        fn process_frame(
            &mut self,
            _image: &[u8],
            _width: i32,
            _height: i32,
            timestamp: f64,
        ) -> (SlamResult, Option<NativePose>) {
            let result = self
                .script
                .get(self.cursor)
                .copied()
                .unwrap_or(SlamResult::Success);
            self.cursor += 1;
            match result {
                SlamResult::Success => {
                    self.state = SlamState::Tracking;
                    self.keyframes += 1;
                    self.landmarks += 25;
                    let pose = NativePose {
                        position: [self.keyframes as f32, 0.0, 0.0],
                        rotation: [0.0, 0.0, 0.0, 1.0],
                        timestamp,
                        confidence: 0.9,
                    };
                    (SlamResult::Success, Some(pose))
                }
                SlamResult::TrackingLost => {
                    self.state = SlamState::Lost;
                    (SlamResult::TrackingLost, None)
                }
                other => (other, None),
            }
        }

        fn current_pose(&self) -> (SlamResult, Option<NativePose>) {
            if self.state == SlamState::Tracking {
                let pose = NativePose {
                    position: [self.keyframes as f32, 0.0, 0.0],
                    rotation: [0.0, 0.0, 0.0, 1.0],
                    timestamp: 0.0,
                    confidence: 0.9,
                };
                (SlamResult::Success, Some(pose))
            } else {
                (SlamResult::TrackingLost, None)
            }
        }

        fn tracking_stats(&self) -> (SlamResult, TrackingStats) {
            (
                SlamResult::Success,
                TrackingStats {
                    total_keyframes: self.keyframes,
                    total_landmarks: self.landmarks,
                    tracking_keyframes: self.keyframes.min(10),
                    average_reprojection_error: 1.2,
                    processing_time_ms: 8.0,
                    quality: SlamQuality::Good,
                    feature_count: 500,
                    matched_features: 350,
                },
            )
        }

        fn save_map_to_buffer(&self) -> (SlamResult, Vec<u8>) {
            let mut buffer = Vec::with_capacity(8);
            buffer.extend_from_slice(&self.keyframes.to_le_bytes());
            buffer.extend_from_slice(&self.landmarks.to_le_bytes());
            (SlamResult::Success, buffer)
        }

        fn load_map_from_buffer(&mut self, buffer: &[u8]) -> SlamResult {
            if buffer.len() != 8 {
                return SlamResult::MapLoadFailed;
            }
            self.keyframes = i32::from_le_bytes(buffer[0..4].try_into().unwrap());
            self.landmarks = i32::from_le_bytes(buffer[4..8].try_into().unwrap());
            SlamResult::Success
        }

        fn save_map_to_file(&self, _path: &str) -> SlamResult {
            SlamResult::Success
        }

        fn load_map_from_file(&mut self, _path: &str) -> SlamResult {
            SlamResult::FileNotFound
        }

        fn map_info(&self) -> (SlamResult, Option<MapInfo>) {
            (
                SlamResult::Success,
                Some(MapInfo {
                    map_id: "fake".into(),
                    center_position: [0.0; 3],
                    bounding_box_min: [0.0; 3],
                    bounding_box_max: [0.0; 3],
                    landmark_count: self.landmarks,
                    keyframe_count: self.keyframes,
                    creation_timestamp: 0.0,
                    version: 1,
                }),
            )
        }

        fn request_relocalization(&mut self) -> SlamResult {
            self.state = SlamState::Relocalization;
            SlamResult::Success
        }

        fn relocalization_result(&self) -> (SlamResult, Option<NativePose>) {
            (SlamResult::TrackingLost, None)
        }

        fn reset(&mut self) -> SlamResult {
            self.state = SlamState::Ready;
            self.keyframes = 0;
            self.landmarks = 0;
            self.cursor = 0;
            SlamResult::Success
        }

        fn release(&mut self) {
            assert!(!self.released, "double release of native handle");
            self.released = true;
        }
    }

    pub(crate) struct FakeFactory {
        pub script: Vec<SlamResult>,
        pub fail_create: bool,
    }

    impl NativeSlamFactory for FakeFactory {
        fn create(
            &self,
            _config: &SlamConfig,
            _calibration: &CameraCalibration,
            _vocabulary_path: Option<&str>,
        ) -> Option<Box<dyn NativeSlamApi>> {
            if self.fail_create {
                None
            } else {
                Some(Box::new(FakeSlam::new(self.script.clone())))
            }
        }
    }

    fn tracker(script: Vec<SlamResult>) -> NativeTracker {
        let factory = FakeFactory {
            script,
            fail_create: false,
        };
        NativeTracker::create(
            &factory,
            &SlamConfig::default(),
            &CameraCalibration::pinhole(500.0, 500.0, 320.0, 240.0, 640, 480),
            None,
        )
        .unwrap()
    }

    fn frame(t: f64) -> FrameInput {
        FrameInput {
            image: vec![0u8; 12],
            width: 2,
            height: 2,
            timestamp: t,
        }
    }

    #[test]
    fn null_create_is_an_initialization_failure() {
        let factory = FakeFactory {
            script: vec![],
            fail_create: true,
        };
        let err = NativeTracker::create(
            &factory,
            &SlamConfig::default(),
            &CameraCalibration::pinhole(500.0, 500.0, 320.0, 240.0, 640, 480),
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NativeInitializationFailed);
    }

    #[test]
    fn successful_frame_yields_pose_and_stats() {
        let mut tracker = tracker(vec![SlamResult::Success]);
        let outcome = tracker.process_frame(&frame(1.0)).unwrap();
        match outcome {
            FrameOutcome::Tracked(pose) => {
                assert_eq!(pose.timestamp, 1.0);
                assert!(pose.confidence() > 0.0);
            }
            other => panic!("expected Tracked, got {other:?}"),
        }
        assert_eq!(tracker.stats().total_keyframes, 1);
        assert_eq!(tracker.source_state(), SourceState::Tracking);
    }

    #[test]
    fn tracking_lost_is_an_outcome_not_an_error() {
        let mut tracker = tracker(vec![SlamResult::TrackingLost]);
        let outcome = tracker.process_frame(&frame(1.0)).unwrap();
        assert_eq!(outcome, FrameOutcome::TrackingLost);
        assert_eq!(tracker.source_state(), SourceState::Lost);
    }

    #[test]
    fn out_of_memory_is_fatal() {
        let mut tracker = tracker(vec![SlamResult::OutOfMemory]);
        let err = tracker.process_frame(&frame(1.0)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn map_round_trip_preserves_counts() {
        let mut tracker = tracker(vec![SlamResult::Success; 5]);
        for i in 0..5 {
            tracker.process_frame(&frame(i as f64)).unwrap();
        }
        let before = tracker.refresh_stats().unwrap();
        let buffer = tracker.save_map().unwrap();

        tracker.reset().unwrap();
        assert_eq!(tracker.refresh_stats().unwrap().total_keyframes, 0);

        tracker.load_map(&buffer).unwrap();
        let after = tracker.refresh_stats().unwrap();
        assert_eq!(after.total_keyframes, before.total_keyframes);
        assert_eq!(after.total_landmarks, before.total_landmarks);
    }

    #[test]
    fn missing_map_file_surfaces_as_map_io_error() {
        let mut tracker = tracker(vec![]);
        let err = tracker.load_map_from_file("/nonexistent/map.bin").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MapIoFailed);
    }

    #[test]
    fn destroyed_tracker_rejects_calls_without_double_release() {
        let mut tracker = tracker(vec![]);
        tracker.destroy();
        tracker.destroy();
        let err = tracker.process_frame(&frame(0.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FrameProcessingFailed);
    }

    #[test]
    fn tracker_debug_reflects_handle_liveness() {
        let mut tracker = tracker(vec![]);
        assert!(format!("{tracker:?}").contains("live: true"));
        tracker.destroy();
        assert!(format!("{tracker:?}").contains("live: false"));
    }
}
