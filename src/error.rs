//! Error model for the tracking core.
//!
//! Every error carries a stable `ErrorKind` tag so subscribers of the error
//! event can switch on the kind without parsing messages. Most kinds are
//! non-fatal and self-heal through retries, rate adaptation, or backend
//! fallback; only `OutOfMemory` and exhausted fallback drive the state
//! machine to `Failed`.

use thiserror::Error;

/// Stable error category published with every error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required sensor (accelerometer or gyroscope) is missing.
    /// Fatal for sampler start; a missing magnetometer only degrades.
    SensorUnavailable,
    CalibrationFailed,
    NativeInitializationFailed,
    RemoteInitializationFailed,
    FrameProcessingFailed,
    /// Expected during operation; drives the state machine, never a crash.
    TrackingLost,
    /// Retried; escalates to a warning after repeated failure.
    RelocalizationFailed,
    MapIoFailed,
    /// Fatal.
    OutOfMemory,
    /// Network-layer fault; non-fatal, retried with adaptive rate.
    TransmissionError,
}

/// Errors produced by the tracking core.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("native tracker initialization failed: {0}")]
    NativeInitialization(String),

    #[error("remote tracker initialization failed: {0}")]
    RemoteInitialization(String),

    #[error("frame processing failed: {0}")]
    FrameProcessing(String),

    #[error("tracking lost")]
    TrackingLost,

    #[error("relocalization failed after {attempts} attempts")]
    RelocalizationFailed { attempts: u32 },

    #[error("map I/O failed: {0}")]
    MapIo(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("transmission error: {0}")]
    Transmission(String),
}

impl TrackingError {
    /// The stable tag delivered with the error event.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SensorUnavailable(_) => ErrorKind::SensorUnavailable,
            Self::CalibrationFailed(_) => ErrorKind::CalibrationFailed,
            Self::NativeInitialization(_) => ErrorKind::NativeInitializationFailed,
            Self::RemoteInitialization(_) => ErrorKind::RemoteInitializationFailed,
            Self::FrameProcessing(_) => ErrorKind::FrameProcessingFailed,
            Self::TrackingLost => ErrorKind::TrackingLost,
            Self::RelocalizationFailed { .. } => ErrorKind::RelocalizationFailed,
            Self::MapIo(_) => ErrorKind::MapIoFailed,
            Self::OutOfMemory => ErrorKind::OutOfMemory,
            Self::Transmission(_) => ErrorKind::TransmissionError,
        }
    }

    /// Whether this error must drive the state machine to `Failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfMemory)
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        let err = TrackingError::Transmission("socket closed".into());
        assert_eq!(err.kind(), ErrorKind::TransmissionError);
        assert!(!err.is_fatal());

        assert!(TrackingError::OutOfMemory.is_fatal());
        assert!(!TrackingError::TrackingLost.is_fatal());
    }
}
