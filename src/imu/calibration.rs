//! Stationary bias calibration.
//!
//! Collection runs opportunistically inside the sampling tick: each raw
//! reading is folded into running sums, and when the window elapses the
//! arithmetic mean of the collected vectors becomes the bias. Scale
//! transforms stay identity in this baseline design.
//!
//! The stationary assumption is not validated (no variance check before
//! accepting the bias); callers are responsible for keeping the device still
//! during the window.

use nalgebra::{Matrix3, Vector3};

use crate::error::{Result, TrackingError};
use crate::imu::sample::RawImuReading;

/// Per-axis bias and scale corrections derived by the calibrator.
///
/// Produced once at startup (or on explicit recalibration) and consumed
/// read-only by the sampler; may be replaced wholesale by an externally
/// supplied profile.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationProfile {
    pub accel_bias: Vector3<f64>,
    pub gyro_bias: Vector3<f64>,
    pub mag_bias: Vector3<f64>,
    pub accel_scale: Matrix3<f64>,
    pub gyro_scale: Matrix3<f64>,
    pub calibrated: bool,
}

impl CalibrationProfile {
    /// Identity profile: zero bias, unit scale, not yet calibrated.
    pub fn identity() -> Self {
        Self {
            accel_bias: Vector3::zeros(),
            gyro_bias: Vector3::zeros(),
            mag_bias: Vector3::zeros(),
            accel_scale: Matrix3::identity(),
            gyro_scale: Matrix3::identity(),
            calibrated: false,
        }
    }

    pub fn apply_accel(&self, raw: Vector3<f64>) -> Vector3<f64> {
        self.accel_scale * (raw - self.accel_bias)
    }

    pub fn apply_gyro(&self, raw: Vector3<f64>) -> Vector3<f64> {
        self.gyro_scale * (raw - self.gyro_bias)
    }

    pub fn apply_mag(&self, raw: Vector3<f64>) -> Vector3<f64> {
        raw - self.mag_bias
    }
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self::identity()
    }
}

struct Window {
    ends_at: f64,
    accel_sum: Vector3<f64>,
    gyro_sum: Vector3<f64>,
    mag_sum: Vector3<f64>,
    mag_count: usize,
    count: usize,
}

/// Derives a [`CalibrationProfile`] from a timed collection window of raw
/// readings. Non-blocking: `ingest` is called from the sampling tick and
/// returns the finished profile once the window has elapsed.
pub struct SensorCalibrator {
    window: Option<Window>,
}

impl SensorCalibrator {
    pub fn new() -> Self {
        Self { window: None }
    }

    /// Begin collecting raw samples for `duration_s` seconds.
    ///
    /// Restarting while a window is active discards the partial collection.
    pub fn start(&mut self, duration_s: f64, now: f64) {
        if self.window.is_some() {
            tracing::warn!("restarting calibration, discarding partial window");
        }
        tracing::info!(duration_s, "starting sensor calibration");
        self.window = Some(Window {
            ends_at: now + duration_s,
            accel_sum: Vector3::zeros(),
            gyro_sum: Vector3::zeros(),
            mag_sum: Vector3::zeros(),
            mag_count: 0,
            count: 0,
        });
    }

    pub fn is_active(&self) -> bool {
        self.window.is_some()
    }

    /// Fold one raw reading into the active window.
    ///
    /// Returns `Some(profile)` when the window has elapsed. Returns an error
    /// (and clears the window) if the window ended with no samples collected.
    pub fn ingest(&mut self, raw: &RawImuReading, now: f64) -> Result<Option<CalibrationProfile>> {
        let Some(window) = self.window.as_mut() else {
            return Ok(None);
        };

        if now < window.ends_at {
            window.accel_sum += raw.accel;
            window.gyro_sum += raw.gyro;
            if let Some(mag) = raw.mag {
                window.mag_sum += mag;
                window.mag_count += 1;
            }
            window.count += 1;
            return Ok(None);
        }

        // Window elapsed: finalize and clear.
        let count = window.count;
        let accel_sum = window.accel_sum;
        let gyro_sum = window.gyro_sum;
        let mag_sum = window.mag_sum;
        let mag_count = window.mag_count;
        self.window = None;

        if count == 0 {
            return Err(TrackingError::CalibrationFailed(
                "calibration window elapsed with no samples".into(),
            ));
        }

        let n = count as f64;
        let profile = CalibrationProfile {
            accel_bias: accel_sum / n,
            gyro_bias: gyro_sum / n,
            mag_bias: if mag_count > 0 {
                mag_sum / mag_count as f64
            } else {
                Vector3::zeros()
            },
            accel_scale: Matrix3::identity(),
            gyro_scale: Matrix3::identity(),
            calibrated: true,
        };
        tracing::info!(
            samples = count,
            accel_bias = ?profile.accel_bias.as_slice(),
            gyro_bias = ?profile.gyro_bias.as_slice(),
            "sensor calibration complete"
        );
        Ok(Some(profile))
    }
}

impl Default for SensorCalibrator {
    fn default() -> Self {
        Self::new()
    }
}
