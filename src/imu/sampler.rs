//! Inertial sampler: calibration, filtering, outlier rejection, history.
//!
//! `sample()` is invoked once per sampling tick (200 Hz by default) and
//! applies, in order: bias/scale correction from the active profile, a
//! single-pole low-pass filter, and magnitude-based outlier rejection.
//! Rejected samples are dropped before they touch the filter state or the
//! buffer, and logged as warnings.

use std::collections::VecDeque;

use nalgebra::Vector3;

use crate::config::SamplerConfig;
use crate::error::{Result, TrackingError};
use crate::imu::calibration::{CalibrationProfile, SensorCalibrator};
use crate::imu::sample::{ImuDriver, SensorSample};

/// Outcome of one sampling tick.
#[derive(Debug, Default)]
pub struct SamplerTick {
    /// The sample produced this tick, if it passed outlier rejection.
    pub sample: Option<SensorSample>,
    /// Set when a calibration window finished this tick. The new profile is
    /// already active; the caller publishes the completion event.
    pub calibration_complete: Option<CalibrationProfile>,
}

struct LowPass {
    accel: Option<Vector3<f64>>,
    gyro: Option<Vector3<f64>>,
    alpha: f64,
}

impl LowPass {
    fn apply(&mut self, accel: Vector3<f64>, gyro: Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
        let accel = match self.accel {
            Some(prev) => prev + (accel - prev) * self.alpha,
            None => accel,
        };
        let gyro = match self.gyro {
            Some(prev) => prev + (gyro - prev) * self.alpha,
            None => gyro,
        };
        self.accel = Some(accel);
        self.gyro = Some(gyro);
        (accel, gyro)
    }

    fn reset(&mut self) {
        self.accel = None;
        self.gyro = None;
    }
}

/// Fixed-rate inertial sampler with a bounded sample history.
pub struct InertialSampler {
    driver: Box<dyn ImuDriver>,
    config: SamplerConfig,
    profile: CalibrationProfile,
    calibrator: SensorCalibrator,
    filter: LowPass,
    buffer: VecDeque<SensorSample>,
    started: bool,
    has_mag: bool,
    dropped_outliers: u64,
}

impl InertialSampler {
    pub fn new(driver: Box<dyn ImuDriver>, config: SamplerConfig) -> Self {
        let alpha = config.lowpass_alpha.clamp(0.0, 1.0);
        Self {
            driver,
            config,
            profile: CalibrationProfile::identity(),
            calibrator: SensorCalibrator::new(),
            filter: LowPass {
                accel: None,
                gyro: None,
                alpha,
            },
            buffer: VecDeque::new(),
            started: false,
            has_mag: false,
            dropped_outliers: 0,
        }
    }

    /// Verify sensor availability and arm the sampler.
    ///
    /// A missing accelerometer or gyroscope is a hard failure; a missing
    /// magnetometer only degrades accuracy.
    pub fn start(&mut self) -> Result<()> {
        let caps = self.driver.capabilities();
        if !caps.accel {
            return Err(TrackingError::SensorUnavailable("accelerometer".into()));
        }
        if !caps.gyro {
            return Err(TrackingError::SensorUnavailable("gyroscope".into()));
        }
        self.has_mag = caps.mag;
        if !caps.mag {
            tracing::warn!("magnetometer unavailable, heading accuracy degraded");
        }
        self.started = true;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Begin a stationary calibration window of `duration_s` seconds.
    pub fn start_calibration(&mut self, duration_s: f64, now: f64) {
        self.calibrator.start(duration_s, now);
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrator.is_active()
    }

    /// Replace the active profile wholesale (externally supplied).
    pub fn set_profile(&mut self, profile: CalibrationProfile) {
        self.profile = profile;
        self.filter.reset();
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    /// Run one sampling tick: read the driver, feed the calibrator, correct,
    /// reject outliers, filter, and buffer.
    pub fn sample(&mut self, now: f64) -> Result<SamplerTick> {
        if !self.started {
            return Err(TrackingError::SensorUnavailable("sampler not started".into()));
        }

        let raw = self.driver.read(now);
        let mut tick = SamplerTick::default();

        // Calibration ingests raw (uncorrected) vectors, opportunistically.
        match self.calibrator.ingest(&raw, now) {
            Ok(Some(profile)) => {
                self.profile = profile.clone();
                self.filter.reset();
                tick.calibration_complete = Some(profile);
            }
            Ok(None) => {}
            Err(err) => return Err(err),
        }

        let accel = self.profile.apply_accel(raw.accel);
        let gyro = self.profile.apply_gyro(raw.gyro);

        // Outliers never reach the filter state or the buffer.
        if accel.norm() > self.config.max_accel_magnitude
            || gyro.norm() > self.config.max_gyro_magnitude
        {
            self.dropped_outliers += 1;
            tracing::warn!(
                accel_mag = accel.norm(),
                gyro_mag = gyro.norm(),
                dropped = self.dropped_outliers,
                "dropping outlier IMU sample"
            );
            return Ok(tick);
        }

        let (accel, gyro) = self.filter.apply(accel, gyro);
        let mag = if self.has_mag {
            raw.mag.map(|m| self.profile.apply_mag(m))
        } else {
            None
        };

        let sample = SensorSample {
            timestamp_s: raw.timestamp_s,
            accel,
            gyro,
            mag,
            temperature: raw.temperature,
            is_valid: true,
        };
        if self.buffer.len() == self.config.buffer_capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
        tick.sample = Some(sample);
        Ok(tick)
    }

    /// The most recent `n` samples, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<SensorSample> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).copied().collect()
    }

    /// All buffered samples with `timestamp_s >= since`.
    pub fn since(&self, since: f64) -> Vec<SensorSample> {
        self.buffer
            .iter()
            .filter(|s| s.timestamp_s >= since)
            .copied()
            .collect()
    }

    /// All buffered samples strictly newer than `timestamp`. Transmission
    /// batches use this bound so a sample on the batch boundary is never
    /// sent twice.
    pub fn after(&self, timestamp: f64) -> Vec<SensorSample> {
        self.buffer
            .iter()
            .filter(|s| s.timestamp_s > timestamp)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn dropped_outliers(&self) -> u64 {
        self.dropped_outliers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::sample::{RawImuReading, SensorCapabilities};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Driver replaying a scripted sequence of raw readings.
    struct ScriptedDriver {
        caps: SensorCapabilities,
        readings: Vec<RawImuReading>,
        cursor: usize,
    }

    impl ScriptedDriver {
        fn new(caps: SensorCapabilities, readings: Vec<RawImuReading>) -> Self {
            Self {
                caps,
                readings,
                cursor: 0,
            }
        }
    }

    impl ImuDriver for ScriptedDriver {
        fn capabilities(&self) -> SensorCapabilities {
            self.caps
        }

        fn read(&mut self, now: f64) -> RawImuReading {
            let idx = self.cursor.min(self.readings.len() - 1);
            self.cursor += 1;
            let mut r = self.readings[idx];
            r.timestamp_s = now;
            r
        }
    }

    fn still(accel: Vector3<f64>, gyro: Vector3<f64>) -> RawImuReading {
        RawImuReading {
            timestamp_s: 0.0,
            accel,
            gyro,
            mag: None,
            temperature: None,
        }
    }

    fn passthrough_config() -> SamplerConfig {
        SamplerConfig {
            lowpass_alpha: 1.0,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn missing_accelerometer_is_a_hard_failure() {
        let caps = SensorCapabilities {
            accel: false,
            gyro: true,
            mag: true,
        };
        let driver = ScriptedDriver::new(caps, vec![still(Vector3::zeros(), Vector3::zeros())]);
        let mut sampler = InertialSampler::new(Box::new(driver), SamplerConfig::default());
        let err = sampler.start().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SensorUnavailable);
        assert!(!sampler.is_started());
    }

    #[test]
    fn missing_magnetometer_is_tolerated() {
        let caps = SensorCapabilities {
            accel: true,
            gyro: true,
            mag: false,
        };
        let driver = ScriptedDriver::new(caps, vec![still(Vector3::zeros(), Vector3::zeros())]);
        let mut sampler = InertialSampler::new(Box::new(driver), passthrough_config());
        sampler.start().unwrap();
        let tick = sampler.sample(0.0).unwrap();
        assert!(tick.sample.unwrap().mag.is_none());
    }

    #[test]
    fn outliers_never_enter_the_buffer() {
        let readings = vec![
            still(Vector3::new(0.0, 0.0, 9.8), Vector3::zeros()),
            // 60 m/s^2 spike, above the 50 threshold.
            still(Vector3::new(60.0, 0.0, 0.0), Vector3::zeros()),
            // 12 rad/s spin, above the 10 threshold.
            still(Vector3::zeros(), Vector3::new(12.0, 0.0, 0.0)),
            still(Vector3::new(0.0, 0.0, 9.8), Vector3::zeros()),
        ];
        let driver = ScriptedDriver::new(SensorCapabilities::full(), readings);
        let mut sampler = InertialSampler::new(Box::new(driver), passthrough_config());
        sampler.start().unwrap();

        assert!(sampler.sample(0.000).unwrap().sample.is_some());
        assert!(sampler.sample(0.005).unwrap().sample.is_none());
        assert!(sampler.sample(0.010).unwrap().sample.is_none());
        assert!(sampler.sample(0.015).unwrap().sample.is_some());

        assert_eq!(sampler.len(), 2);
        assert_eq!(sampler.dropped_outliers(), 2);
        for s in sampler.last_n(10) {
            assert!(s.accel.norm() <= 50.0);
            assert!(s.gyro.norm() <= 10.0);
        }
    }

    #[test]
    fn buffer_is_bounded_and_queries_work() {
        let readings = vec![still(Vector3::new(0.0, 0.0, 9.8), Vector3::zeros())];
        let driver = ScriptedDriver::new(SensorCapabilities::full(), readings);
        let config = SamplerConfig {
            buffer_capacity: 8,
            ..passthrough_config()
        };
        let mut sampler = InertialSampler::new(Box::new(driver), config);
        sampler.start().unwrap();

        for i in 0..20 {
            sampler.sample(i as f64 * 0.005).unwrap();
        }
        assert_eq!(sampler.len(), 8);

        let last3 = sampler.last_n(3);
        assert_eq!(last3.len(), 3);
        assert_relative_eq!(last3[2].timestamp_s, 19.0 * 0.005);
        assert!(last3[0].timestamp_s < last3[2].timestamp_s);

        let recent = sampler.since(17.0 * 0.005);
        assert_eq!(recent.len(), 3);

        // The strict bound excludes the boundary sample itself.
        let newer = sampler.after(17.0 * 0.005);
        assert_eq!(newer.len(), 2);
    }

    #[test]
    fn lowpass_smooths_step_input() {
        let readings = vec![
            still(Vector3::zeros(), Vector3::zeros()),
            still(Vector3::new(10.0, 0.0, 0.0), Vector3::zeros()),
        ];
        let driver = ScriptedDriver::new(SensorCapabilities::full(), readings);
        let config = SamplerConfig {
            lowpass_alpha: 0.5,
            ..SamplerConfig::default()
        };
        let mut sampler = InertialSampler::new(Box::new(driver), config);
        sampler.start().unwrap();

        sampler.sample(0.0).unwrap();
        let tick = sampler.sample(0.005).unwrap();
        // y += alpha * (x - y): 0 + 0.5 * (10 - 0) = 5.
        assert_relative_eq!(tick.sample.unwrap().accel.x, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn stationary_window_yields_mean_bias() {
        // 10 seconds of 200 Hz stationary noise around a fixed mean.
        let mut rng = StdRng::seed_from_u64(7);
        let mean = Vector3::new(0.05, -0.02, 9.81);
        let gyro_mean = Vector3::new(0.002, -0.001, 0.0005);
        let mut readings = Vec::new();
        let mut accel_sum = Vector3::zeros();
        let mut gyro_sum = Vector3::zeros();
        let n = 2000;
        for _ in 0..n {
            let noise = Vector3::new(
                rng.gen_range(-0.01..0.01),
                rng.gen_range(-0.01..0.01),
                rng.gen_range(-0.01..0.01),
            );
            let gyro_noise = Vector3::new(
                rng.gen_range(-0.001..0.001),
                rng.gen_range(-0.001..0.001),
                rng.gen_range(-0.001..0.001),
            );
            accel_sum += mean + noise;
            gyro_sum += gyro_mean + gyro_noise;
            readings.push(still(mean + noise, gyro_mean + gyro_noise));
        }
        let expected_accel = accel_sum / n as f64;
        let expected_gyro = gyro_sum / n as f64;

        let driver = ScriptedDriver::new(SensorCapabilities::full(), readings);
        let mut sampler = InertialSampler::new(Box::new(driver), passthrough_config());
        sampler.start().unwrap();
        sampler.start_calibration(10.0, 0.0);

        let mut profile = None;
        for i in 0..=n {
            let now = i as f64 * 0.005;
            let tick = sampler.sample(now).unwrap();
            if let Some(p) = tick.calibration_complete {
                profile = Some(p);
                break;
            }
        }
        let profile = profile.expect("calibration should complete after the window");

        // Bias equals the mean of the ingested window (within noise tolerance
        // of the mean itself, since the last reading repeats past the script).
        assert_relative_eq!(profile.accel_bias.x, expected_accel.x, epsilon = 1e-3);
        assert_relative_eq!(profile.accel_bias.z, expected_accel.z, epsilon = 1e-3);
        assert_relative_eq!(profile.gyro_bias.x, expected_gyro.x, epsilon = 1e-4);
        assert!(profile.calibrated);
        assert!(!sampler.is_calibrating());
    }
}
