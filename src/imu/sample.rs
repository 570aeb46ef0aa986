use nalgebra::Vector3;

/// Gravity vector in world frame (m/s^2).
pub const GRAVITY: Vector3<f64> = Vector3::new(0.0, 0.0, -9.81);

/// Which physical sensors a driver can deliver.
///
/// Accelerometer and gyroscope are mandatory for the sampler to start; a
/// missing magnetometer only degrades accuracy.
#[derive(Debug, Clone, Copy)]
pub struct SensorCapabilities {
    pub accel: bool,
    pub gyro: bool,
    pub mag: bool,
}

impl SensorCapabilities {
    pub fn full() -> Self {
        Self {
            accel: true,
            gyro: true,
            mag: true,
        }
    }
}

/// One uncalibrated reading straight from the hardware.
#[derive(Debug, Clone, Copy)]
pub struct RawImuReading {
    pub timestamp_s: f64,
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
    pub mag: Option<Vector3<f64>>,
    pub temperature: Option<f64>,
}

/// Source of raw inertial readings, polled once per sampling tick.
pub trait ImuDriver: Send {
    fn capabilities(&self) -> SensorCapabilities;

    /// Read the latest raw values. `now` is the monotonic clock in seconds.
    fn read(&mut self, now: f64) -> RawImuReading;
}

/// Single calibrated IMU measurement. Immutable once produced; lives in the
/// sampler's bounded history until evicted.
#[derive(Debug, Clone, Copy)]
pub struct SensorSample {
    /// Monotonic timestamp in seconds.
    pub timestamp_s: f64,
    /// Calibrated, filtered acceleration (m/s^2).
    pub accel: Vector3<f64>,
    /// Calibrated, filtered angular rate (rad/s).
    pub gyro: Vector3<f64>,
    /// Calibrated magnetic field (uT), if the device has a magnetometer.
    pub mag: Option<Vector3<f64>>,
    pub temperature: Option<f64>,
    pub is_valid: bool,
}
