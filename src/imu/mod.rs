//! Inertial measurement pipeline.
//!
//! Raw readings come from an [`ImuDriver`], pass through bias/scale
//! correction and low-pass filtering in the [`InertialSampler`], and land in
//! a bounded history. The [`SensorCalibrator`] derives bias corrections from
//! a stationary collection window without ever blocking the sampling tick.

pub mod calibration;
pub mod sample;
pub mod sampler;

pub use calibration::{CalibrationProfile, SensorCalibrator};
pub use sample::{ImuDriver, RawImuReading, SensorCapabilities, SensorSample};
pub use sampler::{InertialSampler, SamplerTick};
