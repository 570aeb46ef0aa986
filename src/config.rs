//! Runtime configuration for the tracking core.
//!
//! Defaults mirror the behavior of the production system: 200 Hz inertial
//! sampling with a 1000-sample history, 10 Hz fusion, a 5 second backend
//! initialization timeout, and escalation to relocalization after 10
//! consecutive tracking-loss events.

use serde::{Deserialize, Serialize};

/// Which pose backend(s) the fallback controller should try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Platform decides: mobile prefers native, everything else remote.
    Auto,
    NativePreferred,
    RemotePreferred,
    /// Run both concurrently; if exactly one succeeds it becomes sole active.
    Hybrid,
}

/// Coarse platform capability used by `Auto` backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Mobile,
    Desktop,
}

/// Inertial sampler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Target sampling frequency in Hz.
    pub rate_hz: f64,
    /// Capacity of the bounded sample history.
    pub buffer_capacity: usize,
    /// Single-pole low-pass coefficient in (0, 1]; 1.0 disables smoothing.
    pub lowpass_alpha: f64,
    /// Samples with acceleration magnitude above this are dropped (m/s^2).
    pub max_accel_magnitude: f64,
    /// Samples with angular-rate magnitude above this are dropped (rad/s).
    pub max_gyro_magnitude: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            rate_hz: 200.0,
            buffer_capacity: 1000,
            lowpass_alpha: 0.25,
            max_accel_magnitude: 50.0,
            max_gyro_magnitude: 10.0,
        }
    }
}

/// Pose fusion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Fusion/state evaluation frequency in Hz.
    pub rate_hz: f64,
    /// Inertial contribution to the blend, in [0, 1].
    pub inertial_weight: f64,
    /// Inertial poses older than this are considered unhealthy (seconds).
    pub max_inertial_age_s: f64,
    /// Inertial poses below this confidence are considered unhealthy.
    pub min_inertial_confidence: f64,
    /// Floor for adaptive IMU transmission rate (Hz).
    pub min_imu_rate_hz: f64,
    /// Floor for adaptive visual transmission rate (Hz).
    pub min_visual_rate_hz: f64,
    /// Bounded fused-pose history length.
    pub history_capacity: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rate_hz: 10.0,
            inertial_weight: 0.3,
            max_inertial_age_s: 1.0,
            min_inertial_confidence: 0.5,
            min_imu_rate_hz: 10.0,
            min_visual_rate_hz: 2.0,
            history_capacity: 30,
        }
    }
}

/// Tracking-loss recovery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Consecutive loss events before escalating Lost -> Relocalizing.
    pub loss_escalation_threshold: u32,
    /// Failed relocalization attempts before dropping back to Lost.
    pub max_relocalization_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            loss_escalation_threshold: 10,
            max_relocalization_attempts: 5,
        }
    }
}

/// Top-level configuration for the tracking system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub sampler: SamplerConfig,
    pub fusion: FusionConfig,
    pub recovery: RecoveryConfig,
    pub preference: BackendPreference,
    pub platform: Platform,
    /// Visual frame submission frequency in Hz.
    pub frame_rate_hz: f64,
    /// Hard deadline for a backend to reach Ready during initialization.
    pub init_timeout_s: f64,
    /// Path to the feature vocabulary consumed by the native tracker.
    pub vocabulary_path: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            fusion: FusionConfig::default(),
            recovery: RecoveryConfig::default(),
            preference: BackendPreference::Auto,
            platform: Platform::Mobile,
            frame_rate_hz: 30.0,
            init_timeout_s: 5.0,
            vocabulary_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let cfg = TrackingConfig::default();
        assert_eq!(cfg.sampler.rate_hz, 200.0);
        assert_eq!(cfg.sampler.buffer_capacity, 1000);
        assert_eq!(cfg.fusion.rate_hz, 10.0);
        assert_eq!(cfg.init_timeout_s, 5.0);
        assert_eq!(cfg.recovery.loss_escalation_threshold, 10);
    }

    #[test]
    fn round_trips_through_serde() {
        let cfg = TrackingConfig {
            preference: BackendPreference::Hybrid,
            ..TrackingConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TrackingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.preference, BackendPreference::Hybrid);
        assert_eq!(back.sampler.buffer_capacity, cfg.sampler.buffer_capacity);
    }
}
