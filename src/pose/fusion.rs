//! Confidence-weighted pose fusion.
//!
//! The engine runs at a fixed rate (10 Hz by default) on the latest snapshot
//! of each source and never blocks. The visual (SLAM) pose is authoritative:
//! the inertial/VIO pose only contributes when it is healthy, meaning it is
//! fresh (age <= 1 s), confident (>= 0.5), and its stream reports tracking or
//! tracking_degraded. An unhealthy inertial pose makes the fused output the
//! visual pose verbatim.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::FusionConfig;
use crate::pose::{Pose, PoseSourceTag, SourceState};

/// Latest fused pose plus the per-source inputs it was derived from.
#[derive(Debug, Clone, Default)]
pub struct FusionState {
    pub fused: Option<Pose>,
    pub last_visual: Option<Pose>,
    pub last_inertial: Option<Pose>,
    pub visual_healthy: bool,
    pub inertial_healthy: bool,
}

/// Transmission rates after network-quality adaptation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveRates {
    pub imu_rate_hz: f64,
    pub visual_rate_hz: f64,
    pub inertial_weight: f64,
}

#[derive(Debug, Clone, Copy)]
struct InertialFeed {
    pose: Pose,
    state: SourceState,
    received_at: f64,
}

/// Combines the latest SLAM pose and inertially-derived pose into one fused
/// pose. Single-writer: only the fusion tick mutates state; readers take
/// cloned snapshots through [`FusionEngine::snapshot`].
pub struct FusionEngine {
    config: FusionConfig,
    visual: Option<Pose>,
    inertial: Option<InertialFeed>,
    shared: Arc<RwLock<FusionState>>,
    history: VecDeque<Pose>,
    rates: AdaptiveRates,
    base_imu_rate_hz: f64,
    base_visual_rate_hz: f64,
}

impl FusionEngine {
    pub fn new(config: FusionConfig, imu_rate_hz: f64, visual_rate_hz: f64) -> Self {
        let rates = AdaptiveRates {
            imu_rate_hz,
            visual_rate_hz,
            inertial_weight: config.inertial_weight,
        };
        Self {
            config,
            visual: None,
            inertial: None,
            shared: Arc::new(RwLock::new(FusionState::default())),
            history: VecDeque::new(),
            rates,
            base_imu_rate_hz: imu_rate_hz,
            base_visual_rate_hz: visual_rate_hz,
        }
    }

    /// Shared handle for readers; snapshots are cloned out under the lock.
    pub fn shared(&self) -> Arc<RwLock<FusionState>> {
        self.shared.clone()
    }

    pub fn snapshot(&self) -> FusionState {
        self.shared.read().clone()
    }

    pub fn update_visual(&mut self, pose: Pose) {
        self.visual = Some(pose);
    }

    pub fn update_inertial(&mut self, pose: Pose, state: SourceState, received_at: f64) {
        self.inertial = Some(InertialFeed {
            pose,
            state,
            received_at,
        });
    }

    /// Drop all per-source inputs (used on reset).
    pub fn clear(&mut self) {
        self.visual = None;
        self.inertial = None;
        self.history.clear();
        *self.shared.write() = FusionState::default();
    }

    fn inertial_healthy(&self, now: f64) -> bool {
        match &self.inertial {
            Some(feed) => {
                now - feed.received_at <= self.config.max_inertial_age_s
                    && feed.pose.confidence() >= self.config.min_inertial_confidence
                    && feed.state.is_usable()
            }
            None => false,
        }
    }

    /// Run one fusion evaluation and return the fused pose, if any source has
    /// produced anything yet.
    pub fn evaluate(&mut self, now: f64) -> Option<Pose> {
        let inertial_healthy = self.inertial_healthy(now);
        let visual_healthy = self.visual.is_some();

        let fused = match (self.visual, self.inertial) {
            // Healthy inertial pose: blend with the configured weight.
            (Some(visual), Some(feed)) if inertial_healthy => {
                let w = self.rates.inertial_weight.clamp(0.0, 1.0);
                let position = visual.position.lerp(&feed.pose.position, w);
                let orientation = visual.orientation.slerp(&feed.pose.orientation, w);
                let confidence =
                    visual.confidence() * (1.0 - w) + feed.pose.confidence() * w;
                Some(Pose::new(
                    position,
                    orientation,
                    visual.timestamp.max(feed.pose.timestamp),
                    confidence,
                    PoseSourceTag::Fused,
                ))
            }
            // Unhealthy or absent inertial: visual passes through verbatim.
            (Some(visual), _) => Some(visual),
            // No visual yet: healthy inertial passes through on its own.
            (None, Some(feed)) if inertial_healthy => Some(feed.pose),
            (None, _) => None,
        };

        let mut shared = self.shared.write();
        shared.fused = fused;
        shared.last_visual = self.visual;
        shared.last_inertial = self.inertial.map(|f| f.pose);
        shared.visual_healthy = visual_healthy;
        shared.inertial_healthy = inertial_healthy;
        drop(shared);

        if let Some(pose) = fused {
            if self.history.len() == self.config.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(pose);
        }
        fused
    }

    /// Scale transmission rates and the fusion weight with reported network
    /// quality. Quality at or above 0.5 restores the configured baselines;
    /// below 0.5 everything scales proportionally, with rate floors.
    pub fn adapt_to_network_quality(&mut self, quality: f64) -> AdaptiveRates {
        let quality = quality.clamp(0.0, 1.0);
        if quality >= 0.5 {
            self.rates = AdaptiveRates {
                imu_rate_hz: self.base_imu_rate_hz,
                visual_rate_hz: self.base_visual_rate_hz,
                inertial_weight: self.config.inertial_weight,
            };
        } else {
            let factor = quality / 0.5;
            self.rates = AdaptiveRates {
                imu_rate_hz: (self.base_imu_rate_hz * factor).max(self.config.min_imu_rate_hz),
                visual_rate_hz: (self.base_visual_rate_hz * factor)
                    .max(self.config.min_visual_rate_hz),
                inertial_weight: self.config.inertial_weight * factor,
            };
            tracing::info!(
                quality,
                imu_rate_hz = self.rates.imu_rate_hz,
                visual_rate_hz = self.rates.visual_rate_hz,
                "degraded network quality, reducing transmission rates"
            );
        }
        self.rates
    }

    pub fn rates(&self) -> AdaptiveRates {
        self.rates
    }

    /// Overall tracking quality in [0, 1]: fused confidence decayed linearly
    /// over two seconds of age, boosted when both sources are live.
    pub fn tracking_quality(&self, now: f64) -> f64 {
        let shared = self.shared.read();
        let Some(fused) = shared.fused else {
            return 0.0;
        };
        let age = (now - fused.timestamp).max(0.0);
        let age_factor = (1.0 - age / 2.0).max(0.0);
        let boost = if shared.visual_healthy && shared.inertial_healthy {
            1.2
        } else {
            1.0
        };
        (fused.confidence() * age_factor * boost).min(1.0)
    }

    /// Fused-pose history no older than `max_age_s`, oldest first.
    pub fn history_since(&self, now: f64, max_age_s: f64) -> Vec<Pose> {
        self.history
            .iter()
            .filter(|p| now - p.timestamp <= max_age_s)
            .copied()
            .collect()
    }
}
