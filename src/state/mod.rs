//! Tracking lifecycle state machine.
//!
//! Owns the single authoritative [`TrackingState`] value. All transitions go
//! through [`TrackingStateMachine::handle`]; no other component mutates the
//! state. `Failed` is terminal and can only be left through an explicit
//! reset.

use crate::config::RecoveryConfig;
use crate::error::ErrorKind;

/// Overall lifecycle state of the tracking system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// System not yet initialized.
    Uninitialized,
    /// Backend selection and startup in progress.
    Initializing,
    /// Active backend reached readiness; no pose yet.
    Ready,
    /// Tracking successfully.
    Tracking,
    /// Lost tracking, counting consecutive loss events.
    Lost,
    /// Escalated loss: a relocalization request has been issued.
    Relocalizing,
    /// Unrecoverable; requires explicit reset.
    Failed,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

impl TrackingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Tracking => "tracking",
            Self::Lost => "lost",
            Self::Relocalizing => "relocalizing",
            Self::Failed => "failed",
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// `initialize()` was called.
    InitializeRequested,
    /// The active backend reached Ready (native) or produced its first
    /// successful response (remote).
    BackendReady,
    /// A frame produced a usable pose.
    PoseTracked,
    /// A frame or response reported tracking loss.
    TrackingLostReported,
    /// A relocalization attempt succeeded.
    RelocalizationSucceeded,
    /// A relocalization attempt failed.
    RelocalizationFailed,
    /// Unrecoverable condition: exhausted fallback, out of memory, or fatal
    /// configuration error.
    FatalError,
    /// Explicit external reset; the only exit from `Failed`.
    ResetRequested,
}

/// Side effects the caller must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum StateAction {
    /// Issue a relocalization request to the active pose source.
    IssueRelocalization,
    /// Publish a non-fatal error event.
    EmitWarning(ErrorKind, String),
}

/// Result of feeding one event to the machine.
#[derive(Debug, Default)]
pub struct Transition {
    /// New state, if the event changed it.
    pub changed: Option<TrackingState>,
    pub actions: Vec<StateAction>,
}

/// The tracking lifecycle machine with loss-escalation and bounded
/// relocalization retry.
pub struct TrackingStateMachine {
    state: TrackingState,
    config: RecoveryConfig,
    consecutive_losses: u32,
    relocalization_attempts: u32,
}

impl TrackingStateMachine {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            state: TrackingState::Uninitialized,
            config,
            consecutive_losses: 0,
            relocalization_attempts: 0,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    fn transition_to(&mut self, next: TrackingState, out: &mut Transition) {
        if self.state != next {
            tracing::info!(from = self.state.as_str(), to = next.as_str(), "state transition");
            self.state = next;
            out.changed = Some(next);
        }
    }

    /// Feed one event through the machine.
    pub fn handle(&mut self, event: StateEvent) -> Transition {
        use StateEvent::*;
        use TrackingState::*;

        let mut out = Transition::default();

        // Failed is terminal: only an explicit reset leaves it.
        if self.state == Failed && event != ResetRequested {
            return out;
        }

        match event {
            InitializeRequested => {
                if self.state == Uninitialized {
                    self.transition_to(Initializing, &mut out);
                }
            }
            BackendReady => {
                if self.state == Initializing {
                    self.transition_to(Ready, &mut out);
                }
            }
            PoseTracked => {
                self.consecutive_losses = 0;
                match self.state {
                    Ready | Tracking | Lost => self.transition_to(Tracking, &mut out),
                    // A usable pose during relocalization is a recovery.
                    Relocalizing => {
                        self.relocalization_attempts = 0;
                        self.transition_to(Tracking, &mut out);
                    }
                    _ => {}
                }
            }
            TrackingLostReported => match self.state {
                Ready | Tracking => {
                    self.consecutive_losses = 1;
                    self.transition_to(Lost, &mut out);
                }
                Lost => {
                    self.consecutive_losses += 1;
                    if self.consecutive_losses >= self.config.loss_escalation_threshold {
                        self.consecutive_losses = 0;
                        self.relocalization_attempts = 0;
                        self.transition_to(Relocalizing, &mut out);
                        out.actions.push(StateAction::IssueRelocalization);
                    }
                }
                _ => {}
            },
            RelocalizationSucceeded => {
                if self.state == Relocalizing {
                    self.relocalization_attempts = 0;
                    self.consecutive_losses = 0;
                    self.transition_to(Tracking, &mut out);
                }
            }
            RelocalizationFailed => {
                if self.state == Relocalizing {
                    self.relocalization_attempts += 1;
                    if self.relocalization_attempts >= self.config.max_relocalization_attempts {
                        // Escalation is a warning, not a state-machine failure,
                        // to avoid oscillating into Failed.
                        out.actions.push(StateAction::EmitWarning(
                            ErrorKind::RelocalizationFailed,
                            format!(
                                "relocalization failed after {} attempts",
                                self.relocalization_attempts
                            ),
                        ));
                        self.relocalization_attempts = 0;
                        self.transition_to(Lost, &mut out);
                    }
                }
            }
            FatalError => self.transition_to(Failed, &mut out),
            ResetRequested => {
                self.consecutive_losses = 0;
                self.relocalization_attempts = 0;
                self.transition_to(Uninitialized, &mut out);
            }
        }
        out
    }
}
