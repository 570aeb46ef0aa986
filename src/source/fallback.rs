//! Backend selection and fallback.
//!
//! Picks which pose source(s) to run based on the caller's preference and
//! the platform, bounds each initialization attempt by the configured
//! timeout, and falls back to the alternate implementation once before
//! declaring a fatal initialization failure.

use crate::config::{BackendPreference, Platform};
use crate::error::{Result, TrackingError};
use crate::source::{BackendKind, PoseSource};

/// Starts one backend and brings it to Ready within the deadline.
///
/// The implementation owns the platform specifics: loading the native
/// library, dialing the remote service, and waiting (up to `timeout_s`, the
/// only hard blocking wait in the system) for readiness.
pub trait BackendProvider {
    fn start(&mut self, kind: BackendKind, timeout_s: f64) -> Result<PoseSource>;
}

/// Result of backend selection.
pub struct Selection {
    pub primary: PoseSource,
    /// Second concurrent source in hybrid mode when both came up.
    pub secondary: Option<PoseSource>,
}

impl Selection {
    /// Identity of the active (primary) implementation, published so fusion
    /// and state logic can attribute poses.
    pub fn active(&self) -> BackendKind {
        self.primary.kind()
    }
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("primary", &self.primary.kind().as_str())
            .field("secondary", &self.secondary.as_ref().map(|s| s.kind().as_str()))
            .finish()
    }
}

/// Chooses and initializes pose sources per preference and platform.
pub struct FallbackController {
    preference: BackendPreference,
    platform: Platform,
    timeout_s: f64,
}

impl FallbackController {
    pub fn new(preference: BackendPreference, platform: Platform, timeout_s: f64) -> Self {
        Self {
            preference,
            platform,
            timeout_s,
        }
    }

    /// Attempt order for the non-hybrid preferences.
    fn order(&self) -> [BackendKind; 2] {
        match self.preference {
            BackendPreference::NativePreferred => [BackendKind::Native, BackendKind::Remote],
            BackendPreference::RemotePreferred => [BackendKind::Remote, BackendKind::Native],
            // Mobile platforms carry the native library; everything else
            // leans on the remote service.
            BackendPreference::Auto | BackendPreference::Hybrid => match self.platform {
                Platform::Mobile => [BackendKind::Native, BackendKind::Remote],
                Platform::Desktop => [BackendKind::Remote, BackendKind::Native],
            },
        }
    }

    /// Run the selection policy. Returns the live source(s) or a fatal
    /// initialization error once every option is exhausted.
    pub fn initialize(&self, provider: &mut dyn BackendProvider) -> Result<Selection> {
        if self.preference == BackendPreference::Hybrid {
            return self.initialize_hybrid(provider);
        }

        let [first, second] = self.order();
        match provider.start(first, self.timeout_s) {
            Ok(source) => {
                tracing::info!(backend = first.as_str(), "pose backend ready");
                return Ok(Selection {
                    primary: source,
                    secondary: None,
                });
            }
            Err(err) => {
                // Informational fallback notice, not an error surfaced to the
                // caller: the alternate may still succeed.
                tracing::info!(
                    preferred = first.as_str(),
                    fallback = second.as_str(),
                    reason = %err,
                    "preferred backend failed, falling back"
                );
            }
        }

        match provider.start(second, self.timeout_s) {
            Ok(source) => {
                tracing::info!(backend = second.as_str(), "fallback pose backend ready");
                Ok(Selection {
                    primary: source,
                    secondary: None,
                })
            }
            Err(err) => Err(self.exhausted(first, err)),
        }
    }

    /// Hybrid mode: run both; if exactly one succeeds it becomes the sole
    /// active source.
    fn initialize_hybrid(&self, provider: &mut dyn BackendProvider) -> Result<Selection> {
        let [first, second] = self.order();
        let a = provider.start(first, self.timeout_s);
        let b = provider.start(second, self.timeout_s);
        match (a, b) {
            (Ok(primary), Ok(secondary)) => {
                tracing::info!(
                    primary = first.as_str(),
                    secondary = second.as_str(),
                    "hybrid mode running both backends"
                );
                Ok(Selection {
                    primary,
                    secondary: Some(secondary),
                })
            }
            (Ok(primary), Err(err)) => {
                tracing::info!(
                    survivor = first.as_str(),
                    reason = %err,
                    "hybrid mode degraded to single backend"
                );
                Ok(Selection {
                    primary,
                    secondary: None,
                })
            }
            (Err(err), Ok(primary)) => {
                tracing::info!(
                    survivor = second.as_str(),
                    reason = %err,
                    "hybrid mode degraded to single backend"
                );
                Ok(Selection {
                    primary,
                    secondary: None,
                })
            }
            (Err(_), Err(err)) => Err(self.exhausted(first, err)),
        }
    }

    fn exhausted(&self, preferred: BackendKind, last: TrackingError) -> TrackingError {
        let message = format!("all pose backends failed to initialize (last: {last})");
        tracing::error!(%message, "backend selection exhausted");
        match preferred {
            BackendKind::Native => TrackingError::NativeInitialization(message),
            BackendKind::Remote => TrackingError::RemoteInitialization(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::source::remote::{RemoteTracker, RemoteTransport, TrackingRequest, TrackingResponse};

    struct NullTransport;

    impl RemoteTransport for NullTransport {
        fn send(&mut self, _request: &TrackingRequest) -> crate::error::Result<()> {
            Ok(())
        }
        fn poll(&mut self) -> Option<TrackingResponse> {
            None
        }
    }

    /// Provider where each backend either comes up as a remote-backed stub
    /// or fails; records the attempt order.
    struct ScriptedProvider {
        native_ok: bool,
        remote_ok: bool,
        attempts: Vec<BackendKind>,
    }

    impl ScriptedProvider {
        fn new(native_ok: bool, remote_ok: bool) -> Self {
            Self {
                native_ok,
                remote_ok,
                attempts: Vec::new(),
            }
        }
    }

    impl BackendProvider for ScriptedProvider {
        fn start(&mut self, kind: BackendKind, _timeout_s: f64) -> crate::error::Result<PoseSource> {
            self.attempts.push(kind);
            let ok = match kind {
                BackendKind::Native => self.native_ok,
                BackendKind::Remote => self.remote_ok,
            };
            if !ok {
                return Err(match kind {
                    BackendKind::Native => {
                        TrackingError::NativeInitialization("create returned null".into())
                    }
                    BackendKind::Remote => {
                        TrackingError::RemoteInitialization("no response within deadline".into())
                    }
                });
            }
            // The stub source is remote-backed regardless of kind; selection
            // logic only looks at success/failure here.
            Ok(PoseSource::Remote(RemoteTracker::new(Box::new(
                NullTransport,
            ))))
        }
    }

    fn controller(preference: BackendPreference, platform: Platform) -> FallbackController {
        FallbackController::new(preference, platform, 5.0)
    }

    #[test]
    fn native_preferred_falls_back_to_remote_on_null_create() {
        let mut provider = ScriptedProvider::new(false, true);
        let selection = controller(BackendPreference::NativePreferred, Platform::Mobile)
            .initialize(&mut provider)
            .unwrap();
        assert_eq!(
            provider.attempts,
            vec![BackendKind::Native, BackendKind::Remote]
        );
        assert!(selection.secondary.is_none());
    }

    #[test]
    fn auto_on_mobile_tries_native_first() {
        let mut provider = ScriptedProvider::new(true, true);
        controller(BackendPreference::Auto, Platform::Mobile)
            .initialize(&mut provider)
            .unwrap();
        assert_eq!(provider.attempts, vec![BackendKind::Native]);
    }

    #[test]
    fn auto_on_desktop_tries_remote_first() {
        let mut provider = ScriptedProvider::new(true, true);
        controller(BackendPreference::Auto, Platform::Desktop)
            .initialize(&mut provider)
            .unwrap();
        assert_eq!(provider.attempts, vec![BackendKind::Remote]);
    }

    #[test]
    fn both_failing_is_fatal_with_preferred_kind() {
        let mut provider = ScriptedProvider::new(false, false);
        let err = controller(BackendPreference::NativePreferred, Platform::Mobile)
            .initialize(&mut provider)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NativeInitializationFailed);
        assert_eq!(provider.attempts.len(), 2);

        let mut provider = ScriptedProvider::new(false, false);
        let err = controller(BackendPreference::RemotePreferred, Platform::Desktop)
            .initialize(&mut provider)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteInitializationFailed);
    }

    #[test]
    fn hybrid_keeps_both_when_both_succeed() {
        let mut provider = ScriptedProvider::new(true, true);
        let selection = controller(BackendPreference::Hybrid, Platform::Mobile)
            .initialize(&mut provider)
            .unwrap();
        assert!(selection.secondary.is_some());
        assert_eq!(provider.attempts.len(), 2);
    }

    #[test]
    fn selection_debug_reports_backend_kinds() {
        let mut provider = ScriptedProvider::new(true, true);
        let selection = controller(BackendPreference::Hybrid, Platform::Desktop)
            .initialize(&mut provider)
            .unwrap();
        let rendered = format!("{selection:?}");
        assert!(rendered.contains("remote"), "got {rendered}");
    }

    #[test]
    fn hybrid_survivor_becomes_sole_active_source() {
        let mut provider = ScriptedProvider::new(false, true);
        let selection = controller(BackendPreference::Hybrid, Platform::Mobile)
            .initialize(&mut provider)
            .unwrap();
        assert!(selection.secondary.is_none());
        assert_eq!(selection.active(), BackendKind::Remote);
    }
}
