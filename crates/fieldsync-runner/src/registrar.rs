use std::sync::{Arc, Mutex};

use fieldsync_platform::{Registration, SyncError, SyncScheduler};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    /// Nothing requested yet.
    Idle,
    Registered,
    Coalesced,
    /// The platform has no deferred sync at all.
    Unsupported,
    /// Supported, but no worker is active yet to receive the event.
    Deferred,
}

impl RegistrationState {
    /// True when the page cannot count on a wake-up and must drain itself.
    pub fn needs_fallback(self) -> bool {
        matches!(self, RegistrationState::Unsupported | RegistrationState::Deferred)
    }
}

/// Registers interest in the evidence sync tag. Best effort: failures are
/// logged and remembered, never returned.
pub struct SyncRegistrar {
    scheduler: Arc<dyn SyncScheduler>,
    tag: String,
    state: Mutex<RegistrationState>,
}

impl SyncRegistrar {
    pub fn new(scheduler: Arc<dyn SyncScheduler>, tag: impl Into<String>) -> Self {
        Self {
            scheduler,
            tag: tag.into(),
            state: Mutex::new(RegistrationState::Idle),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn state(&self) -> RegistrationState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn request(&self) -> RegistrationState {
        let state = match self.scheduler.register(&self.tag) {
            Ok(Registration::Registered) => {
                debug!(tag = %self.tag, "requested background sync");
                RegistrationState::Registered
            }
            Ok(Registration::Coalesced) => RegistrationState::Coalesced,
            Err(SyncError::RegistrationUnsupported) => {
                warn!(tag = %self.tag, "background sync unsupported; relying on opportunistic sync");
                RegistrationState::Unsupported
            }
            Err(SyncError::NoActiveWorker) => {
                warn!(tag = %self.tag, "no active worker for background sync; relying on opportunistic sync");
                RegistrationState::Deferred
            }
        };
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_platform::BackgroundSync;

    struct Scheduler(BackgroundSync);

    impl SyncScheduler for Scheduler {
        fn register(&self, tag: &str) -> Result<Registration, SyncError> {
            self.0.register(tag)
        }
    }

    #[test]
    fn repeated_requests_coalesce() {
        let reg = SyncRegistrar::new(Arc::new(Scheduler(BackgroundSync::new(true))), "t");
        assert_eq!(reg.state(), RegistrationState::Idle);
        assert_eq!(reg.request(), RegistrationState::Registered);
        assert_eq!(reg.request(), RegistrationState::Coalesced);
        assert!(!reg.state().needs_fallback());
    }

    #[test]
    fn unsupported_platform_is_absorbed() {
        let reg = SyncRegistrar::new(Arc::new(Scheduler(BackgroundSync::new(false))), "t");
        assert_eq!(reg.request(), RegistrationState::Unsupported);
        assert!(reg.state().needs_fallback());
    }
}
