use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::SyncError;

/// Attempts per registration before the platform gives up on a tag.
pub const MAX_SYNC_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// The tag already had a pending interest; nothing new was queued.
    Coalesced,
}

/// Page-facing half of the deferred sync API.
pub trait SyncScheduler: Send + Sync {
    fn register(&self, tag: &str) -> Result<Registration, SyncError>;
}

/// Tag bookkeeping for deferred sync. One entry per tag, so repeated
/// registrations never accumulate.
pub struct BackgroundSync {
    supported: bool,
    tags: Mutex<HashMap<String, TagState>>,
}

#[derive(Debug, Default)]
struct TagState {
    attempts: u32,
    firing: bool,
    /// Registered again while its event was running; fire once more after.
    refire: bool,
}

impl BackgroundSync {
    pub fn new(supported: bool) -> Self {
        Self {
            supported,
            tags: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    fn tags(&self) -> MutexGuard<'_, HashMap<String, TagState>> {
        self.tags.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, tag: &str) -> Result<Registration, SyncError> {
        if !self.supported {
            return Err(SyncError::RegistrationUnsupported);
        }
        let mut tags = self.tags();
        match tags.get_mut(tag) {
            Some(state) => {
                if state.firing {
                    state.refire = true;
                }
                debug!(tag, "sync registration coalesced");
                Ok(Registration::Coalesced)
            }
            None => {
                tags.insert(tag.to_string(), TagState::default());
                debug!(tag, "sync registered");
                Ok(Registration::Registered)
            }
        }
    }

    pub fn pending_tags(&self) -> Vec<String> {
        let mut out: Vec<String> = self.tags().keys().cloned().collect();
        out.sort();
        out
    }

    /// Mark every idle tag as firing. Returns `(tag, last_chance)` pairs.
    pub(crate) fn begin_firing(&self) -> Vec<(String, bool)> {
        let mut tags = self.tags();
        let mut out = vec![];
        for (tag, state) in tags.iter_mut().filter(|(_, s)| !s.firing) {
            state.firing = true;
            out.push((tag.clone(), state.attempts + 1 >= MAX_SYNC_ATTEMPTS));
        }
        out.sort();
        out
    }

    /// Settle one firing. Successful tags are dropped unless re-registered
    /// mid-flight; failed tags stay for the next opportunity until they run
    /// out of attempts.
    pub(crate) fn finish(&self, tag: &str, success: bool) {
        let mut tags = self.tags();
        let Some(state) = tags.get_mut(tag) else {
            return;
        };
        state.firing = false;
        if success {
            if state.refire {
                *state = TagState::default();
            } else {
                tags.remove(tag);
            }
            return;
        }
        state.attempts += 1;
        if state.attempts >= MAX_SYNC_ATTEMPTS {
            warn!(tag, attempts = state.attempts, "giving up on sync registration");
            tags.remove(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_registration_coalesces() {
        let sync = BackgroundSync::new(true);
        assert_eq!(sync.register("t").unwrap(), Registration::Registered);
        assert_eq!(sync.register("t").unwrap(), Registration::Coalesced);
        assert_eq!(sync.pending_tags(), vec!["t".to_string()]);
    }

    #[test]
    fn unsupported_platform_rejects_registration() {
        let sync = BackgroundSync::new(false);
        assert_eq!(sync.register("t").unwrap_err(), SyncError::RegistrationUnsupported);
        assert!(sync.pending_tags().is_empty());
    }

    #[test]
    fn failed_firings_retry_then_give_up() {
        let sync = BackgroundSync::new(true);
        sync.register("t").unwrap();
        for attempt in 1..=MAX_SYNC_ATTEMPTS {
            let firing = sync.begin_firing();
            assert_eq!(firing, vec![("t".to_string(), attempt == MAX_SYNC_ATTEMPTS)]);
            sync.finish("t", false);
        }
        assert!(sync.pending_tags().is_empty());
    }

    #[test]
    fn reregistration_while_firing_fires_again() {
        let sync = BackgroundSync::new(true);
        sync.register("t").unwrap();
        assert_eq!(sync.begin_firing().len(), 1);
        // a firing tag is not handed out twice
        assert!(sync.begin_firing().is_empty());
        sync.register("t").unwrap();
        sync.finish("t", true);
        assert_eq!(sync.pending_tags(), vec!["t".to_string()]);
        sync.begin_firing();
        sync.finish("t", true);
        assert!(sync.pending_tags().is_empty());
    }
}
