use thiserror::Error;

use crate::RecordStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RecordStatus,
    pub to: RecordStatus,
}

/// Lifecycle edges:
/// - pending -> uploading
/// - uploading -> synced | error
/// - error -> uploading
///
/// A patch that keeps the current status is always accepted.
pub fn can_transition(from: RecordStatus, to: RecordStatus) -> bool {
    use RecordStatus::*;
    from == to
        || matches!(
            (from, to),
            (Pending, Uploading) | (Uploading, Synced) | (Uploading, Error) | (Error, Uploading)
        )
}

pub fn check_transition(from: RecordStatus, to: RecordStatus) -> Result<(), TransitionError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Caller-initiated abandonment is only allowed before or between attempts.
pub fn is_cancellable(status: RecordStatus) -> bool {
    matches!(status, RecordStatus::Pending | RecordStatus::Error)
}

/// Records the drain loop should pick up.
pub fn needs_upload(status: RecordStatus) -> bool {
    matches!(status, RecordStatus::Pending | RecordStatus::Error)
}
