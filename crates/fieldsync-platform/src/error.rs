use fieldsync_core::ClientId;
use thiserror::Error;

use crate::WorkerVersion;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// The page closed between enumeration and delivery.
    #[error("client {0} is gone")]
    ClientGone(ClientId),
    #[error("background worker is not running")]
    WorkerUnavailable,
    #[error("no active background worker")]
    NoActiveWorker,
    #[error("unknown worker version {0}")]
    UnknownWorker(WorkerVersion),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The platform has no deferred sync; callers fall back to opportunistic
    /// syncing.
    #[error("background sync is not supported on this platform")]
    RegistrationUnsupported,
    #[error("background sync needs an active worker")]
    NoActiveWorker,
}
