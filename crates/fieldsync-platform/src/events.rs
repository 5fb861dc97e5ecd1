use tokio::sync::{mpsc, oneshot};

use crate::PlatformError;

/// Completion handle for an event. The platform treats the event as handled
/// only once the worker replies.
pub type EventReply<T> = oneshot::Sender<Result<T, PlatformError>>;

#[derive(Debug)]
pub enum WorkerEvent {
    Install { reply: EventReply<()> },
    Activate { reply: EventReply<()> },
    Sync(SyncEvent),
}

#[derive(Debug)]
pub struct SyncEvent {
    pub tag: String,
    /// Set on the final attempt before the platform gives up on the tag.
    pub last_chance: bool,
    /// Replies with the number of pages woken.
    pub reply: EventReply<usize>,
}

/// Send an event to a worker and wait for its reply.
pub async fn dispatch<T>(
    events: &mpsc::Sender<WorkerEvent>,
    make: impl FnOnce(EventReply<T>) -> WorkerEvent,
) -> Result<T, PlatformError> {
    let (reply, rx) = oneshot::channel();
    events
        .send(make(reply))
        .await
        .map_err(|_| PlatformError::WorkerUnavailable)?;
    rx.await.map_err(|_| PlatformError::WorkerUnavailable)?
}
