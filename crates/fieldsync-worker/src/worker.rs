use fieldsync_core::{ClientMessage, SYNC_TAG};
use fieldsync_platform::{Platform, PlatformError, WorkerEvent, WorkerScope, WorkerState, WorkerVersion};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 16;

/// Long-lived background context. It owns no queue state: on a matching sync
/// event it wakes every page it controls and lets the pages do the uploads.
pub struct BackgroundWorker {
    scope: WorkerScope,
    sync_tag: String,
}

/// A running worker task.
pub struct WorkerHandle {
    pub version: WorkerVersion,
    pub state: WorkerState,
    pub task: JoinHandle<()>,
}

impl BackgroundWorker {
    pub fn new(scope: WorkerScope) -> Self {
        Self {
            scope,
            sync_tag: SYNC_TAG.to_string(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.sync_tag = tag.into();
        self
    }

    /// Register, spawn and install a worker version on `platform`.
    pub async fn install(platform: &Platform, version: WorkerVersion, tag: &str) -> Result<WorkerHandle, PlatformError> {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let scope = platform.register_worker(version, tx);
        let worker = BackgroundWorker::new(scope).with_tag(tag);
        let task = tokio::spawn(worker.run(rx));
        let state = platform.install_worker(version).await?;
        Ok(WorkerHandle { version, state, task })
    }

    /// Event loop; returns when the platform drops the event channel.
    pub async fn run(self, mut events: mpsc::Receiver<WorkerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Install { reply } => {
                    let _ = reply.send(self.on_install());
                }
                WorkerEvent::Activate { reply } => {
                    let _ = reply.send(self.on_activate().await);
                }
                WorkerEvent::Sync(ev) => {
                    let result = self.on_sync(&ev.tag, ev.last_chance).await;
                    let _ = ev.reply.send(result);
                }
            }
        }
        debug!(version = self.scope.version, "worker event channel closed");
    }

    fn on_install(&self) -> Result<(), PlatformError> {
        // a freshly deployed version takes over without waiting for old pages
        self.scope.skip_waiting();
        info!(version = self.scope.version, "worker installed");
        Ok(())
    }

    async fn on_activate(&self) -> Result<(), PlatformError> {
        let claimed = self.scope.clients().claim(self.scope.version).await;
        info!(version = self.scope.version, claimed, "worker claimed open pages");
        Ok(())
    }

    /// Post one wake-up to every page under control and wait for all posts.
    /// Returns how many pages received it; zero pages is not an error.
    pub async fn on_sync(&self, tag: &str, last_chance: bool) -> Result<usize, PlatformError> {
        if tag != self.sync_tag {
            debug!(tag, "ignoring sync event for unknown tag");
            return Ok(0);
        }
        let pages = self.scope.clients().match_all(self.scope.version, false).await;
        let mut posts = JoinSet::new();
        for page in pages {
            posts.spawn(async move { page.post_message(ClientMessage::SyncEvidenceQueue).await });
        }

        let mut delivered = 0;
        while let Some(joined) = posts.join_next().await {
            match joined {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(PlatformError::ClientGone(id))) => {
                    // dropped without closing; forget it
                    debug!(client = %id, "skipping gone page during wake-up");
                    self.scope.clients().close(&id).await;
                }
                Ok(Err(e)) => debug!(error = %e, "skipping page during wake-up"),
                Err(e) => warn!(error = %e, "wake-up post task failed"),
            }
        }
        info!(tag, delivered, last_chance, "woke pages for evidence sync");
        Ok(delivered)
    }
}
