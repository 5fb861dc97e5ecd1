use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    dispatch, BackgroundSync, ClientConnection, Clients, PlatformError, Registration, SyncError, SyncEvent,
    SyncScheduler, WorkerEvent,
};
use fieldsync_core::ClientId;

pub type WorkerVersion = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Installed but waiting for the current version's pages to go away.
    Waiting,
    Activated,
    /// Install failed; this version will never run.
    Redundant,
}

/// Result of one sync event dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncDispatch {
    pub tag: String,
    pub outcome: Result<usize, PlatformError>,
}

/// What a worker sees of the platform.
#[derive(Clone)]
pub struct WorkerScope {
    pub version: WorkerVersion,
    clients: Clients,
    skip_waiting: Arc<AtomicBool>,
}

impl WorkerScope {
    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Activate as soon as install finishes, even if an older version still
    /// controls pages.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct WorkerSlot {
    version: WorkerVersion,
    events: mpsc::Sender<WorkerEvent>,
    skip_waiting: Arc<AtomicBool>,
}

#[derive(Default)]
struct Slots {
    installing: Option<WorkerSlot>,
    waiting: Option<WorkerSlot>,
    active: Option<WorkerSlot>,
}

/// Shared handle to the simulated host platform.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<Inner>,
}

struct Inner {
    clients: Clients,
    sync: BackgroundSync,
    slots: Mutex<Slots>,
    online: AtomicBool,
    dispatch_lock: tokio::sync::Mutex<()>,
}

impl Platform {
    pub fn new(supports_background_sync: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                clients: Clients::default(),
                sync: BackgroundSync::new(supports_background_sync),
                slots: Mutex::new(Slots::default()),
                online: AtomicBool::new(false),
                dispatch_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.inner.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn clients(&self) -> &Clients {
        &self.inner.clients
    }

    pub fn background_sync(&self) -> &BackgroundSync {
        &self.inner.sync
    }

    pub fn active_version(&self) -> Option<WorkerVersion> {
        self.slots().active.as_ref().map(|s| s.version)
    }

    pub fn waiting_version(&self) -> Option<WorkerVersion> {
        self.slots().waiting.as_ref().map(|s| s.version)
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub async fn open_page(&self, url: impl Into<String>) -> ClientConnection {
        self.inner.clients.open(url).await
    }

    /// Close a page. If it was the last page held by the active version and a
    /// newer version is waiting, the waiting one takes over.
    pub async fn close_page(&self, id: &ClientId) -> Result<bool, PlatformError> {
        let closed = self.inner.clients.close(id).await;
        let (active, waiting) = {
            let slots = self.slots();
            (slots.active.as_ref().map(|s| s.version), slots.waiting.clone())
        };
        if let (Some(active), Some(waiting)) = (active, waiting) {
            if self.inner.clients.controlled_by(active).await == 0 {
                self.slots().waiting = None;
                self.activate(waiting).await?;
            }
        }
        Ok(closed)
    }

    /// Register a new worker version and hand back the scope it runs with.
    /// The worker must be listening on `events` before `install_worker`.
    pub fn register_worker(&self, version: WorkerVersion, events: mpsc::Sender<WorkerEvent>) -> WorkerScope {
        let skip_waiting = Arc::new(AtomicBool::new(false));
        self.slots().installing = Some(WorkerSlot {
            version,
            events,
            skip_waiting: skip_waiting.clone(),
        });
        WorkerScope {
            version,
            clients: self.inner.clients.clone(),
            skip_waiting,
        }
    }

    /// Run install, then activate when allowed.
    pub async fn install_worker(&self, version: WorkerVersion) -> Result<WorkerState, PlatformError> {
        let installing = self.slots().installing.take();
        let slot = match installing {
            Some(s) if s.version == version => s,
            other => {
                self.slots().installing = other;
                return Err(PlatformError::UnknownWorker(version));
            }
        };

        if let Err(e) = dispatch(&slot.events, |reply| WorkerEvent::Install { reply }).await {
            warn!(version, error = %e, "worker install failed");
            return Ok(WorkerState::Redundant);
        }

        let has_active = self.slots().active.is_some();
        if has_active && !slot.skip_waiting.load(Ordering::SeqCst) {
            info!(version, "worker installed; waiting for existing pages to close");
            self.slots().waiting = Some(slot);
            return Ok(WorkerState::Waiting);
        }
        self.activate(slot).await?;
        Ok(WorkerState::Activated)
    }

    async fn activate(&self, slot: WorkerSlot) -> Result<(), PlatformError> {
        let version = slot.version;
        let previous = self.slots().active.replace(slot.clone());
        if let Some(prev) = previous {
            info!(from = prev.version, to = version, "replacing active worker");
        }
        self.inner.clients.set_active(Some(version)).await;
        dispatch(&slot.events, |reply| WorkerEvent::Activate { reply }).await?;
        info!(version, "worker activated");
        Ok(())
    }

    /// Flip connectivity. Going online fires every pending sync registration.
    pub async fn set_online(&self, online: bool) -> Vec<SyncDispatch> {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        info!(online, "connectivity changed");
        if online && !was {
            self.dispatch_pending_syncs().await
        } else {
            vec![]
        }
    }

    /// Fire pending sync tags at the active worker, one event per tag, each
    /// awaited until the worker reports completion.
    pub async fn dispatch_pending_syncs(&self) -> Vec<SyncDispatch> {
        let _serial = self.inner.dispatch_lock.lock().await;
        if !self.is_online() {
            return vec![];
        }
        let mut out = vec![];
        for (tag, last_chance) in self.inner.sync.begin_firing() {
            let events = self.slots().active.as_ref().map(|s| s.events.clone());
            let outcome = match events {
                Some(events) => {
                    let tag = tag.clone();
                    dispatch(&events, move |reply| {
                        WorkerEvent::Sync(SyncEvent { tag, last_chance, reply })
                    })
                    .await
                }
                None => Err(PlatformError::NoActiveWorker),
            };
            match &outcome {
                Ok(woken) => debug!(tag = %tag, woken, "sync event handled"),
                Err(e) => warn!(tag = %tag, error = %e, "sync event failed; will retry"),
            }
            self.inner.sync.finish(&tag, outcome.is_ok());
            out.push(SyncDispatch { tag, outcome });
        }
        out
    }
}

impl SyncScheduler for Platform {
    fn register(&self, tag: &str) -> Result<Registration, SyncError> {
        if !self.inner.sync.is_supported() {
            return Err(SyncError::RegistrationUnsupported);
        }
        if self.active_version().is_none() {
            return Err(SyncError::NoActiveWorker);
        }
        let registration = self.inner.sync.register(tag)?;
        // Online already: the platform fires on its own schedule.
        if self.is_online() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let platform = self.clone();
                handle.spawn(async move {
                    platform.dispatch_pending_syncs().await;
                });
            }
        }
        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal worker that acknowledges everything and counts sync events.
    fn spawn_ack_worker(platform: &Platform, version: WorkerVersion, skip: bool) -> Arc<std::sync::atomic::AtomicUsize> {
        let (tx, mut rx) = mpsc::channel(8);
        let scope = platform.register_worker(version, tx);
        let syncs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = syncs.clone();
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                match ev {
                    WorkerEvent::Install { reply } => {
                        if skip {
                            scope.skip_waiting();
                        }
                        let _ = reply.send(Ok(()));
                    }
                    WorkerEvent::Activate { reply } => {
                        scope.clients().claim(scope.version).await;
                        let _ = reply.send(Ok(()));
                    }
                    WorkerEvent::Sync(ev) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let _ = ev.reply.send(Ok(0));
                    }
                }
            }
        });
        syncs
    }

    #[tokio::test]
    async fn first_install_activates_and_claims() {
        let platform = Platform::new(true);
        let page = platform.open_page("/").await;
        spawn_ack_worker(&platform, 1, false);
        assert_eq!(platform.install_worker(1).await.unwrap(), WorkerState::Activated);
        assert_eq!(platform.active_version(), Some(1));
        let matched = platform.clients().match_all(1, false).await;
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, page.id);
    }

    #[tokio::test]
    async fn update_without_skip_waiting_waits_for_pages() {
        let platform = Platform::new(true);
        spawn_ack_worker(&platform, 1, false);
        platform.install_worker(1).await.unwrap();
        let page = platform.open_page("/").await;

        spawn_ack_worker(&platform, 2, false);
        assert_eq!(platform.install_worker(2).await.unwrap(), WorkerState::Waiting);
        assert_eq!(platform.active_version(), Some(1));

        platform.close_page(&page.id).await.unwrap();
        assert_eq!(platform.active_version(), Some(2));
        assert_eq!(platform.waiting_version(), None);
    }

    #[tokio::test]
    async fn update_with_skip_waiting_takes_over_immediately() {
        let platform = Platform::new(true);
        spawn_ack_worker(&platform, 1, true);
        platform.install_worker(1).await.unwrap();
        let _page = platform.open_page("/").await;

        spawn_ack_worker(&platform, 2, true);
        assert_eq!(platform.install_worker(2).await.unwrap(), WorkerState::Activated);
        assert_eq!(platform.clients().controlled_by(2).await, 1);
    }

    #[tokio::test]
    async fn install_of_unregistered_version_is_an_error() {
        let platform = Platform::new(true);
        assert_eq!(platform.install_worker(7).await.unwrap_err(), PlatformError::UnknownWorker(7));
    }

    #[tokio::test]
    async fn registration_needs_support_and_active_worker() {
        let unsupported = Platform::new(false);
        assert_eq!(unsupported.register("t").unwrap_err(), SyncError::RegistrationUnsupported);

        let platform = Platform::new(true);
        assert_eq!(platform.register("t").unwrap_err(), SyncError::NoActiveWorker);
    }

    #[tokio::test]
    async fn going_online_fires_each_tag_once() {
        let platform = Platform::new(true);
        let syncs = spawn_ack_worker(&platform, 1, true);
        platform.install_worker(1).await.unwrap();

        platform.register("t").unwrap();
        assert_eq!(platform.register("t").unwrap(), Registration::Coalesced);
        assert!(platform.dispatch_pending_syncs().await.is_empty(), "offline: nothing fires");

        let fired = platform.set_online(true).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].outcome, Ok(0));
        assert_eq!(syncs.load(Ordering::SeqCst), 1);
        assert!(platform.background_sync().pending_tags().is_empty());
    }

    #[tokio::test]
    async fn dead_worker_keeps_tag_for_retry() {
        let platform = Platform::new(true);
        let (tx, rx) = mpsc::channel(8);
        platform.register_worker(1, tx);
        // worker answers install and activate, then dies
        let handle = tokio::spawn(async move {
            let mut rx = rx;
            for _ in 0..2 {
                match rx.recv().await {
                    Some(WorkerEvent::Install { reply }) | Some(WorkerEvent::Activate { reply }) => {
                        let _ = reply.send(Ok(()));
                    }
                    _ => {}
                }
            }
        });
        platform.install_worker(1).await.unwrap();
        handle.await.unwrap();

        platform.register("t").unwrap();
        let fired = platform.set_online(true).await;
        assert_eq!(fired[0].outcome, Err(PlatformError::WorkerUnavailable));
        assert_eq!(platform.background_sync().pending_tags(), vec!["t".to_string()]);
    }
}
