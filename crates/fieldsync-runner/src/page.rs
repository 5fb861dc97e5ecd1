use std::sync::Arc;

use anyhow::Result;
use fieldsync_core::{CaptureInput, ClientId, ClientMessage, EvidenceRecord};
use fieldsync_platform::{ClientConnection, Platform};
use fieldsync_queue::{DrainReport, EvidenceQueue, SyncOrchestrator, TokenProvider, Uploader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{RegistrationState, SyncRegistrar};

/// Page events that may trigger an opportunistic drain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Focus,
    Visible,
    Online,
}

/// One open foreground page: its queue view, drain loop and sync registration.
pub struct Page<U, T> {
    inner: Arc<PageInner<U, T>>,
}

impl<U, T> Clone for Page<U, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct PageInner<U, T> {
    id: ClientId,
    platform: Platform,
    orchestrator: SyncOrchestrator<U, T>,
    registrar: SyncRegistrar,
    always_fallback: bool,
}

impl<U, T> Page<U, T>
where
    U: Uploader + 'static,
    T: TokenProvider + 'static,
{
    /// Open the page on the platform and publish the current queue. If work
    /// is left over from an earlier session, ask for a sync straight away.
    pub async fn mount(
        platform: &Platform,
        url: impl Into<String>,
        orchestrator: SyncOrchestrator<U, T>,
        tag: &str,
        always_fallback: bool,
    ) -> Result<(Self, ClientConnection)> {
        let conn = platform.open_page(url).await;
        let registrar = SyncRegistrar::new(Arc::new(platform.clone()), tag);
        let page = Self {
            inner: Arc::new(PageInner {
                id: conn.id.clone(),
                platform: platform.clone(),
                orchestrator,
                registrar,
                always_fallback,
            }),
        };
        let snapshot = page.queue().refresh().await?;
        if snapshot.outstanding() > 0 {
            page.inner.registrar.request();
        }
        debug!(page = %page.id(), records = snapshot.records.len(), "page mounted");
        Ok((page, conn))
    }

    pub fn id(&self) -> &ClientId {
        &self.inner.id
    }

    pub fn queue(&self) -> &EvidenceQueue {
        self.inner.orchestrator.queue()
    }

    pub fn registration(&self) -> RegistrationState {
        self.inner.registrar.state()
    }

    pub fn request_sync(&self) -> RegistrationState {
        self.inner.registrar.request()
    }

    /// Queue a capture, then ask the platform to wake us when online.
    pub async fn capture(&self, input: CaptureInput) -> Result<EvidenceRecord> {
        let record = self.queue().add(input).await?;
        self.request_sync();
        Ok(record)
    }

    pub async fn handle_message(&self, message: ClientMessage) -> Result<DrainReport> {
        match message {
            ClientMessage::SyncEvidenceQueue => {
                self.queue().refresh().await?;
                Ok(self.inner.orchestrator.drain().await?)
            }
        }
    }

    /// Drain only when the page cannot rely on a wake-up (or is configured to
    /// always drain); otherwise just refresh the view.
    pub async fn on_trigger(&self, trigger: Trigger) -> Result<Option<DrainReport>> {
        let fallback = self.inner.always_fallback || self.registration().needs_fallback();
        if !fallback || !self.inner.platform.is_online() {
            self.queue().refresh().await?;
            return Ok(None);
        }
        debug!(page = %self.id(), ?trigger, "opportunistic drain");
        Ok(Some(self.inner.orchestrator.drain().await?))
    }

    pub async fn on_focus(&self) -> Result<Option<DrainReport>> {
        self.on_trigger(Trigger::Focus).await
    }

    pub async fn on_visibility_change(&self, visible: bool) -> Result<Option<DrainReport>> {
        if !visible {
            return Ok(None);
        }
        self.on_trigger(Trigger::Visible).await
    }

    pub async fn on_online(&self) -> Result<Option<DrainReport>> {
        self.on_trigger(Trigger::Online).await
    }

    /// Serve worker messages until the page's inbox closes.
    pub async fn run(self, mut inbox: mpsc::Receiver<ClientMessage>) {
        while let Some(message) = inbox.recv().await {
            let kind = message.kind();
            match self.handle_message(message).await {
                Ok(report) => debug!(page = %self.id(), kind, synced = report.synced, "handled worker message"),
                Err(e) => warn!(page = %self.id(), kind, error = %e, "worker message failed"),
            }
        }
        info!(page = %self.id(), "page inbox closed");
    }

    pub async fn close(&self) -> Result<bool> {
        Ok(self.inner.platform.close_page(&self.inner.id).await?)
    }
}
