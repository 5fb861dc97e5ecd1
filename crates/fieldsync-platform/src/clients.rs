use std::collections::HashMap;
use std::sync::Arc;

use fieldsync_core::{ClientId, ClientMessage};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::{PlatformError, WorkerVersion};

pub const INBOX_CAPACITY: usize = 32;

/// Registry of open pages. Always queried at the moment of use; nothing
/// outside this type keeps a list of pages.
#[derive(Clone, Default)]
pub struct Clients {
    inner: Arc<RwLock<ClientTable>>,
}

#[derive(Default)]
struct ClientTable {
    entries: HashMap<ClientId, ClientEntry>,
    /// Worker that controls newly opened pages.
    active: Option<WorkerVersion>,
}

struct ClientEntry {
    url: String,
    tx: mpsc::Sender<ClientMessage>,
    controller: Option<WorkerVersion>,
}

/// Addressable page, as returned by `match_all`.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub url: String,
    pub controller: Option<WorkerVersion>,
    tx: mpsc::Sender<ClientMessage>,
}

impl ClientHandle {
    pub async fn post_message(&self, message: ClientMessage) -> Result<(), PlatformError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| PlatformError::ClientGone(self.id.clone()))
    }
}

/// The page side of an open client.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ClientId,
    pub inbox: mpsc::Receiver<ClientMessage>,
}

impl Clients {
    pub async fn open(&self, url: impl Into<String>) -> ClientConnection {
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let id = ClientId::new();
        let mut table = self.inner.write().await;
        let controller = table.active;
        table.entries.insert(
            id.clone(),
            ClientEntry {
                url: url.into(),
                tx,
                controller,
            },
        );
        debug!(client = %id, ?controller, "page opened");
        ClientConnection { id, inbox }
    }

    pub async fn close(&self, id: &ClientId) -> bool {
        let removed = self.inner.write().await.entries.remove(id).is_some();
        if removed {
            debug!(client = %id, "page closed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Pages controlled by `version`, plus uncontrolled ones when asked.
    pub async fn match_all(&self, version: WorkerVersion, include_uncontrolled: bool) -> Vec<ClientHandle> {
        let table = self.inner.read().await;
        let mut out: Vec<ClientHandle> = table
            .entries
            .iter()
            .filter(|(_, e)| e.controller == Some(version) || (include_uncontrolled && e.controller.is_none()))
            .map(|(id, e)| ClientHandle {
                id: id.clone(),
                url: e.url.clone(),
                controller: e.controller,
                tx: e.tx.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Take control of every open page now. Returns how many changed hands.
    pub async fn claim(&self, version: WorkerVersion) -> usize {
        let mut table = self.inner.write().await;
        let mut claimed = 0;
        for entry in table.entries.values_mut() {
            if entry.controller != Some(version) {
                entry.controller = Some(version);
                claimed += 1;
            }
        }
        claimed
    }

    pub async fn controlled_by(&self, version: WorkerVersion) -> usize {
        let table = self.inner.read().await;
        table.entries.values().filter(|e| e.controller == Some(version)).count()
    }

    pub(crate) async fn set_active(&self, version: Option<WorkerVersion>) {
        self.inner.write().await.active = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_opened_before_activation_are_uncontrolled_until_claimed() {
        let clients = Clients::default();
        let _a = clients.open("/jobs/1").await;
        assert!(clients.match_all(1, false).await.is_empty());
        assert_eq!(clients.match_all(1, true).await.len(), 1);

        clients.set_active(Some(1)).await;
        let _b = clients.open("/jobs/2").await;
        assert_eq!(clients.controlled_by(1).await, 1);

        assert_eq!(clients.claim(1).await, 1);
        assert_eq!(clients.match_all(1, false).await.len(), 2);
    }

    #[tokio::test]
    async fn post_to_dropped_page_reports_gone() {
        let clients = Clients::default();
        clients.set_active(Some(1)).await;
        let conn = clients.open("/jobs/1").await;
        let handles = clients.match_all(1, false).await;
        drop(conn);
        let err = handles[0].post_message(ClientMessage::SyncEvidenceQueue).await.unwrap_err();
        assert!(matches!(err, PlatformError::ClientGone(_)));
    }

    #[tokio::test]
    async fn close_removes_from_enumeration() {
        let clients = Clients::default();
        clients.set_active(Some(1)).await;
        let conn = clients.open("/").await;
        assert!(clients.close(&conn.id).await);
        assert!(!clients.close(&conn.id).await);
        assert!(clients.is_empty().await);
    }
}
