use serde::{Deserialize, Serialize};

/// Tag registered with the platform scheduler. One tag means repeated
/// registrations coalesce into a single pending interest.
pub const SYNC_TAG: &str = "conforma-evidence-sync";

/// Message type the worker posts to pages when connectivity returns.
pub const SYNC_EVIDENCE_QUEUE: &str = "SYNC_EVIDENCE_QUEUE";

/// Messages posted from the background worker to a page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "SYNC_EVIDENCE_QUEUE")]
    SyncEvidenceQueue,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::SyncEvidenceQueue => SYNC_EVIDENCE_QUEUE,
        }
    }
}
