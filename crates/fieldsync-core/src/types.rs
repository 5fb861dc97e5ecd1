use serde::{Deserialize, Serialize};

use crate::{content_hash, ids::*, model::*, time::EpochMs};

/// One captured file waiting for (or done with) upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: RecordId,
    pub job_id: String,
    pub milestone_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub content_hash: String,
    pub created_at: EpochMs,
    pub status: RecordStatus,
    /// Raw payload. Not part of the serialized summary.
    #[serde(skip)]
    pub file: Vec<u8>,
    pub last_error: Option<String>,
    pub remote_url: Option<String>,
    pub uploaded_at: Option<EpochMs>,
}

impl EvidenceRecord {
    pub fn size_bytes(&self) -> usize {
        self.file.len()
    }
}

/// What the capture action hands to the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureInput {
    pub job_id: String,
    pub milestone_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub content_hash: String,
    pub file: Vec<u8>,
}

impl CaptureInput {
    pub fn from_bytes(
        job_id: impl Into<String>,
        milestone_id: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        file: Vec<u8>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            milestone_id: milestone_id.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            content_hash: content_hash(&file),
            file,
        }
    }

    /// Materialize the record a store persists for this input.
    pub fn into_record(self, id: RecordId, created_at: EpochMs) -> EvidenceRecord {
        EvidenceRecord {
            id,
            job_id: self.job_id,
            milestone_id: self.milestone_id,
            file_name: self.file_name,
            mime_type: self.mime_type,
            content_hash: self.content_hash,
            created_at,
            status: RecordStatus::Pending,
            file: self.file,
            last_error: None,
            remote_url: None,
            uploaded_at: None,
        }
    }
}

/// Partial update of the lifecycle fields. Business fields are not
/// representable here, so a patch can never rewrite them.
///
/// The nested options distinguish "leave alone" (`None`) from "clear"
/// (`Some(None)`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub status: Option<RecordStatus>,
    pub last_error: Option<Option<String>>,
    pub remote_url: Option<Option<String>>,
    pub uploaded_at: Option<Option<EpochMs>>,
}

impl RecordPatch {
    pub fn status(status: RecordStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn uploading() -> Self {
        Self::status(RecordStatus::Uploading)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(RecordStatus::Error),
            last_error: Some(Some(message.into())),
            ..Self::default()
        }
    }

    pub fn synced(remote_url: impl Into<String>, uploaded_at: EpochMs) -> Self {
        Self {
            status: Some(RecordStatus::Synced),
            last_error: Some(None),
            remote_url: Some(Some(remote_url.into())),
            uploaded_at: Some(Some(uploaded_at)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, record: &mut EvidenceRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(v) = &self.last_error {
            record.last_error = v.clone();
        }
        if let Some(v) = &self.remote_url {
            record.remote_url = v.clone();
        }
        if let Some(v) = self.uploaded_at {
            record.uploaded_at = v;
        }
    }
}

/// Result of merging a patch into the persisted record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied(EvidenceRecord),
    /// Record was removed concurrently; the stale update was dropped.
    Missing,
    /// Status change is not an edge of the lifecycle; nothing was written.
    Rejected { from: RecordStatus, to: RecordStatus },
}

impl PatchOutcome {
    pub fn applied(&self) -> Option<&EvidenceRecord> {
        match self {
            PatchOutcome::Applied(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, PatchOutcome::Applied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EvidenceRecord {
        CaptureInput::from_bytes("j1", "m1", "a.jpg", "image/jpeg", b"abc".to_vec())
            .into_record(RecordId::from_str("e1"), 10)
    }

    #[test]
    fn empty_patch_changes_nothing() {
        let mut r = record();
        let before = r.clone();
        let patch = RecordPatch::default();
        assert!(patch.is_empty());
        patch.apply_to(&mut r);
        assert_eq!(r, before);
    }

    #[test]
    fn synced_patch_clears_error_and_sets_receipt() {
        let mut r = record();
        RecordPatch::failed("boom").apply_to(&mut r);
        assert_eq!(r.last_error.as_deref(), Some("boom"));
        RecordPatch::synced("https://x/e1", 42).apply_to(&mut r);
        assert_eq!(r.status, RecordStatus::Synced);
        assert_eq!(r.last_error, None);
        assert_eq!(r.remote_url.as_deref(), Some("https://x/e1"));
        assert_eq!(r.uploaded_at, Some(42));
        assert_eq!(r.job_id, "j1");
    }
}
