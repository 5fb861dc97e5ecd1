use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use fieldsync_core::{
    next_created_at, now_ms, CaptureInput, EpochMs, EvidenceRecord, PatchOutcome, RecordId, RecordPatch, RecordStatus,
};

use crate::merge::merge_patch;
use crate::traits::{RecordStore, StoreResult};
use crate::StorageError;

/// In-memory store for tests. Not durable, but honours the same contract as
/// the SQLite store, including the unavailable failure mode.
#[derive(Default)]
pub struct InMemoryRecordStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct Inner {
    records: HashMap<RecordId, EvidenceRecord>,
    last_created_at: Option<EpochMs>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the substrate could not be opened.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory store marked unavailable".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend(anyhow!("in-memory store lock poisoned")))
    }
}

fn sorted(mut records: Vec<EvidenceRecord>) -> Vec<EvidenceRecord> {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    records
}

impl RecordStore for InMemoryRecordStore {
    fn create(&self, input: CaptureInput) -> StoreResult<EvidenceRecord> {
        let mut inner = self.lock()?;
        let created_at = next_created_at(now_ms(), inner.last_created_at);
        inner.last_created_at = Some(created_at);
        let record = input.into_record(RecordId::new(), created_at);
        inner.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn get(&self, id: &RecordId) -> StoreResult<Option<EvidenceRecord>> {
        let inner = self.lock()?;
        Ok(inner.records.get(id).cloned())
    }

    fn patch(&self, id: &RecordId, patch: &RecordPatch) -> StoreResult<PatchOutcome> {
        let mut inner = self.lock()?;
        let Some(current) = inner.records.get(id).cloned() else {
            return Ok(PatchOutcome::Missing);
        };
        let outcome = merge_patch(current, patch);
        if let PatchOutcome::Applied(updated) = &outcome {
            inner.records.insert(id.clone(), updated.clone());
        }
        Ok(outcome)
    }

    fn remove(&self, id: &RecordId) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        Ok(inner.records.remove(id).is_some())
    }

    fn list_all(&self) -> StoreResult<Vec<EvidenceRecord>> {
        let inner = self.lock()?;
        Ok(sorted(inner.records.values().cloned().collect()))
    }

    fn list_by_status(&self, statuses: &[RecordStatus]) -> StoreResult<Vec<EvidenceRecord>> {
        let inner = self.lock()?;
        Ok(sorted(
            inner
                .records
                .values()
                .filter(|r| statuses.contains(&r.status))
                .cloned()
                .collect(),
        ))
    }

    fn remove_where(&self, predicate: &dyn Fn(RecordStatus) -> bool) -> StoreResult<usize> {
        // The lock makes snapshot and delete a single step.
        let mut inner = self.lock()?;
        let before = inner.records.len();
        inner.records.retain(|_, r| !predicate(r.status));
        Ok(before - inner.records.len())
    }
}
