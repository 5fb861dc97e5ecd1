use std::sync::Arc;

use anyhow::anyhow;
use fieldsync_core::{
    is_cancellable, CaptureInput, EvidenceRecord, PatchOutcome, RecordId, RecordPatch, RecordStatus,
};
use fieldsync_storage::{RecordStore, StorageError, StoreResult};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Ordered view of the whole queue as of one read of the store.
#[derive(Clone, Debug, Default)]
pub struct QueueSnapshot {
    /// Bumped on every publication; observers never see it go backwards.
    pub generation: u64,
    pub records: Arc<Vec<EvidenceRecord>>,
}

impl QueueSnapshot {
    pub fn count(&self, status: RecordStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Records still waiting on a successful upload.
    pub fn outstanding(&self) -> usize {
        self.records.iter().filter(|r| !r.status.is_terminal()).count()
    }

    pub fn find(&self, id: &RecordId) -> Option<&EvidenceRecord> {
        self.records.iter().find(|r| &r.id == id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Removed,
    Missing,
    /// An upload attempt is running; the record is left alone.
    InFlight,
    /// Already delivered; use the cleanup sweep instead.
    Synced,
}

/// The only entry point the application uses for queued evidence.
///
/// Cheap to clone. Every mutating call republishes the snapshot before it
/// returns.
#[derive(Clone)]
pub struct EvidenceQueue {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RecordStore>,
    tx: watch::Sender<QueueSnapshot>,
    /// Serializes read+publish so publications keep store order.
    generation: Mutex<u64>,
}

impl EvidenceQueue {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let (tx, _rx) = watch::channel(QueueSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                store,
                tx,
                generation: Mutex::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.inner.tx.subscribe()
    }

    /// Last published snapshot (may predate writes made by other pages).
    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.tx.borrow().clone()
    }

    async fn blocking<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&dyn RecordStore) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StorageError::Backend(anyhow!("store task failed: {e}")))?
    }

    pub async fn add(&self, input: CaptureInput) -> StoreResult<EvidenceRecord> {
        let record = self.blocking(move |s| s.create(input)).await?;
        info!(record = %record.id, job = %record.job_id, milestone = %record.milestone_id, "queued evidence");
        self.refresh().await?;
        Ok(record)
    }

    pub async fn update(&self, id: &RecordId, patch: RecordPatch) -> StoreResult<PatchOutcome> {
        let id = id.clone();
        let outcome = self.blocking(move |s| s.patch(&id, &patch)).await?;
        self.refresh().await?;
        Ok(outcome)
    }

    pub async fn remove(&self, id: &RecordId) -> StoreResult<bool> {
        let id = id.clone();
        let removed = self.blocking(move |s| s.remove(&id)).await?;
        self.refresh().await?;
        Ok(removed)
    }

    /// Abandon a record that is not mid-upload.
    pub async fn cancel(&self, id: &RecordId) -> StoreResult<CancelOutcome> {
        let id = id.clone();
        let outcome = self
            .blocking(move |s| {
                let Some(current) = s.get(&id)? else {
                    return Ok(CancelOutcome::Missing);
                };
                if !is_cancellable(current.status) {
                    return Ok(match current.status {
                        RecordStatus::Synced => CancelOutcome::Synced,
                        _ => CancelOutcome::InFlight,
                    });
                }
                Ok(if s.remove(&id)? { CancelOutcome::Removed } else { CancelOutcome::Missing })
            })
            .await?;
        if outcome == CancelOutcome::Removed {
            self.refresh().await?;
        }
        Ok(outcome)
    }

    pub async fn get(&self, id: &RecordId) -> StoreResult<Option<EvidenceRecord>> {
        let id = id.clone();
        self.blocking(move |s| s.get(&id)).await
    }

    pub async fn list_by_status(&self, statuses: &[RecordStatus]) -> StoreResult<Vec<EvidenceRecord>> {
        let statuses = statuses.to_vec();
        self.blocking(move |s| s.list_by_status(&statuses)).await
    }

    /// Pending and failed records, oldest first.
    pub async fn pending_work(&self) -> StoreResult<Vec<EvidenceRecord>> {
        self.list_by_status(&[RecordStatus::Pending, RecordStatus::Error]).await
    }

    /// Drop delivered records and their payloads.
    pub async fn cleanup_synced(&self) -> StoreResult<usize> {
        let removed = self
            .blocking(|s| s.remove_where(&|status| status == RecordStatus::Synced))
            .await?;
        self.refresh().await?;
        Ok(removed)
    }

    /// Re-read the store and publish. Safe to call redundantly.
    pub async fn refresh(&self) -> StoreResult<QueueSnapshot> {
        let mut generation = self.inner.generation.lock().await;
        let records = self.blocking(|s| s.list_all()).await?;
        *generation += 1;
        let snapshot = QueueSnapshot {
            generation: *generation,
            records: Arc::new(records),
        };
        debug!(generation = snapshot.generation, records = snapshot.records.len(), "published queue snapshot");
        self.inner.tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_storage::InMemoryRecordStore;

    fn input(name: &str) -> CaptureInput {
        CaptureInput::from_bytes("j1", "m1", name, "image/jpeg", name.as_bytes().to_vec())
    }

    fn queue() -> (EvidenceQueue, Arc<InMemoryRecordStore>) {
        let store = Arc::new(InMemoryRecordStore::new());
        (EvidenceQueue::new(store.clone()), store)
    }

    #[tokio::test]
    async fn add_publishes_before_returning() {
        let (q, _) = queue();
        let rx = q.subscribe();
        let rec = q.add(input("a")).await.unwrap();
        let snap = rx.borrow().clone();
        assert_eq!(snap.records.len(), 1);
        assert_eq!(snap.find(&rec.id).map(|r| r.status), Some(RecordStatus::Pending));
    }

    #[tokio::test]
    async fn update_and_remove_refresh_observers() {
        let (q, _) = queue();
        let rec = q.add(input("a")).await.unwrap();
        q.update(&rec.id, RecordPatch::uploading()).await.unwrap();
        assert_eq!(q.snapshot().count(RecordStatus::Uploading), 1);
        assert!(q.remove(&rec.id).await.unwrap());
        assert!(q.snapshot().records.is_empty());
    }

    #[tokio::test]
    async fn refresh_is_idempotent_and_generation_grows() {
        let (q, _) = queue();
        q.add(input("a")).await.unwrap();
        let s1 = q.refresh().await.unwrap();
        let s2 = q.refresh().await.unwrap();
        assert_eq!(s1.records, s2.records);
        assert!(s2.generation > s1.generation);
    }

    #[tokio::test]
    async fn concurrent_refreshes_never_publish_backwards() {
        let (q, _) = queue();
        let mut rx = q.subscribe();
        let mut handles = vec![];
        for i in 0..8 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                q.add(input(&format!("f{i}"))).await.unwrap();
                q.refresh().await.unwrap();
            }));
        }
        let mut last_gen = 0;
        let mut last_len = 0;
        for h in handles {
            h.await.unwrap();
            if rx.has_changed().unwrap() {
                let snap = rx.borrow_and_update().clone();
                assert!(snap.generation >= last_gen);
                assert!(snap.records.len() >= last_len);
                last_gen = snap.generation;
                last_len = snap.records.len();
            }
        }
        assert_eq!(q.refresh().await.unwrap().records.len(), 8);
    }

    #[tokio::test]
    async fn cancel_respects_in_flight_and_synced() {
        let (q, _) = queue();
        let a = q.add(input("a")).await.unwrap();
        let b = q.add(input("b")).await.unwrap();
        q.update(&b.id, RecordPatch::uploading()).await.unwrap();

        assert_eq!(q.cancel(&b.id).await.unwrap(), CancelOutcome::InFlight);
        q.update(&b.id, RecordPatch::synced("https://x/b", 1)).await.unwrap();
        assert_eq!(q.cancel(&b.id).await.unwrap(), CancelOutcome::Synced);

        assert_eq!(q.cancel(&a.id).await.unwrap(), CancelOutcome::Removed);
        assert_eq!(q.cancel(&a.id).await.unwrap(), CancelOutcome::Missing);
        assert_eq!(q.snapshot().records.len(), 1);
    }

    #[tokio::test]
    async fn storage_unavailable_surfaces_to_caller() {
        let (q, store) = queue();
        store.set_unavailable(true);
        let err = q.add(input("a")).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(q.refresh().await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn pending_work_is_oldest_first_and_skips_in_flight() {
        let (q, _) = queue();
        let a = q.add(input("a")).await.unwrap();
        let b = q.add(input("b")).await.unwrap();
        let c = q.add(input("c")).await.unwrap();
        q.update(&b.id, RecordPatch::uploading()).await.unwrap();
        q.update(&a.id, RecordPatch::uploading()).await.unwrap();
        q.update(&a.id, RecordPatch::failed("offline")).await.unwrap();
        let ids: Vec<_> = q.pending_work().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
    }

    #[tokio::test]
    async fn outstanding_counts_everything_short_of_synced() {
        let (q, _) = queue();
        let a = q.add(input("a")).await.unwrap();
        let b = q.add(input("b")).await.unwrap();
        q.update(&a.id, RecordPatch::uploading()).await.unwrap();
        q.update(&a.id, RecordPatch::synced("https://x/a", 1)).await.unwrap();
        q.update(&b.id, RecordPatch::uploading()).await.unwrap();
        let snap = q.snapshot();
        assert_eq!(snap.outstanding(), 1);
        assert_eq!(snap.count(RecordStatus::Synced), 1);
    }
}
