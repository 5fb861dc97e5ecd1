use fieldsync_core::{CaptureInput, EvidenceRecord, PatchOutcome, RecordId, RecordPatch, RecordStatus};

use crate::StorageError;

pub type StoreResult<T> = Result<T, StorageError>;

/// Exclusive owner of persisted evidence records.
///
/// Every call reads and writes the persisted state directly; implementations
/// must not answer from a cache, because several pages (and the CLI) may
/// hold the same store open at once.
pub trait RecordStore: Send + Sync {
    /// Persist a new `pending` record with a fresh id and a monotonic `created_at`.
    fn create(&self, input: CaptureInput) -> StoreResult<EvidenceRecord>;

    fn get(&self, id: &RecordId) -> StoreResult<Option<EvidenceRecord>>;

    /// Read-modify-write of the lifecycle fields. Absent ids are a benign no-op.
    fn patch(&self, id: &RecordId, patch: &RecordPatch) -> StoreResult<PatchOutcome>;

    /// Returns whether a record was deleted.
    fn remove(&self, id: &RecordId) -> StoreResult<bool>;

    /// Every record, oldest first.
    fn list_all(&self) -> StoreResult<Vec<EvidenceRecord>>;

    /// Records in any of `statuses`, oldest first.
    fn list_by_status(&self, statuses: &[RecordStatus]) -> StoreResult<Vec<EvidenceRecord>>;

    /// Delete the records whose status matches, as seen by one consistent
    /// snapshot. Returns the number of deleted records.
    fn remove_where(&self, predicate: &dyn Fn(RecordStatus) -> bool) -> StoreResult<usize>;
}
