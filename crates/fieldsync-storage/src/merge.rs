use fieldsync_core::{check_transition, EvidenceRecord, PatchOutcome, RecordPatch, TransitionError};
use tracing::warn;

/// Shared merge rule for every store: apply the patch to the persisted value
/// unless it asks for a status change the lifecycle does not allow.
pub fn merge_patch(mut current: EvidenceRecord, patch: &RecordPatch) -> PatchOutcome {
    if let Some(to) = patch.status {
        if let Err(TransitionError { from, to }) = check_transition(current.status, to) {
            warn!(record = %current.id, %from, %to, "rejecting status change outside the record lifecycle");
            return PatchOutcome::Rejected { from, to };
        }
    }
    patch.apply_to(&mut current);
    PatchOutcome::Applied(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{CaptureInput, RecordId, RecordStatus};

    fn pending() -> EvidenceRecord {
        CaptureInput::from_bytes("j", "m", "f", "image/png", vec![0])
            .into_record(RecordId::from_str("r"), 1)
    }

    #[test]
    fn rejects_pending_to_synced() {
        let out = merge_patch(pending(), &RecordPatch::synced("u", 2));
        assert_eq!(
            out,
            PatchOutcome::Rejected { from: RecordStatus::Pending, to: RecordStatus::Synced }
        );
    }

    #[test]
    fn applies_lifecycle_edge() {
        let out = merge_patch(pending(), &RecordPatch::uploading());
        assert_eq!(out.applied().map(|r| r.status), Some(RecordStatus::Uploading));
    }
}
