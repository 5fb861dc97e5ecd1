use std::sync::atomic::{AtomicBool, Ordering};

use fieldsync_core::{needs_upload, now_ms, EvidenceRecord, PatchOutcome, RecordPatch};
use fieldsync_storage::StoreResult;
use tracing::{debug, info, warn};

use crate::{EvidenceQueue, TokenProvider, Uploader};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    /// Claimed by someone else, or no longer eligible, before we started.
    pub skipped: usize,
    /// Removed while the upload was in flight; result discarded.
    pub vanished: usize,
    pub purged: usize,
    /// Another drain on this page was already running; it will pick up the work.
    pub coalesced: bool,
}

enum Attempt {
    Synced,
    Failed,
    Skipped,
    Vanished,
}

/// Page-side drain loop: walks pending and failed records oldest first and
/// drives each through one upload attempt.
///
/// Several pages may drain the same store at once. That race is accepted:
/// each write re-reads the persisted record, stale writes to removed records
/// are dropped, and the server dedups on content hash.
pub struct SyncOrchestrator<U, T> {
    queue: EvidenceQueue,
    uploader: U,
    tokens: T,
    purge_synced: bool,
    draining: AtomicBool,
    rerun: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<U: Uploader, T: TokenProvider> SyncOrchestrator<U, T> {
    pub fn new(queue: EvidenceQueue, uploader: U, tokens: T) -> Self {
        Self {
            queue,
            uploader,
            tokens,
            purge_synced: false,
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
        }
    }

    /// Sweep synced records at the end of every drain.
    pub fn with_purge_synced(mut self, purge: bool) -> Self {
        self.purge_synced = purge;
        self
    }

    pub fn queue(&self) -> &EvidenceQueue {
        &self.queue
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Run until no new wake-up arrived during the last pass. A call made while
    /// a drain is running only marks a follow-up pass and returns at once.
    pub async fn drain(&self) -> StoreResult<DrainReport> {
        // Request first, then try to own the loop. The owner re-checks the
        // request after releasing, so a request is never stranded.
        self.rerun.store(true, Ordering::SeqCst);
        if self.acquire().is_err() {
            debug!("drain already running; coalesced");
            return Ok(DrainReport { coalesced: true, ..DrainReport::default() });
        }

        let mut report = DrainReport::default();
        loop {
            {
                let _guard = DrainGuard(&self.draining);
                self.drain_until_quiet(&mut report).await?;
            }
            // a request that landed after the last check but before release
            if !self.rerun.load(Ordering::SeqCst) || self.acquire().is_err() {
                break;
            }
        }
        if report.attempted > 0 || report.purged > 0 {
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                skipped = report.skipped,
                vanished = report.vanished,
                purged = report.purged,
                "evidence drain finished"
            );
        }
        Ok(report)
    }

    fn acquire(&self) -> Result<bool, bool> {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
    }

    /// Passes (each followed by the optional sweep) until no request is pending.
    async fn drain_until_quiet(&self, report: &mut DrainReport) -> StoreResult<()> {
        while self.rerun.swap(false, Ordering::SeqCst) {
            self.drain_once(report).await?;
            if self.purge_synced {
                report.purged += self.queue.cleanup_synced().await?;
            }
        }
        Ok(())
    }

    async fn drain_once(&self, report: &mut DrainReport) -> StoreResult<()> {
        let work = self.queue.pending_work().await?;
        for record in work {
            match self.attempt(record).await? {
                Attempt::Synced => {
                    report.attempted += 1;
                    report.synced += 1;
                }
                Attempt::Failed => {
                    report.attempted += 1;
                    report.failed += 1;
                }
                Attempt::Vanished => {
                    report.attempted += 1;
                    report.vanished += 1;
                }
                Attempt::Skipped => report.skipped += 1,
            }
        }
        Ok(())
    }

    async fn attempt(&self, listed: EvidenceRecord) -> StoreResult<Attempt> {
        let id = listed.id.clone();

        // check-then-patch: our listing may already be stale
        let Some(current) = self.queue.get(&id).await? else {
            return Ok(Attempt::Skipped);
        };
        if !needs_upload(current.status) {
            debug!(record = %id, status = %current.status, "record no longer needs upload");
            return Ok(Attempt::Skipped);
        }
        let record = match self.queue.update(&id, RecordPatch::uploading()).await? {
            PatchOutcome::Applied(r) => r,
            PatchOutcome::Missing | PatchOutcome::Rejected { .. } => return Ok(Attempt::Skipped),
        };

        let result = match self.tokens.token().await {
            Ok(credential) => self.uploader.upload(&record, &credential).await,
            Err(e) => Err(e),
        };

        // the record may have been cancelled while we were suspended
        if self.queue.get(&id).await?.is_none() {
            debug!(record = %id, "record removed during upload; dropping result");
            return Ok(Attempt::Vanished);
        }

        let (patch, outcome) = match result {
            Ok(receipt) => (RecordPatch::synced(receipt.remote_url, now_ms()), Attempt::Synced),
            Err(e) => {
                warn!(record = %id, error = %e, "evidence upload failed");
                (RecordPatch::failed(e.to_string()), Attempt::Failed)
            }
        };
        match self.queue.update(&id, patch).await? {
            PatchOutcome::Applied(_) => Ok(outcome),
            PatchOutcome::Missing => Ok(Attempt::Vanished),
            PatchOutcome::Rejected { from, to } => {
                debug!(record = %id, %from, %to, "result superseded by another page");
                Ok(Attempt::Skipped)
            }
        }
    }
}
