use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use fieldsync_core::{CaptureInput, EvidenceRecord, RecordId, RecordPatch, RecordStatus};
use fieldsync_platform::{ClientConnection, Platform};
use fieldsync_queue::{DrainReport, EvidenceQueue, FsUploader, StaticToken, SyncOrchestrator};
use fieldsync_storage_sqlite::SqliteRecordStore;
use fieldsync_worker::BackgroundWorker;
use tracing::{info, warn};

use crate::{Config, Page};

pub type DevicePage = Page<FsUploader, StaticToken>;

/// A device-local evidence queue rooted at a directory.
pub struct FieldSync {
    pub repo_root: PathBuf,
    pub cfg: Config,
    pub queue: EvidenceQueue,
}

impl FieldSync {
    pub fn open(repo_root: PathBuf) -> Result<Self> {
        let cfg_path = Config::config_path(&repo_root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_repo(project_id(&repo_root));
            cfg.save_to(&cfg_path)?;
            cfg
        };

        let db_path = cfg.db_path(&repo_root);
        let store = SqliteRecordStore::open_with_timeout(&db_path, cfg.busy_timeout())
            .with_context(|| format!("open evidence store {}", db_path.display()))?;
        let queue = EvidenceQueue::new(Arc::new(store));
        Ok(Self { repo_root, cfg, queue })
    }

    pub fn init_repo(repo_root: &Path) -> Result<()> {
        let cfg_path = Config::config_path(repo_root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_repo(project_id(repo_root));
            cfg.save_to(&cfg_path)?;
            cfg
        };
        // create db
        let _ = SqliteRecordStore::open(&cfg.db_path(repo_root))?;
        Ok(())
    }

    pub fn uploader(&self) -> FsUploader {
        FsUploader::new(self.cfg.upload_root(), self.cfg.upload.base_url.clone())
    }

    pub fn tokens(&self) -> StaticToken {
        StaticToken::from_env(&self.cfg.upload.token_env)
    }

    pub fn orchestrator(&self) -> SyncOrchestrator<FsUploader, StaticToken> {
        SyncOrchestrator::new(self.queue.clone(), self.uploader(), self.tokens())
            .with_purge_synced(self.cfg.purge_synced())
    }

    pub async fn capture(&self, input: CaptureInput) -> Result<EvidenceRecord> {
        Ok(self.queue.add(input).await?)
    }

    /// Records left in `uploading` by a process that died mid-attempt never
    /// get picked up again; mark them failed so the next drain retries them.
    /// Only sound while no other context is draining this store.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for record in self.queue.list_by_status(&[RecordStatus::Uploading]).await? {
            let patch = RecordPatch::failed("upload interrupted before completion");
            if self.queue.update(&record.id, patch).await?.is_applied() {
                warn!(record = %record.id, "recovered interrupted upload");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Explicit user retry: drain pending and failed records right now,
    /// without waiting for a wake-up.
    pub async fn retry_now(&self) -> Result<DrainReport> {
        self.recover_interrupted().await?;
        Ok(self.orchestrator().drain().await?)
    }

    pub async fn mount_page(&self, platform: &Platform) -> Result<(DevicePage, ClientConnection)> {
        Page::mount(
            platform,
            format!("file://{}", self.repo_root.display()),
            self.orchestrator(),
            &self.cfg.sync.tag,
            self.cfg.always_fallback(),
        )
        .await
    }

    /// One full sync cycle in-process: bring up a worker and a page, go
    /// online, and let the wake-up drive the drain.
    pub async fn sync_once(&self) -> Result<DrainReport> {
        self.recover_interrupted().await?;
        let platform = Platform::new(true);
        BackgroundWorker::install(&platform, 1, &self.cfg.sync.tag).await?;
        let (page, mut conn) = self.mount_page(&platform).await?;

        let fired = platform.set_online(true).await;
        let woken = fired.iter().any(|d| matches!(d.outcome, Ok(n) if n > 0));
        let report = match (woken, conn.inbox.try_recv()) {
            (true, Ok(message)) => page.handle_message(message).await?,
            _ => page.on_online().await?.unwrap_or_default(),
        };
        page.close().await?;
        info!(synced = report.synced, failed = report.failed, "sync cycle finished");
        Ok(report)
    }

    pub async fn get(&self, id: &RecordId) -> Result<Option<EvidenceRecord>> {
        Ok(self.queue.get(id).await?)
    }
}

fn project_id(repo_root: &Path) -> &str {
    repo_root.file_name().and_then(|s| s.to_str()).unwrap_or("device")
}
