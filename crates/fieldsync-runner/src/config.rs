use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fieldsync_core::SYNC_TAG;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub upload: UploadConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Relative paths resolve against the repo root.
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub tag: String,
    /// Drain on focus/visibility/online even when deferred sync registered.
    #[serde(default)]
    pub always_fallback: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    pub target_dir: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub token_env: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default)]
    pub purge_synced: Option<bool>,
}

impl Config {
    pub fn default_for_repo(project_id: &str) -> Self {
        Self {
            store: StoreConfig {
                db_path: None,
                busy_timeout_ms: Some(5_000),
            },
            sync: SyncConfig {
                tag: SYNC_TAG.to_string(),
                always_fallback: Some(false),
            },
            upload: UploadConfig {
                target_dir: format!("~/.fieldsync/uploads/{project_id}"),
                base_url: None,
                token_env: "FIELDSYNC_TOKEN".to_string(),
            },
            cleanup: CleanupConfig {
                purge_synced: Some(false),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse fieldsync.toml")?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path(repo_root: &Path) -> PathBuf {
        repo_root.join(".fieldsync").join("fieldsync.toml")
    }

    pub fn db_path(&self, repo_root: &Path) -> PathBuf {
        match &self.store.db_path {
            Some(p) => repo_root.join(shellexpand::tilde(p).as_ref()),
            None => repo_root.join(".fieldsync").join("evidence.db"),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        self.store
            .busy_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(fieldsync_storage_sqlite::DEFAULT_BUSY_TIMEOUT)
    }

    pub fn upload_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.upload.target_dir).to_string())
    }

    pub fn always_fallback(&self) -> bool {
        self.sync.always_fallback.unwrap_or(false)
    }

    pub fn purge_synced(&self) -> bool {
        self.cleanup.purge_synced.unwrap_or(false)
    }
}
