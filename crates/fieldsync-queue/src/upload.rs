use std::future::Future;
use std::path::{Path, PathBuf};

use fieldsync_core::{content_hash, EvidenceRecord};
use thiserror::Error;
use tracing::debug;

/// Why an upload attempt failed. Never escapes the drain loop: it is recorded
/// on the record as `status = error` plus `last_error`.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("upload io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bearer credential. Held in memory for one attempt and never persisted.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub remote_url: String,
}

/// Sends one record's payload to the evidence endpoint. Must be idempotent on
/// `content_hash`: the same record may be sent twice when pages race.
pub trait Uploader: Send + Sync {
    fn upload(
        &self,
        record: &EvidenceRecord,
        credential: &Credential,
    ) -> impl Future<Output = Result<UploadReceipt, UploadError>> + Send;
}

/// Supplies the bearer credential on demand.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> impl Future<Output = Result<Credential, UploadError>> + Send;
}

/// Fixed token, typically read from the environment.
#[derive(Clone, Debug, Default)]
pub struct StaticToken {
    token: Option<Credential>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: Some(Credential::new(token)) }
    }

    pub fn from_env(var: &str) -> Self {
        Self {
            token: std::env::var(var).ok().map(Credential::new),
        }
    }
}

impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<Credential, UploadError> {
        match &self.token {
            Some(t) if !t.is_empty() => Ok(t.clone()),
            _ => Err(UploadError::Auth("no access token available".into())),
        }
    }
}

/// Uploads into a local directory, content-addressed by hash. Re-sending the
/// same payload lands on the same path.
#[derive(Clone, Debug)]
pub struct FsUploader {
    pub root: PathBuf,
    /// Prefix for the returned URL; `file://` + absolute path when unset.
    pub base_url: Option<String>,
}

impl FsUploader {
    pub fn new(root: PathBuf, base_url: Option<String>) -> Self {
        Self { root, base_url }
    }

    fn relative_path(record: &EvidenceRecord) -> PathBuf {
        let hash = &record.content_hash;
        let shard = hash.get(..2).unwrap_or("00");
        Path::new(&record.job_id)
            .join(&record.milestone_id)
            .join(shard)
            .join(hash)
    }
}

impl Uploader for FsUploader {
    async fn upload(&self, record: &EvidenceRecord, credential: &Credential) -> Result<UploadReceipt, UploadError> {
        if credential.is_empty() {
            return Err(UploadError::Auth("empty bearer token".into()));
        }
        if content_hash(&record.file) != record.content_hash {
            return Err(UploadError::Rejected(format!(
                "content hash mismatch for {}",
                record.file_name
            )));
        }
        let rel = Self::relative_path(record);
        let dest = self.root.join(&rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&dest).await? {
            debug!(record = %record.id, path = %dest.display(), "payload already stored");
        } else {
            tokio::fs::write(&dest, &record.file).await?;
        }
        let remote_url = match &self.base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), rel.to_string_lossy().replace('\\', "/")),
            None => format!("file://{}", dest.display()),
        };
        Ok(UploadReceipt { remote_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{CaptureInput, RecordId};
    use tempfile::tempdir;

    fn record() -> EvidenceRecord {
        CaptureInput::from_bytes("j1", "m1", "a.jpg", "image/jpeg", b"payload".to_vec())
            .into_record(RecordId::from_str("e1"), 1)
    }

    #[tokio::test]
    async fn fs_uploader_is_idempotent_on_content_hash() {
        let dir = tempdir().unwrap();
        let up = FsUploader::new(dir.path().to_path_buf(), Some("https://x/".into()));
        let cred = Credential::new("t");
        let a = up.upload(&record(), &cred).await.unwrap();
        let b = up.upload(&record(), &cred).await.unwrap();
        assert_eq!(a, b);
        assert!(a.remote_url.starts_with("https://x/j1/m1/"));
        assert!(a.remote_url.ends_with(&record().content_hash));
    }

    #[tokio::test]
    async fn fs_uploader_rejects_tampered_payload() {
        let dir = tempdir().unwrap();
        let up = FsUploader::new(dir.path().to_path_buf(), None);
        let mut rec = record();
        rec.file = b"other".to_vec();
        let err = up.upload(&rec, &Credential::new("t")).await.unwrap_err();
        assert!(matches!(err, UploadError::Rejected(_)));
    }

    #[tokio::test]
    async fn missing_token_is_auth_error() {
        let err = StaticToken::default().token().await.unwrap_err();
        assert!(matches!(err, UploadError::Auth(_)));
        assert!(StaticToken::new("abc").token().await.is_ok());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::new("secret");
        assert_eq!(format!("{c:?}"), "Credential(<redacted>)");
        assert!(!c.is_empty());
        assert!(Credential::new("  ").is_empty());
    }
}
