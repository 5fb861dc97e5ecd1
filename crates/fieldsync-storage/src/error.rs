use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The durable substrate cannot be opened or written at all (missing
    /// permission, quota, locked file). Fatal to every queue operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A persisted row could not be decoded.
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}
