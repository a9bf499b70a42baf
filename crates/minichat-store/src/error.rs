use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading, writing or renaming the snapshot file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot document is not valid JSON or does not match the model.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking snapshot writer panicked or was cancelled.
    #[error("Snapshot task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The document was written by a newer build. It is never overwritten.
    #[error("Unsupported schema version {found} (this build understands up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
