//! Error types for the synchronization engine

use thiserror::Error;

/// Errors raised by document store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("BSON conversion error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    #[error("document is not an object")]
    NotAnObject,

    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Errors that can occur while mirroring resources
#[derive(Debug, Error)]
pub enum SyncError {
    /// Object lacks `metadata.uid` and cannot be keyed
    #[error("object {} has no metadata.uid", .name.as_deref().unwrap_or("<unnamed>"))]
    MissingIdentifier { name: Option<String> },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream error: {message}")]
    Upstream { message: String },
}

impl SyncError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
