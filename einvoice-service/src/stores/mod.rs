//! File-backed persistence: JSONL append logs and per-invoice artifacts.

pub mod artifacts;
pub mod dlq;
pub mod jsonl;
pub mod status;
pub mod submissions;

use thiserror::Error;

pub use artifacts::ArtifactStore;
pub use dlq::DlqStore;
pub use jsonl::JsonlLog;
pub use status::{StatusStore, StatusUpdate, StatusWrite};
pub use submissions::SubmissionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for service_core::error::AppError {
    fn from(err: StoreError) -> Self {
        service_core::error::AppError::InternalError(anyhow::Error::new(err))
    }
}
