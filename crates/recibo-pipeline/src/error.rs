use std::time::Duration;

use recibo_core::MediaError;
use recibo_store::StoreError;
use recibo_sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("delivery error: {0}")]
    Sync(#[from] SyncError),

    #[error("{stage} timed out after {after:?}")]
    Timeout {
        stage: &'static str,
        after: Duration,
    },
}
