//! Outbound seams the pipeline emits through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recibo_core::{Campaign, ChatStartEvent, ConversionEvent};

use crate::SyncError;

/// Tenant webhook for chat starts and conversions.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn chat_started(&self, event: &ChatStartEvent) -> Result<(), SyncError>;

    async fn conversion(&self, event: &ConversionEvent) -> Result<(), SyncError>;
}

/// Ad-platform revenue reporting for campaigns with pixel credentials.
#[async_trait]
pub trait RevenueSink: Send + Sync {
    async fn purchase(
        &self,
        campaign: &Campaign,
        event: &ConversionEvent,
        at: DateTime<Utc>,
    ) -> Result<(), SyncError>;
}

/// Object storage for receipt media. Returns the public URL.
#[async_trait]
pub trait ReceiptUploader: Send + Sync {
    async fn upload(
        &self,
        payer: &str,
        bytes: Vec<u8>,
        content_type: &str,
        extension: &str,
        at: DateTime<Utc>,
    ) -> Result<String, SyncError>;
}
