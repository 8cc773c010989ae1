//! Outbound layer: tenant webhook, Meta Conversions API and receipt storage.

mod error;
pub mod payload;
mod sink;

#[cfg(feature = "http")]
pub mod http;

pub use error::SyncError;
pub use payload::{CapiRequest, WebhookPayload, hash_phone};
pub use sink::{EventSink, ReceiptUploader, RevenueSink};

#[cfg(feature = "http")]
pub use http::{CapiClient, StorageClient, WebhookClient};
