//! Collaborator interfaces the pipeline is written against.
//!
//! [`DuckStore`](crate::DuckStore) implements all four; tests and alternative
//! deployments can swap any of them independently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recibo_core::{AttributionRecord, Campaign, DailyChatStartKey, LineRef};

use crate::StoreError;

/// Rows removed by a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub processed_messages: usize,
    pub chat_start_keys: usize,
}

/// Durable at-most-once markers.
///
/// Both `mark_*` operations are a single insert-if-absent: they return `true`
/// only for the caller that created the marker.
#[async_trait]
pub trait DedupGate: Send + Sync {
    async fn is_processed(&self, message_id: &str) -> Result<bool, StoreError>;

    async fn mark_processed(&self, message_id: &str, at: DateTime<Utc>)
    -> Result<bool, StoreError>;

    async fn mark_chat_start(
        &self,
        key: &DailyChatStartKey,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Drop processed ids older than `cutoff` and chat keys for days before it.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<PruneStats, StoreError>;
}

/// Chat-start and click signals, keyed by canonical line id.
#[async_trait]
pub trait AttributionSignals: Send + Sync {
    /// Most recent chat start for exactly this (line, payer).
    async fn latest_chat_start(
        &self,
        line: &str,
        payer: &str,
    ) -> Result<Option<AttributionRecord>, StoreError>;

    /// Most recent chat start for the payer on any line.
    async fn latest_chat_start_for_payer(
        &self,
        payer: &str,
    ) -> Result<Option<AttributionRecord>, StoreError>;

    /// Most recent click routed to `line` observed at or after `since`.
    async fn latest_click(
        &self,
        line: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<AttributionRecord>, StoreError>;

    async fn record_chat_start(
        &self,
        line: &str,
        payer: &str,
        campaign_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn record_click(
        &self,
        line: &str,
        campaign_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Landing pages / campaigns.
#[async_trait]
pub trait CampaignDirectory: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<Campaign>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Campaign>, StoreError>;

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.get(id).await?.is_some())
    }

    async fn all(&self) -> Result<Vec<Campaign>, StoreError>;

    async fn upsert(&self, campaign: &Campaign) -> Result<(), StoreError>;
}

/// External ↔ canonical line id mapping.
#[async_trait]
pub trait LineDirectory: Send + Sync {
    /// Canonical form of `line`; unchanged when already canonical or unknown.
    async fn resolve(&self, line: &LineRef) -> Result<LineRef, StoreError>;

    async fn register(&self, external_id: &str, canonical: &LineRef) -> Result<(), StoreError>;
}
