//! reqwest implementations of the outbound sinks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recibo_core::{Campaign, ChatStartEvent, ConversionEvent};
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::info;

use crate::payload::{CapiRequest, DEFAULT_CURRENCY, WebhookPayload, receipt_key};
use crate::{EventSink, ReceiptUploader, RevenueSink, SyncError};

pub const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

async fn check(resp: Response) -> Result<Response, SyncError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SyncError::Server {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &T,
) -> Result<(), SyncError> {
    let resp = client.post(url).json(body).send().await?;
    check(resp).await?;
    Ok(())
}

/// Posts chat-start and conversion events to the tenant webhook.
pub struct WebhookClient {
    client: Client,
    url: String,
}

impl WebhookClient {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl EventSink for WebhookClient {
    async fn chat_started(&self, event: &ChatStartEvent) -> Result<(), SyncError> {
        info!(
            campaign_id = %event.campaign_id,
            line = %event.line,
            "posting chat webhook"
        );
        post_json(&self.client, &self.url, &WebhookPayload::chat(event)).await
    }

    async fn conversion(&self, event: &ConversionEvent) -> Result<(), SyncError> {
        info!(
            campaign_id = %event.campaign_id,
            line = %event.line,
            amount = event.amount,
            "posting conversion webhook"
        );
        post_json(&self.client, &self.url, &WebhookPayload::conversion(event)).await
    }
}

/// Meta Conversions API client.
pub struct CapiClient {
    client: Client,
    base_url: String,
    currency: String,
}

impl CapiClient {
    pub fn new(client: Client, currency: Option<String>) -> Self {
        Self::with_base_url(client, GRAPH_API_BASE.to_string(), currency)
    }

    /// `base_url` like `https://graph.facebook.com/v19.0` (trailing slash trimmed).
    pub fn with_base_url(client: Client, base_url: String, currency: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            currency: currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        }
    }

    pub fn events_url(&self, pixel_id: &str, access_token: &str) -> String {
        format!(
            "{}/{pixel_id}/events?access_token={access_token}",
            self.base_url
        )
    }
}

#[async_trait]
impl RevenueSink for CapiClient {
    async fn purchase(
        &self,
        campaign: &Campaign,
        event: &ConversionEvent,
        at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let Some((pixel_id, token)) = campaign.pixel_credentials() else {
            return Err(SyncError::Other(format!(
                "campaign {} has no pixel credentials",
                campaign.id
            )));
        };
        info!(
            campaign_id = %campaign.id,
            pixel_id,
            amount = event.amount,
            currency = %self.currency,
            "sending purchase event"
        );
        let body = CapiRequest::purchase(event, &self.currency, at);
        post_json(&self.client, &self.events_url(pixel_id, token), &body).await
    }
}

/// PUTs receipt bytes to object storage.
pub struct StorageClient {
    client: Client,
    upload_base: String,
    public_base: String,
    token: Option<String>,
}

impl StorageClient {
    /// Bases like `https://storage.example/receipts` (trailing slash trimmed).
    pub fn new(
        client: Client,
        upload_base: String,
        public_base: String,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            upload_base: upload_base.trim_end_matches('/').to_string(),
            public_base: public_base.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base)
    }
}

#[async_trait]
impl ReceiptUploader for StorageClient {
    async fn upload(
        &self,
        payer: &str,
        bytes: Vec<u8>,
        content_type: &str,
        extension: &str,
        at: DateTime<Utc>,
    ) -> Result<String, SyncError> {
        let key = receipt_key(payer, at, extension);
        let url = format!("{}/{key}", self.upload_base);
        info!(key = %key, size = bytes.len(), "uploading receipt");

        let mut req = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        check(req.send().await?).await?;
        Ok(self.public_url(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capi_url_layout() {
        let capi = CapiClient::new(Client::new(), None);
        assert_eq!(
            capi.events_url("123", "tok"),
            "https://graph.facebook.com/v19.0/123/events?access_token=tok"
        );
        assert_eq!(capi.currency, "ARS");
    }

    #[test]
    fn capi_trims_trailing_slash() {
        let capi =
            CapiClient::with_base_url(Client::new(), "http://localhost:9/".into(), Some("USD".into()));
        assert_eq!(capi.base_url, "http://localhost:9");
        assert_eq!(capi.currency, "USD");
    }

    #[test]
    fn storage_public_url() {
        let storage = StorageClient::new(
            Client::new(),
            "http://minio:9000/receipts/".into(),
            "https://cdn.example/receipts/".into(),
            None,
        );
        assert_eq!(storage.upload_base, "http://minio:9000/receipts");
        assert_eq!(
            storage.public_url("549/1.jpg"),
            "https://cdn.example/receipts/549/1.jpg"
        );
    }

    #[tokio::test]
    async fn purchase_without_credentials_is_refused() {
        let capi = CapiClient::new(Client::new(), None);
        let campaign = Campaign {
            id: "c1".into(),
            slug: "promo".into(),
            code: "PROMO".into(),
            pixel_id: None,
            access_token: None,
        };
        let event = ConversionEvent {
            campaign_id: "c1".into(),
            payer: "549".into(),
            line: "l1".into(),
            amount: 1_000.0,
            receipt_url: None,
        };
        let err = capi.purchase(&campaign, &event, Utc::now()).await.unwrap_err();
        assert!(matches!(err, SyncError::Other(_)));
    }

    #[tokio::test]
    async fn transport_error_does_not_expose_access_token() {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap();
        // Nothing listens on the discard port.
        let capi = CapiClient::with_base_url(client, "http://127.0.0.1:9".into(), None);
        let campaign = Campaign {
            id: "c1".into(),
            slug: "promo".into(),
            code: "PROMO".into(),
            pixel_id: Some("123".into()),
            access_token: Some("SUPERSECRET".into()),
        };
        let event = ConversionEvent {
            campaign_id: "c1".into(),
            payer: "549".into(),
            line: "l1".into(),
            amount: 1_000.0,
            receipt_url: None,
        };
        let err = capi.purchase(&campaign, &event, Utc::now()).await.unwrap_err();
        assert!(matches!(err, SyncError::Http(_)));
        assert!(!err.to_string().contains("SUPERSECRET"), "{err}");
        assert!(!format!("{err:?}").contains("SUPERSECRET"));
    }
}
