//! Wire payloads for the chat/conversion webhook and the Conversions API.

use chrono::{DateTime, Utc};
use recibo_core::{ChatStartEvent, ConversionEvent, phone_digits};
use ring::digest::{SHA256, digest};
use serde::Serialize;

pub const DEFAULT_CURRENCY: &str = "ARS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookEventType {
    Chat,
    Conversion,
}

/// Body of the tenant webhook. `buttonId` is always serialised as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event_type: WebhookEventType,
    pub landing_id: String,
    pub button_id: Option<String>,
    pub wa_phone: String,
    pub wa_line_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Present (possibly `null`) on conversions only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<Option<String>>,
}

impl WebhookPayload {
    pub fn chat(event: &ChatStartEvent) -> Self {
        Self {
            event_type: WebhookEventType::Chat,
            landing_id: event.campaign_id.clone(),
            button_id: None,
            wa_phone: event.payer.clone(),
            wa_line_id: event.line.clone(),
            amount: None,
            screenshot_url: None,
        }
    }

    pub fn conversion(event: &ConversionEvent) -> Self {
        Self {
            event_type: WebhookEventType::Conversion,
            landing_id: event.campaign_id.clone(),
            button_id: None,
            wa_phone: event.payer.clone(),
            wa_line_id: event.line.clone(),
            amount: Some(event.amount),
            screenshot_url: Some(event.receipt_url.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapiRequest {
    pub data: Vec<CapiEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapiEvent {
    pub event_name: &'static str,
    pub event_time: i64,
    pub action_source: &'static str,
    pub user_data: CapiUserData,
    pub custom_data: CapiCustomData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapiUserData {
    pub ph: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapiCustomData {
    pub value: f64,
    pub currency: String,
}

impl CapiRequest {
    /// A single `Purchase` event for a verified conversion.
    pub fn purchase(event: &ConversionEvent, currency: &str, at: DateTime<Utc>) -> Self {
        Self {
            data: vec![CapiEvent {
                event_name: "Purchase",
                event_time: at.timestamp(),
                action_source: "website",
                user_data: CapiUserData {
                    ph: hash_phone(&event.payer).into_iter().collect(),
                },
                custom_data: CapiCustomData {
                    value: event.amount,
                    currency: currency.to_string(),
                },
            }],
        }
    }
}

/// Lowercase hex SHA-256 of the phone's digits; `None` when it has none.
pub fn hash_phone(raw: &str) -> Option<String> {
    let digits = phone_digits(raw);
    (!digits.is_empty()).then(|| sha256_hex(digits.as_bytes()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    digest(&SHA256, bytes)
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Object key for an uploaded receipt: `{payer}/{millis}.{ext}`.
pub fn receipt_key(payer: &str, at: DateTime<Utc>, ext: &str) -> String {
    format!("{}/{}.{ext}", phone_digits(payer), at.timestamp_millis())
}
