//! Shared message and event types passed between the transport, the pipeline,
//! the store and the emitters.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::line::LineRef;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("message carries no media")]
    Missing,
    #[error("invalid base64 media: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Transport message type as reported by the WhatsApp session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Chat,
    Image,
    Document,
    #[serde(other)]
    Other,
}

/// Result of the transport's `downloadMedia()`: base64 bytes plus MIME type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    pub data: String,
    pub mimetype: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Pdf,
    Unsupported,
}

impl MediaPayload {
    pub fn decode(&self) -> Result<Vec<u8>, MediaError> {
        Ok(BASE64_STANDARD.decode(self.data.trim())?)
    }

    pub fn kind(&self) -> MediaKind {
        let mime = self.base_mime();
        if mime == "application/pdf" {
            MediaKind::Pdf
        } else if mime.starts_with("image/") {
            MediaKind::Image
        } else {
            MediaKind::Unsupported
        }
    }

    /// File extension used for the uploaded receipt object.
    pub fn extension(&self) -> &'static str {
        match self.base_mime().as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/webp" => "webp",
            "application/pdf" => "pdf",
            _ => "bin",
        }
    }

    /// MIME type without parameters (`image/jpeg; charset=...` → `image/jpeg`).
    pub fn base_mime(&self) -> String {
        self.mimetype
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }
}

/// One inbound chat message as handed over by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique transport message id.
    pub id: String,
    /// Sender JID, e.g. `5491122334455@c.us`.
    pub from: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Text body (chat) or caption (media).
    #[serde(default)]
    pub body: Option<String>,
    /// Line the message arrived on, canonical or external.
    pub line_id: String,
    /// Unix seconds, when the transport provides it.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub media: Option<MediaPayload>,
}

impl InboundMessage {
    /// Payer identifier: the phone part of the sender JID.
    pub fn payer(&self) -> &str {
        self.from.split('@').next().unwrap_or(&self.from)
    }

    pub fn line(&self) -> LineRef {
        LineRef::parse(&self.line_id)
    }

    pub fn text(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }

    pub fn is_media(&self) -> bool {
        matches!(self.kind, MessageKind::Image | MessageKind::Document)
    }

    /// Transport timestamp, falling back to now.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now)
    }
}

/// Which side of the funnel a stored attribution signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    ChatStart,
    Click,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatStart => "chat_start",
            Self::Click => "click",
        }
    }
}

/// A previously recorded chat-start or click signal.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionRecord {
    pub kind: SignalKind,
    pub campaign_id: String,
    /// Absent for click signals, which are keyed by line only.
    pub payer: Option<String>,
    pub line: String,
    pub observed_at: DateTime<Utc>,
}

/// A landing page / campaign with its optional Meta pixel credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Campaign {
    pub id: String,
    pub slug: String,
    pub code: String,
    pub pixel_id: Option<String>,
    pub access_token: Option<String>,
}

impl Campaign {
    /// Pixel id and access token, when both are configured.
    pub fn pixel_credentials(&self) -> Option<(&str, &str)> {
        match (self.pixel_id.as_deref(), self.access_token.as_deref()) {
            (Some(pixel), Some(token)) if !pixel.is_empty() && !token.is_empty() => {
                Some((pixel, token))
            }
            _ => None,
        }
    }
}

/// Attribution code for a slug: upper-cased, non-alphanumerics stripped.
///
/// "promo-verano 2025" → "PROMOVERANO2025"
pub fn campaign_code(slug: &str) -> String {
    slug.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Digits of a phone number or JID, for hashing.
pub fn phone_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// A payer began a conversation tied to a campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatStartEvent {
    pub campaign_id: String,
    pub payer: String,
    pub line: String,
}

/// A verified, attributed receipt ready for the emitters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionEvent {
    pub campaign_id: String,
    pub payer: String,
    pub line: String,
    pub amount: f64,
    pub receipt_url: Option<String>,
}

/// At-most-once-per-day key for chat-start emission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DailyChatStartKey {
    pub line: String,
    pub campaign_id: String,
    pub payer: String,
    pub day: NaiveDate,
}

impl DailyChatStartKey {
    pub fn new(event: &ChatStartEvent, at: DateTime<Utc>) -> Self {
        Self {
            line: event.line.clone(),
            campaign_id: event.campaign_id.clone(),
            payer: event.payer.clone(),
            day: at.date_naive(),
        }
    }
}

impl fmt::Display for DailyChatStartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.line,
            self.campaign_id,
            self.payer,
            self.day.format("%Y-%m-%d")
        )
    }
}
