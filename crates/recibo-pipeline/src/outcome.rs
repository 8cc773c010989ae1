//! Structured result of handling one inbound message.

use std::fmt;

use recibo_ai::ReceiptVerdict;

use crate::PipelineError;
use crate::attribution::AttributionSource;

#[derive(Debug)]
pub enum Outcome {
    Emitted(Box<EmissionReport>),
    Skipped(SkipReason),
    Failed(PipelineError),
}

impl Outcome {
    pub fn is_emitted(&self) -> bool {
        matches!(self, Self::Emitted(_))
    }

    pub fn report(&self) -> Option<&EmissionReport> {
        match self {
            Self::Emitted(report) => Some(report),
            _ => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Sent by the line itself.
    OwnMessage,
    /// Neither a media message nor a chat text.
    UnsupportedMessage,
    /// Media that is neither an image nor a PDF, or missing entirely.
    UnsupportedMedia,
    /// Message id already carries a processed marker.
    AlreadyProcessed,
    /// Classifier rejected the message.
    NotReceipt { score: u32, amount: Option<f64> },
    /// No chat start or recent click, or the campaign no longer exists.
    Unattributed,
    /// Another handler marked the same message first.
    Duplicate,
    /// Chat text names no known campaign code.
    NoCampaignCode,
    /// Chat start already emitted today for this line, campaign and payer.
    ChatAlreadyEmitted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OwnMessage => "own_message",
            Self::UnsupportedMessage => "unsupported_message",
            Self::UnsupportedMedia => "unsupported_media",
            Self::AlreadyProcessed => "already_processed",
            Self::NotReceipt { .. } => "not_receipt",
            Self::Unattributed => "unattributed",
            Self::Duplicate => "duplicate",
            Self::NoCampaignCode => "no_campaign_code",
            Self::ChatAlreadyEmitted => "chat_already_emitted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReceipt { score, .. } => write!(f, "not_receipt (score {score})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionKind {
    ChatStart,
    Conversion,
}

/// Result of one best-effort outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Sent,
    /// No sink configured, or the campaign lacks credentials for it.
    NotConfigured,
    Failed(String),
}

impl Delivery {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sent => "sent",
            Self::NotConfigured => "not_configured",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmissionReport {
    pub kind: EmissionKind,
    pub message_id: String,
    pub campaign_id: String,
    pub payer: String,
    /// Canonical line id.
    pub line: String,
    pub amount: Option<f64>,
    pub receipt_url: Option<String>,
    pub attribution: Option<AttributionSource>,
    pub verdict: Option<ReceiptVerdict>,
    pub webhook: Delivery,
    pub revenue: Delivery,
    pub upload: Delivery,
}
