//! Core receipt types, amount normalisation and candidate scanning.

pub mod amount;
pub mod line;
pub mod message;
pub mod scan;

pub use amount::parse_amount;
pub use line::LineRef;
pub use message::{
    AttributionRecord, Campaign, ChatStartEvent, ConversionEvent, DailyChatStartKey,
    InboundMessage, MediaError, MediaKind, MediaPayload, MessageKind, SignalKind, campaign_code,
    phone_digits,
};
pub use scan::{AmountCandidate, best_amount, first_amount, has_grouping, scan_candidates};
