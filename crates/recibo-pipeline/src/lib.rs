//! Per-message processing chain for inbound WhatsApp traffic.
//!
//! Media messages go through text extraction, receipt scoring, attribution,
//! the processed-message gate, receipt upload and conversion emission. Chat
//! texts that carry a campaign code record a chat-start signal and emit the
//! chat webhook once per line, campaign, payer and day.
//!
//! Every collaborator call is bounded by a timeout and every entry point
//! returns an [`Outcome`]; nothing here panics or surfaces a transport error.

pub mod attribution;
pub mod codes;
mod config;
mod error;
mod outcome;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use recibo_ai::{Classifier, ExtractedText, OcrEngine, ReceiptVerdict, read_receipt};
use recibo_core::{
    ChatStartEvent, ConversionEvent, DailyChatStartKey, InboundMessage, MediaKind, MessageKind,
};
use recibo_store::{
    AttributionSignals, CampaignCache, CampaignDirectory, DedupGate, LineDirectory,
};
use recibo_sync::{EventSink, ReceiptUploader, RevenueSink, SyncError};
use tracing::{debug, info, warn};

pub use attribution::{Attribution, AttributionSource, Resolver};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use outcome::{Delivery, EmissionKind, EmissionReport, Outcome, SkipReason};

/// Run `fut` under a timeout, mapping both failure kinds to [`PipelineError`].
pub(crate) async fn bounded<T, E, F>(
    stage: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    PipelineError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Err(PipelineError::Timeout {
            stage,
            after: limit,
        }),
    }
}

/// Everything the pipeline talks to.
pub struct Collaborators {
    pub dedup: Arc<dyn DedupGate>,
    pub signals: Arc<dyn AttributionSignals>,
    pub campaigns: Arc<dyn CampaignDirectory>,
    pub lines: Arc<dyn LineDirectory>,
    pub ocr: Arc<dyn OcrEngine>,
    pub events: Option<Arc<dyn EventSink>>,
    pub revenue: Option<Arc<dyn RevenueSink>>,
    pub uploader: Option<Arc<dyn ReceiptUploader>>,
}

impl Collaborators {
    /// Wire a single store that implements every storage seam, with no sinks.
    pub fn from_store<S>(store: Arc<S>, ocr: Arc<dyn OcrEngine>) -> Self
    where
        S: DedupGate + AttributionSignals + CampaignDirectory + LineDirectory + 'static,
    {
        Self {
            dedup: store.clone(),
            signals: store.clone(),
            campaigns: store.clone(),
            lines: store,
            ocr,
            events: None,
            revenue: None,
            uploader: None,
        }
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn with_revenue(mut self, sink: Arc<dyn RevenueSink>) -> Self {
        self.revenue = Some(sink);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ReceiptUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }
}

pub struct Pipeline {
    dedup: Arc<dyn DedupGate>,
    signals: Arc<dyn AttributionSignals>,
    ocr: Arc<dyn OcrEngine>,
    events: Option<Arc<dyn EventSink>>,
    revenue: Option<Arc<dyn RevenueSink>>,
    uploader: Option<Arc<dyn ReceiptUploader>>,
    codes: CampaignCache,
    resolver: Resolver,
    classifier: Classifier,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
        let Collaborators {
            dedup,
            signals,
            campaigns,
            lines,
            ocr,
            events,
            revenue,
            uploader,
        } = collaborators;
        let codes = CampaignCache::with_reload_interval(
            campaigns.clone(),
            config.code_reload_interval,
        );
        let resolver = Resolver::new(
            signals.clone(),
            campaigns,
            lines,
            config.click_lookback,
            config.call_timeout,
        );
        Self {
            dedup,
            signals,
            ocr,
            events,
            revenue,
            uploader,
            codes,
            resolver,
            classifier: Classifier::new(config.threshold),
            config,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn codes(&self) -> &CampaignCache {
        &self.codes
    }

    /// Dispatch one inbound message.
    pub async fn handle(&self, msg: &InboundMessage) -> Outcome {
        if msg.from_me {
            return Outcome::Skipped(SkipReason::OwnMessage);
        }
        match msg.kind {
            MessageKind::Image | MessageKind::Document => self.handle_media(msg).await,
            MessageKind::Chat => self.handle_text(msg).await,
            MessageKind::Other => Outcome::Skipped(SkipReason::UnsupportedMessage),
        }
    }

    /// Verify, attribute and emit a media receipt.
    pub async fn handle_media(&self, msg: &InboundMessage) -> Outcome {
        if msg.from_me {
            return Outcome::Skipped(SkipReason::OwnMessage);
        }
        match self.process_media(msg).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(message_id = %msg.id, error = %e, "media message failed");
                Outcome::Failed(e)
            }
        }
    }

    /// Record a chat start for a campaign code and emit the daily chat event.
    pub async fn handle_text(&self, msg: &InboundMessage) -> Outcome {
        if msg.from_me {
            return Outcome::Skipped(SkipReason::OwnMessage);
        }
        match self.process_text(msg).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(message_id = %msg.id, error = %e, "chat message failed");
                Outcome::Failed(e)
            }
        }
    }

    async fn process_media(&self, msg: &InboundMessage) -> Result<Outcome, PipelineError> {
        let Some(media) = &msg.media else {
            return Ok(Outcome::Skipped(SkipReason::UnsupportedMedia));
        };
        let kind = media.kind();
        if kind == MediaKind::Unsupported {
            debug!(message_id = %msg.id, mime = %media.mimetype, "unsupported media");
            return Ok(Outcome::Skipped(SkipReason::UnsupportedMedia));
        }

        let t = self.config.call_timeout;
        if bounded("is_processed", t, self.dedup.is_processed(&msg.id)).await? {
            return Ok(Outcome::Skipped(SkipReason::AlreadyProcessed));
        }

        let bytes = media.decode()?;
        let extracted = self.extract(&msg.id, kind, bytes.clone()).await;
        let text = format!("{}\n{}", msg.text(), extracted.text);
        let verdict = self
            .classifier
            .classify_with_amount(&text, extracted.tile_amount);
        info!(
            message_id = %msg.id,
            score = verdict.score,
            amount = ?verdict.amount,
            accepted = verdict.accepted,
            "classified media"
        );
        let Some(amount) = verdict.amount.filter(|_| verdict.accepted) else {
            return Ok(Outcome::Skipped(SkipReason::NotReceipt {
                score: verdict.score,
                amount: verdict.amount,
            }));
        };

        let at = msg.received_at();
        let payer = msg.payer();
        let Some(attribution) = self.resolver.resolve(&msg.line(), payer, at).await else {
            info!(message_id = %msg.id, payer, "receipt not attributable");
            return Ok(Outcome::Skipped(SkipReason::Unattributed));
        };

        if !bounded("mark_processed", t, self.dedup.mark_processed(&msg.id, at)).await? {
            return Ok(Outcome::Skipped(SkipReason::Duplicate));
        }

        let (receipt_url, upload) = self
            .upload(payer, bytes, &media.base_mime(), media.extension(), at)
            .await;

        let event = ConversionEvent {
            campaign_id: attribution.campaign.id.clone(),
            payer: payer.to_string(),
            line: attribution.line.clone(),
            amount,
            receipt_url: receipt_url.clone(),
        };
        let webhook = match &self.events {
            Some(sink) => deliver("conversion_webhook", t, sink.conversion(&event)).await,
            None => Delivery::NotConfigured,
        };
        let revenue = match (&self.revenue, attribution.campaign.pixel_credentials()) {
            (Some(sink), Some(_)) => {
                deliver("purchase", t, sink.purchase(&attribution.campaign, &event, at)).await
            }
            _ => Delivery::NotConfigured,
        };

        info!(
            message_id = %msg.id,
            campaign_id = %event.campaign_id,
            source = attribution.source.as_str(),
            amount,
            webhook = webhook.as_str(),
            revenue = revenue.as_str(),
            "conversion emitted"
        );
        Ok(Outcome::Emitted(Box::new(EmissionReport {
            kind: EmissionKind::Conversion,
            message_id: msg.id.clone(),
            campaign_id: event.campaign_id,
            payer: event.payer,
            line: event.line,
            amount: Some(amount),
            receipt_url,
            attribution: Some(attribution.source),
            verdict: Some(verdict),
            webhook,
            revenue,
            upload,
        })))
    }

    /// OCR or PDF text on a blocking thread, bounded by `ocr_timeout`.
    /// Every failure degrades to empty text.
    async fn extract(&self, message_id: &str, kind: MediaKind, bytes: Vec<u8>) -> ExtractedText {
        let engine = self.ocr.clone();
        let grid = self.config.tile_grid.clone();
        let task =
            tokio::task::spawn_blocking(move || read_receipt(engine.as_ref(), kind, &bytes, &grid));
        match tokio::time::timeout(self.config.ocr_timeout, task).await {
            Ok(Ok(extracted)) => extracted,
            Ok(Err(e)) => {
                warn!(message_id, error = %e, "text extraction task failed");
                ExtractedText::default()
            }
            Err(_) => {
                warn!(
                    message_id,
                    after = ?self.config.ocr_timeout,
                    "text extraction timed out"
                );
                ExtractedText::default()
            }
        }
    }

    async fn upload(
        &self,
        payer: &str,
        bytes: Vec<u8>,
        content_type: &str,
        extension: &str,
        at: DateTime<Utc>,
    ) -> (Option<String>, Delivery) {
        let Some(uploader) = &self.uploader else {
            return (None, Delivery::NotConfigured);
        };
        let result = bounded(
            "upload",
            self.config.call_timeout,
            uploader.upload(payer, bytes, content_type, extension, at),
        )
        .await;
        match result {
            Ok(url) => (Some(url), Delivery::Sent),
            Err(e) => {
                warn!(payer, error = %e, "receipt upload failed");
                (None, Delivery::Failed(e.to_string()))
            }
        }
    }

    async fn process_text(&self, msg: &InboundMessage) -> Result<Outcome, PipelineError> {
        let Some(campaign) = self.find_campaign(msg.text()).await else {
            return Ok(Outcome::Skipped(SkipReason::NoCampaignCode));
        };

        let t = self.config.call_timeout;
        let at = msg.received_at();
        let payer = msg.payer();
        let line = self.resolver.canonical_line(&msg.line()).await?;
        bounded(
            "record_chat_start",
            t,
            self.signals.record_chat_start(&line, payer, &campaign.id, at),
        )
        .await?;

        let event = ChatStartEvent {
            campaign_id: campaign.id.clone(),
            payer: payer.to_string(),
            line,
        };
        let key = DailyChatStartKey::new(&event, at);
        if !bounded("mark_chat_start", t, self.dedup.mark_chat_start(&key, at)).await? {
            debug!(key = %key, "chat start already emitted today");
            return Ok(Outcome::Skipped(SkipReason::ChatAlreadyEmitted));
        }

        let webhook = match &self.events {
            Some(sink) => deliver("chat_webhook", t, sink.chat_started(&event)).await,
            None => Delivery::NotConfigured,
        };
        info!(
            message_id = %msg.id,
            campaign_id = %event.campaign_id,
            line = %event.line,
            webhook = webhook.as_str(),
            "chat start emitted"
        );
        Ok(Outcome::Emitted(Box::new(EmissionReport {
            kind: EmissionKind::ChatStart,
            message_id: msg.id.clone(),
            campaign_id: event.campaign_id,
            payer: event.payer,
            line: event.line,
            amount: None,
            receipt_url: None,
            attribution: None,
            verdict: None,
            webhook,
            revenue: Delivery::NotConfigured,
            upload: Delivery::NotConfigured,
        })))
    }

    async fn find_campaign(&self, body: &str) -> Option<recibo_core::Campaign> {
        for code in codes::candidate_codes(body) {
            match bounded("campaign_code", self.config.call_timeout, self.codes.get(&code)).await {
                Ok(Some(campaign)) => return Some(campaign),
                Ok(None) => {}
                Err(e) => warn!(code = %code, error = %e, "campaign code lookup failed"),
            }
        }
        None
    }

    /// Score text outside the message flow (CLI diagnostics).
    pub fn classify(&self, text: &str) -> ReceiptVerdict {
        self.classifier.classify(text)
    }
}

async fn deliver<F>(stage: &'static str, limit: Duration, fut: F) -> Delivery
where
    F: Future<Output = Result<(), SyncError>>,
{
    match bounded(stage, limit, fut).await {
        Ok(()) => Delivery::Sent,
        Err(e) => {
            warn!(stage, error = %e, "delivery failed");
            Delivery::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests;
