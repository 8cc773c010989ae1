use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::TimeZone;
use image::{DynamicImage, GrayImage, Luma};
use recibo_ai::{OcrError, OcrParams, PageSegMode};
use recibo_core::{Campaign, MediaPayload};
use recibo_store::{DuckStore, PruneStats, StoreError};

use super::*;

const LINE: &str = "6f1c2b1e-8a4d-4c3e-9b2f-0a1b2c3d4e5f";
const PAYER: &str = "5491122334455";
const RECEIPT_TEXT: &str =
    "Mercado Pago\nTransferencia enviada\n$ 15.000\nComprobante N\u{00BA} 123456";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap()
}

/// Whole-image OCR returns `page`; tile OCR returns `tile`.
struct FakeOcr {
    page: String,
    tile: String,
}

impl OcrEngine for FakeOcr {
    fn name(&self) -> &str {
        "fake"
    }

    fn recognize(&self, _image: &DynamicImage, params: &OcrParams) -> Result<String, OcrError> {
        Ok(match params.segmentation {
            PageSegMode::Auto => self.page.clone(),
            _ => self.tile.clone(),
        })
    }
}

#[derive(Default)]
struct Recorder {
    chats: Mutex<Vec<ChatStartEvent>>,
    conversions: Mutex<Vec<ConversionEvent>>,
    purchases: Mutex<Vec<(String, f64)>>,
    uploads: Mutex<Vec<(String, String)>>,
    fail_uploads: bool,
    webhook_delay: Option<Duration>,
}

#[async_trait]
impl EventSink for Recorder {
    async fn chat_started(&self, event: &ChatStartEvent) -> Result<(), SyncError> {
        self.chats.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn conversion(&self, event: &ConversionEvent) -> Result<(), SyncError> {
        if let Some(delay) = self.webhook_delay {
            tokio::time::sleep(delay).await;
        }
        self.conversions.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl RevenueSink for Recorder {
    async fn purchase(
        &self,
        campaign: &Campaign,
        event: &ConversionEvent,
        _at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.purchases
            .lock()
            .unwrap()
            .push((campaign.id.clone(), event.amount));
        Ok(())
    }
}

#[async_trait]
impl ReceiptUploader for Recorder {
    async fn upload(
        &self,
        payer: &str,
        _bytes: Vec<u8>,
        content_type: &str,
        extension: &str,
        at: DateTime<Utc>,
    ) -> Result<String, SyncError> {
        if self.fail_uploads {
            return Err(SyncError::Server {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.uploads
            .lock()
            .unwrap()
            .push((payer.to_string(), content_type.to_string()));
        Ok(format!(
            "https://cdn.test/{payer}/{}.{extension}",
            at.timestamp_millis()
        ))
    }
}

struct Harness {
    store: Arc<DuckStore>,
    sink: Arc<Recorder>,
    pipeline: Pipeline,
}

async fn harness_with(ocr: FakeOcr, sink: Recorder, config: PipelineConfig) -> Harness {
    let store = Arc::new(DuckStore::open().unwrap());
    store
        .upsert(&Campaign {
            id: "A".into(),
            slug: "promo-a".into(),
            code: "PROMOA".into(),
            pixel_id: Some("px-a".into()),
            access_token: Some("tok-a".into()),
        })
        .await
        .unwrap();
    store
        .upsert(&Campaign {
            id: "B".into(),
            slug: "promo-b".into(),
            code: "PROMOB".into(),
            pixel_id: None,
            access_token: None,
        })
        .await
        .unwrap();

    let sink = Arc::new(sink);
    let collaborators = Collaborators::from_store(store.clone(), Arc::new(ocr))
        .with_events(sink.clone())
        .with_revenue(sink.clone())
        .with_uploader(sink.clone());
    Harness {
        store,
        sink,
        pipeline: Pipeline::new(collaborators, config),
    }
}

async fn harness(page: &str) -> Harness {
    harness_with(
        FakeOcr {
            page: page.into(),
            tile: String::new(),
        },
        Recorder::default(),
        PipelineConfig::default(),
    )
    .await
}

fn png_b64() -> String {
    let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 80, Luma([255])));
    BASE64_STANDARD.encode(recibo_ai::ocr::encode_png(&img).unwrap())
}

fn media_msg(id: &str, caption: &str) -> InboundMessage {
    InboundMessage {
        id: id.into(),
        from: format!("{PAYER}@c.us"),
        from_me: false,
        kind: MessageKind::Image,
        body: Some(caption.into()),
        line_id: LINE.into(),
        timestamp: Some(now().timestamp()),
        media: Some(MediaPayload {
            data: png_b64(),
            mimetype: "image/png".into(),
        }),
    }
}

fn chat_msg(id: &str, body: &str, at: DateTime<Utc>) -> InboundMessage {
    InboundMessage {
        id: id.into(),
        from: format!("{PAYER}@c.us"),
        from_me: false,
        kind: MessageKind::Chat,
        body: Some(body.into()),
        line_id: LINE.into(),
        timestamp: Some(at.timestamp()),
        media: None,
    }
}

// ── Conversions ──

#[tokio::test]
async fn receipt_after_recent_click_is_emitted() {
    let h = harness(RECEIPT_TEXT).await;
    h.store
        .record_click(LINE, "A", now() - chrono::Duration::minutes(30))
        .await
        .unwrap();

    let outcome = h.pipeline.handle(&media_msg("m1", "")).await;
    let report = outcome.report().expect("emitted");
    assert_eq!(report.kind, EmissionKind::Conversion);
    assert_eq!(report.campaign_id, "A");
    assert_eq!(report.amount, Some(15_000.0));
    assert_eq!(report.attribution, Some(AttributionSource::Click));
    assert_eq!(report.webhook, Delivery::Sent);
    assert_eq!(report.revenue, Delivery::Sent);
    assert_eq!(report.upload, Delivery::Sent);
    assert!(report.receipt_url.as_deref().unwrap().ends_with(".png"));
    let verdict = report.verdict.as_ref().unwrap();
    assert_eq!(verdict.provider.as_deref(), Some("Mercado Pago"));

    let conversions = h.sink.conversions.lock().unwrap();
    assert_eq!(conversions.len(), 1);
    assert_eq!(conversions[0].payer, PAYER);
    assert_eq!(conversions[0].line, LINE);
    assert_eq!(conversions[0].receipt_url, report.receipt_url);
    assert_eq!(
        *h.sink.purchases.lock().unwrap(),
        vec![("A".to_string(), 15_000.0)]
    );
    assert_eq!(
        *h.sink.uploads.lock().unwrap(),
        vec![(PAYER.to_string(), "image/png".to_string())]
    );
}

#[tokio::test]
async fn same_message_twice_emits_once() {
    let h = harness(RECEIPT_TEXT).await;
    h.store.record_click(LINE, "A", now()).await.unwrap();
    let msg = media_msg("m1", "");

    assert!(h.pipeline.handle(&msg).await.is_emitted());
    let second = h.pipeline.handle(&msg).await;
    assert_eq!(second.skip_reason(), Some(&SkipReason::AlreadyProcessed));
    assert_eq!(h.sink.conversions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_duplicates_emit_once() {
    let h = harness(RECEIPT_TEXT).await;
    h.store.record_click(LINE, "A", now()).await.unwrap();
    let msg = media_msg("m1", "");

    let (a, b) = tokio::join!(h.pipeline.handle(&msg), h.pipeline.handle(&msg));
    let emitted = [&a, &b].iter().filter(|o| o.is_emitted()).count();
    assert_eq!(emitted, 1);
    let skipped = [&a, &b]
        .into_iter()
        .find_map(|o| o.skip_reason().cloned())
        .unwrap();
    assert!(matches!(
        skipped,
        SkipReason::Duplicate | SkipReason::AlreadyProcessed
    ));
    assert_eq!(h.sink.conversions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unattributed_receipt_is_not_emitted() {
    let h = harness(RECEIPT_TEXT).await;
    let outcome = h.pipeline.handle(&media_msg("m1", "")).await;
    assert_eq!(outcome.skip_reason(), Some(&SkipReason::Unattributed));
    assert!(h.sink.conversions.lock().unwrap().is_empty());
    assert!(h.sink.uploads.lock().unwrap().is_empty());
    // Not marked, so a later attribution signal can still pick it up.
    assert!(!h.store.is_processed("m1").await.unwrap());
}

#[tokio::test]
async fn non_receipt_is_skipped() {
    let h = harness("hola, te mando la foto del perro").await;
    h.store.record_click(LINE, "A", now()).await.unwrap();
    let outcome = h.pipeline.handle(&media_msg("m1", "")).await;
    assert!(matches!(
        outcome.skip_reason(),
        Some(SkipReason::NotReceipt { amount: None, .. })
    ));
    assert!(h.sink.conversions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn caption_alone_can_carry_the_receipt() {
    let h = harness("").await;
    h.store.record_click(LINE, "A", now()).await.unwrap();
    let caption = "Mercado Pago \u{2014} Transferencia enviada $ 15.000, comprobante N\u{00BA} 123456";
    let outcome = h.pipeline.handle(&media_msg("m1", caption)).await;
    assert_eq!(outcome.report().unwrap().amount, Some(15_000.0));
}

#[tokio::test]
async fn tiles_supply_missing_amount() {
    let h = harness_with(
        FakeOcr {
            page: "Mercado Pago\nComprobante de transferencia".into(),
            tile: "$12.500".into(),
        },
        Recorder::default(),
        PipelineConfig::default(),
    )
    .await;
    h.store.record_click(LINE, "A", now()).await.unwrap();

    let outcome = h.pipeline.handle(&media_msg("m1", "")).await;
    assert_eq!(outcome.report().unwrap().amount, Some(12_500.0));
}

#[tokio::test]
async fn chat_start_attribution_without_pixel() {
    let h = harness(RECEIPT_TEXT).await;
    h.store
        .record_chat_start(LINE, PAYER, "B", now() - chrono::Duration::days(2))
        .await
        .unwrap();
    h.store.record_click(LINE, "A", now()).await.unwrap();

    let outcome = h.pipeline.handle(&media_msg("m1", "")).await;
    let report = outcome.report().unwrap();
    assert_eq!(report.campaign_id, "B");
    assert_eq!(report.attribution, Some(AttributionSource::ChatStart));
    assert_eq!(report.revenue, Delivery::NotConfigured);
    assert!(h.sink.purchases.lock().unwrap().is_empty());
}

#[tokio::test]
async fn upload_failure_still_emits() {
    let h = harness_with(
        FakeOcr {
            page: RECEIPT_TEXT.into(),
            tile: String::new(),
        },
        Recorder {
            fail_uploads: true,
            ..Recorder::default()
        },
        PipelineConfig::default(),
    )
    .await;
    h.store.record_click(LINE, "A", now()).await.unwrap();

    let outcome = h.pipeline.handle(&media_msg("m1", "")).await;
    let report = outcome.report().unwrap();
    assert!(matches!(report.upload, Delivery::Failed(_)));
    assert_eq!(report.receipt_url, None);
    assert_eq!(report.webhook, Delivery::Sent);
    assert_eq!(h.sink.conversions.lock().unwrap()[0].receipt_url, None);
    assert!(h.store.is_processed("m1").await.unwrap());
}

#[tokio::test]
async fn slow_webhook_times_out_but_message_stays_processed() {
    let config = PipelineConfig {
        call_timeout: Duration::from_millis(200),
        ..PipelineConfig::default()
    };
    let h = harness_with(
        FakeOcr {
            page: RECEIPT_TEXT.into(),
            tile: String::new(),
        },
        Recorder {
            webhook_delay: Some(Duration::from_secs(5)),
            ..Recorder::default()
        },
        config,
    )
    .await;
    h.store.record_click(LINE, "A", now()).await.unwrap();

    let outcome = h.pipeline.handle(&media_msg("m1", "")).await;
    let report = outcome.report().unwrap();
    match &report.webhook {
        Delivery::Failed(reason) => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(report.revenue, Delivery::Sent);
    assert!(h.store.is_processed("m1").await.unwrap());
}

#[tokio::test]
async fn own_and_unsupported_messages_skipped() {
    let h = harness(RECEIPT_TEXT).await;

    let mut own = media_msg("m1", "");
    own.from_me = true;
    assert_eq!(
        h.pipeline.handle(&own).await.skip_reason(),
        Some(&SkipReason::OwnMessage)
    );

    let mut audio = media_msg("m2", "");
    audio.media = Some(MediaPayload {
        data: "aGVsbG8=".into(),
        mimetype: "audio/ogg; codecs=opus".into(),
    });
    assert_eq!(
        h.pipeline.handle(&audio).await.skip_reason(),
        Some(&SkipReason::UnsupportedMedia)
    );

    let mut sticker = chat_msg("m3", "PROMOA", now());
    sticker.kind = MessageKind::Other;
    assert_eq!(
        h.pipeline.handle(&sticker).await.skip_reason(),
        Some(&SkipReason::UnsupportedMessage)
    );
}

/// Dedup gate whose lookups block a pool thread well past any sane timeout.
struct StalledDedup;

impl StalledDedup {
    async fn stall() -> Result<(), StoreError> {
        tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(1))).await?;
        Ok(())
    }
}

#[async_trait]
impl DedupGate for StalledDedup {
    async fn is_processed(&self, _message_id: &str) -> Result<bool, StoreError> {
        Self::stall().await?;
        Ok(false)
    }

    async fn mark_processed(
        &self,
        _message_id: &str,
        _at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Self::stall().await?;
        Ok(true)
    }

    async fn mark_chat_start(
        &self,
        _key: &DailyChatStartKey,
        _at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Self::stall().await?;
        Ok(true)
    }

    async fn prune(&self, _cutoff: DateTime<Utc>) -> Result<PruneStats, StoreError> {
        Ok(PruneStats::default())
    }
}

#[tokio::test]
async fn bounded_times_out_blocking_store_call() {
    let result = bounded(
        "is_processed",
        Duration::from_millis(50),
        StalledDedup.is_processed("m1"),
    )
    .await;
    assert!(matches!(
        result,
        Err(PipelineError::Timeout {
            stage: "is_processed",
            ..
        })
    ));
}

#[tokio::test]
async fn stalled_dedup_fails_the_message() {
    let config = PipelineConfig {
        call_timeout: Duration::from_millis(100),
        ..PipelineConfig::default()
    };
    let h = harness_with(
        FakeOcr {
            page: RECEIPT_TEXT.into(),
            tile: String::new(),
        },
        Recorder::default(),
        config.clone(),
    )
    .await;
    let mut collaborators = Collaborators::from_store(
        h.store.clone(),
        Arc::new(FakeOcr {
            page: RECEIPT_TEXT.into(),
            tile: String::new(),
        }),
    )
    .with_events(h.sink.clone());
    collaborators.dedup = Arc::new(StalledDedup);
    let pipeline = Pipeline::new(collaborators, config);

    let outcome = pipeline.handle(&media_msg("m1", "")).await;
    assert!(matches!(
        outcome,
        Outcome::Failed(PipelineError::Timeout {
            stage: "is_processed",
            ..
        })
    ));
    assert!(h.sink.conversions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_media_fails() {
    let h = harness(RECEIPT_TEXT).await;
    let mut msg = media_msg("m1", "");
    msg.media = Some(MediaPayload {
        data: "%%%".into(),
        mimetype: "image/png".into(),
    });
    assert!(matches!(
        h.pipeline.handle(&msg).await,
        Outcome::Failed(PipelineError::Media(_))
    ));
}

// ── Chat starts ──

#[tokio::test]
async fn chat_start_once_per_day() {
    let h = harness("").await;
    let day1 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

    let first = h.pipeline.handle(&chat_msg("c1", "Hola! PROMOA", day1)).await;
    let report = first.report().expect("emitted");
    assert_eq!(report.kind, EmissionKind::ChatStart);
    assert_eq!(report.campaign_id, "A");
    assert_eq!(report.webhook, Delivery::Sent);

    let later = h
        .pipeline
        .handle(&chat_msg("c2", "promo-a", day1 + chrono::Duration::hours(9)))
        .await;
    assert_eq!(later.skip_reason(), Some(&SkipReason::ChatAlreadyEmitted));

    let next_day = h
        .pipeline
        .handle(&chat_msg("c3", "PROMOA", day1 + chrono::Duration::days(1)))
        .await;
    assert!(next_day.is_emitted());

    assert_eq!(h.sink.chats.lock().unwrap().len(), 2);
    // Every chat start is recorded as a signal, emitted or not.
    assert_eq!(h.store.signal_count().unwrap(), 3);
}

#[tokio::test]
async fn chat_without_code_is_skipped() {
    let h = harness("").await;
    let outcome = h.pipeline.handle(&chat_msg("c1", "hola, precio?", now())).await;
    assert_eq!(outcome.skip_reason(), Some(&SkipReason::NoCampaignCode));
    assert_eq!(h.store.signal_count().unwrap(), 0);
}

#[tokio::test]
async fn chat_start_then_receipt_on_rotated_line() {
    let h = harness(RECEIPT_TEXT).await;
    let other_line = "0b6d3c1a-1111-4e2f-8a9b-123456789abc";
    let mut chat = chat_msg("c1", "PROMOB", now() - chrono::Duration::hours(3));
    chat.line_id = other_line.into();
    assert!(h.pipeline.handle(&chat).await.is_emitted());

    let outcome = h.pipeline.handle(&media_msg("m1", "")).await;
    let report = outcome.report().unwrap();
    assert_eq!(report.campaign_id, "B");
    assert_eq!(report.attribution, Some(AttributionSource::PayerChatStart));
    assert_eq!(report.line, LINE);
}

#[tokio::test]
async fn new_campaign_found_after_reload() {
    let config = PipelineConfig {
        code_reload_interval: Duration::ZERO,
        ..PipelineConfig::default()
    };
    let h = harness_with(
        FakeOcr {
            page: String::new(),
            tile: String::new(),
        },
        Recorder::default(),
        config,
    )
    .await;
    assert!(!h.pipeline.handle(&chat_msg("c1", "NUEVA", now())).await.is_emitted());

    h.store
        .upsert(&Campaign {
            id: "N".into(),
            slug: "nueva".into(),
            code: "NUEVA".into(),
            pixel_id: None,
            access_token: None,
        })
        .await
        .unwrap();
    let outcome = h.pipeline.handle(&chat_msg("c2", "NUEVA", now())).await;
    assert_eq!(outcome.report().unwrap().campaign_id, "N");
}
