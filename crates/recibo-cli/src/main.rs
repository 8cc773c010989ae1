mod display;

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use recibo_ai::{
    Classifier, DEFAULT_THRESHOLD, OcrEngine, TileGrid, default_engine, read_receipt,
};
use recibo_core::{
    Campaign, InboundMessage, LineRef, MediaKind, best_amount, campaign_code, parse_amount,
    scan_candidates,
};
use recibo_pipeline::{Collaborators, Outcome, Pipeline, PipelineConfig};
use recibo_store::{AttributionSignals, CampaignDirectory, DedupGate, DuckStore, LineDirectory};
use recibo_sync::{CapiClient, StorageClient, WebhookClient};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recibo", version, about = "Receipt verification and revenue attribution")]
struct Cli {
    /// DuckDB database file
    #[arg(long, env = "RECIBO_DB", default_value = "recibo.duckdb", global = true)]
    db: PathBuf,

    /// Tesseract language(s) for OCR
    #[arg(long, env = "RECIBO_OCR_LANG", default_value = "spa+eng", global = true)]
    ocr_lang: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, score and print receipt verdicts for local files
    Scan {
        /// Image or PDF files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Acceptance threshold
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: u32,
    },

    /// Normalise a raw amount and show the best candidate in a text
    Amount {
        /// Raw token or receipt text
        text: String,
    },

    /// Run inbound messages (JSON lines) through the pipeline
    Ingest {
        /// JSONL file; stdin when omitted
        input: Option<PathBuf>,

        /// Messages processed concurrently
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Tenant webhook for chat and conversion events
        #[arg(long, env = "RECIBO_WEBHOOK_URL")]
        webhook_url: Option<String>,

        /// Receipt upload base URL
        #[arg(long, env = "RECIBO_STORAGE_URL")]
        storage_url: Option<String>,

        /// Public base URL for uploaded receipts (defaults to the upload base)
        #[arg(long, env = "RECIBO_PUBLIC_URL")]
        public_url: Option<String>,

        /// Bearer token for receipt uploads
        #[arg(long, env = "RECIBO_STORAGE_TOKEN", hide_env_values = true)]
        storage_token: Option<String>,

        /// Currency sent with purchase events
        #[arg(long, env = "RECIBO_CURRENCY")]
        currency: Option<String>,

        /// Disable the Conversions API even for campaigns with a pixel
        #[arg(long)]
        no_capi: bool,

        /// Per-call timeout in seconds
        #[arg(long, default_value_t = 20)]
        call_timeout: u64,
    },

    /// Drop dedup markers older than the retention window
    Prune {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Write campaigns, lines and clicks into the store
    Seed {
        #[command(subcommand)]
        what: SeedCommand,
    },
}

#[derive(Subcommand)]
enum SeedCommand {
    /// Create or replace a campaign
    Campaign {
        id: String,
        slug: String,
        #[arg(long)]
        pixel_id: Option<String>,
        #[arg(long, env = "RECIBO_PIXEL_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
    },
    /// Map an external line id to a canonical line
    Line { external: String, canonical: String },
    /// Record an ad click routed to a line
    Click {
        line: String,
        campaign_id: String,
        /// Minutes ago the click happened
        #[arg(long, default_value_t = 0)]
        minutes_ago: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Scan { files, threshold } => cmd_scan(&files, threshold, &cli.ocr_lang).await,
        Command::Amount { text } => cmd_amount(&text),
        Command::Ingest {
            input,
            concurrency,
            webhook_url,
            storage_url,
            public_url,
            storage_token,
            currency,
            no_capi,
            call_timeout,
        } => {
            let sinks = Sinks {
                webhook_url,
                storage_url,
                public_url,
                storage_token,
                currency,
                capi: !no_capi,
            };
            let config = PipelineConfig {
                call_timeout: Duration::from_secs(call_timeout),
                ..PipelineConfig::default()
            };
            cmd_ingest(&cli.db, &cli.ocr_lang, input.as_deref(), concurrency, sinks, config).await
        }
        Command::Prune { days } => cmd_prune(&cli.db, days).await,
        Command::Seed { what } => cmd_seed(&cli.db, what).await,
    }
}

// ── scan ──

async fn cmd_scan(files: &[PathBuf], threshold: u32, lang: &str) -> Result<()> {
    let engine = default_engine(lang);
    let classifier = Classifier::new(threshold);
    eprintln!("OCR engine: {}", engine.name());

    for path in files {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let kind = kind_from_path(path);
        if kind == MediaKind::Unsupported {
            eprintln!("Skipping {}: unsupported file type", path.display());
            continue;
        }

        let engine: Arc<dyn OcrEngine> = engine.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            read_receipt(engine.as_ref(), kind, &bytes, &TileGrid::default())
        })
        .await
        .context("text extraction task panicked")?;

        let verdict = classifier.classify_with_amount(&extracted.text, extracted.tile_amount);
        let candidates = scan_candidates(&extracted.text);
        display::print_verdict_card(
            &path.display().to_string(),
            &verdict,
            &candidates,
            extracted.tile_amount,
            &extracted.text,
        );
    }
    Ok(())
}

fn kind_from_path(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => MediaKind::Pdf,
        Some("png" | "jpg" | "jpeg" | "webp") => MediaKind::Image,
        _ => MediaKind::Unsupported,
    }
}

// ── amount ──

fn cmd_amount(text: &str) -> Result<()> {
    println!("  {:<18} {}", "parsed", display::format_amount(parse_amount(text)));
    let best = best_amount(text).map(|c| c.value);
    println!("  {:<18} {}", "best candidate", display::format_amount(best));
    for c in scan_candidates(text) {
        println!("  {:<18} priority {}", display::format_amount(Some(c.value)), c.priority);
    }
    Ok(())
}

// ── ingest ──

struct Sinks {
    webhook_url: Option<String>,
    storage_url: Option<String>,
    public_url: Option<String>,
    storage_token: Option<String>,
    currency: Option<String>,
    capi: bool,
}

#[derive(Default)]
struct Tally {
    emitted: usize,
    skipped: usize,
    failed: usize,
    invalid: usize,
}

async fn cmd_ingest(
    db: &Path,
    lang: &str,
    input: Option<&Path>,
    concurrency: usize,
    sinks: Sinks,
    config: PipelineConfig,
) -> Result<()> {
    let store = Arc::new(open_store(db)?);
    let mut collaborators = Collaborators::from_store(store, default_engine(lang));

    let client = reqwest::Client::builder()
        .timeout(config.call_timeout)
        .build()
        .context("building HTTP client")?;
    if let Some(url) = sinks.webhook_url {
        collaborators = collaborators.with_events(Arc::new(WebhookClient::new(client.clone(), url)));
    } else {
        eprintln!("No webhook URL configured; events will not be delivered");
    }
    if sinks.capi {
        collaborators =
            collaborators.with_revenue(Arc::new(CapiClient::new(client.clone(), sinks.currency)));
    }
    if let Some(upload_base) = sinks.storage_url {
        let public_base = sinks.public_url.unwrap_or_else(|| upload_base.clone());
        collaborators = collaborators.with_uploader(Arc::new(StorageClient::new(
            client,
            upload_base,
            public_base,
            sinks.storage_token,
        )));
    }

    info!(
        db = %db.display(),
        ocr = collaborators.ocr.name(),
        webhook = collaborators.events.is_some(),
        revenue = collaborators.revenue.is_some(),
        upload = collaborators.uploader.is_some(),
        "pipeline configured"
    );
    let pipeline = Pipeline::new(collaborators, config);
    let messages = read_messages(input)?;
    eprintln!("Processing {} messages...", messages.len());

    let mut tally = Tally::default();
    let mut valid = Vec::with_capacity(messages.len());
    for (line_no, parsed) in messages {
        match parsed {
            Ok(msg) => valid.push(msg),
            Err(e) => {
                eprintln!("  line {line_no}: invalid message: {e}");
                tally.invalid += 1;
            }
        }
    }

    let pipeline = &pipeline;
    let mut results = futures::stream::iter(valid.iter())
        .map(|msg| async move { (msg, pipeline.handle(msg).await) })
        .buffer_unordered(concurrency.max(1));
    while let Some((msg, outcome)) = results.next().await {
        display::print_outcome(&msg.id, &outcome);
        match outcome {
            Outcome::Emitted(_) => tally.emitted += 1,
            Outcome::Skipped(_) => tally.skipped += 1,
            Outcome::Failed(_) => tally.failed += 1,
        }
    }

    println!();
    println!("=== Summary ===");
    println!("  {:<18} {}", "emitted", tally.emitted);
    println!("  {:<18} {}", "skipped", tally.skipped);
    println!("  {:<18} {}", "failed", tally.failed);
    if tally.invalid > 0 {
        println!("  {:<18} {}", "invalid", tally.invalid);
    }
    Ok(())
}

type ParsedLine = (usize, Result<InboundMessage, serde_json::Error>);

fn read_messages(input: Option<&Path>) -> Result<Vec<ParsedLine>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.context("reading input")?;
        if line.trim().is_empty() {
            continue;
        }
        out.push((i + 1, serde_json::from_str(&line)));
    }
    Ok(out)
}

// ── prune / seed ──

async fn cmd_prune(db: &Path, days: i64) -> Result<()> {
    if days < 0 {
        bail!("--days must not be negative");
    }
    let store = open_store(db)?;
    let cutoff = Utc::now() - chrono::Duration::days(days);
    let stats = store.prune(cutoff).await?;
    println!("  {:<18} {}", "cutoff", cutoff.to_rfc3339());
    println!("  {:<18} {}", "processed ids", stats.processed_messages);
    println!("  {:<18} {}", "chat start keys", stats.chat_start_keys);
    Ok(())
}

async fn cmd_seed(db: &Path, what: SeedCommand) -> Result<()> {
    let store = open_store(db)?;
    match what {
        SeedCommand::Campaign {
            id,
            slug,
            pixel_id,
            access_token,
        } => {
            let campaign = Campaign {
                code: campaign_code(&slug),
                id,
                slug,
                pixel_id,
                access_token,
            };
            store.upsert(&campaign).await?;
            println!("Campaign {} saved (code {})", campaign.id, campaign.code);
        }
        SeedCommand::Line {
            external,
            canonical,
        } => {
            let line = LineRef::parse(&canonical);
            if !line.is_canonical() {
                bail!("{canonical} is not a canonical line id");
            }
            store.register(&external, &line).await?;
            println!("Line {external} -> {}", line.as_key());
        }
        SeedCommand::Click {
            line,
            campaign_id,
            minutes_ago,
        } => {
            if !store.exists(&campaign_id).await? {
                bail!("unknown campaign {campaign_id}");
            }
            let line = LineRef::parse(&line);
            let canonical = store.resolve(&line).await?.as_key();
            let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
            store.record_click(&canonical, &campaign_id, at).await?;
            println!("Click on {canonical} for {campaign_id} at {}", at.to_rfc3339());
        }
    }
    Ok(())
}

fn open_store(path: &Path) -> Result<DuckStore> {
    DuckStore::open_persistent(path).with_context(|| format!("opening {}", path.display()))
}
