//! DuckDB storage for dedup markers, attribution signals, campaigns and lines.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt, Row, params};
use recibo_core::{AttributionRecord, Campaign, DailyChatStartKey, LineRef, SignalKind};
use tracing::{debug, info};

use crate::{
    AttributionSignals, CampaignDirectory, DedupGate, LineDirectory, PruneStats, StoreError,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processed_messages (
    message_id VARCHAR PRIMARY KEY,
    processed_at_ms BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS chat_start_keys (
    day_key VARCHAR PRIMARY KEY,
    day VARCHAR NOT NULL,
    emitted_at_ms BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS attribution_signals (
    kind VARCHAR NOT NULL,
    campaign_id VARCHAR NOT NULL,
    payer VARCHAR,
    line VARCHAR NOT NULL,
    observed_at_ms BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS campaigns (
    id VARCHAR PRIMARY KEY,
    slug VARCHAR NOT NULL,
    code VARCHAR NOT NULL,
    pixel_id VARCHAR,
    access_token VARCHAR
);
CREATE TABLE IF NOT EXISTS lines (
    external_id VARCHAR PRIMARY KEY,
    canonical_id VARCHAR NOT NULL
);
";

const SIGNAL_COLUMNS: &str = "kind, campaign_id, payer, line, observed_at_ms";
const CAMPAIGN_COLUMNS: &str = "id, slug, code, pixel_id, access_token";

/// DuckDB-backed store for everything the receipt pipeline reads and writes.
///
/// Dedup markers live in primary-keyed tables and are written with
/// `INSERT ... ON CONFLICT DO NOTHING`, so check-and-mark is one statement.
/// All access goes through a single connection behind a mutex, and every
/// async operation runs its query on tokio's blocking pool, so callers can
/// bound it with a timeout.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for storage that survives process restarts (and keeps dedup across them).
pub struct DuckStore {
    conn: Arc<Mutex<Connection>>,
}

/// The three signal lookups the resolver needs.
enum SignalQuery {
    ChatStart { line: String, payer: String },
    PayerChatStart { payer: String },
    Click { line: String, since_ms: i64 },
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), "opened persistent store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&guard)
        })
        .await?
    }

    // ── Counts ──

    /// Number of processed message markers.
    pub fn processed_count(&self) -> Result<usize, StoreError> {
        self.count_table("processed_messages")
    }

    /// Number of emitted daily chat-start keys.
    pub fn chat_start_key_count(&self) -> Result<usize, StoreError> {
        self.count_table("chat_start_keys")
    }

    /// Number of stored attribution signals (chat starts and clicks).
    pub fn signal_count(&self) -> Result<usize, StoreError> {
        self.count_table("attribution_signals")
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT count(*)::BIGINT FROM {table}");
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn latest_signal(
        &self,
        query: SignalQuery,
    ) -> Result<Option<AttributionRecord>, StoreError> {
        self.with_conn(move |conn| {
            let select = format!("SELECT {SIGNAL_COLUMNS} FROM attribution_signals WHERE");
            let order = "ORDER BY observed_at_ms DESC LIMIT 1";
            let raw = match &query {
                SignalQuery::ChatStart { line, payer } => conn.query_row(
                    &format!("{select} kind = 'chat_start' AND line = ? AND payer = ? {order}"),
                    params![line, payer],
                    RawSignal::from_row,
                ),
                SignalQuery::PayerChatStart { payer } => conn.query_row(
                    &format!("{select} kind = 'chat_start' AND payer = ? {order}"),
                    params![payer],
                    RawSignal::from_row,
                ),
                SignalQuery::Click { line, since_ms } => conn.query_row(
                    &format!("{select} kind = 'click' AND line = ? AND observed_at_ms >= ? {order}"),
                    params![line, since_ms],
                    RawSignal::from_row,
                ),
            }
            .optional()?;
            raw.map(RawSignal::into_record).transpose()
        })
        .await
    }

    async fn insert_signal(
        &self,
        kind: SignalKind,
        campaign_id: &str,
        payer: Option<&str>,
        line: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let campaign_id = campaign_id.to_string();
        let payer = payer.map(str::to_string);
        let line = line.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO attribution_signals ({SIGNAL_COLUMNS}) VALUES (?, ?, ?, ?, ?)"
                ),
                params![kind.as_str(), campaign_id, payer, line, at.timestamp_millis()],
            )?;
            debug!(
                kind = kind.as_str(),
                campaign_id = %campaign_id,
                line = %line,
                "recorded attribution signal"
            );
            Ok(())
        })
        .await
    }

    async fn campaign_where(
        &self,
        where_clause: &'static str,
        arg: &str,
    ) -> Result<Option<Campaign>, StoreError> {
        let arg = arg.to_string();
        self.with_conn(move |conn| {
            let sql =
                format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE {where_clause} LIMIT 1");
            Ok(conn.query_row(&sql, [arg], campaign_from_row).optional()?)
        })
        .await
    }
}

/// A signal row before timestamp conversion.
struct RawSignal {
    kind: String,
    campaign_id: String,
    payer: Option<String>,
    line: String,
    observed_at_ms: i64,
}

impl RawSignal {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            kind: row.get(0)?,
            campaign_id: row.get(1)?,
            payer: row.get(2)?,
            line: row.get(3)?,
            observed_at_ms: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<AttributionRecord, StoreError> {
        let observed_at = DateTime::from_timestamp_millis(self.observed_at_ms)
            .ok_or(StoreError::Timestamp(self.observed_at_ms, "observed_at_ms"))?;
        let kind = match self.kind.as_str() {
            "click" => SignalKind::Click,
            _ => SignalKind::ChatStart,
        };
        Ok(AttributionRecord {
            kind,
            campaign_id: self.campaign_id,
            payer: self.payer,
            line: self.line,
            observed_at,
        })
    }
}

fn campaign_from_row(row: &Row<'_>) -> duckdb::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        slug: row.get(1)?,
        code: row.get(2)?,
        pixel_id: row.get(3)?,
        access_token: row.get(4)?,
    })
}

#[async_trait]
impl DedupGate for DuckStore {
    async fn is_processed(&self, message_id: &str) -> Result<bool, StoreError> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM processed_messages WHERE message_id = ?",
                    [message_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn mark_processed(
        &self,
        message_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO processed_messages VALUES (?, ?) ON CONFLICT DO NOTHING",
                params![message_id, at.timestamp_millis()],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn mark_chat_start(
        &self,
        key: &DailyChatStartKey,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let day_key = key.to_string();
        let day = key.day.format("%Y-%m-%d").to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO chat_start_keys VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
                params![day_key, day, at.timestamp_millis()],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<PruneStats, StoreError> {
        let stats = self
            .with_conn(move |conn| {
                let processed_messages = conn.execute(
                    "DELETE FROM processed_messages WHERE processed_at_ms < ?",
                    [cutoff.timestamp_millis()],
                )?;
                let chat_start_keys = conn.execute(
                    "DELETE FROM chat_start_keys WHERE day < ?",
                    [cutoff.date_naive().format("%Y-%m-%d").to_string()],
                )?;
                Ok(PruneStats {
                    processed_messages,
                    chat_start_keys,
                })
            })
            .await?;
        info!(
            processed_messages = stats.processed_messages,
            chat_start_keys = stats.chat_start_keys,
            cutoff = %cutoff,
            "pruned dedup markers"
        );
        Ok(stats)
    }
}

#[async_trait]
impl AttributionSignals for DuckStore {
    async fn latest_chat_start(
        &self,
        line: &str,
        payer: &str,
    ) -> Result<Option<AttributionRecord>, StoreError> {
        self.latest_signal(SignalQuery::ChatStart {
            line: line.to_string(),
            payer: payer.to_string(),
        })
        .await
    }

    async fn latest_chat_start_for_payer(
        &self,
        payer: &str,
    ) -> Result<Option<AttributionRecord>, StoreError> {
        self.latest_signal(SignalQuery::PayerChatStart {
            payer: payer.to_string(),
        })
        .await
    }

    async fn latest_click(
        &self,
        line: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<AttributionRecord>, StoreError> {
        self.latest_signal(SignalQuery::Click {
            line: line.to_string(),
            since_ms: since.timestamp_millis(),
        })
        .await
    }

    async fn record_chat_start(
        &self,
        line: &str,
        payer: &str,
        campaign_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.insert_signal(SignalKind::ChatStart, campaign_id, Some(payer), line, at)
            .await
    }

    async fn record_click(
        &self,
        line: &str,
        campaign_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.insert_signal(SignalKind::Click, campaign_id, None, line, at)
            .await
    }
}

#[async_trait]
impl CampaignDirectory for DuckStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<Campaign>, StoreError> {
        self.campaign_where("code = ?", code).await
    }

    async fn get(&self, id: &str) -> Result<Option<Campaign>, StoreError> {
        self.campaign_where("id = ?", id).await
    }

    async fn all(&self) -> Result<Vec<Campaign>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY code"
            ))?;
            let campaigns = stmt
                .query_map([], campaign_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(campaigns)
        })
        .await
    }

    async fn upsert(&self, campaign: &Campaign) -> Result<(), StoreError> {
        let campaign = campaign.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO campaigns ({CAMPAIGN_COLUMNS}) VALUES (?, ?, ?, ?, ?)"
                ),
                params![
                    campaign.id,
                    campaign.slug,
                    campaign.code,
                    campaign.pixel_id,
                    campaign.access_token
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LineDirectory for DuckStore {
    async fn resolve(&self, line: &LineRef) -> Result<LineRef, StoreError> {
        let LineRef::External(external) = line else {
            return Ok(line.clone());
        };
        let external = external.clone();
        let canonical: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT canonical_id FROM lines WHERE external_id = ?",
                        [external],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(canonical.map_or_else(|| line.clone(), |id| LineRef::parse(&id)))
    }

    async fn register(&self, external_id: &str, canonical: &LineRef) -> Result<(), StoreError> {
        if !canonical.is_canonical() {
            return Err(StoreError::Other(format!(
                "line {canonical} is not a canonical id"
            )));
        }
        let external_id = external_id.to_string();
        let canonical = canonical.as_key();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO lines VALUES (?, ?)",
                params![external_id, canonical],
            )?;
            Ok(())
        })
        .await
    }
}
