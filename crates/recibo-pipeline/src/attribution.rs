//! Campaign attribution for a verified receipt.
//!
//! Nothing links a payer to a campaign at receipt time, so the resolver walks
//! the stored signals from most to least specific:
//!
//! 1. latest chat start for (line, payer),
//! 2. latest chat start for the payer on any line (rotating numbers),
//! 3. latest click routed to the line within the lookback window.
//!
//! Signals are keyed by canonical line id, so the inbound line is resolved
//! first. A hit whose campaign no longer exists is a miss, and store failures
//! degrade to a miss.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use recibo_core::{AttributionRecord, Campaign, LineRef};
use recibo_store::{AttributionSignals, CampaignDirectory, LineDirectory};
use tracing::{debug, warn};

use crate::{PipelineError, bounded};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionSource {
    ChatStart,
    PayerChatStart,
    Click,
}

impl AttributionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatStart => "chat_start",
            Self::PayerChatStart => "payer_chat_start",
            Self::Click => "click",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub campaign: Campaign,
    /// Canonical line id.
    pub line: String,
    pub source: AttributionSource,
}

pub struct Resolver {
    signals: Arc<dyn AttributionSignals>,
    campaigns: Arc<dyn CampaignDirectory>,
    lines: Arc<dyn LineDirectory>,
    click_lookback: chrono::Duration,
    call_timeout: Duration,
}

impl Resolver {
    pub fn new(
        signals: Arc<dyn AttributionSignals>,
        campaigns: Arc<dyn CampaignDirectory>,
        lines: Arc<dyn LineDirectory>,
        click_lookback: chrono::Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            signals,
            campaigns,
            lines,
            click_lookback,
            call_timeout,
        }
    }

    /// Canonical key for a line; unknown external ids pass through unchanged.
    pub async fn canonical_line(&self, line: &LineRef) -> Result<String, PipelineError> {
        let resolved = bounded("resolve_line", self.call_timeout, self.lines.resolve(line)).await?;
        Ok(resolved.as_key())
    }

    pub async fn resolve(
        &self,
        line: &LineRef,
        payer: &str,
        now: DateTime<Utc>,
    ) -> Option<Attribution> {
        match self.try_resolve(line, payer, now).await {
            Ok(found) => found,
            Err(e) => {
                warn!(line = %line, payer, error = %e, "attribution lookup failed");
                None
            }
        }
    }

    async fn try_resolve(
        &self,
        line: &LineRef,
        payer: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Attribution>, PipelineError> {
        let line = self.canonical_line(line).await?;
        let Some((record, source)) = self.latest_signal(&line, payer, now).await? else {
            debug!(line = %line, payer, "no attribution signal");
            return Ok(None);
        };

        let campaign = bounded(
            "campaign_lookup",
            self.call_timeout,
            self.campaigns.get(&record.campaign_id),
        )
        .await?;
        let Some(campaign) = campaign else {
            warn!(
                campaign_id = %record.campaign_id,
                source = source.as_str(),
                "attributed campaign no longer exists"
            );
            return Ok(None);
        };

        debug!(
            campaign_id = %campaign.id,
            source = source.as_str(),
            line = %line,
            "attributed"
        );
        Ok(Some(Attribution {
            campaign,
            line,
            source,
        }))
    }

    async fn latest_signal(
        &self,
        line: &str,
        payer: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(AttributionRecord, AttributionSource)>, PipelineError> {
        let t = self.call_timeout;
        if let Some(r) = bounded("chat_start", t, self.signals.latest_chat_start(line, payer)).await? {
            return Ok(Some((r, AttributionSource::ChatStart)));
        }
        if let Some(r) = bounded(
            "payer_chat_start",
            t,
            self.signals.latest_chat_start_for_payer(payer),
        )
        .await?
        {
            return Ok(Some((r, AttributionSource::PayerChatStart)));
        }
        let since = now - self.click_lookback;
        if let Some(r) = bounded("click", t, self.signals.latest_click(line, since)).await? {
            return Ok(Some((r, AttributionSource::Click)));
        }
        Ok(None)
    }
}
