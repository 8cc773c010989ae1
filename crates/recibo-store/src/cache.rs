//! In-process campaign code cache.
//!
//! Chat-start resolution runs on every inbound text message, so codes are served
//! from memory. The table is loaded on first use and reloaded when a lookup misses,
//! at most once per `min_reload_interval`, so new campaigns appear without a
//! restart while a stream of junk codes cannot hammer the directory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use recibo_core::Campaign;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{CampaignDirectory, StoreError};

pub const DEFAULT_MIN_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct CacheState {
    by_code: HashMap<String, Campaign>,
    loaded_at: Option<Instant>,
}

pub struct CampaignCache {
    directory: Arc<dyn CampaignDirectory>,
    min_reload_interval: Duration,
    state: RwLock<CacheState>,
}

impl CampaignCache {
    pub fn new(directory: Arc<dyn CampaignDirectory>) -> Self {
        Self::with_reload_interval(directory, DEFAULT_MIN_RELOAD_INTERVAL)
    }

    pub fn with_reload_interval(
        directory: Arc<dyn CampaignDirectory>,
        min_reload_interval: Duration,
    ) -> Self {
        Self {
            directory,
            min_reload_interval,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Campaign for an attribution code, reloading the table on a miss.
    pub async fn get(&self, code: &str) -> Result<Option<Campaign>, StoreError> {
        {
            let state = self.state.read().await;
            if let Some(campaign) = state.by_code.get(code) {
                return Ok(Some(campaign.clone()));
            }
            if !self.reload_due(&state) {
                return Ok(None);
            }
        }

        let mut state = self.state.write().await;
        // Another task may have reloaded while we waited for the write lock.
        if self.reload_due(&state) {
            let campaigns = self.directory.all().await?;
            state.by_code = campaigns
                .into_iter()
                .map(|c| (c.code.clone(), c))
                .collect();
            state.loaded_at = Some(Instant::now());
            debug!(campaigns = state.by_code.len(), "reloaded campaign codes");
        }
        Ok(state.by_code.get(code).cloned())
    }

    /// Forget the loaded table; the next lookup reloads unconditionally.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        *state = CacheState::default();
    }

    fn reload_due(&self, state: &CacheState) -> bool {
        match state.loaded_at {
            None => true,
            Some(at) => at.elapsed() >= self.min_reload_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct CountingDirectory {
        campaigns: Mutex<Vec<Campaign>>,
        loads: AtomicUsize,
    }

    impl CountingDirectory {
        fn add(&self, id: &str, slug: &str) {
            self.campaigns.lock().unwrap().push(Campaign {
                id: id.into(),
                slug: slug.into(),
                code: recibo_core::campaign_code(slug),
                pixel_id: None,
                access_token: None,
            });
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CampaignDirectory for CountingDirectory {
        async fn find_by_code(&self, code: &str) -> Result<Option<Campaign>, StoreError> {
            Ok(self.campaigns.lock().unwrap().iter().find(|c| c.code == code).cloned())
        }

        async fn get(&self, id: &str) -> Result<Option<Campaign>, StoreError> {
            Ok(self.campaigns.lock().unwrap().iter().find(|c| c.id == id).cloned())
        }

        async fn all(&self) -> Result<Vec<Campaign>, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.campaigns.lock().unwrap().clone())
        }

        async fn upsert(&self, campaign: &Campaign) -> Result<(), StoreError> {
            self.campaigns.lock().unwrap().push(campaign.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn loads_once_and_serves_hits() {
        let dir = Arc::new(CountingDirectory::default());
        dir.add("c1", "promo-verano");
        let cache = CampaignCache::new(dir.clone());

        assert_eq!(cache.get("PROMOVERANO").await.unwrap().unwrap().id, "c1");
        assert_eq!(cache.get("PROMOVERANO").await.unwrap().unwrap().id, "c1");
        assert_eq!(dir.loads(), 1);
    }

    #[tokio::test]
    async fn miss_reload_is_rate_limited() {
        let dir = Arc::new(CountingDirectory::default());
        dir.add("c1", "promo");
        let cache = CampaignCache::with_reload_interval(dir.clone(), Duration::from_secs(3600));

        assert!(cache.get("PROMO").await.unwrap().is_some());
        dir.add("c2", "nueva");
        // Within the interval the miss does not reach the directory.
        assert!(cache.get("NUEVA").await.unwrap().is_none());
        assert!(cache.get("BASURA").await.unwrap().is_none());
        assert_eq!(dir.loads(), 1);

        cache.invalidate().await;
        assert_eq!(cache.get("NUEVA").await.unwrap().unwrap().id, "c2");
        assert_eq!(dir.loads(), 2);
    }

    #[tokio::test]
    async fn miss_reloads_after_interval() {
        let dir = Arc::new(CountingDirectory::default());
        let cache = CampaignCache::with_reload_interval(dir.clone(), Duration::ZERO);

        assert!(cache.get("LATER").await.unwrap().is_none());
        dir.add("c9", "later");
        assert_eq!(cache.get("LATER").await.unwrap().unwrap().id, "c9");
        assert_eq!(dir.loads(), 2);
    }
}
