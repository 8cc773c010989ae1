use std::time::Duration;

use recibo_ai::TileGrid;
use recibo_ai::classifier::DEFAULT_THRESHOLD;
use recibo_store::cache::DEFAULT_MIN_RELOAD_INTERVAL;

/// Tunables for [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on every store, upload and webhook call.
    pub call_timeout: Duration,
    /// Bound on text extraction (OCR, tiles, PDF) for one message.
    pub ocr_timeout: Duration,
    /// How far back a click on the receiving line can attribute a receipt.
    pub click_lookback: chrono::Duration,
    /// Minimum classifier score for a receipt.
    pub threshold: u32,
    pub tile_grid: TileGrid,
    /// Campaign code cache: minimum gap between reloads triggered by misses.
    pub code_reload_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(20),
            ocr_timeout: Duration::from_secs(60),
            click_lookback: chrono::Duration::minutes(120),
            threshold: DEFAULT_THRESHOLD,
            tile_grid: TileGrid::default(),
            code_reload_interval: DEFAULT_MIN_RELOAD_INTERVAL,
        }
    }
}
