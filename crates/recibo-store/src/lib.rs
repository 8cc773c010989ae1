//! Storage layer: dedup markers, attribution signals, campaigns and lines.

pub mod cache;
mod error;
mod traits;

pub use cache::CampaignCache;
pub use error::StoreError;
pub use traits::{AttributionSignals, CampaignDirectory, DedupGate, LineDirectory, PruneStats};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
