use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("invalid timestamp {0} in column {1}")]
    Timestamp(i64, &'static str),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("connection mutex poisoned: {0}")]
    Poisoned(String),

    #[error("{0}")]
    Other(String),
}
