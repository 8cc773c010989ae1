use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport failure. The request URL is stripped, since CAPI URLs carry
    /// the pixel access token in their query string.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}
