use crate::models::{Period, Segment};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("invalid ranking URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] duckdb::Error),

    #[error("could not prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("replace batch spans more than one (period, segment) partition")]
    MixedPartition,
}

/// Everything that can fail a single pipeline run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),

    #[error("a scrape for {period}/{segment} is already in flight")]
    AlreadyRunning { period: Period, segment: Segment },
}
