//! Feed download
//!
//! Only a `200 OK` response counts as a usable feed. Callers decide what a
//! non-success status means; the orchestrator logs it and loads nothing.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::{EtlError, Result};

const USER_AGENT: &str = concat!("feedlake-etl/", env!("CARGO_PKG_VERSION"));

/// Body and status of one GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFeed {
    pub status: u16,
    pub body: String,
}

impl FetchedFeed {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// GET `url`. Transport failures are errors, HTTP statuses are not.
    async fn fetch(&self, url: &str) -> Result<FetchedFeed>;
}

/// reqwest backed [`FeedFetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EtlError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
        debug!("Fetching {}", url);

        let fetch_error = |e: reqwest::Error| EtlError::Fetch {
            source_url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(fetch_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(fetch_error)?;

        debug!("Fetched {} ({} bytes, status {})", url, body.len(), status);
        Ok(FetchedFeed { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_200_is_success() {
        let feed = |status| FetchedFeed {
            status,
            body: String::new(),
        };
        assert!(feed(200).is_success());
        assert!(!feed(204).is_success());
        assert!(!feed(404).is_success());
        assert!(!feed(503).is_success());
    }
}
