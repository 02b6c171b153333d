use crate::types::{Chain, ChainsApiResponse};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const BACKOFF_CAP_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid API response format")]
    InvalidResponse,

    #[error("failed to fetch chains after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Source of chain batches, one fallible call per scan cycle.
#[async_trait]
pub trait ChainFetcher: Send + Sync {
    async fn fetch_with_retry(&self) -> Result<Vec<Chain>, FetchError>;
}

/// HTTP client for the chain inventory API.
pub struct ApiClient {
    client: Client,
    url: Url,
    max_retries: u32,
}

impl ApiClient {
    pub fn new(url: Url) -> Result<Self, FetchError> {
        Self::with_max_retries(url, DEFAULT_MAX_RETRIES)
    }

    pub fn with_max_retries(url: Url, max_retries: u32) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            url,
            max_retries,
        })
    }

    /// One fetch attempt. A well-formed but undecodable body is
    /// [`FetchError::InvalidResponse`] rather than an HTTP error.
    pub async fn fetch_chains(&self) -> Result<Vec<Chain>, FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;

        let body: ChainsApiResponse = response
            .json()
            .await
            .map_err(|_| FetchError::InvalidResponse)?;

        Ok(body.chains)
    }
}

#[async_trait]
impl ChainFetcher for ApiClient {
    async fn fetch_with_retry(&self) -> Result<Vec<Chain>, FetchError> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.fetch_chains().await {
                Ok(chains) => return Ok(chains),
                Err(e) => {
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Chain fetch attempt failed"
                    );
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Err(FetchError::RetriesExhausted {
            attempts: self.max_retries,
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

/// Exponential backoff after the given (1-based) attempt, capped at 10s.
fn backoff_delay(attempt: u32) -> Duration {
    let ms = 1000u64.saturating_mul(1 << (attempt - 1).min(16));
    Duration::from_millis(ms.min(BACKOFF_CAP_MS))
}
