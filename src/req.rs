//! Shared JSON-over-HTTP plumbing for the store and chain adapters.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::errors::{Error, Result};

/// HTTP status codes that indicate transient server errors (retryable).
const RETRYABLE_STATUS_CODES: &[u16] = &[502, 503, 504];

/// Maximum number of retry attempts for transient errors.
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds (doubles with each retry).
const INITIAL_BACKOFF_MS: u64 = 100;

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin JSON POST client bound to one base URL.
///
/// Error mapping is left to the caller: the store adapter classifies every
/// failure as `StoreUnavailable`, the chain adapter as `ChainUnavailable`.
#[derive(Debug, Clone)]
pub struct JsonClient {
    client: Client,
    base_url: String,
}

impl JsonClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Send a POST request with automatic retry for transient server
    /// errors (502, 503, 504), with exponential backoff between attempts.
    ///
    /// Only safe for idempotent endpoints; submissions go through
    /// [`JsonClient::post_once`].
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut attempt = 0;
        loop {
            match self.send(path, body).await {
                Ok(response) => return parse_response(response).await,
                Err(err) if attempt < MAX_RETRIES && is_retryable(&err) => {
                    attempt += 1;
                    warn!(
                        path,
                        attempt,
                        backoff_ms,
                        error = %err,
                        "transient HTTP error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Send a POST request with no retry, for non-idempotent endpoints.
    pub async fn post_once<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let response = self.send(path, body).await?;
        parse_response(response).await
    }

    async fn send<B: Serialize>(&self, path: &str, body: &B) -> Result<Response> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::chain_unavailable(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        if RETRYABLE_STATUS_CODES.contains(&status) {
            return Err(Error::chain_unavailable(format!(
                "{url}: transient status {status}"
            )));
        }
        if status >= 400 {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::chain_unavailable(format!(
                "{url}: status {status}: {text}"
            )));
        }
        Ok(response)
    }
}

fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::ChainUnavailable(msg) if msg.contains("transient status"))
}

async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let text = response
        .text()
        .await
        .map_err(|e| Error::chain_unavailable(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| Error::parse(format!("{e}: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_are_retryable() {
        assert!(is_retryable(&Error::chain_unavailable(
            "http://x/y: transient status 503"
        )));
        assert!(!is_retryable(&Error::chain_unavailable(
            "http://x/y: status 400: bad request"
        )));
    }
}
