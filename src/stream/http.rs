//! HTTP client for the remote catalog service.
//!
//! One client covers all three remote boundaries: the long-polled change
//! stream, batched metadata lookups and per-account claims. Clones share the
//! connection pool but keep their own stream position.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::{ChangeFeed, FeedEvent, StreamError};
use crate::accounts::{ClaimError, ClaimService};
use crate::classify::{LookupError, MetadataLookup};
use crate::config::CatalogConfig;
use crate::models::*;

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: catalog key required or invalid")]
    Unauthorized,

    #[error("Too many requests")]
    TooManyRequests { retry_after: Option<Duration> },

    #[error("Server error: {0}")]
    Server(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ChangesResponse {
    Batch {
        sequence: u64,
        #[serde(default)]
        changes: Vec<EntryChange>,
        #[serde(default)]
        full_resync: bool,
    },
    Restart {
        sequence: u64,
    },
    Idle,
}

#[derive(Serialize)]
struct MetadataRequest<'a> {
    ids: &'a [EntryId],
}

#[derive(Deserialize)]
struct MetadataResponse {
    #[serde(default)]
    entries: Vec<EntryMetadata>,
}

#[derive(Serialize)]
struct ClaimRequest {
    entry_id: EntryId,
}

#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    config: CatalogConfig,
    client: Client,
    position: u64,
}

impl HttpCatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            position: 0,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Build a request with optional auth header.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut req = self.client.request(method, &url);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    /// Handle response, converting HTTP errors to ClientError.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(Self::error_for(response).await)
        }
    }

    /// Handle response whose body is irrelevant on success.
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<(), ClientError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(response).await)
        }
    }

    async fn error_for(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(body),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ClientError::BadRequest(body)
            }
            StatusCode::FORBIDDEN => ClientError::Forbidden(body),
            StatusCode::CONFLICT => ClientError::Conflict(body),
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => ClientError::TooManyRequests { retry_after },
            _ => ClientError::Server(format!("{}: {}", status, body)),
        }
    }

    /// Poll for changes after the current position, retrying transport
    /// failures with exponential backoff before giving up.
    async fn poll_changes(&self) -> Result<ChangesResponse, StreamError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match self
                .request(reqwest::Method::GET, "/changes")
                .query(&[("since", self.position)])
                .send()
                .await
            {
                Ok(response) => self.handle_response::<ChangesResponse>(response).await,
                Err(e) => Err(ClientError::Http(e)),
            };

            match result {
                Ok(changes) => return Ok(changes),
                Err(ClientError::Unauthorized) => return Err(StreamError::Unauthorized),
                Err(ClientError::BadRequest(body)) => return Err(StreamError::Protocol(body)),
                Err(e) if attempt < self.config.max_retries => {
                    let delay = self.retry_delay(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Change poll failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(StreamError::Disconnected(e.to_string())),
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.retry_backoff_ms) * 2u32.pow(attempt.min(6))
    }
}

#[async_trait]
impl ChangeFeed for HttpCatalogClient {
    async fn subscribe(&mut self, start_sequence: u64) -> Result<(), StreamError> {
        debug!(start_sequence, "Resuming catalog change stream");
        self.position = start_sequence;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<FeedEvent>, StreamError> {
        loop {
            match self.poll_changes().await? {
                ChangesResponse::Batch {
                    sequence,
                    changes,
                    full_resync,
                } => {
                    self.position = self.position.max(sequence);
                    return Ok(Some(FeedEvent::Batch(ChangeBatch {
                        sequence,
                        changes,
                        is_full_resync: full_resync,
                    })));
                }
                ChangesResponse::Restart { sequence } => {
                    return Ok(Some(FeedEvent::Restart { sequence }));
                }
                ChangesResponse::Idle => {
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
            }
        }
    }
}

#[async_trait]
impl MetadataLookup for HttpCatalogClient {
    async fn lookup(&self, ids: &[EntryId]) -> Result<Vec<EntryMetadata>, LookupError> {
        let response = self
            .request(reqwest::Method::POST, "/entries/metadata")
            .json(&MetadataRequest { ids })
            .send()
            .await
            .map_err(|e| LookupError::Unavailable(e.to_string()))?;

        let body: MetadataResponse =
            self.handle_response(response).await.map_err(|e| match e {
                ClientError::Http(e) if e.is_decode() => LookupError::Malformed(e.to_string()),
                other => LookupError::Unavailable(other.to_string()),
            })?;
        Ok(body.entries)
    }
}

#[async_trait]
impl ClaimService for HttpCatalogClient {
    async fn claim(&self, account_id: &str, entry_id: EntryId) -> Result<(), ClaimError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/accounts/{}/claims", account_id),
            )
            .json(&ClaimRequest { entry_id })
            .send()
            .await
            .map_err(|e| ClaimError::TransientFailure(e.to_string()))?;

        match self.handle_empty_response(response).await {
            Ok(()) => Ok(()),
            Err(ClientError::Conflict(_)) => Err(ClaimError::AlreadyOwned),
            Err(ClientError::TooManyRequests { retry_after }) => {
                Err(ClaimError::RateLimitedByRemote { retry_after })
            }
            Err(
                ClientError::NotFound(reason)
                | ClientError::BadRequest(reason)
                | ClientError::Forbidden(reason),
            ) => Err(ClaimError::PermanentRejection(reason)),
            Err(other) => Err(ClaimError::TransientFailure(other.to_string())),
        }
    }
}
