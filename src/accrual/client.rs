//! HTTP client for the external accrual service.
//!
//! Wraps `GET {base}/api/orders/{order_id}` with retry/backoff and maps the
//! documented status codes to typed errors. Every call advertises
//! `Accept-Encoding: gzip` and transparently decompresses the response.

use crate::accrual::response::AccrualResponse;
use crate::models::OrderId;
use crate::{retry, retry_after};
use reqwest::header::{self, HeaderMap};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
const RETRY_ATTEMPTS: u32 = 4;
const RETRY_MULTIPLIER: u32 = 2;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid accrual service address: {0}")]
    InvalidAddress(String),
    #[error("order not found")]
    OrderNotFound,
    #[error("too many requests")]
    TooManyRequests { retry_at: Instant },
    #[error("internal server error")]
    InternalServerError,
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    /// Rate-limit and protocol-violation responses are surfaced to the
    /// caller immediately; everything else is worth another attempt.
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ClientError::TooManyRequests { .. }
                | ClientError::UnexpectedStatus(_)
                | ClientError::InvalidAddress(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: String,
    pub default_retry_after: Duration,
    pub retry: bool,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            default_retry_after: DEFAULT_RETRY_AFTER,
            retry: true,
        }
    }
}

pub struct AccrualClient {
    http: reqwest::Client,
    base_url: Url,
    config: ClientConfig,
}

impl AccrualClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut address = if config.address.contains("://") {
            config.address.clone()
        } else {
            format!("http://{}", config.address)
        };
        if !address.ends_with('/') {
            address.push('/');
        }

        let base_url =
            Url::parse(&address).map_err(|_| ClientError::InvalidAddress(config.address.clone()))?;

        let http = reqwest::Client::builder().gzip(true).build()?;

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    /// Fetch the accrual valuation of one order.
    pub async fn get_accrual(&self, order_id: OrderId) -> Result<AccrualResponse, ClientError> {
        let url = self.endpoint(&format!("api/orders/{order_id}"))?;

        if self.config.retry {
            retry::retry(
                RETRY_BASE_DELAY,
                RETRY_MAX_DELAY,
                RETRY_ATTEMPTS,
                RETRY_MULTIPLIER,
                || self.fetch_accrual(url.clone()),
                ClientError::is_retryable,
            )
            .await
        } else {
            self.fetch_accrual(url).await
        }
    }

    async fn fetch_accrual(&self, url: Url) -> Result<AccrualResponse, ClientError> {
        let response = self.http.get(url).send().await?;
        self.classify(response.status(), response.headers())?;
        Ok(response.json().await?)
    }

    fn classify(&self, status: StatusCode, headers: &HeaderMap) -> Result<(), ClientError> {
        match status {
            StatusCode::OK => Ok(()),
            StatusCode::NO_CONTENT => Err(ClientError::OrderNotFound),
            StatusCode::TOO_MANY_REQUESTS => {
                let delay = headers
                    .get(header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| retry_after::parse(value, self.config.default_retry_after))
                    .unwrap_or(self.config.default_retry_after);

                Err(ClientError::TooManyRequests {
                    retry_at: Instant::now() + delay,
                })
            }
            StatusCode::INTERNAL_SERVER_ERROR => Err(ClientError::InternalServerError),
            status => Err(ClientError::UnexpectedStatus(status.as_u16())),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|_| ClientError::InvalidAddress(self.config.address.clone()))
    }
}
