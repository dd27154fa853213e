//! Shared HTTP plumbing for the batch clients.

use crate::ApiMetrics;
use audition_core::ProviderKind;
use audition_error::{ProviderError, ProviderErrorKind};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Build a client whose every call is bounded by `timeout`.
pub(crate) fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder().timeout(timeout).build().map_err(|e| {
        ProviderError::new(ProviderErrorKind::ClientCreation(format!(
            "Failed to build HTTP client: {}",
            e
        )))
    })
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::new(ProviderErrorKind::Timeout(e.to_string()))
    } else {
        ProviderError::new(ProviderErrorKind::Transport(e.to_string()))
    }
}

/// Send a request, turning non-2xx statuses into `Http` errors.
pub(crate) async fn send(
    provider: ProviderKind,
    operation: &'static str,
    request: RequestBuilder,
) -> Result<Response, ProviderError> {
    let started = Instant::now();
    let metrics = ApiMetrics::get();

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            error!(%provider, operation, error = ?e, "Provider request failed");
            let err = transport_error(e);
            metrics.record_error(provider, operation, &err);
            return Err(err);
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(%provider, operation, status = %status, body = %body, "Provider returned error");
        let err = ProviderError::new(ProviderErrorKind::Http {
            status_code: status.as_u16(),
            message: body,
        });
        metrics.record_error(provider, operation, &err);
        return Err(err);
    }

    metrics.record_call(provider, operation, started.elapsed().as_secs_f64());
    debug!(%provider, operation, status = %status, "Provider request succeeded");
    Ok(response)
}

/// Send a request and parse a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: ProviderKind,
    operation: &'static str,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let response = send(provider, operation, request).await?;
    response.json::<T>().await.map_err(|e| {
        error!(%provider, operation, error = ?e, "Failed to parse provider response");
        ProviderError::new(ProviderErrorKind::Parse(format!(
            "Failed to parse {} response: {}",
            operation, e
        )))
    })
}

/// Send a request and return the raw body bytes, undecoded.
pub(crate) async fn send_bytes(
    provider: ProviderKind,
    operation: &'static str,
    request: RequestBuilder,
) -> Result<Vec<u8>, ProviderError> {
    let response = send(provider, operation, request).await?;
    response
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(transport_error)
}

/// Paces status and result queries so polling many batches cannot burst
/// the provider's control plane.
#[derive(Clone)]
pub(crate) struct Pacer {
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}

impl Pacer {
    /// Zero disables pacing.
    pub(crate) fn per_second(queries: u32) -> Self {
        let limiter = NonZeroU32::new(queries)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_second(n))));
        Self { limiter }
    }

    pub(crate) async fn ready(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}
