//! Resilient Invoker: one retrying HTTP call shared by the list and detail
//! endpoints.
//!
//! 429 and 503 responses and network-level failures are retried under the
//! shared [`RetryPolicy`]. Any other status ends the loop at once. A 200 body
//! is returned as parsed JSON; interpreting the application envelope is the
//! caller's job.

use std::time::Duration;

use harvest_core::{retry_with_backoff, RetryPolicy};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use crate::error::SourceError;

/// A fully prepared request, ready to be sent as many times as needed.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Short label used in logs and errors, e.g. `"order-list"`.
    pub endpoint: String,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct Invoker {
    client: Client,
    policy: RetryPolicy,
}

impl Invoker {
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(
        timeout: Duration,
        user_agent: &str,
        policy: RetryPolicy,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()
            .map_err(|source| SourceError::Http {
                endpoint: "client".to_owned(),
                source,
            })?;
        Ok(Self { client, policy })
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends `request` until it yields a 200 JSON body or a non-retriable
    /// failure.
    ///
    /// # Errors
    ///
    /// - [`SourceError::Exhausted`] when every attempt hit a transient failure.
    /// - [`SourceError::UnexpectedStatus`] for any non-2xx status other than 429/503.
    /// - [`SourceError::MalformedResponse`] when the body is not JSON.
    pub async fn invoke(&self, request: &OutboundRequest) -> Result<Value, SourceError> {
        let send = |attempt: u32| async move {
            tracing::debug!(endpoint = %request.endpoint, attempt, "sending source request");
            self.send_once(request).await
        };
        let outcome = retry_with_backoff(&self.policy, SourceError::is_transient, send).await;

        outcome.map_err(|failed| {
            if failed.exhausted {
                tracing::error!(
                    endpoint = %request.endpoint,
                    attempts = failed.attempts,
                    error = %failed.error,
                    "source request exhausted its retry budget"
                );
                SourceError::Exhausted {
                    endpoint: request.endpoint.clone(),
                    attempts: failed.attempts,
                    last: failed.error.to_string(),
                }
            } else {
                failed.error
            }
        })
    }

    async fn send_once(&self, request: &OutboundRequest) -> Result<Value, SourceError> {
        let endpoint = request.endpoint.as_str();
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| classify(endpoint, e))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited {
                endpoint: endpoint.to_owned(),
            });
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(SourceError::ServiceUnavailable {
                endpoint: endpoint.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(SourceError::UnexpectedStatus {
                status: status.as_u16(),
                endpoint: endpoint.to_owned(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| classify(endpoint, e))?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::MalformedResponse {
            context: endpoint.to_owned(),
            reason: e.to_string(),
        })
    }
}

/// Builder errors are the caller's fault and never retried.
fn classify(endpoint: &str, error: reqwest::Error) -> SourceError {
    if error.is_builder() {
        SourceError::InvalidRequest {
            endpoint: endpoint.to_owned(),
            reason: error.to_string(),
        }
    } else {
        SourceError::Http {
            endpoint: endpoint.to_owned(),
            source: error,
        }
    }
}
