//! HTTP client for the source API's list and detail endpoints.

use std::sync::Arc;
use std::time::Duration;

use harvest_core::{AppConfig, CredentialBundle, OrderDetail, RetryPolicy};
use reqwest::Method;
use serde_json::Value;

use crate::detail::flatten_detail;
use crate::error::SourceError;
use crate::invoker::{Invoker, OutboundRequest};
use crate::query::{detail_params, ListQuery};
use crate::signer::{IdentityHeaderSigner, RequestSigner, SigningContext};
use crate::wire::{open_envelope, parse_list_page, ListPage};

const LIST_ENDPOINT: &str = "order-list";
const DETAIL_ENDPOINT: &str = "order-detail";

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub list_url: String,
    pub detail_url: String,
    /// Country value passed to the signer (not the listing filter).
    pub signing_country: String,
    pub detail_data_source: String,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl SourceSettings {
    /// Settings with production defaults for everything but the URLs.
    #[must_use]
    pub fn new(list_url: impl Into<String>, detail_url: impl Into<String>) -> Self {
        Self {
            list_url: list_url.into(),
            detail_url: detail_url.into(),
            signing_country: "gsa".to_owned(),
            detail_data_source: "lindorm".to_owned(),
            request_timeout: Duration::from_secs(30),
            user_agent: "harvest/0.1 (order-sync)".to_owned(),
            retry: RetryPolicy::source_default(),
        }
    }

    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            list_url: config.order_list_url.clone(),
            detail_url: config.order_detail_url.clone(),
            signing_country: config.signing_country.clone(),
            detail_data_source: config.detail_data_source.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            user_agent: config.user_agent.clone(),
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
                Duration::from_millis(config.retry_max_delay_ms),
            ),
        }
    }
}

/// Signs, sends and decodes source API calls.
///
/// Stateless with respect to credentials: every call takes the bundle to
/// present, so the caller decides when to refresh.
pub struct SourceClient {
    invoker: Invoker,
    signer: Arc<dyn RequestSigner>,
    settings: SourceSettings,
}

impl SourceClient {
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn new(
        settings: SourceSettings,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, SourceError> {
        let invoker = Invoker::new(settings.request_timeout, &settings.user_agent, settings.retry)?;
        Ok(Self {
            invoker,
            signer,
            settings,
        })
    }

    /// A client using [`IdentityHeaderSigner`].
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn with_identity_signer(settings: SourceSettings) -> Result<Self, SourceError> {
        Self::new(settings, Arc::new(IdentityHeaderSigner))
    }

    #[must_use]
    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Fetches one page of order summaries.
    ///
    /// # Errors
    ///
    /// Propagates invoker failures, [`SourceError::AuthExpired`] and
    /// [`SourceError::Api`] from the envelope, and
    /// [`SourceError::MalformedResponse`] for an unparseable page.
    pub async fn list_orders(
        &self,
        bundle: &CredentialBundle,
        query: &ListQuery,
        page: u32,
        page_size: u32,
    ) -> Result<ListPage, SourceError> {
        let params = query.page_params(page, page_size);
        let headers = self.sign(bundle, &params, &Method::POST)?;
        let request = OutboundRequest {
            endpoint: LIST_ENDPOINT.to_owned(),
            method: Method::POST,
            url: self.settings.list_url.clone(),
            headers,
            query: Vec::new(),
            json: Some(params),
        };
        let body = self.invoker.invoke(&request).await?;
        let data = open_envelope(LIST_ENDPOINT, body)?;
        parse_list_page(&data, page, page_size)
    }

    /// Fetches and flattens the detail blocks of one order.
    ///
    /// # Errors
    ///
    /// Same as [`SourceClient::list_orders`].
    pub async fn order_detail(
        &self,
        bundle: &CredentialBundle,
        order_no: &str,
        order_type: &str,
    ) -> Result<OrderDetail, SourceError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let query = detail_params(order_no, order_type, &self.settings.detail_data_source, now_ms);
        let params: Value = query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>()
            .into();
        let headers = self.sign(bundle, &params, &Method::GET)?;
        let request = OutboundRequest {
            endpoint: DETAIL_ENDPOINT.to_owned(),
            method: Method::GET,
            url: self.settings.detail_url.clone(),
            headers,
            query,
            json: None,
        };
        let body = self.invoker.invoke(&request).await?;
        let data = open_envelope(DETAIL_ENDPOINT, body)?;
        flatten_detail(&data)
    }

    fn sign(
        &self,
        bundle: &CredentialBundle,
        params: &Value,
        method: &Method,
    ) -> Result<reqwest::header::HeaderMap, SourceError> {
        self.signer.sign(&SigningContext {
            token: bundle.effective_token(),
            device_id: &bundle.device_id,
            merchant_id: &bundle.merchant_id,
            country: &self.settings.signing_country,
            params,
            method,
        })
    }
}
