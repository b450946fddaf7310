//! Downstream Pusher: ships buffered rows to the sink in batches.
//!
//! A batch counts as delivered only when the sink answers 2xx *and* its JSON
//! envelope carries `code == 0`. Anything else lands in the dead-letter log
//! with the exact `{channel, items}` body that was sent. Progress through the
//! buffer is tracked by a row watermark per session, so a dead-lettered batch
//! is never pushed again by a later flush.

use std::path::PathBuf;
use std::time::Duration;

use harvest_core::{
    retry_with_backoff, AccountIdentity, AppConfig, HarvestRecord, PushMethod, RetryPolicy,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::buffer::DurableBuffer;
use crate::dead_letter::{DeadLetterEntry, DeadLetterLog};
use crate::error::{PushAttemptError, SinkError};
use crate::mapping::{sink_item, MappingContext};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
const PREVIEW_CHARS: usize = 800;

#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// `None` disables pushing; batches go straight to the dead-letter log.
    pub url: Option<String>,
    pub method: PushMethod,
    pub timeout: Duration,
    pub batch_size: usize,
    pub channel: String,
    pub auth_token: Option<String>,
    pub headers: Vec<(String, String)>,
    pub retry: RetryPolicy,
    pub verify_tls: bool,
    pub dead_letter_path: PathBuf,
}

impl SinkSettings {
    #[must_use]
    pub fn new(url: Option<String>, dead_letter_path: impl Into<PathBuf>) -> Self {
        Self {
            url,
            method: PushMethod::Post,
            timeout: Duration::from_secs(15),
            batch_size: DEFAULT_BATCH_SIZE,
            channel: String::new(),
            auth_token: None,
            headers: Vec::new(),
            retry: RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(30)),
            verify_tls: true,
            dead_letter_path: dead_letter_path.into(),
        }
    }

    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            url: config.push_url.clone(),
            method: config.push_method,
            timeout: Duration::from_secs(config.push_timeout_secs),
            batch_size: config.push_batch_size.max(1),
            channel: config.push_channel.clone(),
            auth_token: config.push_auth_token.clone(),
            headers: config.push_headers.clone(),
            retry: RetryPolicy::new(
                config.push_max_attempts,
                Duration::from_millis(config.push_retry_base_delay_ms),
                Duration::from_secs(30),
            ),
            verify_tls: config.push_verify_tls,
            dead_letter_path: config.dead_letter_path.clone(),
        }
    }
}

/// Result of one batch push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered { items: usize },
    DeadLettered { items: usize, reason: String },
}

/// Totals of a [`Pusher::push_ready`] or [`Pusher::flush_pending`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub batches: usize,
    pub items_delivered: usize,
    pub items_failed: usize,
    pub failed_batches: usize,
}

impl FlushReport {
    fn record(&mut self, outcome: &PushOutcome) {
        self.batches += 1;
        match outcome {
            PushOutcome::Delivered { items } => self.items_delivered += items,
            PushOutcome::DeadLettered { items, .. } => {
                self.items_failed += items;
                self.failed_batches += 1;
            }
        }
    }
}

/// Totals of a dead-letter replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub entries: usize,
    pub delivered: usize,
    pub failed: usize,
    pub items_delivered: usize,
}

#[derive(Debug, Default)]
struct Watermark {
    session: Option<PathBuf>,
    pushed: usize,
}

#[derive(Debug)]
pub struct Pusher {
    client: Client,
    headers: HeaderMap,
    settings: SinkSettings,
    dead_letters: DeadLetterLog,
    watermark: Mutex<Watermark>,
}

impl Pusher {
    /// # Errors
    ///
    /// Returns [`SinkError::InvalidHeader`] for a configured header that is
    /// not a valid HTTP header, or [`SinkError::Client`] if the HTTP client
    /// cannot be built.
    pub fn new(settings: SinkSettings) -> Result<Self, SinkError> {
        let headers = build_headers(&settings)?;
        let client = Client::builder()
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(SinkError::Client)?;
        let dead_letters = DeadLetterLog::new(settings.dead_letter_path.clone());
        Ok(Self {
            client,
            headers,
            settings,
            dead_letters,
            watermark: Mutex::new(Watermark::default()),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &SinkSettings {
        &self.settings
    }

    #[must_use]
    pub fn dead_letters(&self) -> &DeadLetterLog {
        &self.dead_letters
    }

    /// Maps and pushes one batch. A failed push is reported as
    /// [`PushOutcome::DeadLettered`] after the batch has been logged.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::DeadLetterIo`] only when a failed batch could not
    /// be written to the dead-letter log.
    pub async fn push_batch(
        &self,
        records: &[HarvestRecord],
        identity: &AccountIdentity,
    ) -> Result<PushOutcome, SinkError> {
        let ctx = MappingContext {
            configured_channel: &self.settings.channel,
            account_id: &identity.account_id,
        };
        let items: Vec<Value> = records
            .iter()
            .map(|record| Value::Object(sink_item(record, &ctx)))
            .collect();
        let channel = items
            .first()
            .and_then(|item| item.get("channel"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| ctx.fallback_channel())
            .to_owned();
        let count = items.len();
        let payload = json!({ "channel": channel, "items": items });

        match self.send(&payload).await {
            Ok(()) => {
                tracing::info!(items = count, channel = %channel, "batch delivered to sink");
                Ok(PushOutcome::Delivered { items: count })
            }
            Err(reason) => {
                let target = self.settings.url.as_deref().unwrap_or_default();
                self.dead_letters
                    .append(&DeadLetterEntry::now(target, &reason, payload))
                    .await?;
                Ok(PushOutcome::DeadLettered { items: count, reason })
            }
        }
    }

    /// Pushes every *full* batch buffered since the last push.
    ///
    /// # Errors
    ///
    /// Propagates buffer read failures and dead-letter write failures.
    pub async fn push_ready(&self, buffer: &DurableBuffer) -> Result<FlushReport, SinkError> {
        self.push_from(buffer, false).await
    }

    /// Pushes everything buffered since the last push, the final partial
    /// batch included. A second call with nothing new buffered sends nothing.
    ///
    /// # Errors
    ///
    /// Propagates buffer read failures and dead-letter write failures.
    pub async fn flush_pending(&self, buffer: &DurableBuffer) -> Result<FlushReport, SinkError> {
        self.push_from(buffer, true).await
    }

    /// Rows of the active session not yet pushed or dead-lettered.
    pub async fn pending(&self, buffer: &DurableBuffer) -> usize {
        let Some(session) = buffer.current_session().await else {
            return 0;
        };
        let mark = self.watermark.lock().await;
        let pushed = if mark.session.as_ref() == Some(&session.path) {
            mark.pushed
        } else {
            0
        };
        buffer.row_count().await.saturating_sub(pushed)
    }

    /// Re-sends every dead-letter payload verbatim. The log is left as is.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::NotConfigured`] without a push URL, or a
    /// dead-letter read error.
    pub async fn replay(&self) -> Result<ReplayReport, SinkError> {
        if self.settings.url.is_none() {
            return Err(SinkError::NotConfigured);
        }
        let entries = self.dead_letters.read_all().await?;
        let mut report = ReplayReport {
            entries: entries.len(),
            ..ReplayReport::default()
        };
        for (idx, entry) in entries.iter().enumerate() {
            match self.send(&entry.payload).await {
                Ok(()) => {
                    report.delivered += 1;
                    report.items_delivered += entry.item_count();
                }
                Err(reason) => {
                    report.failed += 1;
                    tracing::warn!(
                        entry = idx + 1,
                        failed_at = %entry.timestamp,
                        error = %reason,
                        "dead-letter replay failed"
                    );
                }
            }
        }
        tracing::info!(
            entries = report.entries,
            delivered = report.delivered,
            failed = report.failed,
            "dead-letter replay finished"
        );
        Ok(report)
    }

    async fn push_from(
        &self,
        buffer: &DurableBuffer,
        include_partial: bool,
    ) -> Result<FlushReport, SinkError> {
        let mut report = FlushReport::default();
        let Some(session) = buffer.current_session().await else {
            return Ok(report);
        };

        let mut mark = self.watermark.lock().await;
        if mark.session.as_ref() != Some(&session.path) {
            *mark = Watermark {
                session: Some(session.path.clone()),
                pushed: 0,
            };
        }

        let batch_size = self.settings.batch_size.max(1);
        let pending = buffer.row_count().await.saturating_sub(mark.pushed);
        if pending == 0 || (!include_partial && pending < batch_size) {
            return Ok(report);
        }

        let rows = buffer.read_rows(mark.pushed).await?;
        for chunk in rows.chunks(batch_size) {
            if chunk.len() < batch_size && !include_partial {
                break;
            }
            let outcome = self.push_batch(chunk, &session.identity).await?;
            mark.pushed += chunk.len();
            report.record(&outcome);
        }

        tracing::debug!(
            path = %session.path.display(),
            pushed = mark.pushed,
            batches = report.batches,
            failed_batches = report.failed_batches,
            "push pass finished"
        );
        Ok(report)
    }

    /// One delivery with retries. The error string is what gets logged as
    /// the dead-letter reason.
    async fn send(&self, payload: &Value) -> Result<(), String> {
        let Some(url) = self.settings.url.as_deref() else {
            return Err(SinkError::NotConfigured.to_string());
        };
        let send = |attempt: u32| async move {
            tracing::debug!(url, attempt, "pushing batch");
            self.send_once(url, payload).await
        };
        retry_with_backoff(&self.settings.retry, PushAttemptError::is_retriable, send)
            .await
            .map_err(|failed| {
                tracing::error!(
                    url,
                    attempts = failed.attempts,
                    error = %failed.error,
                    "sink push failed"
                );
                failed.error.to_string()
            })
    }

    async fn send_once(&self, url: &str, payload: &Value) -> Result<(), PushAttemptError> {
        let method = match self.settings.method {
            PushMethod::Post => Method::POST,
            PushMethod::Put => Method::PUT,
        };
        let response = self
            .client
            .request(method, url)
            .headers(self.headers.clone())
            .json(payload)
            .send()
            .await
            .map_err(PushAttemptError::Transport)?;

        let status = response.status();
        let text = response.text().await.map_err(PushAttemptError::Transport)?;
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();

        if !status.is_success() {
            return Err(PushAttemptError::Status {
                status: status.as_u16(),
                preview,
            });
        }
        let data: Value = serde_json::from_str(&text).map_err(|_| PushAttemptError::NotJson {
            preview: preview.clone(),
        })?;

        let code = data.get("code");
        if code.and_then(Value::as_i64) == Some(0) {
            return Ok(());
        }
        let message = ["message", "msg", "error"]
            .iter()
            .filter_map(|key| data.get(*key))
            .map(harvest_core::json_text)
            .find(|m| !m.is_empty())
            .unwrap_or_default();
        Err(PushAttemptError::Rejected {
            code: code.map_or_else(|| "null".to_owned(), harvest_core::json_text),
            message,
        })
    }
}

fn build_headers(settings: &SinkSettings) -> Result<HeaderMap, SinkError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    for (name, value) in &settings.headers {
        let invalid = |reason: String| SinkError::InvalidHeader {
            name: name.clone(),
            reason,
        };
        let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        headers.insert(header_name, header_value);
    }

    if let Some(token) = settings.auth_token.as_deref().filter(|t| !t.is_empty()) {
        if !headers.contains_key(AUTHORIZATION) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                SinkError::InvalidHeader {
                    name: AUTHORIZATION.to_string(),
                    reason: e.to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
    }
    Ok(headers)
}
