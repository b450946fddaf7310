use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Authentication material for the source API.
///
/// Either `token` or `alt_token` carries the session token; which one the
/// login flow fills in depends on how the credentials were captured.
/// `acquired_at` is the time of the last refresh and drives the short
/// freshness window; `expires_at` is the absolute cache expiry.
///
/// Captured bundles may carry both spellings of the device and merchant id
/// keys; the first non-empty one wins.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawBundle")]
pub struct CredentialBundle {
    pub token: String,
    #[serde(rename = "pp_token")]
    pub alt_token: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "merchantId")]
    pub merchant_id: String,
    #[serde(rename = "acquiredAt")]
    pub acquired_at: Option<DateTime<Utc>>,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Wire shape of a bundle with every known key spelling kept apart.
#[derive(Deserialize)]
struct RawBundle {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    pp_token: Option<String>,
    #[serde(default, rename = "deviceId")]
    device_id: Option<String>,
    #[serde(default)]
    pp_device_id: Option<String>,
    #[serde(default)]
    merchantid: Option<String>,
    #[serde(default, rename = "merchantId")]
    merchant_id: Option<String>,
    #[serde(default, rename = "acquiredAt")]
    acquired_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "expiresAt")]
    expires_at: Option<DateTime<Utc>>,
}

fn first_non_empty(candidates: [Option<String>; 2]) -> String {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

impl From<RawBundle> for CredentialBundle {
    fn from(raw: RawBundle) -> Self {
        Self {
            token: raw.token.unwrap_or_default(),
            alt_token: raw.pp_token.unwrap_or_default(),
            device_id: first_non_empty([raw.device_id, raw.pp_device_id]),
            merchant_id: first_non_empty([raw.merchantid, raw.merchant_id]),
            acquired_at: raw.acquired_at,
            expires_at: raw.expires_at,
        }
    }
}

impl CredentialBundle {
    /// The token to present to the source API: `token`, falling back to
    /// `alt_token`.
    #[must_use]
    pub fn effective_token(&self) -> &str {
        if self.token.is_empty() {
            &self.alt_token
        } else {
            &self.token
        }
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.effective_token().is_empty()
    }

    /// Overlays every non-empty field of `newer` onto `self`. Fields the
    /// newer bundle does not know about are kept.
    pub fn merge_from(&mut self, newer: &CredentialBundle) {
        fn overlay(target: &mut String, value: &str) {
            if !value.is_empty() {
                value.clone_into(target);
            }
        }
        overlay(&mut self.token, &newer.token);
        overlay(&mut self.alt_token, &newer.alt_token);
        overlay(&mut self.device_id, &newer.device_id);
        overlay(&mut self.merchant_id, &newer.merchant_id);
        if newer.acquired_at.is_some() {
            self.acquired_at = newer.acquired_at;
        }
        if newer.expires_at.is_some() {
            self.expires_at = newer.expires_at;
        }
    }

    /// `true` while the bundle was refreshed less than `window` ago.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.acquired_at
            .is_some_and(|acquired| now.signed_duration_since(acquired) < window)
    }

    /// `true` once the absolute expiry has passed. A bundle without an
    /// expiry never expires on its own.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }

    #[must_use]
    pub fn token_preview(&self) -> String {
        self.effective_token().chars().take(12).collect()
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &str| if s.is_empty() { "" } else { "[redacted]" };
        f.debug_struct("CredentialBundle")
            .field("token", &redact(&self.token))
            .field("alt_token", &redact(&self.alt_token))
            .field("device_id", &self.device_id)
            .field("merchant_id", &self.merchant_id)
            .field("acquired_at", &self.acquired_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Who a run is harvesting for. Used to name the sink channel and to tag
/// log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub account_id: String,
    pub account_name: String,
    pub merchant_id: String,
    pub device_id: String,
    pub token_preview: String,
}

impl AccountIdentity {
    /// Resolves the account id as merchant id, then configured account
    /// name, then `device_<first 12 chars>`, then `unknown_account`.
    #[must_use]
    pub fn resolve(bundle: Option<&CredentialBundle>, account_name: &str) -> Self {
        let merchant_id = bundle.map(|b| b.merchant_id.trim().to_owned()).unwrap_or_default();
        let device_id = bundle.map(|b| b.device_id.trim().to_owned()).unwrap_or_default();
        let account_name = account_name.trim().to_owned();

        let account_id = if !merchant_id.is_empty() {
            merchant_id.clone()
        } else if !account_name.is_empty() {
            account_name.clone()
        } else if !device_id.is_empty() {
            format!("device_{}", device_id.chars().take(12).collect::<String>())
        } else {
            "unknown_account".to_owned()
        };

        Self {
            account_id,
            account_name,
            merchant_id,
            device_id,
            token_preview: bundle.map(CredentialBundle::token_preview).unwrap_or_default(),
        }
    }
}

/// Pagination state for one collection run.
///
/// `total_pages` and `total_items` never decrease. When the source reports
/// zero items in total, `total_items` tracks the number of items actually
/// observed so progress stays monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageCursor {
    pub page_number: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub total_items: u64,
    observed_items: u64,
}

impl PageCursor {
    #[must_use]
    pub fn first(page_size: u32) -> Self {
        Self {
            page_number: 1,
            page_size,
            total_pages: 0,
            total_items: 0,
            observed_items: 0,
        }
    }

    /// Folds one page's response metadata into the cursor.
    pub fn observe(&mut self, reported_pages: u32, reported_items: u64, page_items: usize) {
        self.total_pages = self.total_pages.max(reported_pages);
        self.observed_items = self.observed_items.saturating_add(page_items as u64);
        let candidate = if reported_items > 0 {
            reported_items
        } else {
            self.observed_items
        };
        self.total_items = self.total_items.max(candidate);
    }

    /// `true` once the source has announced a page count and the current
    /// page is at or beyond it.
    #[must_use]
    pub fn is_last_page(&self) -> bool {
        self.total_pages > 0 && self.page_number >= self.total_pages
    }

    pub fn advance(&mut self) {
        self.page_number = self.page_number.saturating_add(1);
    }

    #[must_use]
    pub fn observed_items(&self) -> u64 {
        self.observed_items
    }
}

/// Minimal order fields returned by the list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_no: String,
    pub order_type: String,
    pub order_status: String,
    pub order_amount: String,
    pub create_time: String,
    pub settlement_status: String,
    pub settlement_amount: String,
    pub settlement_time: String,
    pub country_code: String,
    pub merchant_id: String,
    pub pay_id: String,
    pub out_order_no: String,
    pub user_mobile_no: String,
}

impl OrderSummary {
    /// The summary as a record with snake-case column names, in a fixed
    /// column order.
    #[must_use]
    pub fn to_record(&self) -> HarvestRecord {
        let mut record = HarvestRecord::new();
        for (column, value) in [
            ("order_no", &self.order_no),
            ("order_type", &self.order_type),
            ("order_status", &self.order_status),
            ("order_amount", &self.order_amount),
            ("create_time", &self.create_time),
            ("settlement_status", &self.settlement_status),
            ("settlement_amount", &self.settlement_amount),
            ("settlement_time", &self.settlement_time),
            ("country_code", &self.country_code),
            ("merchant_id", &self.merchant_id),
            ("pay_id", &self.pay_id),
            ("out_order_no", &self.out_order_no),
            ("user_mobile_no", &self.user_mobile_no),
        ] {
            record.insert(column, value.clone());
        }
        record
    }
}

/// Flattened detail-endpoint payload: column name to display value, in the
/// order the columns were discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderDetail(IndexMap<String, String>);

impl OrderDetail {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One harvested order: summary fields overlaid with whatever the detail
/// endpoint returned. Column order is insertion order, so summary columns
/// come first and detail columns follow in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HarvestRecord(IndexMap<String, String>);

impl HarvestRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a summary with its detail. Detail values win on column
    /// collisions; the summary's `order_no` is always kept as the key.
    #[must_use]
    pub fn merged(summary: &OrderSummary, detail: &OrderDetail) -> Self {
        let mut record = summary.to_record();
        for (column, value) in detail.iter() {
            record.insert(column, value);
        }
        record.insert("order_no", summary.order_no.clone());
        record
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Business key of the record.
    #[must_use]
    pub fn order_no(&self) -> &str {
        self.get("order_no").unwrap_or_default()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HarvestRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Renders a JSON scalar as display text: strings as-is, `null` as empty,
/// numbers and booleans via their JSON text, containers as compact JSON.
#[must_use]
pub fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
