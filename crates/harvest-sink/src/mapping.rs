//! Canonical sink shape for a buffered record.
//!
//! Every field in [`FIELD_TABLE`] is always present in the output, empty
//! when no candidate column has a value, so the sink sees a stable schema.
//! Candidates are tried in order; the first non-empty one wins.

use std::sync::LazyLock;

use harvest_core::civil_time::{format_epoch, format_epoch_date, today};
use harvest_core::HarvestRecord;
use regex::Regex;
use serde_json::{Map, Value};

/// Channel used when nothing more specific is known.
pub const DEFAULT_CHANNEL: &str = "harvest";

/// Detail column carrying the merchant id, preferred as channel.
const MERCHANT_CHANNEL_COLUMN: &str = "Order Information_Merchant ID";
const CREATE_TIME_CANDIDATES: &[&str] = &["Order Information_Create Time", "create_time"];

static DATETIME_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})\s+(\d{2}:\d{2}:\d{2})").expect("valid datetime regex")
});
static DATE_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));
static DATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})").expect("valid date prefix regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Text,
    DateTime,
    /// JSON list, `[]` when empty.
    Items,
}

struct FieldSpec {
    name: &'static str,
    shape: Shape,
    candidates: &'static [&'static str],
}

const fn field(name: &'static str, shape: Shape, candidates: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        name,
        shape,
        candidates,
    }
}

const FIELD_TABLE: &[FieldSpec] = &[
    field("order_order_no", Shape::Text, &["Order Information_Order No", "order_no"]),
    field(
        "other_user_mobile_no",
        Shape::Text,
        &["Other Information_User Mobile No", "user_mobile_no"],
    ),
    field(
        "order_status",
        Shape::Text,
        &["Order Information_Status", "order_status", "Status"],
    ),
    field("order_create_time", Shape::DateTime, CREATE_TIME_CANDIDATES),
    field(
        "order_merchant_order_no",
        Shape::Text,
        &["Order Information_Merchant Order No", "out_order_no", "merchant_order_no"],
    ),
    field(
        "order_merchant_id",
        Shape::Text,
        &[MERCHANT_CHANNEL_COLUMN, "merchant_id", "merchantId"],
    ),
    field(
        "order_order_type",
        Shape::Text,
        &["Order Information_Order Type", "order_type", "Order Type"],
    ),
    field(
        "order_order_amount",
        Shape::Text,
        &["Order Information_Order Amount", "order_amount", "Order Amount"],
    ),
    field(
        "order_order_currency",
        Shape::Text,
        &["Order Information_Order Currency", "order_currency", "Order Currency"],
    ),
    field(
        "order_net_amount",
        Shape::Text,
        &["Order Information_Net Amount", "net_amount", "Net Amount"],
    ),
    field(
        "order_product",
        Shape::Text,
        &["Order Information_Product", "product", "Product"],
    ),
    field("order_pay_id", Shape::Text, &["Order Information_Pay ID", "pay_id", "Pay ID"]),
    field("order_update_time", Shape::DateTime, &["Order Information_Update Time"]),
    field("payer_payer_bank_name", Shape::Text, &["Payer Information_Payer Bank Name"]),
    field(
        "payer_payer_account_number",
        Shape::Text,
        &["Payer Information_Payer Account Number"],
    ),
    field("payee_payee_bank_name", Shape::Text, &["Payee Information_Payee Bank Name"]),
    field(
        "payee_payee_account_name",
        Shape::Text,
        &["Payee Information_Payee Account Name"],
    ),
    field(
        "paytool_payment_method",
        Shape::Text,
        &["Payment Tool Information_Payment Method"],
    ),
    field(
        "settle_settlement_time",
        Shape::DateTime,
        &["Settlement Information_Settlement Time", "settlement_time"],
    ),
    field(
        "settle_settlement_status",
        Shape::Text,
        &[
            "Settlement Information_Settlement Status",
            "settlement_status",
            "Settlement Status",
        ],
    ),
    field(
        "settle_settlement_batch_no",
        Shape::Text,
        &["Settlement Information_Settlement Batch No"],
    ),
    field(
        "settle_settlement_amount",
        Shape::Text,
        &["Settlement Information_Settlement Amount", "settlement_amount"],
    ),
    field(
        "settle_settlement_fee",
        Shape::Text,
        &["Settlement Information_Settlement Fee", "settlement_fee"],
    ),
    field("user_mobile_no", Shape::Text, &["user_mobile_no"]),
    field("refund_refund_status", Shape::Text, &["Refund Information_Refund Status"]),
    field("refund_refund_items", Shape::Items, &["Refund Information_Refund Items"]),
    field("order_no", Shape::Text, &["order_no", "Order Information_Order No"]),
    field("other_title", Shape::Text, &["Other Information_Title"]),
    field("order_reference", Shape::Text, &["Order Information_Reference"]),
    field("other_remark", Shape::Text, &["Other Information_Remark"]),
];

/// What the mapping needs beyond the record itself.
#[derive(Debug, Clone, Copy)]
pub struct MappingContext<'a> {
    /// Configured sink channel; may be empty.
    pub configured_channel: &'a str,
    pub account_id: &'a str,
}

impl MappingContext<'_> {
    /// Channel for a batch or a record without a merchant id column.
    #[must_use]
    pub fn fallback_channel(&self) -> &str {
        [self.configured_channel, self.account_id]
            .into_iter()
            .map(str::trim)
            .find(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CHANNEL)
    }
}

/// Maps one record to the sink's canonical item.
#[must_use]
pub fn sink_item(record: &HarvestRecord, ctx: &MappingContext<'_>) -> Map<String, Value> {
    let mut item = Map::new();
    for column in FIELD_TABLE {
        let raw = pick_first(record, column.candidates);
        let value = match column.shape {
            Shape::Text => Value::String(raw),
            Shape::DateTime => Value::String(normalize_datetime(&raw)),
            Shape::Items => parse_items(&raw),
        };
        item.insert(column.name.to_owned(), value);
    }

    let date = match pick_first(record, &["date"]) {
        explicit if !explicit.is_empty() => explicit,
        _ => order_date(&pick_first(record, CREATE_TIME_CANDIDATES)),
    };
    item.insert("date".to_owned(), Value::String(date));

    let merchant = pick_first(record, &[MERCHANT_CHANNEL_COLUMN]);
    let channel = if merchant.is_empty() {
        ctx.fallback_channel().to_owned()
    } else {
        merchant
    };
    item.insert("channel".to_owned(), Value::String(channel));
    item
}

/// Names of every field a sink item carries.
#[must_use]
pub(crate) fn field_names() -> impl Iterator<Item = &'static str> {
    FIELD_TABLE
        .iter()
        .map(|column| column.name)
        .chain(["date", "channel"])
}

pub(crate) fn pick_first(record: &HarvestRecord, candidates: &[&str]) -> String {
    candidates
        .iter()
        .filter_map(|column| record.get(column))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_owned()
}

fn is_epoch(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// Normalizes a datetime to `YYYY-MM-DD HH:MM:SS`.
///
/// Epoch values are rendered in civil time, ISO `T` separators become
/// spaces, a bare date gets `00:00:00`. Anything else passes through.
#[must_use]
pub fn normalize_datetime(raw: &str) -> String {
    let text = raw.trim();
    if text.is_empty() {
        return String::new();
    }
    if is_epoch(text) {
        return text
            .parse::<i64>()
            .ok()
            .and_then(format_epoch)
            .unwrap_or_else(|| text.to_owned());
    }
    let text = text.replace('T', " ");
    if let Some(caps) = DATETIME_PREFIX.captures(&text) {
        return format!("{} {}", &caps[1], &caps[2]);
    }
    if DATE_ONLY.is_match(&text) {
        return format!("{text} 00:00:00");
    }
    text
}

/// `YYYY-MM-DD` of an order's creation time, today when unknown.
#[must_use]
pub fn order_date(raw: &str) -> String {
    let text = raw.trim();
    if text.is_empty() {
        return today();
    }
    if is_epoch(text) {
        return text
            .parse::<i64>()
            .ok()
            .and_then(format_epoch_date)
            .unwrap_or_else(today);
    }
    DATE_PREFIX
        .captures(text)
        .map_or_else(today, |caps| caps[1].to_owned())
}

fn parse_items(raw: &str) -> Value {
    let text = raw.trim();
    if text.is_empty() {
        return Value::Array(Vec::new());
    }
    serde_json::from_str(text)
        .unwrap_or_else(|_| Value::Array(vec![Value::String(text.to_owned())]))
}
