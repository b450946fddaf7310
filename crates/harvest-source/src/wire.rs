//! Source API response envelope and list-page parsing.
//!
//! Every response is `{respCode, respMsg, data}`; `respCode` `"00000000"`
//! means success. Numeric fields are parsed leniently because the source
//! sends some of them as strings.

use harvest_core::{json_text, OrderSummary};
use serde_json::Value;

use crate::error::SourceError;

pub const SUCCESS_CODE: &str = "00000000";

const EXPIRY_MARKERS: [&str; 2] = ["token time out", "token expired"];

/// `true` when an application error message signals an expired session.
#[must_use]
pub fn is_token_expiry(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    EXPIRY_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Unwraps a success envelope and returns its `data` member.
///
/// # Errors
///
/// - [`SourceError::AuthExpired`] when `respMsg` reports an expired token.
/// - [`SourceError::Api`] for any other non-success `respCode`.
/// - [`SourceError::MalformedResponse`] when the body is not an envelope.
pub fn open_envelope(endpoint: &str, mut body: Value) -> Result<Value, SourceError> {
    let Some(object) = body.as_object_mut() else {
        return Err(SourceError::MalformedResponse {
            context: endpoint.to_owned(),
            reason: "response body is not a JSON object".to_owned(),
        });
    };
    if let Some(error) = object.get("error") {
        return Err(SourceError::Api {
            code: String::new(),
            message: json_text(error),
        });
    }

    let code = object.get("respCode").map(json_text).unwrap_or_default();
    if code == SUCCESS_CODE {
        return Ok(object.remove("data").unwrap_or(Value::Null));
    }

    let message = object
        .get("respMsg")
        .map(json_text)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "Unknown error".to_owned());
    if is_token_expiry(&message) {
        Err(SourceError::AuthExpired { message })
    } else {
        Err(SourceError::Api { code, message })
    }
}

/// One parsed page of the order listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub summaries: Vec<OrderSummary>,
    pub current: u32,
    pub pages: u32,
    pub total: u64,
    pub size: u32,
}

/// Parses the `data` member of a list response.
///
/// Missing pagination fields fall back to the requested page and size.
///
/// # Errors
///
/// Returns [`SourceError::MalformedResponse`] when `data.list` is present but
/// not an array.
pub fn parse_list_page(
    data: &Value,
    requested_page: u32,
    requested_size: u32,
) -> Result<ListPage, SourceError> {
    let summaries = match data.get("list") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(parse_summary).collect(),
        Some(other) => {
            return Err(SourceError::MalformedResponse {
                context: "order-list".to_owned(),
                reason: format!("expected data.list to be an array, got {other}"),
            })
        }
    };

    let total = data
        .get("totalCount")
        .and_then(lenient_u64)
        .or_else(|| data.get("total").and_then(lenient_u64))
        .unwrap_or(0);

    Ok(ListPage {
        summaries,
        current: data.get("current").and_then(lenient_u32).unwrap_or(requested_page),
        pages: data.get("pages").and_then(lenient_u32).unwrap_or(0),
        total,
        size: data.get("size").and_then(lenient_u32).unwrap_or(requested_size),
    })
}

fn parse_summary(item: &Value) -> OrderSummary {
    let field = |key: &str| item.get(key).map(json_text).unwrap_or_default();
    OrderSummary {
        order_no: field("orderNo"),
        order_type: field("orderType"),
        order_status: field("orderStatus"),
        order_amount: field("orderAmount"),
        create_time: field("createTime"),
        settlement_status: field("settlementStatus"),
        settlement_amount: field("settlementAmount"),
        settlement_time: field("settlementTime"),
        country_code: field("countryCode"),
        merchant_id: field("merchantId"),
        pay_id: field("payId"),
        out_order_no: field("outOrderNo"),
        user_mobile_no: field("payerAccountNo"),
    }
}

fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u32(value: &Value) -> Option<u32> {
    lenient_u64(value).and_then(|v| u32::try_from(v).ok())
}
