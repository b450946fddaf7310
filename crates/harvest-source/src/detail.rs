//! Flattening of the detail endpoint's information blocks.
//!
//! The payload is a list of titled blocks, each holding titled fields:
//!
//! ```json
//! [{"key": "order", "title": "Order Information",
//!   "value": [{"key": "amount", "title": "Amount", "value": "10.00", "valueType": "text"}]}]
//! ```
//!
//! Each field becomes one column named `"{block title}_{field title}"`.

use harvest_core::civil_time::format_epoch;
use harvest_core::{json_text, OrderDetail};
use serde_json::Value;

use crate::error::SourceError;

/// Field title that carries the payer's phone number.
pub const MOBILE_FIELD_TITLE: &str = "User Mobile No";

/// Block whose values stand in for the phone number when it is absent.
pub const OTHER_INFORMATION_TITLE: &str = "Other Information";

pub const MOBILE_COLUMN: &str = "user_mobile_no";

/// Flattens the `data` member of a detail response.
///
/// # Errors
///
/// Returns [`SourceError::MalformedResponse`] when `data` is neither null
/// nor an array of blocks.
pub fn flatten_detail(data: &Value) -> Result<OrderDetail, SourceError> {
    let blocks = match data {
        Value::Null => return Ok(OrderDetail::new()),
        Value::Array(blocks) => blocks,
        other => {
            return Err(SourceError::MalformedResponse {
                context: "order-detail".to_owned(),
                reason: format!("expected an array of blocks, got {other}"),
            })
        }
    };

    let mut detail = OrderDetail::new();
    let mut other_information = Vec::new();

    for block in blocks {
        let block_key = text(block, "key");
        let block_title = text(block, "title");
        let Some(fields) = block.get("value").and_then(Value::as_array) else {
            continue;
        };

        for field in fields {
            let field_key = text(field, "key");
            let field_title = text(field, "title");
            let column = column_name(&block_key, &block_title, &field_key, &field_title);
            let value = render_value(field);

            if field_title == MOBILE_FIELD_TITLE {
                detail.insert(MOBILE_COLUMN, value.clone());
            }
            if block_title == OTHER_INFORMATION_TITLE && !value.is_empty() {
                other_information.push(value.clone());
            }
            detail.insert(column, value);
        }
    }

    if !detail.contains(MOBILE_COLUMN) && !other_information.is_empty() {
        detail.insert(MOBILE_COLUMN, other_information.join(" | "));
    }
    Ok(detail)
}

fn column_name(block_key: &str, block_title: &str, field_key: &str, field_title: &str) -> String {
    if !field_title.is_empty() {
        if block_title.is_empty() {
            field_title.to_owned()
        } else {
            format!("{block_title}_{field_title}")
        }
    } else if !field_key.is_empty() {
        field_key.to_owned()
    } else {
        format!("{block_key}_field")
    }
}

/// Date-typed numeric values become civil-time strings; everything else is
/// rendered as text.
fn render_value(field: &Value) -> String {
    let raw = field.get("value").unwrap_or(&Value::Null);
    let is_date = field.get("valueType").and_then(Value::as_str) == Some("date");
    if is_date {
        #[allow(clippy::cast_possible_truncation)]
        let epoch = raw.as_i64().or_else(|| raw.as_f64().map(|f| f as i64));
        if let Some(formatted) = epoch.and_then(format_epoch) {
            return formatted;
        }
    }
    json_text(raw)
}

fn text(value: &Value, key: &str) -> String {
    value.get(key).map(json_text).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn columns_are_named_from_block_and_field_titles() {
        let data = json!([
            {"key": "order", "title": "Order Information", "value": [
                {"key": "amount", "title": "Amount", "value": "10.00"},
                {"key": "status", "title": "", "value": "SUCCESS"},
                {"key": "", "title": "", "value": "x"}
            ]},
            {"key": "misc", "title": "", "value": [
                {"key": "note", "title": "Note", "value": "hello"}
            ]}
        ]);
        let detail = flatten_detail(&data).unwrap();
        assert_eq!(detail.get("Order Information_Amount"), Some("10.00"));
        assert_eq!(detail.get("status"), Some("SUCCESS"));
        assert_eq!(detail.get("order_field"), Some("x"));
        assert_eq!(detail.get("Note"), Some("hello"));
    }

    #[test]
    fn date_fields_are_formatted_in_utc_plus_one() {
        let data = json!([
            {"key": "order", "title": "Order", "value": [
                {"key": "created", "title": "Create Time",
                 "value": 1_735_689_600_000_i64, "valueType": "date"},
                {"key": "text", "title": "Raw Date", "value": "2025-01-01", "valueType": "date"}
            ]}
        ]);
        let detail = flatten_detail(&data).unwrap();
        assert_eq!(detail.get("Order_Create Time"), Some("2025-01-01 01:00:00"));
        assert_eq!(detail.get("Order_Raw Date"), Some("2025-01-01"));
    }

    #[test]
    fn mobile_field_populates_canonical_column() {
        let data = json!([
            {"key": "payer", "title": "Payer", "value": [
                {"key": "mobile", "title": "User Mobile No", "value": "0241234567"}
            ]},
            {"key": "other", "title": "Other Information", "value": [
                {"key": "a", "title": "Remark", "value": "ignored"}
            ]}
        ]);
        let detail = flatten_detail(&data).unwrap();
        assert_eq!(detail.get("user_mobile_no"), Some("0241234567"));
        assert_eq!(detail.get("Payer_User Mobile No"), Some("0241234567"));
    }

    #[test]
    fn other_information_values_are_joined_when_mobile_is_absent() {
        let data = json!([
            {"key": "other", "title": "Other Information", "value": [
                {"key": "a", "title": "Remark", "value": "first"},
                {"key": "b", "title": "Blank", "value": ""},
                {"key": "c", "title": "Reference", "value": "second"}
            ]}
        ]);
        let detail = flatten_detail(&data).unwrap();
        assert_eq!(detail.get("user_mobile_no"), Some("first | second"));
    }

    #[test]
    fn null_data_is_empty_and_object_data_is_malformed() {
        assert!(flatten_detail(&Value::Null).unwrap().is_empty());
        assert!(matches!(
            flatten_detail(&json!({"oops": true})),
            Err(SourceError::MalformedResponse { .. })
        ));
    }
}
