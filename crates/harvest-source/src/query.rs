//! Request parameters for the list and detail endpoints.

use chrono::{NaiveDate, NaiveTime, TimeZone};
use harvest_core::civil_time::civil_offset;
use serde_json::{json, Value};

/// Creation-time window in epoch milliseconds, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    #[must_use]
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// From civil-time midnight on `start` to 23:59:59 on `end`.
    ///
    /// Returns `None` when `end` precedes `start`.
    #[must_use]
    pub fn from_civil_dates(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if end < start {
            return None;
        }
        let offset = civil_offset();
        let start_at = offset
            .from_local_datetime(&start.and_time(NaiveTime::MIN))
            .single()?;
        let end_at = offset
            .from_local_datetime(&end.and_hms_opt(23, 59, 59)?)
            .single()?;
        Some(Self::new(start_at.timestamp_millis(), end_at.timestamp_millis()))
    }
}

/// Which orders to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFilter {
    pub country_codes: Vec<String>,
    pub order_types: Vec<String>,
    /// Settlement filter. Only `"2"` (settled) narrows the listing; any
    /// other value lists every status.
    pub settlement_status: Option<String>,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            country_codes: vec!["GH".to_owned()],
            order_types: vec!["300-0".to_owned()],
            settlement_status: None,
        }
    }
}

/// Settlement status value that maps to the `orderStatus` filter.
pub const SETTLED_STATUS: &str = "2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub range: TimeRange,
    pub filter: OrderFilter,
}

impl ListQuery {
    /// JSON body for one list page.
    #[must_use]
    pub fn page_params(&self, page: u32, page_size: u32) -> Value {
        let mut params = json!({
            "current": page,
            "pageSize": page_size,
            "orderTypes": self.filter.order_types,
            "pageIndex": page,
            "createStartTime": self.range.start_ms,
            "createEndTime": self.range.end_ms,
            "countryCodes": self.filter.country_codes,
            "startOrderAmount": null,
            "endOrderAmount": null,
        });
        if self.filter.settlement_status.as_deref() == Some(SETTLED_STATUS) {
            params["orderStatus"] = json!(SETTLED_STATUS);
        }
        params
    }
}

/// Query string for one detail lookup.
#[must_use]
pub fn detail_params(
    order_no: &str,
    order_type: &str,
    data_source: &str,
    now_ms: i64,
) -> Vec<(String, String)> {
    vec![
        ("orderNo".to_owned(), order_no.to_owned()),
        ("orderType".to_owned(), order_type.to_owned()),
        ("dataSource".to_owned(), data_source.to_owned()),
        ("timestamp".to_owned(), now_ms.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(status: Option<&str>) -> ListQuery {
        ListQuery {
            range: TimeRange::new(1_000, 2_000),
            filter: OrderFilter {
                settlement_status: status.map(str::to_owned),
                ..OrderFilter::default()
            },
        }
    }

    #[test]
    fn page_params_carry_pagination_and_filters() {
        let params = query(None).page_params(3, 20);
        assert_eq!(params["current"], 3);
        assert_eq!(params["pageIndex"], 3);
        assert_eq!(params["pageSize"], 20);
        assert_eq!(params["countryCodes"], json!(["GH"]));
        assert_eq!(params["orderTypes"], json!(["300-0"]));
        assert_eq!(params["createStartTime"], 1_000);
        assert!(params["startOrderAmount"].is_null());
        assert!(params.get("orderStatus").is_none());
    }

    #[test]
    fn settled_filter_adds_order_status() {
        assert_eq!(query(Some("2")).page_params(1, 20)["orderStatus"], "2");
        assert!(query(Some("1")).page_params(1, 20).get("orderStatus").is_none());
    }

    #[test]
    fn civil_dates_cover_whole_days_at_utc_plus_one() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let range = TimeRange::from_civil_dates(day, day).unwrap();
        // 2024-12-31T23:00:00Z and 2025-01-01T22:59:59Z
        assert_eq!(range.start_ms, 1_735_686_000_000);
        assert_eq!(range.end_ms, 1_735_772_399_000);
    }

    #[test]
    fn reversed_dates_are_rejected() {
        let a = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let b = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(TimeRange::from_civil_dates(a, b).is_none());
    }
}
