//! Request-signing seam.
//!
//! The source API expects each request to carry identity headers and a
//! signature computed from the token, device, country and parameters. The
//! signature algorithm lives outside this crate; callers plug it in through
//! [`RequestSigner`].

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;

use crate::error::SourceError;

/// Everything a signer may look at for one outbound request.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    pub token: &'a str,
    pub device_id: &'a str,
    pub merchant_id: &'a str,
    pub country: &'a str,
    pub params: &'a Value,
    pub method: &'a Method,
}

/// Produces the header set for one request.
pub trait RequestSigner: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SourceError::Signing`] when the headers cannot be built.
    fn sign(&self, ctx: &SigningContext<'_>) -> Result<HeaderMap, SourceError>;
}

/// Sends identity and timestamp headers without a signature.
///
/// Suitable for sources (and mock servers) that only check the token.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityHeaderSigner;

impl RequestSigner for IdentityHeaderSigner {
    fn sign(&self, ctx: &SigningContext<'_>) -> Result<HeaderMap, SourceError> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in [
            ("pp_token", ctx.token),
            ("pp_device_id", ctx.device_id),
            ("pp_device_type", "WEB"),
            ("merchantid", ctx.merchant_id),
            ("countrycode", ctx.country),
            ("pp_timestamp", timestamp.as_str()),
        ] {
            headers.insert(header_name(name)?, header_value(name, value)?);
        }
        Ok(headers)
    }
}

pub(crate) fn header_name(name: &str) -> Result<HeaderName, SourceError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| SourceError::Signing(format!("invalid header name {name}: {e}")))
}

pub(crate) fn header_value(name: &str, value: &str) -> Result<HeaderValue, SourceError> {
    HeaderValue::from_str(value)
        .map_err(|e| SourceError::Signing(format!("invalid value for header {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_signer_sets_token_and_device_headers() {
        let params = json!({"current": 1});
        let ctx = SigningContext {
            token: "tok-1",
            device_id: "dev-1",
            merchant_id: "m-1",
            country: "gsa",
            params: &params,
            method: &Method::POST,
        };
        let headers = IdentityHeaderSigner.sign(&ctx).unwrap();
        assert_eq!(headers.get("pp_token").unwrap(), "tok-1");
        assert_eq!(headers.get("pp_device_id").unwrap(), "dev-1");
        assert_eq!(headers.get("merchantid").unwrap(), "m-1");
        assert_eq!(headers.get("countrycode").unwrap(), "gsa");
        assert!(headers.contains_key("pp_timestamp"));
    }

    #[test]
    fn control_characters_in_token_are_rejected() {
        let params = json!({});
        let ctx = SigningContext {
            token: "bad\ntoken",
            device_id: "",
            merchant_id: "",
            country: "gsa",
            params: &params,
            method: &Method::GET,
        };
        assert!(matches!(
            IdentityHeaderSigner.sign(&ctx),
            Err(SourceError::Signing(_))
        ));
    }
}
