use std::path::PathBuf;

use crate::app_config::{AppConfig, PushMethod, StorageMode};
use crate::ConfigError;

/// Upper bound on concurrent detail fetches per page.
pub const MAX_ENRICH_CONCURRENCY: usize = 5;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so it can be tested with a plain
/// `HashMap` lookup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
#[allow(clippy::too_many_lines)]
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };

    let or_default = |var: &str, default: &str| -> String {
        optional(var).unwrap_or_else(|| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_flag = |var: &str, default: bool| -> Result<bool, ConfigError> {
        match optional(var) {
            None => Ok(default),
            Some(raw) => {
                parse_bool(&raw).ok_or_else(|| invalid(var, format!("not a boolean: {raw}")))
            }
        }
    };

    let order_list_url = require("HARVEST_ORDER_LIST_URL")?;
    let order_detail_url = require("HARVEST_ORDER_DETAIL_URL")?;

    let log_level = or_default("HARVEST_LOG_LEVEL", "info");

    let page_size = parse_u32("HARVEST_PAGE_SIZE", "20")?;
    if page_size == 0 {
        return Err(invalid("HARVEST_PAGE_SIZE", "must be at least 1".to_string()));
    }
    let request_delay_ms = parse_u64("HARVEST_REQUEST_DELAY_MS", "10")?;
    let request_timeout_secs = parse_u64("HARVEST_REQUEST_TIMEOUT_SECS", "30")?;
    let user_agent = or_default("HARVEST_USER_AGENT", "harvest/0.1 (order-sync)");
    let max_attempts = parse_u32("HARVEST_MAX_ATTEMPTS", "5")?.max(1);
    let retry_base_delay_ms = parse_u64("HARVEST_RETRY_BASE_DELAY_MS", "100")?;
    let retry_max_delay_ms = parse_u64("HARVEST_RETRY_MAX_DELAY_MS", "5000")?;
    let enrich_concurrency =
        parse_usize("HARVEST_ENRICH_CONCURRENCY", "5")?.clamp(1, MAX_ENRICH_CONCURRENCY);
    let country_codes = split_list(&or_default("HARVEST_COUNTRY_CODES", "GH"));
    let order_types = split_list(&or_default("HARVEST_ORDER_TYPES", "300-0"));
    let signing_country = or_default("HARVEST_SIGNING_COUNTRY", "gsa");
    let detail_data_source = or_default("HARVEST_DETAIL_DATA_SOURCE", "lindorm");

    let data_dir = PathBuf::from(or_default("HARVEST_DATA_DIR", "./data"));
    let auth_cache_path = PathBuf::from(or_default("HARVEST_AUTH_CACHE_PATH", "auth_cache.json"));
    let skip_interactive_login = parse_flag("HARVEST_SKIP_INTERACTIVE_LOGIN", false)?;
    let static_token = optional("HARVEST_AUTH_TOKEN");
    let static_device_id = optional("HARVEST_DEVICE_ID");
    let static_merchant_id = optional("HARVEST_MERCHANT_ID");
    let account_name = or_default("HARVEST_ACCOUNT_NAME", "");
    let login_handoff_path = optional("HARVEST_LOGIN_HANDOFF_PATH").map(PathBuf::from);
    let login_timeout_secs = parse_u64("HARVEST_LOGIN_TIMEOUT_SECS", "120")?;

    let push_url = optional("HARVEST_PUSH_URL");
    let push_method = parse_push_method(&or_default("HARVEST_PUSH_METHOD", "POST"))?;
    let push_timeout_secs = parse_u64("HARVEST_PUSH_TIMEOUT_SECS", "15")?;
    let push_batch_size = parse_usize("HARVEST_PUSH_BATCH_SIZE", "1000")?.max(1);
    let push_channel = or_default("HARVEST_PUSH_CHANNEL", "");
    let push_auth_token = optional("HARVEST_PUSH_AUTH_TOKEN");
    let push_headers = match optional("HARVEST_PUSH_HEADERS_JSON") {
        Some(raw) => parse_headers_json(&raw)?,
        None => Vec::new(),
    };
    let push_max_attempts = parse_u32("HARVEST_PUSH_MAX_ATTEMPTS", "3")?.max(1);
    let push_retry_base_delay_ms = parse_u64("HARVEST_PUSH_RETRY_BASE_DELAY_MS", "500")?;
    let push_verify_tls = parse_flag("HARVEST_PUSH_VERIFY_TLS", true)?;
    let dead_letter_path = PathBuf::from(or_default(
        "HARVEST_DEAD_LETTER_PATH",
        "data/push_failed.jsonl",
    ));

    let storage_mode = parse_storage_mode(&or_default("HARVEST_STORAGE_MODE", "api"))?;
    let database_url = optional("DATABASE_URL");
    if storage_mode == StorageMode::Database && database_url.is_none() {
        return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
    }
    let db_max_connections = parse_u32("HARVEST_DB_MAX_CONNECTIONS", "5")?.max(1);
    let db_min_connections = parse_u32("HARVEST_DB_MIN_CONNECTIONS", "1")?.min(db_max_connections);
    let db_acquire_timeout_secs = parse_u64("HARVEST_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    Ok(AppConfig {
        log_level,
        order_list_url,
        order_detail_url,
        page_size,
        request_delay_ms,
        request_timeout_secs,
        user_agent,
        max_attempts,
        retry_base_delay_ms,
        retry_max_delay_ms,
        enrich_concurrency,
        country_codes,
        order_types,
        signing_country,
        detail_data_source,
        data_dir,
        auth_cache_path,
        skip_interactive_login,
        static_token,
        static_device_id,
        static_merchant_id,
        account_name,
        login_handoff_path,
        login_timeout_secs,
        push_url,
        push_method,
        push_timeout_secs,
        push_batch_size,
        push_channel,
        push_auth_token,
        push_headers,
        push_max_attempts,
        push_retry_base_delay_ms,
        push_verify_tls,
        dead_letter_path,
        storage_mode,
        database_url,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_storage_mode(raw: &str) -> Result<StorageMode, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "api" | "csv" => Ok(StorageMode::Api),
        "mysql" | "database" | "db" => Ok(StorageMode::Database),
        other => Err(ConfigError::InvalidEnvVar {
            var: "HARVEST_STORAGE_MODE".to_string(),
            reason: format!("expected api or mysql, got {other}"),
        }),
    }
}

fn parse_push_method(raw: &str) -> Result<PushMethod, ConfigError> {
    match raw.to_ascii_uppercase().as_str() {
        "POST" => Ok(PushMethod::Post),
        "PUT" => Ok(PushMethod::Put),
        other => Err(ConfigError::InvalidEnvVar {
            var: "HARVEST_PUSH_METHOD".to_string(),
            reason: format!("expected POST or PUT, got {other}"),
        }),
    }
}

/// Parses a JSON object of extra sink headers. Non-string values are
/// rendered with their JSON text.
fn parse_headers_json(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar {
        var: "HARVEST_PUSH_HEADERS_JSON".to_string(),
        reason,
    };
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| invalid("expected a JSON object".to_string()))?;
    Ok(object
        .iter()
        .map(|(k, v)| {
            let rendered = v.as_str().map_or_else(|| v.to_string(), str::to_owned);
            (k.clone(), rendered)
        })
        .collect())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
