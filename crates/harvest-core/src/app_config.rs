use std::path::PathBuf;

/// HTTP verb used for sink pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMethod {
    Post,
    Put,
}

impl std::fmt::Display for PushMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushMethod::Post => write!(f, "POST"),
            PushMethod::Put => write!(f, "PUT"),
        }
    }
}

/// Where harvested pages end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// CSV buffer pushed to the HTTP sink.
    Api,
    /// CSV buffer plus upserts into MySQL; nothing is pushed.
    Database,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Api => write!(f, "api"),
            StorageMode::Database => write!(f, "mysql"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub log_level: String,

    pub order_list_url: String,
    pub order_detail_url: String,
    pub page_size: u32,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub enrich_concurrency: usize,
    pub country_codes: Vec<String>,
    pub order_types: Vec<String>,
    pub signing_country: String,
    pub detail_data_source: String,

    pub data_dir: PathBuf,
    pub auth_cache_path: PathBuf,
    pub skip_interactive_login: bool,
    pub static_token: Option<String>,
    pub static_device_id: Option<String>,
    pub static_merchant_id: Option<String>,
    pub account_name: String,
    pub login_handoff_path: Option<PathBuf>,
    pub login_timeout_secs: u64,

    pub push_url: Option<String>,
    pub push_method: PushMethod,
    pub push_timeout_secs: u64,
    pub push_batch_size: usize,
    pub push_channel: String,
    pub push_auth_token: Option<String>,
    pub push_headers: Vec<(String, String)>,
    pub push_max_attempts: u32,
    pub push_retry_base_delay_ms: u64,
    pub push_verify_tls: bool,
    pub dead_letter_path: PathBuf,

    pub storage_mode: StorageMode,
    /// Required when `storage_mode` is [`StorageMode::Database`].
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header_names: Vec<&str> = self.push_headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("AppConfig")
            .field("log_level", &self.log_level)
            .field("order_list_url", &self.order_list_url)
            .field("order_detail_url", &self.order_detail_url)
            .field("page_size", &self.page_size)
            .field("request_delay_ms", &self.request_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("enrich_concurrency", &self.enrich_concurrency)
            .field("country_codes", &self.country_codes)
            .field("order_types", &self.order_types)
            .field("signing_country", &self.signing_country)
            .field("detail_data_source", &self.detail_data_source)
            .field("data_dir", &self.data_dir)
            .field("auth_cache_path", &self.auth_cache_path)
            .field("skip_interactive_login", &self.skip_interactive_login)
            .field("static_token", &self.static_token.as_ref().map(|_| "[redacted]"))
            .field("static_device_id", &self.static_device_id)
            .field("static_merchant_id", &self.static_merchant_id)
            .field("account_name", &self.account_name)
            .field("login_handoff_path", &self.login_handoff_path)
            .field("login_timeout_secs", &self.login_timeout_secs)
            .field("push_url", &self.push_url)
            .field("push_method", &self.push_method)
            .field("push_timeout_secs", &self.push_timeout_secs)
            .field("push_batch_size", &self.push_batch_size)
            .field("push_channel", &self.push_channel)
            .field(
                "push_auth_token",
                &self.push_auth_token.as_ref().map(|_| "[redacted]"),
            )
            .field("push_headers", &header_names)
            .field("push_max_attempts", &self.push_max_attempts)
            .field("push_retry_base_delay_ms", &self.push_retry_base_delay_ms)
            .field("push_verify_tls", &self.push_verify_tls)
            .field("dead_letter_path", &self.dead_letter_path)
            .field("storage_mode", &self.storage_mode)
            .field("database_url", &self.database_url.as_ref().map(|_| "[redacted]"))
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .finish()
    }
}
