pub mod app_config;
pub mod civil_time;
pub mod config;
pub mod retry;
pub mod types;

use thiserror::Error;

pub use app_config::{AppConfig, PushMethod, StorageMode};
pub use config::{load_app_config, load_app_config_from_env};
pub use retry::{retry_with_backoff, Attempted, RetryPolicy};
pub use types::{
    json_text, AccountIdentity, CredentialBundle, HarvestRecord, OrderDetail, OrderSummary,
    PageCursor,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
