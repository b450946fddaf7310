//! MySQL storage mode.
//!
//! Each page is written in one transaction: the account row is upserted,
//! then every order keyed by `(account_id, order_no)`. Re-harvesting the
//! same orders updates them in place.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use harvest_core::{AccountIdentity, AppConfig, HarvestRecord};
use sqlx::migrate::MigrateDatabase;
use sqlx::mysql::{MySqlConnection, MySqlPool, MySqlPoolOptions};
use sqlx::MySql;

use crate::error::SinkError;
use crate::mapping::{normalize_datetime, order_date, pick_first};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Path relative to crates/harvest-sink/Cargo.toml.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

const ORDER_NO_CANDIDATES: &[&str] = &[
    "order_no",
    "Order No",
    "Order Information_Order No",
    "Merchant Order No",
];
const ORDER_TYPE_CANDIDATES: &[&str] =
    &["order_type", "Order Type", "Order Information_Order Type"];
const ORDER_STATUS_CANDIDATES: &[&str] = &["order_status", "Status", "Order Information_Status"];
const ORDER_AMOUNT_CANDIDATES: &[&str] =
    &["order_amount", "Order Amount", "Order Information_Order Amount"];
const CREATE_TIME_CANDIDATES: &[&str] =
    &["create_time", "Create Time", "Order Information_Create Time"];
const SETTLEMENT_TIME_CANDIDATES: &[&str] = &[
    "settlement_time",
    "Settlement Time",
    "Settlement Information_Settlement Time",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

/// The typed columns of one `orders` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRow {
    pub order_no: String,
    pub order_type: String,
    pub order_status: String,
    pub order_amount: String,
    /// `YYYY-MM-DD HH:MM:SS`, empty when unknown.
    pub create_time: String,
    pub settlement_time: String,
    pub date: Option<NaiveDate>,
    /// The whole record as a JSON object.
    pub payload_json: String,
}

impl OrderRow {
    /// Extracts the order columns from a record. `fallback_order_no` keys
    /// records that carry no order number under any known column.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Payload`] if the record cannot be encoded.
    pub fn from_record(record: &HarvestRecord, fallback_order_no: &str) -> Result<Self, SinkError> {
        let order_no = pick_first(record, ORDER_NO_CANDIDATES);
        let create_time = pick_first(record, CREATE_TIME_CANDIDATES);
        let date = NaiveDate::parse_from_str(&order_date(&create_time), "%Y-%m-%d").ok();
        Ok(Self {
            order_no: if order_no.is_empty() {
                fallback_order_no.to_owned()
            } else {
                order_no
            },
            order_type: pick_first(record, ORDER_TYPE_CANDIDATES),
            order_status: pick_first(record, ORDER_STATUS_CANDIDATES),
            order_amount: pick_first(record, ORDER_AMOUNT_CANDIDATES),
            create_time: normalize_datetime(&create_time),
            settlement_time: normalize_datetime(&pick_first(record, SETTLEMENT_TIME_CANDIDATES)),
            date,
            payload_json: serde_json::to_string(record).map_err(SinkError::Payload)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OrderStore {
    pool: MySqlPool,
}

impl OrderStore {
    /// Creates the database if it does not exist yet, connects a pool and
    /// brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Database`] if the server cannot be reached and
    /// [`SinkError::Migration`] if the schema cannot be applied.
    pub async fn connect(database_url: &str, config: PoolConfig) -> Result<Self, SinkError> {
        if !MySql::database_exists(database_url).await? {
            MySql::create_database(database_url).await?;
            tracing::info!("created order database");
        }
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(database_url)
            .await?;
        let store = Self::from_pool(pool);
        store.prepare_schema().await?;
        Ok(store)
    }

    /// Wraps an existing pool without touching the schema.
    #[must_use]
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Runs pending migrations, then upgrades `orders` tables created by
    /// older releases that predate the `created_at` and `date` columns.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Migration`] or [`SinkError::Database`].
    pub async fn prepare_schema(&self) -> Result<(), SinkError> {
        MIGRATOR.run(&self.pool).await?;
        self.upgrade_legacy_orders().await
    }

    async fn upgrade_legacy_orders(&self) -> Result<(), SinkError> {
        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = 'orders'",
        )
        .fetch_all(&self.pool)
        .await?;
        let has_column = |name: &str| columns.iter().any(|c| c == name);

        let mut statements = Vec::new();
        if has_column("crawled_at") && !has_column("created_at") {
            statements.push(
                "ALTER TABLE orders CHANGE COLUMN crawled_at created_at \
                 TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
            );
        } else if !has_column("created_at") {
            statements.push(
                "ALTER TABLE orders ADD COLUMN created_at \
                 TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
            );
        }
        if !has_column("date") {
            statements.push("ALTER TABLE orders ADD COLUMN `date` DATE NULL");
        }

        let indexes: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT INDEX_NAME FROM INFORMATION_SCHEMA.STATISTICS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = 'orders'",
        )
        .fetch_all(&self.pool)
        .await?;
        let has_index = |name: &str| indexes.iter().any(|i| i == name);
        if !has_index("idx_orders_created_at") {
            statements.push("ALTER TABLE orders ADD INDEX idx_orders_created_at (created_at)");
        }
        if !has_index("idx_orders_date") {
            statements.push("ALTER TABLE orders ADD INDEX idx_orders_date (`date`)");
        }
        if has_index("idx_orders_crawled_at") {
            statements.push("ALTER TABLE orders DROP INDEX idx_orders_crawled_at");
        }

        for statement in statements {
            tracing::info!(statement, "upgrading legacy orders table");
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Upserts the account and every non-empty record in one transaction.
    /// Returns the number of orders written.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Database`] if any statement fails; nothing from
    /// the page is committed in that case.
    pub async fn upsert_page(
        &self,
        identity: &AccountIdentity,
        records: &[HarvestRecord],
    ) -> Result<usize, SinkError> {
        let stamp = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        upsert_account(&mut tx, identity).await?;

        let mut saved = 0;
        for (index, record) in records.iter().enumerate() {
            if record.is_empty() {
                continue;
            }
            let row = OrderRow::from_record(record, &format!("unknown_{stamp}_{index}"))?;
            upsert_order(&mut tx, &identity.account_id, &row).await?;
            saved += 1;
        }

        tx.commit().await?;
        tracing::debug!(account = %identity.account_id, saved, "page stored");
        Ok(saved)
    }

    /// Orders stored for one account.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Database`] if the query fails.
    pub async fn count_orders(&self, account_id: &str) -> Result<i64, SinkError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn upsert_account(
    conn: &mut MySqlConnection,
    identity: &AccountIdentity,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO accounts (account_id, account_name, merchant_id, device_id, token_preview) \
         VALUES (?, ?, ?, ?, ?) \
         ON DUPLICATE KEY UPDATE \
             account_name = VALUES(account_name), \
             merchant_id = VALUES(merchant_id), \
             device_id = VALUES(device_id), \
             token_preview = VALUES(token_preview), \
             updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&identity.account_id)
    .bind(&identity.account_name)
    .bind(&identity.merchant_id)
    .bind(&identity.device_id)
    .bind(&identity.token_preview)
    .execute(conn)
    .await?;
    Ok(())
}

async fn upsert_order(
    conn: &mut MySqlConnection,
    account_id: &str,
    row: &OrderRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO orders \
             (account_id, order_no, order_type, order_status, order_amount, \
              create_time, settlement_time, payload_json, created_at, `date`, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, ?, CURRENT_TIMESTAMP) \
         ON DUPLICATE KEY UPDATE \
             order_type = VALUES(order_type), \
             order_status = VALUES(order_status), \
             order_amount = VALUES(order_amount), \
             create_time = VALUES(create_time), \
             settlement_time = VALUES(settlement_time), \
             payload_json = VALUES(payload_json), \
             created_at = CURRENT_TIMESTAMP, \
             `date` = VALUES(`date`), \
             updated_at = CURRENT_TIMESTAMP",
    )
    .bind(account_id)
    .bind(&row.order_no)
    .bind(&row.order_type)
    .bind(&row.order_status)
    .bind(&row.order_amount)
    .bind(&row.create_time)
    .bind(&row.settlement_time)
    .bind(&row.payload_json)
    .bind(row.date)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> HarvestRecord {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn row_prefers_summary_columns_and_normalizes_times() {
        let row = OrderRow::from_record(
            &record(&[
                ("order_no", "A1"),
                ("Order Information_Order No", "ignored"),
                ("order_status", ""),
                ("Order Information_Status", "Paid"),
                ("order_amount", "25"),
                ("create_time", "1735689600000"),
                ("Settlement Information_Settlement Time", "2025-01-02T08:30:00"),
            ]),
            "unused",
        )
        .unwrap();

        assert_eq!(row.order_no, "A1");
        assert_eq!(row.order_status, "Paid");
        assert_eq!(row.order_amount, "25");
        assert_eq!(row.create_time, "2025-01-01 01:00:00");
        assert_eq!(row.settlement_time, "2025-01-02 08:30:00");
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2025, 1, 1));
    }

    #[test]
    fn row_without_order_number_uses_fallback_key() {
        let row = OrderRow::from_record(&record(&[("Status", "Paid")]), "unknown_1_0").unwrap();
        assert_eq!(row.order_no, "unknown_1_0");
        assert_eq!(row.order_status, "Paid");
        assert!(row.create_time.is_empty());
        assert!(row.date.is_some(), "unknown create time falls back to today");
    }

    #[test]
    fn payload_keeps_every_column() {
        let row = OrderRow::from_record(
            &record(&[("order_no", "A1"), ("Payer Information_Bank", "GCB")]),
            "unused",
        )
        .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&row.payload_json).unwrap();
        assert_eq!(payload["order_no"], "A1");
        assert_eq!(payload["Payer Information_Bank"], "GCB");
    }

    #[test]
    fn pool_config_has_sane_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.min_connections, DEFAULT_MIN_CONNECTIONS);
        assert_eq!(config.acquire_timeout_secs, DEFAULT_ACQUIRE_TIMEOUT_SECS);
    }
}
