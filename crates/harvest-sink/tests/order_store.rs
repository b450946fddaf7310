//! Live tests for the MySQL order store using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated database from the sqlx test
//! harness. They need a MySQL server at `DATABASE_URL` and are ignored by
//! default; run them with `cargo test -- --ignored`.

use harvest_core::{AccountIdentity, HarvestRecord};
use harvest_sink::OrderStore;
use sqlx::MySqlPool;

fn identity(account_id: &str) -> AccountIdentity {
    AccountIdentity {
        account_id: account_id.to_owned(),
        account_name: "shop".to_owned(),
        merchant_id: account_id.to_owned(),
        device_id: "device-1".to_owned(),
        token_preview: "tok-12345678".to_owned(),
    }
}

fn record(pairs: &[(&str, &str)]) -> HarvestRecord {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "needs a MySQL server at DATABASE_URL"]
async fn page_upsert_writes_account_and_orders(pool: MySqlPool) {
    let store = OrderStore::from_pool(pool.clone());
    store.prepare_schema().await.expect("prepare_schema failed");

    let saved = store
        .upsert_page(
            &identity("m-1"),
            &[
                record(&[("order_no", "A1"), ("order_status", "SUCCESS")]),
                HarvestRecord::new(),
                record(&[("order_no", "A2"), ("create_time", "2025-01-02 10:00:00")]),
            ],
        )
        .await
        .expect("upsert_page failed");

    assert_eq!(saved, 2);
    assert_eq!(store.count_orders("m-1").await.unwrap(), 2);

    let name: Option<String> =
        sqlx::query_scalar("SELECT account_name FROM accounts WHERE account_id = 'm-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name.as_deref(), Some("shop"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "needs a MySQL server at DATABASE_URL"]
async fn re_harvested_order_is_updated_in_place(pool: MySqlPool) {
    let store = OrderStore::from_pool(pool.clone());
    let account = identity("m-1");

    store
        .upsert_page(&account, &[record(&[("order_no", "A1"), ("order_status", "PENDING")])])
        .await
        .unwrap();
    store
        .upsert_page(&account, &[record(&[("order_no", "A1"), ("order_status", "SUCCESS")])])
        .await
        .unwrap();

    assert_eq!(store.count_orders("m-1").await.unwrap(), 1);
    let status: Option<String> =
        sqlx::query_scalar("SELECT order_status FROM orders WHERE order_no = 'A1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status.as_deref(), Some("SUCCESS"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "needs a MySQL server at DATABASE_URL"]
async fn legacy_orders_table_gains_date_column(pool: MySqlPool) {
    sqlx::query("ALTER TABLE orders DROP INDEX idx_orders_date")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("ALTER TABLE orders DROP COLUMN `date`")
        .execute(&pool)
        .await
        .unwrap();

    let store = OrderStore::from_pool(pool.clone());
    store.prepare_schema().await.expect("prepare_schema failed");

    let columns: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = 'orders' AND COLUMN_NAME = 'date'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(columns, 1);
}
