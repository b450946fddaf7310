use tempfile::TempDir;

use super::*;

fn record(pairs: &[(&str, &str)]) -> HarvestRecord {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

fn identity() -> AccountIdentity {
    AccountIdentity {
        account_id: "m-1".to_owned(),
        ..AccountIdentity::default()
    }
}

fn header_of(path: &Path) -> String {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .next()
        .unwrap_or_default()
        .to_owned()
}

#[tokio::test]
async fn session_artifact_is_named_after_civil_timestamp() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path().join("data"));
    let handle = buffer.start_session(&identity(), true).await.unwrap();

    let name = handle.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.ends_with("_order_details.csv"), "{name}");
    assert_eq!(name.len(), "20250101_120000_order_details.csv".len());
    assert!(handle.path.exists(), "artifact is reserved on start");
    assert_eq!(handle.identity.account_id, "m-1");
}

#[tokio::test]
async fn forced_sessions_in_same_second_get_distinct_names() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    let mut paths = Vec::new();
    for _ in 0..3 {
        paths.push(buffer.start_session(&identity(), true).await.unwrap().path);
    }
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 3);
}

#[tokio::test]
async fn start_without_force_reuses_active_session() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    let first = buffer.start_session(&identity(), true).await.unwrap();
    let second = buffer.start_session(&identity(), false).await.unwrap();
    assert_eq!(first.path, second.path);
}

#[tokio::test]
async fn new_columns_are_backfilled_for_earlier_rows() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    let handle = buffer.start_session(&identity(), true).await.unwrap();

    buffer
        .append(&[record(&[("order_no", "A1"), ("amount", "10")])])
        .await
        .unwrap();
    assert_eq!(header_of(&handle.path), "order_no,amount");

    buffer
        .append(&[record(&[("order_no", "A2"), ("Payer_Bank", "GCB")])])
        .await
        .unwrap();
    assert_eq!(header_of(&handle.path), "order_no,amount,Payer_Bank");
    assert_eq!(
        buffer.session_columns().await,
        vec!["order_no", "amount", "Payer_Bank"]
    );

    let rows = buffer.read_rows(0).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("Payer_Bank"), Some(""));
    assert_eq!(rows[0].get("amount"), Some("10"));
    assert_eq!(rows[1].get("Payer_Bank"), Some("GCB"));
    assert_eq!(rows[1].get("amount"), Some(""));
}

#[tokio::test]
async fn header_never_shrinks() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    let handle = buffer.start_session(&identity(), true).await.unwrap();

    buffer
        .append(&[record(&[("order_no", "A1"), ("a", "1"), ("b", "2")])])
        .await
        .unwrap();
    buffer.append(&[record(&[("order_no", "A2")])]).await.unwrap();

    assert_eq!(header_of(&handle.path), "order_no,a,b");
    let (header, rows) = read_artifact(&handle.path).unwrap();
    assert_eq!(header.len(), 3);
    assert_eq!(rows[1].get("b"), Some(""));
}

#[tokio::test]
async fn migration_leaves_no_temporary_files() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    buffer.start_session(&identity(), true).await.unwrap();
    buffer.append(&[record(&[("order_no", "A1")])]).await.unwrap();
    buffer.append(&[record(&[("order_no", "A2"), ("x", "y")])]).await.unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1, "only the artifact remains");
}

#[tokio::test]
async fn append_without_session_opens_one() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    let written = buffer.append(&[record(&[("order_no", "A1")])]).await.unwrap();
    assert_eq!(written, 1);
    let handle = buffer.current_session().await.unwrap();
    assert_eq!(handle.identity.account_id, "unknown_account");
}

#[tokio::test]
async fn empty_records_are_skipped_and_rows_counted() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    buffer.start_session(&identity(), true).await.unwrap();
    let written = buffer
        .append(&[
            HarvestRecord::new(),
            record(&[("order_no", "A1")]),
            record(&[("order_no", "A2")]),
        ])
        .await
        .unwrap();
    assert_eq!(written, 2);
    assert_eq!(buffer.row_count().await, 2);

    let tail = buffer.read_rows(1).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].order_no(), "A2");
}

#[tokio::test]
async fn values_with_commas_and_quotes_round_trip() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    buffer.start_session(&identity(), true).await.unwrap();
    buffer
        .append(&[record(&[("order_no", "A1"), ("note", "a, \"quoted\" value")])])
        .await
        .unwrap();
    let rows = buffer.read_rows(0).await.unwrap();
    assert_eq!(rows[0].get("note"), Some("a, \"quoted\" value"));
}

#[tokio::test]
async fn fresh_session_starts_with_no_columns() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    buffer.start_session(&identity(), true).await.unwrap();
    buffer.append(&[record(&[("order_no", "A1")])]).await.unwrap();

    buffer.start_session(&identity(), true).await.unwrap();
    assert!(buffer.session_columns().await.is_empty());
    assert_eq!(buffer.row_count().await, 0);
    assert!(buffer.read_rows(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn session_resyncs_from_artifact_after_failed_write() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    let handle = buffer.start_session(&identity(), true).await.unwrap();
    buffer.append(&[record(&[("a", "1"), ("b", "2")])]).await.unwrap();

    // Header already widened on disk and one extra row landed before the failure.
    std::fs::write(&handle.path, "a,b,c\n1,2,\n3,4,5\n").unwrap();
    {
        let mut guard = buffer.session.lock().await;
        resync_session(guard.as_mut().unwrap()).await;
    }
    assert_eq!(buffer.session_columns().await, vec!["a", "b", "c"]);
    assert_eq!(buffer.row_count().await, 2);

    buffer.append(&[record(&[("a", "6"), ("b", "7")])]).await.unwrap();
    let text = std::fs::read_to_string(&handle.path).unwrap();
    assert_eq!(text.lines().last(), Some("6,7,"));
    let (header, rows) = read_artifact(&handle.path).unwrap();
    assert_eq!(header, vec!["a", "b", "c"]);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].get("c"), Some(""));
}

#[tokio::test]
async fn failed_append_keeps_session_consistent_with_disk() {
    let dir = TempDir::new().unwrap();
    let buffer = DurableBuffer::new(dir.path());
    let handle = buffer.start_session(&identity(), true).await.unwrap();
    buffer.append(&[record(&[("a", "1")])]).await.unwrap();

    std::fs::remove_file(&handle.path).unwrap();
    std::fs::create_dir(&handle.path).unwrap();
    assert!(buffer.append(&[record(&[("a", "2")])]).await.is_err());
    assert_eq!(buffer.session_columns().await, vec!["a"]);
    assert_eq!(buffer.row_count().await, 1);
}
