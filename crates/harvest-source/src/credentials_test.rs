use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::json;
use tempfile::TempDir;

use super::*;

fn static_bundle(token: &str) -> CredentialBundle {
    CredentialBundle {
        token: token.to_owned(),
        device_id: "device-abc".to_owned(),
        merchant_id: "m-100".to_owned(),
        ..CredentialBundle::default()
    }
}

// ---------------------------------------------------------------------------
// validity
// ---------------------------------------------------------------------------

#[test]
fn bundle_is_valid_only_inside_freshness_window() {
    let now = Utc::now();
    let mut bundle = static_bundle("tok");
    bundle.acquired_at = Some(now - Duration::minutes(59));
    assert!(CredentialStore::is_valid_at(&bundle, now));

    bundle.acquired_at = Some(now - Duration::minutes(61));
    assert!(!CredentialStore::is_valid_at(&bundle, now));
}

#[test]
fn bundle_without_token_is_never_valid() {
    let mut bundle = static_bundle("");
    bundle.acquired_at = Some(Utc::now());
    assert!(!CredentialStore::is_valid(&bundle));
}

// ---------------------------------------------------------------------------
// refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_from_static_source_persists_cache_with_absolute_expiry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auth_cache.json");
    let store = CredentialStore::new(
        Some(path.clone()),
        vec![CredentialSource::Static(static_bundle("tok-1"))],
    );

    let bundle = store.refresh("startup").await.unwrap();
    assert_eq!(bundle.token, "tok-1");
    assert!(CredentialStore::is_valid(&bundle));
    assert_eq!(store.refresh_count(), 1);

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["auth_info"]["token"], "tok-1");
    let written = raw["timestamp"].as_f64().unwrap();
    let expires = raw["expires_at"].as_f64().unwrap();
    assert!((expires - written - 86_400.0).abs() < 1.0);
}

#[tokio::test]
async fn refresh_merges_into_previous_bundle() {
    let (broker, mut rx) = crate::login::LoginBroker::channel(StdDuration::from_secs(5));
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            request.respond(Ok(CredentialBundle {
                alt_token: "pp-new".to_owned(),
                ..CredentialBundle::default()
            }));
        }
    });
    let store = CredentialStore::new(None, vec![]);
    store
        .refresh_from(&CredentialSource::Static(static_bundle("tok-old")), "seed")
        .await
        .unwrap();

    let refreshed = store
        .refresh_from(&CredentialSource::Login(broker), "expired")
        .await
        .unwrap();
    assert_eq!(refreshed.alt_token, "pp-new");
    assert_eq!(refreshed.device_id, "device-abc", "known fields survive a refresh");
    assert_eq!(refreshed.merchant_id, "m-100");
}

#[tokio::test]
async fn source_without_token_is_rejected() {
    let store = CredentialStore::new(None, vec![CredentialSource::Static(static_bundle(""))]);
    let result = store.ensure_valid().await;
    assert!(matches!(result, Err(CredentialError::Unavailable(_))));
    assert!(store.get().await.is_none());
}

#[tokio::test]
async fn ensure_valid_without_sources_is_unavailable() {
    let store = CredentialStore::new(None, Vec::new());
    assert!(matches!(
        store.ensure_valid().await,
        Err(CredentialError::Unavailable(_))
    ));
}

#[tokio::test]
async fn later_source_is_tried_when_first_fails() {
    let (broker, rx) = crate::login::LoginBroker::channel(StdDuration::from_secs(1));
    drop(rx);
    let store = CredentialStore::new(
        None,
        vec![
            CredentialSource::Login(broker),
            CredentialSource::Static(static_bundle("fallback")),
        ],
    );
    let (bundle, generation) = store.ensure_valid().await.unwrap();
    assert_eq!(bundle.token, "fallback");
    assert_eq!(generation, 1);
}

#[tokio::test]
async fn concurrent_refreshes_for_same_generation_collapse_into_one() {
    let store = Arc::new(CredentialStore::new(
        None,
        vec![CredentialSource::Static(static_bundle("tok"))],
    ));
    let (_, generation) = store.ensure_valid().await.unwrap();
    assert_eq!(store.refresh_count(), 1);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.refresh_if_unchanged(generation, "token expired").await
        }));
    }
    for handle in handles {
        let (bundle, new_generation) = handle.await.unwrap().unwrap();
        assert_eq!(bundle.token, "tok");
        assert_eq!(new_generation, generation + 1);
    }
    assert_eq!(store.refresh_count(), 2, "exactly one extra refresh");
}

// ---------------------------------------------------------------------------
// cache loading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_cache_is_discarded_and_removed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auth_cache.json");
    let past = (Utc::now() - Duration::hours(30)).timestamp();
    std::fs::write(
        &path,
        json!({
            "auth_info": {"token": "stale"},
            "timestamp": past,
            "expires_at": past + 86_400,
        })
        .to_string(),
    )
    .unwrap();

    let store = CredentialStore::load(Some(path.clone()), Vec::new()).await;
    assert!(store.get().await.is_none());
    assert!(!path.exists(), "expired cache file should be deleted");
}

#[tokio::test]
async fn cache_with_legacy_field_names_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auth_cache.json");
    let now = Utc::now().timestamp();
    std::fs::write(
        &path,
        json!({
            "auth_info": {
                "pp_token": "legacy-token",
                "token": "",
                "deviceId": "",
                "pp_device_id": "legacy-device",
                "merchantid": "legacy-merchant",
                "merchantId": "other-merchant"
            },
            "timestamp": now,
            "expires_at": now + 86_400,
        })
        .to_string(),
    )
    .unwrap();

    let store = CredentialStore::load(Some(path), Vec::new()).await;
    let bundle = store.get().await.unwrap();
    assert_eq!(bundle.effective_token(), "legacy-token");
    assert_eq!(bundle.device_id, "legacy-device");
    assert_eq!(bundle.merchant_id, "legacy-merchant");
    assert!(CredentialStore::is_valid(&bundle));
}

#[tokio::test]
async fn stale_cached_bundle_triggers_refresh() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auth_cache.json");
    let two_hours_ago = (Utc::now() - Duration::hours(2)).timestamp();
    std::fs::write(
        &path,
        json!({
            "auth_info": {"token": "cached", "deviceId": "cached-device"},
            "timestamp": two_hours_ago,
            "expires_at": two_hours_ago + 86_400,
        })
        .to_string(),
    )
    .unwrap();

    let store = CredentialStore::load(
        Some(path),
        vec![CredentialSource::Static(CredentialBundle {
            token: "renewed".to_owned(),
            ..CredentialBundle::default()
        })],
    )
    .await;
    let (bundle, _) = store.ensure_valid().await.unwrap();
    assert_eq!(bundle.token, "renewed");
    assert_eq!(bundle.device_id, "cached-device");
    assert_eq!(store.refresh_count(), 1);
}

#[tokio::test]
async fn corrupt_cache_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auth_cache.json");
    std::fs::write(&path, "{not json").unwrap();
    let store = CredentialStore::load(Some(path), Vec::new()).await;
    assert!(store.get().await.is_none());
}

#[tokio::test]
async fn invalidate_clears_bundle_and_cache_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("auth_cache.json");
    let store = CredentialStore::new(
        Some(path.clone()),
        vec![CredentialSource::Static(static_bundle("tok"))],
    );
    store.refresh("startup").await.unwrap();
    assert!(path.exists());

    store.invalidate().await;
    assert!(store.get().await.is_none());
    assert!(!path.exists());
}
