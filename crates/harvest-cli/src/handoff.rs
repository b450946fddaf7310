//! File-based login worker.
//!
//! The external login tool writes the captured credentials as JSON to a
//! handoff file. The worker answers each broker request by waiting for that
//! file, consuming it and replying with the bundle it holds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use harvest_core::CredentialBundle;
use harvest_source::LoginRequest;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) fn spawn_file_handoff(
    path: PathBuf,
    mut requests: mpsc::Receiver<LoginRequest>,
    wait: Duration,
    poll: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            tracing::warn!(
                reason = request.reason(),
                path = %path.display(),
                "login required, waiting for credentials in handoff file"
            );
            let result = wait_for_handoff(&path, wait, poll).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "login handoff failed");
            }
            request.respond(result);
        }
    })
}

pub(crate) fn default_poll() -> Duration {
    POLL_INTERVAL
}

async fn wait_for_handoff(
    path: &Path,
    wait: Duration,
    poll: Duration,
) -> Result<CredentialBundle, String> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to consume handoff file"
                    );
                }
                return parse_handoff(&text);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(format!("cannot read {}: {e}", path.display())),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("no credentials appeared in {} within {wait:?}", path.display()));
        }
        tokio::time::sleep(poll).await;
    }
}

/// Accepts either a bare bundle or a cache-style `{"auth_info": {...}}`.
fn parse_handoff(text: &str) -> Result<CredentialBundle, String> {
    let mut value: Value =
        serde_json::from_str(text).map_err(|e| format!("handoff file is not JSON: {e}"))?;
    if let Some(inner) = value.get_mut("auth_info").map(Value::take) {
        value = inner;
    }
    let bundle: CredentialBundle = serde_json::from_value(value)
        .map_err(|e| format!("handoff file is not a credential bundle: {e}"))?;
    if !bundle.has_token() {
        return Err("handoff file carries no token".to_owned());
    }
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_source::LoginBroker;
    use tempfile::TempDir;

    #[test]
    fn parses_bare_and_wrapped_bundles() {
        let bare = parse_handoff(r#"{"pp_token": "t-1", "pp_device_id": "d-1"}"#).unwrap();
        assert_eq!(bare.effective_token(), "t-1");
        assert_eq!(bare.device_id, "d-1");

        let wrapped =
            parse_handoff(r#"{"auth_info": {"token": "t-2", "merchantid": "m-9"}, "timestamp": 1}"#)
                .unwrap();
        assert_eq!(wrapped.token, "t-2");
        assert_eq!(wrapped.merchant_id, "m-9");
    }

    #[test]
    fn parses_bundle_exported_with_both_key_spellings() {
        let bundle = parse_handoff(
            r#"{"auth_info": {"pp_token": "t-3", "token": "", "deviceId": "d-1", "pp_device_id": "",
                "pp_client_ver": "1.0.0", "merchantid": "", "merchantId": "m-4"}}"#,
        )
        .unwrap();
        assert_eq!(bundle.effective_token(), "t-3");
        assert_eq!(bundle.device_id, "d-1");
        assert_eq!(bundle.merchant_id, "m-4");
    }

    #[test]
    fn rejects_bundles_without_token() {
        assert!(parse_handoff(r#"{"deviceId": "d-1"}"#).is_err());
        assert!(parse_handoff("not json").is_err());
    }

    #[tokio::test]
    async fn worker_answers_once_the_file_appears_and_consumes_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("login.json");
        let (broker, rx) = LoginBroker::channel(Duration::from_secs(5));
        spawn_file_handoff(path.clone(), rx, Duration::from_secs(5), Duration::from_millis(10));

        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(&writer_path, r#"{"token": "fresh"}"#).await.unwrap();
        });

        let bundle = broker.request("session expired").await.unwrap();
        assert_eq!(bundle.token, "fresh");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn worker_gives_up_when_nothing_is_written() {
        let dir = TempDir::new().unwrap();
        let (broker, rx) = LoginBroker::channel(Duration::from_secs(5));
        spawn_file_handoff(
            dir.path().join("login.json"),
            rx,
            Duration::from_millis(30),
            Duration::from_millis(10),
        );

        let err = broker.request("no valid session").await.unwrap_err();
        assert!(err.to_string().contains("no credentials appeared"), "{err}");
    }
}
