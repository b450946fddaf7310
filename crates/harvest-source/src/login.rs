//! Message-passing handoff to the external login collaborator.
//!
//! The pipeline never drives a browser itself. When it needs fresh
//! credentials it submits a [`LoginRequest`] over a channel and waits, with
//! a deadline, for whoever owns the receiving end to answer.

use std::time::Duration;

use harvest_core::CredentialBundle;
use tokio::sync::{mpsc, oneshot};

use crate::error::CredentialError;

/// One pending request for credentials.
#[derive(Debug)]
pub struct LoginRequest {
    reason: String,
    reply: oneshot::Sender<Result<CredentialBundle, String>>,
}

impl LoginRequest {
    /// Why the pipeline asked, e.g. `"session expired"`.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Answers the request. A requester that already gave up is ignored.
    pub fn respond(self, result: Result<CredentialBundle, String>) {
        if self.reply.send(result).is_err() {
            tracing::debug!("login requester went away before the answer arrived");
        }
    }
}

/// Requesting side of the login handoff. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LoginBroker {
    tx: mpsc::Sender<LoginRequest>,
    timeout: Duration,
}

impl LoginBroker {
    /// Creates a broker and the receiver a login worker should drain.
    #[must_use]
    pub fn channel(timeout: Duration) -> (Self, mpsc::Receiver<LoginRequest>) {
        let (tx, rx) = mpsc::channel(4);
        (Self { tx, timeout }, rx)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submits a request and waits for the worker's answer.
    ///
    /// # Errors
    ///
    /// - [`CredentialError::LoginClosed`] if no worker is listening.
    /// - [`CredentialError::LoginTimeout`] if no answer arrives in time.
    /// - [`CredentialError::LoginFailed`] if the worker reports a failure.
    pub async fn request(&self, reason: &str) -> Result<CredentialBundle, CredentialError> {
        let (reply, answer) = oneshot::channel();
        let request = LoginRequest {
            reason: reason.to_owned(),
            reply,
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| CredentialError::LoginClosed)?;

        match tokio::time::timeout(self.timeout, answer).await {
            Err(_) => Err(CredentialError::LoginTimeout(self.timeout)),
            Ok(Err(_)) => Err(CredentialError::LoginClosed),
            Ok(Ok(Err(message))) => Err(CredentialError::LoginFailed(message)),
            Ok(Ok(Ok(bundle))) => Ok(bundle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn worker_answer_is_returned_to_requester() {
        let (broker, mut rx) = LoginBroker::channel(Duration::from_secs(5));
        let worker = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.reason(), "startup");
            request.respond(Ok(CredentialBundle {
                token: "fresh".to_owned(),
                ..CredentialBundle::default()
            }));
        });

        let bundle = broker.request("startup").await.unwrap();
        assert_eq!(bundle.token, "fresh");
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_worker_times_out() {
        let (broker, _rx) = LoginBroker::channel(Duration::from_secs(3));
        let result = broker.request("startup").await;
        assert!(matches!(result, Err(CredentialError::LoginTimeout(_))));
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (broker, rx) = LoginBroker::channel(Duration::from_secs(3));
        drop(rx);
        let result = broker.request("startup").await;
        assert!(matches!(result, Err(CredentialError::LoginClosed)));
    }

    #[tokio::test]
    async fn worker_failure_is_surfaced() {
        let (broker, mut rx) = LoginBroker::channel(Duration::from_secs(5));
        tokio::spawn(async move {
            if let Some(request) = rx.recv().await {
                request.respond(Err("user cancelled".to_owned()));
            }
        });
        let result = broker.request("expired").await;
        assert!(matches!(
            result,
            Err(CredentialError::LoginFailed(ref m)) if m == "user cancelled"
        ));
    }
}
