//! Credential Store: the single active [`CredentialBundle`] of a run.
//!
//! The bundle lives behind a lock and is handed out by value. Refreshes are
//! serialized by a second lock so that concurrent callers observing an
//! expired session trigger one refresh between them; the others wait for it
//! and pick up the result. Every successful refresh bumps a generation
//! counter, which is how a waiter tells "someone already refreshed" apart
//! from "still stale".
//!
//! The bundle is persisted as `{auth_info, timestamp, expires_at}` JSON with
//! an absolute expiry 24 hours after the write. That expiry is distinct from
//! the one-hour freshness window that decides when to refresh proactively.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use harvest_core::CredentialBundle;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CredentialError;
use crate::login::LoginBroker;

/// How long after a refresh a bundle is trusted without refreshing again.
pub const FRESHNESS_WINDOW_SECS: i64 = 60 * 60;

/// Absolute lifetime of a persisted bundle.
pub const CACHE_TTL_SECS: i64 = 24 * 60 * 60;

/// Where a refresh gets its credentials from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Credentials supplied through configuration.
    Static(CredentialBundle),
    /// The external login collaborator, reached through the broker.
    Login(LoginBroker),
}

impl CredentialSource {
    fn label(&self) -> &'static str {
        match self {
            CredentialSource::Static(_) => "static",
            CredentialSource::Login(_) => "login",
        }
    }

    async fn obtain(&self, reason: &str) -> Result<CredentialBundle, CredentialError> {
        match self {
            CredentialSource::Static(bundle) => Ok(bundle.clone()),
            CredentialSource::Login(broker) => broker.request(reason).await,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    auth_info: CredentialBundle,
    /// Seconds since the epoch at write time.
    timestamp: f64,
    /// Seconds since the epoch after which the file is discarded.
    expires_at: f64,
}

/// A persisted bundle as read back from disk, without side effects.
#[derive(Debug, Clone)]
pub struct CachedCredentials {
    pub bundle: CredentialBundle,
    pub saved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedCredentials {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expiry| now >= expiry)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    bundle: Option<CredentialBundle>,
    generation: u64,
}

#[derive(Debug)]
pub struct CredentialStore {
    cache_path: Option<PathBuf>,
    sources: Vec<CredentialSource>,
    state: Mutex<StoreState>,
    refresh_lock: Mutex<()>,
    refresh_count: AtomicU64,
}

impl CredentialStore {
    /// A store with no persisted state.
    #[must_use]
    pub fn new(cache_path: Option<PathBuf>, sources: Vec<CredentialSource>) -> Self {
        Self {
            cache_path,
            sources,
            state: Mutex::new(StoreState::default()),
            refresh_lock: Mutex::new(()),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Builds a store and seeds it from the cache file, if one exists.
    ///
    /// A cached bundle past its absolute expiry is discarded and the file
    /// removed. An unreadable cache is logged and ignored.
    pub async fn load(cache_path: Option<PathBuf>, sources: Vec<CredentialSource>) -> Self {
        let store = Self::new(cache_path, sources);
        let Some(path) = store.cache_path.as_deref() else {
            return store;
        };

        match read_cache(path).await {
            Ok(None) => {}
            Ok(Some(cached)) if cached.is_expired_at(Utc::now()) => {
                tracing::info!(path = %path.display(), "cached credentials expired, discarding");
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove expired credential cache"
                    );
                }
            }
            Ok(Some(cached)) if !cached.bundle.has_token() => {
                tracing::warn!(
                    path = %path.display(),
                    "cached credentials carry no token, ignoring"
                );
            }
            Ok(Some(cached)) => {
                tracing::info!(
                    path = %path.display(),
                    token = %cached.bundle.token_preview(),
                    "loaded cached credentials"
                );
                store.state.lock().await.bundle = Some(cached.bundle);
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable credential cache");
            }
        }
        store
    }

    /// The active bundle, valid or not.
    pub async fn get(&self) -> Option<CredentialBundle> {
        self.state.lock().await.bundle.clone()
    }

    /// Number of refreshes performed so far.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    /// `true` for a bundle with a token that was refreshed within the
    /// freshness window and has not passed its absolute expiry.
    #[must_use]
    pub fn is_valid(bundle: &CredentialBundle) -> bool {
        Self::is_valid_at(bundle, Utc::now())
    }

    #[must_use]
    pub fn is_valid_at(bundle: &CredentialBundle, now: DateTime<Utc>) -> bool {
        bundle.has_token()
            && bundle.is_fresh_at(now, Duration::seconds(FRESHNESS_WINDOW_SECS))
            && !bundle.is_expired_at(now)
    }

    /// Returns a valid bundle and its generation, refreshing from the
    /// configured sources first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Unavailable`] if no source yields a token.
    pub async fn ensure_valid(&self) -> Result<(CredentialBundle, u64), CredentialError> {
        if let Some(current) = self.valid_snapshot().await {
            return Ok(current);
        }
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.valid_snapshot().await {
            return Ok(current);
        }
        self.refresh_locked("no valid session").await
    }

    /// Refreshes unless another caller already did since `observed` was
    /// read. Callers that lose the race wait for the winner and receive its
    /// bundle.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Unavailable`] if no source yields a token.
    pub async fn refresh_if_unchanged(
        &self,
        observed: u64,
        reason: &str,
    ) -> Result<(CredentialBundle, u64), CredentialError> {
        let _guard = self.refresh_lock.lock().await;
        {
            let state = self.state.lock().await;
            if state.generation != observed {
                if let Some(bundle) = state.bundle.as_ref().filter(|b| b.has_token()) {
                    tracing::debug!(
                        observed,
                        current = state.generation,
                        "refresh already done by another task"
                    );
                    return Ok((bundle.clone(), state.generation));
                }
            }
        }
        self.refresh_locked(reason).await
    }

    /// Refreshes from the configured sources, in order, until one yields a
    /// bundle with a token.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Unavailable`] if none does.
    pub async fn refresh(&self, reason: &str) -> Result<CredentialBundle, CredentialError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked(reason).await.map(|(bundle, _)| bundle)
    }

    /// Refreshes from one specific source.
    ///
    /// # Errors
    ///
    /// Propagates the source's failure, or [`CredentialError::Unavailable`]
    /// if it answered without a token.
    pub async fn refresh_from(
        &self,
        source: &CredentialSource,
        reason: &str,
    ) -> Result<CredentialBundle, CredentialError> {
        let _guard = self.refresh_lock.lock().await;
        self.apply_from(source, reason).await.map(|(bundle, _)| bundle)
    }

    /// Drops the active bundle and its cache file.
    pub async fn invalidate(&self) {
        {
            let mut state = self.state.lock().await;
            state.bundle = None;
            state.generation += 1;
        }
        if let Some(path) = self.cache_path.as_deref() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove credential cache"
                    );
                }
            }
        }
    }

    async fn valid_snapshot(&self) -> Option<(CredentialBundle, u64)> {
        let state = self.state.lock().await;
        state
            .bundle
            .as_ref()
            .filter(|b| Self::is_valid(b))
            .map(|b| (b.clone(), state.generation))
    }

    async fn refresh_locked(
        &self,
        reason: &str,
    ) -> Result<(CredentialBundle, u64), CredentialError> {
        if self.sources.is_empty() {
            return Err(CredentialError::Unavailable(
                "no credential source configured".to_owned(),
            ));
        }
        let mut failures = Vec::new();
        for source in &self.sources {
            match self.apply_from(source, reason).await {
                Ok(refreshed) => return Ok(refreshed),
                Err(e) => {
                    tracing::warn!(source = source.label(), error = %e, "credential source failed");
                    failures.push(format!("{}: {e}", source.label()));
                }
            }
        }
        Err(CredentialError::Unavailable(failures.join("; ")))
    }

    async fn apply_from(
        &self,
        source: &CredentialSource,
        reason: &str,
    ) -> Result<(CredentialBundle, u64), CredentialError> {
        let obtained = source.obtain(reason).await?;
        if !obtained.has_token() {
            return Err(CredentialError::Unavailable(format!(
                "{} source returned no token",
                source.label()
            )));
        }

        let now = Utc::now();
        let (bundle, generation) = {
            let mut state = self.state.lock().await;
            let mut merged = state.bundle.clone().unwrap_or_default();
            merged.merge_from(&obtained);
            merged.acquired_at = Some(now);
            merged.expires_at = Some(now + Duration::seconds(CACHE_TTL_SECS));
            state.bundle = Some(merged.clone());
            state.generation += 1;
            (merged, state.generation)
        };
        self.refresh_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            source = source.label(),
            reason,
            generation,
            token = %bundle.token_preview(),
            "credentials refreshed"
        );

        if let Some(path) = self.cache_path.as_deref() {
            if let Err(e) = write_cache(path, &bundle, now).await {
                tracing::warn!(error = %e, "failed to persist credentials");
            }
        }
        Ok((bundle, generation))
    }
}

/// Reads the cache file at `path`. A missing file is `Ok(None)`.
///
/// # Errors
///
/// Returns [`CredentialError::CacheIo`] or [`CredentialError::CacheParse`].
pub async fn read_cache(path: &Path) -> Result<Option<CachedCredentials>, CredentialError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CredentialError::CacheIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let file: CacheFile =
        serde_json::from_slice(&raw).map_err(|source| CredentialError::CacheParse {
            path: path.to_path_buf(),
            source,
        })?;

    let saved_at = epoch_secs_to_utc(file.timestamp);
    let expires_at = epoch_secs_to_utc(file.expires_at);
    let mut bundle = file.auth_info;
    bundle.expires_at = expires_at.or(bundle.expires_at);
    if bundle.acquired_at.is_none() {
        bundle.acquired_at = saved_at;
    }
    Ok(Some(CachedCredentials {
        bundle,
        saved_at,
        expires_at,
    }))
}

async fn write_cache(
    path: &Path,
    bundle: &CredentialBundle,
    now: DateTime<Utc>,
) -> Result<(), CredentialError> {
    let io_err = |source| CredentialError::CacheIo {
        path: path.to_path_buf(),
        source,
    };
    let file = CacheFile {
        auth_info: bundle.clone(),
        timestamp: utc_to_epoch_secs(now),
        expires_at: utc_to_epoch_secs(now + Duration::seconds(CACHE_TTL_SECS)),
    };
    let body = serde_json::to_vec_pretty(&file).map_err(|source| CredentialError::CacheParse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, body).await.map_err(io_err)
}

#[allow(clippy::cast_precision_loss)]
fn utc_to_epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1_000.0
}

#[allow(clippy::cast_possible_truncation)]
fn epoch_secs_to_utc(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1_000.0) as i64)
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;
