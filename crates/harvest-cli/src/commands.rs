//! Command handlers called from `main` once configuration and logging are
//! set up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use harvest_core::{AccountIdentity, AppConfig, CredentialBundle, StorageMode};
use harvest_pipeline::{Harvester, RunState};
use harvest_sink::{Pusher, SinkSettings};
use harvest_source::query::SETTLED_STATUS;
use harvest_source::{
    read_cache, CredentialSource, CredentialStore, ListQuery, LoginBroker, OrderFilter, TimeRange,
};
use tokio_util::sync::CancellationToken;

use crate::handoff::{default_poll, spawn_file_handoff};
use crate::signal::cancel_on_shutdown;

/// Credentials from configuration, if a token is set.
pub(crate) fn static_bundle(config: &AppConfig) -> Option<CredentialBundle> {
    let token = config.static_token.as_deref().filter(|t| !t.is_empty())?;
    Some(CredentialBundle {
        token: token.to_owned(),
        device_id: config.static_device_id.clone().unwrap_or_default(),
        merchant_id: config.static_merchant_id.clone().unwrap_or_default(),
        ..CredentialBundle::default()
    })
}

/// Static credentials first, then the login handoff unless interactive
/// login is disabled.
async fn build_credential_store(config: &AppConfig) -> Arc<CredentialStore> {
    let mut sources = Vec::new();
    if let Some(bundle) = static_bundle(config) {
        sources.push(CredentialSource::Static(bundle));
    }
    match (&config.login_handoff_path, config.skip_interactive_login) {
        (Some(path), false) => {
            let wait = Duration::from_secs(config.login_timeout_secs);
            let (broker, requests) = LoginBroker::channel(wait);
            spawn_file_handoff(path.clone(), requests, wait, default_poll());
            sources.push(CredentialSource::Login(broker));
        }
        (None, false) => {
            tracing::debug!("no login handoff path configured, interactive login unavailable");
        }
        (_, true) => tracing::info!("interactive login disabled"),
    }
    Arc::new(CredentialStore::load(Some(config.auth_cache_path.clone()), sources).await)
}

/// Maps the `--settlement-status` argument to the source's status code.
pub(crate) fn settlement_filter(arg: Option<&str>) -> Option<String> {
    let value = arg.map(str::trim).filter(|v| !v.is_empty())?;
    if value.eq_ignore_ascii_case("settled") {
        Some(SETTLED_STATUS.to_owned())
    } else {
        Some(value.to_owned())
    }
}

pub(crate) fn build_query(
    config: &AppConfig,
    start: NaiveDate,
    end: NaiveDate,
    settlement_status: Option<&str>,
) -> anyhow::Result<ListQuery> {
    let range = TimeRange::from_civil_dates(start, end)
        .ok_or_else(|| anyhow::anyhow!("invalid date range {start}..{end}: end is before start"))?;
    Ok(ListQuery {
        range,
        filter: OrderFilter {
            country_codes: config.country_codes.clone(),
            order_types: config.order_types.clone(),
            settlement_status: settlement_filter(settlement_status),
        },
    })
}

pub(crate) async fn run_harvest(
    config: &AppConfig,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    settlement_status: Option<&str>,
) -> anyhow::Result<()> {
    let start = start.unwrap_or_else(|| harvest_core::civil_time::now_civil().date_naive());
    let end = end.unwrap_or(start);
    let query = build_query(config, start, end, settlement_status)?;

    let credentials = build_credential_store(config).await;
    let mut harvester = Harvester::from_app_config(config, credentials).await?;

    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    tracing::info!(
        %start,
        %end,
        settlement_status = ?query.filter.settlement_status,
        "starting harvest run"
    );
    let report = harvester.run(query, &cancel).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    match report.state {
        RunState::Failed => anyhow::bail!(
            "pagination stopped early: {}",
            report.error.as_deref().unwrap_or("unknown error")
        ),
        _ if report.failed_batches > 0 && config.storage_mode == StorageMode::Database => {
            tracing::warn!(
                failed_batches = report.failed_batches,
                "some pages were not stored; they remain in the buffer artifact"
            );
            Ok(())
        }
        _ if report.failed_batches > 0 => {
            tracing::warn!(
                failed_batches = report.failed_batches,
                "some batches were dead-lettered; run `harvest replay` once the sink is healthy"
            );
            Ok(())
        }
        _ => Ok(()),
    }
}

pub(crate) async fn run_replay(config: &AppConfig) -> anyhow::Result<()> {
    let pusher = Pusher::new(SinkSettings::from_app_config(config))?;
    let report = pusher.replay().await?;
    println!(
        "replayed {} dead-letter entries: {} delivered ({} items), {} failed",
        report.entries, report.delivered, report.items_delivered, report.failed
    );
    if report.failed > 0 {
        anyhow::bail!("{} dead-letter entries could not be delivered", report.failed);
    }
    Ok(())
}

pub(crate) async fn run_auth_status(config: &AppConfig) -> anyhow::Result<()> {
    let path = &config.auth_cache_path;
    let Some(cached) = read_cache(path).await? else {
        println!("no cached credentials at {}", path.display());
        if static_bundle(config).is_some() {
            println!("static credentials are configured");
        }
        return Ok(());
    };

    let identity = AccountIdentity::resolve(Some(&cached.bundle), &config.account_name);
    let expired = cached.is_expired_at(Utc::now());
    println!("account:    {}", identity.account_id);
    println!("token:      {}", identity.token_preview);
    if let Some(saved) = cached.saved_at {
        println!("saved at:   {saved}");
    }
    match cached.expires_at {
        Some(expiry) => println!("expires at: {expiry}{}", if expired { " (expired)" } else { "" }),
        None => println!("expires at: unknown (treated as expired)"),
    }
    Ok(())
}
