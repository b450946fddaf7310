//! Orchestrator: credentials, then page by page collect, enrich, buffer and
//! deliver, then a final flush.
//!
//! Delivery is either the HTTP pusher or, in database mode, an upsert of
//! each buffered page into the order store.
//!
//! Pages are strictly sequential. Cancellation is checked at page
//! boundaries and around enrichment; a page that finished enriching is
//! always buffered before the run stops, and the final flush runs on every
//! exit path that still has a buffer session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use harvest_core::{AccountIdentity, AppConfig, HarvestRecord, StorageMode};
use harvest_sink::{
    DurableBuffer, FlushReport, OrderStore, PoolConfig, Pusher, SinkError, SinkSettings,
};
use harvest_source::{
    CollectorState, CredentialStore, EnrichmentPool, ListQuery, PageCollector, SourceClient,
    SourceSession, SourceSettings,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Authenticating,
    FetchingPage,
    EnrichingPage,
    Buffering,
    Flushing,
    /// Every page was collected.
    Completed,
    Cancelled,
    /// Pagination stopped on an error; what was buffered was still flushed.
    Failed,
}

impl RunState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled | RunState::Failed)
    }
}

/// Run-independent knobs of the orchestrator.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub page_size: u32,
    pub inter_page_delay: Duration,
    pub enrich_concurrency: usize,
    /// Used for the account identity when the bundle has no merchant id.
    pub account_name: String,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            inter_page_delay: Duration::from_millis(10),
            enrich_concurrency: 5,
            account_name: String::new(),
        }
    }
}

impl HarvestSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            page_size: config.page_size,
            inter_page_delay: Duration::from_millis(config.request_delay_ms),
            enrich_concurrency: config.enrich_concurrency,
            account_name: config.account_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub account_id: String,
    pub pages: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub records_buffered: usize,
    /// Records accepted downstream, by the sink or the order store.
    pub records_pushed: usize,
    pub records_failed: usize,
    pub failed_batches: usize,
    pub artifact: Option<PathBuf>,
    /// Error that stopped pagination, when `state` is `Failed`.
    pub error: Option<String>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
            account_id: String::new(),
            pages: 0,
            total_pages: 0,
            total_items: 0,
            records_buffered: 0,
            records_pushed: 0,
            records_failed: 0,
            failed_batches: 0,
            artifact: None,
            error: None,
        }
    }

    fn absorb_stored(&mut self, outcome: Result<usize, SinkError>, attempted: usize) {
        match outcome {
            Ok(saved) => self.records_pushed += saved,
            Err(e) => {
                tracing::error!(error = %e, records = attempted, "page could not be stored");
                self.records_failed += attempted;
                self.failed_batches += 1;
            }
        }
    }

    fn absorb(&mut self, flush: FlushReport) {
        self.records_pushed += flush.items_delivered;
        self.records_failed += flush.items_failed;
        self.failed_batches += flush.failed_batches;
    }
}

/// Where buffered pages are delivered.
#[derive(Debug)]
pub enum Delivery {
    Push(Pusher),
    Store(OrderStore),
}

pub struct Harvester {
    session: Arc<SourceSession>,
    enrichment: EnrichmentPool,
    buffer: DurableBuffer,
    delivery: Delivery,
    settings: HarvestSettings,
    state: RunState,
}

impl Harvester {
    #[must_use]
    pub fn new(
        session: Arc<SourceSession>,
        buffer: DurableBuffer,
        pusher: Pusher,
        settings: HarvestSettings,
    ) -> Self {
        Self::with_delivery(session, buffer, Delivery::Push(pusher), settings)
    }

    #[must_use]
    pub fn with_delivery(
        session: Arc<SourceSession>,
        buffer: DurableBuffer,
        delivery: Delivery,
        settings: HarvestSettings,
    ) -> Self {
        let enrichment = EnrichmentPool::new(Arc::clone(&session), settings.enrich_concurrency);
        Self {
            session,
            enrichment,
            buffer,
            delivery,
            settings,
            state: RunState::Idle,
        }
    }

    /// Wires every component from configuration around an existing
    /// credential store. In database mode this connects to the order store
    /// and applies its migrations.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] or [`PipelineError::Sink`] when an
    /// HTTP client cannot be built, a sink header is invalid or the order
    /// store is unreachable.
    pub async fn from_app_config(
        config: &AppConfig,
        credentials: Arc<CredentialStore>,
    ) -> Result<Self, PipelineError> {
        let client = SourceClient::with_identity_signer(SourceSettings::from_app_config(config))?;
        let session = Arc::new(SourceSession::new(client, credentials));
        let delivery = match (config.storage_mode, config.database_url.as_deref()) {
            (StorageMode::Database, Some(url)) => {
                let store = OrderStore::connect(url, PoolConfig::from_app_config(config)).await?;
                Delivery::Store(store)
            }
            _ => Delivery::Push(Pusher::new(SinkSettings::from_app_config(config))?),
        };
        tracing::info!(storage_mode = %config.storage_mode, "delivery configured");
        Ok(Self::with_delivery(
            session,
            DurableBuffer::new(config.data_dir.clone()),
            delivery,
            HarvestSettings::from_app_config(config),
        ))
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn buffer(&self) -> &DurableBuffer {
        &self.buffer
    }

    /// The pusher, unless pages go to the order store.
    #[must_use]
    pub fn pusher(&self) -> Option<&Pusher> {
        match &self.delivery {
            Delivery::Push(pusher) => Some(pusher),
            Delivery::Store(_) => None,
        }
    }

    /// Harvests every order matching `query` into a fresh buffer session
    /// and pushes it downstream.
    ///
    /// A failed page listing does not fail the run: the report ends in
    /// [`RunState::Failed`] with everything collected so far buffered and
    /// flushed.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::AuthUnavailable`] before any page is fetched when
    ///   no valid credentials can be obtained.
    /// - [`PipelineError::Sink`] when the buffer or dead-letter log cannot
    ///   be written.
    pub async fn run(
        &mut self,
        query: ListQuery,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::new();

        self.state = RunState::Authenticating;
        let bundle = match self.session.credentials().ensure_valid().await {
            Ok((bundle, _)) => bundle,
            Err(e) => {
                tracing::error!(error = %e, "no valid credentials, aborting run");
                self.state = RunState::Failed;
                return Err(PipelineError::AuthUnavailable(e));
            }
        };
        let identity = AccountIdentity::resolve(Some(&bundle), &self.settings.account_name);
        tracing::info!(
            account = %identity.account_id,
            token = %identity.token_preview,
            "credentials ready"
        );
        report.account_id.clone_from(&identity.account_id);

        let outcome = self.harvest_pages(query, &identity, cancel, &mut report).await;
        let flushed = self.flush(&mut report).await;
        if outcome.is_err() || flushed.is_err() {
            self.state = RunState::Failed;
        }
        outcome?;
        flushed?;

        report.state = self.state;
        tracing::info!(
            state = ?report.state,
            pages = report.pages,
            buffered = report.records_buffered,
            pushed = report.records_pushed,
            failed_batches = report.failed_batches,
            "run finished"
        );
        Ok(report)
    }

    async fn harvest_pages(
        &mut self,
        query: ListQuery,
        identity: &AccountIdentity,
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let handle = self.buffer.start_session(identity, true).await?;
        report.artifact = Some(handle.path.clone());

        let mut collector = PageCollector::new(
            Arc::clone(&self.session),
            query,
            self.settings.page_size,
            self.settings.inter_page_delay,
        );

        let terminal = loop {
            self.state = RunState::FetchingPage;
            let page = match collector.next_page(cancel).await {
                Ok(Some(page)) => page,
                Ok(None) if collector.state() == CollectorState::Cancelled => {
                    break RunState::Cancelled
                }
                Ok(None) => break RunState::Completed,
                Err(e) => {
                    report.error = Some(e.to_string());
                    break RunState::Failed;
                }
            };
            report.total_pages = page.cursor.total_pages;
            report.total_items = page.cursor.total_items;

            if cancel.is_cancelled() {
                tracing::info!(
                    page = page.cursor.page_number,
                    "cancelled before enrichment, page dropped"
                );
                break RunState::Cancelled;
            }

            self.state = RunState::EnrichingPage;
            let records = self.enrichment.enrich(page.summaries).await;

            self.state = RunState::Buffering;
            let written = self.buffer.append(&records).await?;
            report.pages += 1;
            report.records_buffered += written;
            tracing::info!(
                page = page.cursor.page_number,
                total_pages = page.cursor.total_pages,
                total_items = page.cursor.total_items,
                processed = report.records_buffered,
                "page buffered"
            );

            self.deliver_page(identity, &records, report).await?;

            if cancel.is_cancelled() {
                tracing::info!(page = page.cursor.page_number, "cancelled after buffering page");
                break RunState::Cancelled;
            }
        };

        self.state = terminal;
        Ok(())
    }

    /// Pushes full batches, or stores the page. A page the store rejects is
    /// counted as failed and stays in the artifact.
    async fn deliver_page(
        &self,
        identity: &AccountIdentity,
        records: &[HarvestRecord],
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        match &self.delivery {
            Delivery::Push(pusher) => report.absorb(pusher.push_ready(&self.buffer).await?),
            Delivery::Store(store) => {
                let attempted = records.iter().filter(|r| !r.is_empty()).count();
                report.absorb_stored(store.upsert_page(identity, records).await, attempted);
            }
        }
        Ok(())
    }

    async fn flush(&mut self, report: &mut RunReport) -> Result<(), PipelineError> {
        let terminal = self.state;
        self.state = RunState::Flushing;
        if let Delivery::Push(pusher) = &self.delivery {
            let flushed = pusher.flush_pending(&self.buffer).await?;
            report.absorb(flushed);
        }
        self.state = if terminal.is_terminal() {
            terminal
        } else {
            RunState::Failed
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_end_states_are_terminal() {
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Flushing.is_terminal());
        assert!(!RunState::Idle.is_terminal());
    }

    #[test]
    fn report_accumulates_flush_passes() {
        let mut report = RunReport::new();
        report.absorb(FlushReport {
            batches: 2,
            items_delivered: 10,
            items_failed: 0,
            failed_batches: 0,
        });
        report.absorb(FlushReport {
            batches: 1,
            items_delivered: 0,
            items_failed: 4,
            failed_batches: 1,
        });
        assert_eq!(report.records_pushed, 10);
        assert_eq!(report.records_failed, 4);
        assert_eq!(report.failed_batches, 1);
    }
}
