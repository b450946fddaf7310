//! Enrichment Pool: per-order detail lookups for one page, at most five at
//! a time.
//!
//! Each summary yields exactly one record. A failed, empty or panicked
//! lookup degrades to the summary's own fields.

use std::sync::Arc;

use harvest_core::config::MAX_ENRICH_CONCURRENCY;
use harvest_core::{HarvestRecord, OrderSummary};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::session::SourceSession;

pub struct EnrichmentPool {
    session: Arc<SourceSession>,
    max_concurrency: usize,
}

impl EnrichmentPool {
    /// `max_concurrency` is clamped to `1..=5`.
    #[must_use]
    pub fn new(session: Arc<SourceSession>, max_concurrency: usize) -> Self {
        Self {
            session,
            max_concurrency: max_concurrency.clamp(1, MAX_ENRICH_CONCURRENCY),
        }
    }

    /// Enriches a page. Records come back in input order, one per input
    /// summary. Returns only once every lookup has finished.
    pub async fn enrich(&self, summaries: Vec<OrderSummary>) -> Vec<HarvestRecord> {
        if summaries.is_empty() {
            return Vec::new();
        }

        let permits = self.max_concurrency.min(summaries.len());
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();

        for (index, summary) in summaries.iter().cloned().enumerate() {
            let session = Arc::clone(&self.session);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, enrich_one(&session, summary).await)
            });
        }

        let mut slots: Vec<Option<HarvestRecord>> = vec![None; summaries.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, record)) => slots[index] = Some(record),
                Err(e) => {
                    tracing::error!(error = %e, "enrichment task did not complete");
                }
            }
        }

        summaries
            .iter()
            .zip(slots)
            .map(|(summary, slot)| {
                slot.unwrap_or_else(|| {
                    tracing::warn!(
                        order_no = %summary.order_no,
                        "keeping summary fields after task failure"
                    );
                    summary.to_record()
                })
            })
            .collect()
    }
}

async fn enrich_one(session: &SourceSession, summary: OrderSummary) -> HarvestRecord {
    match session.order_detail(&summary.order_no, &summary.order_type).await {
        Ok(detail) if !detail.is_empty() => {
            tracing::debug!(order_no = %summary.order_no, columns = detail.len(), "order enriched");
            HarvestRecord::merged(&summary, &detail)
        }
        Ok(_) => {
            tracing::warn!(
                order_no = %summary.order_no,
                "empty order detail, keeping summary fields"
            );
            summary.to_record()
        }
        Err(e) => {
            tracing::warn!(
                order_no = %summary.order_no,
                error = %e,
                "order detail failed, keeping summary fields"
            );
            summary.to_record()
        }
    }
}
