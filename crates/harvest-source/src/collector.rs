//! Paginated Collector.
//!
//! Pages are pulled one at a time with [`PageCollector::next_page`]; the
//! caller enriches and stores each page before asking for the next, so
//! pagination never runs ahead of processing.
//!
//! Collection stops when:
//! - page 1 is empty (nothing in range),
//! - a later page is empty (everything before it is complete),
//! - the source announced `pages > 0` and the current page is the last one,
//! - the cancellation token fires before or during a fetch.

use std::sync::Arc;
use std::time::Duration;

use harvest_core::{OrderSummary, PageCursor};
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::query::ListQuery;
use crate::session::SourceSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Fetching,
    Exhausted,
    Cancelled,
    Failed,
}

impl CollectorState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CollectorState::Exhausted | CollectorState::Cancelled | CollectorState::Failed
        )
    }
}

/// One fetched page and the cursor as it stood after folding it in.
#[derive(Debug, Clone)]
pub struct CollectedPage {
    pub summaries: Vec<OrderSummary>,
    pub cursor: PageCursor,
}

pub struct PageCollector {
    session: Arc<SourceSession>,
    query: ListQuery,
    cursor: PageCursor,
    inter_page_delay: Duration,
    state: CollectorState,
}

impl PageCollector {
    #[must_use]
    pub fn new(
        session: Arc<SourceSession>,
        query: ListQuery,
        page_size: u32,
        inter_page_delay: Duration,
    ) -> Self {
        Self {
            session,
            query,
            cursor: PageCursor::first(page_size.max(1)),
            inter_page_delay,
            state: CollectorState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> CollectorState {
        self.state
    }

    #[must_use]
    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Fetches the next page, or `Ok(None)` once collection has stopped.
    ///
    /// # Errors
    ///
    /// Returns the source error that stopped pagination. The collector is
    /// `Failed` afterwards and yields no more pages.
    pub async fn next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<CollectedPage>, SourceError> {
        if self.state.is_terminal() {
            return Ok(None);
        }

        if self.state == CollectorState::Fetching && !self.inter_page_delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(self.inter_page_delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Ok(self.stop_cancelled());
        }

        self.state = CollectorState::Fetching;
        let page_number = self.cursor.page_number;
        let page = match self
            .session
            .list_orders(&self.query, page_number, self.cursor.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(
                    page = page_number,
                    error = %e,
                    "order listing failed, stopping pagination"
                );
                self.state = CollectorState::Failed;
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            return Ok(self.stop_cancelled());
        }

        if page.summaries.is_empty() {
            if page_number == 1 {
                tracing::info!("no orders in range");
            } else {
                tracing::info!(page = page_number, "empty page, all orders collected");
            }
            self.state = CollectorState::Exhausted;
            return Ok(None);
        }

        self.cursor.observe(page.pages, page.total, page.summaries.len());
        let snapshot = self.cursor;
        tracing::info!(
            page = snapshot.page_number,
            total_pages = snapshot.total_pages,
            total_items = snapshot.total_items,
            items = page.summaries.len(),
            "collected page"
        );

        if self.cursor.is_last_page() {
            tracing::info!(
                page = page_number,
                total_pages = snapshot.total_pages,
                "reached last page"
            );
            self.state = CollectorState::Exhausted;
        } else {
            self.cursor.advance();
        }

        Ok(Some(CollectedPage {
            summaries: page.summaries,
            cursor: snapshot,
        }))
    }

    fn stop_cancelled(&mut self) -> Option<CollectedPage> {
        tracing::info!(page = self.cursor.page_number, "collection cancelled");
        self.state = CollectorState::Cancelled;
        None
    }
}
