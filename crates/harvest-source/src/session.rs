use std::future::Future;
use std::sync::Arc;

use harvest_core::{CredentialBundle, OrderDetail};

use crate::client::SourceClient;
use crate::credentials::CredentialStore;
use crate::error::SourceError;
use crate::query::ListQuery;
use crate::wire::ListPage;

/// A [`SourceClient`] bound to the run's [`CredentialStore`].
///
/// A call that comes back with [`SourceError::AuthExpired`] triggers one
/// refresh and exactly one resubmission with the new bundle. A second
/// expiry is returned to the caller.
pub struct SourceSession {
    client: SourceClient,
    credentials: Arc<CredentialStore>,
}

impl SourceSession {
    #[must_use]
    pub fn new(client: SourceClient, credentials: Arc<CredentialStore>) -> Self {
        Self { client, credentials }
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    #[must_use]
    pub fn client(&self) -> &SourceClient {
        &self.client
    }

    /// # Errors
    ///
    /// See [`SourceClient::list_orders`]; credential failures surface as
    /// [`SourceError::Credentials`].
    pub async fn list_orders(
        &self,
        query: &ListQuery,
        page: u32,
        page_size: u32,
    ) -> Result<ListPage, SourceError> {
        self.with_reauth("order-list", move |bundle| async move {
            self.client.list_orders(&bundle, query, page, page_size).await
        })
        .await
    }

    /// # Errors
    ///
    /// See [`SourceClient::order_detail`].
    pub async fn order_detail(
        &self,
        order_no: &str,
        order_type: &str,
    ) -> Result<OrderDetail, SourceError> {
        self.with_reauth("order-detail", move |bundle| async move {
            self.client.order_detail(&bundle, order_no, order_type).await
        })
        .await
    }

    async fn with_reauth<T, F, Fut>(&self, endpoint: &str, mut call: F) -> Result<T, SourceError>
    where
        F: FnMut(CredentialBundle) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let (bundle, generation) = self.credentials.ensure_valid().await?;
        match call(bundle).await {
            Err(SourceError::AuthExpired { message }) => {
                tracing::warn!(endpoint, %message, "source session expired, refreshing once");
                let (fresh, _) = self
                    .credentials
                    .refresh_if_unchanged(generation, &message)
                    .await?;
                call(fresh).await
            }
            other => other,
        }
    }
}
