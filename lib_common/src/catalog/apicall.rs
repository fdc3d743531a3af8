//! # Catalog Client
//!
//! Fetches the outlet catalog and hands it to the poller as a snapshot.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::schema::ApiResult;
use crate::core::model::CatalogSnapshot;
use crate::core::poller::SnapshotSource;
use crate::retrieve::ky_http::ApiClient;

/// Why a catalog fetch failed.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Network failure or undecodable body.
    #[error("catalog request failed: {0:#}")]
    Transport(#[from] anyhow::Error),
    /// The endpoint answered with a non-2xx status.
    #[error("catalog endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Start of the response body.
        body: String,
    },
}

/// Outlet catalog endpoint.
#[derive(Clone)]
pub struct CatalogClient {
    api: ApiClient,
}

impl CatalogClient {
    /// A client for the search URL `api_uri` (query string included).
    ///
    /// # Errors
    /// Fails on a malformed URL.
    pub fn new(api_uri: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { api: ApiClient::new(api_uri, timeout)? })
    }

    /// Fetches and flattens the full catalog.
    pub async fn fetch_catalog(&self) -> Result<CatalogSnapshot, CatalogError> {
        tracing::debug!(endpoint = %crate::retrieve::ky_http::redact(self.api.base_url()), "Polling catalog");
        let response = self.api.get::<ApiResult>("").await?;

        match response.data {
            Some(result) if response.success => {
                let items = result.into_items();
                tracing::debug!(items = items.len(), "Catalog fetched");
                Ok(Arc::new(items))
            }
            _ => Err(CatalogError::Status {
                status: response.status,
                body: response.error_body.unwrap_or_default().chars().take(200).collect(),
            }),
        }
    }
}

impl SnapshotSource for CatalogClient {
    type Snapshot = CatalogSnapshot;
    type Error = CatalogError;

    async fn fetch(&self) -> Result<CatalogSnapshot, CatalogError> {
        self.fetch_catalog().await
    }
}
