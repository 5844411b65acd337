use std::time::Duration;

/// One playlist as returned by a catalog listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPlaylist {
    pub name: String,
    pub owner_id: String,
    pub url: String,
    pub remote_id: String,
    pub revision_token: String,
    pub item_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub items: Vec<CatalogPlaylist>,
    /// Cursor for the next page; `None` once the listing is exhausted.
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok,
    RateLimited { retry_after: Option<Duration> },
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Rate limited by catalog (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Failed to send http request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Catalog returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid catalog url: {0}")]
    InvalidUrl(String),
}

/// Port trait for the remote playlist catalog.
///
/// Implementations live in `spotify_rs::client` (production) or test mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_playlists(
        &self,
        owner: &str,
        page_token: Option<String>,
    ) -> Result<CatalogPage, CatalogError>;

    /// Cheap request used to detect rate limiting before a run starts.
    async fn probe(&self, owner: &str) -> ProbeStatus;
}
