use std::path::Path;
use std::time::Duration;

/// Classified fetch failure. Adapters decide the variant once, from whatever
/// their backend reports; the engine never inspects error text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Credential suspended by remote (retry after {retry_after:?})")]
    HardBanned { retry_after: Option<Duration> },
    #[error("Fetch failed: {reason}")]
    Other { reason: String },
}

/// Port trait for materializing a playlist's contents into a directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError>;
}
