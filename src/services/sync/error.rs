use std::path::PathBuf;

use crate::ports::catalog::CatalogError;

/// Run-level failures returned from the sync entry points.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to list playlists for '{owner}': {source}")]
    ListingFailure {
        owner: String,
        #[source]
        source: CatalogError,
    },
}

/// A state commit that could not complete. The file on disk is left as it was.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Failed to serialize snapshot map: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write temporary state file in {dir}: {source}")]
    WriteTemp {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to replace state file {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("State write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
