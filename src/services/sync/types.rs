use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Last known state of one playlist, keyed by its name in a [`SnapshotMap`].
///
/// Field names on disk follow the `snapshot_map.json` layout written by earlier
/// versions of the tool, so existing state files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub url: String,
    #[serde(rename = "snapshot_id")]
    pub revision_token: String,
    #[serde(default)]
    pub item_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

/// Playlist name -> snapshot. Ordered so serialization and diffing are stable.
pub type SnapshotMap = BTreeMap<String, PlaylistSnapshot>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
}

/// A playlist that has to be fetched again during the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub name: String,
    pub url: String,
    pub item_count: u32,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The liveness probe reported rate limiting before any work started.
    ProbeRateLimited,
    /// The remote suspended the credential while fetching `playlist`.
    HardBanned { playlist: String },
    /// The user asked the run to stop.
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::ProbeRateLimited => write!(f, "rate limited before starting"),
            AbortReason::HardBanned { playlist } => {
                write!(f, "hard ban reported while fetching '{}'", playlist)
            }
            AbortReason::Cancelled => write!(f, "cancelled by user"),
        }
    }
}

/// Summary of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub queue_size: usize,
    pub succeeded: usize,
    pub abandoned: usize,
    /// Fetched successfully but the state commit failed; retried next run.
    pub uncommitted: usize,
    /// Never started because the run stopped first.
    pub skipped: usize,
    pub pruned: usize,
    pub aborted: bool,
    pub abort_reason: Option<AbortReason>,
}

impl SyncReport {
    pub fn aborted_with(reason: AbortReason) -> Self {
        Self {
            aborted: true,
            abort_reason: Some(reason),
            ..Self::default()
        }
    }
}
