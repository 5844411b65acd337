use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use super::types::{AbortReason, SyncReport, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownReason {
    /// Waiting after the remote rate limited an attempt.
    RateLimited,
    /// Spacing out the start of the next playlist.
    Stagger,
}

/// Progress notifications emitted while a sync runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    SnapshotBuilt {
        playlists: usize,
    },
    QueueBuilt {
        items: Vec<WorkItem>,
    },
    ItemStarted {
        name: String,
        attempt: u32,
    },
    Cooldown {
        name: String,
        delay: Duration,
        reason: CooldownReason,
    },
    ItemCommitted {
        name: String,
    },
    ItemAbandoned {
        name: String,
        reason: String,
    },
    CommitFailed {
        name: String,
        error: String,
    },
    Pruned {
        name: String,
    },
    Aborted {
        reason: AbortReason,
    },
    Finished {
        report: SyncReport,
    },
}

/// Receiver side of engine progress. Must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

impl ProgressSink for UnboundedSender<SyncEvent> {
    fn emit(&self, event: SyncEvent) {
        // Presentation may have shut down already; progress is best effort.
        let _ = self.send(event);
    }
}

/// Discards every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: SyncEvent) {}
}
