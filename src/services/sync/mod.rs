pub mod backoff;
pub mod diff;
pub mod error;
pub mod events;
pub mod executor;
pub mod snapshot;
pub mod state_store;
pub mod types;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::ports::catalog::{CatalogClient, CatalogPlaylist, ProbeStatus};
use crate::ports::fetcher::Fetcher;

use backoff::{BackoffPolicy, Sleeper, TokioSleeper};
use diff::{compute_queue, stale_entries};
use error::SyncError;
use events::{NoProgress, ProgressSink, SyncEvent};
use executor::Executor;
use snapshot::{build_snapshot, list_all_playlists};
use state_store::StateStore;
use types::{AbortReason, SnapshotMap, SyncReport, WorkItem};

/// Keeps the local playlist mirror in step with the remote catalog.
pub struct SyncEngine<C: CatalogClient, F: Fetcher> {
    config: Arc<SyncConfig>,
    catalog: C,
    fetcher: F,
    sleeper: Box<dyn Sleeper>,
    progress: Box<dyn ProgressSink>,
}

impl<C: CatalogClient, F: Fetcher> SyncEngine<C, F> {
    pub fn new(config: Arc<SyncConfig>, catalog: C, fetcher: F) -> Self {
        Self {
            config,
            catalog,
            fetcher,
            sleeper: Box::new(TokioSleeper),
            progress: Box::new(NoProgress),
        }
    }

    #[cfg(test)]
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    /// Fetches every playlist of `owner` that changed since the last run and
    /// records each one as soon as it is done.
    ///
    /// Listing failures are returned as errors before any state is touched.
    /// Rate-limit aborts and cancellation are reported through
    /// [`SyncReport::abort_reason`].
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn sync(
        &self,
        owner: &str,
        shutdown: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        match self.catalog.probe(owner).await {
            ProbeStatus::Ok => {}
            ProbeStatus::RateLimited { retry_after } => {
                tracing::warn!(retry_after = ?retry_after, "Already rate limited, not starting");
                return Ok(self.finish(SyncReport::aborted_with(AbortReason::ProbeRateLimited)));
            }
            ProbeStatus::Error(reason) => {
                tracing::warn!(reason = %reason, "Liveness probe failed, continuing anyway");
            }
        }

        let current = build_snapshot(&self.catalog, owner).await?;
        self.progress.emit(SyncEvent::SnapshotBuilt {
            playlists: current.len(),
        });

        let store = StateStore::new(&self.config.state_path);
        let previous = store.load();
        tracing::debug!(path = %store.path().display(), stored = previous.len(), "Loaded sync state");
        let queue = compute_queue(&current, &previous);
        tracing::info!(
            playlists = current.len(),
            queued = queue.len(),
            "Computed sync queue"
        );
        self.progress.emit(SyncEvent::QueueBuilt {
            items: queue.clone(),
        });

        let queue_size = queue.len();
        let executor = Executor {
            fetcher: &self.fetcher,
            sleeper: self.sleeper.as_ref(),
            progress: self.progress.as_ref(),
            store: &store,
            policy: BackoffPolicy::from_config(&self.config),
            output_dir: self.config.output_dir.clone(),
            concurrency: self.config.concurrency,
            stagger_jitter: self.config.stagger_jitter,
        };
        let summary = executor.run(queue, &current, shutdown).await;

        let mut report = SyncReport {
            queue_size,
            succeeded: summary.succeeded,
            abandoned: summary.abandoned,
            uncommitted: summary.uncommitted,
            skipped: summary.skipped,
            pruned: 0,
            aborted: summary.abort_reason.is_some(),
            abort_reason: summary.abort_reason,
        };

        if self.config.prune_deleted && !report.aborted {
            report.pruned = self.prune(&store, &current, &previous);
        }

        Ok(self.finish(report))
    }

    /// The queue `sync` would work through, without fetching or writing.
    #[tracing::instrument(skip(self))]
    pub async fn preview(&self, owner: &str) -> Result<Vec<WorkItem>, SyncError> {
        let current = build_snapshot(&self.catalog, owner).await?;
        let previous = StateStore::new(&self.config.state_path).load();
        Ok(compute_queue(&current, &previous))
    }

    /// Every playlist in `owner`'s listing, including ones owned by others.
    pub async fn list(&self, owner: &str) -> Result<Vec<CatalogPlaylist>, SyncError> {
        list_all_playlists(&self.catalog, owner).await
    }

    fn prune(&self, store: &StateStore, current: &SnapshotMap, previous: &SnapshotMap) -> usize {
        let mut pruned = 0;
        for name in stale_entries(current, previous) {
            match store.remove(name) {
                Ok(true) => {
                    tracing::info!(playlist = name, "Pruned playlist no longer in listing");
                    self.progress.emit(SyncEvent::Pruned {
                        name: name.to_string(),
                    });
                    pruned += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(playlist = name, error = %e, "Failed to prune playlist"),
            }
        }
        pruned
    }

    fn finish(&self, report: SyncReport) -> SyncReport {
        if let Some(reason) = &report.abort_reason {
            self.progress.emit(SyncEvent::Aborted {
                reason: reason.clone(),
            });
        }
        tracing::info!(
            queued = report.queue_size,
            succeeded = report.succeeded,
            abandoned = report.abandoned,
            aborted = report.aborted,
            "Sync finished"
        );
        self.progress.emit(SyncEvent::Finished {
            report: report.clone(),
        });
        report
    }
}
