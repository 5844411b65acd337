use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use crate::ports::fetcher::{FetchError, Fetcher};

use super::backoff::{BackoffPolicy, Sleeper};
use super::events::{CooldownReason, ProgressSink, SyncEvent};
use super::state_store::StateStore;
use super::types::{AbortReason, SnapshotMap, WorkItem};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    Committed,
    Abandoned,
    /// Fetched, but the state commit failed.
    Uncommitted,
    /// Never finished because the run was stopped.
    Skipped,
    HardBanned { playlist: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub succeeded: usize,
    pub abandoned: usize,
    pub uncommitted: usize,
    pub skipped: usize,
    pub abort_reason: Option<AbortReason>,
}

/// Runs a work queue against the fetcher, committing each playlist as soon as
/// its fetch succeeds.
pub struct Executor<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub sleeper: &'a dyn Sleeper,
    pub progress: &'a dyn ProgressSink,
    pub store: &'a StateStore,
    pub policy: BackoffPolicy,
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub stagger_jitter: Duration,
}

impl Executor<'_> {
    /// Processes `queue` in random order. Records committed to the store come
    /// from `target`, never from the work items themselves.
    ///
    /// Cancelling `shutdown` stops new items from starting; items already
    /// fetching finish and commit. A hard ban from the fetcher stops
    /// everything, including in-flight fetches, and nothing else is committed.
    pub async fn run(
        &self,
        mut queue: Vec<WorkItem>,
        target: &SnapshotMap,
        shutdown: &CancellationToken,
    ) -> ExecutionSummary {
        queue.shuffle(&mut rand::rng());
        let banned = CancellationToken::new();

        let outcomes: Vec<ItemOutcome> = futures::stream::iter(queue.into_iter().enumerate())
            .map(|(index, item)| self.process(index, item, target, shutdown, &banned))
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;

        let mut summary = ExecutionSummary::default();
        for outcome in outcomes {
            match outcome {
                ItemOutcome::Committed => summary.succeeded += 1,
                ItemOutcome::Abandoned => summary.abandoned += 1,
                ItemOutcome::Uncommitted => summary.uncommitted += 1,
                ItemOutcome::Skipped => summary.skipped += 1,
                ItemOutcome::HardBanned { playlist } => {
                    summary.skipped += 1;
                    summary
                        .abort_reason
                        .get_or_insert(AbortReason::HardBanned { playlist });
                }
            }
        }
        if summary.abort_reason.is_none() && shutdown.is_cancelled() {
            summary.abort_reason = Some(AbortReason::Cancelled);
        }
        summary
    }

    async fn process(
        &self,
        index: usize,
        item: WorkItem,
        target: &SnapshotMap,
        shutdown: &CancellationToken,
        banned: &CancellationToken,
    ) -> ItemOutcome {
        if banned.is_cancelled() || shutdown.is_cancelled() {
            return ItemOutcome::Skipped;
        }

        if index > 0 {
            let delay = self.policy.stagger(item.item_count) + jitter(self.stagger_jitter);
            self.progress.emit(SyncEvent::Cooldown {
                name: item.name.clone(),
                delay,
                reason: CooldownReason::Stagger,
            });
            if !self.pause(delay, shutdown, banned).await {
                return ItemOutcome::Skipped;
            }
        }

        let Some(record) = target.get(&item.name) else {
            return self.abandon(&item, "playlist missing from current snapshot".into());
        };
        let destination = playlist_dir(&self.output_dir, &item.name);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.progress.emit(SyncEvent::ItemStarted {
                name: item.name.clone(),
                attempt,
            });
            tracing::info!(playlist = %item.name, attempt, "Fetching playlist");

            let result = tokio::select! {
                _ = banned.cancelled() => return ItemOutcome::Skipped,
                result = self.fetcher.fetch(&item.url, &destination) => result,
            };

            match result {
                Ok(()) => break,
                Err(FetchError::HardBanned { retry_after }) => {
                    tracing::error!(
                        playlist = %item.name,
                        retry_after = ?retry_after,
                        "Remote suspended the credential, aborting run"
                    );
                    banned.cancel();
                    return ItemOutcome::HardBanned {
                        playlist: item.name,
                    };
                }
                Err(FetchError::RateLimited { retry_after }) => {
                    if attempt >= self.policy.max_retries {
                        return self.abandon(
                            &item,
                            format!("still rate limited after {} attempts", attempt),
                        );
                    }
                    let delay = self.policy.retry_delay(attempt, retry_after);
                    tracing::warn!(
                        playlist = %item.name,
                        attempt,
                        delay = %humantime::format_duration(delay),
                        "Rate limited, backing off"
                    );
                    self.progress.emit(SyncEvent::Cooldown {
                        name: item.name.clone(),
                        delay,
                        reason: CooldownReason::RateLimited,
                    });
                    if !self.pause(delay, shutdown, banned).await {
                        return ItemOutcome::Skipped;
                    }
                }
                Err(FetchError::Other { reason }) => return self.abandon(&item, reason),
            }
        }

        if banned.is_cancelled() {
            return ItemOutcome::Skipped;
        }

        match self.store.commit_blocking(&item.name, record.clone()).await {
            Ok(()) => {
                tracing::info!(playlist = %item.name, "Playlist synced");
                self.progress.emit(SyncEvent::ItemCommitted { name: item.name });
                ItemOutcome::Committed
            }
            Err(e) => {
                tracing::warn!(playlist = %item.name, error = %e, "Failed to record synced playlist");
                self.progress.emit(SyncEvent::CommitFailed {
                    name: item.name,
                    error: e.to_string(),
                });
                ItemOutcome::Uncommitted
            }
        }
    }

    fn abandon(&self, item: &WorkItem, reason: String) -> ItemOutcome {
        tracing::warn!(playlist = %item.name, reason = %reason, "Abandoning playlist");
        self.progress.emit(SyncEvent::ItemAbandoned {
            name: item.name.clone(),
            reason,
        });
        ItemOutcome::Abandoned
    }

    /// Sleeps for `delay`. Returns false if the run was stopped meanwhile.
    async fn pause(
        &self,
        delay: Duration,
        shutdown: &CancellationToken,
        banned: &CancellationToken,
    ) -> bool {
        tokio::select! {
            _ = banned.cancelled() => false,
            _ = shutdown.cancelled() => false,
            _ = self.sleeper.sleep(delay) => true,
        }
    }
}

/// Directory a playlist is materialized into.
pub fn playlist_dir(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(sanitize_filename::sanitize(name))
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::ports::fetcher::MockFetcher;
    use crate::services::sync::diff::compute_queue;
    use crate::services::sync::events::NoProgress;
    use crate::test_utils::{RecordingSink, RecordingSleeper, ScriptedFetcher, snapshot_map};

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(10),
            stagger_delay: Duration::from_secs(1),
            stagger_per_item: Duration::ZERO,
            max_stagger: Duration::from_secs(1),
        }
    }

    fn executor<'a>(
        fetcher: &'a dyn Fetcher,
        sleeper: &'a dyn Sleeper,
        progress: &'a dyn ProgressSink,
        store: &'a StateStore,
        concurrency: usize,
    ) -> Executor<'a> {
        Executor {
            fetcher,
            sleeper,
            progress,
            store,
            policy: policy(),
            output_dir: PathBuf::from("/music"),
            concurrency,
            stagger_jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_failed_item_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let target = snapshot_map(&[("one", "1"), ("two", "1"), ("three", "1")]);
        let queue = compute_queue(&target, &SnapshotMap::new());

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(3)
            .returning(|url, _| {
                if url.ends_with("/two") {
                    Err(FetchError::Other {
                        reason: "track unavailable".into(),
                    })
                } else {
                    Ok(())
                }
            });
        let sleeper = RecordingSleeper::default();

        let summary = executor(&fetcher, &sleeper, &NoProgress, &store, 1)
            .run(queue, &target, &CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.abort_reason, None);
        let stored = store.load();
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["one", "three"]);
    }

    #[tokio::test]
    async fn test_rate_limited_item_retries_with_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let target = snapshot_map(&[("A", "1")]);
        let queue = compute_queue(&target, &SnapshotMap::new());

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FetchError::RateLimited { retry_after: None })
            } else {
                Ok(())
            }
        });
        let sleeper = RecordingSleeper::default();
        let sink = RecordingSink::default();

        let summary = executor(&fetcher, &sleeper, &sink, &store, 1)
            .run(queue, &target, &CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.slept(),
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
        assert!(store.load().contains_key("A"));
        assert!(sink.events().contains(&SyncEvent::ItemStarted {
            name: "A".into(),
            attempt: 3
        }));
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let target = snapshot_map(&[("A", "1")]);
        let queue = compute_queue(&target, &SnapshotMap::new());

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(3)
            .returning(|_, _| Err(FetchError::RateLimited { retry_after: None }));
        let sleeper = RecordingSleeper::default();

        let summary = executor(&fetcher, &sleeper, &NoProgress, &store, 1)
            .run(queue, &target, &CancellationToken::new())
            .await;

        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.abort_reason, None);
        assert_eq!(sleeper.slept().len(), 2);
        assert!(store.load().is_empty());
    }

    #[tokio::test]
    async fn test_hard_ban_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let target = snapshot_map(&[("A", "1"), ("B", "1"), ("C", "1")]);
        let queue = compute_queue(&target, &SnapshotMap::new());

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_, _| Err(FetchError::HardBanned { retry_after: None }));
        let sleeper = RecordingSleeper::default();

        let summary = executor(&fetcher, &sleeper, &NoProgress, &store, 1)
            .run(queue, &target, &CancellationToken::new())
            .await;

        assert!(matches!(
            summary.abort_reason,
            Some(AbortReason::HardBanned { .. })
        ));
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.succeeded, 0);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_hard_ban_cancels_in_flight_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let target = snapshot_map(&[("slow", "1"), ("banned", "1")]);
        let queue = compute_queue(&target, &SnapshotMap::new());

        let fetcher = ScriptedFetcher::default()
            .hang("https://open.spotify.com/playlist/slow")
            .script(
                "https://open.spotify.com/playlist/banned",
                vec![Err(FetchError::HardBanned { retry_after: None })],
            );
        let sleeper = RecordingSleeper::default();

        let summary = executor(&fetcher, &sleeper, &NoProgress, &store, 2)
            .run(queue, &target, &CancellationToken::new())
            .await;

        assert_eq!(
            summary.abort_reason,
            Some(AbortReason::HardBanned {
                playlist: "banned".into()
            })
        );
        assert_eq!(summary.succeeded, 0);
        assert!(store.load().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_before_next_item() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let target = snapshot_map(&[("A", "1"), ("B", "1")]);
        let queue = compute_queue(&target, &SnapshotMap::new());

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().times(1).returning(move |_, _| {
            token.cancel();
            Ok(())
        });
        let sleeper = RecordingSleeper::default();

        let summary = executor(&fetcher, &sleeper, &NoProgress, &store, 1)
            .run(queue, &target, &shutdown)
            .await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.abort_reason, Some(AbortReason::Cancelled));
        assert_eq!(store.load().len(), 1);
    }

    #[tokio::test]
    async fn test_stagger_between_items_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let target = snapshot_map(&[("A", "1"), ("B", "1"), ("C", "1")]);
        let queue = compute_queue(&target, &SnapshotMap::new());

        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|_, _| Ok(()));
        let sleeper = RecordingSleeper::default();

        executor(&fetcher, &sleeper, &NoProgress, &store, 1)
            .run(queue, &target, &CancellationToken::new())
            .await;

        assert_eq!(sleeper.slept(), vec![Duration::from_secs(1); 2]);
    }

    #[tokio::test]
    async fn test_fetch_destination_is_per_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let target = snapshot_map(&[("Chill/Vibes", "1")]);
        let queue = compute_queue(&target, &SnapshotMap::new());

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|_, destination| destination == Path::new("/music/ChillVibes"))
            .times(1)
            .returning(|_, _| Ok(()));
        let sleeper = RecordingSleeper::default();

        let summary = executor(&fetcher, &sleeper, &NoProgress, &store, 1)
            .run(queue, &target, &CancellationToken::new())
            .await;
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_items_all_committed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path);
        let entries: Vec<(String, &str)> = (0..12).map(|i| (format!("P{:02}", i), "1")).collect();
        let borrowed: Vec<(&str, &str)> = entries.iter().map(|(n, r)| (n.as_str(), *r)).collect();
        let target = snapshot_map(&borrowed);
        let queue = compute_queue(&target, &SnapshotMap::new());

        let fetcher = ScriptedFetcher::default();
        let sleeper = RecordingSleeper::default();

        let summary = executor(&fetcher, &sleeper, &NoProgress, &store, 4)
            .run(queue, &target, &CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 12);
        assert_eq!(store.load(), target);
        assert_eq!(StateStore::new(&path).load(), target);
    }
}
