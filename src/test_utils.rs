use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::SyncConfig;
use crate::ports::catalog::CatalogPlaylist;
use crate::ports::fetcher::{FetchError, Fetcher};
use crate::services::sync::backoff::Sleeper;
use crate::services::sync::events::{ProgressSink, SyncEvent};
use crate::services::sync::types::{PlaylistSnapshot, SnapshotMap};

pub fn playlist_url(name: &str) -> String {
    format!("https://open.spotify.com/playlist/{}", name)
}

pub fn snapshot(name: &str, revision: &str) -> PlaylistSnapshot {
    PlaylistSnapshot {
        url: playlist_url(name),
        revision_token: revision.to_string(),
        item_count: 10,
        remote_id: Some(format!("id-{}", name)),
    }
}

pub fn snapshot_map(entries: &[(&str, &str)]) -> SnapshotMap {
    entries
        .iter()
        .map(|(name, revision)| (name.to_string(), snapshot(name, revision)))
        .collect()
}

pub fn catalog_playlist(name: &str, owner: &str, revision: &str) -> CatalogPlaylist {
    CatalogPlaylist {
        name: name.to_string(),
        owner_id: owner.to_string(),
        url: playlist_url(name),
        remote_id: format!("id-{}", name),
        revision_token: revision.to_string(),
        item_count: 10,
    }
}

/// Engine config rooted in `dir` with no real delays.
pub fn test_config(dir: &Path) -> SyncConfig {
    SyncConfig {
        owner: "me".into(),
        output_dir: dir.join("music"),
        state_path: dir.join("snapshot_map.json"),
        concurrency: 1,
        max_retries: 3,
        base_delay: Duration::from_secs(1),
        stagger_delay: Duration::ZERO,
        stagger_per_item: Duration::ZERO,
        max_stagger: Duration::ZERO,
        stagger_jitter: Duration::ZERO,
        hard_ban_threshold: Duration::from_secs(3600),
        prune_deleted: false,
    }
}

/// Returns immediately and remembers what it was asked to sleep.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

#[derive(Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: SyncEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Fetcher with per-url scripted results. Urls marked with `hang` never
/// complete; unscripted urls succeed. Every fetch yields to the runtime once
/// so concurrent items interleave.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<(), FetchError>>>>,
    hanging: HashSet<String>,
}

impl ScriptedFetcher {
    pub fn script(self, url: &str, results: Vec<Result<(), FetchError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), results.into());
        self
    }

    pub fn hang(mut self, url: &str) -> Self {
        self.hanging.insert(url.to_string());
        self
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _destination: &Path) -> Result<(), FetchError> {
        if self.hanging.contains(url) {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|results| results.pop_front());
        next.unwrap_or(Ok(()))
    }
}
