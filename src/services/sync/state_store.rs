use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tempfile::NamedTempFile;

use super::error::PersistError;
use super::types::{PlaylistSnapshot, SnapshotMap};

/// Durable playlist-name -> snapshot map backed by a single JSON file.
///
/// Every mutation rewrites the whole map into a temporary file next to the
/// target and renames it into place, so readers only ever see a complete map.
/// The mutex serializes the load-merge-replace cycle; it is never held across
/// an await point. Clones share the same cache.
#[derive(Clone)]
pub struct StateStore {
    path: PathBuf,
    cache: Arc<Mutex<Option<SnapshotMap>>>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored map, reading the file on first use.
    ///
    /// A missing or unreadable file yields an empty map, which makes the next
    /// diff treat every playlist as new.
    pub fn load(&self) -> SnapshotMap {
        let mut cache = self.lock();
        cache
            .get_or_insert_with(|| read_snapshot_map(&self.path))
            .clone()
    }

    /// Durably stores `record` under `name`, leaving every other entry as is.
    pub fn commit(&self, name: &str, record: PlaylistSnapshot) -> Result<(), PersistError> {
        let mut cache = self.lock();
        let mut next = match cache.as_ref() {
            Some(map) => map.clone(),
            None => read_snapshot_map(&self.path),
        };
        next.insert(name.to_string(), record);

        self.replace(&next)?;
        *cache = Some(next);

        tracing::debug!(playlist = name, path = %self.path.display(), "Committed playlist snapshot");
        Ok(())
    }

    /// [`commit`](Self::commit) on the blocking pool, for callers on the
    /// async runtime.
    pub async fn commit_blocking(
        &self,
        name: &str,
        record: PlaylistSnapshot,
    ) -> Result<(), PersistError> {
        let store = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || store.commit(&name, record)).await?
    }

    /// Removes `name` from the stored map. Returns whether an entry existed.
    pub fn remove(&self, name: &str) -> Result<bool, PersistError> {
        let mut cache = self.lock();
        let mut next = match cache.as_ref() {
            Some(map) => map.clone(),
            None => read_snapshot_map(&self.path),
        };
        if next.remove(name).is_none() {
            *cache = Some(next);
            return Ok(false);
        }

        self.replace(&next)?;
        *cache = Some(next);
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, Option<SnapshotMap>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(&self, map: &SnapshotMap) -> Result<(), PersistError> {
        let staged = self.stage(map)?;
        staged
            .persist(&self.path)
            .map_err(|e| PersistError::Replace {
                path: self.path.clone(),
                source: e.error,
            })?;
        Ok(())
    }

    /// Writes `map` to a synced temporary file in the state file's directory.
    /// Dropping the returned handle deletes it without touching the target.
    fn stage(&self, map: &SnapshotMap) -> Result<NamedTempFile, PersistError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let write_err = |source| PersistError::WriteTemp {
            dir: dir.clone(),
            source,
        };

        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let bytes = to_pretty_json(map)?;
        let mut staged = tempfile::Builder::new()
            .prefix(".snapshot_map")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(write_err)?;
        staged.write_all(&bytes).map_err(write_err)?;
        staged.as_file().sync_all().map_err(write_err)?;

        Ok(staged)
    }
}

fn read_snapshot_map(path: &Path) -> SnapshotMap {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No state file yet, starting empty");
            return SnapshotMap::new();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "State file unreadable, re-syncing everything");
            return SnapshotMap::new();
        }
    };

    match serde_json::from_str(&contents) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "State file corrupt, re-syncing everything");
            SnapshotMap::new()
        }
    }
}

/// Sorted keys, 4-space indent, trailing newline.
fn to_pretty_json(map: &SnapshotMap) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    map.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}
