use super::types::{ChangeKind, SnapshotMap, WorkItem};

/// Playlists in `current` that are new or whose revision token moved since
/// `previous`, in ascending name order.
///
/// Entries only present in `previous` are ignored; removal is not a diff concern.
pub fn compute_queue(current: &SnapshotMap, previous: &SnapshotMap) -> Vec<WorkItem> {
    current
        .iter()
        .filter_map(|(name, snapshot)| {
            let change = match previous.get(name) {
                None => ChangeKind::Added,
                Some(prev) if prev.revision_token != snapshot.revision_token => {
                    ChangeKind::Updated
                }
                Some(_) => return None,
            };
            Some(WorkItem {
                name: name.clone(),
                url: snapshot.url.clone(),
                item_count: snapshot.item_count,
                change,
            })
        })
        .collect()
}

/// Names stored in `previous` that no longer appear in `current`.
pub fn stale_entries<'a>(current: &SnapshotMap, previous: &'a SnapshotMap) -> Vec<&'a str> {
    previous
        .keys()
        .filter(|name| !current.contains_key(*name))
        .map(String::as_str)
        .collect()
}
