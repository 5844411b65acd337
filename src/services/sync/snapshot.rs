use crate::ports::catalog::{CatalogClient, CatalogPlaylist};

use super::error::SyncError;
use super::types::{PlaylistSnapshot, SnapshotMap};

/// Walks every page of `owner`'s playlist listing.
///
/// Any page failure aborts the walk; nothing fetched so far is returned.
pub async fn list_all_playlists<C: CatalogClient + ?Sized>(
    catalog: &C,
    owner: &str,
) -> Result<Vec<CatalogPlaylist>, SyncError> {
    let mut playlists = Vec::new();
    let mut page_token = None;

    loop {
        let page = catalog
            .list_playlists(owner, page_token)
            .await
            .map_err(|source| SyncError::ListingFailure {
                owner: owner.to_string(),
                source,
            })?;

        tracing::debug!(count = page.items.len(), "Fetched playlist page");
        playlists.extend(page.items);

        match page.next_page_token {
            Some(next) => page_token = Some(next),
            None => break,
        }
    }

    Ok(playlists)
}

/// Current snapshot of the playlists `owner` owns. Playlists followed from
/// other users are never sync targets.
#[tracing::instrument(skip(catalog))]
pub async fn build_snapshot<C: CatalogClient + ?Sized>(
    catalog: &C,
    owner: &str,
) -> Result<SnapshotMap, SyncError> {
    let listing = list_all_playlists(catalog, owner).await?;
    let mut snapshot = SnapshotMap::new();

    for playlist in listing.into_iter().filter(|p| p.owner_id == owner) {
        let record = PlaylistSnapshot {
            url: playlist.url,
            revision_token: playlist.revision_token,
            item_count: playlist.item_count,
            remote_id: Some(playlist.remote_id),
        };
        // Names are the identity key; a later playlist with the same name wins.
        if let Some(previous) = snapshot.insert(playlist.name.clone(), record) {
            tracing::warn!(
                playlist = %playlist.name,
                replaced = ?previous.remote_id,
                "Duplicate playlist name in listing, keeping the later one"
            );
        }
    }

    tracing::info!(playlists = snapshot.len(), "Built playlist snapshot");
    Ok(snapshot)
}
