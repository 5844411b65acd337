use serde::Deserialize;

use crate::ports::catalog::CatalogPlaylist;

/// Spotify user profile
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyUser {
    pub id: String,
}

/// Simplified playlist object from a playlist listing
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyPlaylist {
    pub id: String,
    pub name: String,
    pub snapshot_id: String,
    pub owner: SpotifyUser,
    #[serde(default)]
    pub external_urls: SpotifyExternalUrls,
    #[serde(default)]
    pub tracks: SpotifyPlaylistTracks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyExternalUrls {
    pub spotify: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyPlaylistTracks {
    pub total: u32,
}

/// One page of `GET /users/{id}/playlists`
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyPlaylistsPage {
    // The API occasionally returns null entries for playlists it can't render.
    pub items: Vec<Option<SpotifyPlaylist>>,
    pub next: Option<String>,
    pub offset: u32,
    pub total: u32,
}

impl From<SpotifyPlaylist> for CatalogPlaylist {
    fn from(playlist: SpotifyPlaylist) -> Self {
        let url = playlist
            .external_urls
            .spotify
            .unwrap_or_else(|| format!("https://open.spotify.com/playlist/{}", playlist.id));
        Self {
            name: playlist.name,
            owner_id: playlist.owner.id,
            url,
            remote_id: playlist.id,
            revision_token: playlist.snapshot_id,
            item_count: playlist.tracks.total,
        }
    }
}
