use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use url::Url;

use crate::config::SpotifySettings;
use crate::ports::catalog::{CatalogClient, CatalogError, CatalogPage, ProbeStatus};
use crate::spotify_rs::types::SpotifyPlaylistsPage;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Max page size the playlists endpoint accepts
const PAGE_LIMIT: &str = "50";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Spotify Web API client for playlist listings.
pub struct SpotifyWebClient {
    access_token: String,
    api_base: Url,
    client: Client,
    // governor's limiter is already thread-safe, no mutex needed.
    rate_limiter: DirectRateLimiter,
}

impl SpotifyWebClient {
    pub fn new(settings: &SpotifySettings) -> Self {
        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            access_token: settings.access_token.clone(),
            api_base: settings.api_base.clone(),
            client: Client::new(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CatalogError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::InvalidUrl(self.api_base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn first_page_url(&self, owner: &str) -> Result<Url, CatalogError> {
        let mut url = self.endpoint(&["users", owner, "playlists"])?;
        url.query_pairs_mut().append_pair("limit", PAGE_LIMIT);
        Ok(url)
    }

    /// Cursors are the `next` links the API hands back. They carry the bearer
    /// token, so they must point at the configured API host.
    fn cursor_url(&self, cursor: &str) -> Result<Url, CatalogError> {
        let url = Url::parse(cursor).map_err(|_| CatalogError::InvalidUrl(cursor.to_string()))?;
        if url.origin() != self.api_base.origin() {
            return Err(CatalogError::InvalidUrl(cursor.to_string()));
        }
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<Response, CatalogError> {
        self.rate_limiter.until_ready().await;
        tracing::debug!(url = %url, "Spotify API request");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CatalogError::RateLimited {
                retry_after: retry_after(response.headers()),
            });
        }
        if !status.is_success() {
            return Err(CatalogError::Api {
                status: status.as_u16(),
                message: response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Failed to get error text".to_string()),
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl CatalogClient for SpotifyWebClient {
    async fn list_playlists(
        &self,
        owner: &str,
        page_token: Option<String>,
    ) -> Result<CatalogPage, CatalogError> {
        let url = match page_token {
            Some(cursor) => self.cursor_url(&cursor)?,
            None => self.first_page_url(owner)?,
        };

        let page: SpotifyPlaylistsPage = self.get(url).await?.json().await?;
        tracing::debug!(
            offset = page.offset,
            total = page.total,
            "Received playlist page"
        );

        Ok(CatalogPage {
            items: page.items.into_iter().flatten().map(Into::into).collect(),
            next_page_token: page.next,
        })
    }

    async fn probe(&self, owner: &str) -> ProbeStatus {
        let url = match self.endpoint(&["users", owner]) {
            Ok(url) => url,
            Err(e) => return ProbeStatus::Error(e.to_string()),
        };
        match self.get(url).await {
            Ok(_) => ProbeStatus::Ok,
            Err(CatalogError::RateLimited { retry_after }) => {
                ProbeStatus::RateLimited { retry_after }
            }
            Err(e) => ProbeStatus::Error(e.to_string()),
        }
    }
}

/// `Retry-After` in delta-seconds form; Spotify never sends the date form.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
