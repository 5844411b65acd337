use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{OptionExt, Result, WrapErr, eyre};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1/";
const STATE_FILE_NAME: &str = "snapshot_map.json";

/// On-disk configuration file. Every field is optional; command line flags and
/// environment variables fill in or override values.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spotify user whose playlists are mirrored
    owner: Option<String>,
    /// Base directory playlists are downloaded into
    output_directory: Option<String>,
    /// Where the sync state is kept (default: <output_directory>/snapshot_map.json)
    state_file: Option<String>,
    sync: SyncSection,
    spotify: SpotifySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_delay: String,
    pub stagger_delay: String,
    pub stagger_per_item: String,
    pub max_stagger: String,
    pub stagger_jitter: String,
    pub hard_ban_threshold: String,
    pub prune_deleted: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_retries: 5,
            base_delay: "30s".into(),
            stagger_delay: "5s".into(),
            stagger_per_item: "100ms".into(),
            max_stagger: "2m".into(),
            stagger_jitter: "3s".into(),
            hard_ban_threshold: "1h".into(),
            prune_deleted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifySection {
    pub access_token: Option<String>,
    pub api_base: String,
    pub requests_per_second: u32,
    pub spotdl_path: Option<String>,
}

impl Default for SpotifySection {
    fn default() -> Self {
        Self {
            access_token: None,
            api_base: DEFAULT_API_BASE.into(),
            requests_per_second: 5,
            spotdl_path: None,
        }
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub owner: Option<String>,
    pub output_directory: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub base_delay: Option<Duration>,
    pub prune_deleted: bool,
    pub access_token: Option<String>,
    pub spotdl_path: Option<PathBuf>,
}

/// Resolved, immutable settings for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub owner: String,
    pub output_dir: PathBuf,
    pub state_path: PathBuf,
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub stagger_delay: Duration,
    pub stagger_per_item: Duration,
    pub max_stagger: Duration,
    pub stagger_jitter: Duration,
    pub hard_ban_threshold: Duration,
    pub prune_deleted: bool,
}

/// Settings for the Spotify catalog and spotdl adapters.
#[derive(Debug, Clone)]
pub struct SpotifySettings {
    pub access_token: String,
    pub api_base: Url,
    pub requests_per_second: u32,
    pub spotdl_path: Option<PathBuf>,
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("playlist-mirror").join("config.toml"))
    }

    /// Load the default config file, or an empty config if there is none.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Write a config file with every default spelled out, unless one exists.
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or_eyre("No config directory on this platform")?;
        if path.exists() {
            tracing::info!("Config already exists at {}", path.display());
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents =
            toml::to_string_pretty(&Self::default()).wrap_err("Failed to render default config")?;
        std::fs::write(&path, contents)
            .wrap_err_with(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(path)
    }

    /// Expand ~ to home directory
    fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    fn output_dir(&self, overrides: &Overrides) -> Result<PathBuf> {
        if let Some(dir) = &overrides.output_directory {
            return Ok(dir.clone());
        }
        if let Some(dir) = &self.output_directory {
            return Ok(Self::expand_path(dir));
        }
        dirs::audio_dir()
            .map(|dir| dir.join("playlist-mirror"))
            .ok_or_eyre("No output directory configured")
    }

    pub fn sync_config(&self, overrides: &Overrides) -> Result<SyncConfig> {
        let owner = overrides
            .owner
            .clone()
            .or_else(|| self.owner.clone())
            .filter(|owner| !owner.is_empty())
            .ok_or_eyre("No playlist owner configured (set `owner` or pass --owner)")?;
        let output_dir = self.output_dir(overrides)?;
        let state_path = match (&overrides.state_file, &self.state_file) {
            (Some(path), _) => path.clone(),
            (None, Some(path)) => Self::expand_path(path),
            (None, None) => output_dir.join(STATE_FILE_NAME),
        };
        let sync = &self.sync;

        let concurrency = overrides.concurrency.unwrap_or(sync.concurrency);
        if concurrency == 0 {
            return Err(eyre!("concurrency must be at least 1"));
        }

        Ok(SyncConfig {
            owner,
            output_dir,
            state_path,
            concurrency,
            max_retries: overrides.max_retries.unwrap_or(sync.max_retries),
            base_delay: match overrides.base_delay {
                Some(delay) => delay,
                None => parse_duration("sync.base_delay", &sync.base_delay)?,
            },
            stagger_delay: parse_duration("sync.stagger_delay", &sync.stagger_delay)?,
            stagger_per_item: parse_duration("sync.stagger_per_item", &sync.stagger_per_item)?,
            max_stagger: parse_duration("sync.max_stagger", &sync.max_stagger)?,
            stagger_jitter: parse_duration("sync.stagger_jitter", &sync.stagger_jitter)?,
            hard_ban_threshold: parse_duration(
                "sync.hard_ban_threshold",
                &sync.hard_ban_threshold,
            )?,
            prune_deleted: overrides.prune_deleted || sync.prune_deleted,
        })
    }

    pub fn spotify_settings(&self, overrides: &Overrides) -> Result<SpotifySettings> {
        let access_token = overrides
            .access_token
            .clone()
            .or_else(|| self.spotify.access_token.clone())
            .ok_or_eyre("No Spotify access token configured (set SPOTIFY_ACCESS_TOKEN)")?;
        // Url::join drops the last path segment unless it ends with a slash.
        let mut api_base = self.spotify.api_base.clone();
        if !api_base.ends_with('/') {
            api_base.push('/');
        }
        let api_base = Url::parse(&api_base)
            .wrap_err_with(|| format!("Invalid spotify.api_base: {}", self.spotify.api_base))?;

        Ok(SpotifySettings {
            access_token,
            api_base,
            requests_per_second: self.spotify.requests_per_second.max(1),
            spotdl_path: overrides.spotdl_path.clone().or_else(|| {
                self.spotify
                    .spotdl_path
                    .as_deref()
                    .map(Self::expand_path)
            }),
        })
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).wrap_err_with(|| format!("Invalid duration for {}: {:?}", key, value))
}
