mod config;
mod logging;
mod ports;
mod progress;
mod services;
mod spotify_rs;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context, eyre::eyre};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, Overrides, SpotifySettings, SyncConfig},
    logging::init_tracing,
    progress::{format_work_item, spawn_console_progress},
    services::fetch::spotdl::SpotdlFetcher,
    services::sync::SyncEngine,
    spotify_rs::client::SpotifyWebClient,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "PLAYLIST_MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `playlist_mirror=debug`
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// Spotify user whose playlists are mirrored
    #[arg(long, global = true, env = "SPOTIFY_OWNER")]
    owner: Option<String>,

    /// Base directory playlists are downloaded into
    #[arg(short, long, global = true, env = "PLAYLIST_MIRROR_OUTPUT_DIRECTORY")]
    output_directory: Option<PathBuf>,

    /// Sync state file (default: <output directory>/snapshot_map.json)
    #[arg(long, global = true, env = "PLAYLIST_MIRROR_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Spotify Web API access token with playlist-read-private scope
    #[arg(long, global = true, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download every owned playlist that changed since the last sync
    Sync {
        /// Playlists fetched at the same time
        #[arg(long, env = "PLAYLIST_MIRROR_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Attempts per playlist while rate limited
        #[arg(long, env = "PLAYLIST_MIRROR_MAX_RETRIES")]
        max_retries: Option<u32>,

        /// Backoff unit after a rate limited attempt, e.g. `30s`
        #[arg(long, value_parser = humantime::parse_duration, env = "PLAYLIST_MIRROR_BASE_DELAY")]
        base_delay: Option<Duration>,

        /// Forget stored playlists that are no longer listed
        #[arg(long)]
        prune_deleted: bool,

        /// Path to the spotdl executable (default: found on PATH)
        #[arg(long, env = "SPOTDL_PATH")]
        spotdl: Option<PathBuf>,
    },
    /// Show which playlists the next sync would download
    Preview,
    /// List every playlist in the user's library
    List,
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    init_tracing(&args.log_level)?;

    tracing::debug!("Loading configuration");
    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .wrap_err("Failed to load playlist-mirror config")?;

    let mut overrides = Overrides {
        owner: args.owner,
        output_directory: args.output_directory,
        state_file: args.state_file,
        access_token: args.access_token,
        ..Overrides::default()
    };

    match args.command {
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                let path = Config::create_default()?;
                println!("{}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
        Commands::List => {
            let (sync_config, spotify) = resolve(&config, &overrides)?;
            let engine = offline_engine(sync_config.clone(), &spotify);
            let playlists = engine.list(&sync_config.owner).await?;
            for (i, playlist) in playlists.iter().enumerate() {
                let owner = if playlist.owner_id == sync_config.owner {
                    String::new()
                } else {
                    format!(" (owned by {})", playlist.owner_id)
                };
                println!("{:4} {} {}{}", i + 1, playlist.url, playlist.name, owner);
            }
        }
        Commands::Preview => {
            let (sync_config, spotify) = resolve(&config, &overrides)?;
            let engine = offline_engine(sync_config.clone(), &spotify);
            let queue = engine.preview(&sync_config.owner).await?;
            for item in &queue {
                println!("{}", format_work_item(item));
            }
            println!("{} playlists should be updated.", queue.len());
        }
        Commands::Sync {
            concurrency,
            max_retries,
            base_delay,
            prune_deleted,
            spotdl,
        } => {
            overrides.concurrency = concurrency;
            overrides.max_retries = max_retries;
            overrides.base_delay = base_delay;
            overrides.prune_deleted = prune_deleted;
            overrides.spotdl_path = spotdl;
            let (sync_config, spotify) = resolve(&config, &overrides)?;
            run_sync(sync_config, spotify).await?;
        }
    }

    Ok(())
}

fn resolve(config: &Config, overrides: &Overrides) -> Result<(Arc<SyncConfig>, SpotifySettings)> {
    let sync_config = config.sync_config(overrides)?;
    let spotify = config.spotify_settings(overrides)?;
    tracing::debug!(
        owner = %sync_config.owner,
        output = %sync_config.output_dir.display(),
        state = %sync_config.state_path.display(),
        "Resolved configuration"
    );
    Ok((Arc::new(sync_config), spotify))
}

/// Engine for commands that never fetch, so spotdl need not be installed.
fn offline_engine(
    sync_config: Arc<SyncConfig>,
    spotify: &SpotifySettings,
) -> SyncEngine<SpotifyWebClient, SpotdlFetcher> {
    let fetcher = SpotdlFetcher::new(PathBuf::from("spotdl"), sync_config.hard_ban_threshold);
    SyncEngine::new(sync_config, SpotifyWebClient::new(spotify), fetcher)
}

async fn run_sync(sync_config: Arc<SyncConfig>, spotify: SpotifySettings) -> Result<()> {
    let fetcher = SpotdlFetcher::locate(spotify.spotdl_path.clone(), sync_config.hard_ban_threshold)
        .wrap_err("spotdl not found, install it or pass --spotdl")?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing playlists already downloading");
            on_signal.cancel();
        }
    });

    let (progress, renderer) = spawn_console_progress();
    let engine = SyncEngine::new(sync_config.clone(), SpotifyWebClient::new(&spotify), fetcher)
        .with_progress(progress);

    let report = engine.sync(&sync_config.owner, &shutdown).await;
    // Closes the event channel so the renderer can finish.
    drop(engine);
    if let Err(e) = renderer.await {
        tracing::debug!(error = %e, "Progress renderer stopped abnormally");
    }

    let report = report?;
    match report.abort_reason {
        Some(reason) => Err(eyre!("Sync aborted: {}", reason)),
        None => Ok(()),
    }
}
