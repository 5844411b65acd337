use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use crate::ports::fetcher::{FetchError, Fetcher};

static RETRY_AFTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)retry[- _]?(?:will occur )?after\D{0,5}(\d+)").unwrap());
// Only spotipy's error lines. spotdl's progress output carries playlist and
// track names and counts ("Found 429 songs"), which must never match.
static RATE_LIMITED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:http status|returned|status code)\W{0,3}429\b|rate/request limit").unwrap()
});
static SUSPENDED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)account (?:has been )?(?:suspended|banned)").unwrap());

/// Downloads playlists with the `spotdl` command line tool.
pub struct SpotdlFetcher {
    binary: PathBuf,
    hard_ban_threshold: Duration,
}

impl SpotdlFetcher {
    pub fn new(binary: PathBuf, hard_ban_threshold: Duration) -> Self {
        Self {
            binary,
            hard_ban_threshold,
        }
    }

    /// Uses `binary` when given, otherwise looks `spotdl` up on `PATH`.
    pub fn locate(binary: Option<PathBuf>, hard_ban_threshold: Duration) -> Result<Self, which::Error> {
        let binary = match binary {
            Some(path) => which::which(path)?,
            None => which::which("spotdl")?,
        };
        tracing::debug!(binary = %binary.display(), "Using spotdl");
        Ok(Self::new(binary, hard_ban_threshold))
    }
}

#[async_trait::async_trait]
impl Fetcher for SpotdlFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| FetchError::Other {
                reason: format!("Failed to create {}: {}", destination.display(), e),
            })?;

        let output = Command::new(&self.binary)
            .arg("download")
            .arg(url)
            .arg("--output")
            .arg(destination)
            .stdin(Stdio::null())
            // Dropping the future (hard ban elsewhere) must not leave spotdl running.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Other {
                reason: format!("Failed to run {}: {}", self.binary.display(), e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}\n{}", stdout, stderr);

        // spotdl sometimes exits 0 after giving up on a rate limited request.
        if output.status.success() && !RATE_LIMITED.is_match(&combined) {
            return Ok(());
        }

        let error = classify_failure(&combined, self.hard_ban_threshold).unwrap_or_else(|| {
            FetchError::Other {
                reason: last_line(&stderr)
                    .or_else(|| last_line(&stdout))
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("spotdl exited with {}", output.status)),
            }
        });
        Err(error)
    }
}

/// Rate-limit classification of spotdl output. `None` means some other failure.
fn classify_failure(output: &str, hard_ban_threshold: Duration) -> Option<FetchError> {
    let retry_after = RETRY_AFTER
        .captures(output)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .map(Duration::from_secs);

    if SUSPENDED.is_match(output) {
        return Some(FetchError::HardBanned { retry_after });
    }
    if !RATE_LIMITED.is_match(output) && retry_after.is_none() {
        return None;
    }
    match retry_after {
        Some(wait) if wait >= hard_ban_threshold => Some(FetchError::HardBanned { retry_after }),
        _ => Some(FetchError::RateLimited { retry_after }),
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rev().find(|line| !line.is_empty())
}
