use std::time::Duration;

use crate::config::SyncConfig;

/// Delay policy for retries and inter-item staggering. Pure: it only maps
/// attempt numbers and playlist sizes to durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub stagger_delay: Duration,
    pub stagger_per_item: Duration,
    pub max_stagger: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base_delay: config.base_delay,
            stagger_delay: config.stagger_delay,
            stagger_per_item: config.stagger_per_item,
            max_stagger: config.max_stagger,
        }
    }

    /// Sleep before retrying after the `attempt`-th rate-limited attempt
    /// (1-based): `base_delay * attempt`, or the remote's hint when longer.
    pub fn retry_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let linear = self.base_delay.saturating_mul(attempt.max(1));
        match retry_after {
            Some(hint) if hint > linear => hint,
            _ => linear,
        }
    }

    /// Pause before starting a playlist with `item_count` tracks. Larger
    /// playlists mean bigger bursts against the remote, so they wait longer.
    pub fn stagger(&self, item_count: u32) -> Duration {
        let sized = self
            .stagger_delay
            .saturating_add(self.stagger_per_item.saturating_mul(item_count));
        sized.min(self.max_stagger.max(self.stagger_delay))
    }
}

/// Injected sleep so delays can be observed in tests without waiting.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
