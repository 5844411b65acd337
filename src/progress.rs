use std::collections::HashMap;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

use crate::services::sync::events::{CooldownReason, SyncEvent};
use crate::services::sync::types::{ChangeKind, SyncReport, WorkItem};

const TICK: Duration = Duration::from_millis(250);

/// Starts rendering sync events on stdout. The task ends once every sender is
/// dropped.
pub fn spawn_console_progress() -> (UnboundedSender<SyncEvent>, JoinHandle<()>) {
    let (sender, receiver) = unbounded_channel();
    let handle = tokio::spawn(render(receiver));
    (sender, handle)
}

async fn render(mut events: UnboundedReceiver<SyncEvent>) {
    let mut console = ConsoleProgress::new();
    while let Some(event) = events.recv().await {
        console.handle(event);
    }
    console.clear();
}

struct ConsoleProgress {
    multi: MultiProgress,
    queue: Option<ProgressBar>,
    cooldowns: HashMap<String, ProgressBar>,
}

impl ConsoleProgress {
    fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stdout()),
            queue: None,
            cooldowns: HashMap::new(),
        }
    }

    fn println(&self, line: String) {
        if self.multi.println(&line).is_err() {
            println!("{}", line);
        }
    }

    fn handle(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::SnapshotBuilt { playlists } => {
                self.println(format!("Found {} owned playlists", playlists));
            }
            SyncEvent::QueueBuilt { items } => {
                self.println(format!("{} playlists should be updated", items.len()));
                for item in &items {
                    self.println(format_work_item(item));
                }
                if !items.is_empty() {
                    let bar = self.multi.add(ProgressBar::new(items.len() as u64));
                    bar.set_style(
                        ProgressStyle::with_template(
                            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#-"),
                    );
                    self.queue = Some(bar);
                }
            }
            SyncEvent::ItemStarted { name, attempt } => {
                self.end_cooldown(&name);
                if let Some(queue) = &self.queue {
                    if attempt > 1 {
                        queue.set_message(format!("{} (attempt {})", name, attempt));
                    } else {
                        queue.set_message(name);
                    }
                }
            }
            SyncEvent::Cooldown {
                name,
                delay,
                reason,
            } => self.start_cooldown(name, delay, reason),
            SyncEvent::ItemCommitted { name } => {
                self.advance();
                self.println(format!("  ✓ {}", name));
            }
            SyncEvent::ItemAbandoned { name, reason } => {
                self.end_cooldown(&name);
                self.advance();
                self.println(format!("  ✗ {}: {}", name, reason));
            }
            SyncEvent::CommitFailed { name, error } => {
                self.advance();
                self.println(format!(
                    "  ! {} downloaded but not recorded, it will be fetched again: {}",
                    name, error
                ));
            }
            SyncEvent::Pruned { name } => {
                self.println(format!("  - {} no longer listed, forgotten", name));
            }
            SyncEvent::Aborted { reason } => {
                self.clear();
                self.println(format!("Sync aborted: {}", reason));
            }
            SyncEvent::Finished { report } => {
                self.clear();
                self.println(format_summary(&report));
            }
        }
    }

    fn advance(&self) {
        if let Some(queue) = &self.queue {
            queue.inc(1);
        }
    }

    fn start_cooldown(&mut self, name: String, delay: Duration, reason: CooldownReason) {
        self.end_cooldown(&name);
        if delay.is_zero() {
            return;
        }

        let label = match reason {
            CooldownReason::RateLimited => format!("{} rate limited, retrying", name),
            CooldownReason::Stagger => format!("{} starting", name),
        };
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.yellow} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let ticker = bar.clone();
        tokio::spawn(async move {
            let deadline = Instant::now() + delay;
            let mut interval = tokio::time::interval(TICK);
            while !ticker.is_finished() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                // Whole seconds keep the countdown from jittering.
                let shown = Duration::from_secs(remaining.as_secs() + 1);
                ticker.set_message(format!("{} in {}", label, humantime::format_duration(shown)));
                ticker.tick();
                interval.tick().await;
            }
        });

        self.cooldowns.insert(name, bar);
    }

    fn end_cooldown(&mut self, name: &str) {
        if let Some(bar) = self.cooldowns.remove(name) {
            bar.finish_and_clear();
        }
    }

    fn clear(&mut self) {
        for (_, bar) in self.cooldowns.drain() {
            bar.finish_and_clear();
        }
        if let Some(queue) = self.queue.take() {
            queue.finish_and_clear();
        }
    }
}

pub fn format_work_item(item: &WorkItem) -> String {
    let marker = match item.change {
        ChangeKind::Added => "+",
        ChangeKind::Updated => "~",
    };
    format!(
        "  {} {} ({} tracks) {}",
        marker, item.name, item.item_count, item.url
    )
}

pub fn format_summary(report: &SyncReport) -> String {
    let mut summary = format!(
        "Queued {}, synced {}, abandoned {}",
        report.queue_size, report.succeeded, report.abandoned
    );
    if report.uncommitted > 0 {
        summary.push_str(&format!(", unrecorded {}", report.uncommitted));
    }
    if report.skipped > 0 {
        summary.push_str(&format!(", not started {}", report.skipped));
    }
    if report.pruned > 0 {
        summary.push_str(&format!(", pruned {}", report.pruned));
    }
    if let Some(reason) = &report.abort_reason {
        summary.push_str(&format!(". Aborted: {}", reason));
    }
    summary
}
