//! Monitor loop for a single qBittorrent instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::Instrument;

use crate::backoff::ErrorBackoff;
use crate::config::InstanceConfig;
use crate::name::{clean_name, extract_domain};
use crate::paths::{order_for_rename, rewrite_paths, unique_folder_paths};
use crate::qbittorrent::{ApiError, ApiErrorKind, TorrentApi, TorrentInfo};
use crate::resolver::{RenameConflictResolver, RenameTask, RetryPolicy};

/// Sleep while the backoff gate is closed.
const BACKOFF_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Sleep after an unexpected error.
const RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Longest single sleep before checking the running flag again.
const SLEEP_STEP: Duration = Duration::from_secs(1);

/// Polls one instance and cleans advertising domains from torrent, folder and file names.
pub struct InstanceWorker<A> {
    config: InstanceConfig,
    api: A,
    backoff: ErrorBackoff,
    running: Arc<AtomicBool>,
}

impl<A: TorrentApi> InstanceWorker<A> {
    pub const fn new(config: InstanceConfig, api: A, running: Arc<AtomicBool>) -> Self {
        Self {
            config,
            api,
            backoff: ErrorBackoff::new(),
            running,
        }
    }

    #[must_use]
    pub const fn backoff(&self) -> &ErrorBackoff {
        &self.backoff
    }

    /// Poll until the running flag is cleared.
    pub async fn run(&mut self) {
        let span = tracing::info_span!("instance", name = %self.config.name);
        async move {
            self.start().await;
            while self.is_running() {
                if !self.backoff.should_attempt() {
                    tracing::debug!(
                        "Backing off after {} consecutive errors",
                        self.backoff.error_count()
                    );
                    self.sleep(BACKOFF_CHECK_INTERVAL).await;
                    continue;
                }
                let wait = self.cycle().await;
                self.sleep(wait).await;
            }
            tracing::info!("Monitor stopped");
        }
        .instrument(span)
        .await;
    }

    /// Log in and run a single poll cycle.
    pub async fn run_once(&mut self) {
        let span = tracing::info_span!("instance", name = %self.config.name);
        async move {
            self.start().await;
            self.cycle().await;
        }
        .instrument(span)
        .await;
    }

    /// Run one poll cycle and return how long to wait before the next one.
    pub async fn cycle(&mut self) -> Duration {
        let Err(error) = self.poll_once().await else {
            return self.config.check_interval;
        };

        self.backoff.record_error();
        match error.kind() {
            ApiErrorKind::Unauthorized => {
                tracing::warn!("Session rejected, logging in again: {error}");
                self.login().await;
                Duration::ZERO
            }
            ApiErrorKind::Unknown => {
                tracing::error!(
                    "Unexpected error, retrying in {} seconds: {error}",
                    RECOVERY_INTERVAL.as_secs()
                );
                RECOVERY_INTERVAL
            }
            _ => {
                tracing::error!(
                    "Failed to get torrent list ({} consecutive errors): {error}",
                    self.backoff.error_count()
                );
                Duration::ZERO
            }
        }
    }

    /// Fetch the torrent list and clean every torrent.
    ///
    /// # Errors
    /// Returns the API error if the torrent list cannot be fetched.
    pub async fn poll_once(&mut self) -> Result<usize, ApiError> {
        let torrents = self.api.torrents().await?;
        self.backoff.record_success();

        if torrents.is_empty() {
            tracing::warn!("No torrents found");
            return Ok(0);
        }

        tracing::debug!("Checking {} torrents", torrents.len());
        for torrent in &torrents {
            if !self.is_running() {
                break;
            }
            self.process_torrent(torrent).await;
        }
        Ok(torrents.len())
    }

    async fn start(&mut self) {
        tracing::info!("Monitoring {}", self.config.url);
        if self.config.dryrun {
            tracing::info!("Dry run: changes are only logged");
        }
        if !self.login().await {
            self.backoff.record_error();
        }
    }

    async fn login(&self) -> bool {
        match self.api.login().await {
            Ok(()) => {
                tracing::info!("Logged in as {}", self.config.username);
                true
            }
            Err(error) => {
                tracing::error!("Login failed: {error}");
                false
            }
        }
    }

    async fn process_torrent(&self, torrent: &TorrentInfo) {
        if let Some(domain) = extract_domain(&torrent.name) {
            let cleaned = clean_name(&torrent.name, domain);
            if cleaned != torrent.name {
                tracing::info!("Found domain '{domain}' in torrent \"{}\"", torrent.name);
                self.rename_torrent(&torrent.hash, &torrent.name, &cleaned).await;
            }
        }

        let files = match self.api.files(&torrent.hash).await {
            Ok(files) => files.into_iter().map(|file| file.name).collect(),
            Err(error) => {
                tracing::warn!("Could not get files for torrent {}: {error}", torrent.hash);
                Vec::new()
            }
        };
        self.process_paths(&torrent.hash, files).await;
    }

    /// Rename folders deepest first, then files under their updated paths.
    async fn process_paths(&self, hash: &str, mut files: Vec<String>) {
        for folder in order_for_rename(unique_folder_paths(&files)) {
            let Some(cleaned) = cleaned_path(&folder) else {
                continue;
            };
            if self.rename_path(RenameTask::folder(hash, &folder, &cleaned)).await {
                files = rewrite_paths(files, &folder, &cleaned);
            }
        }

        for file in files {
            if let Some(cleaned) = cleaned_path(&file) {
                self.rename_path(RenameTask::file(hash, &file, &cleaned)).await;
            }
        }
    }

    async fn rename_path(&self, mut task: RenameTask) -> bool {
        if self.config.dryrun {
            tracing::info!(
                "Dry run: would rename {} \"{}\" -> \"{}\"",
                if task.is_folder { "folder" } else { "file" },
                task.old_path,
                task.new_path
            );
            return true;
        }
        let resolver = RenameConflictResolver::new(&self.api, RetryPolicy::from(&self.config));
        resolver.rename(&mut task).await.is_success()
    }

    /// Best-effort torrent rename, retrying transient errors up to the instance retry limit.
    async fn rename_torrent(&self, hash: &str, old_name: &str, new_name: &str) {
        if self.config.dryrun {
            tracing::info!("Dry run: would rename torrent \"{old_name}\" -> \"{new_name}\"");
            return;
        }

        let max_attempts = self.config.max_retries;
        for attempt in 1..=max_attempts {
            let Err(error) = self.api.rename_torrent(hash, new_name).await else {
                tracing::info!("Renamed torrent \"{old_name}\" -> \"{new_name}\"");
                return;
            };
            match error.kind() {
                ApiErrorKind::Transient | ApiErrorKind::Server | ApiErrorKind::Unauthorized => {
                    tracing::warn!(
                        "Failed to rename torrent {hash} (attempt {attempt}/{max_attempts}): {error}"
                    );
                    if error.kind() == ApiErrorKind::Unauthorized {
                        self.login().await;
                    }
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
                _ => {
                    tracing::error!("Failed to rename torrent {hash}: {error}");
                    return;
                }
            }
        }
        tracing::error!("Giving up renaming torrent \"{old_name}\"");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleep in short steps so a shutdown request is noticed quickly.
    async fn sleep(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() && self.is_running() {
            let step = remaining.min(SLEEP_STEP);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }
}

/// Cleaned version of the path, or `None` if its last component has no domain to remove.
fn cleaned_path(path: &str) -> Option<String> {
    let leaf = path.rsplit_once('/').map_or(path, |(_, leaf)| leaf);
    let domain = extract_domain(leaf)?;
    let cleaned = clean_name(path, domain);
    (cleaned != path).then_some(cleaned)
}
