//! Retry and conflict escalation for renaming paths inside a torrent.
//!
//! qBittorrent answers HTTP 409 when a file or folder cannot be renamed because it is in use.
//! The resolver retries the rename and, when conflicts persist, escalates through
//! increasingly invasive strategies that release the file handles held by the torrent.

use std::fmt;
use std::time::Duration;

use crate::config::InstanceConfig;
use crate::qbittorrent::{ApiError, ApiErrorKind, TorrentApi, TorrentState};

/// Longest delay between folder rename attempts.
const MAX_FOLDER_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Wait after pausing on the first attempt.
const FIRST_PAUSE_WAIT: Duration = Duration::from_secs(5);

/// Wait after pausing on later attempts.
const PAUSE_WAIT: Duration = Duration::from_secs(10);

/// Wait between force starting and pausing a torrent.
const FORCE_START_SETTLE: Duration = Duration::from_secs(2);

/// Base wait for the wait-and-retry strategy, extended by `EXTENDED_WAIT_STEP` per attempt.
const EXTENDED_WAIT_BASE: Duration = Duration::from_secs(30);
const EXTENDED_WAIT_STEP: Duration = Duration::from_secs(10);

/// Pause between two escalation strategies.
const STRATEGY_GAP: Duration = Duration::from_secs(3);

/// Conflict strategies in the order they are tried.
pub const ESCALATION_LADDER: [Strategy; 3] = [
    Strategy::Pause,
    Strategy::ForceStartThenPause,
    Strategy::WaitAndRetry,
];

/// Attempt limits and delays for path renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub folder_retry_delay: Duration,
}

/// Strategy for getting a torrent to release its file handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Pause the torrent.
    Pause,
    /// Force start the torrent and then pause it.
    /// Some backends only drop stale handles after a state change.
    ForceStartThenPause,
    /// Leave the torrent alone and wait longer.
    WaitAndRetry,
}

/// A single logical rename of a file or folder inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameTask {
    pub hash: String,
    pub old_path: String,
    pub new_path: String,
    pub is_folder: bool,
    /// Zero-based index of the current attempt.
    pub attempt: u32,
    /// Strategies tried so far, in order, across all attempts.
    pub strategies_tried: Vec<Strategy>,
}

/// Final result of a rename task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    /// Request was rejected or the torrent is gone, no retries made.
    Aborted,
    /// All attempts failed.
    Exhausted,
}

/// Drives a [`RenameTask`] to completion against the remote API.
pub struct RenameConflictResolver<'a, A> {
    api: &'a A,
    policy: RetryPolicy,
}

impl RetryPolicy {
    /// Delay before the next attempt after the given attempt failed.
    ///
    /// Folders use the longer folder delay, doubled after the first attempt up to 60 seconds.
    #[must_use]
    pub fn delay_after(&self, attempt: u32, is_folder: bool) -> Duration {
        if !is_folder {
            return self.retry_delay;
        }
        if attempt > 0 {
            (self.folder_retry_delay * 2).min(MAX_FOLDER_RETRY_DELAY)
        } else {
            self.folder_retry_delay
        }
    }
}

impl From<&InstanceConfig> for RetryPolicy {
    fn from(config: &InstanceConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay,
            folder_retry_delay: config.folder_retry_delay,
        }
    }
}

impl Strategy {
    /// Strategy leaves the torrent paused and it needs to be resumed afterwards.
    #[must_use]
    pub const fn pauses(self) -> bool {
        matches!(self, Self::Pause | Self::ForceStartThenPause)
    }

    /// How long to wait after applying the strategy before retrying the rename.
    #[must_use]
    pub fn wait(self, attempt: u32, state: TorrentState) -> Duration {
        match self {
            Self::WaitAndRetry => EXTENDED_WAIT_BASE + EXTENDED_WAIT_STEP * attempt,
            Self::Pause | Self::ForceStartThenPause => {
                let base = if attempt > 0 { PAUSE_WAIT } else { FIRST_PAUSE_WAIT };
                if state.is_active() { base * 2 } else { base }
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pause => "pause",
            Self::ForceStartThenPause => "force start then pause",
            Self::WaitAndRetry => "wait and retry",
        };
        write!(f, "{name}")
    }
}

impl RenameTask {
    #[must_use]
    pub fn file(hash: impl Into<String>, old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self::new(hash.into(), old_path.into(), new_path.into(), false)
    }

    #[must_use]
    pub fn folder(hash: impl Into<String>, old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self::new(hash.into(), old_path.into(), new_path.into(), true)
    }

    const fn new(hash: String, old_path: String, new_path: String, is_folder: bool) -> Self {
        Self {
            hash,
            old_path,
            new_path,
            is_folder,
            attempt: 0,
            strategies_tried: Vec::new(),
        }
    }

    const fn kind(&self) -> &'static str {
        if self.is_folder { "folder" } else { "file" }
    }

    /// Files get one plain retry before escalating, folders escalate on the first conflict.
    const fn should_escalate(&self) -> bool {
        self.is_folder || self.attempt >= 1
    }
}

impl RenameOutcome {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Renamed)
    }
}

impl<'a, A: TorrentApi> RenameConflictResolver<'a, A> {
    pub const fn new(api: &'a A, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    /// Rename the task path, retrying and escalating on conflicts.
    pub async fn rename(&self, task: &mut RenameTask) -> RenameOutcome {
        let max_retries = self.policy.max_retries.max(1);

        for attempt in 0..max_retries {
            task.attempt = attempt;
            let attempt_number = attempt + 1;

            match self.issue_rename(task).await {
                Ok(()) => {
                    tracing::info!(
                        "Successfully renamed {} in torrent {}: \"{}\" -> \"{}\"",
                        task.kind(),
                        task.hash,
                        task.old_path,
                        task.new_path
                    );
                    return RenameOutcome::Renamed;
                }
                Err(error) => match error.kind() {
                    ApiErrorKind::Unrecoverable => {
                        tracing::error!(
                            "Bad request when renaming {} \"{}\" (attempt {attempt_number}): {error}",
                            task.kind(),
                            task.old_path
                        );
                        return RenameOutcome::Aborted;
                    }
                    ApiErrorKind::NotFound => {
                        tracing::error!(
                            "Torrent {} not found when renaming {} \"{}\", it may have been removed",
                            task.hash,
                            task.kind(),
                            task.old_path
                        );
                        return RenameOutcome::Aborted;
                    }
                    ApiErrorKind::Conflict => {
                        if self.resolve_conflict(task, max_retries).await {
                            return RenameOutcome::Renamed;
                        }
                    }
                    ApiErrorKind::Unauthorized => {
                        tracing::warn!(
                            "Session rejected when renaming {} \"{}\" (attempt {attempt_number}), logging in again",
                            task.kind(),
                            task.old_path
                        );
                        if let Err(login_error) = self.api.login().await {
                            tracing::error!("Failed to log in again: {login_error}");
                        }
                    }
                    ApiErrorKind::Transient | ApiErrorKind::Unknown => {
                        tracing::error!(
                            "Error renaming {} \"{}\" (attempt {attempt_number}): {error}",
                            task.kind(),
                            task.old_path
                        );
                    }
                    ApiErrorKind::Server => {
                        tracing::warn!(
                            "Failed to rename {} \"{}\" (attempt {attempt_number}): {error}",
                            task.kind(),
                            task.old_path
                        );
                    }
                },
            }

            if attempt_number < max_retries {
                let delay = self.policy.delay_after(attempt, task.is_folder);
                tracing::info!(
                    "Waiting {} seconds before retry (attempt {attempt_number}/{max_retries})",
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(
            "Giving up renaming {} \"{}\" after {max_retries} attempts",
            task.kind(),
            task.old_path
        );
        RenameOutcome::Exhausted
    }

    /// Handle a conflict response. Returns true if an escalation strategy got the rename through.
    async fn resolve_conflict(&self, task: &mut RenameTask, max_retries: u32) -> bool {
        let (state, progress) = self.torrent_state(&task.hash).await;
        tracing::warn!(
            "Conflict when renaming {} \"{}\" (attempt {}): file may be in use. Torrent state: {state} ({:.1}% complete)",
            task.kind(),
            task.old_path,
            task.attempt + 1,
            progress * 100.0
        );

        if !task.should_escalate() {
            tracing::info!(
                "Skipping aggressive strategies for now (attempt {}/{max_retries}), will try on next attempt",
                task.attempt + 1
            );
            return false;
        }

        tracing::info!(
            "Attempting aggressive rename strategies for {} \"{}\"",
            task.kind(),
            task.old_path
        );
        if self.escalate(task, state).await {
            true
        } else {
            tracing::error!(
                "All aggressive strategies failed for {} \"{}\"",
                task.kind(),
                task.old_path
            );
            false
        }
    }

    /// Walk the escalation ladder until one strategy lets the rename through.
    async fn escalate(&self, task: &mut RenameTask, state: TorrentState) -> bool {
        for (position, strategy) in ESCALATION_LADDER.into_iter().enumerate() {
            tracing::info!("Trying strategy '{strategy}' for torrent {}", task.hash);
            task.strategies_tried.push(strategy);

            if !self.apply(strategy, &task.hash).await {
                tracing::warn!("Strategy '{strategy}' failed");
                continue;
            }

            let wait = strategy.wait(task.attempt, state);
            tracing::info!(
                "Waiting {} seconds after {strategy} (torrent was {state})",
                wait.as_secs()
            );
            tokio::time::sleep(wait).await;

            let result = self.issue_rename(task).await;

            // Resume regardless of the rename result
            if strategy.pauses() {
                self.resume(&task.hash).await;
            }

            match result {
                Ok(()) => {
                    tracing::info!("Successfully renamed \"{}\" after {strategy}", task.old_path);
                    return true;
                }
                Err(error) if error.kind() == ApiErrorKind::Conflict => {
                    tracing::warn!("Still getting conflict after {strategy}, torrent state: {state}");
                }
                Err(error) => {
                    tracing::warn!("Got {error} after {strategy}");
                }
            }

            if position + 1 < ESCALATION_LADDER.len() {
                tokio::time::sleep(STRATEGY_GAP).await;
            }
        }

        tracing::error!("All aggressive strategies exhausted for torrent {}", task.hash);
        false
    }

    /// Apply a strategy. Returns false if the torrent could not be put in the required state.
    async fn apply(&self, strategy: Strategy, hash: &str) -> bool {
        match strategy {
            Strategy::Pause => self.pause(hash).await,
            Strategy::ForceStartThenPause => {
                if let Err(error) = self.api.force_start(hash).await {
                    log_state_change_error("force start", hash, &error);
                    return false;
                }
                tracing::info!("Force started torrent {hash}");
                tokio::time::sleep(FORCE_START_SETTLE).await;
                let paused = self.pause(hash).await;
                if !paused {
                    tracing::warn!("Force start succeeded but pause failed for {hash}");
                }
                paused
            }
            Strategy::WaitAndRetry => true,
        }
    }

    async fn issue_rename(&self, task: &RenameTask) -> Result<(), ApiError> {
        if task.is_folder {
            self.api
                .rename_folder(&task.hash, &task.old_path, &task.new_path)
                .await
        } else {
            self.api.rename_file(&task.hash, &task.old_path, &task.new_path).await
        }
    }

    async fn pause(&self, hash: &str) -> bool {
        match self.api.pause(hash).await {
            Ok(()) => {
                tracing::info!("Paused torrent {hash}");
                true
            }
            Err(error) => {
                log_state_change_error("pause", hash, &error);
                false
            }
        }
    }

    async fn resume(&self, hash: &str) {
        match self.api.resume(hash).await {
            Ok(()) => tracing::info!("Resumed torrent {hash}"),
            Err(error) => log_state_change_error("resume", hash, &error),
        }
    }

    /// Current torrent state and progress, used to size the waits.
    async fn torrent_state(&self, hash: &str) -> (TorrentState, f64) {
        match self.api.torrent(hash).await {
            Ok(Some(torrent)) => (torrent.state, torrent.progress),
            Ok(None) => (TorrentState::Unknown, 0.0),
            Err(error) => {
                tracing::debug!("Could not get state for torrent {hash}: {error}");
                (TorrentState::Unknown, 0.0)
            }
        }
    }
}

fn log_state_change_error(action: &str, hash: &str, error: &ApiError) {
    if error.kind() == ApiErrorKind::NotFound {
        tracing::error!("Torrent {hash} not found during {action}, it may have been removed");
    } else {
        tracing::warn!("Failed to {action} torrent {hash}: {error}");
    }
}

#[cfg(test)]
mod retry_policy_tests {
    use super::*;

    const POLICY: RetryPolicy = RetryPolicy {
        max_retries: 5,
        retry_delay: Duration::from_secs(15),
        folder_retry_delay: Duration::from_secs(45),
    };

    #[test]
    fn files_use_base_delay() {
        assert_eq!(POLICY.delay_after(0, false), Duration::from_secs(15));
        assert_eq!(POLICY.delay_after(3, false), Duration::from_secs(15));
    }

    #[test]
    fn folders_double_after_first_attempt_up_to_ceiling() {
        assert_eq!(POLICY.delay_after(0, true), Duration::from_secs(45));
        assert_eq!(POLICY.delay_after(1, true), Duration::from_secs(60));

        let short = RetryPolicy {
            folder_retry_delay: Duration::from_secs(20),
            ..POLICY
        };
        assert_eq!(short.delay_after(2, true), Duration::from_secs(40));
    }

    #[test]
    fn built_from_instance_config() {
        let config = InstanceConfig {
            max_retries: 3,
            ..InstanceConfig::new("test", "http://localhost:8080")
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_delay, config.retry_delay);
    }
}

#[cfg(test)]
mod strategy_wait_tests {
    use super::*;

    #[test]
    fn pause_waits_shorter_on_first_attempt() {
        assert_eq!(Strategy::Pause.wait(0, TorrentState::Queued), Duration::from_secs(5));
        assert_eq!(Strategy::Pause.wait(2, TorrentState::Queued), Duration::from_secs(10));
    }

    #[test]
    fn active_torrent_doubles_wait() {
        assert_eq!(Strategy::Pause.wait(0, TorrentState::Downloading), Duration::from_secs(10));
        assert_eq!(
            Strategy::ForceStartThenPause.wait(1, TorrentState::Stalled),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn extended_wait_grows_with_attempt() {
        assert_eq!(
            Strategy::WaitAndRetry.wait(0, TorrentState::Downloading),
            Duration::from_secs(30)
        );
        assert_eq!(Strategy::WaitAndRetry.wait(3, TorrentState::Paused), Duration::from_secs(60));
    }
}
