//! qBittorrent `WebUI` API client module.
//!
//! Provides the operations the monitor needs for listing torrents,
//! renaming torrents, files and folders, and changing torrent state.
//!
//! Documentation:
//! <https://github.com/qbittorrent/qBittorrent/wiki/WebUI-API-(qBittorrent-5.0)>

use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::REFERER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::config::InstanceConfig;

/// Timeout for establishing the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Length of a hex encoded v1 info hash.
const HASH_LENGTH: usize = 40;

/// Error from a qBittorrent API call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Connection failure or timeout before a response was received.
    #[error("request failed: {0}")]
    Transport(String),
    /// The server answered with a non-success status code.
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// Login was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Classification of an [`ApiError`] that decides how callers react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Connection problem, retry later.
    Transient,
    /// Malformed request (HTTP 400), retrying will not help.
    Unrecoverable,
    /// Torrent no longer exists (HTTP 404).
    NotFound,
    /// Target is in use (HTTP 409).
    Conflict,
    /// Session expired or credentials rejected.
    Unauthorized,
    /// Any other server error status.
    Server,
    /// Something unexpected, treated as transient.
    Unknown,
}

impl ApiError {
    /// Create an error for the given status code and response body.
    pub fn status(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Transport(_) => ApiErrorKind::Transient,
            Self::Authentication(_) => ApiErrorKind::Unauthorized,
            Self::Decode(_) => ApiErrorKind::Unknown,
            Self::Status { status, .. } => match *status {
                StatusCode::BAD_REQUEST => ApiErrorKind::Unrecoverable,
                StatusCode::NOT_FOUND => ApiErrorKind::NotFound,
                StatusCode::CONFLICT => ApiErrorKind::Conflict,
                StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => ApiErrorKind::Unauthorized,
                _ => ApiErrorKind::Server,
            },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Transport(format!("timeout: {error}"))
        } else if error.is_connect() {
            Self::Transport(format!("connection error: {error}"))
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Torrent lifecycle state, simplified from the qBittorrent state strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum TorrentState {
    Queued,
    Downloading,
    Uploading,
    Stalled,
    Paused,
    Completed,
    #[default]
    Unknown,
}

impl TorrentState {
    /// Torrent is actively transferring data, so file handles are likely open.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Uploading | Self::Stalled)
    }
}

impl From<&str> for TorrentState {
    fn from(state: &str) -> Self {
        match state {
            "queuedDL" | "queuedUP" => Self::Queued,
            "downloading" | "forcedDL" | "metaDL" | "forcedMetaDL" => Self::Downloading,
            "uploading" | "forcedUP" => Self::Uploading,
            "stalledDL" | "stalledUP" => Self::Stalled,
            "pausedDL" | "stoppedDL" => Self::Paused,
            "pausedUP" | "stoppedUP" => Self::Completed,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for TorrentState {
    fn from(state: String) -> Self {
        Self::from(state.as_str())
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Uploading => "uploading",
            Self::Stalled => "stalled",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Torrent info from the qBittorrent API `/torrents/info` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TorrentInfo {
    /// Torrent hash, lowercase.
    pub hash: String,
    /// Torrent display name.
    pub name: String,
    #[serde(default)]
    pub state: TorrentState,
    /// Download progress between 0 and 1.
    #[serde(default)]
    pub progress: f64,
}

/// File entry from the qBittorrent API `/torrents/files` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TorrentFile {
    /// File index within the torrent.
    #[serde(default)]
    pub index: usize,
    /// Slash-separated path relative to the torrent root.
    pub name: String,
    /// File size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// Remote operations the monitor needs from a torrent client.
///
/// Implemented by [`QBittorrentClient`] and by fakes in tests.
pub trait TorrentApi: Send + Sync {
    /// Authenticate and start a session.
    fn login(&self) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// List all torrents.
    fn torrents(&self) -> impl Future<Output = Result<Vec<TorrentInfo>, ApiError>> + Send;

    /// Get a single torrent, or `None` if it does not exist.
    fn torrent(&self, hash: &str) -> impl Future<Output = Result<Option<TorrentInfo>, ApiError>> + Send;

    /// List the files of a torrent.
    fn files(&self, hash: &str) -> impl Future<Output = Result<Vec<TorrentFile>, ApiError>> + Send;

    /// Set the display name of a torrent.
    fn rename_torrent(&self, hash: &str, name: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Rename a file inside a torrent.
    fn rename_file(
        &self,
        hash: &str,
        old_path: &str,
        new_path: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Rename a folder inside a torrent.
    fn rename_folder(
        &self,
        hash: &str,
        old_path: &str,
        new_path: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn pause(&self, hash: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn resume(&self, hash: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Force start a torrent, ignoring queue limits.
    fn force_start(&self, hash: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// qBittorrent `WebUI` API client.
#[derive(Debug)]
pub struct QBittorrentClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl QBittorrentClient {
    /// Create a new qBittorrent client for the given instance.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &InstanceConfig) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.connection_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Build full API url from the base url and given endpoint.
    fn build_url(&self, url: &str) -> String {
        format!("{}/api/v2/{url}", self.base_url)
    }

    /// Send a GET request and return the response body on HTTP 200.
    async fn get(&self, endpoint: &str) -> Result<String, ApiError> {
        let response = self.client.get(self.build_url(endpoint)).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::OK {
            Ok(body)
        } else {
            Err(ApiError::status(status, body))
        }
    }

    /// Send a form POST request and return the response body on HTTP 200.
    async fn post(&self, endpoint: &str, form: &[(&str, &str)]) -> Result<String, ApiError> {
        let response = self.client.post(self.build_url(endpoint)).form(form).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::trace!("POST {endpoint}: HTTP {status} {}", truncate(&body, 200));
        if status == StatusCode::OK {
            Ok(body)
        } else {
            Err(ApiError::status(status, body))
        }
    }

    /// Post to the qBittorrent 5 endpoint, falling back to the legacy name for older versions.
    async fn post_with_fallback(&self, endpoint: &str, legacy_endpoint: &str, hash: &str) -> Result<(), ApiError> {
        let hash = normalize_hash(hash);
        match self.post(endpoint, &[("hashes", hash.as_str())]).await {
            Err(error) if error.kind() == ApiErrorKind::NotFound => {
                tracing::debug!("Endpoint {endpoint} not found, trying {legacy_endpoint}");
                self.post(legacy_endpoint, &[("hashes", hash.as_str())]).await.map(|_| ())
            }
            result => result.map(|_| ()),
        }
    }
}

impl TorrentApi for QBittorrentClient {
    async fn login(&self) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.build_url("auth/login"))
            .header(REFERER, &self.base_url)
            .form(&[("username", self.username.as_str()), ("password", self.password.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::OK && body.trim() == "Ok." {
            Ok(())
        } else if status == StatusCode::FORBIDDEN || body.trim() == "Fails." {
            Err(ApiError::Authentication("Invalid username or password".to_string()))
        } else {
            Err(ApiError::Authentication(format!("HTTP {status} - {body}")))
        }
    }

    async fn torrents(&self) -> Result<Vec<TorrentInfo>, ApiError> {
        let body = self.get("torrents/info").await?;
        parse_torrents(&body)
    }

    async fn torrent(&self, hash: &str) -> Result<Option<TorrentInfo>, ApiError> {
        let body = self.get(&format!("torrents/info?hashes={}", normalize_hash(hash))).await?;
        Ok(parse_torrents(&body)?.into_iter().next())
    }

    async fn files(&self, hash: &str) -> Result<Vec<TorrentFile>, ApiError> {
        let body = self.get(&format!("torrents/files?hash={}", normalize_hash(hash))).await?;
        serde_json::from_str(&body).map_err(|error| ApiError::Decode(format!("torrent files: {error}")))
    }

    async fn rename_torrent(&self, hash: &str, name: &str) -> Result<(), ApiError> {
        let hash = normalize_hash(hash);
        self.post("torrents/rename", &[("hash", hash.as_str()), ("name", name)])
            .await
            .map(|_| ())
    }

    async fn rename_file(&self, hash: &str, old_path: &str, new_path: &str) -> Result<(), ApiError> {
        let hash = normalize_hash(hash);
        self.post(
            "torrents/renameFile",
            &[("hash", hash.as_str()), ("oldPath", old_path), ("newPath", new_path)],
        )
        .await
        .map(|_| ())
    }

    async fn rename_folder(&self, hash: &str, old_path: &str, new_path: &str) -> Result<(), ApiError> {
        let hash = normalize_hash(hash);
        self.post(
            "torrents/renameFolder",
            &[("hash", hash.as_str()), ("oldPath", old_path), ("newPath", new_path)],
        )
        .await
        .map(|_| ())
    }

    async fn pause(&self, hash: &str) -> Result<(), ApiError> {
        self.post_with_fallback("torrents/stop", "torrents/pause", hash).await
    }

    async fn resume(&self, hash: &str) -> Result<(), ApiError> {
        self.post_with_fallback("torrents/start", "torrents/resume", hash).await
    }

    async fn force_start(&self, hash: &str) -> Result<(), ApiError> {
        let hash = normalize_hash(hash);
        self.post("torrents/setForceStart", &[("hashes", hash.as_str()), ("value", "true")])
            .await
            .map(|_| ())
    }
}

/// Parse the torrent list JSON and normalize the hashes.
fn parse_torrents(body: &str) -> Result<Vec<TorrentInfo>, ApiError> {
    let torrents: Vec<TorrentInfo> =
        serde_json::from_str(body).map_err(|error| ApiError::Decode(format!("torrent list: {error}")))?;

    Ok(torrents
        .into_iter()
        .map(|mut torrent| {
            torrent.hash = normalize_hash(&torrent.hash);
            torrent
        })
        .collect())
}

/// Lowercase and trim a torrent hash. Hashes that do not look like
/// a 40 character hex string are logged but still returned.
#[must_use]
pub fn normalize_hash(hash: &str) -> String {
    let normalized = hash.trim().to_lowercase();
    if !is_valid_hash(&normalized) {
        tracing::warn!("Torrent hash format may be invalid: {hash}");
    }
    normalized
}

fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_LENGTH && hash.chars().all(|c| c.is_ascii_hexdigit())
}

/// Shorten text for log output.
fn truncate(text: &str, max_chars: usize) -> &str {
    text.char_indices().nth(max_chars).map_or(text, |(index, _)| &text[..index])
}



#[cfg(test)]
mod parse_tests {
    use super::*;

    #[test]
    fn parses_torrent_list_and_normalizes_hash() {
        let body = r#"[
            {"hash": "ABCDEF0123456789ABCDEF0123456789ABCDEF01", "name": "Movie www.site.com", "state": "stalledUP", "progress": 1.0, "size": 100},
            {"hash": "0123456789abcdef0123456789abcdef01234567", "name": "Other"}
        ]"#;
        let torrents = parse_torrents(body).unwrap();
        assert_eq!(torrents.len(), 2);
        assert_eq!(torrents[0].hash, "abcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(torrents[0].state, TorrentState::Stalled);
        assert_eq!(torrents[1].state, TorrentState::Unknown);
        assert!(torrents[1].progress.abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_json_is_decode_error() {
        let error = parse_torrents("not json").unwrap_err();
        assert_eq!(error.kind(), ApiErrorKind::Unknown);
    }

    #[test]
    fn parses_file_list() {
        let body = r#"[{"index": 0, "name": "Pack/file.mkv", "size": 1024, "progress": 0.5, "priority": 1}]"#;
        let files: Vec<TorrentFile> = serde_json::from_str(body).unwrap();
        assert_eq!(files[0].name, "Pack/file.mkv");
        assert_eq!(files[0].size, 1024);
    }

    #[test]
    fn normalizes_hash() {
        assert_eq!(
            normalize_hash("  ABCDEF0123456789ABCDEF0123456789ABCDEF01 "),
            "abcdef0123456789abcdef0123456789abcdef01"
        );
        assert!(is_valid_hash("abcdef0123456789abcdef0123456789abcdef01"));
        assert!(!is_valid_hash("xyz"));
    }

    #[test]
    fn truncates_long_text() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
