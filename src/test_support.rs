//! In-memory `TorrentApi` for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use reqwest::StatusCode;

use crate::qbittorrent::{ApiError, TorrentApi, TorrentFile, TorrentInfo, TorrentState};

/// Remote call recorded by [`FakeApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login,
    Torrents,
    Torrent,
    Files,
    RenameTorrent(String),
    RenameFile { old: String, new: String },
    RenameFolder { old: String, new: String },
    Pause,
    Resume,
    ForceStart,
}

impl Call {
    const fn is_query(&self) -> bool {
        matches!(self, Self::Torrents | Self::Torrent | Self::Files)
    }

    const fn is_path_rename(&self) -> bool {
        matches!(self, Self::RenameFile { .. } | Self::RenameFolder { .. })
    }
}

/// Scripted fake that records every call.
///
/// Scripted results are consumed in order. Once a queue is empty the default result is returned.
#[derive(Debug)]
pub struct FakeApi {
    calls: Mutex<Vec<Call>>,
    torrent_list: Vec<TorrentInfo>,
    torrents_results: Mutex<VecDeque<Result<Vec<TorrentInfo>, ApiError>>>,
    files: HashMap<String, Vec<TorrentFile>>,
    files_error: Option<ApiError>,
    state: TorrentState,
    rename_results: Mutex<VecDeque<Result<(), ApiError>>>,
    default_rename_result: Result<(), ApiError>,
    rename_torrent_results: Mutex<VecDeque<Result<(), ApiError>>>,
    pause_error: Option<ApiError>,
    force_start_error: Option<ApiError>,
}

pub fn conflict() -> ApiError {
    ApiError::status(StatusCode::CONFLICT, "")
}

pub fn bad_request() -> ApiError {
    ApiError::status(StatusCode::BAD_REQUEST, "")
}

pub fn not_found() -> ApiError {
    ApiError::status(StatusCode::NOT_FOUND, "")
}

pub fn transport_error() -> ApiError {
    ApiError::Transport("connection refused".to_string())
}

pub fn torrent(hash: &str, name: &str) -> TorrentInfo {
    TorrentInfo {
        hash: hash.to_string(),
        name: name.to_string(),
        state: TorrentState::Downloading,
        progress: 0.5,
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            torrent_list: Vec::new(),
            torrents_results: Mutex::new(VecDeque::new()),
            files: HashMap::new(),
            files_error: None,
            state: TorrentState::Downloading,
            rename_results: Mutex::new(VecDeque::new()),
            default_rename_result: Ok(()),
            rename_torrent_results: Mutex::new(VecDeque::new()),
            pause_error: None,
            force_start_error: None,
        }
    }

    pub fn with_torrents(mut self, torrents: Vec<TorrentInfo>) -> Self {
        self.torrent_list = torrents;
        self
    }

    pub fn with_torrents_results(
        self,
        results: impl IntoIterator<Item = Result<Vec<TorrentInfo>, ApiError>>,
    ) -> Self {
        self.torrents_results.lock().unwrap().extend(results);
        self
    }

    pub fn with_files(mut self, hash: &str, names: &[&str]) -> Self {
        let files = names
            .iter()
            .enumerate()
            .map(|(index, name)| TorrentFile {
                index,
                name: (*name).to_string(),
                size: 1024,
            })
            .collect();
        self.files.insert(hash.to_string(), files);
        self
    }

    pub fn failing_files(mut self, error: ApiError) -> Self {
        self.files_error = Some(error);
        self
    }

    pub fn with_state(mut self, state: TorrentState) -> Self {
        self.state = state;
        self
    }

    /// Results for file and folder renames.
    pub fn with_rename_results(self, results: impl IntoIterator<Item = Result<(), ApiError>>) -> Self {
        self.rename_results.lock().unwrap().extend(results);
        self
    }

    pub fn with_default_rename_result(mut self, result: Result<(), ApiError>) -> Self {
        self.default_rename_result = result;
        self
    }

    pub fn with_rename_torrent_results(self, results: impl IntoIterator<Item = Result<(), ApiError>>) -> Self {
        self.rename_torrent_results.lock().unwrap().extend(results);
        self
    }

    pub fn failing_pause(mut self, error: ApiError) -> Self {
        self.pause_error = Some(error);
        self
    }

    pub fn failing_force_start(mut self, error: ApiError) -> Self {
        self.force_start_error = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls that change something on the server.
    pub fn calls_without_queries(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|call| !call.is_query()).collect()
    }

    pub fn path_rename_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_path_rename).collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_rename_result(&self) -> Result<(), ApiError> {
        self.rename_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_rename_result.clone())
    }

    fn error_or_ok(error: Option<&ApiError>) -> Result<(), ApiError> {
        error.map_or(Ok(()), |error| Err(error.clone()))
    }
}

impl TorrentApi for FakeApi {
    async fn login(&self) -> Result<(), ApiError> {
        self.record(Call::Login);
        Ok(())
    }

    async fn torrents(&self) -> Result<Vec<TorrentInfo>, ApiError> {
        self.record(Call::Torrents);
        self.torrents_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.torrent_list.clone()))
    }

    async fn torrent(&self, hash: &str) -> Result<Option<TorrentInfo>, ApiError> {
        self.record(Call::Torrent);
        Ok(Some(TorrentInfo {
            state: self.state,
            ..torrent(hash, "fake")
        }))
    }

    async fn files(&self, hash: &str) -> Result<Vec<TorrentFile>, ApiError> {
        self.record(Call::Files);
        if let Some(error) = &self.files_error {
            return Err(error.clone());
        }
        Ok(self.files.get(hash).cloned().unwrap_or_default())
    }

    async fn rename_torrent(&self, _hash: &str, name: &str) -> Result<(), ApiError> {
        self.record(Call::RenameTorrent(name.to_string()));
        self.rename_torrent_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn rename_file(&self, _hash: &str, old_path: &str, new_path: &str) -> Result<(), ApiError> {
        self.record(Call::RenameFile {
            old: old_path.to_string(),
            new: new_path.to_string(),
        });
        self.next_rename_result()
    }

    async fn rename_folder(&self, _hash: &str, old_path: &str, new_path: &str) -> Result<(), ApiError> {
        self.record(Call::RenameFolder {
            old: old_path.to_string(),
            new: new_path.to_string(),
        });
        self.next_rename_result()
    }

    async fn pause(&self, _hash: &str) -> Result<(), ApiError> {
        self.record(Call::Pause);
        Self::error_or_ok(self.pause_error.as_ref())
    }

    async fn resume(&self, _hash: &str) -> Result<(), ApiError> {
        self.record(Call::Resume);
        Ok(())
    }

    async fn force_start(&self, _hash: &str) -> Result<(), ApiError> {
        self.record(Call::ForceStart);
        Self::error_or_ok(self.force_start_error.as_ref())
    }
}
