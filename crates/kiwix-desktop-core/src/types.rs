//! Types module - data structures for the Kiwix desktop core
//!
//! These types define the data models shared by the catalog, the download
//! engine client and the download tracker.

use crate::utils::{convert_to_units, download_progress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A content entry of the local catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    /// Local archive path, empty until the book has been downloaded
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
    /// Identifier of the engine transfer fetching this book, empty if none
    #[serde(default)]
    pub download_id: String,
}

impl Book {
    /// A catalog entry that still has to be downloaded from `url`
    pub fn remote(id: impl Into<String>, url: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            path: String::new(),
            size,
            url: url.into(),
            title: String::new(),
            added_at: Some(Utc::now()),
            download_id: String::new(),
        }
    }

    pub fn is_local(&self) -> bool {
        !self.path.is_empty()
    }

    pub fn is_downloading(&self) -> bool {
        !self.download_id.is_empty()
    }
}

/// A bookmarked article inside a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub book_id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(book_id: impl Into<String>, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            url: url.into(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

/// Criteria for [`crate::Library::list_book_ids`]
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Case-insensitive substring of the title
    pub query: Option<String>,
    pub local: bool,
    pub remote: bool,
    pub downloading: bool,
}

impl Filter {
    pub fn accepts(&self, book: &Book) -> bool {
        if self.local && !book.is_local() {
            return false;
        }
        if self.remote && book.is_local() {
            return false;
        }
        if self.downloading && !book.is_downloading() {
            return false;
        }
        match &self.query {
            Some(query) => book.title.to_lowercase().contains(&query.to_lowercase()),
            None => true,
        }
    }
}

/// Sort key for catalog listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    Title,
    Size,
    Date,
    Id,
}

impl From<&str> for SortBy {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "size" => SortBy::Size,
            "date" => SortBy::Date,
            "id" => SortBy::Id,
            _ => SortBy::Title,
        }
    }
}

/// Status of a transfer as reported by the download engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DownloadStatus {
    Active,
    #[default]
    Waiting,
    Paused,
    Error,
    Complete,
    Removed,
}

impl From<&str> for DownloadStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => DownloadStatus::Active,
            "waiting" => DownloadStatus::Waiting,
            "paused" => DownloadStatus::Paused,
            "error" => DownloadStatus::Error,
            "complete" | "completed" => DownloadStatus::Complete,
            "removed" => DownloadStatus::Removed,
            _ => DownloadStatus::Waiting,
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadStatus::Active => write!(f, "active"),
            DownloadStatus::Waiting => write!(f, "waiting"),
            DownloadStatus::Paused => write!(f, "paused"),
            DownloadStatus::Error => write!(f, "error"),
            DownloadStatus::Complete => write!(f, "complete"),
            DownloadStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Raw engine data about one transfer, refreshed on every poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub status: DownloadStatus,
    pub completed_length: u64,
    pub total_length: u64,
    pub download_speed: u64,
    pub path: String,
}

/// Display-ready progress of a download
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadState {
    /// Percent complete, rounded to 3 significant digits
    pub progress: f64,
    pub completed_length: String,
    pub download_speed: String,
    pub paused: bool,
}

impl DownloadState {
    /// Placeholder for a download restored from the catalog whose live state
    /// is not known yet
    pub fn restored() -> Self {
        Self {
            paused: true,
            ..Default::default()
        }
    }

    pub fn update(&mut self, info: &DownloadInfo) {
        *self = Self {
            progress: download_progress(info.completed_length, info.total_length),
            completed_length: convert_to_units(info.completed_length as f64),
            download_speed: format!("{}/s", convert_to_units(info.download_speed as f64)),
            paused: info.status == DownloadStatus::Paused,
        };
    }

    pub fn from_info(info: &DownloadInfo) -> Self {
        let mut state = Self::default();
        state.update(info);
        state
    }
}

/// Lifecycle phase of a tracked download.
///
/// `Vanished` is terminal: the entry is no longer polled until it is removed
/// from the tracker or started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DownloadPhase {
    #[default]
    Active,
    Paused,
    Complete,
    Error,
    Vanished,
}

impl From<DownloadStatus> for DownloadPhase {
    fn from(status: DownloadStatus) -> Self {
        match status {
            DownloadStatus::Active | DownloadStatus::Waiting => DownloadPhase::Active,
            DownloadStatus::Paused => DownloadPhase::Paused,
            DownloadStatus::Error => DownloadPhase::Error,
            DownloadStatus::Complete => DownloadPhase::Complete,
            DownloadStatus::Removed => DownloadPhase::Vanished,
        }
    }
}

/// What the tracker knows about one catalog entry's download
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadRecord {
    pub state: DownloadState,
    pub phase: DownloadPhase,
}

impl DownloadRecord {
    pub fn restored() -> Self {
        Self {
            state: DownloadState::restored(),
            phase: DownloadPhase::Paused,
        }
    }
}

/// Options passed to aria2 when adding a download
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DownloadOptions {
    /// Directory to save the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Output filename
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connection_per_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_download_limit: Option<String>,
}

impl DownloadOptions {
    pub fn in_dir(dir: impl Into<String>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Default::default()
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub library_dir: String,
    pub download_dir: String,
    /// Directory scanned for ZIM files, empty when monitoring is off
    pub monitor_dir: String,
    pub download_enabled: bool,
    pub aria2_path: String,
    pub aria2_rpc_port: u16,
    /// RPC endpoint of an already running aria2, empty to spawn our own
    pub aria2_rpc_url: String,
    pub aria2_rpc_secret: String,
}

impl Settings {
    pub fn monitor_dir(&self) -> Option<PathBuf> {
        Some(&self.monitor_dir)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let download_dir = dirs::download_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join("Downloads"))
            .to_string_lossy()
            .to_string();

        Self {
            library_dir: crate::db::app_data_dir().to_string_lossy().to_string(),
            download_dir,
            monitor_dir: String::new(),
            download_enabled: true,
            aria2_path: "aria2c".to_string(),
            aria2_rpc_port: 6800,
            aria2_rpc_url: String::new(),
            aria2_rpc_secret: String::new(),
        }
    }
}
