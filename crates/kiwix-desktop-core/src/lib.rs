//! Kiwix Desktop Core Library
//!
//! This crate provides the content catalog, the monitored-directory watcher,
//! the aria2 download engine client and the download lifecycle tracker of the
//! Kiwix desktop reader. It is UI-agnostic and can be used with any frontend.

pub mod content_manager;
pub mod db;
pub mod download_manager;
pub mod engine;
pub mod error;
pub mod library;
pub mod monitor;
pub mod storage;
pub mod types;
pub mod utils;
pub mod zim;

// Re-exports for convenience
pub use content_manager::{BookChange, ContentManager};
pub use db::{get_db_path, init_database, init_database_at, Database, SettingsDb};
pub use download_manager::{DownloadEvent, DownloadManager, VanishReason};
pub use engine::{settings_to_engine_config, Downloader, EngineConfig};
pub use error::{EngineError, Error, Result, StorageError};
pub use library::{Catalog, Library, LibraryEvent};
pub use monitor::{DirWatcher, MonitorDiff};
pub use types::*;
pub use utils::{convert_to_units, download_progress};
